use std::io;

use tokio::io::{AsyncWrite, AsyncWriteExt};

use crate::{LEN_TYPE_SIZE, LenType, Serialize};

/// Writes one frame per `send`.
///
/// The frame is assembled in a buffer reused across sends, except for the tail a
/// message may hand back from `serialize`, which goes straight to the writer.
pub struct OnoSender<W: AsyncWrite + Unpin> {
    tx: W,
    frame: Vec<u8>,
}

impl<W: AsyncWrite + Unpin> OnoSender<W> {
    pub(super) fn new(tx: W) -> Self {
        Self {
            tx,
            frame: Vec::new(),
        }
    }

    /// Frames `msg` and flushes it.
    ///
    /// # Errors
    /// Whatever `msg` fails to serialize with, or the writer's error.
    pub async fn send<'a, T: Serialize<'a>>(&mut self, msg: &'a T) -> io::Result<()> {
        self.frame.clear();
        self.frame.extend_from_slice(&[0; LEN_TYPE_SIZE]);

        let tail = msg.serialize(&mut self.frame)?;
        let body_len = self.frame.len() - LEN_TYPE_SIZE + tail.map_or(0, <[u8]>::len);
        self.frame[..LEN_TYPE_SIZE].copy_from_slice(&(body_len as LenType).to_be_bytes());

        self.tx.write_all(&self.frame).await?;
        if let Some(tail) = tail {
            self.tx.write_all(tail).await?;
        }

        self.tx.flush().await
    }
}
