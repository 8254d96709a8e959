use std::io;

use tokio::io::{AsyncRead, AsyncReadExt};

use crate::{Deserialize, LEN_TYPE_SIZE, LenType, MAX_FRAME_LEN};

/// Reads one frame per `recv_into`.
pub struct OnoReceiver<R: AsyncRead + Unpin> {
    rx: R,
    max_frame_len: usize,
}

impl<R: AsyncRead + Unpin> OnoReceiver<R> {
    pub(super) fn new(rx: R) -> Self {
        Self {
            rx,
            max_frame_len: MAX_FRAME_LEN,
        }
    }

    /// Replaces the largest accepted frame body, in bytes.
    pub fn with_max_frame_len(mut self, max_frame_len: usize) -> Self {
        self.max_frame_len = max_frame_len;
        self
    }

    /// Waits for the next frame and deserializes it.
    ///
    /// # Arguments
    /// * `buf` - Holds the frame body, the returned `T` may borrow from it.
    ///
    /// # Errors
    /// `InvalidData` if the announced body is larger than the accepted maximum,
    /// in which case nothing past the header is read. Otherwise the reader's or the
    /// deserializer's error.
    pub async fn recv_into<'buf, T>(&mut self, buf: &'buf mut Vec<u8>) -> io::Result<T>
    where
        T: Deserialize<'buf>,
    {
        let mut header = [0; LEN_TYPE_SIZE];
        self.rx.read_exact(&mut header).await?;
        let announced = LenType::from_be_bytes(header);

        let len = usize::try_from(announced)
            .ok()
            .filter(|len| *len <= self.max_frame_len)
            .ok_or_else(|| {
                io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!(
                        "frame of {announced} bytes exceeds the {} bytes limit",
                        self.max_frame_len
                    ),
                )
            })?;

        buf.clear();
        buf.resize(len, 0);
        self.rx.read_exact(buf).await?;

        let body: &'buf [u8] = buf;
        T::deserialize(body)
    }
}
