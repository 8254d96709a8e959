//! Length-prefixed framing over tokio streams and the messages exchanged between
//! samplers, learners and their subscribers.
//!
//! Every frame is a big endian `u64` body length followed by the body, which starts
//! with the `u32` message kind.

mod deserialize;
pub mod msg;
mod receiver;
mod sender;
mod serialize;
mod wire;

use tokio::io::{AsyncRead, AsyncWrite};

pub use deserialize::Deserialize;
pub use receiver::OnoReceiver;
pub use sender::OnoSender;
pub use serialize::{Encoded, Serialize};

type LenType = u64;
const LEN_TYPE_SIZE: usize = size_of::<LenType>();

/// Largest frame body a receiver accepts unless told otherwise.
pub const MAX_FRAME_LEN: usize = 64 * 1024 * 1024;

/// Wraps the two halves of a stream into framed ends.
///
/// The receiving end rejects frames larger than `MAX_FRAME_LEN`, see
/// `OnoReceiver::with_max_frame_len` to change it.
pub fn channel<R, W>(rx: R, tx: W) -> (OnoReceiver<R>, OnoSender<W>)
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    (OnoReceiver::new(rx), OnoSender::new(tx))
}
