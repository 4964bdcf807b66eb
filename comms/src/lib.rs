//! Framed messaging between the ranks of a training job.
//!
//! Every frame is a big-endian `u64` length followed by a message body, see
//! [`msg`] for the body layout.

mod codec;
mod framed;
pub mod msg;

use tokio::io::{AsyncRead, AsyncWrite};

pub use codec::{Decode, Encode, FrameWord};
pub use framed::{DEFAULT_MAX_FRAME_LEN, FrameReceiver, FrameSender};

/// Wraps both halves of a byte stream into a framed channel.
///
/// # Arguments
/// * `rx` - An async readable.
/// * `tx` - An async writable.
///
/// # Returns
/// The receiving and sending ends of the channel.
pub fn channel<R, W>(rx: R, tx: W) -> (FrameReceiver<R>, FrameSender<W>)
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    (FrameReceiver::new(rx), FrameSender::new(tx))
}
