//! Length-prefixed frames over any async byte stream.

use std::io;

use bytemuck::Zeroable;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::{Decode, Encode, FrameWord};

type LenType = u64;
const LEN_SIZE: usize = size_of::<LenType>();

/// Frames larger than this are refused on both ends.
pub const DEFAULT_MAX_FRAME_LEN: usize = 1 << 30;

fn too_large(len: usize, max: usize) -> io::Error {
    io::Error::new(
        io::ErrorKind::InvalidData,
        format!("frame of {len} bytes exceeds the limit of {max} bytes"),
    )
}

/// The sending half of a framed channel.
pub struct FrameSender<W: AsyncWrite + Unpin> {
    tx: W,
    buf: Vec<u8>,
    max_frame_len: usize,
}

impl<W: AsyncWrite + Unpin> FrameSender<W> {
    pub(crate) fn new(tx: W) -> Self {
        Self {
            tx,
            buf: Vec::new(),
            max_frame_len: DEFAULT_MAX_FRAME_LEN,
        }
    }

    pub fn with_max_frame_len(mut self, max_frame_len: usize) -> Self {
        self.max_frame_len = max_frame_len;
        self
    }

    /// Encodes `msg` into a single frame and flushes it.
    ///
    /// # Arguments
    /// * `msg` - Anything encodable, its borrowed tail is written without copying.
    ///
    /// # Errors
    /// `InvalidData` if the frame is over the limit, or the writer's own errors.
    pub async fn send<'a, T: Encode<'a>>(&mut self, msg: &'a T) -> io::Result<()> {
        let Self {
            tx,
            buf,
            max_frame_len,
        } = self;

        buf.clear();
        buf.resize(LEN_SIZE, 0);

        let tail = msg.encode(buf);
        let len = buf.len() - LEN_SIZE + tail.map_or(0, <[u8]>::len);
        if len > *max_frame_len {
            return Err(too_large(len, *max_frame_len));
        }

        buf[..LEN_SIZE].copy_from_slice(&(len as LenType).to_be_bytes());
        tx.write_all(buf).await?;

        if let Some(tail) = tail {
            tx.write_all(tail).await?;
        }

        tx.flush().await
    }
}

/// The receiving half of a framed channel.
pub struct FrameReceiver<R: AsyncRead + Unpin> {
    rx: R,
    max_frame_len: usize,
}

impl<R: AsyncRead + Unpin> FrameReceiver<R> {
    pub(crate) fn new(rx: R) -> Self {
        Self {
            rx,
            max_frame_len: DEFAULT_MAX_FRAME_LEN,
        }
    }

    pub fn with_max_frame_len(mut self, max_frame_len: usize) -> Self {
        self.max_frame_len = max_frame_len;
        self
    }

    /// Waits for the next frame and decodes it.
    ///
    /// # Arguments
    /// * `buf` - Scratch space the frame is read into, the decoded `T` borrows from it.
    ///
    /// # Errors
    /// `UnexpectedEof` if the peer hung up, `InvalidData` on oversized or malformed frames.
    pub async fn recv_into<'buf, T, B>(&mut self, buf: &'buf mut Vec<B>) -> io::Result<T>
    where
        T: Decode<'buf>,
        B: FrameWord,
    {
        let mut len_buf = [0; LEN_SIZE];
        self.rx.read_exact(&mut len_buf).await?;

        let len = usize::try_from(LenType::from_be_bytes(len_buf))
            .map_err(|_| too_large(usize::MAX, self.max_frame_len))?;
        if len > self.max_frame_len {
            return Err(too_large(len, self.max_frame_len));
        }

        buf.clear();
        buf.resize(len.div_ceil(size_of::<B>()), B::zeroed());

        let bytes = &mut bytemuck::cast_slice_mut::<B, u8>(buf)[..len];
        self.rx.read_exact(bytes).await?;

        T::decode(bytes)
    }
}
