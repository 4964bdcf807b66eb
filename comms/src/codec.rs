use std::io;

/// Writes a value into an outgoing frame.
pub trait Encode<'a> {
    /// Appends the owned part of the encoding to `buf`.
    ///
    /// # Arguments
    /// * `buf` - The frame buffer, already holding the length prefix.
    ///
    /// # Returns
    /// An optional borrowed tail that is written right after `buf` without copying.
    fn encode(&'a self, buf: &mut Vec<u8>) -> Option<&'a [u8]>;
}

/// Reads a value out of an incoming frame, borrowing from it when possible.
pub trait Decode<'a>: Sized {
    fn decode(buf: &'a [u8]) -> io::Result<Self>;
}

/// Element types of a receive buffer.
///
/// They are at least 4-byte aligned so `f32` bodies can be viewed in place.
pub trait FrameWord: bytemuck::Pod {}

impl FrameWord for u32 {}
impl FrameWord for i32 {}
impl FrameWord for f32 {}
impl FrameWord for u64 {}
impl FrameWord for i64 {}
impl FrameWord for f64 {}
