use std::{borrow::Cow, io};

use crate::{Decode, Encode};

type Header = u32;
const HEADER_SIZE: usize = size_of::<Header>();

const ERR: Header = 0;
const CONTROL: Header = 1;
const PARTIAL: Header = 2;
const REDUCED: Header = 3;

/// The payload data for the `Data` variant of the `Msg` enum.
#[derive(Debug, PartialEq)]
pub enum Payload<'a> {
    /// A rank's local contribution to a reduction.
    Partial(&'a [f32]),
    /// The finished sum, forwarded to the destination rank.
    Reduced(&'a [f32]),
}

/// The command for the `Control` variant of the `Msg` enum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Command {
    /// A peer introduces itself, with the iteration it resumes from.
    Hello {
        rank: usize,
        world_size: usize,
        start_iter: usize,
    },
    /// The coordinator accepted every peer.
    Welcome,
    Barrier,
    Release,
    Disconnect,
}

/// A message exchanged between ranks.
///
/// The body starts with a big-endian `u32` kind: `0` error text, `1` a JSON
/// command, `2` a partial sum and `3` a reduced sum, both raw `f32`s.
#[derive(Debug, PartialEq)]
pub enum Msg<'a> {
    Control(Command),
    Data(Payload<'a>),
    Err(Cow<'a, str>),
}

impl Msg<'_> {
    /// A short, stable name of the message kind, for logs and errors.
    pub fn kind(&self) -> &'static str {
        match self {
            Msg::Control(Command::Hello { .. }) => "control/hello",
            Msg::Control(Command::Welcome) => "control/welcome",
            Msg::Control(Command::Barrier) => "control/barrier",
            Msg::Control(Command::Release) => "control/release",
            Msg::Control(Command::Disconnect) => "control/disconnect",
            Msg::Data(Payload::Partial(_)) => "data/partial",
            Msg::Data(Payload::Reduced(_)) => "data/reduced",
            Msg::Err(_) => "err",
        }
    }

    fn buf_is_too_small<T>(size: usize) -> io::Result<T> {
        Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("frame body of {size} bytes is shorter than the {HEADER_SIZE} byte header"),
        ))
    }

    fn invalid_kind<T>(kind: Header) -> io::Result<T> {
        Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("unknown message kind {kind}"),
        ))
    }
}

impl<'a> Encode<'a> for Msg<'a> {
    fn encode(&'a self, buf: &mut Vec<u8>) -> Option<&'a [u8]> {
        match self {
            Msg::Err(e) => {
                buf.extend_from_slice(&ERR.to_be_bytes());
                Some(e.as_bytes())
            }
            Msg::Control(cmd) => {
                buf.extend_from_slice(&CONTROL.to_be_bytes());

                // SAFETY: `Command` derives its serde impl and holds no maps.
                serde_json::to_writer(buf, cmd).unwrap();
                None
            }
            Msg::Data(payload) => {
                let (kind, nums) = match payload {
                    Payload::Partial(nums) => (PARTIAL, *nums),
                    Payload::Reduced(nums) => (REDUCED, *nums),
                };

                buf.extend_from_slice(&kind.to_be_bytes());
                Some(bytemuck::cast_slice(nums))
            }
        }
    }
}

impl<'a> Decode<'a> for Msg<'a> {
    fn decode(buf: &'a [u8]) -> io::Result<Self> {
        let Some((kind_buf, rest)) = buf.split_first_chunk::<HEADER_SIZE>() else {
            return Self::buf_is_too_small(buf.len());
        };

        match Header::from_be_bytes(*kind_buf) {
            ERR => {
                let string = std::str::from_utf8(rest)
                    .map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err))?;

                Ok(Self::Err(Cow::Borrowed(string)))
            }
            CONTROL => {
                let cmd = serde_json::from_slice(rest)?;
                Ok(Self::Control(cmd))
            }
            kind @ (PARTIAL | REDUCED) => {
                let nums = bytemuck::try_cast_slice(rest).map_err(|err| {
                    io::Error::new(io::ErrorKind::InvalidData, format!("{err:?}"))
                })?;

                let payload = if kind == PARTIAL {
                    Payload::Partial(nums)
                } else {
                    Payload::Reduced(nums)
                };

                Ok(Self::Data(payload))
            }
            kind => Self::invalid_kind(kind),
        }
    }
}
