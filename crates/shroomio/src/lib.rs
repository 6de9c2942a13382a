//! `shroomio`: wire plumbing for the Shroom game protocol.
//!
//! This crate intentionally avoids tokio-util's codecs and implements just what we need:
//! - pooled single-owner packet buffers with a little-endian reader/writer,
//! - the legacy cipher stack (byte scramble + AES keystream + rolling round keys),
//! - length-prefixed encrypted frame IO over any `AsyncRead + AsyncWrite` stream,
//! - a per-connection pump with bounded inbound/outbound queues.

pub mod conn;
pub mod crypto;
pub mod handshake;
pub mod packet;
pub mod pool;
pub mod pump;
pub mod reader;
pub mod writer;

/// Largest payload a single frame may carry. Anything above this (or zero)
/// is rejected before a buffer is rented.
pub const MAX_PACKET_LEN: usize = 32767;

/// Size of the encrypted frame header on the wire.
pub const HEADER_LEN: usize = 4;

#[derive(Debug)]
pub enum NetError {
    /// Not enough bytes left in the current packet.
    TooShort { need: usize, got: usize },
    /// A length-prefixed string carried a negative length.
    NegativeLength(i16),
    /// A string does not fit its fixed-size field (value plus NUL).
    StringTooLong { len: usize, max: usize },
    /// A character outside the Latin-1 range cannot go on the wire.
    NonLatin1(char),
    /// Frame length of zero or above [`MAX_PACKET_LEN`].
    FrameLength(usize),
    /// Header key check failed: either garbage or a desynced cipher.
    InvalidHeader,
    /// Handshake violated its framing or value ranges.
    BadHandshake(&'static str),
    Io(std::io::Error),
}

impl std::fmt::Display for NetError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NetError::TooShort { need, got } => {
                write!(f, "packet too short: need {need}, got {got}")
            }
            NetError::NegativeLength(n) => write!(f, "negative string length: {n}"),
            NetError::StringTooLong { len, max } => {
                write!(f, "string of {len} bytes exceeds field of {max}")
            }
            NetError::NonLatin1(c) => write!(f, "character {c:?} is not Latin-1"),
            NetError::FrameLength(n) => write!(f, "invalid frame length: {n}"),
            NetError::InvalidHeader => write!(f, "frame header failed key check"),
            NetError::BadHandshake(s) => write!(f, "bad handshake: {s}"),
            NetError::Io(e) => write!(f, "io: {e}"),
        }
    }
}

impl std::error::Error for NetError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            NetError::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for NetError {
    fn from(e: std::io::Error) -> Self {
        NetError::Io(e)
    }
}
