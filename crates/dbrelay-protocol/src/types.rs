//! RESP frame types.
//!
//! [`Frame`] covers what a RESP2 server sends back plus the handful of
//! RESP3 types a server may still emit (null, map, double, boolean).
//! Bulk payloads use `Bytes` so replies can be handed around without
//! copying.

use bytes::Bytes;

/// A single RESP protocol frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    /// Simple string reply, e.g. `+OK\r\n`.
    Simple(String),

    /// Error reply, e.g. `-ERR unknown command\r\n`.
    Error(String),

    /// 64-bit signed integer, e.g. `:42\r\n`.
    Integer(i64),

    /// Bulk (binary-safe) string, e.g. `$5\r\nhello\r\n`.
    Bulk(Bytes),

    /// Ordered array of frames, e.g. `*2\r\n+a\r\n+b\r\n`.
    Array(Vec<Frame>),

    /// Null, either RESP3 `_\r\n` or a RESP2 `$-1` / `*-1`.
    Null,

    /// Ordered map of key-value pairs (RESP3 `%`).
    Map(Vec<(Frame, Frame)>),

    /// Floating point number (RESP3 `,`).
    Double(f64),

    /// Boolean (RESP3 `#t` / `#f`).
    Boolean(bool),
}

impl Frame {
    /// Builds the request frame for a command: an array of bulk strings.
    pub fn command<S: AsRef<str>>(args: &[S]) -> Frame {
        Frame::Array(
            args.iter()
                .map(|a| Frame::Bulk(Bytes::copy_from_slice(a.as_ref().as_bytes())))
                .collect(),
        )
    }

    /// Returns `true` if this frame is a null value.
    pub fn is_null(&self) -> bool {
        matches!(self, Frame::Null)
    }

    /// Returns the integer payload, if this is an integer reply.
    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Frame::Integer(n) => Some(*n),
            _ => None,
        }
    }
}
