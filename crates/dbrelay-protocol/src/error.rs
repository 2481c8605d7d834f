//! Protocol error types.

use thiserror::Error;

/// Errors raised while decoding RESP frames or splitting command lines.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// The input buffer doesn't contain a complete frame yet.
    /// The caller should read more data and try again.
    #[error("incomplete frame: need more data")]
    Incomplete,

    /// The first byte of a frame didn't match any known type prefix.
    #[error("invalid type prefix: {0:#04x}")]
    InvalidPrefix(u8),

    /// Failed to parse an integer value from the frame content.
    #[error("invalid integer encoding")]
    InvalidInteger,

    /// A double frame carried something that isn't a float.
    #[error("invalid double encoding")]
    InvalidDouble,

    /// A bulk string or aggregate declared a length below -1.
    #[error("invalid frame length: {0}")]
    InvalidFrameLength(i64),

    /// A simple string, error or boolean line was not valid.
    #[error("invalid frame: {0}")]
    InvalidFrame(String),

    /// Aggregates nested deeper than the parser allows.
    #[error("frame nesting exceeds {0} levels")]
    NestingTooDeep(usize),

    /// An aggregate declared more elements than the parser allows.
    #[error("aggregate declares too many elements: {0}")]
    TooManyElements(usize),

    /// A bulk string exceeded the maximum allowed length.
    #[error("bulk string too large: {0} bytes")]
    BulkStringTooLarge(usize),

    /// A command line contained an opening quote with no closing quote.
    #[error("unbalanced quotes in command line")]
    UnbalancedQuotes,

    /// A closing quote was directly followed by a non-space character.
    #[error("closing quote must be followed by a space")]
    TrailingAfterQuote,
}
