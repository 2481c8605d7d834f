//! dbrelay-protocol: the cache-engine wire format.
//!
//! Provides an incremental RESP parser, direct-to-buffer serialization,
//! and the redis-cli style splitter that turns a raw command line into
//! the argument vector sent over the wire.
//!
//! # quick start
//!
//! ```
//! use bytes::BytesMut;
//! use dbrelay_protocol::{parse_frame, split_args, Frame};
//!
//! let args = split_args("set greeting \"hello world\"").unwrap();
//! assert_eq!(args, vec!["set", "greeting", "hello world"]);
//!
//! let mut buf = BytesMut::new();
//! Frame::command(&args).serialize(&mut buf);
//!
//! let (frame, consumed) = parse_frame(b"+OK\r\n").unwrap().unwrap();
//! assert_eq!(frame, Frame::Simple("OK".into()));
//! assert_eq!(consumed, 5);
//! ```

pub mod args;
pub mod error;
pub mod parse;
mod serialize;
pub mod types;

pub use args::split_args;
pub use error::ProtocolError;
pub use parse::parse_frame;
pub use types::Frame;
