//! Cache-engine family: command catalog, reply-size precheck, wire
//! connection and the backend adapter built on them.

pub mod catalog;
pub mod connection;
pub mod format;
pub mod precheck;

mod backend;

pub use backend::{ClientType, RedisBackend, RedisSession, RESULT_COLUMN};
pub use precheck::{Measurement, PrecheckError, SizeProbe, MAX_ELEMENTS, MAX_STRING_BYTES};
