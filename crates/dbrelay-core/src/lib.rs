//! dbrelay-core: remote command execution against database fleets.
//!
//! A [`QueryRequest`] names a batch of `host:port` addresses and an
//! ordered list of commands. The [`Dispatcher`] runs the command list
//! against every address concurrently, bounded by a process-wide
//! semaphore, and returns one [`AddressResult`] per address.
//!
//! Everything backend specific sits behind the [`Backend`] trait:
//! connection setup, operator credentials and the query/execute
//! classification of a command. Four families are provided:
//!
//! - [`MySqlBackend`]: generic SQL engines, including the `tdbctl`
//!   control-plane redirection idiom.
//! - [`ProxyBackend`]: the admin port of a SQL routing proxy.
//! - [`ColumnarBackend`]: a MySQL-wire columnar engine.
//! - [`RedisBackend`]: the cache engine, where every command is measured
//!   by the [`redis::precheck`] engine before it is sent.

pub mod backend;
pub mod dispatch;
pub mod error;
pub mod redis;
pub mod request;
pub mod sql;

pub use backend::{Backend, BackendConnection, CommandKind, Credentials, ParsedCommand};
pub use dispatch::{Dispatcher, ErrorPolicy};
pub use error::{BackendError, RequestError};
pub use redis::{ClientType, RedisBackend};
pub use request::{AddressResult, CmdResult, QueryRequest, Row};
pub use sql::{ColumnarBackend, MySqlBackend, ProxyBackend};
