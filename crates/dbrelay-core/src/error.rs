//! Error types shared by the adapters and the dispatcher.

use std::time::Duration;

use dbrelay_protocol::ProtocolError;
use thiserror::Error;

use crate::redis::precheck::PrecheckError;

/// Failures while talking to one backend instance.
///
/// Connect-time variants end up as an address-level error; everything
/// else is attached to the command that triggered it.
#[derive(Debug, Error)]
pub enum BackendError {
    /// The address isn't a usable `host:port` pair.
    #[error("invalid address '{0}': expected host:port")]
    InvalidAddress(String),

    /// The network connection or login could not be established.
    #[error("connect to {address} failed: {reason}")]
    Connect { address: String, reason: String },

    /// Connecting took longer than the request's connect timeout.
    #[error("connect to {address} timed out after {}s", .timeout.as_secs())]
    ConnectTimeout { address: String, timeout: Duration },

    /// The adapter classified the command as neither query nor execute.
    #[error("unsupported command: {0}")]
    Unsupported(String),

    /// The command didn't complete within the request's query timeout.
    #[error("command timed out after {}s", .0.as_secs())]
    Timeout(Duration),

    /// The backend ran the command and rejected it.
    #[error("{0}")]
    Server(String),

    /// The safety precheck refused the command; nothing was sent.
    #[error("refused before execution: {0}")]
    Refused(#[from] PrecheckError),

    /// The backend sent a reply we couldn't make sense of.
    #[error("unexpected reply: {0}")]
    UnexpectedReply(String),

    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// The server closed the connection mid-command.
    #[error("server closed the connection")]
    Disconnected,
}

impl BackendError {
    /// True when the proxy itself declined to run the command, as opposed
    /// to the backend rejecting it.
    pub fn is_refusal(&self) -> bool {
        matches!(self, BackendError::Refused(_) | BackendError::Unsupported(_))
    }

    pub(crate) fn connect(address: &str, reason: impl std::fmt::Display) -> Self {
        BackendError::Connect {
            address: address.to_string(),
            reason: reason.to_string(),
        }
    }
}

impl From<sqlx::Error> for BackendError {
    fn from(e: sqlx::Error) -> Self {
        match e {
            sqlx::Error::Database(db) => BackendError::Server(db.to_string()),
            sqlx::Error::Io(io) => BackendError::Io(io),
            other => BackendError::Server(other.to_string()),
        }
    }
}

/// Request validation failures. Raised before any dispatch happens.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RequestError {
    #[error("no addresses given")]
    NoAddresses,

    #[error("no commands given")]
    NoCommands,

    #[error("invalid address '{0}': expected host:port")]
    InvalidAddress(String),

    #[error("duplicate address: {0}")]
    DuplicateAddress(String),

    #[error("{field} must be greater than zero")]
    ZeroTimeout { field: &'static str },
}
