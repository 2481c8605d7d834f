//! Request and result model.
//!
//! These are the shapes the transport layer decodes and encodes. They
//! are built fresh for every request and dropped once the response has
//! been written.

use std::collections::HashSet;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::dispatch::ErrorPolicy;
use crate::error::{BackendError, RequestError};

/// Default connect timeout in seconds.
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 2;

/// Default per-command query timeout in seconds.
pub const DEFAULT_QUERY_TIMEOUT_SECS: u64 = 30;

/// One result-set row: column name to value. Values are strings, or
/// null for SQL NULL. Cache-engine replies use a single `result` column.
pub type Row = serde_json::Map<String, serde_json::Value>;

/// A batch job: run `cmds`, in order, against every address.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryRequest {
    pub addresses: Vec<String>,
    pub cmds: Vec<String>,
    #[serde(default)]
    pub force: bool,
    /// Seconds allowed for establishing each connection.
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout: u64,
    /// Seconds allowed for each individual command.
    #[serde(default = "default_query_timeout")]
    pub query_timeout: u64,
}

fn default_connect_timeout() -> u64 {
    DEFAULT_CONNECT_TIMEOUT_SECS
}

fn default_query_timeout() -> u64 {
    DEFAULT_QUERY_TIMEOUT_SECS
}

impl QueryRequest {
    pub fn new(addresses: Vec<String>, cmds: Vec<String>) -> Self {
        Self {
            addresses,
            cmds,
            force: false,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT_SECS,
            query_timeout: DEFAULT_QUERY_TIMEOUT_SECS,
        }
    }

    /// Checks the request before any network activity happens.
    ///
    /// Rejects empty address or command lists, zero timeouts, addresses
    /// that aren't `host:port`, and the same address listed twice.
    pub fn validate(&self) -> Result<(), RequestError> {
        if self.addresses.is_empty() {
            return Err(RequestError::NoAddresses);
        }
        if self.cmds.is_empty() {
            return Err(RequestError::NoCommands);
        }
        if self.connect_timeout == 0 {
            return Err(RequestError::ZeroTimeout {
                field: "connect_timeout",
            });
        }
        if self.query_timeout == 0 {
            return Err(RequestError::ZeroTimeout {
                field: "query_timeout",
            });
        }

        let mut seen = HashSet::with_capacity(self.addresses.len());
        for address in &self.addresses {
            if split_host_port(address).is_none() {
                return Err(RequestError::InvalidAddress(address.clone()));
            }
            if !seen.insert(address.trim()) {
                return Err(RequestError::DuplicateAddress(address.clone()));
            }
        }
        Ok(())
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout)
    }

    pub fn query_timeout(&self) -> Duration {
        Duration::from_secs(self.query_timeout)
    }

    pub fn policy(&self) -> ErrorPolicy {
        ErrorPolicy::from_force(self.force)
    }
}

/// Outcome of one command on one address.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CmdResult {
    pub cmd: String,
    pub table_data: Vec<Row>,
    pub rows_affected: u64,
    pub error_msg: String,
    /// Not sent to clients: `error_msg` carries the reason.
    #[serde(skip)]
    refused: bool,
}

impl CmdResult {
    pub fn rows(cmd: &str, table_data: Vec<Row>) -> Self {
        Self {
            cmd: cmd.to_string(),
            table_data,
            ..Self::default()
        }
    }

    pub fn affected(cmd: &str, rows_affected: u64) -> Self {
        Self {
            cmd: cmd.to_string(),
            rows_affected,
            ..Self::default()
        }
    }

    pub fn failed(cmd: &str, error: impl std::fmt::Display) -> Self {
        Self {
            cmd: cmd.to_string(),
            error_msg: error.to_string(),
            ..Self::default()
        }
    }

    /// A failure that remembers whether dbrelay declined the command
    /// itself. See [`BackendError::is_refusal`].
    pub fn from_error(cmd: &str, error: &BackendError) -> Self {
        Self {
            refused: error.is_refusal(),
            ..Self::failed(cmd, error)
        }
    }

    pub fn is_error(&self) -> bool {
        !self.error_msg.is_empty()
    }

    /// True when the command was never sent: unsupported, or refused by
    /// the precheck.
    pub fn is_refusal(&self) -> bool {
        self.refused
    }
}

/// All command results for one address.
///
/// `error_msg` is only set when the address itself failed. After a
/// connect failure `cmd_results` is empty; after a task panic it holds
/// the commands that finished before the panic.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AddressResult {
    pub address: String,
    pub cmd_results: Vec<CmdResult>,
    pub error_msg: String,
}

impl AddressResult {
    pub fn unreachable(address: &str, error: impl std::fmt::Display) -> Self {
        Self {
            address: address.to_string(),
            cmd_results: Vec::new(),
            error_msg: error.to_string(),
        }
    }

    /// True if the address failed or any of its commands did.
    pub fn has_errors(&self) -> bool {
        !self.error_msg.is_empty() || self.cmd_results.iter().any(CmdResult::is_error)
    }
}

/// Splits `host:port`, accepting bracketed IPv6 hosts (`[::1]:6379`).
pub fn split_host_port(address: &str) -> Option<(&str, u16)> {
    let (host, port) = address.trim().rsplit_once(':')?;
    let host = host
        .strip_prefix('[')
        .and_then(|h| h.strip_suffix(']'))
        .unwrap_or(host);
    if host.is_empty() || host.contains(char::is_whitespace) {
        return None;
    }
    let port: u16 = port.parse().ok()?;
    if port == 0 {
        return None;
    }
    Some((host, port))
}
