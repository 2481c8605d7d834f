//! The capability contract every backend family implements.
//!
//! The dispatcher only ever sees these two traits. Adding a backend
//! means implementing them for a new type; the fan-out logic doesn't
//! change.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::BackendError;
use crate::request::Row;

/// How a command is run, decided before it touches the network.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandKind {
    /// Produces a result set.
    Query,
    /// Produces an affected-row count.
    Execute,
    /// Rejected without being sent.
    Unsupported,
}

/// A command as seen by the classifier.
///
/// SQL adapters don't parse anything: `args` stays empty and `name` is
/// just the lowercased first word. The cache adapter splits the line
/// into the argument vector it will send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedCommand {
    pub raw: String,
    pub name: String,
    pub args: Vec<String>,
}

impl ParsedCommand {
    /// Wraps a raw command line without parsing it.
    pub fn passthrough(raw: &str) -> Self {
        let raw = raw.trim();
        Self {
            raw: raw.to_string(),
            name: raw
                .split_whitespace()
                .next()
                .unwrap_or_default()
                .to_ascii_lowercase(),
            args: Vec::new(),
        }
    }
}

/// Operator credentials for one backend family, read from process
/// configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Credentials {
    pub user: String,
    pub password: String,
}

impl Credentials {
    pub fn new(user: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            password: password.into(),
        }
    }
}

/// One backend family: how to connect and how to classify commands.
#[async_trait]
pub trait Backend: Send + Sync + 'static {
    type Connection: BackendConnection;

    /// Short family name used in logs and metrics labels.
    fn name(&self) -> &'static str;

    fn user(&self) -> &str;

    fn password(&self) -> &str;

    /// Opens a connection to `address`, giving up after `connect_timeout`.
    async fn make_connection(
        &self,
        address: &str,
        connect_timeout: Duration,
    ) -> Result<Self::Connection, BackendError>;

    fn parse_command(&self, raw: &str) -> ParsedCommand;

    fn is_query_command(&self, cmd: &ParsedCommand) -> bool;

    fn is_execute_command(&self, cmd: &ParsedCommand) -> bool;

    /// Parses and classifies a raw command. Query wins if both match.
    fn classify(&self, raw: &str) -> (ParsedCommand, CommandKind) {
        let cmd = self.parse_command(raw);
        let kind = if self.is_query_command(&cmd) {
            CommandKind::Query
        } else if self.is_execute_command(&cmd) {
            CommandKind::Execute
        } else {
            CommandKind::Unsupported
        };
        (cmd, kind)
    }
}

/// A live connection to one backend instance, owned by one address task.
#[async_trait]
pub trait BackendConnection: Send + Sized + 'static {
    /// Runs a command and materialises its full result set.
    async fn query(&mut self, cmd: &ParsedCommand) -> Result<Vec<Row>, BackendError>;

    /// Runs a command and returns the affected-row count.
    async fn execute(&mut self, cmd: &ParsedCommand) -> Result<u64, BackendError>;

    /// Closes the connection. Dropping it also releases the socket; this
    /// just lets the backend see an orderly goodbye.
    async fn close(self);
}

/// Case-insensitive keyword prefix match over a whitespace-normalised
/// command, so `create   login` matches the keyword `create login`.
pub(crate) fn starts_with_any(raw: &str, keywords: &[&str]) -> bool {
    let normalized = raw
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_ascii_lowercase();
    keywords.iter().any(|kw| normalized.starts_with(kw))
}
