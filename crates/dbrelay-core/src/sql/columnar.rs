//! Columnar SQL engine adapter (MySQL-wire analytic engines).

use std::time::Duration;

use async_trait::async_trait;

use super::SqlConnection;
use crate::backend::{starts_with_any, Backend, Credentials, ParsedCommand};
use crate::error::BackendError;

/// Checked before the execute list, so `restore filelistonly` reads its
/// file list back instead of counting as a restore.
const QUERY_KEYWORDS: &[&str] = &[
    "select",
    "show",
    "desc",
    "describe",
    "explain",
    "with",
    "help",
    "restore filelistonly",
];

const EXECUTE_KEYWORDS: &[&str] = &[
    "use",
    "set",
    "insert",
    "create",
    "drop",
    "alter",
    "truncate",
    "grant",
    "revoke",
    "delete",
    "update",
    "admin",
    "cancel",
    "recover",
    "backup",
    "restore",
    "refresh",
    "kill",
    "sync",
    "install plugin",
    "uninstall plugin",
    "analyze",
    "export",
];

#[derive(Debug, Clone)]
pub struct ColumnarBackend {
    credentials: Credentials,
}

impl ColumnarBackend {
    pub fn new(credentials: Credentials) -> Self {
        Self { credentials }
    }
}

#[async_trait]
impl Backend for ColumnarBackend {
    type Connection = SqlConnection;

    fn name(&self) -> &'static str {
        "columnar"
    }

    fn user(&self) -> &str {
        &self.credentials.user
    }

    fn password(&self) -> &str {
        &self.credentials.password
    }

    async fn make_connection(
        &self,
        address: &str,
        connect_timeout: Duration,
    ) -> Result<SqlConnection, BackendError> {
        super::connect(address, &self.credentials, connect_timeout, |o| o).await
    }

    fn parse_command(&self, raw: &str) -> ParsedCommand {
        ParsedCommand::passthrough(raw)
    }

    fn is_query_command(&self, cmd: &ParsedCommand) -> bool {
        starts_with_any(&cmd.raw, QUERY_KEYWORDS)
    }

    fn is_execute_command(&self, cmd: &ParsedCommand) -> bool {
        starts_with_any(&cmd.raw, EXECUTE_KEYWORDS)
    }
}
