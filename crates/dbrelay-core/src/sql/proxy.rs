//! SQL routing proxy adapter (admin port).

use std::time::Duration;

use async_trait::async_trait;
use sqlx::mysql::MySqlConnectOptions;
use tracing::warn;

use super::SqlConnection;
use crate::backend::{starts_with_any, Backend, Credentials, ParsedCommand};
use crate::error::BackendError;

/// Wait before the single reconnect attempt. The admin port drops fresh
/// connections while it reloads its backend list.
pub const PROXY_RECONNECT_BACKOFF: Duration = Duration::from_secs(1);

const QUERY_KEYWORDS: &[&str] = &["select", "show"];

const EXECUTE_KEYWORDS: &[&str] = &["refresh_users", "refresh_backends", "refresh_connlog"];

/// Admin interface of a MySQL-protocol routing proxy.
#[derive(Debug, Clone)]
pub struct ProxyBackend {
    credentials: Credentials,
    backoff: Duration,
}

impl ProxyBackend {
    pub fn new(credentials: Credentials) -> Self {
        Self {
            credentials,
            backoff: PROXY_RECONNECT_BACKOFF,
        }
    }

    async fn connect_once(
        &self,
        address: &str,
        connect_timeout: Duration,
    ) -> Result<SqlConnection, BackendError> {
        super::connect(address, &self.credentials, connect_timeout, admin_port_options).await
    }
}

/// The admin port only understands its own command set, so the driver's
/// session setup (`SET sql_mode`, `SET time_zone`, `SET NAMES`) is off.
fn admin_port_options(options: MySqlConnectOptions) -> MySqlConnectOptions {
    options
        .pipes_as_concat(false)
        .no_engine_substitution(false)
        .timezone(None::<String>)
        .set_names(false)
}

#[async_trait]
impl Backend for ProxyBackend {
    type Connection = SqlConnection;

    fn name(&self) -> &'static str {
        "proxy"
    }

    fn user(&self) -> &str {
        &self.credentials.user
    }

    fn password(&self) -> &str {
        &self.credentials.password
    }

    /// Connects, retrying exactly once after [`PROXY_RECONNECT_BACKOFF`].
    async fn make_connection(
        &self,
        address: &str,
        connect_timeout: Duration,
    ) -> Result<SqlConnection, BackendError> {
        match self.connect_once(address, connect_timeout).await {
            Ok(conn) => Ok(conn),
            Err(e @ BackendError::InvalidAddress(_)) => Err(e),
            Err(e) => {
                warn!(%address, "proxy connect failed, retrying once: {e}");
                tokio::time::sleep(self.backoff).await;
                self.connect_once(address, connect_timeout).await
            }
        }
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
