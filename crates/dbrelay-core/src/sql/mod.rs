//! SQL backend family.
//!
//! All three SQL adapters speak the MySQL wire protocol and share one
//! connection type. Commands go over the text protocol (`COM_QUERY`)
//! exactly as written: nothing is prepared, rewritten or parsed. The
//! adapters differ only in their keyword allow-lists and in how they
//! open a connection.

mod columnar;
mod mysql;
mod proxy;

pub use columnar::ColumnarBackend;
pub use mysql::MySqlBackend;
pub use proxy::{ProxyBackend, PROXY_RECONNECT_BACKOFF};

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use sqlx::mysql::{MySqlConnectOptions, MySqlConnection, MySqlRow};
use sqlx::{Column, ConnectOptions, Connection, Row as _};
use tracing::debug;

use crate::backend::{BackendConnection, Credentials, ParsedCommand};
use crate::error::BackendError;
use crate::request::{split_host_port, Row};

/// An open MySQL-protocol session to one instance.
pub struct SqlConnection {
    address: String,
    inner: MySqlConnection,
}

/// Opens a session to `address` within `connect_timeout`.
///
/// `tune` adjusts the connect options for backends that can't take the
/// driver's default session setup.
pub(crate) async fn connect(
    address: &str,
    credentials: &Credentials,
    connect_timeout: Duration,
    tune: impl FnOnce(MySqlConnectOptions) -> MySqlConnectOptions,
) -> Result<SqlConnection, BackendError> {
    let (host, port) = split_host_port(address)
        .ok_or_else(|| BackendError::InvalidAddress(address.to_string()))?;

    let options = MySqlConnectOptions::new()
        .host(host)
        .port(port)
        .username(&credentials.user)
        .password(&credentials.password)
        .disable_statement_logging();
    let options = tune(options);

    let inner = tokio::time::timeout(connect_timeout, options.connect())
        .await
        .map_err(|_| BackendError::ConnectTimeout {
            address: address.to_string(),
            timeout: connect_timeout,
        })?
        .map_err(|e| BackendError::connect(address, e))?;

    Ok(SqlConnection {
        address: address.to_string(),
        inner,
    })
}

#[async_trait]
impl BackendConnection for SqlConnection {
    async fn query(&mut self, cmd: &ParsedCommand) -> Result<Vec<Row>, BackendError> {
        let rows = sqlx::Executor::fetch_all(&mut self.inner, sqlx::raw_sql(&cmd.raw)).await?;
        Ok(rows.iter().map(row_to_map).collect())
    }

    async fn execute(&mut self, cmd: &ParsedCommand) -> Result<u64, BackendError> {
        let done = sqlx::Executor::execute(&mut self.inner, sqlx::raw_sql(&cmd.raw)).await?;
        Ok(done.rows_affected())
    }

    async fn close(self) {
        if let Err(e) = self.inner.close().await {
            debug!(address = %self.address, "error closing sql connection: {e}");
        }
    }
}

/// Converts one result row into a column-name keyed map.
///
/// Columns are read as raw bytes regardless of their declared type, so
/// every value comes out as text. NULL stays null.
fn row_to_map(row: &MySqlRow) -> Row {
    let mut map = Row::new();
    for col in row.columns() {
        let value = match row.try_get_unchecked::<Option<Vec<u8>>, _>(col.ordinal()) {
            Ok(Some(bytes)) => Value::String(String::from_utf8_lossy(&bytes).into_owned()),
            Ok(None) | Err(_) => Value::Null,
        };
        map.insert(col.name().to_string(), value);
    }
    map
}
