//! Cache-engine adapter.

use std::time::Duration;

use async_trait::async_trait;
use dbrelay_protocol::{split_args, Frame};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use super::catalog;
use super::connection::RedisConnection;
use super::format;
use super::precheck::precheck_args;
use crate::backend::{Backend, BackendConnection, CommandKind, Credentials, ParsedCommand};
use crate::error::BackendError;
use crate::request::Row;

/// Column holding the reply in a cache-engine result row.
pub const RESULT_COLUMN: &str = "result";

/// How replies are rendered into the result row.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClientType {
    /// redis-cli style text.
    Console,
    /// The reply structure as JSON.
    #[default]
    Plain,
}

impl ClientType {
    fn render(self, frame: &Frame) -> Value {
        match self {
            ClientType::Console => Value::String(format::console(frame)),
            ClientType::Plain => format::to_json(frame),
        }
    }
}

/// The cache engine. Built per request: the database index, the reply
/// style and optionally the password come with the request.
#[derive(Debug, Clone)]
pub struct RedisBackend {
    credentials: Credentials,
    db: u32,
    client_type: ClientType,
}

impl RedisBackend {
    pub fn new(credentials: Credentials) -> Self {
        Self {
            credentials,
            db: 0,
            client_type: ClientType::Plain,
        }
    }

    /// Uses `password` instead of the configured one, unless it's empty.
    pub fn with_password(mut self, password: Option<&str>) -> Self {
        if let Some(password) = password.filter(|p| !p.is_empty()) {
            self.credentials.password = password.to_string();
        }
        self
    }

    pub fn with_db(mut self, db: u32) -> Self {
        self.db = db;
        self
    }

    pub fn with_client_type(mut self, client_type: ClientType) -> Self {
        self.client_type = client_type;
        self
    }

    pub fn db(&self) -> u32 {
        self.db
    }

    pub fn client_type(&self) -> ClientType {
        self.client_type
    }

    /// AUTH and SELECT on a fresh connection.
    async fn open_session(&self, conn: &mut RedisConnection) -> Result<(), BackendError> {
        if !self.credentials.password.is_empty() {
            conn.authenticate(&self.credentials.user, &self.credentials.password)
                .await?;
        }
        if self.db != 0 {
            conn.select(self.db).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl Backend for RedisBackend {
    type Connection = RedisSession;

    fn name(&self) -> &'static str {
        "redis"
    }

    fn user(&self) -> &str {
        &self.credentials.user
    }

    fn password(&self) -> &str {
        &self.credentials.password
    }

    /// Connects, authenticates and selects the database. All three must
    /// finish within `connect_timeout`.
    async fn make_connection(
        &self,
        address: &str,
        connect_timeout: Duration,
    ) -> Result<RedisSession, BackendError> {
        let setup = async {
            let mut conn = RedisConnection::connect(address, connect_timeout).await?;
            self.open_session(&mut conn)
                .await
                .map_err(|e| BackendError::connect(address, e))?;
            Ok::<_, BackendError>(conn)
        };
        let conn = tokio::time::timeout(connect_timeout, setup)
            .await
            .map_err(|_| BackendError::ConnectTimeout {
                address: address.to_string(),
                timeout: connect_timeout,
            })??;

        Ok(RedisSession {
            conn,
            client_type: self.client_type,
        })
    }

    /// Splits the line into arguments with redis-cli quoting. A line that
    /// can't be split keeps no arguments and classifies as unsupported.
    fn parse_command(&self, raw: &str) -> ParsedCommand {
        let raw = raw.trim();
        let args = split_args(raw).unwrap_or_default();
        let name = args
            .first()
            .map(|n| n.to_ascii_lowercase())
            .unwrap_or_default();
        ParsedCommand {
            raw: raw.to_string(),
            name,
            args,
        }
    }

    fn is_query_command(&self, cmd: &ParsedCommand) -> bool {
        !cmd.args.is_empty() && catalog::classify(&cmd.name) == CommandKind::Query
    }

    fn is_execute_command(&self, cmd: &ParsedCommand) -> bool {
        !cmd.args.is_empty() && catalog::classify(&cmd.name) == CommandKind::Execute
    }
}

/// An authenticated connection. Every command is prechecked before it
/// is sent.
pub struct RedisSession {
    conn: RedisConnection,
    client_type: ClientType,
}

impl RedisSession {
    async fn checked_call(&mut self, cmd: &ParsedCommand) -> Result<Frame, BackendError> {
        let measured = precheck_args(&cmd.args, &mut self.conn).await?;
        debug!(cmd = %cmd.name, size = measured.size, "precheck passed");
        self.conn.call(cmd.args.as_slice()).await
    }
}

#[async_trait]
impl BackendConnection for RedisSession {
    async fn query(&mut self, cmd: &ParsedCommand) -> Result<Vec<Row>, BackendError> {
        let frame = self.checked_call(cmd).await?;
        let mut row = Row::new();
        row.insert(RESULT_COLUMN.to_string(), self.client_type.render(&frame));
        Ok(vec![row])
    }

    /// Integer replies (`DEL`, `SADD`, ...) are the affected count;
    /// anything else counts as zero.
    async fn execute(&mut self, cmd: &ParsedCommand) -> Result<u64, BackendError> {
        match self.checked_call(cmd).await? {
            Frame::Integer(n) => Ok(n.max(0) as u64),
            _ => Ok(0),
        }
    }

    async fn close(mut self) {
        if let Err(e) = self.conn.shutdown().await {
            debug!("error closing redis connection: {e}");
        }
    }
}
