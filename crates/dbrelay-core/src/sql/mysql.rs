//! Generic SQL engine adapter.

use std::time::Duration;

use async_trait::async_trait;

use super::SqlConnection;
use crate::backend::{starts_with_any, Backend, CommandKind, Credentials, ParsedCommand};
use crate::error::BackendError;

const QUERY_KEYWORDS: &[&str] = &[
    "select",
    "show",
    "desc",
    "describe",
    "explain",
    "checksum table",
    "check table",
    "analyze table",
];

const EXECUTE_KEYWORDS: &[&str] = &[
    "use",
    "set",
    "insert",
    "replace",
    "update",
    "delete",
    "create",
    "drop",
    "alter",
    "truncate",
    "rename",
    "grant",
    "revoke",
    "flush",
    "kill",
    "lock tables",
    "unlock tables",
    "start",
    "stop",
    "change master",
    "change replication",
    "reset",
    "purge",
    "begin",
    "commit",
    "rollback",
    "load data",
    "do",
    "install",
    "uninstall",
];

/// Control keyword of the clustering layer. `tdbctl connect <node>
/// execute '<sql>'` forwards `<sql>` to another node.
const TDBCTL: &str = "tdbctl";

/// Generic SQL engines (MySQL and its forks).
#[derive(Debug, Clone)]
pub struct MySqlBackend {
    credentials: Credentials,
}

impl MySqlBackend {
    pub fn new(credentials: Credentials) -> Self {
        Self { credentials }
    }
}

#[async_trait]
impl Backend for MySqlBackend {
    type Connection = SqlConnection;

    fn name(&self) -> &'static str {
        "mysql"
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
        classify(&cmd.raw) == CommandKind::Query
    }

    fn is_execute_command(&self, cmd: &ParsedCommand) -> bool {
        classify(&cmd.raw) == CommandKind::Execute
    }
}

fn classify(raw: &str) -> CommandKind {
    let raw = raw.trim();
    let mut words = raw.split_whitespace();
    if words
        .next()
        .is_some_and(|w| w.eq_ignore_ascii_case(TDBCTL))
    {
        return classify_tdbctl(raw, words.next().unwrap_or_default());
    }

    if starts_with_any(raw, QUERY_KEYWORDS) {
        CommandKind::Query
    } else if starts_with_any(raw, EXECUTE_KEYWORDS) {
        CommandKind::Execute
    } else {
        CommandKind::Unsupported
    }
}

fn classify_tdbctl(raw: &str, verb: &str) -> CommandKind {
    if verb.eq_ignore_ascii_case("get") || verb.eq_ignore_ascii_case("show") {
        return CommandKind::Query;
    }
    if !verb.eq_ignore_ascii_case("connect") {
        return CommandKind::Execute;
    }

    // ascii lowercasing keeps byte offsets, so the index is valid in `raw`
    let lower = raw.to_ascii_lowercase();
    let Some(pos) = lower.find("execute") else {
        return CommandKind::Unsupported;
    };
    let inner = unquote(raw[pos + "execute".len()..].trim());
    if inner.is_empty() {
        return CommandKind::Unsupported;
    }
    classify(inner)
}

fn unquote(s: &str) -> &str {
    for q in ['\'', '"'] {
        if let Some(inner) = s.strip_prefix(q).and_then(|s| s.strip_suffix(q)) {
            return inner.trim();
        }
    }
    s
}
