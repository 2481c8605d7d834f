//! SQL adapters over a real MySQL-protocol session.

use std::time::Duration;

use dbrelay_core::{
    Backend, BackendConnection, ColumnarBackend, Credentials, MySqlBackend, ParsedCommand,
};
use serde_json::{json, Value};

use crate::helpers::{dispatch, request, FakeMySql};

const CONNECT: Duration = Duration::from_secs(2);

#[tokio::test]
async fn rows_come_back_as_text_keyed_by_column() {
    let server = FakeMySql::start().await;
    let backend = MySqlBackend::new(Credentials::new("ops", "secret"));
    let mut conn = backend.make_connection(&server.address, CONNECT).await.unwrap();

    let rows = conn
        .query(&ParsedCommand::passthrough("select id, name, note from users"))
        .await
        .unwrap();

    assert_eq!(rows.len(), 2);
    let columns: Vec<_> = rows[0].keys().map(String::as_str).collect();
    assert_eq!(columns, ["id", "name", "note"]);

    // integer column, still text
    assert_eq!(rows[0]["id"], json!("1"));
    assert_eq!(rows[0]["name"], json!("alice"));
    assert_eq!(rows[0]["note"], Value::Null);
    // invalid utf-8 is replaced, not dropped
    assert_eq!(rows[1]["note"], json!("\u{fffd}raw"));

    conn.close().await;
}

#[tokio::test]
async fn execute_reports_affected_rows() {
    let server = FakeMySql::start().await;
    let backend = MySqlBackend::new(Credentials::default());
    let mut conn = backend.make_connection(&server.address, CONNECT).await.unwrap();

    let n = conn
        .execute(&ParsedCommand::passthrough("update users set name = 'x'"))
        .await
        .unwrap();
    assert_eq!(n, 3);

    let err = conn
        .execute(&ParsedCommand::passthrough("insert into missing values (1)"))
        .await
        .unwrap_err();
    assert!(err.to_string().contains("doesn't exist"), "{err}");
    assert!(!err.is_refusal());

    // the session survives a statement error
    let n = conn
        .execute(&ParsedCommand::passthrough("delete from users"))
        .await
        .unwrap();
    assert_eq!(n, 3);
    conn.close().await;

    assert_eq!(
        server.queries(),
        [
            "update users set name = 'x'",
            "insert into missing values (1)",
            "delete from users"
        ]
    );
}

#[tokio::test]
async fn failed_statement_stops_the_address() {
    let server = FakeMySql::start().await;
    let req = request(
        &[&server.address],
        &[
            "create table t (id int)",
            "insert into missing values (1)",
            "select id, name, note from t",
        ],
    );
    let results = dispatch(MySqlBackend::new(Credentials::default()), &req).await;

    let r = &results[0];
    assert_eq!(r.error_msg, "");
    assert_eq!(r.cmd_results.len(), 2);
    assert!(!r.cmd_results[0].is_error());
    assert_eq!(r.cmd_results[0].rows_affected, 0);
    assert!(
        r.cmd_results[1].error_msg.contains("doesn't exist"),
        "{}",
        r.cmd_results[1].error_msg
    );
    // the select was never sent
    assert_eq!(
        server.queries(),
        ["create table t (id int)", "insert into missing values (1)"]
    );
}

#[tokio::test]
async fn force_keeps_going_after_a_failed_statement() {
    let server = FakeMySql::start().await;
    let mut req = request(
        &[&server.address],
        &["insert into missing values (1)", "select id, name, note from t"],
    );
    req.force = true;
    let results = dispatch(MySqlBackend::new(Credentials::default()), &req).await;

    let cmds = &results[0].cmd_results;
    assert_eq!(cmds.len(), 2);
    assert!(cmds[0].is_error());
    assert_eq!(cmds[1].table_data.len(), 2);
    assert_eq!(cmds[1].table_data[1]["name"], json!("bob"));
}

#[tokio::test]
async fn unsupported_statement_never_reaches_the_server() {
    let server = FakeMySql::start().await;
    let mut req = request(&[&server.address], &["handler t open", "select 1"]);
    req.force = true;
    let results = dispatch(ColumnarBackend::new(Credentials::default()), &req).await;

    let cmds = &results[0].cmd_results;
    assert!(cmds[0].is_refusal(), "{}", cmds[0].error_msg);
    assert!(!cmds[1].is_error());
    assert_eq!(server.queries(), ["select 1"]);
}
