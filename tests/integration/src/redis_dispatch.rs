//! Fan-out through the real cache-engine adapter.

use dbrelay_core::{ClientType, Credentials, RedisBackend};
use serde_json::json;

use crate::helpers::{closed_address, dispatch, redis_backend, request, FakeRedis};

#[tokio::test]
async fn query_and_execute_results() {
    let server = FakeRedis::start().await;
    server.set("greeting", b"hello".to_vec());

    let req = request(&[&server.address], &["get greeting", "set k v", "del k nope"]);
    let results = dispatch(redis_backend(), &req).await;

    assert_eq!(results.len(), 1);
    let r = &results[0];
    assert_eq!(r.address, server.address);
    assert_eq!(r.error_msg, "");
    assert_eq!(r.cmd_results.len(), 3);

    let get = &r.cmd_results[0];
    assert_eq!(get.cmd, "get greeting");
    assert_eq!(get.table_data.len(), 1);
    assert_eq!(get.table_data[0]["result"], json!("hello"));

    // SET replies +OK, which counts as zero affected
    assert_eq!(r.cmd_results[1].rows_affected, 0);
    assert!(r.cmd_results[1].table_data.is_empty());
    assert_eq!(r.cmd_results[2].rows_affected, 1);
}

#[tokio::test]
async fn console_client_type_renders_like_redis_cli() {
    let server = FakeRedis::start().await;
    server.push("l", &["a", "b", "c"]);

    let backend = redis_backend().with_client_type(ClientType::Console);
    let req = request(&[&server.address], &["lrange l 0 -1", "get missing"]);
    let results = dispatch(backend, &req).await;

    let cmds = &results[0].cmd_results;
    assert_eq!(
        cmds[0].table_data[0]["result"],
        json!("1) \"a\"\n2) \"b\"\n3) \"c\"")
    );
    assert_eq!(cmds[1].table_data[0]["result"], json!("(nil)"));
}

#[tokio::test]
async fn plain_client_type_keeps_structure() {
    let server = FakeRedis::start().await;
    server.push("l", &["a", "b"]);

    let req = request(&[&server.address], &["lrange l 0 -1"]);
    let results = dispatch(redis_backend(), &req).await;
    assert_eq!(results[0].cmd_results[0].table_data[0]["result"], json!(["a", "b"]));
}

#[tokio::test]
async fn unreachable_address_does_not_affect_others() {
    let server = FakeRedis::start().await;
    let dead = closed_address().await;

    let req = request(&[&dead, &server.address], &["ping"]);
    let results = dispatch(redis_backend(), &req).await;

    assert_eq!(results.len(), 2);
    assert_eq!(results[0].address, dead);
    assert!(results[0].cmd_results.is_empty());
    assert!(
        results[0].error_msg.contains(&dead),
        "{}",
        results[0].error_msg
    );

    assert_eq!(results[1].error_msg, "");
    assert_eq!(results[1].cmd_results[0].table_data[0]["result"], json!("PONG"));
}

#[tokio::test]
async fn stops_at_first_failure_without_force() {
    let server = FakeRedis::start().await;

    let req = request(
        &[&server.address],
        &["set a 1", "bogus command", "set b 2"],
    );
    let results = dispatch(redis_backend(), &req).await;

    let cmds = &results[0].cmd_results;
    assert_eq!(cmds.len(), 2);
    assert!(cmds[1].error_msg.starts_with("unsupported command"), "{}", cmds[1].error_msg);
    assert_eq!(server.get("b"), None);
    // the unsupported command never reached the server
    assert_eq!(server.command_names(), vec!["SET"]);
}

#[tokio::test]
async fn force_runs_every_command() {
    let server = FakeRedis::start().await;

    let mut req = request(
        &[&server.address],
        &["set a 1", "bogus command", "set b 2"],
    );
    req.force = true;
    let results = dispatch(redis_backend(), &req).await;

    let cmds = &results[0].cmd_results;
    assert_eq!(cmds.len(), 3);
    assert!(cmds[1].is_error());
    assert!(!cmds[2].is_error());
    assert_eq!(server.get("b").as_deref(), Some(&b"2"[..]));
}

#[tokio::test]
async fn server_errors_are_command_errors() {
    let server = FakeRedis::start().await;

    // the catalog knows TYPE, the fake server doesn't
    let mut req = request(&[&server.address], &["type k", "ping"]);
    req.force = true;
    let results = dispatch(redis_backend(), &req).await;

    let cmds = &results[0].cmd_results;
    assert!(cmds[0].error_msg.starts_with("ERR unknown command"), "{}", cmds[0].error_msg);
    assert_eq!(cmds[1].table_data[0]["result"], json!("PONG"));
}

#[tokio::test]
async fn authenticates_and_selects() {
    let server = FakeRedis::start_with_password(Some("s3cret")).await;

    let backend = RedisBackend::new(Credentials::new("", "s3cret")).with_db(4);
    let req = request(&[&server.address], &["ping"]);
    let results = dispatch(backend, &req).await;

    assert_eq!(results[0].error_msg, "");
    let log = server.commands();
    assert_eq!(log[0], vec!["AUTH", "s3cret"]);
    assert_eq!(log[1], vec!["SELECT", "4"]);
    assert_eq!(log[2], vec!["PING"]);
}

#[tokio::test]
async fn request_password_overrides_configured_one() {
    let server = FakeRedis::start_with_password(Some("per-request")).await;

    let backend = RedisBackend::new(Credentials::new("", "configured"))
        .with_password(Some("per-request"));
    let results = dispatch(backend, &request(&[&server.address], &["ping"])).await;
    assert_eq!(results[0].error_msg, "");

    let backend = RedisBackend::new(Credentials::new("", "configured"));
    let results = dispatch(backend, &request(&[&server.address], &["ping"])).await;
    assert!(
        results[0].error_msg.contains("WRONGPASS"),
        "{}",
        results[0].error_msg
    );
    assert!(results[0].cmd_results.is_empty());
}

#[tokio::test]
async fn database_zero_skips_select() {
    let server = FakeRedis::start().await;
    dispatch(redis_backend(), &request(&[&server.address], &["ping"])).await;
    assert_eq!(server.command_names(), vec!["PING"]);
}
