//! Size refusals seen from the wire: a refused command never reaches the
//! server, only the probes that measured it do.

use dbrelay_core::redis::{MAX_ELEMENTS, MAX_STRING_BYTES};

use crate::helpers::{dispatch, redis_backend, request, FakeRedis};

#[tokio::test]
async fn oversized_string_is_refused_before_get() {
    let server = FakeRedis::start().await;
    server.set("big", vec![b'x'; 2 * 1024 * 1024]);

    let results = dispatch(redis_backend(), &request(&[&server.address], &["get big"])).await;

    let cmd = &results[0].cmd_results[0];
    assert!(cmd.table_data.is_empty());
    assert_eq!(
        cmd.error_msg,
        format!(
            "refused before execution: get would return 2097152 bytes, limit is {MAX_STRING_BYTES} bytes"
        )
    );
    assert_eq!(server.commands(), vec![vec!["STRLEN", "big"]]);
}

#[tokio::test]
async fn string_at_the_limit_passes() {
    let server = FakeRedis::start().await;
    server.set("edge", vec![b'x'; MAX_STRING_BYTES as usize]);

    let results = dispatch(redis_backend(), &request(&[&server.address], &["get edge"])).await;

    assert!(!results[0].cmd_results[0].is_error());
    assert_eq!(server.command_names(), vec!["STRLEN", "GET"]);
}

#[tokio::test]
async fn lrange_measures_the_requested_slice() {
    let server = FakeRedis::start().await;
    let items: Vec<String> = (0..MAX_ELEMENTS + 500).map(|i| i.to_string()).collect();
    let items: Vec<&str> = items.iter().map(String::as_str).collect();
    server.push("l", &items);

    let mut req = request(&[&server.address], &["lrange l 0 -1", "lrange l 0 9"]);
    req.force = true;
    let results = dispatch(redis_backend(), &req).await;

    let cmds = &results[0].cmd_results;
    assert!(
        cmds[0].error_msg.contains("would return 1500 elements"),
        "{}",
        cmds[0].error_msg
    );
    assert!(!cmds[1].is_error());
    assert_eq!(cmds[1].table_data[0]["result"].as_array().unwrap().len(), 10);

    // one LRANGE went out: the small one
    let names = server.command_names();
    assert_eq!(names.iter().filter(|n| *n == "LRANGE").count(), 1);
    assert_eq!(names.iter().filter(|n| *n == "LLEN").count(), 2);
}

#[tokio::test]
async fn scan_without_count_never_sent() {
    let server = FakeRedis::start().await;

    let mut req = request(
        &[&server.address],
        &["scan 0", "scan 0 count 5000", "hscan h 0 match a*"],
    );
    req.force = true;
    let results = dispatch(redis_backend(), &req).await;

    let cmds = &results[0].cmd_results;
    assert_eq!(cmds.len(), 3);
    assert!(cmds.iter().all(|c| c.error_msg.starts_with("refused before execution")));
    // nothing needed probing, so nothing was sent at all
    assert!(server.commands().is_empty());
}

#[tokio::test]
async fn arity_errors_are_refused_locally() {
    let server = FakeRedis::start().await;

    let results = dispatch(redis_backend(), &request(&[&server.address], &["get"])).await;

    let msg = &results[0].cmd_results[0].error_msg;
    assert!(msg.contains("wrong number of arguments for 'get'"), "{msg}");
    assert!(server.commands().is_empty());
}
