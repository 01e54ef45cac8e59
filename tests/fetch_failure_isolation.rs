mod test_support;

use serde_json::json;
use std::time::Duration;
use test_support::{error_code, request, request_ok, seed_workspace, spawn_sidecar, temp_dir};

#[test]
fn failed_fetch_marks_only_its_level_and_retry_recovers() {
    let workspace = temp_dir("edudesk-fetch-failure");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let seed = seed_workspace(&mut stdin, &mut reader);

    let opened = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "screen.open",
        json!({ "levels": ["classroom", "subject"], "autoResolve": false }),
    );
    let screen_id = opened["screenId"].as_str().expect("screenId").to_string();
    request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "fetch.drain",
        json!({ "screenId": screen_id }),
    );

    let set = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "chain.setLevel",
        json!({ "screenId": screen_id, "levelIndex": 0, "value": seed.class_a }),
    );
    let seq = set["issued"]["sequence"].as_u64().expect("sequence");

    let failed = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "fetch.fail",
        json!({
            "screenId": screen_id,
            "levelIndex": 1,
            "sequence": seq,
            "code": "service_unavailable",
            "message": "subjects service is down"
        }),
    );
    assert_eq!(failed["applied"], json!(true));
    let level = &failed["level"];
    assert_eq!(level["state"], json!("errored"));
    assert_eq!(level["options"], json!([]));
    assert_eq!(level["error"]["code"], json!("service_unavailable"));
    assert_eq!(level["error"]["kind"], json!("source"));

    let snap = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "screen.snapshot",
        json!({ "screenId": screen_id }),
    );
    assert_eq!(snap["levels"][0]["value"], json!(seed.class_a));
    assert_eq!(snap["levels"][0]["error"], json!(null));
    assert_eq!(snap["levels"][0]["state"], json!("populated"));

    let retry = request_ok(
        &mut stdin,
        &mut reader,
        "7",
        "chain.retry",
        json!({ "screenId": screen_id, "levelIndex": 1 }),
    );
    assert_eq!(retry["levels"][1]["state"], json!("loading"));
    assert_eq!(retry["levels"][1]["error"], json!(null));
    let seq = retry["issued"]["sequence"].as_u64().expect("sequence");
    let resolved = request_ok(
        &mut stdin,
        &mut reader,
        "8",
        "fetch.resolve",
        json!({ "screenId": screen_id, "levelIndex": 1, "sequence": seq }),
    );
    assert_eq!(resolved["level"]["state"], json!("populated"));
    assert_eq!(resolved["level"]["options"][0]["value"], json!(seed.math_a));
}

#[test]
fn parent_deleted_while_fetch_in_flight_surfaces_not_found() {
    let workspace = temp_dir("edudesk-fetch-deleted");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let seed = seed_workspace(&mut stdin, &mut reader);

    let opened = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "screen.open",
        json!({ "levels": ["classroom", "subject"], "autoResolve": false }),
    );
    let screen_id = opened["screenId"].as_str().expect("screenId").to_string();
    request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "fetch.drain",
        json!({ "screenId": screen_id }),
    );
    let set = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "chain.setLevel",
        json!({ "screenId": screen_id, "levelIndex": 0, "value": seed.class_b }),
    );
    let seq = set["issued"]["sequence"].as_u64().expect("sequence");

    request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "classrooms.delete",
        json!({ "classroomId": seed.class_b }),
    );
    let resolved = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "fetch.resolve",
        json!({ "screenId": screen_id, "levelIndex": 1, "sequence": seq }),
    );
    assert_eq!(resolved["applied"], json!(true));
    assert_eq!(resolved["level"]["error"]["code"], json!("not_found"));
    assert_eq!(resolved["level"]["state"], json!("errored"));
}

#[test]
fn overdue_fetch_times_out_and_late_response_is_ignored() {
    let (_child, mut stdin, mut reader) = spawn_sidecar();

    // No workspace: the screen still opens, fetches just can't succeed.
    let opened = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "screen.open",
        json!({ "levels": ["classroom"], "autoResolve": false, "theme": "dark" }),
    );
    assert_eq!(opened["theme"], json!("dark"));
    let screen_id = opened["screenId"].as_str().expect("screenId").to_string();
    let seq = opened["pending"][0]["sequence"].as_u64().expect("sequence");

    let expired = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "fetch.expire",
        json!({ "screenId": screen_id, "timeoutMs": 0 }),
    );
    assert_eq!(expired["expired"].as_array().map(Vec::len), Some(1));
    assert_eq!(expired["levels"][0]["error"]["kind"], json!("timeout"));
    assert_eq!(expired["levels"][0]["loading"], json!(false));

    let late = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "fetch.resolve",
        json!({ "screenId": screen_id, "levelIndex": 0, "sequence": seq }),
    );
    assert_eq!(late["stale"], json!(true));
    assert_eq!(late["level"]["error"]["kind"], json!("timeout"));

    let retry = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "chain.retry",
        json!({ "screenId": screen_id, "levelIndex": 0 }),
    );
    let seq = retry["issued"]["sequence"].as_u64().expect("sequence");
    let resolved = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "fetch.resolve",
        json!({ "screenId": screen_id, "levelIndex": 0, "sequence": seq }),
    );
    assert_eq!(resolved["level"]["error"]["code"], json!("no_workspace"));

    let closed = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "screen.close",
        json!({ "screenId": screen_id }),
    );
    assert_eq!(closed["closed"], json!(true));
    let gone = request(
        &mut stdin,
        &mut reader,
        "7",
        "screen.snapshot",
        json!({ "screenId": screen_id }),
    );
    assert_eq!(error_code(&gone), Some("not_found"));
}

#[test]
fn reads_expire_overdue_fetches_with_configured_timeout() {
    let workspace = temp_dir("edudesk-lazy-expiry");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "setup.update",
        json!({ "section": "fetch", "patch": { "timeoutMs": 100 } }),
    );
    let opened = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "screen.open",
        json!({ "levels": ["classroom"], "autoResolve": false }),
    );
    let screen_id = opened["screenId"].as_str().expect("screenId").to_string();
    assert_eq!(opened["levels"][0]["state"], json!("loading"));

    std::thread::sleep(Duration::from_millis(250));

    let level = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "chain.getLevel",
        json!({ "screenId": screen_id, "levelIndex": 0 }),
    );
    assert_eq!(level["level"]["state"], json!("errored"));
    assert_eq!(level["level"]["error"]["kind"], json!("timeout"));

    let snapshot = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "screen.snapshot",
        json!({ "screenId": screen_id }),
    );
    assert_eq!(snapshot["pending"], json!([]));
    assert_eq!(snapshot["levels"][0]["loading"], json!(false));

    let retried = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "chain.retry",
        json!({ "screenId": screen_id, "levelIndex": 0 }),
    );
    assert_eq!(retried["levels"][0]["state"], json!("loading"));
    let again = request(
        &mut stdin,
        &mut reader,
        "7",
        "chain.retry",
        json!({ "screenId": screen_id, "levelIndex": 0 }),
    );
    assert_eq!(error_code(&again), Some("not_retryable"));
}
