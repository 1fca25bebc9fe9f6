use serde_json::json;
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::time::{SystemTime, UNIX_EPOCH};

fn temp_dir(prefix: &str) -> PathBuf {
    let p = std::env::temp_dir().join(format!(
        "{}-{}",
        prefix,
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos()
    ));
    std::fs::create_dir_all(&p).expect("create temp dir");
    p
}

fn spawn_sidecar() -> (Child, ChildStdin, BufReader<ChildStdout>) {
    let exe = env!("CARGO_BIN_EXE_plannerd");
    let mut child = Command::new(exe)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn plannerd");
    let stdin = child.stdin.take().expect("child stdin");
    let stdout = child.stdout.take().expect("child stdout");
    (child, stdin, BufReader::new(stdout))
}

fn request(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let payload = json!({
        "id": id,
        "method": method,
        "params": params,
    });
    writeln!(stdin, "{}", payload).expect("write request");
    stdin.flush().expect("flush request");

    let mut line = String::new();
    reader.read_line(&mut line).expect("read response line");
    assert!(!line.trim().is_empty(), "empty response for {}", method);
    let value: serde_json::Value = serde_json::from_str(line.trim()).expect("parse response json");
    assert_eq!(value.get("id").and_then(|v| v.as_str()), Some(id));
    value
}

fn request_ok(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let value = request(stdin, reader, id, method, params);
    assert!(
        value.get("ok").and_then(|v| v.as_bool()).unwrap_or(false),
        "{} failed: {}",
        method,
        value
    );
    value.get("result").cloned().unwrap_or_else(|| json!({}))
}

fn request_err_code(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> String {
    let value = request(stdin, reader, id, method, params);
    assert_eq!(
        value.get("ok").and_then(|v| v.as_bool()),
        Some(false),
        "{} unexpectedly succeeded: {}",
        method,
        value
    );
    value
        .get("error")
        .and_then(|e| e.get("code"))
        .and_then(|v| v.as_str())
        .unwrap_or("")
        .to_string()
}

fn select_workspace(stdin: &mut ChildStdin, reader: &mut BufReader<ChildStdout>, prefix: &str) {
    let workspace = temp_dir(prefix);
    let _ = request_ok(
        stdin,
        reader,
        "ws",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
}

#[test]
fn sessions_record_timer_runs_and_roll_up_hours() {
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    select_workspace(&mut stdin, &mut reader, "plannerd-sessions");

    let first = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "sessions.create",
        json!({ "subject": "Calculus", "duration": 3600, "endTime": "2026-10-18T20:00:00Z" }),
    );
    assert_eq!(first["session"]["startTime"], "2026-10-18T19:00:00Z");
    assert_eq!(first["session"]["durationLabel"], "1h 0m");
    let first_id = first["session"]["id"].as_str().expect("session id").to_string();

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "sessions.create",
        json!({ "subject": "History", "duration": 2700, "endTime": "2026-10-19T10:00:00Z" }),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "sessions.create",
        json!({
            "subject": "Calculus",
            "duration": 1800,
            "startTime": "2026-10-19T11:00:00Z",
            "endTime": "2026-10-19T11:30:00Z"
        }),
    );
    let untitled = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "sessions.create",
        json!({ "duration": 600, "endTime": "2026-10-19T12:00:00Z" }),
    );
    assert_eq!(untitled["session"]["subject"], "Unknown Subject");
    assert_eq!(untitled["session"]["durationLabel"], "10m");

    let listed = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "sessions.list",
        json!({ "limit": 2 }),
    );
    let ends: Vec<&str> = listed["sessions"]
        .as_array()
        .expect("sessions")
        .iter()
        .filter_map(|s| s["endTime"].as_str())
        .collect();
    assert_eq!(ends, vec!["2026-10-19T12:00:00Z", "2026-10-19T11:30:00Z"]);

    let totals = request_ok(&mut stdin, &mut reader, "6", "sessions.totals", json!({}));
    assert_eq!(totals["sessions"], 4);
    assert_eq!(totals["totalSeconds"], 8700);
    assert_eq!(totals["totalHours"].as_f64(), Some(2.4));
    assert_eq!(totals["label"], "2h 25m");
    assert_eq!(totals["bySubject"][0]["subject"], "Calculus");
    assert_eq!(totals["bySubject"][0]["sessions"], 2);
    assert_eq!(totals["bySubject"][0]["hours"].as_f64(), Some(1.5));

    let totals = request_ok(
        &mut stdin,
        &mut reader,
        "7",
        "sessions.totals",
        json!({ "since": "2026-10-19" }),
    );
    assert_eq!(totals["sessions"], 3);
    assert_eq!(totals["totalSeconds"], 5100);
    assert_eq!(totals["bySubject"][0]["subject"], "History");

    let updated = request_ok(
        &mut stdin,
        &mut reader,
        "8",
        "sessions.update",
        json!({
            "sessionId": first_id,
            "patch": { "subject": "Linear Algebra", "duration": 4500 }
        }),
    );
    assert_eq!(updated["session"]["subject"], "Linear Algebra");
    assert_eq!(updated["session"]["durationLabel"], "1h 15m");

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "9",
        "sessions.delete",
        json!({ "sessionId": first_id }),
    );
    let totals = request_ok(&mut stdin, &mut reader, "10", "sessions.totals", json!({}));
    assert_eq!(totals["sessions"], 3);
    assert_eq!(totals["totalSeconds"], 5100);

    let _ = child.kill();
}

#[test]
fn sessions_reject_unusable_fields() {
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    select_workspace(&mut stdin, &mut reader, "plannerd-sessions-bad");

    let rejected = [
        json!({ "subject": "Physics" }),
        json!({ "duration": -5 }),
        json!({ "duration": 90000 }),
        json!({ "duration": 12.5 }),
        json!({ "duration": 60, "subject": "" }),
        json!({ "duration": 60, "endTime": "yesterday" }),
        json!({
            "duration": 60,
            "startTime": "2026-10-19T12:00:00Z",
            "endTime": "2026-10-19T11:00:00Z"
        }),
        json!({ "duration": 60, "mood": "focused" }),
    ];
    for (i, params) in rejected.iter().enumerate() {
        let code = request_err_code(
            &mut stdin,
            &mut reader,
            &format!("bad-{}", i),
            "sessions.create",
            params.clone(),
        );
        assert_eq!(code, "bad_params", "accepted {}", params);
    }

    let code = request_err_code(
        &mut stdin,
        &mut reader,
        "1",
        "sessions.update",
        json!({ "sessionId": "missing", "patch": { "duration": 60 } }),
    );
    assert_eq!(code, "not_found");
    let code = request_err_code(
        &mut stdin,
        &mut reader,
        "2",
        "sessions.delete",
        json!({ "sessionId": "missing" }),
    );
    assert_eq!(code, "not_found");
    let code = request_err_code(
        &mut stdin,
        &mut reader,
        "3",
        "sessions.list",
        json!({ "limit": 0 }),
    );
    assert_eq!(code, "bad_params");

    let totals = request_ok(&mut stdin, &mut reader, "4", "sessions.totals", json!({}));
    assert_eq!(totals["sessions"], 0);
    assert_eq!(totals["label"], "0m");

    let _ = child.kill();
}
