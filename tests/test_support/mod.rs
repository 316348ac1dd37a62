#![allow(dead_code)]

use serde_json::json;
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::time::{SystemTime, UNIX_EPOCH};

pub fn temp_dir(prefix: &str) -> PathBuf {
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

pub fn spawn_sidecar() -> (Child, ChildStdin, BufReader<ChildStdout>) {
    let exe = env!("CARGO_BIN_EXE_ebdd");
    let mut child = Command::new(exe)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn ebdd");
    let stdin = child.stdin.take().expect("child stdin");
    let stdout = child.stdout.take().expect("child stdout");
    (child, stdin, BufReader::new(stdout))
}

fn roundtrip(
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

/// Send a request and unwrap the `result` payload, panicking on an error
/// response.
pub fn request_ok(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let value = roundtrip(stdin, reader, id, method, params);
    assert!(
        value.get("ok").and_then(|v| v.as_bool()).unwrap_or(false),
        "{} failed: {}",
        method,
        value
    );
    value.get("result").cloned().expect("result payload")
}

/// Send a request expected to fail and return its `error` object.
pub fn request_err(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let value = roundtrip(stdin, reader, id, method, params);
    assert_eq!(
        value.get("ok").and_then(|v| v.as_bool()),
        Some(false),
        "{} unexpectedly succeeded: {}",
        method,
        value
    );
    value.get("error").cloned().expect("error payload")
}

pub fn error_code(error: &serde_json::Value) -> &str {
    error
        .get("code")
        .and_then(|v| v.as_str())
        .expect("error code")
}

/// Select a workspace and seed one class, one lesson, and the given roster.
/// Returns (classId, lessonId, studentIds in insertion order).
pub fn seed_lesson(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    workspace: &std::path::Path,
    lesson: serde_json::Value,
    roster: &[(&str, bool)],
) -> (String, String, Vec<String>) {
    let _ = request_ok(
        stdin,
        reader,
        "seed-ws",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let created = request_ok(
        stdin,
        reader,
        "seed-class",
        "classes.create",
        json!({ "name": "Classe Jovens" }),
    );
    let class_id = created
        .get("classId")
        .and_then(|v| v.as_str())
        .expect("classId")
        .to_string();

    let mut lesson_params = lesson;
    lesson_params["classId"] = json!(class_id);
    let created = request_ok(stdin, reader, "seed-lesson", "lessons.create", lesson_params);
    let lesson_id = created
        .get("lessonId")
        .and_then(|v| v.as_str())
        .expect("lessonId")
        .to_string();

    let mut student_ids = Vec::new();
    for (i, (name, has_booklet)) in roster.iter().enumerate() {
        let created = request_ok(
            stdin,
            reader,
            &format!("seed-enroll-{}", i),
            "enrollments.create",
            json!({ "lessonId": lesson_id, "displayName": name, "hasBooklet": has_booklet }),
        );
        student_ids.push(
            created
                .get("studentId")
                .and_then(|v| v.as_str())
                .expect("studentId")
                .to_string(),
        );
    }

    (class_id, lesson_id, student_ids)
}
