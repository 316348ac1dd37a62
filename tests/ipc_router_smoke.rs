mod test_support;

use serde_json::json;
use test_support::{error_code, request_err, request_ok, seed_lesson, spawn_sidecar, temp_dir};

#[test]
fn router_dispatch_smoke_covers_handler_families() {
    let workspace = temp_dir("ebdd-router-smoke");
    let csv_out = workspace.join("smoke-quarter.csv");
    let bundle_out = workspace.join("smoke-backup.ebdbackup.zip");

    let (mut child, mut stdin, mut reader) = spawn_sidecar();

    let health = request_ok(&mut stdin, &mut reader, "1", "health", json!({}));
    assert!(health.get("version").and_then(|v| v.as_str()).is_some());

    let (class_id, lesson_id, students) = seed_lesson(
        &mut stdin,
        &mut reader,
        &workspace,
        json!({ "title": "Parábolas do Reino", "startDate": "2026-01-04" }),
        &[("Ana Souza", true), ("Bruno Lima", false)],
    );

    let classes = request_ok(&mut stdin, &mut reader, "2", "classes.list", json!({}));
    assert_eq!(
        classes
            .get("classes")
            .and_then(|v| v.as_array())
            .map(|a| a.len()),
        Some(1)
    );

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "lessons.list",
        json!({ "classId": class_id }),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "lessons.occurrences",
        json!({ "lessonId": lesson_id }),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "enrollments.list",
        json!({ "lessonId": lesson_id }),
    );

    let opened = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "chamada.open",
        json!({ "lessonId": lesson_id, "occurrence": 1 }),
    );
    assert_eq!(opened.get("stepNumber").and_then(|v| v.as_i64()), Some(1));
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "7",
        "chamada.setStatus",
        json!({ "studentId": students[0], "status": "late" }),
    );
    let _ = request_ok(&mut stdin, &mut reader, "8", "chamada.state", json!({}));

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "9",
        "reports.quarterSummary",
        json!({ "lessonId": lesson_id }),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "10",
        "reports.exportQuarterCsv",
        json!({ "lessonId": lesson_id, "outPath": csv_out.to_string_lossy() }),
    );
    assert!(csv_out.is_file());

    let _ = request_ok(&mut stdin, &mut reader, "11", "setup.get", json!({}));
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "12",
        "setup.update",
        json!({ "section": "congregation", "patch": { "name": "Congregação Central" } }),
    );

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "13",
        "backup.exportWorkspaceBundle",
        json!({ "outPath": bundle_out.to_string_lossy() }),
    );
    assert!(bundle_out.is_file());

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "14",
        "classes.delete",
        json!({ "classId": class_id }),
    );

    let unknown = request_err(
        &mut stdin,
        &mut reader,
        "15",
        "chamada.teleport",
        json!({}),
    );
    assert_eq!(error_code(&unknown), "not_implemented");

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn workspace_gating_and_bad_params() {
    let (mut child, mut stdin, mut reader) = spawn_sidecar();

    let no_ws = request_err(
        &mut stdin,
        &mut reader,
        "1",
        "classes.create",
        json!({ "name": "Sem Workspace" }),
    );
    assert_eq!(error_code(&no_ws), "no_workspace");

    let no_session = request_err(&mut stdin, &mut reader, "2", "chamada.state", json!({}));
    assert_eq!(error_code(&no_session), "no_session");

    let missing_path = request_err(&mut stdin, &mut reader, "3", "workspace.select", json!({}));
    assert_eq!(error_code(&missing_path), "bad_params");

    drop(stdin);
    let _ = child.wait();
}
