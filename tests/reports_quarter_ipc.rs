mod test_support;

use serde_json::json;
use test_support::{request_ok, seed_lesson, spawn_sidecar, temp_dir};

fn confirm_occurrence(
    stdin: &mut std::process::ChildStdin,
    reader: &mut std::io::BufReader<std::process::ChildStdout>,
    lesson_id: &str,
    occurrence: i64,
    absent_student: Option<&str>,
) {
    let _ = request_ok(
        stdin,
        reader,
        &format!("confirm-open-{}", occurrence),
        "chamada.open",
        json!({ "lessonId": lesson_id, "occurrence": occurrence }),
    );
    if let Some(student_id) = absent_student {
        let _ = request_ok(
            stdin,
            reader,
            &format!("confirm-absent-{}", occurrence),
            "chamada.setStatus",
            json!({ "studentId": student_id, "status": "absent" }),
        );
    }
    let _ = request_ok(
        stdin,
        reader,
        &format!("confirm-visitors-{}", occurrence),
        "chamada.visitorCount",
        json!({ "count": 1 }),
    );
    let _ = request_ok(
        stdin,
        reader,
        &format!("confirm-finance-{}", occurrence),
        "chamada.setFinance",
        json!({ "offeringCash": 50.0, "missionsElectronic": 10.0 }),
    );
    let _ = request_ok(
        stdin,
        reader,
        &format!("confirm-adv1-{}", occurrence),
        "chamada.advance",
        json!({}),
    );
    let _ = request_ok(
        stdin,
        reader,
        &format!("confirm-adv2-{}", occurrence),
        "chamada.advance",
        json!({}),
    );
    let _ = request_ok(
        stdin,
        reader,
        &format!("confirm-submit-{}", occurrence),
        "chamada.submit",
        json!({}),
    );
}

#[test]
fn quarter_summary_aggregates_confirmed_occurrences_only() {
    let workspace = temp_dir("ebdd-reports-summary");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let (_class_id, lesson_id, students) = seed_lesson(
        &mut stdin,
        &mut reader,
        &workspace,
        json!({ "title": "Parábolas", "startDate": "2026-01-04", "occurrenceCount": 4 }),
        &[("Ana Souza", true), ("Bruno Lima", false), ("Carla Dias", true)],
    );

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "setup",
        "setup.update",
        json!({ "section": "congregation", "patch": { "name": "Congregação Central" } }),
    );

    confirm_occurrence(&mut stdin, &mut reader, &lesson_id, 1, None);
    confirm_occurrence(&mut stdin, &mut reader, &lesson_id, 3, Some(&students[2]));

    let summary = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "reports.quarterSummary",
        json!({ "lessonId": lesson_id }),
    );

    let header = summary.get("header").expect("header");
    assert_eq!(header.get("title").and_then(|v| v.as_str()), Some("Parábolas"));
    assert_eq!(
        header.get("congregation").and_then(|v| v.as_str()),
        Some("Congregação Central")
    );

    let rows = summary.get("rows").and_then(|v| v.as_array()).expect("rows");
    assert_eq!(rows.len(), 4);
    assert_eq!(rows[0].get("confirmed").and_then(|v| v.as_bool()), Some(true));
    assert_eq!(rows[0].get("present").and_then(|v| v.as_i64()), Some(3));
    assert_eq!(rows[0].get("people").and_then(|v| v.as_i64()), Some(4));
    assert_eq!(rows[1].get("confirmed").and_then(|v| v.as_bool()), Some(false));
    assert_eq!(rows[1].get("present").and_then(|v| v.as_i64()), Some(0));
    assert_eq!(rows[2].get("present").and_then(|v| v.as_i64()), Some(2));
    assert_eq!(rows[2].get("absent").and_then(|v| v.as_i64()), Some(1));
    assert_eq!(
        rows[3].get("scheduledDate").and_then(|v| v.as_str()),
        Some("2026-01-25")
    );

    let agg = summary.get("aggregate").expect("aggregate");
    assert_eq!(agg.get("confirmedOccurrences").and_then(|v| v.as_i64()), Some(2));
    assert_eq!(agg.get("presentTotal").and_then(|v| v.as_i64()), Some(5));
    assert_eq!(agg.get("absentTotal").and_then(|v| v.as_i64()), Some(1));
    assert_eq!(agg.get("visitorTotal").and_then(|v| v.as_i64()), Some(2));
    assert_eq!(agg.get("peopleTotal").and_then(|v| v.as_i64()), Some(7));
    assert_eq!(agg.get("offeringSum").and_then(|v| v.as_f64()), Some(100.0));
    assert_eq!(agg.get("missionsSum").and_then(|v| v.as_f64()), Some(20.0));
    assert_eq!(agg.get("averagePeople").and_then(|v| v.as_f64()), Some(3.5));

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn csv_export_writes_one_row_per_occurrence_plus_totals() {
    let workspace = temp_dir("ebdd-reports-csv");
    let out = workspace.join("exports").join("quarter.csv");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let (_class_id, lesson_id, _students) = seed_lesson(
        &mut stdin,
        &mut reader,
        &workspace,
        json!({ "title": "Parábolas", "startDate": "2026-01-04", "occurrenceCount": 2 }),
        &[("Ana Souza", true), ("Bruno Lima", false)],
    );
    confirm_occurrence(&mut stdin, &mut reader, &lesson_id, 1, None);

    let exported = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "reports.exportQuarterCsv",
        json!({ "lessonId": lesson_id, "outPath": out.to_string_lossy() }),
    );
    assert_eq!(exported.get("rowsExported").and_then(|v| v.as_i64()), Some(2));

    let csv = std::fs::read_to_string(&out).expect("read exported csv");
    let lines: Vec<&str> = csv.lines().collect();
    assert_eq!(lines.len(), 4);
    assert!(lines[0].starts_with("occurrence,scheduled_date,session_date,confirmed"));
    assert!(lines[1].starts_with("1,2026-01-04,2026-01-04,true,2,"));
    assert!(lines[2].starts_with("2,2026-01-11,,false,0,"));
    assert!(lines[3].starts_with("total,,,1,2,"));

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}
