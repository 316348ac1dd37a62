use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use crate::report;
use rusqlite::Connection;
use serde_json::json;
use std::path::PathBuf;

fn db_conn<'a>(state: &'a AppState, req: &Request) -> Result<&'a Connection, serde_json::Value> {
    state
        .db
        .as_ref()
        .ok_or_else(|| err(&req.id, "no_workspace", "select a workspace first", None))
}

fn required_str(req: &Request, key: &str) -> Result<String, serde_json::Value> {
    req.params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|v| v.trim().to_string())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| err(&req.id, "bad_params", format!("missing {}", key), None))
}

// Best-effort: a missing or unreadable setting just leaves the header blank.
fn congregation_name(conn: &Connection) -> Option<String> {
    db::settings_get_json(conn, "setup.congregation")
        .ok()
        .flatten()
        .and_then(|v| {
            v.get("name")
                .and_then(|n| n.as_str())
                .map(|s| s.trim().to_string())
        })
        .filter(|s| !s.is_empty())
}

fn handle_reports_quarter_summary(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let lesson_id = match required_str(req, "lessonId") {
        Ok(v) => v,
        Err(e) => return e,
    };

    match report::quarter_summary(conn, &lesson_id, congregation_name(conn)) {
        Ok(summary) => ok(&req.id, json!(summary)),
        Err(e) => err(&req.id, &e.code, e.message, None),
    }
}

fn handle_reports_export_quarter_csv(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let lesson_id = match required_str(req, "lessonId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let out_path = match required_str(req, "outPath") {
        Ok(v) => v,
        Err(e) => return e,
    };

    let summary = match report::quarter_summary(conn, &lesson_id, congregation_name(conn)) {
        Ok(v) => v,
        Err(e) => return err(&req.id, &e.code, e.message, None),
    };
    let csv = report::quarter_csv(&summary);

    let out = PathBuf::from(&out_path);
    if let Some(parent) = out.parent() {
        if let Err(e) = std::fs::create_dir_all(parent) {
            return err(
                &req.id,
                "io_failed",
                e.to_string(),
                Some(json!({ "path": out_path })),
            );
        }
    }
    if let Err(e) = std::fs::write(&out, csv) {
        return err(
            &req.id,
            "io_failed",
            e.to_string(),
            Some(json!({ "path": out_path })),
        );
    }

    ok(
        &req.id,
        json!({
            "ok": true,
            "path": out_path,
            "rowsExported": summary.rows.len(),
        }),
    )
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "reports.quarterSummary" => Some(handle_reports_quarter_summary(state, req)),
        "reports.exportQuarterCsv" => Some(handle_reports_export_quarter_csv(state, req)),
        _ => None,
    }
}
