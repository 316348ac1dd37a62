use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use rusqlite::types::Value;
use rusqlite::{params_from_iter, Connection, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

fn lesson_exists(conn: &Connection, lesson_id: &str) -> Result<bool, rusqlite::Error> {
    Ok(conn
        .query_row(
            "SELECT 1 FROM lessons WHERE id = ? LIMIT 1",
            [lesson_id],
            |r| r.get::<_, i64>(0),
        )
        .optional()?
        .is_some())
}

fn handle_enrollments_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let lesson_id = match req.params.get("lessonId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing lessonId", None),
    };
    match lesson_exists(conn, &lesson_id) {
        Ok(true) => {}
        Ok(false) => return err(&req.id, "not_found", "lesson not found", None),
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    }

    let mut stmt = match conn.prepare(
        "SELECT id, display_name, has_booklet, sort_order
         FROM enrollments
         WHERE lesson_id = ?
         ORDER BY sort_order",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let rows = stmt
        .query_map([&lesson_id], |row| {
            let id: String = row.get(0)?;
            let display_name: String = row.get(1)?;
            let has_booklet: i64 = row.get(2)?;
            let sort_order: i64 = row.get(3)?;
            Ok(json!({
                "studentId": id,
                "displayName": display_name,
                "hasBooklet": has_booklet != 0,
                "sortOrder": sort_order
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(enrollments) => ok(&req.id, json!({ "enrollments": enrollments })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_enrollments_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let lesson_id = match req.params.get("lessonId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing lessonId", None),
    };
    let display_name = match req.params.get("displayName").and_then(|v| v.as_str()) {
        Some(v) => v.trim().to_string(),
        None => return err(&req.id, "bad_params", "missing displayName", None),
    };
    if display_name.is_empty() {
        return err(&req.id, "bad_params", "displayName must not be empty", None);
    }
    let has_booklet = req
        .params
        .get("hasBooklet")
        .and_then(|v| v.as_bool())
        .unwrap_or(false);

    match lesson_exists(conn, &lesson_id) {
        Ok(true) => {}
        Ok(false) => return err(&req.id, "not_found", "lesson not found", None),
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    }

    let sort_order: i64 = match conn.query_row(
        "SELECT COALESCE(MAX(sort_order), -1) + 1 FROM enrollments WHERE lesson_id = ?",
        [&lesson_id],
        |r| r.get(0),
    ) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let student_id = Uuid::new_v4().to_string();
    if let Err(e) = conn.execute(
        "INSERT INTO enrollments(id, lesson_id, display_name, has_booklet, sort_order, updated_at)
         VALUES(?, ?, ?, ?, ?, ?)",
        (
            &student_id,
            &lesson_id,
            &display_name,
            if has_booklet { 1 } else { 0 },
            sort_order,
            db::now_ts(),
        ),
    ) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "enrollments" })),
        );
    }

    ok(&req.id, json!({ "studentId": student_id }))
}

fn handle_enrollments_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let lesson_id = match req.params.get("lessonId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing lessonId", None),
    };
    let student_id = match req.params.get("studentId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing studentId", None),
    };
    let Some(patch) = req.params.get("patch").and_then(|v| v.as_object()) else {
        return err(&req.id, "bad_params", "missing/invalid patch", None);
    };

    let mut set_parts: Vec<String> = Vec::new();
    let mut bind_values: Vec<Value> = Vec::new();

    if let Some(v) = patch.get("displayName") {
        let Some(s) = v.as_str() else {
            return err(&req.id, "bad_params", "patch.displayName must be a string", None);
        };
        let s = s.trim().to_string();
        if s.is_empty() {
            return err(&req.id, "bad_params", "displayName must not be empty", None);
        }
        set_parts.push("display_name = ?".into());
        bind_values.push(Value::Text(s));
    }
    if let Some(v) = patch.get("hasBooklet") {
        let Some(b) = v.as_bool() else {
            return err(&req.id, "bad_params", "patch.hasBooklet must be a boolean", None);
        };
        set_parts.push("has_booklet = ?".into());
        bind_values.push(Value::Integer(if b { 1 } else { 0 }));
    }

    if set_parts.is_empty() {
        return err(
            &req.id,
            "bad_params",
            "patch must include at least one field",
            None,
        );
    }

    set_parts.push("updated_at = ?".into());
    bind_values.push(Value::Text(db::now_ts()));

    let sql = format!(
        "UPDATE enrollments SET {} WHERE id = ? AND lesson_id = ?",
        set_parts.join(", ")
    );
    bind_values.push(Value::Text(student_id.clone()));
    bind_values.push(Value::Text(lesson_id.clone()));

    let changed = match conn.execute(&sql, params_from_iter(bind_values)) {
        Ok(v) => v,
        Err(e) => {
            return err(
                &req.id,
                "db_update_failed",
                e.to_string(),
                Some(json!({ "table": "enrollments" })),
            )
        }
    };
    if changed == 0 {
        return err(&req.id, "not_found", "enrollment not found", None);
    }

    ok(&req.id, json!({ "ok": true }))
}

fn handle_enrollments_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let lesson_id = match req.params.get("lessonId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing lessonId", None),
    };
    let student_id = match req.params.get("studentId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing studentId", None),
    };

    let sort_order: Option<i64> = match conn
        .query_row(
            "SELECT sort_order FROM enrollments WHERE id = ? AND lesson_id = ?",
            (&student_id, &lesson_id),
            |r| r.get(0),
        )
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let Some(sort_order) = sort_order else {
        return err(&req.id, "not_found", "enrollment not found", None);
    };

    let tx = match conn.unchecked_transaction() {
        Ok(t) => t,
        Err(e) => return err(&req.id, "db_tx_failed", e.to_string(), None),
    };

    if let Err(e) = tx.execute(
        "DELETE FROM enrollments WHERE id = ? AND lesson_id = ?",
        (&student_id, &lesson_id),
    ) {
        let _ = tx.rollback();
        return err(
            &req.id,
            "db_delete_failed",
            e.to_string(),
            Some(json!({ "table": "enrollments" })),
        );
    }

    // Keep sort_order contiguous so the roster keeps a stable order.
    if let Err(e) = tx.execute(
        "UPDATE enrollments
         SET sort_order = sort_order - 1, updated_at = ?
         WHERE lesson_id = ? AND sort_order > ?",
        (db::now_ts(), &lesson_id, sort_order),
    ) {
        let _ = tx.rollback();
        return err(
            &req.id,
            "db_update_failed",
            e.to_string(),
            Some(json!({ "table": "enrollments" })),
        );
    }

    if let Err(e) = tx.commit() {
        return err(&req.id, "db_commit_failed", e.to_string(), None);
    }

    ok(&req.id, json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "enrollments.list" => Some(handle_enrollments_list(state, req)),
        "enrollments.create" => Some(handle_enrollments_create(state, req)),
        "enrollments.update" => Some(handle_enrollments_update(state, req)),
        "enrollments.delete" => Some(handle_enrollments_delete(state, req)),
        _ => None,
    }
}
