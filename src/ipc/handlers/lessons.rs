use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use crate::schedule;
use rusqlite::{Connection, OptionalExtension};
use serde_json::{json, Value as JsonValue};
use uuid::Uuid;

const DEFAULT_OCCURRENCE_COUNT: i64 = 13;
const MAX_OCCURRENCE_COUNT: i64 = 60;

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

fn parse_opt_string(v: Option<&JsonValue>) -> Result<Option<String>, &'static str> {
    match v {
        None => Ok(None),
        Some(v) if v.is_null() => Ok(None),
        Some(v) => {
            let s = v.as_str().ok_or("must be string or null")?.trim().to_string();
            if s.is_empty() {
                Ok(None)
            } else {
                Ok(Some(s))
            }
        }
    }
}

fn parse_opt_i64(v: Option<&JsonValue>) -> Result<Option<i64>, &'static str> {
    match v {
        None => Ok(None),
        Some(v) if v.is_null() => Ok(None),
        Some(v) => v.as_i64().map(Some).ok_or("must be integer or null"),
    }
}

fn ensure_class_exists(conn: &Connection, class_id: &str) -> Result<(), &'static str> {
    let exists = conn
        .query_row(
            "SELECT 1 FROM classes WHERE id = ? LIMIT 1",
            [class_id],
            |_r| Ok(()),
        )
        .optional()
        .map_err(|_| "db_query_failed")?;
    if exists.is_some() {
        Ok(())
    } else {
        Err("not_found")
    }
}

fn handle_lessons_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let class_id = match required_str(req, "classId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let title = match required_str(req, "title") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let start_date = match parse_opt_string(req.params.get("startDate")) {
        Ok(v) => v,
        Err(m) => return err(&req.id, "bad_params", format!("startDate {}", m), None),
    };
    if let Some(date) = &start_date {
        if schedule::occurrence_date(Some(date), 1).is_none() {
            return err(&req.id, "bad_params", "startDate must be YYYY-MM-DD", None);
        }
    }
    let occurrence_count = match parse_opt_i64(req.params.get("occurrenceCount")) {
        Ok(v) => v.unwrap_or(DEFAULT_OCCURRENCE_COUNT),
        Err(m) => return err(&req.id, "bad_params", format!("occurrenceCount {}", m), None),
    };
    if !(1..=MAX_OCCURRENCE_COUNT).contains(&occurrence_count) {
        return err(
            &req.id,
            "bad_params",
            format!("occurrenceCount must be between 1 and {}", MAX_OCCURRENCE_COUNT),
            None,
        );
    }

    if let Err(code) = ensure_class_exists(conn, &class_id) {
        return err(
            &req.id,
            code,
            if code == "not_found" {
                "class not found".to_string()
            } else {
                "failed to read class".to_string()
            },
            None,
        );
    }

    let lesson_id = Uuid::new_v4().to_string();
    let ts = db::now_ts();
    if let Err(e) = conn.execute(
        "INSERT INTO lessons(id, class_id, title, start_date, occurrence_count, created_at, updated_at)
         VALUES(?, ?, ?, ?, ?, ?, ?)",
        (&lesson_id, &class_id, &title, &start_date, occurrence_count, &ts, &ts),
    ) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "lessons" })),
        );
    }

    ok(
        &req.id,
        json!({
            "lessonId": lesson_id,
            "classId": class_id,
            "title": title,
            "startDate": start_date,
            "occurrenceCount": occurrence_count
        }),
    )
}

fn handle_lessons_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let class_id = match required_str(req, "classId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    if let Err(code) = ensure_class_exists(conn, &class_id) {
        return err(
            &req.id,
            code,
            if code == "not_found" {
                "class not found".to_string()
            } else {
                "failed to read class".to_string()
            },
            None,
        );
    }

    let mut stmt = match conn.prepare(
        "SELECT
           l.id,
           l.title,
           l.start_date,
           l.occurrence_count,
           (SELECT COUNT(*) FROM enrollments e WHERE e.lesson_id = l.id) AS enrollment_count,
           (SELECT COUNT(*) FROM attendance_records ar WHERE ar.lesson_id = l.id) AS confirmed_count
         FROM lessons l
         WHERE l.class_id = ?
         ORDER BY l.created_at, l.id",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let lessons = match stmt.query_map([&class_id], |r| {
        Ok(json!({
            "id": r.get::<_, String>(0)?,
            "title": r.get::<_, String>(1)?,
            "startDate": r.get::<_, Option<String>>(2)?,
            "occurrenceCount": r.get::<_, i64>(3)?,
            "enrollmentCount": r.get::<_, i64>(4)?,
            "confirmedCount": r.get::<_, i64>(5)?,
        }))
    }) {
        Ok(rows) => match rows.collect::<Result<Vec<_>, _>>() {
            Ok(v) => v,
            Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
        },
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    ok(&req.id, json!({ "lessons": lessons }))
}

fn handle_lessons_occurrences(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let lesson_id = match required_str(req, "lessonId") {
        Ok(v) => v,
        Err(e) => return e,
    };

    let lesson: Option<(String, Option<String>, i64)> = match conn
        .query_row(
            "SELECT title, start_date, occurrence_count FROM lessons WHERE id = ?",
            [&lesson_id],
            |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
        )
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let Some((title, start_date, occurrence_count)) = lesson else {
        return err(&req.id, "not_found", "lesson not found", None);
    };

    let mut occurrences = Vec::with_capacity(occurrence_count.max(0) as usize);
    for occurrence in 1..=occurrence_count {
        let confirmed: Option<String> = match conn
            .query_row(
                "SELECT session_date FROM attendance_records WHERE lesson_id = ? AND occurrence = ?",
                (&lesson_id, occurrence),
                |r| r.get(0),
            )
            .optional()
        {
            Ok(v) => v,
            Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
        };
        let draft_key = crate::draft::draft_key(&lesson_id, occurrence);
        let has_draft: bool = match conn
            .query_row("SELECT 1 FROM drafts WHERE key = ?", [&draft_key], |r| {
                r.get::<_, i64>(0)
            })
            .optional()
        {
            Ok(v) => v.is_some(),
            Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
        };
        occurrences.push(json!({
            "occurrence": occurrence,
            "scheduledDate": schedule::occurrence_date(start_date.as_deref(), occurrence),
            "confirmed": confirmed.is_some(),
            "sessionDate": confirmed,
            "hasDraft": has_draft,
        }));
    }

    ok(
        &req.id,
        json!({
            "lessonId": lesson_id,
            "title": title,
            "startDate": start_date,
            "occurrences": occurrences
        }),
    )
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "lessons.create" => Some(handle_lessons_create(state, req)),
        "lessons.list" => Some(handle_lessons_list(state, req)),
        "lessons.occurrences" => Some(handle_lessons_occurrences(state, req)),
        _ => None,
    }
}
