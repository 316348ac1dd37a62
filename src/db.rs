use rusqlite::{Connection, OptionalExtension};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let db_path = workspace.join("ebd.sqlite3");
    let conn = Connection::open(db_path)?;
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS classes(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS lessons(
            id TEXT PRIMARY KEY,
            class_id TEXT NOT NULL,
            title TEXT NOT NULL,
            start_date TEXT,
            occurrence_count INTEGER NOT NULL DEFAULT 13,
            created_at TEXT,
            updated_at TEXT,
            FOREIGN KEY(class_id) REFERENCES classes(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_lessons_class ON lessons(class_id)",
        [],
    )?;
    // Workspaces created before lesson schedules existed lack the column.
    ensure_lessons_occurrence_count(&conn)?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS enrollments(
            id TEXT PRIMARY KEY,
            lesson_id TEXT NOT NULL,
            display_name TEXT NOT NULL,
            has_booklet INTEGER NOT NULL DEFAULT 0,
            sort_order INTEGER NOT NULL,
            updated_at TEXT,
            FOREIGN KEY(lesson_id) REFERENCES lessons(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_enrollments_lesson ON enrollments(lesson_id)",
        [],
    )?;

    // Existing workspaces may have an enrollments table without sort_order.
    // Add and backfill if needed.
    ensure_enrollments_sort_order(&conn)?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_enrollments_lesson_sort ON enrollments(lesson_id, sort_order)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS attendance_records(
            id TEXT PRIMARY KEY,
            lesson_id TEXT NOT NULL,
            occurrence INTEGER NOT NULL,
            session_date TEXT NOT NULL,
            payload TEXT NOT NULL,
            present INTEGER NOT NULL,
            late INTEGER NOT NULL,
            absent INTEGER NOT NULL,
            excused_absent INTEGER NOT NULL,
            booklets INTEGER NOT NULL,
            bibles INTEGER NOT NULL,
            visitor_count INTEGER NOT NULL,
            offering_total REAL NOT NULL,
            missions_total REAL NOT NULL,
            submitted_at TEXT,
            updated_at TEXT,
            FOREIGN KEY(lesson_id) REFERENCES lessons(id),
            UNIQUE(lesson_id, occurrence)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_attendance_records_lesson ON attendance_records(lesson_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS visitor_log(
            id TEXT PRIMARY KEY,
            lesson_id TEXT NOT NULL,
            occurrence INTEGER NOT NULL,
            name TEXT NOT NULL,
            birth_date TEXT,
            contact TEXT,
            created_at TEXT,
            FOREIGN KEY(lesson_id) REFERENCES lessons(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_visitor_log_lesson ON visitor_log(lesson_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_visitor_log_occurrence ON visitor_log(lesson_id, occurrence)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS drafts(
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL,
            updated_at TEXT
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS settings(
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        )",
        [],
    )?;

    Ok(conn)
}

pub fn receipts_dir(workspace: &Path) -> PathBuf {
    workspace.join("receipts")
}

pub fn now_ts() -> String {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs().to_string())
        .unwrap_or_else(|_| "0".to_string())
}

pub fn settings_get_json(conn: &Connection, key: &str) -> anyhow::Result<Option<serde_json::Value>> {
    let raw: Option<String> = conn
        .query_row("SELECT value FROM settings WHERE key = ?", [key], |row| {
            row.get(0)
        })
        .optional()?;
    match raw {
        Some(text) => Ok(Some(serde_json::from_str(&text)?)),
        None => Ok(None),
    }
}

pub fn settings_set_json(conn: &Connection, key: &str, value: &serde_json::Value) -> anyhow::Result<()> {
    let text = serde_json::to_string(value)?;
    conn.execute(
        "INSERT INTO settings(key, value) VALUES(?, ?)
         ON CONFLICT(key) DO UPDATE SET value = excluded.value",
        [key, text.as_str()],
    )?;
    Ok(())
}

fn ensure_lessons_occurrence_count(conn: &Connection) -> anyhow::Result<()> {
    if table_has_column(conn, "lessons", "occurrence_count")? {
        return Ok(());
    }
    conn.execute(
        "ALTER TABLE lessons ADD COLUMN occurrence_count INTEGER NOT NULL DEFAULT 13",
        [],
    )?;
    Ok(())
}

fn ensure_enrollments_sort_order(conn: &Connection) -> anyhow::Result<()> {
    // If the column already exists, we're done.
    if table_has_column(conn, "enrollments", "sort_order")? {
        return Ok(());
    }

    conn.execute(
        "ALTER TABLE enrollments ADD COLUMN sort_order INTEGER NOT NULL DEFAULT 0",
        [],
    )?;

    // Backfill per lesson using existing insert order as a best-effort.
    let mut lesson_stmt = conn.prepare("SELECT id FROM lessons ORDER BY rowid")?;
    let lesson_ids = lesson_stmt
        .query_map([], |row| row.get::<_, String>(0))?
        .collect::<Result<Vec<_>, _>>()?;

    let mut enroll_stmt =
        conn.prepare("SELECT id FROM enrollments WHERE lesson_id = ? ORDER BY rowid")?;

    for lid in lesson_ids {
        let enrollment_ids = enroll_stmt
            .query_map([&lid], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        for (i, eid) in enrollment_ids.iter().enumerate() {
            conn.execute(
                "UPDATE enrollments SET sort_order = ? WHERE id = ?",
                (i as i64, eid),
            )?;
        }
    }

    Ok(())
}

fn table_has_column(conn: &Connection, table: &str, column: &str) -> anyhow::Result<bool> {
    let sql = format!("PRAGMA table_info({})", table);
    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let name: String = row.get(1)?;
        if name == column {
            return Ok(true);
        }
    }
    Ok(false)
}
