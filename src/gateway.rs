use crate::db;
use crate::session::{AttendanceSession, VisitorRecord};
use rusqlite::{params, Connection, OptionalExtension};
use sha2::{Digest, Sha256};
use std::fs;
use std::path::{Component, Path, PathBuf};
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("database error: {0}")]
    Database(String),

    #[error("io error: {0}")]
    Io(String),

    #[error("corrupt record: {0}")]
    Corrupt(String),
}

pub type GatewayResult<T> = Result<T, GatewayError>;

impl From<rusqlite::Error> for GatewayError {
    fn from(err: rusqlite::Error) -> Self {
        GatewayError::Database(err.to_string())
    }
}

impl From<std::io::Error> for GatewayError {
    fn from(err: std::io::Error) -> Self {
        GatewayError::Io(err.to_string())
    }
}

/// The attendance record store, in the role the hosted backend used to play.
/// One confirmed record per (lesson, occurrence); saving an already-confirmed
/// occurrence is the edit path and overwrites in place.
pub trait Backend {
    fn load_confirmed(&mut self, lesson_id: &str, occurrence: i64) -> GatewayResult<Option<AttendanceSession>>;
    fn save_attendance(&mut self, session: &AttendanceSession) -> GatewayResult<()>;
    /// Best-effort side channel. Callers log a failure and move on.
    fn save_visitor_batch(
        &mut self,
        lesson_id: &str,
        occurrence: i64,
        visitors: &[VisitorRecord],
    ) -> GatewayResult<()>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlobHandle {
    pub storage_path: String,
}

/// Receipt-image storage. `upload` returns an opaque handle; the URL is a
/// separate resolution step so a handle can be stored before any URL exists.
pub trait BlobStore {
    fn upload(&mut self, path: &str, bytes: &[u8]) -> GatewayResult<BlobHandle>;
    fn resolve_url(&mut self, handle: &BlobHandle) -> GatewayResult<String>;
}

/// String-keyed durable store for draft snapshots. Values are opaque to the
/// store itself.
pub trait DraftStore {
    fn get(&mut self, key: &str) -> GatewayResult<Option<String>>;
    fn set(&mut self, key: &str, value: &str) -> GatewayResult<()>;
    fn remove(&mut self, key: &str) -> GatewayResult<()>;
}

pub struct WorkspaceBackend<'a> {
    pub conn: &'a Connection,
}

impl Backend for WorkspaceBackend<'_> {
    fn load_confirmed(&mut self, lesson_id: &str, occurrence: i64) -> GatewayResult<Option<AttendanceSession>> {
        let row: Option<String> = self
            .conn
            .query_row(
                "SELECT payload FROM attendance_records WHERE lesson_id = ? AND occurrence = ?",
                params![lesson_id, occurrence],
                |row| row.get(0),
            )
            .optional()?;
        let Some(payload) = row else {
            return Ok(None);
        };
        let session: AttendanceSession = serde_json::from_str(&payload)
            .map_err(|e| GatewayError::Corrupt(format!("attendance payload: {e}")))?;
        Ok(Some(session))
    }

    fn save_attendance(&mut self, session: &AttendanceSession) -> GatewayResult<()> {
        let Some(session_date) = session.session_date.clone() else {
            return Err(GatewayError::Corrupt(
                "attendance record missing session date".to_string(),
            ));
        };
        let payload = serde_json::to_string(session)
            .map_err(|e| GatewayError::Corrupt(format!("attendance payload: {e}")))?;
        let totals = session.totals();
        let ts = db::now_ts();
        let tx = self.conn.unchecked_transaction()?;
        tx.execute(
            "INSERT INTO attendance_records(
                id, lesson_id, occurrence, session_date, payload,
                present, late, absent, excused_absent, booklets, bibles,
                visitor_count, offering_total, missions_total, submitted_at, updated_at
             ) VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(lesson_id, occurrence) DO UPDATE SET
                session_date = excluded.session_date,
                payload = excluded.payload,
                present = excluded.present,
                late = excluded.late,
                absent = excluded.absent,
                excused_absent = excluded.excused_absent,
                booklets = excluded.booklets,
                bibles = excluded.bibles,
                visitor_count = excluded.visitor_count,
                offering_total = excluded.offering_total,
                missions_total = excluded.missions_total,
                updated_at = excluded.updated_at",
            params![
                Uuid::new_v4().to_string(),
                session.lesson_id,
                session.occurrence,
                session_date,
                payload,
                totals.present as i64,
                totals.late as i64,
                totals.absent as i64,
                totals.excused_absent as i64,
                totals.booklets as i64,
                totals.bibles as i64,
                totals.visitors,
                session.finance.offering_total(),
                session.finance.missions_total(),
                ts,
                ts,
            ],
        )?;
        tx.commit()?;
        Ok(())
    }

    fn save_visitor_batch(
        &mut self,
        lesson_id: &str,
        occurrence: i64,
        visitors: &[VisitorRecord],
    ) -> GatewayResult<()> {
        let tx = self.conn.unchecked_transaction()?;
        tx.execute(
            "DELETE FROM visitor_log WHERE lesson_id = ? AND occurrence = ?",
            params![lesson_id, occurrence],
        )?;
        let ts = db::now_ts();
        for visitor in visitors {
            tx.execute(
                "INSERT INTO visitor_log(id, lesson_id, occurrence, name, birth_date, contact, created_at)
                 VALUES(?, ?, ?, ?, ?, ?, ?)",
                params![
                    Uuid::new_v4().to_string(),
                    lesson_id,
                    occurrence,
                    visitor.name,
                    visitor.birth_date,
                    visitor.contact,
                    ts,
                ],
            )?;
        }
        tx.commit()?;
        Ok(())
    }
}

/// Receipt blobs live under `<workspace>/receipts/`, one file per upload.
/// File names get a short content-hash prefix so two uploads with the same
/// original name never collide.
pub struct WorkspaceBlobs {
    root: PathBuf,
}

impl WorkspaceBlobs {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    fn checked_relative(&self, path: &str) -> GatewayResult<PathBuf> {
        let rel = Path::new(path);
        if path.trim().is_empty() || rel.is_absolute() {
            return Err(GatewayError::Io(format!("invalid blob path: {path}")));
        }
        for component in rel.components() {
            match component {
                Component::Normal(_) => {}
                _ => return Err(GatewayError::Io(format!("invalid blob path: {path}"))),
            }
        }
        Ok(rel.to_path_buf())
    }
}

impl BlobStore for WorkspaceBlobs {
    fn upload(&mut self, path: &str, bytes: &[u8]) -> GatewayResult<BlobHandle> {
        let rel = self.checked_relative(path)?;
        let file_name = rel
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "receipt".to_string());
        let mut hasher = Sha256::new();
        hasher.update(bytes);
        let digest = format!("{:x}", hasher.finalize());
        let stored_name = format!("{}-{}", &digest[..12], file_name);
        let stored_rel = match rel.parent() {
            Some(parent) if parent != Path::new("") => parent.join(&stored_name),
            _ => PathBuf::from(&stored_name),
        };
        let dest = self.root.join(&stored_rel);
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&dest, bytes)?;
        Ok(BlobHandle {
            storage_path: stored_rel.to_string_lossy().replace('\\', "/"),
        })
    }

    fn resolve_url(&mut self, handle: &BlobHandle) -> GatewayResult<String> {
        let rel = self.checked_relative(&handle.storage_path)?;
        let abs = self.root.join(rel).canonicalize()?;
        Ok(format!("file://{}", abs.display()))
    }
}

pub struct WorkspaceDrafts<'a> {
    pub conn: &'a Connection,
}

impl DraftStore for WorkspaceDrafts<'_> {
    fn get(&mut self, key: &str) -> GatewayResult<Option<String>> {
        let row: Option<String> = self
            .conn
            .query_row(
                "SELECT value FROM drafts WHERE key = ?",
                params![key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(row)
    }

    fn set(&mut self, key: &str, value: &str) -> GatewayResult<()> {
        self.conn.execute(
            "INSERT INTO drafts(key, value, updated_at) VALUES(?, ?, ?)
             ON CONFLICT(key) DO UPDATE SET
                value = excluded.value,
                updated_at = excluded.updated_at",
            params![key, value, db::now_ts()],
        )?;
        Ok(())
    }

    fn remove(&mut self, key: &str) -> GatewayResult<()> {
        self.conn
            .execute("DELETE FROM drafts WHERE key = ?", params![key])?;
        Ok(())
    }
}
