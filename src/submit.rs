use crate::draft;
use crate::gateway::{Backend, BlobStore, DraftStore};
use crate::session::{AttendanceSession, ReceiptCategory};
use serde::Serialize;
use std::fs;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SubmitError {
    #[error("receipt upload failed: {0}")]
    Upload(String),

    #[error("receipt url resolution failed: {0}")]
    Resolve(String),

    /// The record store's message, surfaced verbatim.
    #[error("{0}")]
    Save(String),
}

/// Inputs resolved by the caller before the pipeline runs. `scheduled_date`
/// is the occurrence's calendar date when the lesson schedule yields one.
#[derive(Debug, Clone)]
pub struct SubmitContext {
    pub scheduled_date: Option<String>,
    pub today: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitAck {
    pub session_date: String,
    pub uploaded_receipts: usize,
    pub visitors_recorded: bool,
}

/// Run the submission pipeline:
///
/// 1. dispatch the visitor list (best effort, failure only logged);
/// 2. upload every pending receipt, aborting on the first failure
///    (already-uploaded blobs from this batch stay orphaned);
/// 3. resolve each upload to a URL and prepend the new URLs to any
///    existing ones from a prior confirmed submission;
/// 4. save the assembled record with the resolved session date
///    (user-entered wins, then the scheduled date, then today);
/// 5. on success clear the draft and report the acknowledgment.
///
/// The caller's session is only mutated when the whole pipeline succeeds, so
/// a failed attempt leaves both the form and the stored draft for a retry.
pub fn submit<B, S, D>(
    session: &mut AttendanceSession,
    ctx: &SubmitContext,
    backend: &mut B,
    blobs: &mut S,
    drafts: &mut D,
) -> Result<SubmitAck, SubmitError>
where
    B: Backend,
    S: BlobStore,
    D: DraftStore,
{
    let visitors_recorded = match backend.save_visitor_batch(
        &session.lesson_id,
        session.occurrence,
        &session.visitors,
    ) {
        Ok(()) => true,
        Err(e) => {
            log::warn!(
                "visitor batch for {}#{} not saved: {e}",
                session.lesson_id,
                session.occurrence
            );
            false
        }
    };

    let mut staged: Vec<(ReceiptCategory, String)> = Vec::new();
    for receipt in &session.pending_receipts {
        let bytes = fs::read(&receipt.source_path)
            .map_err(|e| SubmitError::Upload(format!("{}: {e}", receipt.source_path)))?;
        let path = format!(
            "{}/{}/{}/{}",
            session.lesson_id,
            session.occurrence,
            receipt.category.dir_name(),
            receipt.file_name
        );
        let handle = blobs
            .upload(&path, &bytes)
            .map_err(|e| SubmitError::Upload(e.to_string()))?;
        let url = blobs
            .resolve_url(&handle)
            .map_err(|e| SubmitError::Resolve(e.to_string()))?;
        staged.push((receipt.category, url));
    }

    let mut working = session.clone();
    let mut new_offerings: Vec<String> = Vec::new();
    let mut new_missions: Vec<String> = Vec::new();
    for (category, url) in staged {
        match category {
            ReceiptCategory::Offerings => new_offerings.push(url),
            ReceiptCategory::Missions => new_missions.push(url),
        }
    }
    if !new_offerings.is_empty() {
        let existing = std::mem::take(&mut working.finance.offering_receipt_urls);
        new_offerings.extend(existing);
        working.finance.offering_receipt_urls = new_offerings;
    }
    if !new_missions.is_empty() {
        let existing = std::mem::take(&mut working.finance.missions_receipt_urls);
        new_missions.extend(existing);
        working.finance.missions_receipt_urls = new_missions;
    }

    let resolved_date = working
        .session_date
        .clone()
        .or_else(|| ctx.scheduled_date.clone())
        .unwrap_or_else(|| ctx.today.clone());
    working.session_date = Some(resolved_date.clone());

    backend
        .save_attendance(&working)
        .map_err(|e| SubmitError::Save(e.to_string()))?;

    let uploaded = working.pending_receipts.len();
    if let Err(e) = draft::discard(drafts, &working.lesson_id, working.occurrence) {
        log::warn!(
            "draft for {}#{} not cleared after submit: {e}",
            working.lesson_id,
            working.occurrence
        );
    }
    working.pending_receipts.clear();
    *session = working;

    Ok(SubmitAck {
        session_date: resolved_date,
        uploaded_receipts: uploaded,
        visitors_recorded,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::{BlobHandle, GatewayError, GatewayResult};
    use crate::session::{Enrollment, Roster, VisitorRecord};
    use std::collections::BTreeMap;
    use std::path::PathBuf;
    use uuid::Uuid;

    #[derive(Default)]
    struct FakeBackend {
        saved: Vec<AttendanceSession>,
        visitor_batches: Vec<(String, i64, Vec<VisitorRecord>)>,
        fail_visitors: bool,
        fail_save: Option<String>,
    }

    impl Backend for FakeBackend {
        fn load_confirmed(&mut self, _lesson_id: &str, _occurrence: i64) -> GatewayResult<Option<AttendanceSession>> {
            Ok(self.saved.last().cloned())
        }

        fn save_attendance(&mut self, session: &AttendanceSession) -> GatewayResult<()> {
            if let Some(msg) = &self.fail_save {
                return Err(GatewayError::Database(msg.clone()));
            }
            self.saved.push(session.clone());
            Ok(())
        }

        fn save_visitor_batch(
            &mut self,
            lesson_id: &str,
            occurrence: i64,
            visitors: &[VisitorRecord],
        ) -> GatewayResult<()> {
            if self.fail_visitors {
                return Err(GatewayError::Database("visitor log offline".to_string()));
            }
            self.visitor_batches
                .push((lesson_id.to_string(), occurrence, visitors.to_vec()));
            Ok(())
        }
    }

    #[derive(Default)]
    struct FakeBlobs {
        uploads: Vec<String>,
        fail_on: Option<String>,
    }

    impl BlobStore for FakeBlobs {
        fn upload(&mut self, path: &str, _bytes: &[u8]) -> GatewayResult<BlobHandle> {
            if let Some(marker) = &self.fail_on {
                if path.contains(marker.as_str()) {
                    return Err(GatewayError::Io(format!("upload refused: {path}")));
                }
            }
            self.uploads.push(path.to_string());
            Ok(BlobHandle {
                storage_path: path.to_string(),
            })
        }

        fn resolve_url(&mut self, handle: &BlobHandle) -> GatewayResult<String> {
            Ok(format!("https://files.example/{}", handle.storage_path))
        }
    }

    #[derive(Default)]
    struct MemoryDrafts {
        map: BTreeMap<String, String>,
    }

    impl DraftStore for MemoryDrafts {
        fn get(&mut self, key: &str) -> GatewayResult<Option<String>> {
            Ok(self.map.get(key).cloned())
        }

        fn set(&mut self, key: &str, value: &str) -> GatewayResult<()> {
            self.map.insert(key.to_string(), value.to_string());
            Ok(())
        }

        fn remove(&mut self, key: &str) -> GatewayResult<()> {
            self.map.remove(key);
            Ok(())
        }
    }

    fn roster() -> Roster {
        Roster::new(vec![
            Enrollment {
                student_id: "s1".to_string(),
                display_name: "Ana Souza".to_string(),
                has_booklet: true,
                sort_order: 0,
            },
            Enrollment {
                student_id: "s2".to_string(),
                display_name: "Bruno Lima".to_string(),
                has_booklet: false,
                sort_order: 1,
            },
        ])
    }

    fn ctx() -> SubmitContext {
        SubmitContext {
            scheduled_date: Some("2026-03-08".to_string()),
            today: "2026-03-10".to_string(),
        }
    }

    fn temp_receipt(name: &str, bytes: &[u8]) -> PathBuf {
        let path = std::env::temp_dir().join(format!("ebdd-submit-{}-{}", Uuid::new_v4(), name));
        std::fs::write(&path, bytes).unwrap();
        path
    }

    #[test]
    fn visitor_failure_never_blocks_the_submission() {
        let mut session = AttendanceSession::for_roster("l1", 1, &roster());
        session.add_visitor(VisitorRecord {
            name: "Maria Silva".to_string(),
            birth_date: None,
            contact: None,
        });
        let mut backend = FakeBackend {
            fail_visitors: true,
            ..FakeBackend::default()
        };
        let mut blobs = FakeBlobs::default();
        let mut drafts = MemoryDrafts::default();

        let ack = submit(&mut session, &ctx(), &mut backend, &mut blobs, &mut drafts).unwrap();
        assert!(!ack.visitors_recorded);
        assert_eq!(backend.saved.len(), 1);
    }

    #[test]
    fn upload_failure_aborts_before_any_save() {
        let mut session = AttendanceSession::for_roster("l1", 1, &roster());
        session.attach_receipt(ReceiptCategory::Offerings, "/nonexistent/recibo.jpg");
        let mut backend = FakeBackend::default();
        let mut blobs = FakeBlobs::default();
        let mut drafts = MemoryDrafts::default();
        draft::snapshot(&mut drafts, &session).unwrap();

        let err = submit(&mut session, &ctx(), &mut backend, &mut blobs, &mut drafts).unwrap_err();
        assert!(matches!(err, SubmitError::Upload(_)));
        assert!(backend.saved.is_empty());
        assert_eq!(session.pending_receipts.len(), 1);
        assert_eq!(session.session_date, None);
        assert!(drafts.map.contains_key(&draft::draft_key("l1", 1)));
    }

    #[test]
    fn partial_upload_orphans_earlier_blobs_without_saving() {
        let good = temp_receipt("recibo-a.jpg", b"jpeg-a");
        let mut session = AttendanceSession::for_roster("l1", 1, &roster());
        session.attach_receipt(ReceiptCategory::Offerings, &good.to_string_lossy());
        session.attach_receipt(ReceiptCategory::Missions, "/nonexistent/recibo-b.jpg");
        let mut backend = FakeBackend::default();
        let mut blobs = FakeBlobs::default();
        let mut drafts = MemoryDrafts::default();

        let err = submit(&mut session, &ctx(), &mut backend, &mut blobs, &mut drafts).unwrap_err();
        assert!(matches!(err, SubmitError::Upload(_)));
        assert_eq!(blobs.uploads.len(), 1);
        assert!(backend.saved.is_empty());
    }

    #[test]
    fn success_prepends_urls_and_clears_the_draft() {
        let receipt = temp_receipt("recibo.jpg", b"jpeg-bytes");
        let mut session = AttendanceSession::for_roster("l1", 2, &roster());
        session
            .finance
            .offering_receipt_urls
            .push("https://files.example/old".to_string());
        session.attach_receipt(ReceiptCategory::Offerings, &receipt.to_string_lossy());
        let mut backend = FakeBackend::default();
        let mut blobs = FakeBlobs::default();
        let mut drafts = MemoryDrafts::default();
        draft::snapshot(&mut drafts, &session).unwrap();

        let ack = submit(&mut session, &ctx(), &mut backend, &mut blobs, &mut drafts).unwrap();
        assert_eq!(ack.uploaded_receipts, 1);
        assert_eq!(ack.session_date, "2026-03-08");

        assert_eq!(session.finance.offering_receipt_urls.len(), 2);
        assert!(session.finance.offering_receipt_urls[0].starts_with("https://files.example/l1/2/offerings/"));
        assert_eq!(session.finance.offering_receipt_urls[1], "https://files.example/old");
        assert!(session.pending_receipts.is_empty());
        assert_eq!(session.session_date, Some("2026-03-08".to_string()));

        assert!(!drafts.map.contains_key(&draft::draft_key("l1", 2)));
        assert_eq!(backend.saved.len(), 1);
        assert_eq!(backend.visitor_batches.len(), 1);
        assert!(backend.visitor_batches[0].2.is_empty());
    }

    #[test]
    fn user_entered_date_wins_over_schedule() {
        let mut session = AttendanceSession::for_roster("l1", 1, &roster());
        session.set_date(Some("2026-03-01".to_string()));
        let mut backend = FakeBackend::default();
        let mut blobs = FakeBlobs::default();
        let mut drafts = MemoryDrafts::default();

        let ack = submit(&mut session, &ctx(), &mut backend, &mut blobs, &mut drafts).unwrap();
        assert_eq!(ack.session_date, "2026-03-01");
    }

    #[test]
    fn today_is_the_last_resort_date() {
        let mut session = AttendanceSession::for_roster("l1", 1, &roster());
        let mut backend = FakeBackend::default();
        let mut blobs = FakeBlobs::default();
        let mut drafts = MemoryDrafts::default();
        let ctx = SubmitContext {
            scheduled_date: None,
            today: "2026-03-10".to_string(),
        };

        let ack = submit(&mut session, &ctx, &mut backend, &mut blobs, &mut drafts).unwrap();
        assert_eq!(ack.session_date, "2026-03-10");
        assert_eq!(backend.saved[0].session_date, Some("2026-03-10".to_string()));
    }

    #[test]
    fn save_rejection_surfaces_verbatim_and_keeps_the_draft() {
        let mut session = AttendanceSession::for_roster("l1", 1, &roster());
        let mut backend = FakeBackend {
            fail_save: Some("quarter already closed".to_string()),
            ..FakeBackend::default()
        };
        let mut blobs = FakeBlobs::default();
        let mut drafts = MemoryDrafts::default();
        draft::snapshot(&mut drafts, &session).unwrap();

        let err = submit(&mut session, &ctx(), &mut backend, &mut blobs, &mut drafts).unwrap_err();
        assert_eq!(err.to_string(), "database error: quarter already closed");
        assert_eq!(session.session_date, None);
        assert!(drafts.map.contains_key(&draft::draft_key("l1", 1)));
    }
}
