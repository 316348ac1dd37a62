use crate::gateway::{Backend, DraftStore, GatewayResult};
use crate::session::{AttendanceSession, Roster};
use serde::Serialize;
use std::collections::BTreeSet;

pub fn draft_key(lesson_id: &str, occurrence: i64) -> String {
    format!("chamada:{lesson_id}:{occurrence}")
}

/// Where the wizard state came from at mount time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Hydration {
    Confirmed,
    Draft,
    Fresh,
}

/// Snapshot the current form under its occurrence key, overwriting any
/// previous snapshot. Pending receipt attachments are not serialized, so a
/// recovered draft never carries unuploaded file content.
pub fn snapshot<D: DraftStore>(drafts: &mut D, session: &AttendanceSession) -> GatewayResult<()> {
    let key = draft_key(&session.lesson_id, session.occurrence);
    let value = serde_json::to_string(session)
        .map_err(|e| crate::gateway::GatewayError::Corrupt(format!("draft encode: {e}")))?;
    drafts.set(&key, &value)
}

/// Load the draft for an occurrence, if any. A draft that no longer decodes
/// is treated as absent but left in the store untouched.
pub fn recover<D: DraftStore>(
    drafts: &mut D,
    lesson_id: &str,
    occurrence: i64,
) -> GatewayResult<Option<AttendanceSession>> {
    let key = draft_key(lesson_id, occurrence);
    let Some(raw) = drafts.get(&key)? else {
        return Ok(None);
    };
    match serde_json::from_str::<AttendanceSession>(&raw) {
        Ok(session) => Ok(Some(session)),
        Err(e) => {
            log::warn!("ignoring undecodable draft {key}: {e}");
            Ok(None)
        }
    }
}

pub fn discard<D: DraftStore>(drafts: &mut D, lesson_id: &str, occurrence: i64) -> GatewayResult<()> {
    drafts.remove(&draft_key(lesson_id, occurrence))
}

/// Mount-time recovery policy. A server-confirmed record always wins over a
/// coexisting draft, and the draft is left in place (only an explicit discard
/// removes it). With no confirmed record, a decodable draft hydrates the form;
/// otherwise the form starts fresh. The returned roster is restricted to the
/// confirmed record's students when one exists.
pub fn hydrate<B: Backend, D: DraftStore>(
    backend: &mut B,
    drafts: &mut D,
    lesson_id: &str,
    occurrence: i64,
    roster: Roster,
) -> GatewayResult<(AttendanceSession, Roster, Hydration)> {
    if let Some(confirmed) = backend.load_confirmed(lesson_id, occurrence)? {
        let captured: BTreeSet<String> = confirmed.statuses.keys().cloned().collect();
        let restricted = roster.restrict_to(&captured);
        return Ok((confirmed, restricted, Hydration::Confirmed));
    }
    if let Some(mut draft) = recover(drafts, lesson_id, occurrence)? {
        draft.reconcile(&roster);
        return Ok((draft, roster, Hydration::Draft));
    }
    let fresh = AttendanceSession::for_roster(lesson_id, occurrence, &roster);
    Ok((fresh, roster, Hydration::Fresh))
}
