use crate::db;
use crate::draft::{self, Hydration};
use crate::gateway::{GatewayError, WorkspaceBackend, WorkspaceBlobs, WorkspaceDrafts};
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use crate::nav::{MemoryHistory, StepNavigator, WizardStep};
use crate::session::{
    AttendanceSession, AttendanceStatus, Enrollment, FinancePatch, MaterialAction, MaterialKind,
    ReceiptCategory, Roster, VisitorRecord,
};
use crate::schedule;
use crate::submit::{self, SubmitContext, SubmitError};
use crate::wizard::{LessonInfo, Wizard};
use rusqlite::{Connection, OptionalExtension};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;

struct HandlerErr {
    code: &'static str,
    message: String,
    details: Option<serde_json::Value>,
}

impl HandlerErr {
    fn response(self, id: &str) -> serde_json::Value {
        err(id, self.code, self.message, self.details)
    }
}

fn parse_params<T: DeserializeOwned>(params: &serde_json::Value) -> Result<T, HandlerErr> {
    serde_json::from_value(params.clone()).map_err(|e| HandlerErr {
        code: "bad_params",
        message: e.to_string(),
        details: None,
    })
}

fn gateway_err(e: GatewayError) -> HandlerErr {
    let code = match &e {
        GatewayError::Database(_) => "db_query_failed",
        GatewayError::Io(_) => "io_failed",
        GatewayError::Corrupt(_) => "corrupt_record",
    };
    HandlerErr {
        code,
        message: e.to_string(),
        details: None,
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct OpenParams {
    lesson_id: String,
    occurrence: i64,
}

#[derive(Deserialize)]
struct SearchParams {
    #[serde(default)]
    text: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SetStatusParams {
    student_id: String,
    status: AttendanceStatus,
}

#[derive(Deserialize)]
struct SetStatusAllParams {
    status: AttendanceStatus,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ToggleMaterialParams {
    student_id: String,
    kind: MaterialKind,
}

#[derive(Deserialize)]
struct SetMaterialAllParams {
    kind: MaterialKind,
    action: MaterialAction,
}

#[derive(Deserialize)]
struct SetNoteParams {
    note: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SetDateParams {
    #[serde(default)]
    session_date: Option<String>,
}

#[derive(Deserialize)]
struct VisitorCountParams {
    count: i64,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct VisitorAddParams {
    name: String,
    #[serde(default)]
    birth_date: Option<String>,
    #[serde(default)]
    contact: Option<String>,
}

#[derive(Deserialize)]
struct VisitorRemoveParams {
    name: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct AttachReceiptParams {
    category: ReceiptCategory,
    source_path: String,
}

/// Full wizard snapshot sent to the UI. The session serializer skips pending
/// receipts, so they ride along under their own key.
fn wizard_state(wizard: &Wizard) -> serde_json::Value {
    json!({
        "lesson": wizard.lesson,
        "occurrence": wizard.occurrence,
        "step": wizard.step(),
        "stepNumber": wizard.step().number(),
        "hydration": wizard.hydration,
        "confirmed": wizard.is_confirmed(),
        "submitting": wizard.submitting,
        "roster": wizard.roster.entries(),
        "session": wizard.session,
        "pendingReceipts": wizard.session.pending_receipts,
        "totals": wizard.session.totals(),
    })
}

fn load_roster(conn: &Connection, lesson_id: &str) -> Result<Roster, HandlerErr> {
    let mut stmt = conn
        .prepare(
            "SELECT id, display_name, has_booklet, sort_order
             FROM enrollments
             WHERE lesson_id = ?
             ORDER BY sort_order",
        )
        .map_err(|e| HandlerErr {
            code: "db_query_failed",
            message: e.to_string(),
            details: None,
        })?;
    let entries = stmt
        .query_map([lesson_id], |r| {
            Ok(Enrollment {
                student_id: r.get(0)?,
                display_name: r.get(1)?,
                has_booklet: r.get::<_, i64>(2)? != 0,
                sort_order: r.get(3)?,
            })
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(|e| HandlerErr {
            code: "db_query_failed",
            message: e.to_string(),
            details: None,
        })?;
    Ok(Roster::new(entries))
}

fn chamada_open(conn: &Connection, params: &serde_json::Value) -> Result<Wizard, HandlerErr> {
    let params: OpenParams = parse_params(params)?;
    if params.occurrence < 1 {
        return Err(HandlerErr {
            code: "bad_params",
            message: "occurrence must be at least 1".to_string(),
            details: None,
        });
    }

    let lesson: Option<(String, String, String, Option<String>, i64)> = conn
        .query_row(
            "SELECT l.class_id, c.name, l.title, l.start_date, l.occurrence_count
             FROM lessons l
             JOIN classes c ON c.id = l.class_id
             WHERE l.id = ?",
            [&params.lesson_id],
            |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?, r.get(4)?)),
        )
        .optional()
        .map_err(|e| HandlerErr {
            code: "db_query_failed",
            message: e.to_string(),
            details: None,
        })?;
    let Some((class_id, class_name, title, start_date, occurrence_count)) = lesson else {
        return Err(HandlerErr {
            code: "not_found",
            message: "lesson not found".to_string(),
            details: None,
        });
    };
    if params.occurrence > occurrence_count {
        return Err(HandlerErr {
            code: "bad_params",
            message: "occurrence out of range for lesson".to_string(),
            details: Some(json!({ "occurrenceCount": occurrence_count })),
        });
    }

    let roster = load_roster(conn, &params.lesson_id)?;
    let lesson = LessonInfo {
        lesson_id: params.lesson_id.clone(),
        class_id,
        class_name,
        title,
        scheduled_date: schedule::occurrence_date(start_date.as_deref(), params.occurrence),
    };

    let mut backend = WorkspaceBackend { conn };
    let mut drafts = WorkspaceDrafts { conn };
    Wizard::open(&mut backend, &mut drafts, lesson, params.occurrence, roster).map_err(gateway_err)
}

fn handle_chamada_open(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    match chamada_open(conn, &req.params) {
        Ok(wizard) => {
            let payload = wizard_state(&wizard);
            state.wizard = Some(wizard);
            ok(&req.id, payload)
        }
        Err(error) => error.response(&req.id),
    }
}

fn handle_chamada_state(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(wizard) = state.wizard.as_ref() else {
        return err(&req.id, "no_session", "open a chamada first", None);
    };
    ok(&req.id, wizard_state(wizard))
}

fn handle_chamada_roster_search(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(wizard) = state.wizard.as_ref() else {
        return err(&req.id, "no_session", "open a chamada first", None);
    };
    let params: SearchParams = match parse_params(&req.params) {
        Ok(p) => p,
        Err(e) => return e.response(&req.id),
    };
    let matches = wizard.roster.search(&params.text);
    ok(
        &req.id,
        json!({ "matches": matches, "total": wizard.roster.len() }),
    )
}

fn handle_chamada_set_status(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(wizard) = state.wizard.as_mut() else {
        return err(&req.id, "no_session", "open a chamada first", None);
    };
    let params: SetStatusParams = match parse_params(&req.params) {
        Ok(p) => p,
        Err(e) => return e.response(&req.id),
    };
    wizard.session.set_status(&params.student_id, params.status);
    ok(&req.id, json!({ "ok": true, "totals": wizard.session.totals() }))
}

fn handle_chamada_set_status_all(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(wizard) = state.wizard.as_mut() else {
        return err(&req.id, "no_session", "open a chamada first", None);
    };
    let params: SetStatusAllParams = match parse_params(&req.params) {
        Ok(p) => p,
        Err(e) => return e.response(&req.id),
    };
    wizard.session.set_status_for_all(params.status);
    ok(&req.id, json!({ "ok": true, "totals": wizard.session.totals() }))
}

fn handle_chamada_toggle_material(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(wizard) = state.wizard.as_mut() else {
        return err(&req.id, "no_session", "open a chamada first", None);
    };
    let params: ToggleMaterialParams = match parse_params(&req.params) {
        Ok(p) => p,
        Err(e) => return e.response(&req.id),
    };
    wizard.session.toggle_material(params.kind, &params.student_id);
    ok(&req.id, json!({ "ok": true, "totals": wizard.session.totals() }))
}

fn handle_chamada_set_material_all(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(wizard) = state.wizard.as_mut() else {
        return err(&req.id, "no_session", "open a chamada first", None);
    };
    let params: SetMaterialAllParams = match parse_params(&req.params) {
        Ok(p) => p,
        Err(e) => return e.response(&req.id),
    };
    wizard
        .session
        .set_material_for_all(params.kind, params.action, &wizard.roster);
    ok(&req.id, json!({ "ok": true, "totals": wizard.session.totals() }))
}

fn handle_chamada_set_note(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(wizard) = state.wizard.as_mut() else {
        return err(&req.id, "no_session", "open a chamada first", None);
    };
    let params: SetNoteParams = match parse_params(&req.params) {
        Ok(p) => p,
        Err(e) => return e.response(&req.id),
    };
    wizard.session.set_note(&params.note);
    ok(&req.id, json!({ "ok": true }))
}

fn handle_chamada_set_date(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(wizard) = state.wizard.as_mut() else {
        return err(&req.id, "no_session", "open a chamada first", None);
    };
    let params: SetDateParams = match parse_params(&req.params) {
        Ok(p) => p,
        Err(e) => return e.response(&req.id),
    };
    if let Some(date) = params.session_date.as_deref() {
        if !date.trim().is_empty() && schedule::occurrence_date(Some(date), 1).is_none() {
            return err(&req.id, "bad_params", "sessionDate must be YYYY-MM-DD", None);
        }
    }
    wizard.session.set_date(params.session_date);
    ok(
        &req.id,
        json!({ "ok": true, "sessionDate": wizard.session.session_date }),
    )
}

fn handle_chamada_set_finance(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(wizard) = state.wizard.as_mut() else {
        return err(&req.id, "no_session", "open a chamada first", None);
    };
    let patch: FinancePatch = match parse_params(&req.params) {
        Ok(p) => p,
        Err(e) => return e.response(&req.id),
    };
    wizard.session.apply_finance(&patch);
    ok(
        &req.id,
        json!({
            "ok": true,
            "finance": wizard.session.finance,
            "offeringTotal": wizard.session.finance.offering_total(),
            "missionsTotal": wizard.session.finance.missions_total(),
        }),
    )
}

fn handle_chamada_visitor_count(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(wizard) = state.wizard.as_mut() else {
        return err(&req.id, "no_session", "open a chamada first", None);
    };
    let params: VisitorCountParams = match parse_params(&req.params) {
        Ok(p) => p,
        Err(e) => return e.response(&req.id),
    };
    wizard.session.set_visitor_count(params.count);
    ok(
        &req.id,
        json!({
            "ok": true,
            "visitorCount": wizard.session.visitor_count,
            "totals": wizard.session.totals(),
        }),
    )
}

fn handle_chamada_visitor_add(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(wizard) = state.wizard.as_mut() else {
        return err(&req.id, "no_session", "open a chamada first", None);
    };
    let params: VisitorAddParams = match parse_params(&req.params) {
        Ok(p) => p,
        Err(e) => return e.response(&req.id),
    };
    let name = params.name.trim().to_string();
    if name.is_empty() {
        return err(&req.id, "bad_params", "visitor name must not be empty", None);
    }
    let added = wizard.session.add_visitor(VisitorRecord {
        name,
        birth_date: params.birth_date.filter(|s| !s.trim().is_empty()),
        contact: params.contact.filter(|s| !s.trim().is_empty()),
    });
    ok(
        &req.id,
        json!({
            "added": added,
            "visitorCount": wizard.session.visitor_count,
            "visitors": wizard.session.visitors,
        }),
    )
}

fn handle_chamada_visitor_remove(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(wizard) = state.wizard.as_mut() else {
        return err(&req.id, "no_session", "open a chamada first", None);
    };
    let params: VisitorRemoveParams = match parse_params(&req.params) {
        Ok(p) => p,
        Err(e) => return e.response(&req.id),
    };
    let removed = wizard.session.remove_visitor(params.name.trim());
    ok(
        &req.id,
        json!({
            "removed": removed,
            "visitorCount": wizard.session.visitor_count,
            "visitors": wizard.session.visitors,
        }),
    )
}

fn handle_chamada_attach_receipt(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(wizard) = state.wizard.as_mut() else {
        return err(&req.id, "no_session", "open a chamada first", None);
    };
    let params: AttachReceiptParams = match parse_params(&req.params) {
        Ok(p) => p,
        Err(e) => return e.response(&req.id),
    };
    let source_path = params.source_path.trim().to_string();
    if source_path.is_empty() {
        return err(&req.id, "bad_params", "sourcePath must not be empty", None);
    }
    wizard.session.attach_receipt(params.category, &source_path);
    ok(
        &req.id,
        json!({
            "ok": true,
            "pendingReceipts": wizard.session.pending_receipts,
        }),
    )
}

fn handle_chamada_advance(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let Some(wizard) = state.wizard.as_mut() else {
        return err(&req.id, "no_session", "open a chamada first", None);
    };
    let mut drafts = WorkspaceDrafts { conn };
    match wizard.advance(&mut drafts) {
        Ok(moved) => ok(
            &req.id,
            json!({
                "moved": moved,
                "step": wizard.step(),
                "stepNumber": wizard.step().number(),
            }),
        ),
        Err(e) => err(
            &req.id,
            "db_update_failed",
            e.to_string(),
            Some(json!({ "table": "drafts" })),
        ),
    }
}

fn handle_chamada_back(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(wizard) = state.wizard.as_mut() else {
        return err(&req.id, "no_session", "open a chamada first", None);
    };
    let moved = wizard.back();
    ok(
        &req.id,
        json!({
            "moved": moved,
            "step": wizard.step(),
            "stepNumber": wizard.step().number(),
        }),
    )
}

fn handle_chamada_discard_draft(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let Some(wizard) = state.wizard.as_mut() else {
        return err(&req.id, "no_session", "open a chamada first", None);
    };
    let mut drafts = WorkspaceDrafts { conn };
    if let Err(e) = draft::discard(&mut drafts, &wizard.lesson.lesson_id, wizard.occurrence) {
        return err(
            &req.id,
            "db_delete_failed",
            e.to_string(),
            Some(json!({ "table": "drafts" })),
        );
    }
    // A confirmed occurrence keeps its record; only the coexisting draft goes.
    if !wizard.is_confirmed() {
        wizard.session = AttendanceSession::for_roster(
            &wizard.lesson.lesson_id,
            wizard.occurrence,
            &wizard.roster,
        );
        wizard.nav = StepNavigator::new(MemoryHistory::default());
        wizard.hydration = Hydration::Fresh;
    }
    ok(&req.id, wizard_state(wizard))
}

fn handle_chamada_submit(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(workspace) = state.workspace.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let Some(wizard) = state.wizard.as_mut() else {
        return err(&req.id, "no_session", "open a chamada first", None);
    };
    if wizard.step() != WizardStep::Summary {
        return err(
            &req.id,
            "wrong_step",
            "submit is only available from the summary step",
            None,
        );
    }
    if wizard.submitting {
        return err(&req.id, "submit_in_flight", "a submission is already running", None);
    }
    wizard.submitting = true;

    let ctx = SubmitContext {
        scheduled_date: wizard.lesson.scheduled_date.clone(),
        today: schedule::today(),
    };
    let mut backend = WorkspaceBackend { conn };
    let mut blobs = WorkspaceBlobs::new(db::receipts_dir(workspace));
    let mut drafts = WorkspaceDrafts { conn };
    let outcome = submit::submit(&mut wizard.session, &ctx, &mut backend, &mut blobs, &mut drafts);
    wizard.submitting = false;

    match outcome {
        Ok(ack) => {
            wizard.finish_submitted();
            ok(
                &req.id,
                json!({
                    "sessionDate": ack.session_date,
                    "uploadedReceipts": ack.uploaded_receipts,
                    "visitorsRecorded": ack.visitors_recorded,
                    "step": wizard.step(),
                    "stepNumber": wizard.step().number(),
                }),
            )
        }
        Err(e) => {
            let stage = match &e {
                SubmitError::Upload(_) => "upload",
                SubmitError::Resolve(_) => "resolve",
                SubmitError::Save(_) => "save",
            };
            err(
                &req.id,
                "submit_failed",
                e.to_string(),
                Some(json!({ "stage": stage })),
            )
        }
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "chamada.open" => Some(handle_chamada_open(state, req)),
        "chamada.state" => Some(handle_chamada_state(state, req)),
        "chamada.rosterSearch" => Some(handle_chamada_roster_search(state, req)),
        "chamada.setStatus" => Some(handle_chamada_set_status(state, req)),
        "chamada.setStatusAll" => Some(handle_chamada_set_status_all(state, req)),
        "chamada.toggleMaterial" => Some(handle_chamada_toggle_material(state, req)),
        "chamada.setMaterialAll" => Some(handle_chamada_set_material_all(state, req)),
        "chamada.setNote" => Some(handle_chamada_set_note(state, req)),
        "chamada.setDate" => Some(handle_chamada_set_date(state, req)),
        "chamada.setFinance" => Some(handle_chamada_set_finance(state, req)),
        "chamada.visitorCount" => Some(handle_chamada_visitor_count(state, req)),
        "chamada.visitorAdd" => Some(handle_chamada_visitor_add(state, req)),
        "chamada.visitorRemove" => Some(handle_chamada_visitor_remove(state, req)),
        "chamada.attachReceipt" => Some(handle_chamada_attach_receipt(state, req)),
        "chamada.advance" => Some(handle_chamada_advance(state, req)),
        "chamada.back" => Some(handle_chamada_back(state, req)),
        "chamada.discardDraft" => Some(handle_chamada_discard_draft(state, req)),
        "chamada.submit" => Some(handle_chamada_submit(state, req)),
        _ => None,
    }
}
