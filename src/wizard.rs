use crate::draft::{self, Hydration};
use crate::gateway::{Backend, DraftStore, GatewayResult};
use crate::nav::{MemoryHistory, StepNavigator, WizardStep};
use crate::session::{AttendanceSession, Roster};
use serde::Serialize;

/// Lesson metadata resolved once at open time.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LessonInfo {
    pub lesson_id: String,
    pub class_id: String,
    pub class_name: String,
    pub title: String,
    pub scheduled_date: Option<String>,
}

/// One open chamada wizard: hydrated form state plus step navigation. The
/// daemon keeps at most one wizard at a time; opening another replaces it.
pub struct Wizard {
    pub lesson: LessonInfo,
    pub occurrence: i64,
    pub roster: Roster,
    pub session: AttendanceSession,
    pub nav: StepNavigator<MemoryHistory>,
    pub hydration: Hydration,
    confirmed: bool,
    /// Single-flight guard for the submission pipeline.
    pub submitting: bool,
}

impl Wizard {
    pub fn open<B: Backend, D: DraftStore>(
        backend: &mut B,
        drafts: &mut D,
        lesson: LessonInfo,
        occurrence: i64,
        roster: Roster,
    ) -> GatewayResult<Self> {
        let (session, roster, hydration) =
            draft::hydrate(backend, drafts, &lesson.lesson_id, occurrence, roster)?;
        Ok(Self {
            lesson,
            occurrence,
            roster,
            session,
            nav: StepNavigator::new(MemoryHistory::default()),
            hydration,
            confirmed: hydration == Hydration::Confirmed,
            submitting: false,
        })
    }

    pub fn is_confirmed(&self) -> bool {
        self.confirmed
    }

    pub fn step(&self) -> WizardStep {
        self.nav.current()
    }

    /// Forward navigation. Every step actually taken on an unconfirmed
    /// occurrence also snapshots the draft.
    pub fn advance<D: DraftStore>(&mut self, drafts: &mut D) -> GatewayResult<bool> {
        if !self.nav.advance() {
            return Ok(false);
        }
        if !self.confirmed {
            draft::snapshot(drafts, &self.session)?;
        }
        Ok(true)
    }

    pub fn back(&mut self) -> bool {
        self.nav.back()
    }

    /// Called after the submission pipeline succeeds; only the summary step
    /// can finish.
    pub fn finish_submitted(&mut self) -> bool {
        if self.nav.mark_submitted() {
            self.confirmed = true;
            true
        } else {
            false
        }
    }
}
