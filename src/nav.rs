use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WizardStep {
    Roster,
    GeneralData,
    Summary,
    Submitted,
}

impl WizardStep {
    pub fn number(self) -> i64 {
        match self {
            WizardStep::Roster => 1,
            WizardStep::GeneralData => 2,
            WizardStep::Summary => 3,
            WizardStep::Submitted => 4,
        }
    }
}

/// Navigation history as an explicit stack, so the host platform's back
/// gesture and the in-app back control share one mechanism. Forward
/// transitions record the step being left; a pop restores exactly the
/// recorded step.
pub trait HistoryStack {
    fn push(&mut self, step: WizardStep);
    fn pop(&mut self) -> Option<WizardStep>;
    fn clear(&mut self);
}

/// Plain in-memory adapter. A UI shell wired to real browser history would
/// be a second implementation of the same trait.
#[derive(Debug, Default)]
pub struct MemoryHistory {
    frames: Vec<WizardStep>,
}

impl HistoryStack for MemoryHistory {
    fn push(&mut self, step: WizardStep) {
        self.frames.push(step);
    }

    fn pop(&mut self) -> Option<WizardStep> {
        self.frames.pop()
    }

    fn clear(&mut self) {
        self.frames.clear();
    }
}

/// Linear three-step wizard with a terminal `Submitted` state. Advancing
/// moves one step at a time and stops at `Summary`; submission is a distinct
/// action, not a navigation.
#[derive(Debug)]
pub struct StepNavigator<H: HistoryStack> {
    current: WizardStep,
    history: H,
}

impl<H: HistoryStack> StepNavigator<H> {
    pub fn new(history: H) -> Self {
        Self {
            current: WizardStep::Roster,
            history,
        }
    }

    pub fn current(&self) -> WizardStep {
        self.current
    }

    /// Returns true when the step actually changed; callers snapshot the
    /// draft on every such forward transition of an unconfirmed occurrence.
    pub fn advance(&mut self) -> bool {
        let next = match self.current {
            WizardStep::Roster => WizardStep::GeneralData,
            WizardStep::GeneralData => WizardStep::Summary,
            WizardStep::Summary | WizardStep::Submitted => return false,
        };
        self.history.push(self.current);
        self.current = next;
        true
    }

    /// Pops the most recent history frame. No-op at the first step (nothing
    /// recorded) and after submission (terminal state).
    pub fn back(&mut self) -> bool {
        if self.current == WizardStep::Submitted {
            return false;
        }
        let Some(prev) = self.history.pop() else {
            return false;
        };
        self.current = prev;
        true
    }

    /// Only the summary step can confirm.
    pub fn mark_submitted(&mut self) -> bool {
        if self.current != WizardStep::Summary {
            return false;
        }
        self.current = WizardStep::Submitted;
        self.history.clear();
        true
    }
}
