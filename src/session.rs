use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

/// Per-student register state. `ExcusedAbsent` is the justified-absence
/// column of the paper register; both absence kinds exclude the student
/// from material flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttendanceStatus {
    Present,
    Late,
    Absent,
    ExcusedAbsent,
}

impl AttendanceStatus {
    pub fn is_absence(self) -> bool {
        matches!(self, AttendanceStatus::Absent | AttendanceStatus::ExcusedAbsent)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MaterialKind {
    Booklet,
    Bible,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MaterialAction {
    Add,
    Remove,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReceiptCategory {
    Offerings,
    Missions,
}

impl ReceiptCategory {
    pub fn dir_name(self) -> &'static str {
        match self {
            ReceiptCategory::Offerings => "offerings",
            ReceiptCategory::Missions => "missions",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Enrollment {
    pub student_id: String,
    pub display_name: String,
    /// Whether the student owns the quarter booklet ("possui revista").
    pub has_booklet: bool,
    pub sort_order: i64,
}

/// Ordered enrollment list for one lesson. Loaded once per wizard session;
/// filtering is always a view, never a mutation.
#[derive(Debug, Clone, Default)]
pub struct Roster {
    entries: Vec<Enrollment>,
}

impl Roster {
    pub fn new(entries: Vec<Enrollment>) -> Self {
        Self { entries }
    }

    pub fn entries(&self) -> &[Enrollment] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, student_id: &str) -> Option<&Enrollment> {
        self.entries.iter().find(|e| e.student_id == student_id)
    }

    /// Subset view kept in enrollment order: case-insensitive name substring,
    /// or exact student-id match.
    pub fn search(&self, text: &str) -> Vec<&Enrollment> {
        let needle = text.trim().to_lowercase();
        if needle.is_empty() {
            return self.entries.iter().collect();
        }
        self.entries
            .iter()
            .filter(|e| e.display_name.to_lowercase().contains(&needle) || e.student_id == text.trim())
            .collect()
    }

    /// Restriction used when an occurrence already has a confirmed record:
    /// only the enrollments captured by that record remain visible.
    pub fn restrict_to(&self, ids: &BTreeSet<String>) -> Roster {
        Roster {
            entries: self
                .entries
                .iter()
                .filter(|e| ids.contains(&e.student_id))
                .cloned()
                .collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VisitorRecord {
    pub name: String,
    #[serde(default)]
    pub birth_date: Option<String>,
    #[serde(default)]
    pub contact: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FinancialTotals {
    pub offering_cash: f64,
    pub offering_electronic: f64,
    pub missions_cash: f64,
    pub missions_electronic: f64,
    #[serde(default)]
    pub offering_receipt_urls: Vec<String>,
    #[serde(default)]
    pub missions_receipt_urls: Vec<String>,
}

impl FinancialTotals {
    pub fn offering_total(&self) -> f64 {
        self.offering_cash + self.offering_electronic
    }

    pub fn missions_total(&self) -> f64 {
        self.missions_cash + self.missions_electronic
    }

    pub fn receipt_urls(&self, category: ReceiptCategory) -> &[String] {
        match category {
            ReceiptCategory::Offerings => &self.offering_receipt_urls,
            ReceiptCategory::Missions => &self.missions_receipt_urls,
        }
    }

    pub fn receipt_urls_mut(&mut self, category: ReceiptCategory) -> &mut Vec<String> {
        match category {
            ReceiptCategory::Offerings => &mut self.offering_receipt_urls,
            ReceiptCategory::Missions => &mut self.missions_receipt_urls,
        }
    }
}

/// Partial update for the finance fields; absent fields stay untouched.
/// Negative amounts are clamped to zero rather than rejected.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FinancePatch {
    pub offering_cash: Option<f64>,
    pub offering_electronic: Option<f64>,
    pub missions_cash: Option<f64>,
    pub missions_electronic: Option<f64>,
}

/// A receipt image attached in the UI but not yet uploaded. Lives only in
/// memory: drafts never carry unuploaded file content, so an attachment is
/// lost on reload and must be re-attached.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingReceipt {
    pub category: ReceiptCategory,
    pub source_path: String,
    pub file_name: String,
}

impl PendingReceipt {
    pub fn new(category: ReceiptCategory, source_path: &str) -> Self {
        let file_name = Path::new(source_path)
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "receipt".to_string());
        Self {
            category,
            source_path: source_path.to_string(),
            file_name,
        }
    }
}

/// The whole chamada form for one (lesson, occurrence). Exactly one status
/// per enrolled student at all times; every state change keeps the material
/// sets free of absent students.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttendanceSession {
    pub lesson_id: String,
    pub occurrence: i64,
    #[serde(default)]
    pub session_date: Option<String>,
    pub statuses: BTreeMap<String, AttendanceStatus>,
    #[serde(default)]
    pub booklet_brought: BTreeSet<String>,
    #[serde(default)]
    pub bible_brought: BTreeSet<String>,
    #[serde(default)]
    pub visitor_count: i64,
    #[serde(default)]
    pub visitors: Vec<VisitorRecord>,
    #[serde(default)]
    pub finance: FinancialTotals,
    #[serde(default)]
    pub note: String,
    #[serde(skip)]
    pub pending_receipts: Vec<PendingReceipt>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionTotals {
    pub enrolled: usize,
    pub present: usize,
    pub late: usize,
    pub absent: usize,
    pub excused_absent: usize,
    pub booklets: usize,
    pub bibles: usize,
    pub visitors: i64,
    pub people: i64,
}

impl AttendanceSession {
    /// Fresh form: everyone starts `present`, everything else at defaults.
    pub fn for_roster(lesson_id: &str, occurrence: i64, roster: &Roster) -> Self {
        let statuses = roster
            .entries()
            .iter()
            .map(|e| (e.student_id.clone(), AttendanceStatus::Present))
            .collect();
        Self {
            lesson_id: lesson_id.to_string(),
            occurrence,
            session_date: None,
            statuses,
            booklet_brought: BTreeSet::new(),
            bible_brought: BTreeSet::new(),
            visitor_count: 0,
            visitors: Vec::new(),
            finance: FinancialTotals::default(),
            note: String::new(),
            pending_receipts: Vec::new(),
        }
    }

    fn material_set_mut(&mut self, kind: MaterialKind) -> &mut BTreeSet<String> {
        match kind {
            MaterialKind::Booklet => &mut self.booklet_brought,
            MaterialKind::Bible => &mut self.bible_brought,
        }
    }

    pub fn material_set(&self, kind: MaterialKind) -> &BTreeSet<String> {
        match kind {
            MaterialKind::Booklet => &self.booklet_brought,
            MaterialKind::Bible => &self.bible_brought,
        }
    }

    /// Unknown student ids are a no-op; the roster is closed over valid ids
    /// by construction.
    pub fn set_status(&mut self, student_id: &str, status: AttendanceStatus) {
        let Some(slot) = self.statuses.get_mut(student_id) else {
            return;
        };
        *slot = status;
        if status.is_absence() {
            self.booklet_brought.remove(student_id);
            self.bible_brought.remove(student_id);
        }
    }

    /// Bulk "magic wand": one status for the whole roster. An absence status
    /// also empties both material sets.
    pub fn set_status_for_all(&mut self, status: AttendanceStatus) {
        for slot in self.statuses.values_mut() {
            *slot = status;
        }
        if status.is_absence() {
            self.booklet_brought.clear();
            self.bible_brought.clear();
        }
    }

    pub fn toggle_material(&mut self, kind: MaterialKind, student_id: &str) {
        match self.statuses.get(student_id) {
            Some(status) if !status.is_absence() => {}
            _ => return,
        }
        let set = self.material_set_mut(kind);
        if !set.remove(student_id) {
            set.insert(student_id.to_string());
        }
    }

    /// Bulk material action. `Add` skips absent students, and for booklets
    /// additionally skips students without their own booklet; `Remove`
    /// clears the flag for everyone.
    pub fn set_material_for_all(&mut self, kind: MaterialKind, action: MaterialAction, roster: &Roster) {
        match action {
            MaterialAction::Remove => {
                self.material_set_mut(kind).clear();
            }
            MaterialAction::Add => {
                let eligible: Vec<String> = self
                    .statuses
                    .iter()
                    .filter(|(id, status)| {
                        if status.is_absence() {
                            return false;
                        }
                        match kind {
                            MaterialKind::Booklet => {
                                roster.get(id).map(|e| e.has_booklet).unwrap_or(false)
                            }
                            MaterialKind::Bible => true,
                        }
                    })
                    .map(|(id, _)| id.clone())
                    .collect();
                let set = self.material_set_mut(kind);
                for id in eligible {
                    set.insert(id);
                }
            }
        }
    }

    /// The quick count can exceed the detailed list but never undercut it.
    pub fn set_visitor_count(&mut self, count: i64) {
        self.visitor_count = count.max(0).max(self.visitors.len() as i64);
    }

    /// Duplicate names (exact match) are ignored. Returns whether the record
    /// was added.
    pub fn add_visitor(&mut self, visitor: VisitorRecord) -> bool {
        if self.visitors.iter().any(|v| v.name == visitor.name) {
            return false;
        }
        self.visitors.push(visitor);
        self.visitor_count = self.visitor_count.max(self.visitors.len() as i64);
        true
    }

    /// Removing a detailed visitor decrements the count by exactly one.
    pub fn remove_visitor(&mut self, name: &str) -> bool {
        let Some(pos) = self.visitors.iter().position(|v| v.name == name) else {
            return false;
        };
        self.visitors.remove(pos);
        self.visitor_count = (self.visitor_count - 1).max(self.visitors.len() as i64).max(0);
        true
    }

    pub fn apply_finance(&mut self, patch: &FinancePatch) {
        if let Some(v) = patch.offering_cash {
            self.finance.offering_cash = v.max(0.0);
        }
        if let Some(v) = patch.offering_electronic {
            self.finance.offering_electronic = v.max(0.0);
        }
        if let Some(v) = patch.missions_cash {
            self.finance.missions_cash = v.max(0.0);
        }
        if let Some(v) = patch.missions_electronic {
            self.finance.missions_electronic = v.max(0.0);
        }
    }

    pub fn set_note(&mut self, note: &str) {
        self.note = note.to_string();
    }

    pub fn set_date(&mut self, date: Option<String>) {
        self.session_date = date.filter(|d| !d.trim().is_empty());
    }

    pub fn attach_receipt(&mut self, category: ReceiptCategory, source_path: &str) {
        self.pending_receipts.push(PendingReceipt::new(category, source_path));
    }

    /// Align the status map with a freshly loaded roster (after hydrating a
    /// draft that may predate enrollment edits): new enrollees default to
    /// `present`, departed ids are dropped everywhere.
    pub fn reconcile(&mut self, roster: &Roster) {
        let keep: BTreeSet<&str> = roster.entries().iter().map(|e| e.student_id.as_str()).collect();
        self.statuses.retain(|id, _| keep.contains(id.as_str()));
        for e in roster.entries() {
            self.statuses
                .entry(e.student_id.clone())
                .or_insert(AttendanceStatus::Present);
        }
        let statuses = &self.statuses;
        self.booklet_brought
            .retain(|id| statuses.get(id).map(|s| !s.is_absence()).unwrap_or(false));
        self.bible_brought
            .retain(|id| statuses.get(id).map(|s| !s.is_absence()).unwrap_or(false));
    }

    /// Derived counts, recomputed on demand so they can never diverge from
    /// the underlying state.
    pub fn totals(&self) -> SessionTotals {
        let mut present = 0usize;
        let mut late = 0usize;
        let mut absent = 0usize;
        let mut excused_absent = 0usize;
        for status in self.statuses.values() {
            match status {
                AttendanceStatus::Present => present += 1,
                AttendanceStatus::Late => late += 1,
                AttendanceStatus::Absent => absent += 1,
                AttendanceStatus::ExcusedAbsent => excused_absent += 1,
            }
        }
        SessionTotals {
            enrolled: self.statuses.len(),
            present,
            late,
            absent,
            excused_absent,
            booklets: self.booklet_brought.len(),
            bibles: self.bible_brought.len(),
            visitors: self.visitor_count,
            people: (present + late) as i64 + self.visitor_count,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roster3() -> Roster {
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
            Enrollment {
                student_id: "s3".to_string(),
                display_name: "Carla Dias".to_string(),
                has_booklet: true,
                sort_order: 2,
            },
        ])
    }

    #[test]
    fn fresh_session_defaults_everyone_present() {
        let roster = roster3();
        let s = AttendanceSession::for_roster("l1", 1, &roster);
        assert_eq!(s.statuses.len(), 3);
        assert!(s.statuses.values().all(|st| *st == AttendanceStatus::Present));
        let t = s.totals();
        assert_eq!(t.enrolled, 3);
        assert_eq!(t.present, 3);
        assert_eq!(t.people, 3);
    }

    #[test]
    fn absence_clears_material_flags() {
        let roster = roster3();
        let mut s = AttendanceSession::for_roster("l1", 1, &roster);
        s.toggle_material(MaterialKind::Booklet, "s1");
        s.toggle_material(MaterialKind::Bible, "s1");
        assert!(s.booklet_brought.contains("s1"));
        s.set_status("s1", AttendanceStatus::ExcusedAbsent);
        assert!(!s.booklet_brought.contains("s1"));
        assert!(!s.bible_brought.contains("s1"));
    }

    #[test]
    fn bulk_absent_empties_both_sets() {
        // Scenario: three students, all present by default, wand -> absent.
        let roster = roster3();
        let mut s = AttendanceSession::for_roster("l1", 1, &roster);
        s.toggle_material(MaterialKind::Bible, "s2");
        s.set_status_for_all(AttendanceStatus::Absent);
        let t = s.totals();
        assert_eq!(t.present, 0);
        assert_eq!(t.absent, 3);
        assert!(s.booklet_brought.is_empty());
        assert!(s.bible_brought.is_empty());
    }

    #[test]
    fn bulk_present_keeps_material_sets() {
        let roster = roster3();
        let mut s = AttendanceSession::for_roster("l1", 1, &roster);
        s.toggle_material(MaterialKind::Bible, "s3");
        s.set_status_for_all(AttendanceStatus::Late);
        assert!(s.bible_brought.contains("s3"));
    }

    #[test]
    fn booklet_bulk_add_respects_ownership_and_absence() {
        let roster = roster3();
        let mut s = AttendanceSession::for_roster("l1", 1, &roster);
        s.set_status("s3", AttendanceStatus::Absent);
        s.set_material_for_all(MaterialKind::Booklet, MaterialAction::Add, &roster);
        // s2 owns no booklet, s3 is absent.
        assert!(s.booklet_brought.contains("s1"));
        assert!(!s.booklet_brought.contains("s2"));
        assert!(!s.booklet_brought.contains("s3"));

        s.set_material_for_all(MaterialKind::Bible, MaterialAction::Add, &roster);
        assert_eq!(s.bible_brought.len(), 2);

        s.set_material_for_all(MaterialKind::Booklet, MaterialAction::Remove, &roster);
        assert!(s.booklet_brought.is_empty());
    }

    #[test]
    fn toggle_material_noop_for_absent_and_unknown() {
        let roster = roster3();
        let mut s = AttendanceSession::for_roster("l1", 1, &roster);
        s.set_status("s2", AttendanceStatus::Absent);
        s.toggle_material(MaterialKind::Bible, "s2");
        assert!(s.bible_brought.is_empty());
        s.toggle_material(MaterialKind::Bible, "nobody");
        assert!(s.bible_brought.is_empty());
        s.set_status("nobody", AttendanceStatus::Late);
        assert_eq!(s.statuses.len(), 3);
    }

    #[test]
    fn visitor_count_clamps_to_detail_list() {
        let roster = roster3();
        let mut s = AttendanceSession::for_roster("l1", 1, &roster);
        s.set_visitor_count(2);
        assert_eq!(s.visitor_count, 2);

        assert!(s.add_visitor(VisitorRecord {
            name: "Maria Silva".to_string(),
            birth_date: None,
            contact: None,
        }));
        assert_eq!(s.visitor_count, 2);

        assert!(s.add_visitor(VisitorRecord {
            name: "Joana Reis".to_string(),
            birth_date: None,
            contact: None,
        }));
        assert_eq!(s.visitor_count, 2);

        // Editing below the detailed-list length clamps up.
        s.set_visitor_count(1);
        assert_eq!(s.visitor_count, 2);

        assert!(s.remove_visitor("Maria Silva"));
        assert_eq!(s.visitor_count, 1);
        assert!(!s.remove_visitor("Maria Silva"));
    }

    #[test]
    fn duplicate_visitor_name_is_ignored() {
        let roster = roster3();
        let mut s = AttendanceSession::for_roster("l1", 1, &roster);
        let v = VisitorRecord {
            name: "Maria Silva".to_string(),
            birth_date: Some("1990-01-05".to_string()),
            contact: None,
        };
        assert!(s.add_visitor(v.clone()));
        assert!(!s.add_visitor(v));
        assert_eq!(s.visitors.len(), 1);
        assert_eq!(s.visitor_count, 1);
    }

    #[test]
    fn finance_patch_clamps_negative_amounts() {
        let roster = roster3();
        let mut s = AttendanceSession::for_roster("l1", 1, &roster);
        s.apply_finance(&FinancePatch {
            offering_cash: Some(120.5),
            missions_cash: Some(-3.0),
            ..FinancePatch::default()
        });
        assert_eq!(s.finance.offering_cash, 120.5);
        assert_eq!(s.finance.missions_cash, 0.0);
        assert_eq!(s.finance.offering_total(), 120.5);
    }

    #[test]
    fn reconcile_tracks_roster_drift() {
        let roster = roster3();
        let mut s = AttendanceSession::for_roster("l1", 1, &roster);
        s.set_status("s2", AttendanceStatus::Late);
        s.toggle_material(MaterialKind::Bible, "s1");

        let shrunk = Roster::new(vec![
            roster.get("s2").unwrap().clone(),
            Enrollment {
                student_id: "s9".to_string(),
                display_name: "Novo Aluno".to_string(),
                has_booklet: false,
                sort_order: 3,
            },
        ]);
        s.reconcile(&shrunk);
        assert_eq!(s.statuses.len(), 2);
        assert_eq!(s.statuses.get("s2"), Some(&AttendanceStatus::Late));
        assert_eq!(s.statuses.get("s9"), Some(&AttendanceStatus::Present));
        assert!(s.bible_brought.is_empty());
    }

    #[test]
    fn roster_search_matches_name_or_exact_id() {
        let roster = roster3();
        let hits = roster.search("an");
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].student_id, "s1");

        let by_id = roster.search("s2");
        assert_eq!(by_id.len(), 1);
        assert_eq!(by_id[0].display_name, "Bruno Lima");

        assert_eq!(roster.search("  ").len(), 3);
        assert!(roster.search("zz").is_empty());
    }
}
