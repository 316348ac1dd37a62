use crate::schedule;
use rusqlite::{Connection, OptionalExtension};
use serde::Serialize;

#[derive(Debug)]
pub struct ReportError {
    pub code: String,
    pub message: String,
}

impl ReportError {
    pub fn new(code: &str, message: impl Into<String>) -> Self {
        Self {
            code: code.to_string(),
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QuarterHeader {
    pub lesson_id: String,
    pub class_id: String,
    pub class_name: String,
    pub title: String,
    pub start_date: Option<String>,
    pub occurrence_count: i64,
    pub congregation: Option<String>,
}

/// One Sunday of the quarter. Unconfirmed occurrences keep zeroed counters so
/// the report always covers the full schedule.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OccurrenceReportRow {
    pub occurrence: i64,
    pub scheduled_date: Option<String>,
    pub confirmed: bool,
    pub session_date: Option<String>,
    pub present: i64,
    pub late: i64,
    pub absent: i64,
    pub excused_absent: i64,
    pub booklets: i64,
    pub bibles: i64,
    pub visitors: i64,
    pub people: i64,
    pub offering_total: f64,
    pub missions_total: f64,
}

impl OccurrenceReportRow {
    fn empty(occurrence: i64, scheduled_date: Option<String>) -> Self {
        Self {
            occurrence,
            scheduled_date,
            confirmed: false,
            session_date: None,
            present: 0,
            late: 0,
            absent: 0,
            excused_absent: 0,
            booklets: 0,
            bibles: 0,
            visitors: 0,
            people: 0,
            offering_total: 0.0,
            missions_total: 0.0,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QuarterAggregate {
    pub confirmed_occurrences: i64,
    pub present_total: i64,
    pub late_total: i64,
    pub absent_total: i64,
    pub excused_absent_total: i64,
    pub booklet_total: i64,
    pub bible_total: i64,
    pub visitor_total: i64,
    pub people_total: i64,
    pub offering_sum: f64,
    pub missions_sum: f64,
    pub average_people: f64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QuarterSummary {
    pub header: QuarterHeader,
    pub rows: Vec<OccurrenceReportRow>,
    pub aggregate: QuarterAggregate,
}

/// Sums run over confirmed occurrences only; the average is people per
/// confirmed Sunday.
pub fn aggregate_rows(rows: &[OccurrenceReportRow]) -> QuarterAggregate {
    let mut agg = QuarterAggregate::default();
    for row in rows.iter().filter(|r| r.confirmed) {
        agg.confirmed_occurrences += 1;
        agg.present_total += row.present;
        agg.late_total += row.late;
        agg.absent_total += row.absent;
        agg.excused_absent_total += row.excused_absent;
        agg.booklet_total += row.booklets;
        agg.bible_total += row.bibles;
        agg.visitor_total += row.visitors;
        agg.people_total += row.people;
        agg.offering_sum += row.offering_total;
        agg.missions_sum += row.missions_total;
    }
    if agg.confirmed_occurrences > 0 {
        agg.average_people = agg.people_total as f64 / agg.confirmed_occurrences as f64;
    }
    agg
}

pub fn quarter_summary(
    conn: &Connection,
    lesson_id: &str,
    congregation: Option<String>,
) -> Result<QuarterSummary, ReportError> {
    let lesson: Option<(String, String, String, Option<String>, i64)> = conn
        .query_row(
            "SELECT l.class_id, c.name, l.title, l.start_date, l.occurrence_count
             FROM lessons l
             JOIN classes c ON c.id = l.class_id
             WHERE l.id = ?",
            [lesson_id],
            |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?, r.get(4)?)),
        )
        .optional()
        .map_err(|e| ReportError::new("db_query_failed", e.to_string()))?;
    let Some((class_id, class_name, title, start_date, occurrence_count)) = lesson else {
        return Err(ReportError::new("not_found", "lesson not found"));
    };

    let mut rows = Vec::with_capacity(occurrence_count.max(0) as usize);
    for occurrence in 1..=occurrence_count {
        let scheduled = schedule::occurrence_date(start_date.as_deref(), occurrence);
        let record: Option<(Option<String>, i64, i64, i64, i64, i64, i64, i64, f64, f64)> = conn
            .query_row(
                "SELECT session_date, present, late, absent, excused_absent,
                        booklets, bibles, visitor_count, offering_total, missions_total
                 FROM attendance_records
                 WHERE lesson_id = ? AND occurrence = ?",
                (lesson_id, occurrence),
                |r| {
                    Ok((
                        r.get(0)?,
                        r.get(1)?,
                        r.get(2)?,
                        r.get(3)?,
                        r.get(4)?,
                        r.get(5)?,
                        r.get(6)?,
                        r.get(7)?,
                        r.get(8)?,
                        r.get(9)?,
                    ))
                },
            )
            .optional()
            .map_err(|e| ReportError::new("db_query_failed", e.to_string()))?;

        match record {
            Some((
                session_date,
                present,
                late,
                absent,
                excused_absent,
                booklets,
                bibles,
                visitors,
                offering_total,
                missions_total,
            )) => rows.push(OccurrenceReportRow {
                occurrence,
                scheduled_date: scheduled,
                confirmed: true,
                session_date,
                present,
                late,
                absent,
                excused_absent,
                booklets,
                bibles,
                visitors,
                people: present + late + visitors,
                offering_total,
                missions_total,
            }),
            None => rows.push(OccurrenceReportRow::empty(occurrence, scheduled)),
        }
    }

    let aggregate = aggregate_rows(&rows);
    Ok(QuarterSummary {
        header: QuarterHeader {
            lesson_id: lesson_id.to_string(),
            class_id,
            class_name,
            title,
            start_date,
            occurrence_count,
            congregation,
        },
        rows,
        aggregate,
    })
}

fn csv_quote(s: &str) -> String {
    if s.contains(',') || s.contains('"') || s.contains('\n') || s.contains('\r') {
        format!("\"{}\"", s.replace('"', "\"\""))
    } else {
        s.to_string()
    }
}

/// Render the quarter grid as CSV: one row per occurrence plus a trailing
/// totals row over the confirmed ones.
pub fn quarter_csv(summary: &QuarterSummary) -> String {
    let mut csv = String::from(
        "occurrence,scheduled_date,session_date,confirmed,present,late,absent,excused_absent,booklets,bibles,visitors,people,offering_total,missions_total\n",
    );
    for row in &summary.rows {
        csv.push_str(&format!(
            "{},{},{},{},{},{},{},{},{},{},{},{},{:.2},{:.2}\n",
            row.occurrence,
            csv_quote(row.scheduled_date.as_deref().unwrap_or("")),
            csv_quote(row.session_date.as_deref().unwrap_or("")),
            row.confirmed,
            row.present,
            row.late,
            row.absent,
            row.excused_absent,
            row.booklets,
            row.bibles,
            row.visitors,
            row.people,
            row.offering_total,
            row.missions_total,
        ));
    }
    let agg = &summary.aggregate;
    csv.push_str(&format!(
        "total,,,{},{},{},{},{},{},{},{},{},{:.2},{:.2}\n",
        agg.confirmed_occurrences,
        agg.present_total,
        agg.late_total,
        agg.absent_total,
        agg.excused_absent_total,
        agg.booklet_total,
        agg.bible_total,
        agg.visitor_total,
        agg.people_total,
        agg.offering_sum,
        agg.missions_sum,
    ));
    csv
}
