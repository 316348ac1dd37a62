use chrono::{Duration as ChronoDuration, NaiveDate};

/// Calendar date of the n-th occurrence (1-based), one week apart starting
/// at the lesson's start date. `None` when there is no usable start date.
pub fn occurrence_date(start_date: Option<&str>, occurrence: i64) -> Option<String> {
    let raw = start_date?.trim();
    if raw.is_empty() || occurrence < 1 {
        return None;
    }
    let date = NaiveDate::parse_from_str(raw, "%Y-%m-%d").ok()?;
    Some(
        (date + ChronoDuration::weeks(occurrence - 1))
            .format("%Y-%m-%d")
            .to_string(),
    )
}

pub fn today() -> String {
    chrono::Local::now().date_naive().format("%Y-%m-%d").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_occurrence_is_the_start_date() {
        assert_eq!(
            occurrence_date(Some("2026-01-04"), 1),
            Some("2026-01-04".to_string())
        );
    }

    #[test]
    fn occurrences_step_one_week() {
        assert_eq!(
            occurrence_date(Some("2026-01-04"), 2),
            Some("2026-01-11".to_string())
        );
        assert_eq!(
            occurrence_date(Some("2026-01-04"), 13),
            Some("2026-03-29".to_string())
        );
    }

    #[test]
    fn crosses_month_and_leap_boundaries() {
        assert_eq!(
            occurrence_date(Some("2024-02-25"), 2),
            Some("2024-03-03".to_string())
        );
    }

    #[test]
    fn unusable_inputs_yield_none() {
        assert_eq!(occurrence_date(None, 1), None);
        assert_eq!(occurrence_date(Some(""), 1), None);
        assert_eq!(occurrence_date(Some("04/01/2026"), 1), None);
        assert_eq!(occurrence_date(Some("2026-01-04"), 0), None);
    }
}
