use chrono::{Datelike, Duration, NaiveDate};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttendanceStatus {
    Present,
    Absent,
    Excused,
    Late,
}

impl AttendanceStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            AttendanceStatus::Present => "present",
            AttendanceStatus::Absent => "absent",
            AttendanceStatus::Excused => "excused",
            AttendanceStatus::Late => "late",
        }
    }

    pub fn parse(s: &str) -> Option<AttendanceStatus> {
        match s {
            "present" => Some(AttendanceStatus::Present),
            "absent" => Some(AttendanceStatus::Absent),
            "excused" => Some(AttendanceStatus::Excused),
            "late" => Some(AttendanceStatus::Late),
            _ => None,
        }
    }
}

/// Per-status attendance counts over some range. `total` counts every record
/// in the range; the four categories are mutually exclusive.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatusCounts {
    pub total: i64,
    pub present: i64,
    pub absent: i64,
    pub excused: i64,
    pub late: i64,
}

impl StatusCounts {
    /// `total` must equal the sum of the categories; a mismatch means a row
    /// carries a status outside the four-value set.
    pub fn is_consistent(&self) -> bool {
        self.total == self.present + self.absent + self.excused + self.late
    }
}

pub fn round_1_decimal(x: f64) -> f64 {
    (x * 10.0).round() / 10.0
}

/// Share of `count` in `total` as a percentage with 1-decimal rounding.
/// None when total is zero; callers surface that as null rather than divide.
pub fn percent_share(count: i64, total: i64) -> Option<f64> {
    if total == 0 {
        return None;
    }
    Some(round_1_decimal(count as f64 * 100.0 / total as f64))
}

/// Monday..Sunday bounds of the week containing `anchor`.
pub fn week_bounds(anchor: NaiveDate) -> (NaiveDate, NaiveDate) {
    let start = anchor - Duration::days(anchor.weekday().num_days_from_monday() as i64);
    (start, start + Duration::days(6))
}

/// Default statistics range: the trailing 30 days ending today, inclusive.
pub fn default_range(today: NaiveDate) -> (NaiveDate, NaiveDate) {
    (today - Duration::days(30), today)
}
