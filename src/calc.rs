use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::model::{AttendanceRecord, AttendanceStatus, DayPeriodRange, Student};

/// Two-decimal rounding used for every published rate.
pub fn round2(x: f64) -> f64 {
    (x * 100.0).round() / 100.0
}

/// Percentage of `part` over `whole`, rounded to two decimals, clamped to
/// [0, 100]. Zero when the denominator is not positive.
pub fn rate(part: u32, whole: i64) -> f64 {
    if whole <= 0 {
        return 0.0;
    }
    round2(part as f64 / whole as f64 * 100.0).clamp(0.0, 100.0)
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusTally {
    pub present: u32,
    pub absent: u32,
    pub late: u32,
    pub early_leave: u32,
    pub leave: u32,
    pub sick: u32,
    pub home_school: u32,
    pub home_return: u32,
}

impl StatusTally {
    pub fn add(&mut self, status: AttendanceStatus) {
        match status {
            AttendanceStatus::Present => self.present += 1,
            AttendanceStatus::Absent => self.absent += 1,
            AttendanceStatus::Late => self.late += 1,
            AttendanceStatus::EarlyLeave => self.early_leave += 1,
            AttendanceStatus::Leave => self.leave += 1,
            AttendanceStatus::Sick => self.sick += 1,
            AttendanceStatus::HomeSchool => self.home_school += 1,
            AttendanceStatus::HomeReturn => self.home_return += 1,
        }
    }

    pub fn total(&self) -> u32 {
        self.present
            + self.absent
            + self.late
            + self.early_leave
            + self.leave
            + self.sick
            + self.home_school
            + self.home_return
    }

    pub fn from_records<'a, I>(records: I) -> Self
    where
        I: IntoIterator<Item = &'a AttendanceRecord>,
    {
        let mut t = StatusTally::default();
        for r in records {
            t.add(r.status);
        }
        t
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AttendanceStats {
    pub student_id: String,
    pub total_periods: u32,
    #[serde(flatten)]
    pub tally: StatusTally,
    pub attendance_rate: f64,
}

/// Tally one student's records in a single pass.
///
/// `attendanceRate = present / (total_periods - homeSchool)`; home-school
/// periods never count against the student.
pub fn calculate_attendance_stats(
    student: &Student,
    records: &[AttendanceRecord],
    total_periods: u32,
) -> AttendanceStats {
    let tally = StatusTally::from_records(records.iter().filter(|r| r.student_id == student.id));
    let effective_total = total_periods as i64 - tally.home_school as i64;
    AttendanceStats {
        student_id: student.id.clone(),
        total_periods,
        tally,
        attendance_rate: rate(tally.present, effective_total),
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OverallStats {
    pub total_students: usize,
    pub avg_attendance_rate: f64,
    pub total_absent: u32,
    pub total_late: u32,
}

/// Roll per-student stats up into one summary. The average is the plain mean
/// of the student rates.
pub fn summarize<'a, I>(stats: I) -> OverallStats
where
    I: IntoIterator<Item = &'a AttendanceStats>,
{
    let mut overall = OverallStats {
        total_students: 0,
        avg_attendance_rate: 0.0,
        total_absent: 0,
        total_late: 0,
    };
    let mut rate_sum = 0.0;
    for st in stats {
        overall.total_students += 1;
        overall.total_absent += st.tally.absent;
        overall.total_late += st.tally.late;
        rate_sum += st.attendance_rate;
    }
    if overall.total_students > 0 {
        overall.avg_attendance_rate = round2(rate_sum / overall.total_students as f64);
    }
    overall
}

pub fn is_home_school_day(student: &Student, date: NaiveDate) -> bool {
    if !student.is_home_school {
        return false;
    }
    match (student.home_school_start_date, student.home_school_end_date) {
        (Some(start), Some(end)) => start <= date && date <= end,
        _ => false,
    }
}

pub fn is_home_return_period(student: &Student, period: u8) -> bool {
    student.is_home_return
        && student
            .home_return_start_period
            .map(|start| period >= start)
            .unwrap_or(false)
}

/// Status shown for a cell: the recorded one, else the implicit
/// home-school / home-return state.
pub fn effective_status(
    student: &Student,
    date: NaiveDate,
    period: u8,
    recorded: Option<AttendanceStatus>,
) -> Option<AttendanceStatus> {
    if recorded.is_some() {
        return recorded;
    }
    if is_home_school_day(student, date) {
        return Some(AttendanceStatus::HomeSchool);
    }
    if is_home_return_period(student, period) {
        return Some(AttendanceStatus::HomeReturn);
    }
    None
}

/// Whether a cell carries an implicit state that an empty write must not clear.
pub fn is_implicitly_fixed(student: &Student, date: NaiveDate, period: u8) -> bool {
    is_home_return_period(student, period) || is_home_school_day(student, date)
}

/// Scheduled periods across the day-period ranges that fall in the window.
pub fn total_periods_in_ranges(
    ranges: &[DayPeriodRange],
    start: Option<NaiveDate>,
    end: Option<NaiveDate>,
) -> u32 {
    ranges
        .iter()
        .filter(|r| start.map(|s| r.date >= s).unwrap_or(true))
        .filter(|r| end.map(|e| r.date <= e).unwrap_or(true))
        .map(|r| (r.end_period as i64 - r.start_period as i64 + 1).max(0) as u32)
        .sum()
}
