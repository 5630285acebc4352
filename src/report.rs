use std::collections::{BTreeMap, BTreeSet, HashMap};

use anyhow::Result;
use chrono::{Datelike, Duration, NaiveDate, Weekday};
use serde::{Deserialize, Serialize};

use crate::calc::{self, rate, round2, StatusTally};
use crate::calendar;
use crate::model::{
    format_date, AttendanceRecord, AttendanceStatus, Student, MAX_CLASS, MAX_GRADE, MAX_PERIOD,
    MIN_CLASS, MIN_GRADE,
};

/// Denominator for the weekly absence alert rate.
const WEEK_DAYS: u32 = 7;

/// Tunables for insights and alerts. Stored as the `reports` settings section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ReportSettings {
    pub late_rate_week_increase: f64,
    pub late_rate_week_decrease: f64,
    pub late_rate_month_increase: f64,
    pub absent_rate_week_increase: f64,
    pub class_attendance_floor: f64,
    pub grade_attendance_floor: f64,
    pub completion_rate: f64,
    pub return_window_days: i64,
    pub health_keywords: Vec<String>,
}

impl Default for ReportSettings {
    fn default() -> Self {
        Self {
            late_rate_week_increase: 10.0,
            late_rate_week_decrease: -5.0,
            late_rate_month_increase: 15.0,
            absent_rate_week_increase: 5.0,
            class_attendance_floor: 90.0,
            grade_attendance_floor: 85.0,
            completion_rate: 66.7,
            return_window_days: 7,
            health_keywords: vec!["양호".to_string(), "nurse".to_string()],
        }
    }
}

pub struct ReportInputs<'a> {
    pub students: &'a [Student],
    pub settings: &'a ReportSettings,
    pub night_study_start_period: u8,
    pub today: NaiveDate,
    pub generated_at: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupStats {
    pub total_students: u32,
    pub total_periods: u32,
    #[serde(flatten)]
    pub tally: StatusTally,
    pub attendance_rate: f64,
    pub late_rate: f64,
    pub absent_rate: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GradeWeeklyStats {
    pub grade: u8,
    #[serde(flatten)]
    pub stats: GroupStats,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassWeeklyStats {
    pub grade: u8,
    #[serde(rename = "class")]
    pub class_num: u8,
    #[serde(flatten)]
    pub stats: GroupStats,
    pub previous_week_stats: Option<GroupStats>,
    pub previous_month_stats: Option<GroupStats>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InsightKind {
    Warning,
    Info,
    Positive,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WeeklyInsight {
    #[serde(rename = "type")]
    pub kind: InsightKind,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub grade: Option<u8>,
    #[serde(default, rename = "class", skip_serializing_if = "Option::is_none")]
    pub class_num: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metric: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub change: Option<i64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    High,
    Medium,
    Low,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertCategory {
    RepeatedLate,
    HealthIssue,
    NightStudyAbsence,
    AbsentAccumulation,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlertData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repeated_days: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub period: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub health_visit_count: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub night_study_absence_days: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub absent_days: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attendance_rate: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PriorityAlert {
    pub id: String,
    pub student_id: String,
    pub student_name: String,
    pub grade: u8,
    #[serde(rename = "class")]
    pub class_num: u8,
    pub priority: Priority,
    pub category: AlertCategory,
    pub title: String,
    pub description: String,
    pub recommendation: String,
    pub data: AlertData,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DayPattern {
    pub day: String,
    pub late_rate: f64,
    pub early_leave_rate: f64,
    pub absent_rate: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PeriodPattern {
    pub period: u8,
    pub absent_rate: f64,
    pub early_leave_rate: f64,
    pub health_visit_rate: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PatternInsights {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fatigue_day: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub concentration_period: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub health_issue_period: Option<u8>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PatternAnalysis {
    pub day_of_week_pattern: Vec<DayPattern>,
    pub period_pattern: Vec<PeriodPattern>,
    pub insights: PatternInsights,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HomeSchoolAlertKind {
    HomeSchoolReturn,
    AbsentWarning,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HomeSchoolAlert {
    pub student_id: String,
    pub student_name: String,
    pub grade: u8,
    #[serde(rename = "class")]
    pub class_num: u8,
    #[serde(rename = "type")]
    pub kind: HomeSchoolAlertKind,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub days_remaining: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attendance_rate: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub absent_days: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub required_attendance_rate: Option<f64>,
    pub risk_level: Priority,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WeeklyReport {
    pub id: String,
    pub week_start_date: NaiveDate,
    pub week_end_date: NaiveDate,
    pub generated_at: String,
    pub grade_stats: BTreeMap<String, GradeWeeklyStats>,
    pub class_stats: BTreeMap<String, ClassWeeklyStats>,
    pub insights: Vec<WeeklyInsight>,
    pub priority_alerts: Vec<PriorityAlert>,
    pub pattern_analysis: PatternAnalysis,
    pub home_school_alerts: Vec<HomeSchoolAlert>,
}

/// Build the report for the Monday..Sunday week containing `target`.
///
/// `load(start, end)` returns every record dated within the inclusive
/// window, already resolved to the right session per day.
pub fn generate_weekly_report<F>(
    target: NaiveDate,
    inputs: &ReportInputs<'_>,
    mut load: F,
) -> Result<WeeklyReport>
where
    F: FnMut(NaiveDate, NaiveDate) -> Result<Vec<AttendanceRecord>>,
{
    let (week_start, week_end) = calendar::week_bounds(target);
    let (prev_week_start, prev_week_end) = (
        week_start - Duration::days(7),
        week_end - Duration::days(7),
    );
    let (prev_month_start, prev_month_end) = calendar::previous_month_bounds(week_start);

    let week = load(week_start, week_end)?;
    let prev_week = load(prev_week_start, prev_week_end)?;
    let prev_month = load(prev_month_start, prev_month_end)?;
    let year_to_date = load(calendar::year_start(week_start), week_end)?;

    let roster = Roster::new(inputs.students);
    let settings = inputs.settings;

    let week_by_class = roster.by_class(&week);
    let prev_week_by_class = roster.by_class(&prev_week);
    let prev_month_by_class = roster.by_class(&prev_month);

    let mut grade_stats = BTreeMap::new();
    for grade in MIN_GRADE..=MAX_GRADE {
        let records = week_by_class
            .iter()
            .filter(|((g, _), _)| *g == grade)
            .flat_map(|(_, v)| v.iter().copied());
        grade_stats.insert(
            grade.to_string(),
            GradeWeeklyStats {
                grade,
                stats: group_stats(roster.count_in(grade, None), records),
            },
        );
    }

    let mut class_stats = BTreeMap::new();
    for grade in MIN_GRADE..=MAX_GRADE {
        for class_num in MIN_CLASS..=MAX_CLASS {
            let key = (grade, class_num);
            let students = roster.count_in(grade, Some(class_num));
            class_stats.insert(
                format!("{}-{}", grade, class_num),
                ClassWeeklyStats {
                    grade,
                    class_num,
                    stats: group_stats(students, in_group(&week_by_class, key)),
                    previous_week_stats: Some(group_stats(students, in_group(&prev_week_by_class, key))),
                    previous_month_stats: Some(group_stats(
                        students,
                        in_group(&prev_month_by_class, key),
                    )),
                },
            );
        }
    }

    let insights = generate_insights(&class_stats, &grade_stats, settings);
    let priority_alerts = generate_priority_alerts(
        inputs.students,
        &week,
        &prev_week,
        week_start,
        settings,
        inputs.night_study_start_period,
    );
    let pattern_analysis = generate_pattern_analysis(&roster, &week, settings);
    let home_school_alerts =
        generate_home_school_alerts(inputs.students, &year_to_date, inputs.today, settings);

    Ok(WeeklyReport {
        id: calendar::iso_week_id(week_start),
        week_start_date: week_start,
        week_end_date: week_end,
        generated_at: inputs.generated_at.clone(),
        grade_stats,
        class_stats,
        insights,
        priority_alerts,
        pattern_analysis,
        home_school_alerts,
    })
}

struct Roster<'a> {
    students: &'a [Student],
    by_id: HashMap<&'a str, &'a Student>,
}

impl<'a> Roster<'a> {
    fn new(students: &'a [Student]) -> Self {
        let by_id = students.iter().map(|s| (s.id.as_str(), s)).collect();
        Self { students, by_id }
    }

    fn get(&self, id: &str) -> Option<&'a Student> {
        self.by_id.get(id).copied()
    }

    fn count_in(&self, grade: u8, class_num: Option<u8>) -> u32 {
        self.students
            .iter()
            .filter(|s| s.grade == grade && class_num.map(|c| s.class_num == c).unwrap_or(true))
            .count() as u32
    }

    /// Records of rostered students grouped by (grade, class).
    fn by_class<'r>(
        &self,
        records: &'r [AttendanceRecord],
    ) -> HashMap<(u8, u8), Vec<&'r AttendanceRecord>> {
        let mut out: HashMap<(u8, u8), Vec<&AttendanceRecord>> = HashMap::new();
        for r in records {
            if let Some(s) = self.get(&r.student_id) {
                out.entry((s.grade, s.class_num)).or_default().push(r);
            }
        }
        out
    }
}

fn in_group<'m, 'r>(
    grouped: &'m HashMap<(u8, u8), Vec<&'r AttendanceRecord>>,
    key: (u8, u8),
) -> impl Iterator<Item = &'r AttendanceRecord> + 'm
where
    'r: 'm,
{
    grouped.get(&key).into_iter().flatten().copied()
}

fn group_stats<'r, I>(total_students: u32, records: I) -> GroupStats
where
    I: IntoIterator<Item = &'r AttendanceRecord>,
{
    let tally = StatusTally::from_records(records);
    let total_periods = tally.total();
    let effective = total_periods as i64 - tally.home_school as i64;
    GroupStats {
        total_students,
        total_periods,
        tally,
        attendance_rate: rate(tally.present, effective),
        late_rate: rate(tally.late, effective),
        absent_rate: rate(tally.absent, effective),
    }
}

fn is_health_visit(r: &AttendanceRecord, keywords: &[String]) -> bool {
    r.status == AttendanceStatus::Sick
        || r
            .note
            .as_deref()
            .map(|n| keywords.iter().any(|k| !k.is_empty() && n.contains(k.as_str())))
            .unwrap_or(false)
}

fn class_insight(
    kind: InsightKind,
    message: String,
    grade: u8,
    class_num: u8,
    metric: &str,
    change: Option<f64>,
) -> WeeklyInsight {
    WeeklyInsight {
        kind,
        message,
        grade: Some(grade),
        class_num: Some(class_num),
        metric: Some(metric.to_string()),
        change: change.map(|c| c.round() as i64),
    }
}

fn generate_insights(
    class_stats: &BTreeMap<String, ClassWeeklyStats>,
    grade_stats: &BTreeMap<String, GradeWeeklyStats>,
    settings: &ReportSettings,
) -> Vec<WeeklyInsight> {
    let mut insights = Vec::new();

    for cs in class_stats.values() {
        let (g, c, cur) = (cs.grade, cs.class_num, &cs.stats);
        if cur.total_periods == 0 {
            continue;
        }
        let prev_week = cs.previous_week_stats.as_ref().filter(|p| p.total_periods > 0);
        let prev_month = cs.previous_month_stats.as_ref().filter(|p| p.total_periods > 0);

        if let Some(prev) = prev_week {
            let delta = cur.late_rate - prev.late_rate;
            if delta > settings.late_rate_week_increase {
                insights.push(class_insight(
                    InsightKind::Warning,
                    format!(
                        "Late rate in grade {} class {} rose {}pp over last week; a check-in may be needed.",
                        g, c, delta.round()
                    ),
                    g,
                    c,
                    "late_rate",
                    Some(delta),
                ));
            } else if delta < settings.late_rate_week_decrease {
                insights.push(class_insight(
                    InsightKind::Positive,
                    format!(
                        "Late rate in grade {} class {} improved {}pp over last week.",
                        g, c, delta.abs().round()
                    ),
                    g,
                    c,
                    "late_rate",
                    Some(delta),
                ));
            }
        }

        if let Some(prev) = prev_month {
            let delta = cur.late_rate - prev.late_rate;
            if delta > settings.late_rate_month_increase {
                insights.push(class_insight(
                    InsightKind::Warning,
                    format!(
                        "Late rate in grade {} class {} rose {}pp over last month; a check-in may be needed.",
                        g, c, delta.round()
                    ),
                    g,
                    c,
                    "late_rate",
                    Some(delta),
                ));
            }
        }

        if let Some(prev) = prev_week {
            let delta = cur.absent_rate - prev.absent_rate;
            if delta > settings.absent_rate_week_increase {
                insights.push(class_insight(
                    InsightKind::Warning,
                    format!(
                        "Absence rate in grade {} class {} rose {}pp over last week.",
                        g, c, delta.round()
                    ),
                    g,
                    c,
                    "absent_rate",
                    Some(delta),
                ));
            }
        }

        if cur.attendance_rate < settings.class_attendance_floor {
            insights.push(class_insight(
                InsightKind::Warning,
                format!(
                    "Attendance in grade {} class {} is low at {}%.",
                    g, c, cur.attendance_rate.round()
                ),
                g,
                c,
                "attendance_rate",
                None,
            ));
        }
    }

    for gs in grade_stats.values() {
        if gs.stats.total_periods == 0 {
            continue;
        }
        if gs.stats.attendance_rate < settings.grade_attendance_floor {
            insights.push(WeeklyInsight {
                kind: InsightKind::Info,
                message: format!(
                    "Grade {} attendance is {}% overall.",
                    gs.grade,
                    gs.stats.attendance_rate.round()
                ),
                grade: Some(gs.grade),
                class_num: None,
                metric: Some("attendance_rate".to_string()),
                change: None,
            });
        }
    }

    if insights.is_empty() {
        insights.push(WeeklyInsight {
            kind: InsightKind::Positive,
            message: "Attendance looks healthy this week.".to_string(),
            grade: None,
            class_num: None,
            metric: None,
            change: None,
        });
    }
    insights
}

fn student_alert(
    student: &Student,
    suffix: &str,
    category: AlertCategory,
    title: &str,
    description: String,
    recommendation: &str,
    data: AlertData,
) -> PriorityAlert {
    PriorityAlert {
        id: format!("alert-{}-{}", student.id, suffix),
        student_id: student.id.clone(),
        student_name: student.name.clone(),
        grade: student.grade,
        class_num: student.class_num,
        priority: Priority::High,
        category,
        title: title.to_string(),
        description,
        recommendation: recommendation.to_string(),
        data,
    }
}

fn generate_priority_alerts(
    students: &[Student],
    week: &[AttendanceRecord],
    prev_week: &[AttendanceRecord],
    week_start: NaiveDate,
    settings: &ReportSettings,
    night_start: u8,
) -> Vec<PriorityAlert> {
    let mut alerts = Vec::new();
    let week_by_student = group_by_student(week);
    let prev_by_student = group_by_student(prev_week);
    let keywords = settings.health_keywords.as_slice();

    for student in students {
        let cur = week_by_student.get(student.id.as_str()).map(Vec::as_slice).unwrap_or(&[]);
        let prev = prev_by_student.get(student.id.as_str()).map(Vec::as_slice).unwrap_or(&[]);

        let monday_late = cur
            .iter()
            .filter(|r| r.status == AttendanceStatus::Late && r.date.weekday() == Weekday::Mon)
            .count();
        let prev_monday_first_late = monday_first_period_lates(prev);
        if monday_late >= 2 && prev_monday_first_late >= 1 {
            alerts.push(student_alert(
                student,
                "repeated-late",
                AlertCategory::RepeatedLate,
                "Repeated lateness",
                format!(
                    "{} has been late to Monday period 1 two weeks running.",
                    student.name
                ),
                "Review the weekend return routine.",
                AlertData {
                    repeated_days: Some(vec![Weekday::Mon.to_string()]),
                    period: Some(1),
                    ..Default::default()
                },
            ));
        }

        let health = cur.iter().filter(|r| is_health_visit(r, keywords)).count() as u32;
        let prev_health = prev.iter().filter(|r| is_health_visit(r, keywords)).count() as u32;
        if health >= 3 && health > prev_health * 2 {
            alerts.push(student_alert(
                student,
                "health",
                AlertCategory::HealthIssue,
                "Spike in health-room visits",
                format!(
                    "{} visited the health room {} times this week.",
                    student.name, health
                ),
                "Check on the student's health.",
                AlertData {
                    health_visit_count: Some(health),
                    ..Default::default()
                },
            ));
        }

        let night_days = night_study_absence_days(cur, week_start, night_start);
        if night_days.len() >= 3 {
            alerts.push(student_alert(
                student,
                "night-study",
                AlertCategory::NightStudyAbsence,
                "Leaving evening study",
                format!(
                    "{} attended regular classes but left evening study (period {} and later) on {} days.",
                    student.name,
                    night_start,
                    night_days.len()
                ),
                "Cross-check with the dormitory supervisor.",
                AlertData {
                    night_study_absence_days: Some(night_days),
                    ..Default::default()
                },
            ));
        }

        let absent = cur
            .iter()
            .filter(|r| {
                r.status == AttendanceStatus::Absent && !calc::is_home_school_day(student, r.date)
            })
            .count() as u32;
        if absent >= 3 {
            let week_rate = rate(WEEK_DAYS.saturating_sub(absent), WEEK_DAYS as i64);
            alerts.push(student_alert(
                student,
                "absent",
                AlertCategory::AbsentAccumulation,
                "Accumulated absences",
                format!("{} has {} absences recorded this week.", student.name, absent),
                "A parent meeting may be needed.",
                AlertData {
                    absent_days: Some(absent),
                    attendance_rate: Some(week_rate),
                    ..Default::default()
                },
            ));
        }
    }

    alerts.sort_by_key(|a| a.priority);
    alerts
}

fn monday_first_period_lates(prev: &[&AttendanceRecord]) -> usize {
    prev.iter()
        .filter(|r| {
            r.date.weekday() == Weekday::Mon && r.status == AttendanceStatus::Late && r.period == 1
        })
        .count()
}

/// Days on which the student was present for every recorded regular period,
/// present for some evening period, and absent or left early for another.
fn night_study_absence_days(
    records: &[&AttendanceRecord],
    week_start: NaiveDate,
    night_start: u8,
) -> Vec<String> {
    let mut out = Vec::new();
    for day in calendar::days_inclusive(week_start, week_start + Duration::days(6)) {
        let (night, regular): (Vec<&AttendanceRecord>, Vec<&AttendanceRecord>) = records
            .iter()
            .copied()
            .filter(|r| r.date == day)
            .partition(|r| r.period >= night_start);
        let left = night
            .iter()
            .any(|r| matches!(r.status, AttendanceStatus::Absent | AttendanceStatus::EarlyLeave));
        let stayed = night.iter().any(|r| r.status == AttendanceStatus::Present);
        let regular_present = !regular.is_empty()
            && regular.iter().all(|r| r.status == AttendanceStatus::Present);
        if left && stayed && regular_present {
            out.push(day.weekday().to_string());
        }
    }
    out
}

fn group_by_student(records: &[AttendanceRecord]) -> HashMap<&str, Vec<&AttendanceRecord>> {
    let mut out: HashMap<&str, Vec<&AttendanceRecord>> = HashMap::new();
    for r in records {
        out.entry(r.student_id.as_str()).or_default().push(r);
    }
    out
}

fn pct(part: usize, whole: usize) -> f64 {
    rate(part as u32, whole as i64)
}

fn generate_pattern_analysis(
    roster: &Roster<'_>,
    week: &[AttendanceRecord],
    settings: &ReportSettings,
) -> PatternAnalysis {
    let counted_absent = |r: &AttendanceRecord| {
        r.status == AttendanceStatus::Absent
            && roster
                .get(&r.student_id)
                .map(|s| !calc::is_home_school_day(s, r.date))
                .unwrap_or(false)
    };

    let weekdays = [Weekday::Mon, Weekday::Tue, Weekday::Wed, Weekday::Thu, Weekday::Fri];
    let day_of_week_pattern: Vec<DayPattern> = weekdays
        .iter()
        .map(|wd| {
            let recs: Vec<&AttendanceRecord> =
                week.iter().filter(|r| r.date.weekday() == *wd).collect();
            let n = recs.len();
            DayPattern {
                day: wd.to_string(),
                late_rate: pct(recs.iter().filter(|r| r.status == AttendanceStatus::Late).count(), n),
                early_leave_rate: pct(
                    recs.iter().filter(|r| r.status == AttendanceStatus::EarlyLeave).count(),
                    n,
                ),
                absent_rate: pct(recs.iter().filter(|&&r| counted_absent(r)).count(), n),
            }
        })
        .collect();

    let period_pattern: Vec<PeriodPattern> = (1..=MAX_PERIOD)
        .map(|period| {
            let recs: Vec<&AttendanceRecord> = week.iter().filter(|r| r.period == period).collect();
            let n = recs.len();
            PeriodPattern {
                period,
                absent_rate: pct(recs.iter().filter(|&&r| counted_absent(r)).count(), n),
                early_leave_rate: pct(
                    recs.iter().filter(|r| r.status == AttendanceStatus::EarlyLeave).count(),
                    n,
                ),
                health_visit_rate: pct(
                    recs.iter().filter(|r| is_health_visit(r, &settings.health_keywords)).count(),
                    n,
                ),
            }
        })
        .collect();

    let insights = PatternInsights {
        fatigue_day: argmax(&day_of_week_pattern, |d| {
            d.late_rate + d.early_leave_rate + d.absent_rate
        })
        .map(|d| d.day.clone()),
        concentration_period: argmax(&period_pattern, |p| p.absent_rate + p.early_leave_rate)
            .map(|p| p.period),
        health_issue_period: argmax(&period_pattern, |p| p.health_visit_rate).map(|p| p.period),
    };

    PatternAnalysis {
        day_of_week_pattern,
        period_pattern,
        insights,
    }
}

/// First item with the strictly greatest positive score.
fn argmax<T>(items: &[T], score: impl Fn(&T) -> f64) -> Option<&T> {
    let mut best: Option<(&T, f64)> = None;
    for item in items {
        let s = score(item);
        if s > best.map(|(_, b)| b).unwrap_or(0.0) {
            best = Some((item, s));
        }
    }
    best.map(|(item, _)| item)
}

fn generate_home_school_alerts(
    students: &[Student],
    year_to_date: &[AttendanceRecord],
    today: NaiveDate,
    settings: &ReportSettings,
) -> Vec<HomeSchoolAlert> {
    let mut alerts = Vec::new();
    let by_student = group_by_student(year_to_date);
    let required = settings.completion_rate;

    for student in students {
        let base = |kind, message, risk_level| HomeSchoolAlert {
            student_id: student.id.clone(),
            student_name: student.name.clone(),
            grade: student.grade,
            class_num: student.class_num,
            kind,
            message,
            days_remaining: None,
            attendance_rate: None,
            absent_days: None,
            required_attendance_rate: None,
            risk_level,
        };

        if let (true, Some(end)) = (student.is_home_school, student.home_school_end_date) {
            let days_remaining = (end - today).num_days();
            if (0..=settings.return_window_days).contains(&days_remaining) {
                let mut alert = base(
                    HomeSchoolAlertKind::HomeSchoolReturn,
                    format!(
                        "{} returns from home schooling in {} days ({}).",
                        student.name,
                        days_remaining,
                        format_date(end)
                    ),
                    if days_remaining <= 3 { Priority::High } else { Priority::Medium },
                );
                alert.days_remaining = Some(days_remaining);
                alerts.push(alert);
            }
        }

        let records = by_student.get(student.id.as_str()).map(Vec::as_slice).unwrap_or(&[]);
        let days: BTreeSet<NaiveDate> = records.iter().map(|r| r.date).collect();
        let absent_days = days
            .iter()
            .filter(|d| {
                records.iter().any(|r| {
                    r.date == **d
                        && r.status == AttendanceStatus::Absent
                        && !calc::is_home_school_day(student, **d)
                })
            })
            .count() as i64;
        let total_days = days.len() as i64;
        let attendance_rate = if total_days > 0 {
            round2((total_days - absent_days) as f64 / total_days as f64 * 100.0)
        } else {
            100.0
        };
        let max_absent = (total_days as f64 * (1.0 - required / 100.0)).floor() as i64;
        let remaining = max_absent - absent_days;

        if attendance_rate < required && remaining <= 5 {
            let risk = if remaining <= 2 { Priority::High } else { Priority::Medium };
            let mut alert = base(
                HomeSchoolAlertKind::AbsentWarning,
                format!(
                    "{} has attended {:.1}% of school days so far this year.",
                    student.name, attendance_rate
                ),
                risk,
            );
            alert.attendance_rate = Some(attendance_rate);
            alert.absent_days = Some(absent_days as u32);
            alert.required_attendance_rate = Some(required);
            alerts.push(alert);
        }
    }
    alerts
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").expect("date")
    }

    fn student(id: &str, grade: u8, class_num: u8, number: u32) -> Student {
        Student {
            id: id.to_string(),
            name: format!("Student {}", id),
            grade,
            class_num,
            number,
            is_home_school: false,
            home_school_start_date: None,
            home_school_end_date: None,
            is_home_return: false,
            home_return_start_period: None,
            is_friendship_class: false,
        }
    }

    fn rec(sid: &str, date: &str, period: u8, status: AttendanceStatus) -> AttendanceRecord {
        AttendanceRecord {
            id: AttendanceRecord::record_id(sid, d(date), period),
            student_id: sid.to_string(),
            date: d(date),
            period,
            status,
            note: None,
            session_id: None,
        }
    }

    fn day(sid: &str, date: &str, periods: u8, status: AttendanceStatus) -> Vec<AttendanceRecord> {
        (1..=periods).map(|p| rec(sid, date, p, status)).collect()
    }

    fn run(students: &[Student], records: &[AttendanceRecord], today: &str) -> WeeklyReport {
        let settings = ReportSettings::default();
        let inputs = ReportInputs {
            students,
            settings: &settings,
            night_study_start_period: 8,
            today: d(today),
            generated_at: "2024-03-08 12:00:00".to_string(),
        };
        generate_weekly_report(d("2024-03-06"), &inputs, |s, e| {
            Ok(records
                .iter()
                .filter(|r| r.date >= s && r.date <= e)
                .cloned()
                .collect())
        })
        .expect("report")
    }

    #[test]
    fn empty_roster_still_covers_every_group() {
        let r = run(&[], &[], "2024-03-08");
        assert_eq!(r.id, "2024-W10");
        assert_eq!(r.week_start_date, d("2024-03-04"));
        assert_eq!(r.week_end_date, d("2024-03-10"));
        assert_eq!(r.grade_stats.len(), 3);
        assert_eq!(r.class_stats.len(), 18);
        assert!(r.class_stats.contains_key("3-6"));
        assert_eq!(r.insights.len(), 1);
        assert_eq!(r.insights[0].kind, InsightKind::Positive);
        assert!(r.priority_alerts.is_empty());
        assert_eq!(r.pattern_analysis.day_of_week_pattern.len(), 5);
        assert_eq!(r.pattern_analysis.period_pattern.len(), 12);
        assert_eq!(r.pattern_analysis.insights, PatternInsights::default());
    }

    #[test]
    fn group_rates_exclude_home_school_periods() {
        let students = vec![student("a", 1, 1, 1), student("b", 1, 1, 2)];
        let mut records = day("a", "2024-03-04", 4, AttendanceStatus::Present);
        records.push(rec("b", "2024-03-04", 1, AttendanceStatus::Late));
        records.push(rec("b", "2024-03-04", 2, AttendanceStatus::Absent));
        records.push(rec("b", "2024-03-04", 3, AttendanceStatus::HomeSchool));
        records.push(rec("b", "2024-03-04", 4, AttendanceStatus::HomeSchool));
        records.push(rec("ghost", "2024-03-04", 1, AttendanceStatus::Absent));
        let r = run(&students, &records, "2024-03-08");

        let c = &r.class_stats["1-1"].stats;
        assert_eq!(c.total_students, 2);
        assert_eq!(c.total_periods, 8);
        assert_eq!(c.tally.present, 4);
        assert_eq!(c.attendance_rate, 66.67);
        assert_eq!(c.late_rate, 16.67);
        assert_eq!(c.absent_rate, 16.67);
        assert_eq!(r.grade_stats["1"].stats, *c);
        assert_eq!(r.grade_stats["2"].stats.total_periods, 0);
    }

    #[test]
    fn rising_lateness_raises_class_warnings() {
        let students = vec![student("a", 2, 3, 1)];
        let mut records = day("a", "2024-02-26", 10, AttendanceStatus::Present);
        records.extend(day("a", "2024-03-04", 8, AttendanceStatus::Present));
        records.push(rec("a", "2024-03-04", 9, AttendanceStatus::Late));
        records.push(rec("a", "2024-03-04", 10, AttendanceStatus::Late));
        let r = run(&students, &records, "2024-03-08");

        let week_warning = r
            .insights
            .iter()
            .find(|i| i.metric.as_deref() == Some("late_rate") && i.message.contains("last week"))
            .expect("late-rate warning");
        assert_eq!(week_warning.kind, InsightKind::Warning);
        assert_eq!(week_warning.change, Some(20));
        assert_eq!((week_warning.grade, week_warning.class_num), (Some(2), Some(3)));
        assert!(r
            .insights
            .iter()
            .any(|i| i.metric.as_deref() == Some("late_rate") && i.message.contains("last month")));
        assert!(r
            .insights
            .iter()
            .any(|i| i.metric.as_deref() == Some("attendance_rate") && i.kind == InsightKind::Warning));
        assert!(r
            .insights
            .iter()
            .any(|i| i.kind == InsightKind::Info && i.grade == Some(2)));
    }

    #[test]
    fn full_attendance_is_healthy() {
        let students = vec![student("a", 1, 1, 1)];
        let records = day("a", "2024-03-04", 8, AttendanceStatus::Present);
        let r = run(&students, &records, "2024-03-08");
        assert_eq!(r.insights.len(), 1);
        assert_eq!(r.insights[0].kind, InsightKind::Positive);
    }

    #[test]
    fn monday_lateness_two_weeks_running() {
        let students = vec![student("a", 1, 1, 1)];
        let records = vec![
            rec("a", "2024-02-26", 1, AttendanceStatus::Late),
            rec("a", "2024-03-04", 1, AttendanceStatus::Late),
            rec("a", "2024-03-04", 2, AttendanceStatus::Late),
        ];
        let r = run(&students, &records, "2024-03-08");
        let alert = r
            .priority_alerts
            .iter()
            .find(|a| a.category == AlertCategory::RepeatedLate)
            .expect("repeated late alert");
        assert_eq!(alert.id, "alert-a-repeated-late");
        assert_eq!(alert.data.repeated_days, Some(vec!["Mon".to_string()]));
        assert_eq!(alert.priority, Priority::High);
    }

    #[test]
    fn health_visits_count_sick_and_nurse_notes() {
        let students = vec![student("a", 1, 1, 1)];
        let mut noted = rec("a", "2024-03-06", 3, AttendanceStatus::Present);
        noted.note = Some("양호실 방문".to_string());
        let records = vec![
            rec("a", "2024-02-27", 2, AttendanceStatus::Sick),
            rec("a", "2024-03-04", 2, AttendanceStatus::Sick),
            rec("a", "2024-03-05", 2, AttendanceStatus::Sick),
            noted,
        ];
        let r = run(&students, &records, "2024-03-08");
        let alert = r
            .priority_alerts
            .iter()
            .find(|a| a.category == AlertCategory::HealthIssue)
            .expect("health alert");
        assert_eq!(alert.data.health_visit_count, Some(3));
        assert_eq!(r.pattern_analysis.insights.health_issue_period, Some(2));
    }

    #[test]
    fn health_visits_must_outpace_last_week() {
        let students = vec![student("a", 1, 1, 1)];
        let mut records = Vec::new();
        for date in ["2024-02-26", "2024-02-27"] {
            records.push(rec("a", date, 1, AttendanceStatus::Sick));
        }
        for date in ["2024-03-04", "2024-03-05", "2024-03-06"] {
            records.push(rec("a", date, 1, AttendanceStatus::Sick));
        }
        let r = run(&students, &records, "2024-03-08");
        assert!(r
            .priority_alerts
            .iter()
            .all(|a| a.category != AlertCategory::HealthIssue));
    }

    #[test]
    fn evening_study_walkouts_on_three_days() {
        let students = vec![student("a", 3, 2, 1)];
        let mut records = Vec::new();
        for date in ["2024-03-04", "2024-03-05", "2024-03-06"] {
            records.extend(day("a", date, 7, AttendanceStatus::Present));
            records.push(rec("a", date, 8, AttendanceStatus::Present));
            records.push(rec("a", date, 9, AttendanceStatus::EarlyLeave));
        }
        // Late in the morning: does not count.
        records.push(rec("a", "2024-03-07", 1, AttendanceStatus::Late));
        records.push(rec("a", "2024-03-07", 8, AttendanceStatus::Present));
        records.push(rec("a", "2024-03-07", 9, AttendanceStatus::Absent));
        let r = run(&students, &records, "2024-03-08");
        let alert = r
            .priority_alerts
            .iter()
            .find(|a| a.category == AlertCategory::NightStudyAbsence)
            .expect("night study alert");
        assert_eq!(
            alert.data.night_study_absence_days,
            Some(vec!["Mon".to_string(), "Tue".to_string(), "Wed".to_string()])
        );
    }

    #[test]
    fn absences_accumulate_per_record() {
        let students = vec![student("a", 1, 2, 1)];
        let mut records = Vec::new();
        for date in ["2024-03-04", "2024-03-05", "2024-03-06"] {
            records.push(rec("a", date, 1, AttendanceStatus::Absent));
            records.push(rec("a", date, 2, AttendanceStatus::Absent));
        }
        records.extend(day("a", "2024-03-07", 8, AttendanceStatus::Present));
        let r = run(&students, &records, "2024-03-08");
        let alert = r
            .priority_alerts
            .iter()
            .find(|a| a.category == AlertCategory::AbsentAccumulation)
            .expect("absence alert");
        assert_eq!(alert.data.absent_days, Some(6));
        assert_eq!(alert.data.attendance_rate, Some(14.29));
    }

    #[test]
    fn a_single_absent_day_can_raise_the_absence_alert() {
        let students = vec![student("a", 1, 2, 1)];
        let mut records = day("a", "2024-03-04", 8, AttendanceStatus::Absent);
        records.extend(day("a", "2024-03-05", 8, AttendanceStatus::Present));
        let r = run(&students, &records, "2024-03-08");
        let alert = r
            .priority_alerts
            .iter()
            .find(|a| a.category == AlertCategory::AbsentAccumulation)
            .expect("absence alert");
        assert_eq!(alert.data.absent_days, Some(8));
        assert_eq!(alert.data.attendance_rate, Some(0.0));
    }

    #[test]
    fn home_school_absences_do_not_accumulate() {
        let mut s = student("a", 1, 2, 1);
        s.is_home_school = true;
        s.home_school_start_date = Some(d("2024-03-01"));
        s.home_school_end_date = Some(d("2024-03-31"));
        let records: Vec<AttendanceRecord> = ["2024-03-04", "2024-03-05", "2024-03-06"]
            .iter()
            .map(|date| rec("a", date, 1, AttendanceStatus::Absent))
            .collect();
        let r = run(&[s], &records, "2024-03-08");
        assert!(r.priority_alerts.is_empty());
        assert!(r
            .home_school_alerts
            .iter()
            .all(|a| a.kind != HomeSchoolAlertKind::AbsentWarning));
    }

    #[test]
    fn fatigue_day_and_weakest_period() {
        let students = vec![student("a", 1, 1, 1), student("b", 1, 1, 2)];
        let mut records = day("a", "2024-03-04", 4, AttendanceStatus::Present);
        records.extend(day("b", "2024-03-05", 4, AttendanceStatus::Present));
        records.push(rec("a", "2024-03-07", 6, AttendanceStatus::Late));
        records.push(rec("b", "2024-03-07", 6, AttendanceStatus::Absent));
        let r = run(&students, &records, "2024-03-08");
        let p = &r.pattern_analysis;
        assert_eq!(p.insights.fatigue_day.as_deref(), Some("Thu"));
        assert_eq!(p.insights.concentration_period, Some(6));
        assert_eq!(p.insights.health_issue_period, None);
        assert_eq!(p.day_of_week_pattern[3].late_rate, 50.0);
        assert_eq!(p.period_pattern[5].absent_rate, 50.0);
    }

    #[test]
    fn home_school_return_window() {
        let mut soon = student("soon", 1, 1, 1);
        soon.is_home_school = true;
        soon.home_school_start_date = Some(d("2024-02-01"));
        soon.home_school_end_date = Some(d("2024-03-10"));
        let mut later = soon.clone();
        later.id = "later".to_string();
        later.home_school_end_date = Some(d("2024-03-14"));
        let mut far = soon.clone();
        far.id = "far".to_string();
        far.home_school_end_date = Some(d("2024-04-30"));
        let r = run(&[soon, later, far], &[], "2024-03-08");
        let returns: Vec<(&str, i64, Priority)> = r
            .home_school_alerts
            .iter()
            .filter(|a| a.kind == HomeSchoolAlertKind::HomeSchoolReturn)
            .map(|a| (a.student_id.as_str(), a.days_remaining.unwrap_or(-1), a.risk_level))
            .collect();
        assert_eq!(
            returns,
            vec![("soon", 2, Priority::High), ("later", 6, Priority::Medium)]
        );
    }

    #[test]
    fn low_year_to_date_attendance_warns() {
        let students = vec![student("a", 1, 1, 1)];
        let mut records = Vec::new();
        for date in ["2024-01-08", "2024-01-09", "2024-01-10", "2024-01-11"] {
            records.push(rec("a", date, 1, AttendanceStatus::Absent));
        }
        for date in ["2024-01-12", "2024-01-15"] {
            records.push(rec("a", date, 1, AttendanceStatus::Present));
        }
        let r = run(&students, &records, "2024-03-08");
        let alert = r
            .home_school_alerts
            .iter()
            .find(|a| a.kind == HomeSchoolAlertKind::AbsentWarning)
            .expect("absent warning");
        assert_eq!(alert.absent_days, Some(4));
        assert_eq!(alert.attendance_rate, Some(33.33));
        assert_eq!(alert.risk_level, Priority::High);
    }

    #[test]
    fn regenerating_the_same_week_is_identical() {
        let students = vec![student("a", 1, 1, 1), student("b", 2, 4, 1)];
        let mut records = day("a", "2024-03-04", 8, AttendanceStatus::Present);
        records.extend(day("b", "2024-03-05", 3, AttendanceStatus::Late));
        records.push(rec("b", "2024-02-27", 1, AttendanceStatus::Absent));
        let first = run(&students, &records, "2024-03-08");
        let second = run(&students, &records, "2024-03-08");
        assert_eq!(first, second);
        assert_eq!(
            serde_json::to_string(&first).expect("json"),
            serde_json::to_string(&second).expect("json")
        );
    }
}
