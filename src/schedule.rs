use chrono::NaiveDate;
use serde::Serialize;

use crate::calendar;
use crate::model::{AttendanceConfig, DayType, Period, PeriodSchedule, SemesterSchedule, MAX_PERIOD};

/// Grades 1 and 2 do not sit the last evening period by default.
pub const DEFAULT_LOWER_GRADE_MAX_PERIOD: u8 = 11;

const DEFAULT_PERIOD_TIMES: [(&str, &str); 12] = [
    ("08:30", "09:20"),
    ("09:30", "10:20"),
    ("10:30", "11:20"),
    ("11:30", "12:20"),
    ("13:20", "14:10"),
    ("14:20", "15:10"),
    ("15:20", "16:10"),
    ("16:20", "17:10"),
    ("19:00", "19:50"),
    ("20:00", "20:50"),
    ("21:00", "21:50"),
    ("22:00", "22:50"),
];

pub fn default_periods() -> Vec<Period> {
    DEFAULT_PERIOD_TIMES
        .iter()
        .enumerate()
        .map(|(i, (start, end))| Period {
            period: (i + 1) as u8,
            start_time: start.to_string(),
            end_time: end.to_string(),
        })
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ScheduleSource {
    Global,
    Session,
    DefaultPeriods,
    BuiltIn,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedDay {
    pub date: NaiveDate,
    pub day_type: DayType,
    pub periods: Vec<Period>,
    pub start_period: u8,
    pub end_period: u8,
    pub source: ScheduleSource,
}

fn max_period(periods: &[Period]) -> u8 {
    periods.iter().map(|p| p.period).max().unwrap_or(0)
}

fn find_schedule(schedules: &[PeriodSchedule], day_type: DayType) -> Option<&PeriodSchedule> {
    schedules
        .iter()
        .find(|ps| ps.day_type == day_type && ps.grade.is_none())
}

/// Work out which periods run on `date`.
///
/// Global schedules win whenever any are configured; otherwise the session
/// config's schedules are used. Without a matching schedule the config's
/// `defaultPeriods` apply, then the built-in 12-period day.
pub fn resolve_day(
    date: NaiveDate,
    semesters: &[SemesterSchedule],
    holidays: &[NaiveDate],
    global_schedules: &[PeriodSchedule],
    config: Option<&AttendanceConfig>,
) -> ResolvedDay {
    let day_type = calendar::day_type(date, semesters, holidays);

    let (candidates, source) = if !global_schedules.is_empty() {
        (global_schedules, ScheduleSource::Global)
    } else {
        (
            config.map(|c| c.period_schedules.as_slice()).unwrap_or(&[]),
            ScheduleSource::Session,
        )
    };

    let mut resolved = match find_schedule(candidates, day_type) {
        Some(schedule) if !schedule.periods.is_empty() => ResolvedDay {
            date,
            day_type,
            periods: schedule.periods.clone(),
            start_period: schedule.start_period.unwrap_or(1),
            end_period: schedule
                .end_period
                .unwrap_or_else(|| max_period(&schedule.periods)),
            source,
        },
        _ => match config.and_then(|c| c.default_periods.as_ref()) {
            Some(periods) if !periods.is_empty() => ResolvedDay {
                date,
                day_type,
                periods: periods.clone(),
                start_period: 1,
                end_period: max_period(periods),
                source: ScheduleSource::DefaultPeriods,
            },
            _ => {
                let periods = default_periods();
                ResolvedDay {
                    date,
                    day_type,
                    end_period: max_period(&periods),
                    periods,
                    start_period: 1,
                    source: ScheduleSource::BuiltIn,
                }
            }
        },
    };

    if let Some(range) = config.and_then(|c| c.day_period_ranges.iter().find(|r| r.date == date)) {
        resolved.start_period = range.start_period;
        resolved.end_period = range.end_period;
    }
    resolved
}

/// Periods shown in the attendance book for one grade.
pub fn visible_periods(day: &ResolvedDay, grade: u8, lower_grade_max: u8) -> Vec<Period> {
    let end = if grade == 1 || grade == 2 {
        day.end_period.min(lower_grade_max)
    } else {
        day.end_period
    };
    let mut out: Vec<Period> = day
        .periods
        .iter()
        .filter(|p| p.period >= day.start_period && p.period <= end)
        .cloned()
        .collect();
    out.sort_by_key(|p| p.period);
    out
}

fn valid_clock(s: &str) -> bool {
    let Some((h, m)) = s.split_once(':') else {
        return false;
    };
    h.len() == 2
        && m.len() == 2
        && h.parse::<u8>().map(|h| h < 24).unwrap_or(false)
        && m.parse::<u8>().map(|m| m < 60).unwrap_or(false)
}

pub fn validate_periods(periods: &[Period]) -> Result<(), String> {
    let mut seen = [false; MAX_PERIOD as usize + 1];
    for p in periods {
        if p.period == 0 || p.period > MAX_PERIOD {
            return Err(format!("period must be in 1..={}", MAX_PERIOD));
        }
        if std::mem::replace(&mut seen[p.period as usize], true) {
            return Err(format!("period {} listed twice", p.period));
        }
        if !valid_clock(&p.start_time) || !valid_clock(&p.end_time) {
            return Err(format!("period {} times must be HH:MM", p.period));
        }
        if p.start_time >= p.end_time {
            return Err(format!("period {} must end after it starts", p.period));
        }
    }
    Ok(())
}

/// Check saved schedules: one period table per day type and grade, bounds in
/// range and ordered.
pub fn validate_schedules(schedules: &[PeriodSchedule]) -> Result<(), String> {
    for (i, ps) in schedules.iter().enumerate() {
        validate_periods(&ps.periods)?;
        let start = ps.start_period.unwrap_or(1);
        let end = ps.end_period.unwrap_or(MAX_PERIOD);
        if start == 0 || end > MAX_PERIOD || start > end {
            return Err(format!(
                "{} schedule range {}..{} is invalid",
                ps.day_type.as_str(),
                start,
                end
            ));
        }
        if schedules[..i]
            .iter()
            .any(|other| other.day_type == ps.day_type && other.grade == ps.grade)
        {
            return Err(format!("duplicate {} schedule", ps.day_type.as_str()));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::DayPeriodRange;

    #[test]
    fn schedule_validation() {
        assert!(validate_schedules(&[weekend_schedule()]).is_ok());
        assert!(validate_schedules(&[weekend_schedule(), weekend_schedule()]).is_err());

        let mut reversed = weekend_schedule();
        reversed.start_period = Some(10);
        reversed.end_period = Some(9);
        assert!(validate_schedules(&[reversed]).is_err());

        let mut bad_time = default_periods();
        bad_time[0].end_time = "8:20".to_string();
        assert!(validate_periods(&bad_time).is_err());

        let mut backwards = default_periods();
        backwards[1].start_time = "10:30".to_string();
        assert!(validate_periods(&backwards).is_err());
    }

    fn d(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").expect("date")
    }

    fn weekend_schedule() -> PeriodSchedule {
        PeriodSchedule {
            day_type: DayType::Weekend,
            periods: default_periods().into_iter().skip(8).collect(),
            start_period: None,
            end_period: None,
            grade: None,
        }
    }

    #[test]
    fn falls_back_to_built_in_day() {
        let r = resolve_day(d("2024-03-04"), &[], &[], &[], None);
        assert_eq!(r.source, ScheduleSource::BuiltIn);
        assert_eq!(r.periods.len(), 12);
        assert_eq!((r.start_period, r.end_period), (1, 12));
    }

    #[test]
    fn global_schedules_take_priority_over_session() {
        let config = AttendanceConfig {
            period_schedules: vec![PeriodSchedule {
                day_type: DayType::Weekend,
                periods: default_periods(),
                start_period: Some(1),
                end_period: Some(4),
                grade: None,
            }],
            ..Default::default()
        };
        let r = resolve_day(d("2024-03-09"), &[], &[], &[weekend_schedule()], Some(&config));
        assert_eq!(r.day_type, DayType::Weekend);
        assert_eq!(r.source, ScheduleSource::Global);
        assert_eq!((r.start_period, r.end_period), (1, 12));
        assert_eq!(r.periods.first().map(|p| p.period), Some(9));
    }

    #[test]
    fn session_schedule_respects_explicit_range() {
        let config = AttendanceConfig {
            period_schedules: vec![PeriodSchedule {
                day_type: DayType::Weekday,
                periods: default_periods(),
                start_period: Some(2),
                end_period: Some(8),
                grade: None,
            }],
            ..Default::default()
        };
        let r = resolve_day(d("2024-03-04"), &[], &[], &[], Some(&config));
        assert_eq!(r.source, ScheduleSource::Session);
        assert_eq!((r.start_period, r.end_period), (2, 8));
    }

    #[test]
    fn grade_specific_schedules_are_ignored() {
        let mut s = weekend_schedule();
        s.grade = Some(3);
        let r = resolve_day(d("2024-03-09"), &[], &[], &[s], None);
        assert_eq!(r.source, ScheduleSource::BuiltIn);
    }

    #[test]
    fn day_period_range_overrides_bounds() {
        let config = AttendanceConfig {
            day_period_ranges: vec![DayPeriodRange {
                date: d("2024-03-05"),
                start_period: 3,
                end_period: 6,
            }],
            ..Default::default()
        };
        let r = resolve_day(d("2024-03-05"), &[], &[], &[], Some(&config));
        assert_eq!((r.start_period, r.end_period), (3, 6));
        let other = resolve_day(d("2024-03-06"), &[], &[], &[], Some(&config));
        assert_eq!((other.start_period, other.end_period), (1, 12));
    }

    #[test]
    fn lower_grades_stop_before_period_twelve() {
        let r = resolve_day(d("2024-03-04"), &[], &[], &[], None);
        assert_eq!(visible_periods(&r, 1, DEFAULT_LOWER_GRADE_MAX_PERIOD).len(), 11);
        assert_eq!(visible_periods(&r, 2, DEFAULT_LOWER_GRADE_MAX_PERIOD).len(), 11);
        assert_eq!(visible_periods(&r, 3, DEFAULT_LOWER_GRADE_MAX_PERIOD).len(), 12);
    }
}
