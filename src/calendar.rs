use chrono::{Datelike, Duration, NaiveDate, Weekday};

use crate::model::{format_date, DayType, SemesterKind, SemesterSchedule};

/// Fixed-date public holidays as (month, day, name).
const FIXED_HOLIDAYS: [(u32, u32, &str); 8] = [
    (1, 1, "New Year's Day"),
    (3, 1, "Independence Movement Day"),
    (5, 5, "Children's Day"),
    (6, 6, "Memorial Day"),
    (8, 15, "Liberation Day"),
    (10, 3, "National Foundation Day"),
    (10, 9, "Hangul Day"),
    (12, 25, "Christmas Day"),
];

/// Classify a date for period-schedule selection.
///
/// Priority: explicit holiday, then weekend, then membership in a vacation
/// range, then weekday. A Saturday inside summer vacation is a weekend.
pub fn day_type(date: NaiveDate, semesters: &[SemesterSchedule], holidays: &[NaiveDate]) -> DayType {
    if holidays.contains(&date) {
        return DayType::Holiday;
    }
    if is_weekend(date) {
        return DayType::Weekend;
    }
    match semester_for_date(date, semesters) {
        Some(s) if s.kind.is_vacation() => DayType::Vacation,
        _ => DayType::Weekday,
    }
}

pub fn is_weekend(date: NaiveDate) -> bool {
    matches!(date.weekday(), Weekday::Sat | Weekday::Sun)
}

pub fn semester_for_date(date: NaiveDate, semesters: &[SemesterSchedule]) -> Option<&SemesterSchedule> {
    semesters.iter().find(|s| s.contains(date))
}

pub fn sort_semesters(semesters: &mut [SemesterSchedule]) {
    semesters.sort_by(|a, b| {
        a.year
            .cmp(&b.year)
            .then_with(|| a.kind.order().cmp(&b.kind.order()))
    });
}

pub fn default_semesters(year: i32) -> Vec<SemesterSchedule> {
    let mk = |y: i32, kind: SemesterKind, start: (u32, u32), end: (u32, u32)| {
        let start_date = NaiveDate::from_ymd_opt(y, start.0, start.1)?;
        let end_date = NaiveDate::from_ymd_opt(y, end.0, end.1)?;
        Some(SemesterSchedule {
            id: format!("{}-{}", y, kind.as_str()),
            name: format!("{} {}", y, kind.display_name()),
            kind,
            start_date,
            end_date,
            year: y,
        })
    };
    [
        mk(year, SemesterKind::FirstSemester, (3, 1), (6, 30)),
        mk(year, SemesterKind::SummerVacation, (7, 1), (8, 31)),
        mk(year, SemesterKind::SecondSemester, (9, 1), (12, 31)),
        mk(year + 1, SemesterKind::WinterVacation, (1, 1), (2, 28)),
    ]
    .into_iter()
    .flatten()
    .collect()
}

/// Fixed public holidays for a year plus substitute Mondays for those that
/// fall on a Sunday. Sorted and deduplicated.
pub fn korean_holidays(year: i32) -> Vec<NaiveDate> {
    let mut out = Vec::new();
    for (month, day, _) in FIXED_HOLIDAYS {
        let Some(date) = NaiveDate::from_ymd_opt(year, month, day) else {
            continue;
        };
        out.push(date);
        if date.weekday() == Weekday::Sun {
            out.push(date + Duration::days(1));
        }
    }
    out.sort();
    out.dedup();
    out
}

pub fn korean_holidays_for_years(start_year: i32, end_year: i32) -> Vec<NaiveDate> {
    let mut out: Vec<NaiveDate> = (start_year..=end_year).flat_map(korean_holidays).collect();
    out.sort();
    out.dedup();
    out
}

pub fn holiday_name(date: NaiveDate) -> String {
    for (month, day, name) in FIXED_HOLIDAYS {
        if date.month() == month && date.day() == day {
            return name.to_string();
        }
        let prev = date - Duration::days(1);
        if date.weekday() == Weekday::Mon && prev.month() == month && prev.day() == day {
            return format!("{} (substitute)", name);
        }
    }
    format_date(date)
}

/// Monday and Sunday of the week containing `date`.
pub fn week_bounds(date: NaiveDate) -> (NaiveDate, NaiveDate) {
    let monday = date - Duration::days(date.weekday().num_days_from_monday() as i64);
    (monday, monday + Duration::days(6))
}

/// First and last day of the calendar month before the one containing `date`.
pub fn previous_month_bounds(date: NaiveDate) -> (NaiveDate, NaiveDate) {
    let first_of_month = date.with_day(1).unwrap_or(date);
    let last_prev = first_of_month - Duration::days(1);
    let first_prev = last_prev.with_day(1).unwrap_or(last_prev);
    (first_prev, last_prev)
}

pub fn year_start(date: NaiveDate) -> NaiveDate {
    NaiveDate::from_ymd_opt(date.year(), 1, 1).unwrap_or(date)
}

pub fn iso_week_id(date: NaiveDate) -> String {
    let w = date.iso_week();
    format!("{}-W{:02}", w.year(), w.week())
}

pub fn days_inclusive(start: NaiveDate, end: NaiveDate) -> impl Iterator<Item = NaiveDate> {
    let mut cur = start;
    std::iter::from_fn(move || {
        if cur > end {
            return None;
        }
        let d = cur;
        cur += Duration::days(1);
        Some(d)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").expect("date")
    }

    fn semesters() -> Vec<SemesterSchedule> {
        default_semesters(2024)
    }

    #[test]
    fn holiday_wins_over_everything() {
        // 2024-08-15 is a Thursday inside summer vacation.
        assert_eq!(day_type(d("2024-08-15"), &semesters(), &[d("2024-08-15")]), DayType::Holiday);
        // Saturday holiday still a holiday.
        assert_eq!(day_type(d("2024-03-02"), &semesters(), &[d("2024-03-02")]), DayType::Holiday);
    }

    #[test]
    fn weekend_is_checked_before_vacation() {
        assert_eq!(day_type(d("2024-07-06"), &semesters(), &[]), DayType::Weekend);
        assert_eq!(day_type(d("2024-07-08"), &semesters(), &[]), DayType::Vacation);
    }

    #[test]
    fn default_is_weekday() {
        assert_eq!(day_type(d("2024-03-04"), &semesters(), &[]), DayType::Weekday);
        assert_eq!(day_type(d("2030-05-14"), &[], &[]), DayType::Weekday);
    }

    #[test]
    fn semester_ranges_are_inclusive() {
        let s = semesters();
        assert_eq!(
            semester_for_date(d("2024-06-30"), &s).map(|x| x.kind),
            Some(SemesterKind::FirstSemester)
        );
        assert_eq!(
            semester_for_date(d("2024-07-01"), &s).map(|x| x.kind),
            Some(SemesterKind::SummerVacation)
        );
        assert!(semester_for_date(d("2024-02-29"), &s).is_none());
    }

    #[test]
    fn sort_orders_by_year_then_term() {
        let mut s = semesters();
        s.reverse();
        sort_semesters(&mut s);
        let kinds: Vec<SemesterKind> = s.iter().map(|x| x.kind).collect();
        assert_eq!(
            kinds,
            vec![
                SemesterKind::FirstSemester,
                SemesterKind::SummerVacation,
                SemesterKind::SecondSemester,
                SemesterKind::WinterVacation
            ]
        );
    }

    #[test]
    fn sunday_holidays_get_a_substitute_monday() {
        // 2022-10-09 (Hangul Day) was a Sunday.
        let h = korean_holidays(2022);
        assert!(h.contains(&d("2022-10-09")));
        assert!(h.contains(&d("2022-10-10")));
        assert_eq!(holiday_name(d("2022-10-10")), "Hangul Day (substitute)");
        assert_eq!(holiday_name(d("2022-12-25")), "Christmas Day");
        // 2024-05-05 was a Sunday: eight fixed dates plus one substitute.
        let h2024 = korean_holidays(2024);
        assert_eq!(h2024.len(), 9);
        assert!(h2024.contains(&d("2024-05-06")));
    }

    #[test]
    fn week_bounds_run_monday_to_sunday() {
        assert_eq!(week_bounds(d("2024-03-06")), (d("2024-03-04"), d("2024-03-10")));
        assert_eq!(week_bounds(d("2024-03-10")), (d("2024-03-04"), d("2024-03-10")));
        assert_eq!(week_bounds(d("2024-03-04")), (d("2024-03-04"), d("2024-03-10")));
    }

    #[test]
    fn previous_month_handles_year_boundary() {
        assert_eq!(previous_month_bounds(d("2024-01-15")), (d("2023-12-01"), d("2023-12-31")));
        assert_eq!(previous_month_bounds(d("2024-03-04")), (d("2024-02-01"), d("2024-02-29")));
    }

    #[test]
    fn iso_week_ids_are_zero_padded() {
        assert_eq!(iso_week_id(d("2024-03-04")), "2024-W10");
        assert_eq!(iso_week_id(d("2024-12-30")), "2025-W01");
    }

    #[test]
    fn days_inclusive_covers_both_ends() {
        let days: Vec<NaiveDate> = days_inclusive(d("2024-03-04"), d("2024-03-06")).collect();
        assert_eq!(days.len(), 3);
        assert_eq!(days_inclusive(d("2024-03-06"), d("2024-03-04")).count(), 0);
    }
}
