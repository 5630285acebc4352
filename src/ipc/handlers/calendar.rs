use crate::auth;
use crate::calendar;
use crate::db;
use crate::ipc::error::HandlerErr;
use crate::ipc::handlers::settings;
use crate::ipc::helpers::{
    get_optional_u8, get_required_date, get_typed, parse_date_value, require, require_user, with_db,
};
use crate::ipc::types::{AppState, Request};
use crate::model::{format_date, PeriodSchedule, SemesterSchedule, User, MAX_GRADE, MIN_GRADE};
use crate::schedule;
use chrono::{Datelike, NaiveDate};
use rusqlite::Connection;
use serde_json::{json, Value};

fn require_settings_editor(user: Option<&User>) -> Result<(), HandlerErr> {
    require_user(user)?;
    require(auth::can_edit_settings(user), "editing settings is not allowed")
}

fn semesters_list(conn: &Connection, user: Option<&User>, _params: &Value) -> Result<Value, HandlerErr> {
    require_user(user)?;
    let semesters = db::list_semesters(conn).map_err(HandlerErr::query)?;
    Ok(json!({ "semesters": semesters }))
}

fn validate_semesters(semesters: &[SemesterSchedule]) -> Result<(), HandlerErr> {
    for (i, s) in semesters.iter().enumerate() {
        if s.id.trim().is_empty() {
            return Err(HandlerErr::bad_params(format!("semester {} has no id", i)));
        }
        if s.start_date > s.end_date {
            return Err(HandlerErr::bad_params(format!(
                "semester {} starts after it ends",
                s.id
            )));
        }
        if semesters[..i].iter().any(|o| o.id == s.id) {
            return Err(HandlerErr::bad_params(format!("duplicate semester id {}", s.id)));
        }
    }
    Ok(())
}

fn semesters_save(conn: &Connection, user: Option<&User>, params: &Value) -> Result<Value, HandlerErr> {
    require_settings_editor(user)?;
    let mut semesters: Vec<SemesterSchedule> = get_typed(params, "semesters")?;
    validate_semesters(&semesters)?;
    calendar::sort_semesters(&mut semesters);
    db::replace_semesters(conn, &semesters).map_err(HandlerErr::update)?;
    Ok(json!({ "semesters": semesters }))
}

/// Add the standard four terms for a school year, keeping saved ones.
fn semesters_seed_defaults(conn: &Connection, user: Option<&User>, params: &Value) -> Result<Value, HandlerErr> {
    require_settings_editor(user)?;
    let year = params
        .get("year")
        .and_then(|v| v.as_i64())
        .ok_or_else(|| HandlerErr::bad_params("missing year"))?;
    if !(2000..=2100).contains(&year) {
        return Err(HandlerErr::bad_params("year must be in 2000..=2100"));
    }
    let mut semesters = db::list_semesters(conn).map_err(HandlerErr::query)?;
    let mut added = 0;
    for s in calendar::default_semesters(year as i32) {
        if semesters.iter().any(|o| o.id == s.id) {
            continue;
        }
        semesters.push(s);
        added += 1;
    }
    calendar::sort_semesters(&mut semesters);
    db::replace_semesters(conn, &semesters).map_err(HandlerErr::update)?;
    Ok(json!({ "added": added, "semesters": semesters }))
}

fn holidays_json(holidays: &[(NaiveDate, Option<String>)]) -> Value {
    Value::Array(
        holidays
            .iter()
            .map(|(d, name)| json!({ "date": format_date(*d), "name": name }))
            .collect(),
    )
}

fn holidays_list(conn: &Connection, user: Option<&User>, _params: &Value) -> Result<Value, HandlerErr> {
    require_user(user)?;
    let holidays = db::list_holidays(conn).map_err(HandlerErr::query)?;
    Ok(json!({ "holidays": holidays_json(&holidays) }))
}

/// Accepts plain date strings or `{date, name?}` objects.
fn holidays_save(conn: &Connection, user: Option<&User>, params: &Value) -> Result<Value, HandlerErr> {
    require_settings_editor(user)?;
    let Some(items) = params.get("holidays").and_then(|v| v.as_array()) else {
        return Err(HandlerErr::bad_params("holidays must be an array"));
    };
    let mut holidays: Vec<(NaiveDate, Option<String>)> = Vec::with_capacity(items.len());
    for item in items {
        let entry = match item {
            Value::Object(obj) => {
                let date = parse_date_value(obj.get("date").unwrap_or(&Value::Null), "date")?;
                let name = obj
                    .get("name")
                    .and_then(|v| v.as_str())
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(str::to_string);
                (date, name)
            }
            other => (parse_date_value(other, "holidays[]")?, None),
        };
        holidays.push(entry);
    }
    holidays.sort_by_key(|(d, _)| *d);
    holidays.dedup_by_key(|(d, _)| *d);
    db::replace_holidays(conn, &holidays).map_err(HandlerErr::update)?;
    Ok(json!({ "holidays": holidays_json(&holidays) }))
}

fn holidays_import_korean(conn: &Connection, user: Option<&User>, params: &Value) -> Result<Value, HandlerErr> {
    require_settings_editor(user)?;
    let start = params
        .get("startYear")
        .and_then(|v| v.as_i64())
        .ok_or_else(|| HandlerErr::bad_params("missing startYear"))?;
    let end = params
        .get("endYear")
        .and_then(|v| v.as_i64())
        .unwrap_or(start);
    if !(2000..=2100).contains(&start) || !(start..=start + 10).contains(&end) {
        return Err(HandlerErr::bad_params(
            "startYear must be in 2000..=2100 and endYear within 10 years after it",
        ));
    }
    let dates = calendar::korean_holidays_for_years(start as i32, end as i32);
    let named: Vec<(NaiveDate, Option<String>)> = dates
        .iter()
        .map(|d| (*d, Some(calendar::holiday_name(*d))))
        .collect();
    let added = db::insert_holidays(conn, &named).map_err(HandlerErr::update)?;
    log::info!("imported {} public holidays for {}..={}", added, start, end);
    Ok(json!({ "added": added, "total": named.len() }))
}

fn period_schedules_get(conn: &Connection, user: Option<&User>, _params: &Value) -> Result<Value, HandlerErr> {
    require_user(user)?;
    let schedules = db::global_period_schedules(conn).map_err(HandlerErr::query)?;
    Ok(json!({
        "periodSchedules": schedules,
        "defaultPeriods": schedule::default_periods()
    }))
}

fn period_schedules_save(conn: &Connection, user: Option<&User>, params: &Value) -> Result<Value, HandlerErr> {
    require_settings_editor(user)?;
    let schedules: Vec<PeriodSchedule> = get_typed(params, "periodSchedules")?;
    schedule::validate_schedules(&schedules).map_err(HandlerErr::bad_params)?;
    db::save_global_period_schedules(conn, &schedules).map_err(HandlerErr::update)?;
    Ok(json!({ "periodSchedules": schedules }))
}

fn day_type(conn: &Connection, user: Option<&User>, params: &Value) -> Result<Value, HandlerErr> {
    require_user(user)?;
    let date = get_required_date(params, "date")?;
    let grade = get_optional_u8(params, "grade", MIN_GRADE, MAX_GRADE)?;
    let (session_id, day) = db::resolve_day_for(conn, date).map_err(HandlerErr::query)?;
    let semesters = db::effective_semesters(conn).map_err(HandlerErr::query)?;
    let semester = calendar::semester_for_date(date, &semesters).cloned();
    let visible = match grade {
        Some(g) => {
            let prefs = settings::attendance_settings(conn).map_err(HandlerErr::query)?;
            Some(schedule::visible_periods(&day, g, prefs.lower_grade_max_period))
        }
        None => None,
    };
    Ok(json!({
        "date": format_date(date),
        "weekday": date.weekday().to_string(),
        "dayType": day.day_type,
        "semester": semester,
        "sessionId": session_id,
        "schedule": day,
        "visiblePeriods": visible
    }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "calendar.semesters.list" => Some(with_db(state, req, semesters_list)),
        "calendar.semesters.save" => Some(with_db(state, req, semesters_save)),
        "calendar.semesters.seedDefaults" => Some(with_db(state, req, semesters_seed_defaults)),
        "calendar.holidays.list" => Some(with_db(state, req, holidays_list)),
        "calendar.holidays.save" => Some(with_db(state, req, holidays_save)),
        "calendar.holidays.importKorean" => Some(with_db(state, req, holidays_import_korean)),
        "calendar.periodSchedules.get" => Some(with_db(state, req, period_schedules_get)),
        "calendar.periodSchedules.save" => Some(with_db(state, req, period_schedules_save)),
        "calendar.dayType" => Some(with_db(state, req, day_type)),
        _ => None,
    }
}
