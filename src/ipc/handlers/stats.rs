use crate::auth;
use crate::calc;
use crate::db;
use crate::ipc::error::HandlerErr;
use crate::ipc::handlers::students::matches_query;
use crate::ipc::helpers::{
    get_optional_date, get_optional_str, get_optional_u8, require, require_user, with_db,
};
use crate::ipc::types::{AppState, Request};
use crate::model::{format_date, Permission, Student, User, MAX_CLASS, MAX_GRADE, MIN_CLASS, MIN_GRADE};
use chrono::{Datelike, Local};
use rusqlite::Connection;
use serde_json::{json, Value};

/// Per-student statistics for the active session over a date window.
///
/// The window defaults to the first of the current month through today.
/// `totalPeriods` comes from the session's day-period ranges inside the
/// window, so students share one denominator.
fn stats_students(conn: &Connection, user: Option<&User>, params: &Value) -> Result<Value, HandlerErr> {
    require_user(user)?;
    require(
        auth::has_permission(user, Permission::ViewAll)
            || auth::can_view_reports(user),
        "viewing statistics is not allowed",
    )?;
    let today = match get_optional_date(params, "today")? {
        Some(d) => d,
        None => Local::now().date_naive(),
    };
    let start = match get_optional_date(params, "startDate")? {
        Some(d) => d,
        None => today.with_day(1).unwrap_or(today),
    };
    let end = get_optional_date(params, "endDate")?.unwrap_or(today);
    if start > end {
        return Err(HandlerErr::bad_params("startDate must not be after endDate"));
    }
    let grade = get_optional_u8(params, "grade", MIN_GRADE, MAX_GRADE)?;
    let class_num = get_optional_u8(params, "class", MIN_CLASS, MAX_CLASS)?;
    let query = get_optional_str(params, "query")?.unwrap_or_default();

    let session_id = db::active_session(conn)
        .map_err(HandlerErr::query)?
        .map(|s| s.id)
        .unwrap_or_else(|| db::NO_SESSION.to_string());
    let config = db::get_config(conn, &session_id).map_err(HandlerErr::query)?;
    let total_periods = config
        .as_ref()
        .map(|c| calc::total_periods_in_ranges(&c.day_period_ranges, Some(start), Some(end)))
        .unwrap_or(0);
    let records = db::session_records_between(conn, &session_id, start, end)
        .map_err(HandlerErr::query)?;

    let students = db::list_students(conn).map_err(HandlerErr::query)?;
    let mut rows: Vec<(calc::AttendanceStats, &Student)> = students
        .iter()
        .filter(|s| grade.map(|g| s.grade == g).unwrap_or(true))
        .filter(|s| class_num.map(|c| s.class_num == c).unwrap_or(true))
        .filter(|s| matches_query(s, &query))
        .map(|s| (calc::calculate_attendance_stats(s, &records, total_periods), s))
        .collect();
    rows.sort_by(|a, b| b.0.attendance_rate.total_cmp(&a.0.attendance_rate));
    let overall = calc::summarize(rows.iter().map(|(st, _)| st));

    let stats: Vec<Value> = rows
        .into_iter()
        .map(|(st, s)| {
            json!({
                "student": s,
                "stats": st
            })
        })
        .collect();
    Ok(json!({
        "sessionId": session_id,
        "startDate": format_date(start),
        "endDate": format_date(end),
        "totalPeriods": total_periods,
        "overall": overall,
        "stats": stats
    }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "stats.students" => Some(with_db(state, req, stats_students)),
        _ => None,
    }
}
