use crate::auth;
use crate::db;
use crate::ipc::error::HandlerErr;
use crate::ipc::handlers::settings;
use crate::ipc::helpers::{
    get_optional_date, get_required_date, get_required_str, require, require_user, to_json,
    with_db,
};
use crate::ipc::types::{AppState, Request};
use crate::model::{now_timestamp, User};
use crate::report::{self, ReportInputs};
use chrono::Local;
use rusqlite::Connection;
use serde_json::{json, Value};

fn require_reader(user: Option<&User>) -> Result<(), HandlerErr> {
    require_user(user)?;
    require(auth::can_view_reports(user), "viewing reports is not allowed")
}

fn weekly_generate(conn: &Connection, user: Option<&User>, params: &Value) -> Result<Value, HandlerErr> {
    require_reader(user)?;
    let target = get_required_date(params, "date")?;
    let today = get_optional_date(params, "today")?.unwrap_or_else(|| Local::now().date_naive());
    let persist = params
        .get("persist")
        .and_then(|v| v.as_bool())
        .unwrap_or(true);

    let students = db::list_students(conn).map_err(HandlerErr::query)?;
    let report_settings = settings::report_settings(conn).map_err(HandlerErr::query)?;
    let attendance_settings = settings::attendance_settings(conn).map_err(HandlerErr::query)?;
    let inputs = ReportInputs {
        students: &students,
        settings: &report_settings,
        night_study_start_period: attendance_settings.night_study_start_period,
        today,
        generated_at: now_timestamp(),
    };
    let weekly = report::generate_weekly_report(target, &inputs, |start, end| {
        db::records_for_range(conn, start, end)
    })
    .map_err(HandlerErr::query)?;

    let body = to_json(&weekly)?;
    if persist {
        db::save_report(
            conn,
            &weekly.id,
            weekly.week_start_date,
            weekly.week_end_date,
            &weekly.generated_at,
            &body,
        )
        .map_err(HandlerErr::update)?;
    }
    log::info!(
        "weekly report {} generated: {} insights, {} alerts",
        weekly.id,
        weekly.insights.len(),
        weekly.priority_alerts.len()
    );
    Ok(json!({ "report": body, "persisted": persist }))
}

fn weekly_list(conn: &Connection, user: Option<&User>, _params: &Value) -> Result<Value, HandlerErr> {
    require_reader(user)?;
    let rows = db::list_reports(conn).map_err(HandlerErr::query)?;
    let reports: Vec<Value> = rows
        .into_iter()
        .map(|r| {
            json!({
                "id": r.id,
                "weekStartDate": r.week_start,
                "weekEndDate": r.week_end,
                "generatedAt": r.generated_at
            })
        })
        .collect();
    Ok(json!({ "reports": reports }))
}

fn weekly_get(conn: &Connection, user: Option<&User>, params: &Value) -> Result<Value, HandlerErr> {
    require_reader(user)?;
    let id = get_required_str(params, "id")?;
    let stored = db::get_report(conn, &id)
        .map_err(HandlerErr::query)?
        .ok_or_else(|| HandlerErr::not_found("report not found"))?;
    Ok(json!({ "report": stored }))
}

fn weekly_delete(conn: &Connection, user: Option<&User>, params: &Value) -> Result<Value, HandlerErr> {
    require_reader(user)?;
    require(auth::can_edit_settings(user), "deleting reports is not allowed")?;
    let id = get_required_str(params, "id")?;
    if !db::delete_report(conn, &id).map_err(HandlerErr::update)? {
        return Err(HandlerErr::not_found("report not found"));
    }
    Ok(json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "reports.weekly.generate" => Some(with_db(state, req, weekly_generate)),
        "reports.weekly.list" => Some(with_db(state, req, weekly_list)),
        "reports.weekly.get" => Some(with_db(state, req, weekly_get)),
        "reports.weekly.delete" => Some(with_db(state, req, weekly_delete)),
        _ => None,
    }
}
