use crate::auth;
use crate::db;
use crate::ipc::error::HandlerErr;
use crate::ipc::helpers::{
    get_optional_str, get_period, get_required_date, get_required_status, get_required_str,
    require, require_user, with_db,
};
use crate::ipc::types::{AppState, Request};
use crate::model::{format_date, now_timestamp, AttendanceRecord, PendingAttendance, User};
use rusqlite::Connection;
use serde_json::{json, Value};

/// Approvers see every open entry; other roles only their own submissions.
fn visible_open(conn: &Connection, user: &User) -> Result<Vec<PendingAttendance>, HandlerErr> {
    let scope = if auth::can_approve_attendance(Some(user)) {
        None
    } else {
        Some(user.id.as_str())
    };
    db::list_open_pending(conn, scope).map_err(HandlerErr::query)
}

fn pending_create(conn: &Connection, user: Option<&User>, params: &Value) -> Result<Value, HandlerErr> {
    let user = require_user(user)?;
    require(
        auth::can_check_attendance(Some(user)),
        "submitting attendance checks is not allowed",
    )?;
    let student_id = get_required_str(params, "studentId")?;
    let date = get_required_date(params, "date")?;
    let period = get_period(params)?;
    let status = get_required_status(params)?;
    let note = get_optional_str(params, "note")?
        .map(|n| n.trim().to_string())
        .filter(|n| !n.is_empty());
    if db::get_student(conn, &student_id)
        .map_err(HandlerErr::query)?
        .is_none()
    {
        return Err(HandlerErr::not_found("student not found"));
    }

    let entry = PendingAttendance {
        id: format!(
            "pending-{}-{}-{}-{}-{}",
            chrono::Utc::now().timestamp_millis(),
            student_id,
            format_date(date),
            period,
            uuid::Uuid::new_v4().simple()
        ),
        student_id,
        date,
        period,
        status,
        checked_by: user.id.clone(),
        checked_at: now_timestamp(),
        approved_by: None,
        approved_at: None,
        rejected_by: None,
        rejected_at: None,
        note,
    };
    db::upsert_pending(conn, &entry).map_err(HandlerErr::update)?;
    Ok(json!({ "pending": entry }))
}

fn pending_list(conn: &Connection, user: Option<&User>, params: &Value) -> Result<Value, HandlerErr> {
    let user = require_user(user)?;
    let include_decided = params
        .get("includeDecided")
        .and_then(|v| v.as_bool())
        .unwrap_or(false);
    let entries = if include_decided && auth::can_approve_attendance(Some(user)) {
        db::list_all_pending(conn).map_err(HandlerErr::query)?
    } else {
        visible_open(conn, user)?
    };
    Ok(json!({ "pending": entries }))
}

fn pending_count(conn: &Connection, user: Option<&User>, _params: &Value) -> Result<Value, HandlerErr> {
    let user = require_user(user)?;
    Ok(json!({ "count": visible_open(conn, user)?.len() }))
}

fn load_undecided(conn: &Connection, id: &str) -> Result<PendingAttendance, HandlerErr> {
    let entry = db::get_pending(conn, id)
        .map_err(HandlerErr::query)?
        .ok_or_else(|| HandlerErr::not_found("pending entry not found"))?;
    if entry.is_decided() {
        return Err(HandlerErr::conflict("pending entry was already decided"));
    }
    Ok(entry)
}

fn pending_approve(conn: &Connection, user: Option<&User>, params: &Value) -> Result<Value, HandlerErr> {
    let user = require_user(user)?;
    require(
        auth::can_approve_attendance(Some(user)),
        "approving attendance is not allowed",
    )?;
    let id = get_required_str(params, "id")?;
    let mut entry = load_undecided(conn, &id)?;

    let session_id = db::session_id_for_date(conn, entry.date).map_err(HandlerErr::query)?;
    let record = AttendanceRecord {
        id: AttendanceRecord::record_id(&entry.student_id, entry.date, entry.period),
        student_id: entry.student_id.clone(),
        date: entry.date,
        period: entry.period,
        status: entry.status,
        note: entry.note.clone(),
        session_id: (!session_id.is_empty()).then(|| session_id.clone()),
    };
    entry.approved_by = Some(user.id.clone());
    entry.approved_at = Some(now_timestamp());

    let tx = conn.unchecked_transaction().map_err(HandlerErr::tx)?;
    db::upsert_record(&tx, &session_id, &record).map_err(HandlerErr::update)?;
    db::upsert_pending(&tx, &entry).map_err(HandlerErr::update)?;
    tx.commit().map_err(HandlerErr::commit)?;
    log::info!("pending entry {} approved by {}", entry.id, user.id);
    Ok(json!({ "pending": entry, "record": record }))
}

fn pending_reject(conn: &Connection, user: Option<&User>, params: &Value) -> Result<Value, HandlerErr> {
    let user = require_user(user)?;
    require(
        auth::can_approve_attendance(Some(user)),
        "rejecting attendance is not allowed",
    )?;
    let id = get_required_str(params, "id")?;
    let mut entry = load_undecided(conn, &id)?;
    entry.rejected_by = Some(user.id.clone());
    entry.rejected_at = Some(now_timestamp());
    db::upsert_pending(conn, &entry).map_err(HandlerErr::update)?;
    Ok(json!({ "pending": entry }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "pending.create" => Some(with_db(state, req, pending_create)),
        "pending.list" => Some(with_db(state, req, pending_list)),
        "pending.count" => Some(with_db(state, req, pending_count)),
        "pending.approve" => Some(with_db(state, req, pending_approve)),
        "pending.reject" => Some(with_db(state, req, pending_reject)),
        _ => None,
    }
}
