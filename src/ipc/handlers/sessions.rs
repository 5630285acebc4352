use crate::auth;
use crate::calendar;
use crate::db;
use crate::ipc::error::HandlerErr;
use crate::ipc::helpers::{
    get_optional_date, get_optional_str, get_required_str, get_typed, require, require_user,
    with_db,
};
use crate::ipc::types::{AppState, Request};
use crate::model::{now_timestamp, AttendanceConfig, SemesterKind, Session, User, MAX_PERIOD};
use crate::schedule;
use rusqlite::Connection;
use serde_json::{json, Value};

fn require_session_admin(user: Option<&User>) -> Result<(), HandlerErr> {
    require_user(user)?;
    require(auth::can_edit_settings(user), "managing sessions is not allowed")
}

fn sessions_list(conn: &Connection, user: Option<&User>, _params: &Value) -> Result<Value, HandlerErr> {
    require_user(user)?;
    let sessions = db::list_sessions(conn).map_err(HandlerErr::query)?;
    let active = sessions.iter().find(|s| s.is_active).map(|s| s.id.clone());
    Ok(json!({ "sessions": sessions, "activeSessionId": active }))
}

/// Archive the active session's live data unless it is `keep`.
fn archive_active(conn: &Connection, keep: &str, at: &str) -> Result<Option<(String, usize)>, HandlerErr> {
    let Some(active) = db::active_session(conn).map_err(HandlerErr::query)? else {
        return Ok(None);
    };
    if active.id == keep {
        return Ok(None);
    }
    let moved = db::archive_session_data(conn, &active.id).map_err(HandlerErr::update)?;
    db::mark_session_archived(conn, &active.id, at).map_err(HandlerErr::update)?;
    Ok(Some((active.id, moved)))
}

fn sessions_create(conn: &Connection, user: Option<&User>, params: &Value) -> Result<Value, HandlerErr> {
    require_session_admin(user)?;
    let year = params
        .get("year")
        .and_then(|v| v.as_i64())
        .filter(|y| (2000..=2100).contains(y))
        .ok_or_else(|| HandlerErr::bad_params("year must be in 2000..=2100"))? as i32;
    let kind_raw = get_required_str(params, "type")?;
    let kind = SemesterKind::parse(&kind_raw)
        .ok_or_else(|| HandlerErr::bad_params(format!("unknown session type: {}", kind_raw)))?;

    let defaults = calendar::default_semesters(year)
        .into_iter()
        .find(|s| s.kind == kind);
    let start_date = match get_optional_date(params, "startDate")? {
        Some(d) => d,
        None => defaults
            .as_ref()
            .map(|s| s.start_date)
            .ok_or_else(|| HandlerErr::bad_params("missing startDate"))?,
    };
    let end_date = match get_optional_date(params, "endDate")? {
        Some(d) => d,
        None => defaults
            .as_ref()
            .map(|s| s.end_date)
            .ok_or_else(|| HandlerErr::bad_params("missing endDate"))?,
    };
    if start_date > end_date {
        return Err(HandlerErr::bad_params("startDate must not be after endDate"));
    }
    let name = get_optional_str(params, "name")?
        .map(|n| n.trim().to_string())
        .filter(|n| !n.is_empty())
        .unwrap_or_else(|| format!("{} {}", year, kind.display_name()));

    let now = now_timestamp();
    let session = Session {
        id: Session::session_id(year, kind),
        name,
        kind,
        start_date,
        end_date,
        year,
        is_active: true,
        created_at: now.clone(),
        archived_at: None,
    };

    let tx = conn.unchecked_transaction().map_err(HandlerErr::tx)?;
    let replaced = db::get_session(&tx, &session.id)
        .map_err(HandlerErr::query)?
        .is_some();
    let archived = archive_active(&tx, &session.id, &now)?;
    db::upsert_session(&tx, &session).map_err(HandlerErr::update)?;
    db::activate_only(&tx, &session.id).map_err(HandlerErr::update)?;
    if db::get_config(&tx, &session.id)
        .map_err(HandlerErr::query)?
        .is_none()
    {
        let config = AttendanceConfig {
            semester: Some(kind),
            session_id: Some(session.id.clone()),
            ..Default::default()
        };
        db::save_config(&tx, &session.id, &config).map_err(HandlerErr::update)?;
    }
    tx.commit().map_err(HandlerErr::commit)?;

    log::info!(
        "session {} created and activated{}",
        session.id,
        archived
            .as_ref()
            .map(|(id, n)| format!(", archived {} ({} records)", id, n))
            .unwrap_or_default()
    );
    Ok(json!({
        "session": session,
        "replaced": replaced,
        "archivedSessionId": archived.map(|(id, _)| id)
    }))
}

fn sessions_switch(conn: &Connection, user: Option<&User>, params: &Value) -> Result<Value, HandlerErr> {
    require_session_admin(user)?;
    let id = get_required_str(params, "id")?;
    if db::get_session(conn, &id).map_err(HandlerErr::query)?.is_none() {
        return Err(HandlerErr::not_found("session not found"));
    }

    let tx = conn.unchecked_transaction().map_err(HandlerErr::tx)?;
    let archived = archive_active(&tx, &id, &now_timestamp())?;
    db::activate_only(&tx, &id).map_err(HandlerErr::update)?;
    let waiting = db::archived_records(&tx, &id).map_err(HandlerErr::query)?.len();
    tx.commit().map_err(HandlerErr::commit)?;

    if let Some((prev, moved)) = archived.as_ref() {
        log::info!("switched session {} -> {} ({} records archived)", prev, id, moved);
    } else {
        log::info!("activated session {}", id);
    }
    Ok(json!({
        "activeSessionId": id,
        "archivedSessionId": archived.as_ref().map(|(s, _)| s.clone()),
        "archivedRecordCount": archived.map(|(_, n)| n).unwrap_or(0),
        "restorableRecordCount": waiting
    }))
}

/// Bring a session's archived records and config back into the live tables.
fn sessions_restore(conn: &Connection, user: Option<&User>, params: &Value) -> Result<Value, HandlerErr> {
    require_session_admin(user)?;
    let id = get_required_str(params, "id")?;
    if db::get_session(conn, &id).map_err(HandlerErr::query)?.is_none() {
        return Err(HandlerErr::not_found("session not found"));
    }
    let tx = conn.unchecked_transaction().map_err(HandlerErr::tx)?;
    let config = db::get_archived_config(&tx, &id).map_err(HandlerErr::query)?;
    let restored = db::restore_session_data(&tx, &id).map_err(HandlerErr::update)?;
    tx.commit().map_err(HandlerErr::commit)?;
    log::info!("restored {} archived records for session {}", restored, id);
    Ok(json!({
        "sessionId": id,
        "restoredRecords": restored,
        "config": config
    }))
}

fn sessions_delete(conn: &Connection, user: Option<&User>, params: &Value) -> Result<Value, HandlerErr> {
    require_session_admin(user)?;
    let id = get_required_str(params, "id")?;
    let tx = conn.unchecked_transaction().map_err(HandlerErr::tx)?;
    let deleted = db::delete_session(&tx, &id).map_err(HandlerErr::update)?;
    if !deleted {
        return Err(HandlerErr::not_found("session not found"));
    }
    tx.commit().map_err(HandlerErr::commit)?;
    log::info!("session {} deleted with its records", id);
    Ok(json!({ "ok": true }))
}

fn target_session_id(conn: &Connection, params: &Value) -> Result<String, HandlerErr> {
    match get_optional_str(params, "sessionId")? {
        Some(id) => Ok(id),
        None => Ok(db::active_session(conn)
            .map_err(HandlerErr::query)?
            .map(|s| s.id)
            .unwrap_or_else(|| db::NO_SESSION.to_string())),
    }
}

fn validate_config(config: &AttendanceConfig) -> Result<(), HandlerErr> {
    schedule::validate_schedules(&config.period_schedules).map_err(HandlerErr::bad_params)?;
    if let Some(periods) = config.default_periods.as_ref() {
        schedule::validate_periods(periods).map_err(HandlerErr::bad_params)?;
    }
    for r in &config.day_period_ranges {
        if r.start_period == 0 || r.end_period > MAX_PERIOD || r.start_period > r.end_period {
            return Err(HandlerErr::bad_params(format!(
                "period range for {} is invalid",
                r.date
            )));
        }
    }
    Ok(())
}

fn config_get(conn: &Connection, user: Option<&User>, params: &Value) -> Result<Value, HandlerErr> {
    require_user(user)?;
    let session_id = target_session_id(conn, params)?;
    let config = db::get_config(conn, &session_id).map_err(HandlerErr::query)?;
    Ok(json!({ "sessionId": session_id, "config": config }))
}

fn config_save(conn: &Connection, user: Option<&User>, params: &Value) -> Result<Value, HandlerErr> {
    require_session_admin(user)?;
    let session_id = target_session_id(conn, params)?;
    let mut config: AttendanceConfig = get_typed(params, "config")?;
    validate_config(&config)?;
    config
        .day_period_ranges
        .sort_by_key(|r| r.date);
    config.day_period_ranges.dedup_by_key(|r| r.date);
    if !session_id.is_empty() {
        config.session_id = Some(session_id.clone());
    }
    db::save_config(conn, &session_id, &config).map_err(HandlerErr::update)?;
    Ok(json!({ "sessionId": session_id, "config": config }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "sessions.list" => Some(with_db(state, req, sessions_list)),
        "sessions.create" => Some(with_db(state, req, sessions_create)),
        "sessions.switch" => Some(with_db(state, req, sessions_switch)),
        "sessions.restore" => Some(with_db(state, req, sessions_restore)),
        "sessions.delete" => Some(with_db(state, req, sessions_delete)),
        "sessions.config.get" => Some(with_db(state, req, config_get)),
        "sessions.config.save" => Some(with_db(state, req, config_save)),
        _ => None,
    }
}
