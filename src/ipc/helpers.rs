use chrono::NaiveDate;
use rusqlite::Connection;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::ipc::error::{err, ok, HandlerErr};
use crate::ipc::types::{AppState, Request};
use crate::model::{self, AttendanceStatus, User, MAX_CLASS, MAX_GRADE, MAX_PERIOD, MIN_CLASS, MIN_GRADE};

/// Run a handler that needs an open workspace.
pub fn with_db<F>(state: &AppState, req: &Request, f: F) -> Value
where
    F: FnOnce(&Connection, Option<&User>, &Value) -> Result<Value, HandlerErr>,
{
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    match f(conn, state.current_user.as_ref(), &req.params) {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    }
}

pub fn require_user(user: Option<&User>) -> Result<&User, HandlerErr> {
    user.ok_or_else(|| HandlerErr::new("not_authenticated", "log in first"))
}

pub fn require(allowed: bool, message: &str) -> Result<(), HandlerErr> {
    if allowed {
        Ok(())
    } else {
        Err(HandlerErr::forbidden(message))
    }
}

pub fn get_required_str(params: &Value, key: &str) -> Result<String, HandlerErr> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
        .ok_or_else(|| HandlerErr::bad_params(format!("missing {}", key)))
}

pub fn get_optional_str(params: &Value, key: &str) -> Result<Option<String>, HandlerErr> {
    match params.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.clone())),
        Some(_) => Err(HandlerErr::bad_params(format!("{} must be a string", key))),
    }
}

pub fn parse_date_value(v: &Value, key: &str) -> Result<NaiveDate, HandlerErr> {
    v.as_str()
        .and_then(model::parse_date)
        .ok_or_else(|| HandlerErr::bad_params(format!("{} must be YYYY-MM-DD", key)))
}

pub fn get_required_date(params: &Value, key: &str) -> Result<NaiveDate, HandlerErr> {
    match params.get(key) {
        Some(v) => parse_date_value(v, key),
        None => Err(HandlerErr::bad_params(format!("missing {}", key))),
    }
}

pub fn get_optional_date(params: &Value, key: &str) -> Result<Option<NaiveDate>, HandlerErr> {
    match params.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(v) => parse_date_value(v, key).map(Some),
    }
}

pub fn get_required_u8(params: &Value, key: &str, min: u8, max: u8) -> Result<u8, HandlerErr> {
    let n = params
        .get(key)
        .and_then(|v| v.as_u64())
        .ok_or_else(|| HandlerErr::bad_params(format!("missing {}", key)))?;
    if n < min as u64 || n > max as u64 {
        return Err(HandlerErr::bad_params(format!(
            "{} must be in {}..={}",
            key, min, max
        )));
    }
    Ok(n as u8)
}

pub fn get_optional_u8(params: &Value, key: &str, min: u8, max: u8) -> Result<Option<u8>, HandlerErr> {
    match params.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(_) => get_required_u8(params, key, min, max).map(Some),
    }
}

pub fn get_grade_class(params: &Value) -> Result<(u8, u8), HandlerErr> {
    Ok((
        get_required_u8(params, "grade", MIN_GRADE, MAX_GRADE)?,
        get_required_u8(params, "class", MIN_CLASS, MAX_CLASS)?,
    ))
}

pub fn get_period(params: &Value) -> Result<u8, HandlerErr> {
    get_required_u8(params, "period", 1, MAX_PERIOD)
}

/// `status` may be absent or null to clear a cell.
pub fn get_optional_status(params: &Value) -> Result<Option<AttendanceStatus>, HandlerErr> {
    match params.get("status") {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) if s.is_empty() => Ok(None),
        Some(Value::String(s)) => AttendanceStatus::parse(s)
            .map(Some)
            .ok_or_else(|| HandlerErr::bad_params(format!("unknown status: {}", s))),
        Some(_) => Err(HandlerErr::bad_params("status must be a string")),
    }
}

pub fn get_required_status(params: &Value) -> Result<AttendanceStatus, HandlerErr> {
    get_optional_status(params)?.ok_or_else(|| HandlerErr::bad_params("missing status"))
}

/// Deserialize `params[key]` into a typed value.
pub fn get_typed<T: DeserializeOwned>(params: &Value, key: &str) -> Result<T, HandlerErr> {
    let v = params
        .get(key)
        .ok_or_else(|| HandlerErr::bad_params(format!("missing {}", key)))?;
    serde_json::from_value(v.clone())
        .map_err(|e| HandlerErr::bad_params(format!("invalid {}: {}", key, e)))
}

pub fn to_json<T: serde::Serialize>(v: &T) -> Result<Value, HandlerErr> {
    serde_json::to_value(v).map_err(|e| HandlerErr::new("io_failed", e.to_string()))
}
