use crate::db;
use crate::ipc::error::HandlerErr;
use crate::ipc::helpers::{require, with_db};
use crate::ipc::types::{AppState, Request};
use crate::model::{
    self, AttendanceConfig, AttendanceRecord, PendingAttendance, SemesterKind, SemesterSchedule,
    Session, Student, User, UserRole,
};
use chrono::NaiveDate;
use rusqlite::Connection;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::BTreeMap;

const PREFIX: &str = "neungju_";

/// Storage keys of the browser application, after the `neungju_` prefix.
#[derive(Debug, Clone, PartialEq, Eq)]
enum LegacyKey {
    Students,
    Records(Option<String>),
    Config(Option<String>),
    ArchivedRecords(String),
    ArchivedConfig(String),
    SemesterSchedules,
    Holidays,
    Sessions,
    Users,
    Pending,
    WeeklyReports,
    CurrentUser,
}

fn parse_key(key: &str) -> Option<LegacyKey> {
    let rest = key.strip_prefix(PREFIX)?;
    let with_session = |name: &str| -> Option<Option<String>> {
        if rest == name {
            return Some(None);
        }
        rest.strip_prefix(name)
            .and_then(|s| s.strip_prefix('_'))
            .filter(|s| !s.is_empty())
            .map(|s| Some(map_session_id(s)))
    };
    if let Some(sid) = with_session("attendance_records") {
        return Some(LegacyKey::Records(sid));
    }
    if let Some(sid) = with_session("attendance_config") {
        return Some(LegacyKey::Config(sid));
    }
    if let Some(Some(sid)) = with_session("archived_records") {
        return Some(LegacyKey::ArchivedRecords(sid));
    }
    if let Some(Some(sid)) = with_session("archived_configs") {
        return Some(LegacyKey::ArchivedConfig(sid));
    }
    match rest {
        "students" => Some(LegacyKey::Students),
        "semester_schedules" => Some(LegacyKey::SemesterSchedules),
        "holidays" => Some(LegacyKey::Holidays),
        "sessions" => Some(LegacyKey::Sessions),
        "users" => Some(LegacyKey::Users),
        "pending_attendance" => Some(LegacyKey::Pending),
        "weekly_reports" => Some(LegacyKey::WeeklyReports),
        "current_user" => Some(LegacyKey::CurrentUser),
        _ => None,
    }
}

/// `2024-1학기` becomes `2024-first_semester`; anything else is kept verbatim.
fn map_session_id(raw: &str) -> String {
    if let Some((year, label)) = raw.split_once('-') {
        if let (Ok(year), Some(kind)) = (year.parse::<i32>(), SemesterKind::parse(label)) {
            return Session::session_id(year, kind);
        }
    }
    raw.to_string()
}

#[derive(Debug, Default, Serialize)]
#[serde(rename_all = "camelCase")]
struct ImportSummary {
    imported: BTreeMap<&'static str, usize>,
    skipped: BTreeMap<&'static str, usize>,
    unknown_keys: Vec<String>,
    warnings: Vec<String>,
}

impl ImportSummary {
    fn add(&mut self, what: &'static str, n: usize) {
        *self.imported.entry(what).or_insert(0) += n;
    }

    fn skip(&mut self, what: &'static str, n: usize) {
        if n > 0 {
            *self.skipped.entry(what).or_insert(0) += n;
        }
    }
}

/// Entries may hold the raw stored string or an already parsed value.
fn entry_value(v: &Value) -> Result<Value, String> {
    match v {
        Value::String(s) => serde_json::from_str(s).map_err(|e| e.to_string()),
        other => Ok(other.clone()),
    }
}

/// The browser app wrote `""` for cleared optional fields.
fn blank_to_null(v: &mut Value) {
    if let Some(obj) = v.as_object_mut() {
        for field in obj.values_mut() {
            if field.as_str().map(|s| s.is_empty()).unwrap_or(false) {
                *field = Value::Null;
            }
        }
    }
}

fn decode_one<T: DeserializeOwned>(v: &Value) -> Option<T> {
    let mut v = v.clone();
    blank_to_null(&mut v);
    serde_json::from_value(v).ok()
}

fn decode_list<T: DeserializeOwned>(v: &Value) -> (Vec<T>, usize) {
    let Some(items) = v.as_array() else {
        return (Vec::new(), 1);
    };
    let mut out = Vec::with_capacity(items.len());
    let mut bad = 0;
    for item in items {
        match decode_one::<T>(item) {
            Some(t) => out.push(t),
            None => bad += 1,
        }
    }
    (out, bad)
}

fn remap_config(mut config: AttendanceConfig, session_id: Option<&str>) -> AttendanceConfig {
    config.session_id = match (config.session_id.as_deref(), session_id) {
        (_, Some(sid)) => Some(sid.to_string()),
        (Some(raw), None) => Some(map_session_id(raw)),
        (None, None) => None,
    };
    config
}

fn import_entry(
    conn: &Connection,
    key: &LegacyKey,
    value: &Value,
    summary: &mut ImportSummary,
) -> Result<(), HandlerErr> {
    match key {
        LegacyKey::Students => {
            let (students, bad) = decode_list::<Student>(value);
            for s in &students {
                db::upsert_student(conn, s).map_err(HandlerErr::update)?;
            }
            summary.add("students", students.len());
            summary.skip("students", bad);
        }
        LegacyKey::Records(sid) => {
            let partition = sid.as_deref().unwrap_or(db::NO_SESSION);
            let (records, bad) = decode_list::<AttendanceRecord>(value);
            for r in &records {
                db::upsert_record(conn, partition, r).map_err(HandlerErr::update)?;
            }
            summary.add("records", records.len());
            summary.skip("records", bad);
        }
        LegacyKey::ArchivedRecords(sid) => {
            let (records, bad) = decode_list::<AttendanceRecord>(value);
            for r in &records {
                db::upsert_archived_record(conn, sid, r).map_err(HandlerErr::update)?;
            }
            summary.add("archivedRecords", records.len());
            summary.skip("archivedRecords", bad);
        }
        LegacyKey::Config(sid) => match decode_one::<AttendanceConfig>(value) {
            Some(config) => {
                let partition = sid.as_deref().unwrap_or(db::NO_SESSION);
                let config = remap_config(config, sid.as_deref());
                db::save_config(conn, partition, &config).map_err(HandlerErr::update)?;
                summary.add("configs", 1);
            }
            None => summary.skip("configs", 1),
        },
        LegacyKey::ArchivedConfig(sid) => match decode_one::<AttendanceConfig>(value) {
            Some(config) => {
                let config = remap_config(config, Some(sid.as_str()));
                db::save_archived_config(conn, sid, &config).map_err(HandlerErr::update)?;
                summary.add("archivedConfigs", 1);
            }
            None => summary.skip("archivedConfigs", 1),
        },
        LegacyKey::SemesterSchedules => {
            let (mut semesters, bad) = decode_list::<SemesterSchedule>(value);
            for s in semesters.iter_mut() {
                s.id = map_session_id(&s.id);
            }
            crate::calendar::sort_semesters(&mut semesters);
            db::replace_semesters(conn, &semesters).map_err(HandlerErr::update)?;
            summary.add("semesterSchedules", semesters.len());
            summary.skip("semesterSchedules", bad);
        }
        LegacyKey::Holidays => {
            let items = value.as_array().cloned().unwrap_or_default();
            let mut dates: Vec<(NaiveDate, Option<String>)> = items
                .iter()
                .filter_map(|v| v.as_str().and_then(model::parse_date))
                .map(|d| (d, None))
                .collect();
            let bad = items.len() - dates.len();
            dates.sort_by_key(|(d, _)| *d);
            dates.dedup_by_key(|(d, _)| *d);
            let added = db::insert_holidays(conn, &dates).map_err(HandlerErr::update)?;
            summary.add("holidays", added);
            summary.skip("holidays", bad);
        }
        LegacyKey::Sessions => {
            let (sessions, bad) = decode_list::<Session>(value);
            let mut active: Option<String> = None;
            for mut s in sessions.iter().cloned() {
                s.id = map_session_id(&s.id);
                if s.created_at.is_empty() {
                    s.created_at = model::now_timestamp();
                }
                if s.is_active && active.is_none() {
                    active = Some(s.id.clone());
                }
                db::upsert_session(conn, &s).map_err(HandlerErr::update)?;
            }
            if let Some(id) = active {
                db::activate_only(conn, &id).map_err(HandlerErr::update)?;
            }
            summary.add("sessions", sessions.len());
            summary.skip("sessions", bad);
        }
        LegacyKey::Users => {
            let (users, bad) = decode_list::<User>(value);
            for mut u in users.iter().cloned() {
                if u.created_at.is_empty() {
                    u.created_at = model::now_timestamp();
                }
                db::upsert_user(conn, &u).map_err(HandlerErr::update)?;
            }
            summary.add("users", users.len());
            summary.skip("users", bad);
        }
        LegacyKey::Pending => {
            let (entries, bad) = decode_list::<PendingAttendance>(value);
            for p in &entries {
                db::upsert_pending(conn, p).map_err(HandlerErr::update)?;
            }
            summary.add("pending", entries.len());
            summary.skip("pending", bad);
        }
        LegacyKey::WeeklyReports => {
            let items = value.as_array().cloned().unwrap_or_default();
            let mut stored = 0;
            for item in &items {
                let field = |k: &str| item.get(k).and_then(|v| v.as_str());
                let parsed = (
                    field("id"),
                    field("weekStartDate").and_then(model::parse_date),
                    field("weekEndDate").and_then(model::parse_date),
                );
                let (Some(id), Some(start), Some(end)) = parsed else {
                    continue;
                };
                let generated_at = field("generatedAt").unwrap_or_default();
                db::save_report(conn, id, start, end, generated_at, item)
                    .map_err(HandlerErr::update)?;
                stored += 1;
            }
            summary.add("weeklyReports", stored);
            summary.skip("weeklyReports", items.len() - stored);
        }
        LegacyKey::CurrentUser => {
            summary
                .warnings
                .push("the saved login is not imported; log in again".to_string());
        }
    }
    Ok(())
}

/// Import order so that sessions exist before session-scoped data.
fn rank(key: &LegacyKey) -> u8 {
    match key {
        LegacyKey::Users => 0,
        LegacyKey::Sessions => 1,
        LegacyKey::SemesterSchedules | LegacyKey::Holidays => 2,
        LegacyKey::Students => 3,
        LegacyKey::Config(_) | LegacyKey::ArchivedConfig(_) => 4,
        LegacyKey::Records(_) | LegacyKey::ArchivedRecords(_) => 5,
        LegacyKey::Pending | LegacyKey::WeeklyReports | LegacyKey::CurrentUser => 6,
    }
}

fn import_legacy_storage(conn: &Connection, user: Option<&User>, params: &Value) -> Result<Value, HandlerErr> {
    let user_count = db::count_users(conn).map_err(HandlerErr::query)?;
    let is_admin = user.map(|u| u.role == UserRole::Admin).unwrap_or(false);
    require(
        user_count == 0 || is_admin,
        "only administrators can import into a workspace with users",
    )?;
    let Some(entries) = params.get("entries").and_then(|v| v.as_object()) else {
        return Err(HandlerErr::bad_params("entries must be an object of storage keys"));
    };

    let mut summary = ImportSummary::default();
    let mut known: Vec<(LegacyKey, &String, &Value)> = Vec::new();
    for (k, v) in entries {
        match parse_key(k) {
            Some(key) => known.push((key, k, v)),
            None => summary.unknown_keys.push(k.clone()),
        }
    }
    known.sort_by_key(|(key, _, _)| rank(key));

    let tx = conn.unchecked_transaction().map_err(HandlerErr::tx)?;
    for (key, raw_key, raw) in &known {
        let value = match entry_value(raw) {
            Ok(v) => v,
            Err(e) => {
                summary.warnings.push(format!("{}: not valid JSON ({})", raw_key, e));
                continue;
            }
        };
        import_entry(&tx, key, &value, &mut summary)
            .map_err(|e| e.with_details(json!({ "key": raw_key })))?;
    }
    tx.commit().map_err(HandlerErr::commit)?;

    log::info!(
        "legacy import finished: {:?} (skipped {:?}, {} unknown keys)",
        summary.imported,
        summary.skipped,
        summary.unknown_keys.len()
    );
    serde_json::to_value(&summary).map_err(|e| HandlerErr::new("io_failed", e.to_string()))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "import.legacyStorage" => Some(with_db(state, req, import_legacy_storage)),
        _ => None,
    }
}
