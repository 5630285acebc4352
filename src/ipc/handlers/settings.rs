use crate::auth;
use crate::db;
use crate::ipc::error::HandlerErr;
use crate::ipc::helpers::{get_required_str, require, require_user, with_db};
use crate::ipc::types::{AppState, Request};
use crate::model::{User, MAX_PERIOD};
use crate::report::ReportSettings;
use crate::schedule::DEFAULT_LOWER_GRADE_MAX_PERIOD;
use anyhow::Context;
use rusqlite::Connection;
use serde::Deserialize;
use serde_json::{json, Map, Value};

pub const DEFAULT_NIGHT_STUDY_START_PERIOD: u8 = 8;

#[derive(Clone, Copy)]
enum SettingsSection {
    Attendance,
    Reports,
}

impl SettingsSection {
    fn parse(s: &str) -> Option<Self> {
        match s {
            "attendance" => Some(Self::Attendance),
            "reports" => Some(Self::Reports),
            _ => None,
        }
    }

    fn key(self) -> &'static str {
        match self {
            Self::Attendance => "settings.attendance",
            Self::Reports => "settings.reports",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttendanceSettings {
    pub lower_grade_max_period: u8,
    pub night_study_start_period: u8,
}

fn default_section(section: SettingsSection) -> Value {
    match section {
        SettingsSection::Attendance => json!({
            "lowerGradeMaxPeriod": DEFAULT_LOWER_GRADE_MAX_PERIOD,
            "nightStudyStartPeriod": DEFAULT_NIGHT_STUDY_START_PERIOD
        }),
        SettingsSection::Reports => {
            serde_json::to_value(ReportSettings::default()).unwrap_or_else(|_| json!({}))
        }
    }
}

fn as_object_mut(value: &mut Value) -> Result<&mut Map<String, Value>, String> {
    value
        .as_object_mut()
        .ok_or_else(|| "internal settings object must be a JSON object".to_string())
}

fn parse_i64_range(v: &Value, key: &str, min: i64, max: i64) -> Result<i64, String> {
    let n = v
        .as_i64()
        .ok_or_else(|| format!("{} must be integer", key))?;
    if !(min..=max).contains(&n) {
        return Err(format!("{} must be in {}..={}", key, min, max));
    }
    Ok(n)
}

fn parse_f64_range(v: &Value, key: &str, min: f64, max: f64) -> Result<f64, String> {
    let n = v
        .as_f64()
        .ok_or_else(|| format!("{} must be a number", key))?;
    if !(min..=max).contains(&n) {
        return Err(format!("{} must be in {}..={}", key, min, max));
    }
    Ok(n)
}

fn parse_keywords(v: &Value, key: &str) -> Result<Value, String> {
    let items = v
        .as_array()
        .ok_or_else(|| format!("{} must be an array of strings", key))?;
    if items.len() > 20 {
        return Err(format!("{} allows at most 20 entries", key));
    }
    let mut out = Vec::new();
    for item in items {
        let s = item
            .as_str()
            .ok_or_else(|| format!("{} must be an array of strings", key))?
            .trim();
        if s.is_empty() {
            continue;
        }
        if s.chars().count() > 32 {
            return Err(format!("{} entries must be <= 32 characters", key));
        }
        out.push(Value::String(s.to_string()));
    }
    Ok(Value::Array(out))
}

fn merge_section_patch(
    section: SettingsSection,
    current: &mut Value,
    patch: &Map<String, Value>,
) -> Result<(), String> {
    let obj = as_object_mut(current)?;
    for (k, v) in patch {
        match section {
            SettingsSection::Attendance => match k.as_str() {
                "lowerGradeMaxPeriod" | "nightStudyStartPeriod" => {
                    obj.insert(k.clone(), Value::from(parse_i64_range(v, k, 1, MAX_PERIOD as i64)?));
                }
                _ => return Err(format!("unknown attendance field: {}", k)),
            },
            SettingsSection::Reports => match k.as_str() {
                "lateRateWeekIncrease"
                | "lateRateMonthIncrease"
                | "absentRateWeekIncrease"
                | "classAttendanceFloor"
                | "gradeAttendanceFloor"
                | "completionRate" => {
                    obj.insert(k.clone(), Value::from(parse_f64_range(v, k, 0.0, 100.0)?));
                }
                "lateRateWeekDecrease" => {
                    obj.insert(k.clone(), Value::from(parse_f64_range(v, k, -100.0, 0.0)?));
                }
                "returnWindowDays" => {
                    obj.insert(k.clone(), Value::from(parse_i64_range(v, k, 0, 60)?));
                }
                "healthKeywords" => {
                    obj.insert(k.clone(), parse_keywords(v, k)?);
                }
                _ => return Err(format!("unknown reports field: {}", k)),
            },
        }
    }
    Ok(())
}

fn load_section(conn: &Connection, section: SettingsSection) -> anyhow::Result<Value> {
    let mut current = default_section(section);
    if let Some(saved) = db::settings_get_json(conn, section.key())? {
        if let Some(saved_obj) = saved.as_object() {
            // Stale fields from older versions are skipped, not fatal.
            if let Err(e) = merge_section_patch(section, &mut current, saved_obj) {
                log::warn!("ignoring part of saved {} settings: {}", section.key(), e);
            }
        }
    }
    Ok(current)
}

pub fn attendance_settings(conn: &Connection) -> anyhow::Result<AttendanceSettings> {
    let v = load_section(conn, SettingsSection::Attendance)?;
    serde_json::from_value(v).context("decode attendance settings")
}

pub fn report_settings(conn: &Connection) -> anyhow::Result<ReportSettings> {
    let v = load_section(conn, SettingsSection::Reports)?;
    serde_json::from_value(v).context("decode report settings")
}

fn settings_get(conn: &Connection, user: Option<&User>, _params: &Value) -> Result<Value, HandlerErr> {
    require_user(user)?;
    let attendance = load_section(conn, SettingsSection::Attendance).map_err(HandlerErr::query)?;
    let reports = load_section(conn, SettingsSection::Reports).map_err(HandlerErr::query)?;
    Ok(json!({
        "attendance": attendance,
        "reports": reports
    }))
}

fn settings_update(conn: &Connection, user: Option<&User>, params: &Value) -> Result<Value, HandlerErr> {
    require_user(user)?;
    require(auth::can_edit_settings(user), "editing settings is not allowed")?;
    let section_raw = get_required_str(params, "section")?;
    let Some(section) = SettingsSection::parse(&section_raw) else {
        return Err(HandlerErr::bad_params("unknown section"));
    };
    let Some(patch_obj) = params.get("patch").and_then(|v| v.as_object()) else {
        return Err(HandlerErr::bad_params("patch must be an object"));
    };

    let mut current = load_section(conn, section).map_err(HandlerErr::query)?;
    merge_section_patch(section, &mut current, patch_obj).map_err(HandlerErr::bad_params)?;
    db::settings_set_json(conn, section.key(), &current).map_err(HandlerErr::update)?;
    Ok(json!({ "section": section_raw, "values": current }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "settings.get" => Some(with_db(state, req, settings_get)),
        "settings.update" => Some(with_db(state, req, settings_update)),
        _ => None,
    }
}
