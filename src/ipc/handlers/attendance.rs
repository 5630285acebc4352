use crate::auth;
use crate::calc;
use crate::db;
use crate::ipc::error::HandlerErr;
use crate::ipc::handlers::settings;
use crate::ipc::helpers::{
    get_grade_class, get_optional_str, get_optional_status, get_period, get_required_date,
    get_required_status, get_required_str, require, require_user, with_db,
};
use crate::ipc::types::{AppState, Request};
use crate::model::{format_date, AttendanceRecord, AttendanceStatus, Student, User, MAX_PERIOD};
use crate::schedule::{self, ResolvedDay};
use chrono::NaiveDate;
use rusqlite::Connection;
use serde_json::{json, Value};
use std::collections::HashMap;

/// One class on one date, with everything a write needs.
struct ClassDay {
    session_id: String,
    day: ResolvedDay,
    visible: Vec<u8>,
    students: Vec<Student>,
}

fn load_class_day(conn: &Connection, grade: u8, class_num: u8, date: NaiveDate) -> Result<ClassDay, HandlerErr> {
    let (session_id, day) = db::resolve_day_for(conn, date).map_err(HandlerErr::query)?;
    let prefs = settings::attendance_settings(conn).map_err(HandlerErr::query)?;
    let visible = schedule::visible_periods(&day, grade, prefs.lower_grade_max_period)
        .into_iter()
        .map(|p| p.period)
        .collect();
    let students = db::list_class_students(conn, grade, class_num).map_err(HandlerErr::query)?;
    Ok(ClassDay {
        session_id,
        day,
        visible,
        students,
    })
}

fn require_class_writer(user: Option<&User>, grade: u8, class_num: u8) -> Result<(), HandlerErr> {
    require_user(user)?;
    require(
        auth::can_write_class_attendance(user, grade, class_num),
        "editing attendance for this class is not allowed",
    )
}

/// Cells written when `status` is set on `period`. `home_return` fills the
/// rest of the visible day; a home-school day always records `home_school`.
fn plan_cell_writes(
    student: &Student,
    date: NaiveDate,
    period: u8,
    status: AttendanceStatus,
    visible: &[u8],
) -> Vec<(u8, AttendanceStatus)> {
    let targets: Vec<u8> = if status == AttendanceStatus::HomeReturn {
        visible.iter().copied().filter(|p| *p >= period).collect()
    } else {
        vec![period]
    };
    let status = if calc::is_home_school_day(student, date) {
        AttendanceStatus::HomeSchool
    } else {
        status
    };
    targets.into_iter().map(|p| (p, status)).collect()
}

fn write_cells(
    conn: &Connection,
    session_id: &str,
    student: &Student,
    date: NaiveDate,
    cells: &[(u8, AttendanceStatus)],
    note: Option<&str>,
) -> Result<(), HandlerErr> {
    let sid = (!session_id.is_empty()).then(|| session_id.to_string());
    for (period, status) in cells {
        let rec = AttendanceRecord {
            id: AttendanceRecord::record_id(&student.id, date, *period),
            student_id: student.id.clone(),
            date,
            period: *period,
            status: *status,
            note: note.map(str::to_string),
            session_id: sid.clone(),
        };
        db::upsert_record(conn, session_id, &rec).map_err(HandlerErr::update)?;
    }
    Ok(())
}

fn day_open(conn: &Connection, user: Option<&User>, params: &Value) -> Result<Value, HandlerErr> {
    require_user(user)?;
    let (grade, class_num) = get_grade_class(params)?;
    let date = get_required_date(params, "date")?;
    let cd = load_class_day(conn, grade, class_num, date)?;
    let records = db::session_records_between(conn, &cd.session_id, date, date)
        .map_err(HandlerErr::query)?;
    let recorded: HashMap<(&str, u8), &AttendanceRecord> = records
        .iter()
        .map(|r| ((r.student_id.as_str(), r.period), r))
        .collect();
    let pending = db::list_open_pending(conn, None).map_err(HandlerErr::query)?;

    let rows: Vec<Value> = cd
        .students
        .iter()
        .map(|s| {
            let cells: Vec<Value> = cd
                .visible
                .iter()
                .map(|p| {
                    let rec = recorded.get(&(s.id.as_str(), *p));
                    let status = calc::effective_status(s, date, *p, rec.map(|r| r.status));
                    json!({
                        "period": p,
                        "status": status,
                        "implicit": rec.is_none() && status.is_some(),
                        "note": rec.and_then(|r| r.note.clone())
                    })
                })
                .collect();
            json!({
                "student": s,
                "isHomeSchoolDay": calc::is_home_school_day(s, date),
                "cells": cells,
                "pendingCount": pending
                    .iter()
                    .filter(|p| p.student_id == s.id && p.date == date)
                    .count()
            })
        })
        .collect();

    let visible_periods: Vec<_> = cd
        .day
        .periods
        .iter()
        .filter(|p| cd.visible.contains(&p.period))
        .cloned()
        .collect();
    Ok(json!({
        "date": format_date(date),
        "grade": grade,
        "class": class_num,
        "sessionId": cd.session_id,
        "dayType": cd.day.day_type,
        "schedule": cd.day,
        "visiblePeriods": visible_periods,
        "students": rows,
        "canEdit": auth::can_write_class_attendance(user, grade, class_num)
    }))
}

fn set_status(conn: &Connection, user: Option<&User>, params: &Value) -> Result<Value, HandlerErr> {
    require_user(user)?;
    let student_id = get_required_str(params, "studentId")?;
    let date = get_required_date(params, "date")?;
    let period = get_period(params)?;
    let status = get_optional_status(params)?;
    let note = get_optional_str(params, "note")?
        .map(|n| n.trim().to_string())
        .filter(|n| !n.is_empty());

    let student = db::get_student(conn, &student_id)
        .map_err(HandlerErr::query)?
        .ok_or_else(|| HandlerErr::not_found("student not found"))?;
    require_class_writer(user, student.grade, student.class_num)?;
    let cd = load_class_day(conn, student.grade, student.class_num, date)?;

    let Some(status) = status else {
        if calc::is_implicitly_fixed(&student, date, period) {
            return Ok(json!({ "changed": [], "kept": true }));
        }
        let record_id = AttendanceRecord::record_id(&student.id, date, period);
        let removed = db::delete_record(conn, &cd.session_id, &record_id).map_err(HandlerErr::update)?;
        let changed: Vec<u8> = if removed { vec![period] } else { Vec::new() };
        return Ok(json!({ "changed": changed, "kept": false }));
    };

    let cells = plan_cell_writes(&student, date, period, status, &cd.visible);
    let tx = conn.unchecked_transaction().map_err(HandlerErr::tx)?;
    write_cells(&tx, &cd.session_id, &student, date, &cells, note.as_deref())?;
    tx.commit().map_err(HandlerErr::commit)?;
    Ok(json!({
        "changed": cells.iter().map(|(p, _)| *p).collect::<Vec<_>>(),
        "status": cells.first().map(|(_, s)| *s),
        "kept": false
    }))
}

fn bulk_set(conn: &Connection, user: Option<&User>, params: &Value) -> Result<Value, HandlerErr> {
    let (grade, class_num) = get_grade_class(params)?;
    require_class_writer(user, grade, class_num)?;
    let date = get_required_date(params, "date")?;
    let period = get_period(params)?;
    let status = get_required_status(params)?;
    let cd = load_class_day(conn, grade, class_num, date)?;

    let tx = conn.unchecked_transaction().map_err(HandlerErr::tx)?;
    let mut written = 0usize;
    for s in &cd.students {
        let cells = plan_cell_writes(s, date, period, status, &cd.visible);
        write_cells(&tx, &cd.session_id, s, date, &cells, None)?;
        written += cells.len();
    }
    tx.commit().map_err(HandlerErr::commit)?;
    Ok(json!({ "written": written, "students": cd.students.len() }))
}

fn bulk_set_all_periods(conn: &Connection, user: Option<&User>, params: &Value) -> Result<Value, HandlerErr> {
    let (grade, class_num) = get_grade_class(params)?;
    require_class_writer(user, grade, class_num)?;
    let date = get_required_date(params, "date")?;
    let status = get_required_status(params)?;
    let cd = load_class_day(conn, grade, class_num, date)?;
    let periods: Vec<u8> = match params.get("periods").and_then(|v| v.as_array()) {
        Some(items) => {
            let mut out = Vec::with_capacity(items.len());
            for item in items {
                match item.as_u64() {
                    Some(p) if (1..=MAX_PERIOD as u64).contains(&p) => out.push(p as u8),
                    _ => {
                        return Err(HandlerErr::bad_params(format!(
                            "periods must be integers in 1..={}",
                            MAX_PERIOD
                        )))
                    }
                }
            }
            out
        }
        None => cd.visible.clone(),
    };

    let tx = conn.unchecked_transaction().map_err(HandlerErr::tx)?;
    let mut written = 0usize;
    for s in &cd.students {
        let mut cells: Vec<(u8, AttendanceStatus)> = Vec::new();
        for p in &periods {
            cells.extend(plan_cell_writes(s, date, *p, status, &cd.visible));
        }
        cells.sort_by_key(|(p, _)| *p);
        cells.dedup_by_key(|(p, _)| *p);
        write_cells(&tx, &cd.session_id, s, date, &cells, None)?;
        written += cells.len();
    }
    tx.commit().map_err(HandlerErr::commit)?;
    Ok(json!({ "written": written, "students": cd.students.len() }))
}

fn reset(conn: &Connection, user: Option<&User>, params: &Value, period: Option<u8>) -> Result<Value, HandlerErr> {
    let (grade, class_num) = get_grade_class(params)?;
    require_class_writer(user, grade, class_num)?;
    let date = get_required_date(params, "date")?;
    let cd = load_class_day(conn, grade, class_num, date)?;
    let ids: Vec<String> = cd.students.iter().map(|s| s.id.clone()).collect();
    let tx = conn.unchecked_transaction().map_err(HandlerErr::tx)?;
    let removed = db::delete_day_records(&tx, &cd.session_id, &ids, date, period)
        .map_err(HandlerErr::update)?;
    tx.commit().map_err(HandlerErr::commit)?;
    Ok(json!({ "removed": removed }))
}

fn reset_period(conn: &Connection, user: Option<&User>, params: &Value) -> Result<Value, HandlerErr> {
    let period = get_period(params)?;
    reset(conn, user, params, Some(period))
}

fn reset_day(conn: &Connection, user: Option<&User>, params: &Value) -> Result<Value, HandlerErr> {
    reset(conn, user, params, None)
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "attendance.dayOpen" => Some(with_db(state, req, day_open)),
        "attendance.setStatus" => Some(with_db(state, req, set_status)),
        "attendance.bulkSet" => Some(with_db(state, req, bulk_set)),
        "attendance.bulkSetAllPeriods" => Some(with_db(state, req, bulk_set_all_periods)),
        "attendance.resetPeriod" => Some(with_db(state, req, reset_period)),
        "attendance.resetDay" => Some(with_db(state, req, reset_day)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").expect("date")
    }

    fn student() -> Student {
        Student {
            id: "1-1-1".to_string(),
            name: "Kim".to_string(),
            grade: 1,
            class_num: 1,
            number: 1,
            is_home_school: false,
            home_school_start_date: None,
            home_school_end_date: None,
            is_home_return: false,
            home_return_start_period: None,
            is_friendship_class: false,
        }
    }

    #[test]
    fn home_return_fills_remaining_visible_periods() {
        let visible: Vec<u8> = (1..=11).collect();
        let cells = plan_cell_writes(&student(), d("2024-03-04"), 9, AttendanceStatus::HomeReturn, &visible);
        assert_eq!(
            cells,
            vec![
                (9, AttendanceStatus::HomeReturn),
                (10, AttendanceStatus::HomeReturn),
                (11, AttendanceStatus::HomeReturn)
            ]
        );
        let single = plan_cell_writes(&student(), d("2024-03-04"), 3, AttendanceStatus::Late, &visible);
        assert_eq!(single, vec![(3, AttendanceStatus::Late)]);
    }

    #[test]
    fn home_school_day_coerces_status() {
        let mut s = student();
        s.is_home_school = true;
        s.home_school_start_date = Some(d("2024-03-01"));
        s.home_school_end_date = Some(d("2024-03-10"));
        let visible: Vec<u8> = (1..=12).collect();
        let cells = plan_cell_writes(&s, d("2024-03-04"), 2, AttendanceStatus::Absent, &visible);
        assert_eq!(cells, vec![(2, AttendanceStatus::HomeSchool)]);
        let after = plan_cell_writes(&s, d("2024-03-11"), 2, AttendanceStatus::Absent, &visible);
        assert_eq!(after, vec![(2, AttendanceStatus::Absent)]);
    }
}
