use crate::auth;
use crate::db;
use crate::ipc::error::HandlerErr;
use crate::ipc::helpers::{
    get_optional_str, get_optional_u8, get_required_str, require, require_user, to_json, with_db,
};
use crate::ipc::types::{AppState, Request};
use crate::model::{Student, User, MAX_CLASS, MAX_GRADE, MAX_PERIOD, MIN_CLASS, MIN_GRADE};
use crate::security;
use rusqlite::Connection;
use serde_json::{json, Value};

fn validate_student(mut s: Student) -> Result<Student, HandlerErr> {
    s.name = security::validate_user_name(&s.name).map_err(HandlerErr::bad_params)?;
    if !(MIN_GRADE..=MAX_GRADE).contains(&s.grade) {
        return Err(HandlerErr::bad_params(format!("grade must be in {}..={}", MIN_GRADE, MAX_GRADE)));
    }
    if !(MIN_CLASS..=MAX_CLASS).contains(&s.class_num) {
        return Err(HandlerErr::bad_params(format!("class must be in {}..={}", MIN_CLASS, MAX_CLASS)));
    }
    if s.number == 0 {
        return Err(HandlerErr::bad_params("number must be positive"));
    }
    if let (Some(start), Some(end)) = (s.home_school_start_date, s.home_school_end_date) {
        if start > end {
            return Err(HandlerErr::bad_params("homeSchoolStartDate must not be after homeSchoolEndDate"));
        }
    }
    if let Some(p) = s.home_return_start_period {
        if !(1..=MAX_PERIOD).contains(&p) {
            return Err(HandlerErr::bad_params(format!("homeReturnStartPeriod must be in 1..={}", MAX_PERIOD)));
        }
    }
    if s.id.trim().is_empty() {
        s.id = format!("{}-{}-{}", s.grade, s.class_num, s.number);
    } else if !security::validate_id(&s.id) {
        return Err(HandlerErr::bad_params("invalid student id"));
    }
    Ok(s)
}

/// Decode a student payload; `id` may be omitted and defaults to
/// `{grade}-{class}-{number}`.
fn decode_student(v: &Value) -> Result<Student, HandlerErr> {
    let mut v = v.clone();
    if let Some(obj) = v.as_object_mut() {
        obj.entry("id").or_insert_with(|| Value::String(String::new()));
    }
    let s: Student = serde_json::from_value(v)
        .map_err(|e| HandlerErr::bad_params(format!("invalid student: {}", e)))?;
    validate_student(s)
}

pub fn matches_query(s: &Student, query: &str) -> bool {
    let q = query.trim().to_lowercase();
    if q.is_empty() {
        return true;
    }
    s.name.to_lowercase().contains(&q)
        || s.number.to_string().contains(&q)
        || format!("{}학년 {}반", s.grade, s.class_num).contains(&q)
        || format!("{}-{}", s.grade, s.class_num).contains(&q)
}

fn students_list(conn: &Connection, user: Option<&User>, params: &Value) -> Result<Value, HandlerErr> {
    require_user(user)?;
    let grade = get_optional_u8(params, "grade", MIN_GRADE, MAX_GRADE)?;
    let class_num = get_optional_u8(params, "class", MIN_CLASS, MAX_CLASS)?;
    let query = get_optional_str(params, "query")?.unwrap_or_default();
    let students: Vec<Student> = db::list_students(conn)
        .map_err(HandlerErr::query)?
        .into_iter()
        .filter(|s| grade.map(|g| s.grade == g).unwrap_or(true))
        .filter(|s| class_num.map(|c| s.class_num == c).unwrap_or(true))
        .filter(|s| matches_query(s, &query))
        .collect();
    Ok(json!({ "students": students }))
}

fn students_create(conn: &Connection, user: Option<&User>, params: &Value) -> Result<Value, HandlerErr> {
    require_user(user)?;
    require(auth::can_edit_students(user), "editing students is not allowed")?;
    let Some(raw) = params.get("student") else {
        return Err(HandlerErr::bad_params("missing student"));
    };
    let student = decode_student(raw)?;
    if db::get_student(conn, &student.id)
        .map_err(HandlerErr::query)?
        .is_some()
    {
        return Err(HandlerErr::conflict(format!("student already exists: {}", student.id)));
    }
    db::upsert_student(conn, &student).map_err(HandlerErr::update)?;
    Ok(json!({ "student": student }))
}

fn students_update(conn: &Connection, user: Option<&User>, params: &Value) -> Result<Value, HandlerErr> {
    require_user(user)?;
    require(auth::can_edit_students(user), "editing students is not allowed")?;
    let id = get_required_str(params, "id")?;
    let Some(patch) = params.get("patch").and_then(|v| v.as_object()) else {
        return Err(HandlerErr::bad_params("missing patch"));
    };
    let existing = db::get_student(conn, &id)
        .map_err(HandlerErr::query)?
        .ok_or_else(|| HandlerErr::not_found("student not found"))?;

    let mut merged = to_json(&existing)?;
    if let Some(obj) = merged.as_object_mut() {
        for (k, v) in patch {
            if k == "id" {
                continue;
            }
            obj.insert(k.clone(), v.clone());
        }
    }
    let updated = decode_student(&merged)?;
    db::upsert_student(conn, &updated).map_err(HandlerErr::update)?;
    Ok(json!({ "student": updated }))
}

fn students_delete(conn: &Connection, user: Option<&User>, params: &Value) -> Result<Value, HandlerErr> {
    require_user(user)?;
    require(auth::can_edit_students(user), "editing students is not allowed")?;
    let id = get_required_str(params, "id")?;
    if !db::delete_student(conn, &id).map_err(HandlerErr::update)? {
        return Err(HandlerErr::not_found("student not found"));
    }
    Ok(json!({ "ok": true }))
}

fn students_bulk_upsert(conn: &Connection, user: Option<&User>, params: &Value) -> Result<Value, HandlerErr> {
    require_user(user)?;
    require(auth::can_edit_students(user), "editing students is not allowed")?;
    let Some(items) = params.get("students").and_then(|v| v.as_array()) else {
        return Err(HandlerErr::bad_params("students must be an array"));
    };
    let mut students = Vec::with_capacity(items.len());
    for (i, item) in items.iter().enumerate() {
        let s = decode_student(item)
            .map_err(|e| e.with_details(json!({ "index": i })))?;
        students.push(s);
    }

    let tx = conn.unchecked_transaction().map_err(HandlerErr::tx)?;
    let mut created = 0usize;
    for s in &students {
        if db::get_student(&tx, &s.id).map_err(HandlerErr::query)?.is_none() {
            created += 1;
        }
        db::upsert_student(&tx, s).map_err(HandlerErr::update)?;
    }
    tx.commit().map_err(HandlerErr::commit)?;
    log::info!("bulk upserted {} students ({} new)", students.len(), created);
    Ok(json!({
        "upserted": students.len(),
        "created": created,
        "updated": students.len() - created
    }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "students.list" => Some(with_db(state, req, students_list)),
        "students.create" => Some(with_db(state, req, students_create)),
        "students.update" => Some(with_db(state, req, students_update)),
        "students.delete" => Some(with_db(state, req, students_delete)),
        "students.bulkUpsert" => Some(with_db(state, req, students_bulk_upsert)),
        _ => None,
    }
}
