use crate::db;
use crate::ipc::error::HandlerErr;
use crate::ipc::helpers::{
    get_optional_str, get_optional_u8, get_required_str, require, require_user, to_json, with_db,
};
use crate::ipc::types::{AppState, Request};
use crate::model::{now_timestamp, User, UserRole, MAX_CLASS, MAX_GRADE, MIN_CLASS, MIN_GRADE};
use crate::security;
use rusqlite::Connection;
use serde_json::{json, Value};

fn require_admin(user: Option<&User>) -> Result<&User, HandlerErr> {
    let user = require_user(user)?;
    require(user.role == UserRole::Admin, "only administrators manage users")?;
    Ok(user)
}

fn parse_role(v: &Value) -> Result<UserRole, HandlerErr> {
    v.as_str()
        .and_then(UserRole::parse)
        .ok_or_else(|| HandlerErr::bad_params("role must be admin|teacher|subject_teacher|student_monitor"))
}

fn clean_email(raw: Option<String>) -> Result<Option<String>, HandlerErr> {
    let email = raw.map(|e| e.trim().to_string()).filter(|e| !e.is_empty());
    if let Some(e) = email.as_deref() {
        if !security::validate_email(e) {
            return Err(HandlerErr::bad_params("invalid email"));
        }
    }
    Ok(email)
}

fn ensure_unique(users: &[User], candidate: &User) -> Result<(), HandlerErr> {
    let name = candidate.name.trim().to_lowercase();
    let email = candidate.email.as_deref().map(|e| e.to_lowercase());
    for other in users.iter().filter(|u| u.id != candidate.id) {
        if other.name.trim().to_lowercase() == name {
            return Err(HandlerErr::conflict(format!("name already in use: {}", candidate.name)));
        }
        if let (Some(a), Some(b)) = (email.as_deref(), other.email.as_deref()) {
            if a == b.to_lowercase() {
                return Err(HandlerErr::conflict(format!("email already in use: {}", a)));
            }
        }
    }
    Ok(())
}

fn users_list(conn: &Connection, user: Option<&User>, _params: &Value) -> Result<Value, HandlerErr> {
    require_admin(user)?;
    let users = db::list_users(conn).map_err(HandlerErr::query)?;
    Ok(json!({ "users": users }))
}

fn users_create(conn: &Connection, user: Option<&User>, params: &Value) -> Result<Value, HandlerErr> {
    require_admin(user)?;
    let name = security::validate_user_name(&get_required_str(params, "name")?)
        .map_err(HandlerErr::bad_params)?;
    let role = parse_role(params.get("role").unwrap_or(&Value::Null))?;
    let password = get_required_str(params, "password")?;
    security::validate_password_strength(&password).map_err(HandlerErr::bad_params)?;

    let created = User {
        id: format!("user-{}", uuid::Uuid::new_v4()),
        name,
        email: clean_email(get_optional_str(params, "email")?)?,
        role,
        grade: get_optional_u8(params, "grade", MIN_GRADE, MAX_GRADE)?,
        class_num: get_optional_u8(params, "class", MIN_CLASS, MAX_CLASS)?,
        subject: get_optional_str(params, "subject")?.map(|s| security::sanitize_input(&s)),
        student_id: get_optional_str(params, "studentId")?,
        password_hash: Some(security::hash_password(&password)),
        created_at: now_timestamp(),
        last_login: None,
    };
    let users = db::list_users(conn).map_err(HandlerErr::query)?;
    ensure_unique(&users, &created)?;
    db::upsert_user(conn, &created).map_err(HandlerErr::update)?;
    log::info!("user {} created with role {}", created.id, created.role.as_str());
    Ok(json!({ "user": to_json(&created)? }))
}

/// The caller cannot change their own role, and the last admin cannot be
/// demoted.
fn ensure_role_change_allowed(
    conn: &Connection,
    caller: &User,
    target: &User,
    role: UserRole,
) -> Result<(), HandlerErr> {
    if role == target.role {
        return Ok(());
    }
    if caller.id == target.id {
        return Err(HandlerErr::conflict("cannot change your own role"));
    }
    if target.role == UserRole::Admin {
        let admins = db::list_users(conn)
            .map_err(HandlerErr::query)?
            .iter()
            .filter(|u| u.role == UserRole::Admin && u.id != target.id)
            .count();
        if admins == 0 {
            return Err(HandlerErr::conflict("cannot demote the last administrator"));
        }
    }
    Ok(())
}

fn users_update(conn: &Connection, user: Option<&User>, params: &Value) -> Result<Value, HandlerErr> {
    let admin = require_admin(user)?;
    let id = get_required_str(params, "id")?;
    let Some(patch) = params.get("patch").and_then(|v| v.as_object()) else {
        return Err(HandlerErr::bad_params("missing patch"));
    };
    let mut target = db::get_user(conn, &id)
        .map_err(HandlerErr::query)?
        .ok_or_else(|| HandlerErr::not_found("user not found"))?;
    let patch = Value::Object(patch.clone());

    if patch.get("name").is_some() {
        target.name = security::validate_user_name(&get_required_str(&patch, "name")?)
            .map_err(HandlerErr::bad_params)?;
    }
    if patch.get("email").is_some() {
        target.email = clean_email(get_optional_str(&patch, "email")?)?;
    }
    if let Some(v) = patch.get("role") {
        let role = parse_role(v)?;
        ensure_role_change_allowed(conn, admin, &target, role)?;
        target.role = role;
    }
    if patch.get("grade").is_some() {
        target.grade = get_optional_u8(&patch, "grade", MIN_GRADE, MAX_GRADE)?;
    }
    if patch.get("class").is_some() {
        target.class_num = get_optional_u8(&patch, "class", MIN_CLASS, MAX_CLASS)?;
    }
    if patch.get("subject").is_some() {
        target.subject = get_optional_str(&patch, "subject")?.map(|s| security::sanitize_input(&s));
    }
    if patch.get("studentId").is_some() {
        target.student_id = get_optional_str(&patch, "studentId")?;
    }
    if patch.get("password").is_some() {
        let password = get_required_str(&patch, "password")?;
        security::validate_password_strength(&password).map_err(HandlerErr::bad_params)?;
        target.password_hash = Some(security::hash_password(&password));
    }

    let users = db::list_users(conn).map_err(HandlerErr::query)?;
    ensure_unique(&users, &target)?;
    db::upsert_user(conn, &target).map_err(HandlerErr::update)?;
    Ok(json!({ "user": to_json(&target)? }))
}

fn users_delete(conn: &Connection, user: Option<&User>, params: &Value) -> Result<Value, HandlerErr> {
    let admin = require_admin(user)?;
    let id = get_required_str(params, "id")?;
    if admin.id == id {
        return Err(HandlerErr::conflict("cannot delete the logged-in user"));
    }
    let deleted = db::delete_user(conn, &id).map_err(HandlerErr::update)?;
    if !deleted {
        return Err(HandlerErr::not_found("user not found"));
    }
    log::info!("user {} deleted", id);
    Ok(json!({ "ok": true }))
}

fn handle_update(state: &mut AppState, req: &Request) -> Value {
    let resp = with_db(state, req, users_update);
    let own = state
        .current_user
        .as_ref()
        .map(|u| u.id.as_str())
        .filter(|id| resp["result"]["user"]["id"].as_str() == Some(*id))
        .map(str::to_string);
    if let (Some(id), Some(conn)) = (own, state.db.as_ref()) {
        match db::get_user(conn, &id) {
            Ok(Some(fresh)) => state.current_user = Some(fresh),
            Ok(None) => state.current_user = None,
            Err(e) => log::warn!("failed to refresh logged-in user {}: {e:#}", id),
        }
    }
    resp
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "users.list" => Some(with_db(state, req, users_list)),
        "users.create" => Some(with_db(state, req, users_create)),
        "users.update" => Some(handle_update(state, req)),
        "users.delete" => Some(with_db(state, req, users_delete)),
        _ => None,
    }
}
