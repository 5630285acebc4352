use crate::auth;
use crate::db;
use crate::ipc::error::{err, ok, HandlerErr};
use crate::ipc::helpers::{get_optional_str, get_required_str, require_user, to_json};
use crate::ipc::types::{AppState, Request};
use crate::model::{now_timestamp, User, UserRole};
use crate::security;
use rusqlite::Connection;
use serde_json::json;

fn bootstrap_admin(conn: &Connection, params: &serde_json::Value) -> Result<User, HandlerErr> {
    let existing = db::count_users(conn).map_err(HandlerErr::query)?;
    if existing > 0 {
        return Err(HandlerErr::conflict("users already exist"));
    }
    let name = security::validate_user_name(&get_required_str(params, "name")?)
        .map_err(HandlerErr::bad_params)?;
    let email = get_optional_str(params, "email")?
        .map(|e| e.trim().to_string())
        .filter(|e| !e.is_empty());
    if let Some(e) = email.as_deref() {
        if !security::validate_email(e) {
            return Err(HandlerErr::bad_params("invalid email"));
        }
    }
    let password = get_required_str(params, "password")?;
    security::validate_password_strength(&password).map_err(HandlerErr::bad_params)?;

    let now = now_timestamp();
    let user = User {
        id: format!("user-{}", uuid::Uuid::new_v4()),
        name,
        email,
        role: UserRole::Admin,
        grade: None,
        class_num: None,
        subject: None,
        student_id: None,
        password_hash: Some(security::hash_password(&password)),
        created_at: now.clone(),
        last_login: Some(now),
    };
    db::upsert_user(conn, &user).map_err(HandlerErr::update)?;
    Ok(user)
}

fn handle_bootstrap_admin(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    match bootstrap_admin(conn, &req.params) {
        Ok(user) => {
            log::info!("created first administrator {}", user.id);
            let body = json!({ "user": user });
            state.current_user = Some(user);
            ok(&req.id, body)
        }
        Err(e) => e.response(&req.id),
    }
}

fn login(conn: &Connection, params: &serde_json::Value) -> Result<User, HandlerErr> {
    let identifier = get_required_str(params, "identifier")?;
    let password = get_required_str(params, "password")?;
    let users = db::list_users(conn).map_err(HandlerErr::query)?;
    let Some(found) = auth::authenticate(&users, &identifier, &password) else {
        log::warn!("login failed for {:?}", identifier.trim());
        return Err(HandlerErr::new(
            "not_authenticated",
            "unknown user or wrong password",
        ));
    };
    let mut user = found.clone();
    if user
        .password_hash
        .as_deref()
        .map(security::needs_rehash)
        .unwrap_or(false)
    {
        log::info!("upgrading stored password hash for {}", user.id);
        user.password_hash = Some(security::hash_password(&password));
    }
    user.last_login = Some(now_timestamp());
    db::upsert_user(conn, &user).map_err(HandlerErr::update)?;
    Ok(user)
}

fn handle_login(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    match login(conn, &req.params) {
        Ok(user) => {
            log::info!("user {} logged in as {}", user.id, user.role.as_str());
            let body = json!({ "user": user });
            state.current_user = Some(user);
            ok(&req.id, body)
        }
        Err(e) => e.response(&req.id),
    }
}

fn handle_logout(state: &mut AppState, req: &Request) -> serde_json::Value {
    if let Some(user) = state.current_user.take() {
        log::info!("user {} logged out", user.id);
    }
    ok(&req.id, json!({ "ok": true }))
}

fn handle_current_user(state: &mut AppState, req: &Request) -> serde_json::Value {
    let permissions = state
        .current_user
        .as_ref()
        .map(|u| auth::role_permissions(u.role).to_vec())
        .unwrap_or_default();
    ok(
        &req.id,
        json!({
            "user": state.current_user,
            "permissions": permissions
        }),
    )
}

fn change_password(
    conn: &Connection,
    user: Option<&User>,
    params: &serde_json::Value,
) -> Result<User, HandlerErr> {
    let user = require_user(user)?;
    let current = get_required_str(params, "currentPassword")?;
    let next = get_required_str(params, "newPassword")?;
    let mut stored = db::get_user(conn, &user.id)
        .map_err(HandlerErr::query)?
        .ok_or_else(|| HandlerErr::not_found("user not found"))?;
    let hash = stored.password_hash.clone().unwrap_or_default();
    if !security::verify_password(&current, &hash) {
        return Err(HandlerErr::forbidden("current password is wrong"));
    }
    security::validate_password_strength(&next).map_err(HandlerErr::bad_params)?;
    stored.password_hash = Some(security::hash_password(&next));
    db::upsert_user(conn, &stored).map_err(HandlerErr::update)?;
    Ok(stored)
}

fn handle_change_password(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    match change_password(conn, state.current_user.as_ref(), &req.params).and_then(|u| {
        let body = to_json(&u)?;
        Ok((u, body))
    }) {
        Ok((user, body)) => {
            state.current_user = Some(user);
            ok(&req.id, json!({ "user": body }))
        }
        Err(e) => e.response(&req.id),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "auth.bootstrapAdmin" => Some(handle_bootstrap_admin(state, req)),
        "auth.login" => Some(handle_login(state, req)),
        "auth.logout" => Some(handle_logout(state, req)),
        "auth.currentUser" => Some(handle_current_user(state, req)),
        "auth.changePassword" => Some(handle_change_password(state, req)),
        _ => None,
    }
}
