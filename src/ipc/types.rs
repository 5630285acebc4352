use std::path::PathBuf;

use rusqlite::Connection;
use serde::Deserialize;

use crate::model::User;

#[derive(Debug, Deserialize, Clone)]
pub struct Request {
    pub id: String,
    pub method: String,
    #[serde(default)]
    pub params: serde_json::Value,
}

#[derive(Default)]
pub struct AppState {
    pub workspace: Option<PathBuf>,
    pub db: Option<Connection>,
    /// Signed-in account; cleared on logout and workspace switch.
    pub current_user: Option<User>,
}

