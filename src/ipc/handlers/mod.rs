pub mod attendance;
pub mod auth;
pub mod backup_exchange;
pub mod calendar;
pub mod core;
pub mod import_legacy;
pub mod pending;
pub mod reports;
pub mod sessions;
pub mod settings;
pub mod stats;
pub mod students;
pub mod users;
