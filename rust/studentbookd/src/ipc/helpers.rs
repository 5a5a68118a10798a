use rusqlite::Connection;
use serde_json::Value;
use tracing::debug;

use crate::ipc::error::HandlerErr;
use crate::ipc::types::AppState;
use crate::store::{RecordStore, SqliteStore};

pub fn require_db(state: &AppState) -> Result<&Connection, HandlerErr> {
    state
        .db
        .as_ref()
        .ok_or_else(|| HandlerErr::new("no_workspace", "select a workspace first"))
}

pub fn get_required_str(params: &Value, key: &str) -> Result<String, HandlerErr> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| HandlerErr::bad_params(format!("missing {}", key)))
}

/// Present string values are returned untrimmed; `null` reads as absent.
pub fn get_opt_str<'a>(params: &'a Value, key: &str) -> Result<Option<&'a str>, HandlerErr> {
    match params.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.as_str())),
        Some(_) => Err(HandlerErr::bad_params(format!("{} must be a string", key))),
    }
}

pub fn get_required_index(params: &Value, key: &str) -> Result<usize, HandlerErr> {
    params
        .get(key)
        .and_then(|v| v.as_u64())
        .map(|n| n as usize)
        .ok_or_else(|| HandlerErr::bad_params(format!("{} must be a non-negative integer", key)))
}

/// Replaces the cached list with a fresh fetch of the whole collection.
/// On failure the previous list is kept.
pub fn reload_students(state: &mut AppState) -> Result<(), HandlerErr> {
    let conn = require_db(state)?;
    let students = SqliteStore::new(conn)
        .list()
        .map_err(|e| HandlerErr::store("db_query_failed", e))?;
    debug!(count = students.len(), "student list reloaded");
    state.students = students;
    Ok(())
}

pub fn write_text_file(path: &str, contents: &str) -> Result<(), HandlerErr> {
    let out = std::path::PathBuf::from(path);
    if let Some(parent) = out.parent() {
        std::fs::create_dir_all(parent).map_err(|e| {
            HandlerErr::new("io_failed", e.to_string())
                .with_details(serde_json::json!({ "path": path }))
        })?;
    }
    std::fs::write(&out, contents).map_err(|e| {
        HandlerErr::new("io_failed", e.to_string()).with_details(serde_json::json!({ "path": path }))
    })
}

pub fn read_text_file(path: &str) -> Result<String, HandlerErr> {
    std::fs::read_to_string(path).map_err(|e| {
        HandlerErr::new("io_failed", e.to_string()).with_details(serde_json::json!({ "path": path }))
    })
}
