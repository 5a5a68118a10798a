use crate::db;
use crate::ipc::error::{err, ok, respond, HandlerErr};
use crate::ipc::helpers::{get_required_str, reload_students};
use crate::ipc::types::{AppState, Request};
use crate::session::{ImportFlow, UiState};
use serde_json::json;
use std::path::PathBuf;
use tracing::{info, warn};

fn handle_health(state: &mut AppState, req: &Request) -> serde_json::Value {
    ok(
        &req.id,
        json!({
            "version": env!("CARGO_PKG_VERSION"),
            "workspacePath": state.workspace.as_ref().map(|p| p.to_string_lossy().to_string())
        }),
    )
}

fn handle_workspace_select(state: &mut AppState, req: &Request) -> serde_json::Value {
    let path = match get_required_str(&req.params, "path") {
        Ok(p) => PathBuf::from(p),
        Err(_) => return err(&req.id, "bad_params", "missing params.path", None),
    };

    match db::open_db(&path) {
        Ok(conn) => {
            state.workspace = Some(path.clone());
            state.db = Some(conn);
            state.students.clear();
            state.ui = UiState::default();
            state.tabular_import = ImportFlow::Idle;
            state.structured_import = ImportFlow::Idle;
            let res = reload_students(state).map(|_| {
                info!(workspace = %path.display(), students = state.students.len(), "workspace opened");
                json!({
                    "workspacePath": path.to_string_lossy(),
                    "studentCount": state.students.len()
                })
            });
            respond(&req.id, res)
        }
        Err(e) => {
            warn!(workspace = %path.display(), error = %e, "workspace open failed");
            HandlerErr::new("db_open_failed", format!("{e:?}")).response(&req.id)
        }
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "health" => Some(handle_health(state, req)),
        "workspace.select" => Some(handle_workspace_select(state, req)),
        _ => None,
    }
}
