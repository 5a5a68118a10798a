use crate::import::{
    self, ImportMode, ImportSummary, StructuredMode, TabularPreview,
};
use crate::ipc::error::{respond, HandlerErr};
use crate::ipc::handlers::setup::{self, ImportSettings};
use crate::ipc::helpers::{
    get_opt_str, get_required_str, read_text_file, reload_students, require_db, write_text_file,
};
use crate::ipc::types::{AppState, Request};
use crate::session::{ImportEvent, ImportFlow, Preview};
use crate::store::{SqliteStore, StoreResult};
use rusqlite::Connection;
use serde_json::{json, Value};
use std::path::Path;
use tracing::warn;

const INLINE_SOURCE: &str = "<inline>";

fn advance<P: Preview + Clone>(
    flow: &mut ImportFlow<P>,
    event: ImportEvent<P>,
) -> Result<(), HandlerErr> {
    *flow = flow.clone().apply(event)?;
    Ok(())
}

/// Runs a batch against the store inside one transaction. Any error rolls
/// the whole batch back when the transaction is dropped.
fn in_transaction<T>(
    conn: &Connection,
    f: impl FnOnce(&mut SqliteStore<'_>) -> StoreResult<T>,
) -> StoreResult<T> {
    let tx = conn.unchecked_transaction()?;
    let out = f(&mut SqliteStore::new(&tx))?;
    tx.commit()?;
    Ok(out)
}

fn load_settings(conn: &Connection) -> Result<ImportSettings, HandlerErr> {
    setup::import_settings(conn).map_err(|e| HandlerErr::new("db_query_failed", e.to_string()))
}

/// Source text from `inPath`, or `text` when no path is given.
fn read_source(params: &Value) -> Result<(String, Result<String, HandlerErr>), HandlerErr> {
    if let Some(path) = get_opt_str(params, "inPath")?.filter(|p| !p.trim().is_empty()) {
        return Ok((path.to_string(), read_text_file(path)));
    }
    match get_opt_str(params, "text")? {
        Some(text) => Ok((INLINE_SOURCE.to_string(), Ok(text.to_string()))),
        None => Err(HandlerErr::bad_params("missing inPath or text")),
    }
}

fn summary_json(summary: &ImportSummary, state: &AppState) -> Value {
    json!({
        "deleted": summary.deleted,
        "created": summary.created,
        "updated": summary.updated,
        "studentCount": state.students.len(),
    })
}

fn tabular_preview_json(state: &AppState) -> Value {
    let flow = &state.tabular_import;
    let (preview, errors) = match flow.preview() {
        Some(p) => (json!(p.preview), json!(p.errors)),
        None => (json!([]), json!([])),
    };
    json!({
        "phase": flow.phase(),
        "preview": preview,
        "errors": errors,
        "canConfirm": flow.can_confirm(),
    })
}

fn preview_tabular(state: &mut AppState, params: &Value) -> Result<Value, HandlerErr> {
    require_db(state)?;
    let (source, text) = read_source(params)?;
    advance(&mut state.tabular_import, ImportEvent::SelectFile(source))?;
    let text = match text {
        Ok(t) => t,
        Err(e) => {
            advance(&mut state.tabular_import, ImportEvent::Failed(e.message.clone()))?;
            return Err(e);
        }
    };
    let preview = import::preview_tabular_text(&text, &state.students);
    advance(&mut state.tabular_import, ImportEvent::PreviewReady(preview))?;
    Ok(tabular_preview_json(state))
}

fn apply_tabular(state: &mut AppState, params: &Value) -> Result<Value, HandlerErr> {
    let settings = load_settings(require_db(state)?)?;
    let mode = match get_opt_str(params, "mode")? {
        Some(m) => ImportMode::parse(m)
            .ok_or_else(|| HandlerErr::bad_params("mode must be one of: append, overwrite"))?,
        None => settings.default_tabular_mode,
    };
    advance(&mut state.tabular_import, ImportEvent::Confirm)?;
    let rows = state
        .tabular_import
        .preview()
        .map(|p: &TabularPreview| p.preview.clone())
        .unwrap_or_default();

    let outcome = {
        let conn = require_db(state)?;
        let existing = &state.students;
        in_transaction(conn, |store| {
            import::commit_tabular_import(store, &rows, mode, existing)
        })
    };
    match outcome {
        Ok(summary) => {
            advance(&mut state.tabular_import, ImportEvent::Succeeded)?;
            reload_students(state)?;
            Ok(summary_json(&summary, state))
        }
        Err(e) => {
            warn!(error = %e, mode = mode.as_str(), "tabular import rolled back");
            advance(&mut state.tabular_import, ImportEvent::Failed(e.to_string()))?;
            Err(HandlerErr::store("db_insert_failed", e))
        }
    }
}

fn write_template(params: &Value) -> Result<Value, HandlerErr> {
    let text = import::tabular_template();
    match get_opt_str(params, "outPath")? {
        Some(path) => {
            write_text_file(path, &text)?;
            Ok(json!({ "path": path, "bytes": text.len() }))
        }
        None => Ok(json!({ "text": text })),
    }
}

fn structured_preview_json(state: &AppState) -> Value {
    let flow = &state.structured_import;
    let mut out = json!({
        "phase": flow.phase(),
        "canConfirm": flow.can_confirm(),
        "records": [],
        "errors": [],
        "detectedMode": Value::Null,
        "allowedModes": [],
    });
    if let Some(p) = flow.preview() {
        let allowed = if p.records.is_empty() {
            Vec::new()
        } else {
            import::allowed_structured_modes(p.records.len(), state.students.len())
        };
        out["records"] = json!(p.records);
        out["errors"] = json!(p.errors);
        out["detectedMode"] = json!(p.mode);
        out["allowedModes"] = json!(allowed);
    }
    out
}

fn preview_structured(state: &mut AppState, params: &Value) -> Result<Value, HandlerErr> {
    require_db(state)?;
    let (source, text) = read_source(params)?;
    advance(&mut state.structured_import, ImportEvent::SelectFile(source))?;
    let text = match text {
        Ok(t) => t,
        Err(e) => {
            advance(&mut state.structured_import, ImportEvent::Failed(e.message.clone()))?;
            return Err(e);
        }
    };
    let parsed = import::parse_structured_import(&text);
    advance(&mut state.structured_import, ImportEvent::PreviewReady(parsed))?;
    Ok(structured_preview_json(state))
}

fn apply_structured(state: &mut AppState, params: &Value) -> Result<Value, HandlerErr> {
    let settings = load_settings(require_db(state)?)?;
    let (records, detected) = match state.structured_import.preview() {
        Some(p) => (p.records.clone(), p.mode),
        None => {
            return Err(HandlerErr::new(
                "invalid_state",
                format!("event not allowed in {} state", state.structured_import.phase()),
            ))
        }
    };
    let mode = match get_opt_str(params, "mode")? {
        Some(m) => StructuredMode::parse(m)
            .ok_or_else(|| HandlerErr::bad_params("mode must be one of: all, single"))?,
        None => detected,
    };
    // The detected mode always applies; only a switch to the other mode is
    // restricted by the candidate count.
    let allowed = import::allowed_structured_modes(records.len(), state.students.len());
    if !records.is_empty() && mode != detected && !allowed.contains(&mode) {
        return Err(HandlerErr::bad_params(format!(
            "mode {} is not available for {} record(s)",
            mode.as_str(),
            records.len()
        ))
        .with_details(json!({ "allowedModes": allowed })));
    }
    advance(&mut state.structured_import, ImportEvent::Confirm)?;

    let outcome = {
        let conn = require_db(state)?;
        let existing = &state.students;
        in_transaction(conn, |store| {
            import::commit_structured_import(store, &records, mode, existing, settings.settle_delay)
        })
    };
    match outcome {
        Ok(summary) => {
            advance(&mut state.structured_import, ImportEvent::Succeeded)?;
            reload_students(state)?;
            Ok(summary_json(&summary, state))
        }
        Err(e) => {
            warn!(error = %e, mode = mode.as_str(), "structured import rolled back");
            advance(&mut state.structured_import, ImportEvent::Failed(e.to_string()))?;
            let code = match mode {
                StructuredMode::All => "db_insert_failed",
                StructuredMode::Single => "db_update_failed",
            };
            Err(HandlerErr::store(code, e))
        }
    }
}

fn cancel_import(state: &mut AppState, params: &Value) -> Result<Value, HandlerErr> {
    let kind = get_required_str(params, "kind")?;
    match kind.as_str() {
        "tabular" => advance(&mut state.tabular_import, ImportEvent::Cancel)?,
        "structured" => advance(&mut state.structured_import, ImportEvent::Cancel)?,
        other => return Err(HandlerErr::bad_params(format!("unknown import kind: {other}"))),
    }
    Ok(import_status(state))
}

fn import_status(state: &AppState) -> Value {
    json!({
        "tabular": state.tabular_import.phase(),
        "structured": state.structured_import.phase(),
    })
}

fn export_structured(state: &mut AppState, params: &Value) -> Result<Value, HandlerErr> {
    let settings = load_settings(require_db(state)?)?;
    let text = import::export_structured(&state.students)
        .map_err(|e| HandlerErr::new("io_failed", e.to_string()))?;
    let file_name = format!("{}.json", settings.backup_file_prefix);

    let Some(out) = get_opt_str(params, "outPath")?.filter(|p| !p.trim().is_empty()) else {
        return Ok(json!({ "fileName": file_name, "text": text }));
    };
    // A directory target gets the configured backup file name.
    let target = if Path::new(out).is_dir() {
        Path::new(out).join(&file_name).to_string_lossy().to_string()
    } else {
        out.to_string()
    };
    write_text_file(&target, &text)?;
    Ok(json!({
        "path": target,
        "studentCount": state.students.len(),
    }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    let p = &req.params;
    let res = match req.method.as_str() {
        "import.tabular.preview" => preview_tabular(state, p),
        "import.tabular.apply" => apply_tabular(state, p),
        "import.tabular.template" => write_template(p),
        "import.structured.preview" => preview_structured(state, p),
        "import.structured.apply" => apply_structured(state, p),
        "import.cancel" => cancel_import(state, p),
        "import.status" => Ok(import_status(state)),
        "export.structured" => export_structured(state, p),
        _ => return None,
    };
    Some(respond(&req.id, res))
}
