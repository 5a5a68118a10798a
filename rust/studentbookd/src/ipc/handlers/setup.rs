use crate::db;
use crate::import::ImportMode;
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use serde_json::{json, Map, Value};
use std::time::Duration;

const MAX_SETTLE_DELAY_MS: i64 = 10_000;

#[derive(Clone, Copy)]
enum SetupSection {
    Import,
    Gradebook,
}

impl SetupSection {
    const ALL: [SetupSection; 2] = [SetupSection::Import, SetupSection::Gradebook];

    fn parse(s: &str) -> Option<Self> {
        match s {
            "import" => Some(Self::Import),
            "gradebook" => Some(Self::Gradebook),
            _ => None,
        }
    }

    fn name(self) -> &'static str {
        match self {
            Self::Import => "import",
            Self::Gradebook => "gradebook",
        }
    }

    fn key(self) -> &'static str {
        match self {
            Self::Import => "setup.import",
            Self::Gradebook => "setup.gradebook",
        }
    }
}

fn default_section(section: SetupSection) -> Value {
    match section {
        SetupSection::Import => json!({
            "settleDelayMs": 0,
            "defaultTabularMode": "append",
            "backupFilePrefix": "students_backup"
        }),
        SetupSection::Gradebook => json!({
            "expandNewGroups": false
        }),
    }
}

fn as_object_mut(value: &mut Value) -> Result<&mut Map<String, Value>, String> {
    value
        .as_object_mut()
        .ok_or_else(|| "internal setup object must be a JSON object".to_string())
}

fn parse_bool(v: &Value, key: &str) -> Result<bool, String> {
    v.as_bool()
        .ok_or_else(|| format!("{} must be boolean", key))
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

fn parse_string_max(v: &Value, key: &str, max_len: usize) -> Result<String, String> {
    let s = v.as_str().ok_or_else(|| format!("{} must be string", key))?;
    let s = s.trim();
    if s.len() > max_len {
        return Err(format!("{} length must be <= {}", key, max_len));
    }
    Ok(s.to_string())
}

fn merge_section_patch(
    section: SetupSection,
    current: &mut Value,
    patch: &Map<String, Value>,
) -> Result<(), String> {
    let obj = as_object_mut(current)?;
    for (k, v) in patch {
        match section {
            SetupSection::Import => match k.as_str() {
                "settleDelayMs" => {
                    obj.insert(
                        k.clone(),
                        Value::from(parse_i64_range(v, k, 0, MAX_SETTLE_DELAY_MS)?),
                    );
                }
                "defaultTabularMode" => {
                    let m = parse_string_max(v, k, 16)?.to_ascii_lowercase();
                    if ImportMode::parse(&m).is_none() {
                        return Err("defaultTabularMode must be one of: append, overwrite".into());
                    }
                    obj.insert(k.clone(), Value::String(m));
                }
                "backupFilePrefix" => {
                    let p = parse_string_max(v, k, 64)?;
                    if p.is_empty() || p.contains(['/', '\\']) {
                        return Err("backupFilePrefix must be a non-empty file name".into());
                    }
                    obj.insert(k.clone(), Value::String(p));
                }
                _ => return Err(format!("unknown import field: {}", k)),
            },
            SetupSection::Gradebook => match k.as_str() {
                "expandNewGroups" => {
                    obj.insert(k.clone(), Value::Bool(parse_bool(v, k)?));
                }
                _ => return Err(format!("unknown gradebook field: {}", k)),
            },
        }
    }
    Ok(())
}

fn load_section(conn: &rusqlite::Connection, section: SetupSection) -> anyhow::Result<Value> {
    let mut current = default_section(section);
    if let Some(saved) = db::settings_get_json(conn, section.key())? {
        if let Some(saved_obj) = saved.as_object() {
            // A malformed stored field keeps its default; the others still load.
            for (k, v) in saved_obj {
                let mut one = Map::new();
                one.insert(k.clone(), v.clone());
                let _ = merge_section_patch(section, &mut current, &one);
            }
        }
    }
    Ok(current)
}

#[derive(Debug, Clone, PartialEq)]
pub struct ImportSettings {
    pub settle_delay: Duration,
    pub default_tabular_mode: ImportMode,
    pub backup_file_prefix: String,
}

pub fn import_settings(conn: &rusqlite::Connection) -> anyhow::Result<ImportSettings> {
    let v = load_section(conn, SetupSection::Import)?;
    Ok(ImportSettings {
        settle_delay: Duration::from_millis(v["settleDelayMs"].as_u64().unwrap_or(0)),
        default_tabular_mode: v["defaultTabularMode"]
            .as_str()
            .and_then(ImportMode::parse)
            .unwrap_or(ImportMode::Append),
        backup_file_prefix: v["backupFilePrefix"]
            .as_str()
            .unwrap_or("students_backup")
            .to_string(),
    })
}

pub fn expand_new_groups(conn: &rusqlite::Connection) -> anyhow::Result<bool> {
    let v = load_section(conn, SetupSection::Gradebook)?;
    Ok(v["expandNewGroups"].as_bool().unwrap_or(false))
}

fn handle_setup_get(state: &mut AppState, req: &Request) -> Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let mut out = Map::new();
    for section in SetupSection::ALL {
        match load_section(conn, section) {
            Ok(v) => {
                out.insert(section.name().to_string(), v);
            }
            Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
        }
    }
    ok(&req.id, Value::Object(out))
}

fn handle_setup_update(state: &mut AppState, req: &Request) -> Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let Some(section_raw) = req.params.get("section").and_then(|v| v.as_str()) else {
        return err(&req.id, "bad_params", "missing section", None);
    };
    let Some(section) = SetupSection::parse(section_raw) else {
        return err(&req.id, "bad_params", "unknown section", None);
    };
    let Some(patch_obj) = req.params.get("patch").and_then(|v| v.as_object()) else {
        return err(&req.id, "bad_params", "patch must be an object", None);
    };

    let mut current = match load_section(conn, section) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if let Err(msg) = merge_section_patch(section, &mut current, patch_obj) {
        return err(&req.id, "bad_params", msg, None);
    }
    if let Err(e) = db::settings_set_json(conn, section.key(), &current) {
        return err(&req.id, "db_update_failed", e.to_string(), None);
    }
    ok(&req.id, json!({ "ok": true, section.name(): current }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    match req.method.as_str() {
        "setup.get" => Some(handle_setup_get(state, req)),
        "setup.update" => Some(handle_setup_update(state, req)),
        _ => None,
    }
}
