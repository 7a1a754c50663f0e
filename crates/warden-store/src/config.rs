use anyhow::Context;
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use tracing::debug;
use warden_core::WardenConfig;

use crate::{store_root, write_atomic};

/// `store_root/config.json`
pub fn global_config_path() -> PathBuf {
    store_root().join("config.json")
}

/// `<project>/.warden/config.json`
pub fn project_config_path(project_root: &Path) -> PathBuf {
    project_root.join(".warden").join("config.json")
}

/// Read a config file as a JSON object. Returns an empty map if the file doesn't exist.
pub fn read_config_map(path: &Path) -> anyhow::Result<Map<String, Value>> {
    if !path.exists() {
        return Ok(Map::new());
    }
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("reading {}", path.display()))?;
    let val: Value = serde_json::from_str(&content)
        .with_context(|| format!("parsing {}", path.display()))?;
    match val {
        Value::Object(map) => Ok(map),
        _ => anyhow::bail!("{} is not a JSON object", path.display()),
    }
}

/// Recursive object merge; `overlay` wins on conflicts.
fn merge(base: &mut Map<String, Value>, overlay: Map<String, Value>) {
    for (k, v) in overlay {
        match v {
            Value::Object(o) => match base.get_mut(&k) {
                Some(Value::Object(b)) => merge(b, o),
                _ => {
                    base.insert(k, Value::Object(o));
                }
            },
            v => {
                base.insert(k, v);
            }
        }
    }
}

/// Global config overlaid by the project's, if any.
pub fn load_config_from(global: &Path, project_root: Option<&Path>) -> anyhow::Result<WardenConfig> {
    let mut map = read_config_map(global)?;
    if let Some(root) = project_root {
        let project_path = project_config_path(root);
        let overlay = read_config_map(&project_path)?;
        if !overlay.is_empty() {
            debug!(path = %project_path.display(), "applying project config");
        }
        merge(&mut map, overlay);
    }
    serde_json::from_value(Value::Object(map)).context("invalid warden config")
}

pub fn load_config(project_root: Option<&Path>) -> anyhow::Result<WardenConfig> {
    load_config_from(&global_config_path(), project_root)
}

/// Parse a string value into an appropriate JSON value (bool/number/string).
fn parse_value(s: &str) -> Value {
    match s {
        "true" => Value::Bool(true),
        "false" => Value::Bool(false),
        "null" => Value::Null,
        _ => {
            if let Ok(n) = s.parse::<i64>() {
                Value::Number(n.into())
            } else if let Ok(f) = s.parse::<f64>() {
                serde_json::json!(f)
            } else {
                Value::String(s.to_string())
            }
        }
    }
}

/// Set one top-level key. The result must still be a valid [`WardenConfig`].
pub fn set_config_value(path: &Path, key: &str, raw: &str) -> anyhow::Result<Value> {
    let mut map = read_config_map(path)?;
    let value = parse_value(raw);
    map.insert(key.to_string(), value.clone());
    let candidate = Value::Object(map);
    serde_json::from_value::<WardenConfig>(candidate.clone())
        .with_context(|| format!("`{key}` = {raw} is not a valid setting"))?;
    let json = serde_json::to_string_pretty(&candidate)?;
    write_atomic(path, json.as_bytes())?;
    Ok(value)
}
