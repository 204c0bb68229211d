//! `conductor.toml` loading and task-context parsing.

use conductor_core::{ConductorError, ConductorResult, ConfigSnapshot};
use serde_json::{Map, Value};
use std::path::Path;

/// Read, parse, and validate a TOML config file.
pub fn load_config(path: &Path) -> ConductorResult<ConfigSnapshot> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        ConductorError::Config(format!(
            "Failed to read config '{}': {e}",
            path.display()
        ))
    })?;
    parse_config(&content).map_err(|e| match e {
        ConductorError::Config(msg) => {
            ConductorError::Config(format!("'{}': {msg}", path.display()))
        }
        other => other,
    })
}

/// Parse and validate TOML config text. Every section is optional.
pub fn parse_config(content: &str) -> ConductorResult<ConfigSnapshot> {
    let snapshot: ConfigSnapshot = toml::from_str(content)
        .map_err(|e| ConductorError::Config(format!("Failed to parse config: {e}")))?;
    snapshot.validate()?;
    Ok(snapshot)
}

/// Build a task context from `key=value` pairs. Values that parse as JSON
/// keep their type; anything else is taken as a string.
pub fn parse_context(pairs: &[String]) -> ConductorResult<Map<String, Value>> {
    let mut context = Map::new();
    for pair in pairs {
        let (key, raw) = pair.split_once('=').ok_or_else(|| {
            ConductorError::Config(format!("context entry '{pair}' is not key=value"))
        })?;
        let key = key.trim();
        if key.is_empty() {
            return Err(ConductorError::Config(format!(
                "context entry '{pair}' has an empty key"
            )));
        }
        let value = serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()));
        context.insert(key.to_string(), value);
    }
    Ok(context)
}
