// Execution Settings
// Layers user defaults, document settings and command line overrides

use std::path::{Path, PathBuf};

use color_eyre::eyre::{eyre, WrapErr};
use color_eyre::Result;
use serde_yaml::{Mapping, Value};
use tracing::debug;

use rowflow_engine::ExecutionConfig;

/// Location of the optional user defaults file
pub fn defaults_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("rowflow").join("config.yaml"))
}

/// Read the user defaults file; a missing file yields the built-in defaults
pub fn load_defaults(path: Option<&Path>) -> Result<ExecutionConfig> {
    let Some(path) = path else {
        return Ok(ExecutionConfig::default());
    };
    if !path.exists() {
        return Ok(ExecutionConfig::default());
    }

    let content = std::fs::read_to_string(path)
        .wrap_err_with(|| format!("Failed to read {}", path.display()))?;
    if content.trim().is_empty() {
        return Ok(ExecutionConfig::default());
    }
    debug!(path = %path.display(), "loaded execution defaults");
    serde_yaml::from_str(&content).wrap_err_with(|| format!("Invalid defaults in {}", path.display()))
}

/// Overlay the document's settings on `defaults`
///
/// Only the settings the document moves away from the built-in defaults are
/// applied, so a document without a `settings:` block keeps the user defaults.
pub fn layer(defaults: &ExecutionConfig, document: &ExecutionConfig) -> Result<ExecutionConfig> {
    let builtin = to_mapping(&ExecutionConfig::default())?;
    let mut merged = to_mapping(defaults)?;

    for (key, value) in to_mapping(document)? {
        if builtin.get(&key) != Some(&value) {
            merged.insert(key, value);
        }
    }

    Ok(serde_yaml::from_value(Value::Mapping(merged))?)
}

fn to_mapping(config: &ExecutionConfig) -> Result<Mapping> {
    match serde_yaml::to_value(config)? {
        Value::Mapping(map) => Ok(map),
        other => Err(eyre!("settings serialized to {:?}", other)),
    }
}

/// Parse a `STEP=N` copies override
pub fn parse_copies(spec: &str) -> Result<(String, usize)> {
    let (step, copies) = spec
        .rsplit_once('=')
        .ok_or_else(|| eyre!("Invalid copies '{}'. Expected STEP=N", spec))?;
    let copies: usize = copies
        .trim()
        .parse()
        .map_err(|_| eyre!("Invalid copy count in '{}'", spec))?;
    if step.trim().is_empty() || copies == 0 {
        return Err(eyre!("Invalid copies '{}'. Expected STEP=N with N >= 1", spec));
    }
    Ok((step.trim().to_string(), copies))
}
