//! Remote side of the result pipe.
//!
//! The node runs Python. [`install_module`] writes the sink module next to
//! the caller's pipe files and [`bootstrap_statement`] builds the one-line
//! statement that makes the node import it and point it at the sink.

use std::path::PathBuf;

use tracing::debug;

use crate::config::{PipeConfig, DEFAULT_ENV_VAR};
use crate::error::{PipeError, Result};
use crate::file::write_atomic;

/// Source of the module remote code imports to publish values.
pub const PYTHON_MODULE_SOURCE: &str = include_str!("../python/rexec_pipe.py");

/// Write the module into `config.module_dir`, returning its path.
pub fn install_module(config: &PipeConfig) -> Result<PathBuf> {
    config.validate()?;
    let path = config.module_path();
    write_atomic(&path, module_source(config)?.as_bytes())?;
    debug!(path = %path.display(), "pipe module installed");
    Ok(path)
}

/// Statement that configures the module on the node.
///
/// Runs as a single `ExecuteStatement`. Re-running it is harmless: the
/// import path is only extended once and the module is reloaded so a new
/// sink path takes effect.
pub fn bootstrap_statement(config: &PipeConfig) -> Result<String> {
    config.validate()?;
    let env_var = quote(&config.env_var)?;
    let sink = quote(path_str(&config.sink_path)?)?;
    let dir = quote(path_str(&config.module_dir)?)?;
    let module = &config.module_name;
    Ok(format!(
        "import os, sys, importlib; \
         os.environ[{env_var}] = {sink}; \
         sys.path.append({dir}) if {dir} not in sys.path else None; \
         import {module}; \
         importlib.reload({module}); \
         {module}.configure({sink})"
    ))
}

/// Statement publishing the value of Python expression `expr` under `name`.
pub fn add_call(config: &PipeConfig, name: &str, expr: &str) -> Result<String> {
    config.validate()?;
    if name.is_empty() {
        return Err(PipeError::InvalidConfig("empty entry name".to_string()));
    }
    let module = &config.module_name;
    Ok(format!(
        "import {module}; {module}.add({}, {expr})",
        quote(name)?
    ))
}

// JSON string literals are valid Python string literals.
fn quote(value: &str) -> Result<String> {
    serde_json::to_string(value).map_err(PipeError::Serialize)
}

fn path_str(path: &std::path::Path) -> Result<&str> {
    path.to_str().ok_or_else(|| {
        PipeError::InvalidConfig(format!("{} is not valid UTF-8", path.display()))
    })
}

fn module_source(config: &PipeConfig) -> Result<String> {
    if config.env_var == DEFAULT_ENV_VAR {
        return Ok(PYTHON_MODULE_SOURCE.to_string());
    }
    Ok(PYTHON_MODULE_SOURCE.replacen(
        &format!("ENV_VAR = {}", quote(DEFAULT_ENV_VAR)?),
        &format!("ENV_VAR = {}", quote(&config.env_var)?),
        1,
    ))
}
