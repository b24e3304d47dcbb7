use std::path::{Path, PathBuf};

use crate::error::{PipeError, Result};

/// Module name the remote side imports.
pub const DEFAULT_MODULE_NAME: &str = "rexec_pipe";

/// Environment variable pointing remote code at the sink file.
pub const DEFAULT_ENV_VAR: &str = "REXEC_PIPE_FILE";

const MAX_CHANNEL_LEN: usize = 64;

/// Where a result pipe lives and how the remote side finds it.
///
/// Both paths must be reachable by the node (same host or shared storage).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipeConfig {
    /// JSON file the remote module writes into.
    pub sink_path: PathBuf,
    /// Directory added to the remote import path; the module file is
    /// written here.
    pub module_dir: PathBuf,
    /// Python module name exposing `add(name, value)`.
    pub module_name: String,
    /// Environment variable set on the remote process to the sink path.
    pub env_var: String,
}

impl PipeConfig {
    pub fn new(sink_path: impl Into<PathBuf>, module_dir: impl Into<PathBuf>) -> Self {
        Self {
            sink_path: sink_path.into(),
            module_dir: module_dir.into(),
            module_name: DEFAULT_MODULE_NAME.to_string(),
            env_var: DEFAULT_ENV_VAR.to_string(),
        }
    }

    /// Pipe keyed by a caller-chosen channel, under the system temp dir.
    ///
    /// Concurrent commands that must not share entries use distinct channels.
    pub fn for_channel(channel: &str) -> Result<Self> {
        Self::for_channel_in(&std::env::temp_dir().join("rexec"), channel)
    }

    /// Pipe keyed by `channel` under an explicit base directory.
    pub fn for_channel_in(base: &Path, channel: &str) -> Result<Self> {
        validate_channel(channel)?;
        Ok(Self::new(
            base.join(format!("pipe-{channel}.json")),
            base.join("python"),
        ))
    }

    /// Path of the module file inside `module_dir`.
    pub fn module_path(&self) -> PathBuf {
        self.module_dir.join(format!("{}.py", self.module_name))
    }

    /// Check names that are interpolated into remote code.
    pub fn validate(&self) -> Result<()> {
        if !is_identifier(&self.module_name) {
            return Err(PipeError::InvalidConfig(format!(
                "module name '{}' is not a Python identifier",
                self.module_name
            )));
        }
        if self.env_var.is_empty() || self.env_var.contains('=') || self.env_var.contains('\0') {
            return Err(PipeError::InvalidConfig(format!(
                "invalid environment variable name '{}'",
                self.env_var
            )));
        }
        if self.sink_path.as_os_str().is_empty() {
            return Err(PipeError::InvalidConfig("empty sink path".to_string()));
        }
        if self.sink_path.to_str().is_none() || self.module_dir.to_str().is_none() {
            return Err(PipeError::InvalidConfig(
                "pipe paths must be valid UTF-8".to_string(),
            ));
        }
        Ok(())
    }
}

fn validate_channel(channel: &str) -> Result<()> {
    if channel.is_empty() || channel.len() > MAX_CHANNEL_LEN {
        return Err(PipeError::InvalidConfig(format!(
            "invalid channel length: {}",
            channel.len()
        )));
    }
    if !channel
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        return Err(PipeError::InvalidConfig(format!(
            "channel '{channel}' may only contain ASCII letters, digits, '-' and '_'"
        )));
    }
    Ok(())
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) if first.is_ascii_alphabetic() || first == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}
