use std::path::PathBuf;

/// Errors that can occur while provisioning or reading a result pipe.
#[derive(Debug, thiserror::Error)]
pub enum PipeError {
    /// Reading or writing the sink or module file failed.
    #[error("pipe I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// The sink file does not contain a JSON object.
    #[error("sink {path} is not a JSON object: {source}")]
    Corrupt {
        path: PathBuf,
        source: serde_json::Error,
    },

    /// The value could not be serialized.
    #[error("failed to serialize pipe entries: {0}")]
    Serialize(#[source] serde_json::Error),

    /// The pipe configuration is unusable.
    #[error("invalid pipe configuration: {0}")]
    InvalidConfig(String),

    /// The sink lock was poisoned by a panicking writer.
    #[error("sink lock poisoned")]
    Poisoned,
}

pub type Result<T> = std::result::Result<T, PipeError>;
