//! Result pipe: a side channel for structured command output.
//!
//! Code executed on a node can only report a textual return value over the
//! command channel. The result pipe gives it a second path: remote code calls
//! `add(name, value)` on a small Python module, which writes into a sink the
//! caller reads back after the command completes.
//!
//! - [`ResultSink`]: the key/value sink abstraction
//! - [`FileSink`]: JSON file sink, same format the remote module writes
//! - [`MemorySink`]: in-process sink for tests and local emulation
//! - [`bootstrap`]: the remote module source and the statement that installs it

pub mod bootstrap;
pub mod config;
pub mod error;
pub mod file;
pub mod sink;

pub use bootstrap::{add_call, bootstrap_statement, install_module, PYTHON_MODULE_SOURCE};
pub use config::{PipeConfig, DEFAULT_ENV_VAR, DEFAULT_MODULE_NAME};
pub use error::{PipeError, Result};
pub use file::FileSink;
pub use sink::{MemorySink, PipeEntries, ResultSink};
