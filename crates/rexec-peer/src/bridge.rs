//! Result pipe bridge.
//!
//! The command channel only carries text back. To get structured values out
//! of remote code, the caller installs a pipe on the node: a small module
//! whose `add(name, value)` writes into a sink both sides can reach. Payload
//! code calls `add`, and the caller reads the sink once the owning command
//! has succeeded.

use std::path::PathBuf;

use rexec_pipe::{
    add_call, bootstrap_statement, install_module, FileSink, PipeConfig, PipeEntries, ResultSink,
};
use rexec_wire::{CommandResult, ExecMode};
use serde_json::Value;
use tracing::{debug, info};

use crate::connection::Connection;
use crate::dispatcher;
use crate::error::Result;

/// A command's result plus the entries it published.
#[derive(Debug, Clone, PartialEq)]
pub struct PipeRun {
    pub result: CommandResult,
    /// Empty when the command failed; the sink is not read in that case.
    pub entries: PipeEntries,
}

/// Result pipe installed on one node.
#[derive(Debug)]
pub struct ResultPipeBridge<S: ResultSink = FileSink> {
    config: PipeConfig,
    sink: S,
}

impl ResultPipeBridge<FileSink> {
    /// Provision a file-backed pipe on the node behind `connection`.
    ///
    /// Writes the module into `config.module_dir`, empties the sink file,
    /// and runs the bootstrap statement remotely. Both paths must be
    /// reachable from the node.
    pub async fn install(connection: &Connection, config: PipeConfig) -> Result<Self> {
        let module = install_module(&config)?;
        debug!(module = %module.display(), "pipe module written");
        let sink = FileSink::open(&config.sink_path);
        Self::install_with_sink(connection, config, sink).await
    }

    /// Sink file path.
    pub fn sink_path(&self) -> PathBuf {
        self.sink.path().to_path_buf()
    }
}

impl<S: ResultSink> ResultPipeBridge<S> {
    /// Provision a pipe backed by an arbitrary sink.
    ///
    /// The caller is responsible for whatever makes the node's writes reach
    /// `sink`; the module file is not written.
    pub async fn install_with_sink(connection: &Connection, config: PipeConfig, sink: S) -> Result<Self> {
        let statement = bootstrap_statement(&config)?;
        sink.reset()?;
        connection
            .execute_checked(ExecMode::ExecuteStatement, &statement)
            .await?;
        info!(
            node = %connection.remote(),
            sink = %config.sink_path.display(),
            "result pipe installed"
        );
        Ok(Self { config, sink })
    }

    pub fn config(&self) -> &PipeConfig {
        &self.config
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    /// Remote statement publishing the value of `expr` under `name`.
    pub fn add_call(&self, name: &str, expr: &str) -> Result<String> {
        Ok(add_call(&self.config, name, expr)?)
    }

    /// Every published entry.
    pub fn read(&self) -> Result<PipeEntries> {
        Ok(self.sink.entries()?)
    }

    /// One published entry.
    pub fn read_entry(&self, name: &str) -> Result<Option<Value>> {
        Ok(self.sink.get(name)?)
    }

    /// Remove every entry before reusing the pipe.
    pub fn reset(&self) -> Result<()> {
        Ok(self.sink.reset()?)
    }

    /// Run `payload` with the connection's command timeout and collect
    /// what it published.
    ///
    /// The sink is read only after the command's result has arrived and
    /// reports success.
    pub async fn execute(&self, connection: &Connection, mode: ExecMode, payload: &str) -> Result<PipeRun> {
        let timeout = connection.config().command_timeout;
        let result = dispatcher::execute(connection, mode, payload, timeout).await?;
        let entries = if result.success {
            self.read()?
        } else {
            PipeEntries::new()
        };
        debug!(
            command_id = result.command_id,
            success = result.success,
            entries = entries.len(),
            "pipe run finished"
        );
        Ok(PipeRun { result, entries })
    }
}
