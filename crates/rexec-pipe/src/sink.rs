use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use serde_json::Value;

use crate::error::{PipeError, Result};

/// Entries published through a pipe, keyed by name.
pub type PipeEntries = BTreeMap<String, Value>;

/// Key/value storage behind a result pipe.
///
/// `add` replaces any earlier value stored under the same name.
pub trait ResultSink: Send + Sync {
    /// Publish one named value.
    fn add(&self, name: &str, value: Value) -> Result<()>;

    /// Snapshot of all published entries.
    fn entries(&self) -> Result<PipeEntries>;

    /// Remove every entry.
    fn reset(&self) -> Result<()>;

    /// Read one entry.
    fn get(&self, name: &str) -> Result<Option<Value>> {
        Ok(self.entries()?.remove(name))
    }
}

impl<S: ResultSink + ?Sized> ResultSink for Arc<S> {
    fn add(&self, name: &str, value: Value) -> Result<()> {
        (**self).add(name, value)
    }

    fn entries(&self) -> Result<PipeEntries> {
        (**self).entries()
    }

    fn reset(&self) -> Result<()> {
        (**self).reset()
    }

    fn get(&self, name: &str) -> Result<Option<Value>> {
        (**self).get(name)
    }
}

/// In-process sink.
#[derive(Debug, Default)]
pub struct MemorySink {
    entries: Mutex<PipeEntries>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ResultSink for MemorySink {
    fn add(&self, name: &str, value: Value) -> Result<()> {
        let mut entries = self.entries.lock().map_err(|_| PipeError::Poisoned)?;
        entries.insert(name.to_string(), value);
        Ok(())
    }

    fn entries(&self) -> Result<PipeEntries> {
        let entries = self.entries.lock().map_err(|_| PipeError::Poisoned)?;
        Ok(entries.clone())
    }

    fn reset(&self) -> Result<()> {
        let mut entries = self.entries.lock().map_err(|_| PipeError::Poisoned)?;
        entries.clear();
        Ok(())
    }

    fn get(&self, name: &str) -> Result<Option<Value>> {
        let entries = self.entries.lock().map_err(|_| PipeError::Poisoned)?;
        Ok(entries.get(name).cloned())
    }
}
