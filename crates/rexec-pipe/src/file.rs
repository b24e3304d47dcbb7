use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use serde_json::Value;
use tracing::{debug, warn};

use crate::error::{PipeError, Result};
use crate::sink::{PipeEntries, ResultSink};

static TEMP_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Sink backed by a JSON object file.
///
/// The file format matches what the remote module writes, so the same path
/// can be filled by the node and read back here. Writes replace the file
/// atomically; a reader never observes a partial object.
#[derive(Debug)]
pub struct FileSink {
    path: PathBuf,
    lock: Mutex<()>,
}

impl FileSink {
    /// Use `path` as the sink. The file is created on first write.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load_strict(&self) -> Result<PipeEntries> {
        let raw = match fs::read(&self.path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Ok(PipeEntries::new())
            }
            Err(source) => {
                return Err(PipeError::Io {
                    path: self.path.clone(),
                    source,
                })
            }
        };
        if raw.iter().all(u8::is_ascii_whitespace) {
            return Ok(PipeEntries::new());
        }
        serde_json::from_slice(&raw).map_err(|source| PipeError::Corrupt {
            path: self.path.clone(),
            source,
        })
    }

    // A damaged file is replaced rather than blocking further writes.
    fn load_lenient(&self) -> Result<PipeEntries> {
        match self.load_strict() {
            Err(PipeError::Corrupt { source, .. }) => {
                warn!(path = %self.path.display(), error = %source, "discarding unreadable sink");
                Ok(PipeEntries::new())
            }
            other => other,
        }
    }

    fn store(&self, entries: &PipeEntries) -> Result<()> {
        let bytes = serde_json::to_vec(entries).map_err(PipeError::Serialize)?;
        write_atomic(&self.path, &bytes)?;
        debug!(path = %self.path.display(), entries = entries.len(), "sink written");
        Ok(())
    }
}

impl ResultSink for FileSink {
    fn add(&self, name: &str, value: Value) -> Result<()> {
        let _guard = self.lock.lock().map_err(|_| PipeError::Poisoned)?;
        let mut entries = self.load_lenient()?;
        entries.insert(name.to_string(), value);
        self.store(&entries)
    }

    fn entries(&self) -> Result<PipeEntries> {
        let _guard = self.lock.lock().map_err(|_| PipeError::Poisoned)?;
        self.load_strict()
    }

    fn reset(&self) -> Result<()> {
        let _guard = self.lock.lock().map_err(|_| PipeError::Poisoned)?;
        self.store(&PipeEntries::new())
    }
}

fn io_error(path: &Path) -> impl FnOnce(std::io::Error) -> PipeError + '_ {
    move |source| PipeError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// Write `bytes` to `path` through a sibling temp file and rename.
pub(crate) fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(io_error(parent))?;
    }

    let file_name = path
        .file_name()
        .and_then(|name| name.to_str())
        .ok_or_else(|| PipeError::InvalidConfig(format!("{} has no file name", path.display())))?;
    let temp_path = path.with_file_name(format!(
        ".{file_name}.{}.{}.tmp",
        std::process::id(),
        TEMP_COUNTER.fetch_add(1, Ordering::Relaxed)
    ));

    let result = (|| {
        let mut file = fs::File::create(&temp_path).map_err(io_error(&temp_path))?;
        file.write_all(bytes).map_err(io_error(&temp_path))?;
        file.sync_all().map_err(io_error(&temp_path))?;
        fs::rename(&temp_path, path).map_err(io_error(path))
    })();

    if result.is_err() {
        let _ = fs::remove_file(&temp_path);
    }
    result
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn missing_file_reads_as_empty() {
        let dir = tempfile::tempdir().unwrap();
        let sink = FileSink::open(dir.path().join("absent.json"));
        assert!(sink.entries().unwrap().is_empty());
    }

    #[test]
    fn add_creates_parent_and_keeps_last_value() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("pipe.json");
        let sink = FileSink::open(&path);

        sink.add("count", json!(3)).unwrap();
        sink.add("count", json!(7)).unwrap();
        sink.add("names", json!(["a", "b"])).unwrap();

        let entries = sink.entries().unwrap();
        assert_eq!(entries["count"], json!(7));
        assert_eq!(entries["names"], json!(["a", "b"]));

        let on_disk: Value = serde_json::from_slice(&fs::read(&path).unwrap()).unwrap();
        assert_eq!(on_disk, json!({"count": 7, "names": ["a", "b"]}));
    }

    #[test]
    fn reads_file_written_by_remote_module() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pipe.json");
        fs::write(&path, r#"{"count": 7, "label": "cube", "missing": null}"#).unwrap();

        let sink = FileSink::open(&path);
        assert_eq!(sink.get("count").unwrap(), Some(json!(7)));
        assert_eq!(sink.get("missing").unwrap(), Some(Value::Null));
        assert_eq!(sink.get("other").unwrap(), None);
    }

    #[test]
    fn corrupt_file_fails_reads_but_not_writes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pipe.json");
        fs::write(&path, "{not json").unwrap();

        let sink = FileSink::open(&path);
        assert!(matches!(sink.entries(), Err(PipeError::Corrupt { .. })));

        sink.add("ok", json!(true)).unwrap();
        assert_eq!(sink.entries().unwrap().len(), 1);
    }

    #[test]
    fn reset_empties_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let sink = FileSink::open(dir.path().join("pipe.json"));
        sink.add("a", json!(1)).unwrap();
        sink.reset().unwrap();
        assert!(sink.entries().unwrap().is_empty());
        assert_eq!(fs::read_to_string(sink.path()).unwrap(), "{}");
    }

    #[test]
    fn atomic_write_leaves_no_temp_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pipe.json");
        write_atomic(&path, b"{}").unwrap();
        write_atomic(&path, b"{\"a\":1}").unwrap();

        let names: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .map(|entry| entry.unwrap().file_name())
            .collect();
        assert_eq!(names, vec![std::ffi::OsString::from("pipe.json")]);
    }
}
