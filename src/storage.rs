//! Persistence collaborators: structured configuration blobs and run results.
//!
//! The scanner never talks to the filesystem directly; calibration indexes,
//! defaults and captured camera configurations go through a [`ConfigStore`],
//! and per-run results through a [`ResultSink`]. Both are written wholesale,
//! never incrementally, so no transactional machinery is needed.

use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;

use parking_lot::Mutex;
use serde_json::Value;
use tracing::debug;

use crate::error::{ScanResult, ScannerError};

/// Reads and writes structured configuration blobs keyed by logical name.
///
/// The storage medium and format are an external concern; the scanner only
/// requires whole-blob reads and writes. A missing blob is `Ok(None)`, not an
/// error.
pub trait ConfigStore: Send + Sync {
    fn read(&self, name: &str) -> ScanResult<Option<Value>>;
    fn write(&self, name: &str, data: &Value) -> ScanResult<()>;
}

/// Accepts run results, merged into the acquisition's output record keyed by
/// device name.
pub trait ResultSink: Send + Sync {
    fn record(&self, device: &str, result: Value) -> ScanResult<()>;
}

/// File-backed [`ConfigStore`] storing each blob as pretty-printed JSON under
/// a root directory.
pub struct JsonFileStore {
    root: PathBuf,
}

impl JsonFileStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn path_for(&self, name: &str) -> PathBuf {
        self.root.join(format!("{name}.json"))
    }
}

impl ConfigStore for JsonFileStore {
    fn read(&self, name: &str) -> ScanResult<Option<Value>> {
        let path = self.path_for(name);
        if !path.exists() {
            return Ok(None);
        }
        let text = fs::read_to_string(&path)?;
        let value = serde_json::from_str(&text)
            .map_err(|e| ScannerError::Storage(format!("{}: {e}", path.display())))?;
        Ok(Some(value))
    }

    fn write(&self, name: &str, data: &Value) -> ScanResult<()> {
        fs::create_dir_all(&self.root)?;
        let path = self.path_for(name);
        let text = serde_json::to_string_pretty(data)?;
        fs::write(&path, text)?;
        debug!(blob = name, path = %path.display(), "wrote config blob");
        Ok(())
    }
}

/// In-memory [`ConfigStore`] for tests and headless simulation.
#[derive(Default)]
pub struct MemoryStore {
    blobs: Mutex<HashMap<String, Value>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ConfigStore for MemoryStore {
    fn read(&self, name: &str) -> ScanResult<Option<Value>> {
        Ok(self.blobs.lock().get(name).cloned())
    }

    fn write(&self, name: &str, data: &Value) -> ScanResult<()> {
        self.blobs.lock().insert(name.to_string(), data.clone());
        Ok(())
    }
}

/// In-memory [`ResultSink`] collecting one record per device.
#[derive(Default)]
pub struct MemoryResultSink {
    records: Mutex<HashMap<String, Value>>,
}

impl MemoryResultSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, device: &str) -> Option<Value> {
        self.records.lock().get(device).cloned()
    }
}

impl ResultSink for MemoryResultSink {
    fn record(&self, device: &str, result: Value) -> ScanResult<()> {
        self.records.lock().insert(device.to_string(), result);
        Ok(())
    }
}
