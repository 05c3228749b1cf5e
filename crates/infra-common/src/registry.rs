//! Persisted integer settings.
//!
//! The engine keeps a handful of negotiated values (the minimum session
//! expire period among them) across restarts. [`Registry`] is the seam;
//! [`MemoryRegistry`] backs tests and ephemeral stacks, [`FileRegistry`]
//! persists to a JSON file.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use dashmap::DashMap;
use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::errors::context::ErrorExt;
use crate::errors::types::Result;

/// Key/value store for integer settings
pub trait Registry: Send + Sync {
    /// Reads a value, returning `default` when the key is unset
    fn read_integer(&self, key: &str, default: i64) -> i64;

    /// Stores a value
    fn write_integer(&self, key: &str, value: i64) -> Result<()>;
}

/// In-memory registry
#[derive(Debug, Default)]
pub struct MemoryRegistry {
    values: DashMap<String, i64>,
}

impl MemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Registry for MemoryRegistry {
    fn read_integer(&self, key: &str, default: i64) -> i64 {
        self.values.get(key).map(|v| *v).unwrap_or(default)
    }

    fn write_integer(&self, key: &str, value: i64) -> Result<()> {
        self.values.insert(key.to_string(), value);
        Ok(())
    }
}

/// Registry persisted as a JSON object, rewritten on every write
#[derive(Debug)]
pub struct FileRegistry {
    path: PathBuf,
    values: Mutex<BTreeMap<String, i64>>,
}

impl FileRegistry {
    /// Opens the registry at `path`; a missing file starts empty
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let values = if path.exists() {
            let text = fs::read_to_string(&path)
                .with_context("registry", format!("read {}", path.display()))?;
            serde_json::from_str(&text)
                .with_context("registry", format!("parse {}", path.display()))?
        } else {
            debug!("Registry file {} does not exist yet", path.display());
            BTreeMap::new()
        };

        Ok(FileRegistry {
            path,
            values: Mutex::new(values),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn persist(&self, values: &BTreeMap<String, i64>) -> Result<()> {
        let text = serde_json::to_string_pretty(values)?;
        fs::write(&self.path, text)
            .with_context("registry", format!("write {}", self.path.display()))
    }
}

impl Registry for FileRegistry {
    fn read_integer(&self, key: &str, default: i64) -> i64 {
        self.values.lock().get(key).copied().unwrap_or(default)
    }

    fn write_integer(&self, key: &str, value: i64) -> Result<()> {
        let mut values = self.values.lock();
        values.insert(key.to_string(), value);
        if let Err(e) = self.persist(&values) {
            warn!("Failed to persist registry key {}: {}", key, e);
            return Err(e);
        }
        Ok(())
    }
}
