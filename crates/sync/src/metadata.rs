//! Named values that survive process restarts.
//!
//! Other parts of the client set flags here (e.g. "account deletion initiated")
//! and generators consume them. Secrets that must outlive a reinstall-free
//! restart, such as the device-push signaling keys, live here too.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::Context;
use relaysync_core::{SyncError, SyncResult};
use serde_json::Value;

use crate::context::lock;

/// Key-value persistence contract.
pub trait PersistentMetadataStore: Send + Sync {
    fn get(&self, key: &str) -> SyncResult<Option<Value>>;

    /// Store `value` under `key`; `None` removes the key.
    fn set(&self, key: &str, value: Option<Value>) -> SyncResult<()>;

    /// Missing or non-boolean values read as `false`.
    fn get_bool(&self, key: &str) -> SyncResult<bool> {
        Ok(self.get(key)?.and_then(|v| v.as_bool()).unwrap_or(false))
    }

    fn set_bool(&self, key: &str, value: bool) -> SyncResult<()> {
        self.set(key, Some(Value::Bool(value)))
    }

    fn get_string(&self, key: &str) -> SyncResult<Option<String>> {
        Ok(self
            .get(key)?
            .and_then(|v| v.as_str().map(str::to_string)))
    }

    fn set_string(&self, key: &str, value: &str) -> SyncResult<()> {
        self.set(key, Some(Value::String(value.to_string())))
    }
}

/// In-memory store for tests/dev. Nothing survives the process.
#[derive(Debug, Default)]
pub struct InMemoryMetadataStore {
    values: Mutex<BTreeMap<String, Value>>,
}

impl InMemoryMetadataStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl PersistentMetadataStore for InMemoryMetadataStore {
    fn get(&self, key: &str) -> SyncResult<Option<Value>> {
        Ok(lock(&self.values).get(key).cloned())
    }

    fn set(&self, key: &str, value: Option<Value>) -> SyncResult<()> {
        let mut values = lock(&self.values);
        match value {
            Some(value) => values.insert(key.to_string(), value),
            None => values.remove(key),
        };
        Ok(())
    }
}

/// JSON-file-backed store.
///
/// The whole map is rewritten on every `set` (write to a sibling temp file, then
/// rename), so a crash mid-write leaves the previous contents intact.
#[derive(Debug)]
pub struct FileMetadataStore {
    path: PathBuf,
    values: Mutex<BTreeMap<String, Value>>,
}

impl FileMetadataStore {
    /// Open the store at `path`, creating parent directories as needed.
    pub fn open(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create metadata directory at {:?}", parent))?;
        }

        let values = if path.exists() {
            let raw = std::fs::read(&path)
                .with_context(|| format!("failed to read metadata store at {:?}", path))?;
            serde_json::from_slice(&raw)
                .with_context(|| format!("metadata store at {:?} is not valid JSON", path))?
        } else {
            BTreeMap::new()
        };

        Ok(Self {
            path,
            values: Mutex::new(values),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn persist(&self, values: &BTreeMap<String, Value>) -> anyhow::Result<()> {
        let raw = serde_json::to_vec_pretty(values).context("failed to serialize metadata")?;
        let tmp = self.path.with_extension("tmp");
        std::fs::write(&tmp, raw)
            .with_context(|| format!("failed to write metadata to {:?}", tmp))?;
        std::fs::rename(&tmp, &self.path)
            .with_context(|| format!("failed to move metadata into place at {:?}", self.path))?;
        Ok(())
    }
}

impl PersistentMetadataStore for FileMetadataStore {
    fn get(&self, key: &str) -> SyncResult<Option<Value>> {
        Ok(lock(&self.values).get(key).cloned())
    }

    fn set(&self, key: &str, value: Option<Value>) -> SyncResult<()> {
        let mut values = lock(&self.values);
        let previous = match value {
            Some(value) => values.insert(key.to_string(), value),
            None => values.remove(key),
        };

        if let Err(err) = self.persist(&values) {
            // Keep memory and disk in agreement.
            match previous {
                Some(previous) => values.insert(key.to_string(), previous),
                None => values.remove(key),
            };
            tracing::error!("failed to persist metadata key {key}: {err:?}");
            return Err(SyncError::storage(format!("{err:#}")));
        }
        Ok(())
    }
}
