use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::error::{Result, StoreError};
use crate::keys::StateKey;

/// Newest envelope layout this build writes and reads.
pub const SCHEMA_VERSION: u32 = 1;

/// On-disk wrapper around every persisted payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotEnvelope {
    pub schema_version: u32,
    pub key: String,
    pub saved_at: DateTime<Utc>,
    pub payload: Value,
}

impl SnapshotEnvelope {
    pub fn new(key: StateKey, payload: Value) -> Self {
        Self {
            schema_version: SCHEMA_VERSION,
            key: key.name(),
            saved_at: Utc::now(),
            payload,
        }
    }

    fn check(self, key: StateKey) -> Result<Value> {
        if self.schema_version > SCHEMA_VERSION {
            return Err(StoreError::UnsupportedSchema {
                key: self.key,
                found: self.schema_version,
                supported: SCHEMA_VERSION,
            });
        }
        if self.key != key.name() {
            return Err(StoreError::corruption(format!(
                "file for {key} holds state for {}",
                self.key
            )));
        }
        Ok(self.payload)
    }
}

/// Durable key/value storage for engine state.
pub trait StateStore: Send + Sync {
    fn save_value(&self, key: StateKey, payload: Value) -> Result<()>;

    /// `None` when nothing has been saved under `key` yet.
    fn load_value(&self, key: StateKey) -> Result<Option<Value>>;

    fn keys(&self) -> Result<Vec<StateKey>>;

    fn health_check(&self) -> Result<()>;
}

/// Typed helpers over any [`StateStore`].
pub trait StateStoreExt: StateStore {
    fn save<T: Serialize>(&self, key: StateKey, state: &T) -> Result<()> {
        self.save_value(key, serde_json::to_value(state)?)
    }

    fn load<T: DeserializeOwned>(&self, key: StateKey) -> Result<Option<T>> {
        match self.load_value(key)? {
            Some(value) => Ok(Some(serde_json::from_value(value)?)),
            None => Ok(None),
        }
    }
}

impl<S: StateStore + ?Sized> StateStoreExt for S {}

/// One JSON file per key under a state directory. Writes go to a temp file
/// and are renamed into place.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    dir: PathBuf,
}

impl JsonFileStore {
    pub fn new(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;
        info!("💾 State store at {}", dir.display());
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, key: StateKey) -> PathBuf {
        self.dir.join(key.file_name())
    }
}

impl StateStore for JsonFileStore {
    fn save_value(&self, key: StateKey, payload: Value) -> Result<()> {
        let path = self.path_for(key);
        let tmp = path.with_extension("json.tmp");
        let envelope = SnapshotEnvelope::new(key, payload);

        {
            let file = File::create(&tmp)?;
            let mut writer = BufWriter::new(file);
            serde_json::to_writer(&mut writer, &envelope)?;
            writer.flush()?;
            writer.get_ref().sync_all()?;
        }
        fs::rename(&tmp, &path)?;

        debug!("💾 Saved {} to {}", key, path.display());
        Ok(())
    }

    fn load_value(&self, key: StateKey) -> Result<Option<Value>> {
        let path = self.path_for(key);
        if !path.exists() {
            return Ok(None);
        }

        let reader = BufReader::new(File::open(&path)?);
        let envelope: SnapshotEnvelope = serde_json::from_reader(reader)
            .map_err(|e| StoreError::corruption(format!("{}: {e}", path.display())))?;
        envelope.check(key).map(Some)
    }

    fn keys(&self) -> Result<Vec<StateKey>> {
        let mut keys = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            match stem.parse::<StateKey>() {
                Ok(key) => keys.push(key),
                Err(_) => warn!("⚠️ Ignoring unrecognised state file {}", path.display()),
            }
        }
        keys.sort();
        Ok(keys)
    }

    fn health_check(&self) -> Result<()> {
        let meta = fs::metadata(&self.dir)?;
        if !meta.is_dir() {
            return Err(StoreError::unavailable(format!(
                "{} is not a directory",
                self.dir.display()
            )));
        }
        if meta.permissions().readonly() {
            return Err(StoreError::unavailable(format!(
                "{} is read-only",
                self.dir.display()
            )));
        }
        Ok(())
    }
}

/// In-process store for tests and ephemeral runs.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: RwLock<HashMap<StateKey, SnapshotEnvelope>>,
    fail_writes: RwLock<bool>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes subsequent saves fail until switched back.
    pub fn set_fail_writes(&self, fail: bool) {
        *self.fail_writes.write() = fail;
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

impl StateStore for MemoryStore {
    fn save_value(&self, key: StateKey, payload: Value) -> Result<()> {
        if *self.fail_writes.read() {
            return Err(StoreError::unavailable("writes disabled"));
        }
        self.entries
            .write()
            .insert(key, SnapshotEnvelope::new(key, payload));
        Ok(())
    }

    fn load_value(&self, key: StateKey) -> Result<Option<Value>> {
        match self.entries.read().get(&key) {
            Some(envelope) => envelope.clone().check(key).map(Some),
            None => Ok(None),
        }
    }

    fn keys(&self) -> Result<Vec<StateKey>> {
        let mut keys: Vec<StateKey> = self.entries.read().keys().copied().collect();
        keys.sort();
        Ok(keys)
    }

    fn health_check(&self) -> Result<()> {
        if *self.fail_writes.read() {
            return Err(StoreError::unavailable("writes disabled"));
        }
        Ok(())
    }
}
