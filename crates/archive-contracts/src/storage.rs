use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use serde_json::{Map, Value};

use crate::records::{AppState, CategorySet};

/// Key the whole application state is stored under.
pub const STATE_KEY: &str = "infinite_archive_db_v1";

/// Minimal string key-value store, the shape of browser local storage.
pub trait KeyValueStore: Send {
    fn get(&self, key: &str) -> Result<Option<String>>;
    fn set(&mut self, key: &str, value: &str) -> Result<()>;
}

/// Keys live in one JSON object file. Writes re-read the file so keys set by
/// another handle survive, then replace it through a temp file + rename.
/// A file that no longer parses is moved to `<name>.corrupt` before the write,
/// so whatever it held stays on disk for recovery.
#[derive(Debug, Clone)]
pub struct FileKeyValueStore {
    path: PathBuf,
}

impl FileKeyValueStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl KeyValueStore for FileKeyValueStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        if !self.path.exists() {
            return Ok(None);
        }
        let on_disk = read_json_object(&self.path)?;
        Ok(on_disk.get(key).and_then(Value::as_str).map(str::to_string))
    }

    fn set(&mut self, key: &str, value: &str) -> Result<()> {
        let mut on_disk = if self.path.exists() {
            let raw = std::fs::read_to_string(&self.path)
                .with_context(|| format!("failed reading {}", self.path.display()))?;
            match parse_json_object(&raw, &self.path) {
                Ok(on_disk) => on_disk,
                Err(_) => {
                    let backup = self.path.with_extension("corrupt");
                    std::fs::rename(&self.path, &backup).with_context(|| {
                        format!("failed moving unreadable {} aside", self.path.display())
                    })?;
                    Map::new()
                }
            }
        } else {
            Map::new()
        };
        on_disk.insert(key.to_string(), Value::String(value.to_string()));
        write_json_object(&self.path, &on_disk)
    }
}

/// In-process store; clones share the same map.
#[derive(Debug, Clone, Default)]
pub struct MemoryKeyValueStore {
    entries: Arc<Mutex<BTreeMap<String, String>>>,
}

impl MemoryKeyValueStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryKeyValueStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        let entries = self
            .entries
            .lock()
            .map_err(|_| anyhow::anyhow!("memory store lock poisoned"))?;
        Ok(entries.get(key).cloned())
    }

    fn set(&mut self, key: &str, value: &str) -> Result<()> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|_| anyhow::anyhow!("memory store lock poisoned"))?;
        entries.insert(key.to_string(), value.to_string());
        Ok(())
    }
}

/// Persistence adapter: the full [`AppState`] as one JSON blob under [`STATE_KEY`].
pub struct StateStore {
    backend: Box<dyn KeyValueStore>,
    key: String,
}

impl StateStore {
    pub fn new<S: KeyValueStore + 'static>(backend: S) -> Self {
        Self {
            backend: Box::new(backend),
            key: STATE_KEY.to_string(),
        }
    }

    pub fn file(path: impl Into<PathBuf>) -> Self {
        Self::new(FileKeyValueStore::new(path))
    }

    pub fn memory() -> Self {
        Self::new(MemoryKeyValueStore::new())
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Overwrites the stored blob. Callers decide what a failure means.
    pub fn save(&mut self, state: &AppState) -> Result<()> {
        let blob = serde_json::to_string(state).context("state serialization failed")?;
        self.backend
            .set(&self.key, &blob)
            .with_context(|| format!("failed to store '{}'", self.key))
    }

    /// Missing, unreadable or corrupt data means first run. An empty category
    /// list is replaced by the defaults. Pending records are left in place.
    pub fn load(&self) -> AppState {
        let Ok(Some(raw)) = self.backend.get(&self.key) else {
            return AppState::default();
        };
        let Ok(payload) = serde_json::from_str::<Value>(&raw) else {
            return AppState::default();
        };
        let Some(obj) = payload.as_object() else {
            return AppState::default();
        };

        let images = obj
            .get("images")
            .cloned()
            .and_then(|value| serde_json::from_value(value).ok())
            .unwrap_or_default();
        let labels: Vec<String> = obj
            .get("categories")
            .cloned()
            .and_then(|value| serde_json::from_value(value).ok())
            .unwrap_or_default();
        let categories = if labels.is_empty() {
            CategorySet::defaults()
        } else {
            CategorySet::from(labels)
        };
        AppState { images, categories }
    }
}

fn read_json_object(path: &Path) -> Result<Map<String, Value>> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed reading {}", path.display()))?;
    parse_json_object(&raw, path)
}

fn parse_json_object(raw: &str, path: &Path) -> Result<Map<String, Value>> {
    let parsed: Value = serde_json::from_str(raw)
        .with_context(|| format!("{} is not valid JSON", path.display()))?;
    Ok(parsed.as_object().cloned().unwrap_or_default())
}

fn write_json_object(path: &Path, payload: &Map<String, Value>) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let staging = path.with_extension("tmp");
    std::fs::write(
        &staging,
        serde_json::to_string_pretty(&Value::Object(payload.clone()))?,
    )
    .with_context(|| format!("failed writing {}", staging.display()))?;
    std::fs::rename(&staging, path)
        .with_context(|| format!("failed replacing {}", path.display()))?;
    Ok(())
}
