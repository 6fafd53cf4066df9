//! Durable key-value storage and the persisted "last known good" fix.
//!
//! The store is a tiny string-keyed abstraction so the acquisition controller
//! can be exercised against an in-memory fake in tests and a JSON file on disk
//! from the CLI. The last-good fix is a cache, not a source of truth: a missing
//! or corrupt record simply loads as absent.

use anyhow::{Context, Result};
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::geo::Coordinate;

/// Well-known key for the persisted last-good fix
pub const DEFAULT_LAST_GOOD_KEY: &str = "lastGoodLoc";

/// Interface for durable string storage
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>>;
    fn set(&self, key: &str, value: &str) -> Result<()>;
    fn clear(&self, key: &str) -> Result<()>;
}

/// Volatile store for tests and one-off runs
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        let entries = self
            .entries
            .lock()
            .map_err(|_| anyhow::anyhow!("memory store lock poisoned"))?;
        Ok(entries.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|_| anyhow::anyhow!("memory store lock poisoned"))?;
        entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn clear(&self, key: &str) -> Result<()> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|_| anyhow::anyhow!("memory store lock poisoned"))?;
        entries.remove(key);
        Ok(())
    }
}

/// Store backed by a single JSON object on disk, rewritten on every change
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl FileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_all(&self) -> Result<HashMap<String, String>> {
        if !self.path.exists() {
            return Ok(HashMap::new());
        }

        let json = fs::read_to_string(&self.path)
            .with_context(|| format!("Failed to read store from {}", self.path.display()))?;

        match serde_json::from_str(&json) {
            Ok(entries) => Ok(entries),
            Err(e) => {
                warn!(
                    "Ignoring unreadable store at {}: {}",
                    self.path.display(),
                    e
                );
                Ok(HashMap::new())
            }
        }
    }

    fn write_all(&self, entries: &HashMap<String, String>) -> Result<()> {
        // Ensure parent directory exists
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).with_context(|| {
                    format!("Failed to create directory for {}", self.path.display())
                })?;
            }
        }

        let json = serde_json::to_string_pretty(entries).context("Failed to serialize store")?;
        fs::write(&self.path, json)
            .with_context(|| format!("Failed to write store to {}", self.path.display()))
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        let _guard = self
            .lock
            .lock()
            .map_err(|_| anyhow::anyhow!("file store lock poisoned"))?;
        Ok(self.read_all()?.remove(key))
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        let _guard = self
            .lock
            .lock()
            .map_err(|_| anyhow::anyhow!("file store lock poisoned"))?;
        let mut entries = self.read_all()?;
        entries.insert(key.to_string(), value.to_string());
        self.write_all(&entries)
    }

    fn clear(&self, key: &str) -> Result<()> {
        let _guard = self
            .lock
            .lock()
            .map_err(|_| anyhow::anyhow!("file store lock poisoned"))?;
        let mut entries = self.read_all()?;
        if entries.remove(key).is_some() {
            self.write_all(&entries)?;
        }
        Ok(())
    }
}

/// The most recent position known to be reasonably accurate
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LastGoodFix {
    pub lat: f64,
    pub lng: f64,
    pub timestamp_ms: i64,
}

impl LastGoodFix {
    pub fn new(coordinate: Coordinate, timestamp_ms: i64) -> Self {
        Self {
            lat: coordinate.lat,
            lng: coordinate.lng,
            timestamp_ms,
        }
    }

    pub fn coordinate(&self) -> Coordinate {
        Coordinate::new(self.lat, self.lng)
    }

    /// Age relative to `now_ms`. Informational only.
    pub fn age_ms(&self, now_ms: i64) -> i64 {
        now_ms.saturating_sub(self.timestamp_ms)
    }

    /// Read the persisted fix. Missing, unreadable or corrupt entries yield `None`.
    pub fn load(store: &dyn KeyValueStore, key: &str) -> Option<Self> {
        let raw = match store.get(key) {
            Ok(Some(raw)) => raw,
            Ok(None) => return None,
            Err(e) => {
                warn!("Failed to read last good fix: {e:#}");
                return None;
            }
        };

        match serde_json::from_str::<LastGoodFix>(&raw) {
            Ok(fix) if fix.lat.is_finite() && fix.lng.is_finite() => Some(fix),
            Ok(_) => {
                warn!("Discarding last good fix with non-finite coordinates");
                None
            }
            Err(e) => {
                warn!("Discarding corrupt last good fix: {e}");
                None
            }
        }
    }

    /// Overwrite the persisted fix
    pub fn save(&self, store: &dyn KeyValueStore, key: &str) -> Result<()> {
        let json = serde_json::to_string(self).context("Failed to serialize last good fix")?;
        store.set(key, &json)?;
        debug!(
            "Persisted last good fix {:.6}, {:.6} under {}",
            self.lat, self.lng, key
        );
        Ok(())
    }
}
