//! Persistence seam
//!
//! The host supplies a [`KeyValueStore`] holding raw strings by key. [`Storage`]
//! layers typed access on top: timestamps, counters, and append-only event
//! lists encoded as JSON. Values that fail to decode are treated as absent so a
//! corrupted entry never stops a cycle.

use crate::error::CoreError;
use crate::types::{CommuteSession, NudgeRecord, SedentaryStreak, StairEvent, WalkBout};
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, RwLock};

/// Raw key/value persistence supplied by the host
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, CoreError>;

    /// `None` removes the key
    fn set(&self, key: &str, value: Option<String>) -> Result<(), CoreError>;
}

/// Event types that can be persisted as an append-only list
pub trait StoredEvent: Serialize + DeserializeOwned + Clone {
    const KIND: &'static str;
}

impl StoredEvent for WalkBout {
    const KIND: &'static str = "walk_bouts";
}

impl StoredEvent for StairEvent {
    const KIND: &'static str = "stairs";
}

impl StoredEvent for SedentaryStreak {
    const KIND: &'static str = "sedentary";
}

impl StoredEvent for CommuteSession {
    const KIND: &'static str = "commutes";
}

impl StoredEvent for NudgeRecord {
    const KIND: &'static str = "nudges";
}

fn events_key(kind: &str) -> String {
    format!("storage.{}.events", kind)
}

/// Typed access over a [`KeyValueStore`]
#[derive(Clone)]
pub struct Storage {
    store: Arc<dyn KeyValueStore>,
    list_lock: Arc<Mutex<()>>,
}

impl Storage {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self {
            store,
            list_lock: Arc::new(Mutex::new(())),
        }
    }

    /// Storage over a fresh in-memory store
    pub fn in_memory() -> Self {
        Self::new(Arc::new(InMemoryStore::default()))
    }

    fn raw(&self, key: &str) -> Option<String> {
        match self.store.get(key) {
            Ok(value) => value,
            Err(e) => {
                log::warn!("cannot read {}: {}", key, e);
                None
            }
        }
    }

    pub fn text(&self, key: &str) -> Option<String> {
        self.raw(key)
    }

    pub fn set_text(&self, key: &str, value: Option<String>) -> Result<(), CoreError> {
        self.store.set(key, value)
    }

    pub fn timestamp(&self, key: &str) -> Option<DateTime<Utc>> {
        let raw = self.raw(key)?;
        match DateTime::parse_from_rfc3339(&raw) {
            Ok(dt) => Some(dt.with_timezone(&Utc)),
            Err(e) => {
                log::warn!("ignoring malformed timestamp at {}: {}", key, e);
                None
            }
        }
    }

    pub fn set_timestamp(&self, key: &str, value: Option<DateTime<Utc>>) -> Result<(), CoreError> {
        self.store.set(key, value.map(|dt| dt.to_rfc3339()))
    }

    /// Counter value, zero when absent or malformed
    pub fn count(&self, key: &str) -> u32 {
        match self.raw(key) {
            Some(raw) => raw.trim().parse().unwrap_or_else(|e| {
                log::warn!("ignoring malformed counter at {}: {}", key, e);
                0
            }),
            None => 0,
        }
    }

    pub fn set_count(&self, key: &str, value: u32) -> Result<(), CoreError> {
        self.store.set(key, Some(value.to_string()))
    }

    fn read_all<E: StoredEvent>(&self) -> Vec<E> {
        let key = events_key(E::KIND);
        match self.raw(&key) {
            Some(raw) => serde_json::from_str(&raw).unwrap_or_else(|e| {
                log::warn!("ignoring malformed event list at {}: {}", key, e);
                Vec::new()
            }),
            None => Vec::new(),
        }
    }

    fn write_all<E: StoredEvent>(&self, events: &[E]) -> Result<(), CoreError> {
        let json = serde_json::to_string(events)?;
        self.store.set(&events_key(E::KIND), Some(json))
    }

    pub fn append_events<E: StoredEvent>(&self, events: &[E]) -> Result<(), CoreError> {
        if events.is_empty() {
            return Ok(());
        }
        let _guard = self.list_lock.lock().unwrap_or_else(|e| e.into_inner());
        let mut existing: Vec<E> = self.read_all();
        let before = existing.len();
        existing.extend_from_slice(events);
        log::debug!(
            "appended {} {} events ({} total)",
            existing.len() - before,
            E::KIND,
            existing.len()
        );
        self.write_all(&existing)
    }

    /// Most recent events, oldest first, at most `limit`
    pub fn recent_events<E: StoredEvent>(&self, limit: usize) -> Vec<E> {
        let mut events: Vec<E> = self.read_all();
        if events.len() > limit {
            events.drain(..events.len() - limit);
        }
        events
    }

    /// Rewrite a stored list through `update`, used to flip flags on
    /// previously persisted events
    pub fn update_events<E, F>(&self, update: F) -> Result<(), CoreError>
    where
        E: StoredEvent,
        F: FnOnce(&mut Vec<E>),
    {
        let _guard = self.list_lock.lock().unwrap_or_else(|e| e.into_inner());
        let mut events: Vec<E> = self.read_all();
        update(&mut events);
        self.write_all(&events)
    }
}

/// Volatile store, also used as the test fake
#[derive(Debug, Default)]
pub struct InMemoryStore {
    values: RwLock<HashMap<String, String>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a snapshot produced by [`InMemoryStore::to_json`]
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        let values: HashMap<String, String> = serde_json::from_str(json)?;
        Ok(Self {
            values: RwLock::new(values),
        })
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        let values = self.values.read().unwrap_or_else(|e| e.into_inner());
        serde_json::to_string(&*values)
    }

    pub fn len(&self) -> usize {
        self.values.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl KeyValueStore for InMemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>, CoreError> {
        let values = self.values.read().unwrap_or_else(|e| e.into_inner());
        Ok(values.get(key).cloned())
    }

    fn set(&self, key: &str, value: Option<String>) -> Result<(), CoreError> {
        let mut values = self.values.write().unwrap_or_else(|e| e.into_inner());
        match value {
            Some(v) => {
                values.insert(key.to_string(), v);
            }
            None => {
                values.remove(key);
            }
        }
        Ok(())
    }
}

/// Store persisted as a single JSON object on disk, rewritten on every set.
/// Each rewrite goes to a sibling `.tmp` file that is then renamed over the
/// store, so the file on disk is always a complete snapshot.
#[derive(Debug)]
pub struct JsonFileStore {
    path: PathBuf,
    values: Mutex<HashMap<String, String>>,
}

impl JsonFileStore {
    /// Open the store at `path`. A missing or unreadable file starts empty.
    pub fn open(path: &Path) -> Self {
        let values = match fs::read_to_string(path) {
            Ok(contents) => serde_json::from_str(&contents).unwrap_or_else(|e| {
                log::warn!("ignoring malformed state file {}: {}", path.display(), e);
                HashMap::new()
            }),
            Err(_) => HashMap::new(),
        };
        Self {
            path: path.to_path_buf(),
            values: Mutex::new(values),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self.path.clone().into_os_string();
        name.push(".tmp");
        PathBuf::from(name)
    }

    fn persist(&self, values: &HashMap<String, String>) -> Result<(), CoreError> {
        let serialized = serde_json::to_string_pretty(values)?;
        let temp = self.temp_path();
        fs::write(&temp, serialized)
            .and_then(|()| fs::rename(&temp, &self.path))
            .map_err(|e| {
                let _ = fs::remove_file(&temp);
                CoreError::StorageError(format!("cannot write {}: {}", self.path.display(), e))
            })
    }
}

impl KeyValueStore for JsonFileStore {
    fn get(&self, key: &str) -> Result<Option<String>, CoreError> {
        let values = self.values.lock().unwrap_or_else(|e| e.into_inner());
        Ok(values.get(key).cloned())
    }

    fn set(&self, key: &str, value: Option<String>) -> Result<(), CoreError> {
        let mut values = self.values.lock().unwrap_or_else(|e| e.into_inner());
        match value {
            Some(v) => {
                values.insert(key.to_string(), v);
            }
            None => {
                values.remove(key);
            }
        }
        self.persist(&values)
    }
}
