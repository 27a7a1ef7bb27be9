//! Key/value settings persistence.
//!
//! Federation preferences live in a single settings row. Backends implement
//! [`SettingsStore`]; writes overwrite the whole row (last writer wins).

pub mod store;

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use store::{MemorySettingsStore, RedbSettingsStore};

/// A row exists but its stored bytes cannot be decoded.
///
/// Returned inside the `anyhow::Error` of [`SettingsStore::get`] so callers
/// can tell a damaged row apart from an unavailable store.
#[derive(Debug, Error)]
#[error("Failed to deserialize setting '{key}': {reason}")]
pub struct UndecodableSetting {
    pub key: String,
    pub reason: String,
}

/// A persisted settings row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettingRecord {
    /// Row key (e.g. "features.saml").
    pub key: String,
    /// JSON-serialized value.
    pub value: String,
    /// Whether the row is read when the process starts.
    pub load_on_startup: bool,
    /// Last write time.
    pub updated_at: DateTime<Utc>,
}

impl SettingRecord {
    /// Create a record stamped with the current time.
    pub fn new(key: impl Into<String>, value: String, load_on_startup: bool) -> Self {
        Self {
            key: key.into(),
            value,
            load_on_startup,
            updated_at: Utc::now(),
        }
    }
}

/// Settings persistence backend.
pub trait SettingsStore: Send + Sync {
    /// Read a row by key. A row that cannot be decoded yields an error
    /// wrapping [`UndecodableSetting`].
    fn get(&self, key: &str) -> Result<Option<SettingRecord>>;

    /// Insert or overwrite a row.
    fn put(&self, record: SettingRecord) -> Result<()>;

    /// Delete a row. Returns whether it existed.
    fn delete(&self, key: &str) -> Result<bool>;
}
