//! Settings stores: redb-backed for deployments, in-memory for tests and
//! ephemeral runs.

use anyhow::{anyhow, Context, Result};
use redb::{Database, ReadableTable, ReadableTableMetadata, TableDefinition};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::RwLock;
use tracing::debug;

use super::{SettingRecord, SettingsStore, UndecodableSetting};

/// redb table for settings rows (key: setting key, value: MessagePack bytes).
pub(crate) const SETTINGS_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("settings");

/// Settings store backed by a redb embedded database.
pub struct RedbSettingsStore {
    db: Database,
}

impl RedbSettingsStore {
    /// Open or create a settings store at the given path.
    pub fn open(path: PathBuf) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory: {:?}", parent))?;
        }

        let db = Database::create(&path)
            .with_context(|| format!("Failed to open settings database: {:?}", path))?;

        let write_txn = db.begin_write()?;
        {
            let _ = write_txn.open_table(SETTINGS_TABLE)?;
        }
        write_txn.commit()?;

        let rows = {
            let read_txn = db.begin_read()?;
            let table = read_txn.open_table(SETTINGS_TABLE)?;
            table.len()?
        };
        debug!(rows, path = ?path, "Opened settings store");

        Ok(Self { db })
    }
}

impl SettingsStore for RedbSettingsStore {
    fn get(&self, key: &str) -> Result<Option<SettingRecord>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(SETTINGS_TABLE)?;

        match table.get(key)? {
            Some(value) => {
                let record: SettingRecord =
                    rmp_serde::from_slice(value.value()).map_err(|e| UndecodableSetting {
                        key: key.to_string(),
                        reason: e.to_string(),
                    })?;
                Ok(Some(record))
            }
            None => Ok(None),
        }
    }

    fn put(&self, record: SettingRecord) -> Result<()> {
        let data = rmp_serde::to_vec_named(&record).context("Failed to serialize setting")?;
        let write_txn = self.db.begin_write()?;
        {
            let mut table = write_txn.open_table(SETTINGS_TABLE)?;
            table.insert(record.key.as_str(), data.as_slice())?;
        }
        write_txn.commit()?;
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<bool> {
        let write_txn = self.db.begin_write()?;
        let removed = {
            let mut table = write_txn.open_table(SETTINGS_TABLE)?;
            let result = table.remove(key)?;
            result.is_some()
        };
        write_txn.commit()?;
        Ok(removed)
    }
}

/// In-memory settings store.
#[derive(Default)]
pub struct MemorySettingsStore {
    rows: RwLock<HashMap<String, SettingRecord>>,
}

impl MemorySettingsStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SettingsStore for MemorySettingsStore {
    fn get(&self, key: &str) -> Result<Option<SettingRecord>> {
        let rows = self.rows.read().map_err(|_| anyhow!("Settings lock poisoned"))?;
        Ok(rows.get(key).cloned())
    }

    fn put(&self, record: SettingRecord) -> Result<()> {
        let mut rows = self.rows.write().map_err(|_| anyhow!("Settings lock poisoned"))?;
        rows.insert(record.key.clone(), record);
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<bool> {
        let mut rows = self.rows.write().map_err(|_| anyhow!("Settings lock poisoned"))?;
        Ok(rows.remove(key).is_some())
    }
}
