//! User directory backed by redb, plus an in-memory variant.
//!
//! Four tables are kept consistent inside each write transaction:
//! - users: UUID -> MessagePack<LocalUser>
//! - email index: lower-cased email -> UUID
//! - identities: `provider_type:provider_id` -> MessagePack<AuthIdentity>
//! - identity index: UUID -> MessagePack<Vec<identity key>>

use anyhow::{anyhow, bail, Context, Result};
use redb::{Database, ReadableTable, ReadableTableMetadata, TableDefinition};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::RwLock;
use tracing::{debug, warn};

use super::types::{AuthIdentity, LocalUser};

const USERS_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("users");
const EMAIL_INDEX: TableDefinition<&str, &str> = TableDefinition::new("users_email_index");
const IDENTITIES_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("auth_identities");
const IDENTITY_INDEX: TableDefinition<&str, &[u8]> =
    TableDefinition::new("auth_identities_by_user");

/// Local user records consulted during reconciliation.
pub trait UserDirectory: Send + Sync {
    /// Look up a user by email, case-insensitively.
    fn find_by_email(&self, email: &str) -> Result<Option<LocalUser>>;

    /// Identities linked to a user.
    fn identities_for(&self, user_id: &str) -> Result<Vec<AuthIdentity>>;

    /// Create a user together with its first identity.
    fn create_user(&self, user: LocalUser, identity: AuthIdentity) -> Result<LocalUser>;

    /// Overwrite an existing user and link `identity` to it as one write.
    ///
    /// Any other identity of the same provider type held by the user is
    /// replaced. Fails without writing anything when the identity already
    /// belongs to another user.
    fn update_and_link(&self, user: &LocalUser, identity: AuthIdentity) -> Result<()>;
}

fn email_key(email: &str) -> String {
    email.trim().to_lowercase()
}

fn decode_keys(bytes: &[u8]) -> Result<Vec<String>> {
    rmp_serde::from_slice(bytes).context("Failed to deserialize identity index")
}

/// redb-backed user directory.
pub struct RedbUserDirectory {
    db: Database,
}

impl RedbUserDirectory {
    /// Open or create a user directory at the given path.
    pub fn open(path: PathBuf) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory: {:?}", parent))?;
        }

        let db = Database::create(&path)
            .with_context(|| format!("Failed to open user database: {:?}", path))?;

        let write_txn = db.begin_write()?;
        {
            let _ = write_txn.open_table(USERS_TABLE)?;
            let _ = write_txn.open_table(EMAIL_INDEX)?;
            let _ = write_txn.open_table(IDENTITIES_TABLE)?;
            let _ = write_txn.open_table(IDENTITY_INDEX)?;
        }
        write_txn.commit()?;

        let users = {
            let read_txn = db.begin_read()?;
            let table = read_txn.open_table(USERS_TABLE)?;
            table.len()?
        };
        debug!(users, path = ?path, "Opened user directory");

        Ok(Self { db })
    }

    fn get(&self, id: &str) -> Result<Option<LocalUser>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(USERS_TABLE)?;
        match table.get(id)? {
            Some(value) => {
                let user: LocalUser = rmp_serde::from_slice(value.value())
                    .with_context(|| format!("Failed to deserialize user '{}'", id))?;
                Ok(Some(user))
            }
            None => Ok(None),
        }
    }
}

impl UserDirectory for RedbUserDirectory {
    fn find_by_email(&self, email: &str) -> Result<Option<LocalUser>> {
        let id = {
            let read_txn = self.db.begin_read()?;
            let index = read_txn.open_table(EMAIL_INDEX)?;
            index
                .get(email_key(email).as_str())?
                .map(|value| value.value().to_string())
        };

        match id {
            Some(id) => self.get(&id),
            None => Ok(None),
        }
    }

    fn identities_for(&self, user_id: &str) -> Result<Vec<AuthIdentity>> {
        let read_txn = self.db.begin_read()?;
        let index = read_txn.open_table(IDENTITY_INDEX)?;
        let keys = match index.get(user_id)? {
            Some(value) => decode_keys(value.value())?,
            None => return Ok(Vec::new()),
        };

        let table = read_txn.open_table(IDENTITIES_TABLE)?;
        let mut identities = Vec::with_capacity(keys.len());
        for key in keys {
            match table.get(key.as_str())? {
                Some(value) => match rmp_serde::from_slice::<AuthIdentity>(value.value()) {
                    Ok(identity) => identities.push(identity),
                    Err(e) => {
                        warn!(key = %key, error = %e, "Failed to deserialize identity, skipping");
                    }
                },
                None => warn!(key = %key, user_id, "Indexed identity is missing, skipping"),
            }
        }
        Ok(identities)
    }

    fn create_user(&self, user: LocalUser, identity: AuthIdentity) -> Result<LocalUser> {
        let user_data = rmp_serde::to_vec_named(&user).context("Failed to serialize user")?;
        let identity_data =
            rmp_serde::to_vec_named(&identity).context("Failed to serialize identity")?;
        let email = email_key(&user.email);
        let identity_key = identity.key();
        let keys_data = rmp_serde::to_vec_named(&vec![identity_key.clone()])
            .context("Failed to serialize identity index")?;

        let write_txn = self.db.begin_write()?;
        {
            let mut users = write_txn.open_table(USERS_TABLE)?;
            let mut index = write_txn.open_table(EMAIL_INDEX)?;
            let mut identities = write_txn.open_table(IDENTITIES_TABLE)?;
            let mut by_user = write_txn.open_table(IDENTITY_INDEX)?;

            if index.get(email.as_str())?.is_some() {
                bail!("email '{}' already exists", user.email);
            }
            if identities.get(identity_key.as_str())?.is_some() {
                bail!("identity '{}' is already linked", identity_key);
            }

            users.insert(user.id.as_str(), user_data.as_slice())?;
            index.insert(email.as_str(), user.id.as_str())?;
            identities.insert(identity_key.as_str(), identity_data.as_slice())?;
            by_user.insert(user.id.as_str(), keys_data.as_slice())?;
        }
        write_txn.commit()?;

        Ok(user)
    }

    fn update_and_link(&self, user: &LocalUser, identity: AuthIdentity) -> Result<()> {
        if identity.user_id != user.id {
            bail!("identity '{}' is not for user '{}'", identity.key(), user.id);
        }
        let user_data = rmp_serde::to_vec_named(user).context("Failed to serialize user")?;
        let identity_data =
            rmp_serde::to_vec_named(&identity).context("Failed to serialize identity")?;
        let key = identity.key();
        let same_provider = format!("{}:", identity.provider_type);

        let write_txn = self.db.begin_write()?;
        {
            let mut users = write_txn.open_table(USERS_TABLE)?;
            let mut index = write_txn.open_table(EMAIL_INDEX)?;
            let mut identities = write_txn.open_table(IDENTITIES_TABLE)?;
            let mut by_user = write_txn.open_table(IDENTITY_INDEX)?;

            let old: LocalUser = match users.get(user.id.as_str())? {
                Some(value) => rmp_serde::from_slice(value.value())
                    .with_context(|| format!("Failed to deserialize user '{}'", user.id))?,
                None => bail!("User '{}' not found", user.id),
            };

            let owner = match identities.get(key.as_str())? {
                Some(value) => Some(
                    rmp_serde::from_slice::<AuthIdentity>(value.value())
                        .context("Failed to deserialize identity")?
                        .user_id,
                ),
                None => None,
            };
            if owner.as_deref().is_some_and(|owner| owner != user.id) {
                bail!("identity '{}' is already linked to another user", key);
            }

            let old_email = email_key(&old.email);
            let new_email = email_key(&user.email);
            if old_email != new_email {
                if index.get(new_email.as_str())?.is_some() {
                    bail!("email '{}' already belongs to another user", user.email);
                }
                index.remove(old_email.as_str())?;
                index.insert(new_email.as_str(), user.id.as_str())?;
            }

            let linked = match by_user.get(user.id.as_str())? {
                Some(value) => decode_keys(value.value())?,
                None => Vec::new(),
            };
            let mut keys = Vec::with_capacity(linked.len() + 1);
            for existing in linked {
                if existing == key {
                    continue;
                }
                if existing.starts_with(&same_provider) {
                    identities.remove(existing.as_str())?;
                    debug!(user_id = %user.id, replaced = %existing, "Replaced linked identity");
                } else {
                    keys.push(existing);
                }
            }
            keys.push(key.clone());
            let keys_data =
                rmp_serde::to_vec_named(&keys).context("Failed to serialize identity index")?;

            users.insert(user.id.as_str(), user_data.as_slice())?;
            identities.insert(key.as_str(), identity_data.as_slice())?;
            by_user.insert(user.id.as_str(), keys_data.as_slice())?;
        }
        write_txn.commit()?;
        Ok(())
    }
}

/// In-memory user directory. Counts writes so callers can assert on them.
#[derive(Default)]
pub struct MemoryUserDirectory {
    users: RwLock<HashMap<String, LocalUser>>,
    identities: RwLock<HashMap<String, AuthIdentity>>,
    writes: AtomicUsize,
}

impl MemoryUserDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of write operations performed.
    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    pub fn user_count(&self) -> usize {
        self.users.read().map(|u| u.len()).unwrap_or(0)
    }
}

impl UserDirectory for MemoryUserDirectory {
    fn find_by_email(&self, email: &str) -> Result<Option<LocalUser>> {
        let key = email_key(email);
        let users = self.users.read().map_err(|_| anyhow!("User lock poisoned"))?;
        Ok(users.values().find(|u| email_key(&u.email) == key).cloned())
    }

    fn identities_for(&self, user_id: &str) -> Result<Vec<AuthIdentity>> {
        let identities = self
            .identities
            .read()
            .map_err(|_| anyhow!("Identity lock poisoned"))?;
        Ok(identities
            .values()
            .filter(|i| i.user_id == user_id)
            .cloned()
            .collect())
    }

    fn create_user(&self, user: LocalUser, identity: AuthIdentity) -> Result<LocalUser> {
        let mut users = self.users.write().map_err(|_| anyhow!("User lock poisoned"))?;
        let mut identities = self
            .identities
            .write()
            .map_err(|_| anyhow!("Identity lock poisoned"))?;

        let key = email_key(&user.email);
        if users.values().any(|u| email_key(&u.email) == key) {
            bail!("email '{}' already exists", user.email);
        }
        if identities.contains_key(&identity.key()) {
            bail!("identity '{}' is already linked", identity.key());
        }

        identities.insert(identity.key(), identity);
        users.insert(user.id.clone(), user.clone());
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(user)
    }

    fn update_and_link(&self, user: &LocalUser, identity: AuthIdentity) -> Result<()> {
        if identity.user_id != user.id {
            bail!("identity '{}' is not for user '{}'", identity.key(), user.id);
        }
        let mut users = self.users.write().map_err(|_| anyhow!("User lock poisoned"))?;
        let mut identities = self
            .identities
            .write()
            .map_err(|_| anyhow!("Identity lock poisoned"))?;

        if !users.contains_key(&user.id) {
            bail!("User '{}' not found", user.id);
        }
        let key = identity.key();
        if let Some(existing) = identities.get(&key) {
            if existing.user_id != user.id {
                bail!("identity '{}' is already linked to another user", key);
            }
        }

        identities.retain(|k, i| {
            *k == key || i.user_id != user.id || i.provider_type != identity.provider_type
        });
        identities.insert(key, identity);
        users.insert(user.id.clone(), user.clone());
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn test_directory() -> (RedbUserDirectory, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let path = dir.path().join("users.redb");
        let directory = RedbUserDirectory::open(path).unwrap();
        (directory, dir)
    }

    #[test]
    fn test_create_and_find_case_insensitive() {
        let (directory, _dir) = test_directory();
        let user = LocalUser::new("Ada@Example.com", "Ada", "Lovelace");
        let id = user.id.clone();
        directory
            .create_user(user, AuthIdentity::federated(&id, "ada@corp"))
            .unwrap();

        let found = directory.find_by_email("ada@example.COM").unwrap().unwrap();
        assert_eq!(found.id, id);
        assert!(directory.find_by_email("bob@example.com").unwrap().is_none());

        let identities = directory.identities_for(&id).unwrap();
        assert_eq!(identities.len(), 1);
        assert_eq!(identities[0].provider_id, "ada@corp");
    }

    #[test]
    fn test_duplicate_email_rejected() {
        let (directory, _dir) = test_directory();
        let first = LocalUser::new("ada@example.com", "Ada", "");
        let first_id = first.id.clone();
        directory
            .create_user(first, AuthIdentity::federated(&first_id, "ada-1"))
            .unwrap();

        let second = LocalUser::new("ADA@example.com", "Ada", "");
        let second_id = second.id.clone();
        let err = directory
            .create_user(second, AuthIdentity::federated(&second_id, "ada-2"))
            .unwrap_err();
        assert!(err.to_string().contains("already exists"));
    }

    #[test]
    fn test_update_moves_email_index() {
        let (directory, _dir) = test_directory();
        let user = LocalUser::new("old@example.com", "", "");
        let id = user.id.clone();
        let mut user = directory
            .create_user(user, AuthIdentity::federated(&id, "upn"))
            .unwrap();

        user.email = "new@example.com".to_string();
        user.first_name = "New".to_string();
        directory
            .update_and_link(&user, AuthIdentity::federated(&id, "upn"))
            .unwrap();

        assert!(directory.find_by_email("old@example.com").unwrap().is_none());
        let found = directory.find_by_email("new@example.com").unwrap().unwrap();
        assert_eq!(found.first_name, "New");
        assert_eq!(directory.identities_for(&id).unwrap().len(), 1);
    }

    #[test]
    fn test_update_and_link_replaces_saml_identity() {
        let (directory, _dir) = test_directory();
        let user = LocalUser::new("ada@example.com", "Ada", "Lovelace");
        let id = user.id.clone();
        let user = directory
            .create_user(user, AuthIdentity::federated(&id, "old-upn"))
            .unwrap();

        directory
            .update_and_link(&user, AuthIdentity::federated(&id, "new-upn"))
            .unwrap();

        let identities = directory.identities_for(&id).unwrap();
        assert_eq!(identities.len(), 1);
        assert_eq!(identities[0].provider_id, "new-upn");

        // The old key is free again.
        let other = LocalUser::new("bob@example.com", "Bob", "Builder");
        let other_id = other.id.clone();
        directory
            .create_user(other, AuthIdentity::federated(&other_id, "old-upn"))
            .unwrap();

        let missing = LocalUser::new("ghost@example.com", "", "");
        let missing_id = missing.id.clone();
        assert!(directory
            .update_and_link(&missing, AuthIdentity::federated(&missing_id, "ghost"))
            .is_err());
    }

    #[test]
    fn test_identity_conflict_writes_nothing() {
        let (directory, _dir) = test_directory();
        let a = LocalUser::new("a@example.com", "A", "A");
        let a_id = a.id.clone();
        directory.create_user(a, AuthIdentity::federated(&a_id, "shared")).unwrap();
        let b = LocalUser::new("b@example.com", "Bob", "B");
        let b_id = b.id.clone();
        let mut b = directory.create_user(b, AuthIdentity::federated(&b_id, "own")).unwrap();

        b.first_name = "Asserted".to_string();
        let err = directory
            .update_and_link(&b, AuthIdentity::federated(&b_id, "shared"))
            .unwrap_err();
        assert!(err.to_string().contains("another user"));

        let stored = directory.find_by_email("b@example.com").unwrap().unwrap();
        assert_eq!(stored.first_name, "Bob");
        let identities = directory.identities_for(&b_id).unwrap();
        assert_eq!(identities.len(), 1);
        assert_eq!(identities[0].provider_id, "own");
        assert_eq!(directory.identities_for(&a_id).unwrap()[0].provider_id, "shared");
    }

    #[test]
    fn test_persistence_across_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("users.redb");

        let id = {
            let directory = RedbUserDirectory::open(path.clone()).unwrap();
            let user = LocalUser::new("keep@example.com", "Kept", "User");
            let id = user.id.clone();
            directory
                .create_user(user, AuthIdentity::federated(&id, "keep"))
                .unwrap();
            id
        };

        let directory = RedbUserDirectory::open(path).unwrap();
        assert_eq!(
            directory.find_by_email("keep@example.com").unwrap().unwrap().id,
            id
        );
        assert_eq!(directory.identities_for(&id).unwrap().len(), 1);
    }

    #[test]
    fn test_memory_directory_counts_writes() {
        let directory = MemoryUserDirectory::new();
        let user = LocalUser::new("ada@example.com", "Ada", "Lovelace");
        let id = user.id.clone();
        directory
            .create_user(user, AuthIdentity::federated(&id, "ada"))
            .unwrap();
        assert_eq!(directory.writes(), 1);

        assert!(directory.find_by_email("ADA@example.com").unwrap().is_some());
        assert_eq!(directory.identities_for(&id).unwrap().len(), 1);
        assert_eq!(directory.writes(), 1);
        assert_eq!(directory.user_count(), 1);
    }

    #[test]
    fn test_memory_update_and_link_replaces_saml_identity() {
        let directory = MemoryUserDirectory::new();
        let user = LocalUser::new("ada@example.com", "Ada", "Lovelace");
        let id = user.id.clone();
        let user = directory
            .create_user(user, AuthIdentity::federated(&id, "old-upn"))
            .unwrap();

        directory
            .update_and_link(&user, AuthIdentity::federated(&id, "new-upn"))
            .unwrap();

        let identities = directory.identities_for(&id).unwrap();
        assert_eq!(identities.len(), 1);
        assert_eq!(identities[0].provider_id, "new-upn");
        assert_eq!(directory.writes(), 2);
    }
}
