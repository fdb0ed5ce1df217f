//! Durable session persistence.
//!
//! A session is written twice: once under granular keys (one per field) and
//! once as a combined blob under the legacy `authState` key, which older
//! consumers still read directly. Both are written in a single batch.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use keyring::Entry;
use parking_lot::Mutex;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use super::state::{SessionData, Tenant, User};

pub const ACCESS_TOKEN_KEY: &str = "auth_access_token";
pub const REFRESH_TOKEN_KEY: &str = "auth_refresh_token";
pub const USER_KEY: &str = "auth_user";
pub const TENANT_KEY: &str = "auth_client";
pub const LEGACY_KEY: &str = "authState";

const ALL_KEYS: [&str; 5] = [
    ACCESS_TOKEN_KEY,
    REFRESH_TOKEN_KEY,
    USER_KEY,
    TENANT_KEY,
    LEGACY_KEY,
];

/// Storage file name in the data directory
const STORAGE_FILE: &str = "storage.json";

/// Service name for keychain entries
const KEYRING_SERVICE: &str = "shopdesk";

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Storage I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to serialize session: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("Keychain error: {0}")]
    Keyring(#[from] keyring::Error),
}

/// String key/value storage that survives restarts.
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// Write every entry or none of them.
    fn set_many(&self, entries: &[(&str, String)]) -> Result<(), StoreError>;

    /// Remove the given keys. Missing keys are not an error.
    fn remove_many(&self, keys: &[&str]) -> Result<(), StoreError>;
}

impl<T: KeyValueStore + ?Sized> KeyValueStore for Arc<T> {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        (**self).get(key)
    }

    fn set_many(&self, entries: &[(&str, String)]) -> Result<(), StoreError> {
        (**self).set_many(entries)
    }

    fn remove_many(&self, keys: &[&str]) -> Result<(), StoreError> {
        (**self).remove_many(keys)
    }
}

/// In-process storage, used for ephemeral sessions and tests.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.entries.lock().get(key).cloned())
    }

    fn set_many(&self, entries: &[(&str, String)]) -> Result<(), StoreError> {
        let mut map = self.entries.lock();
        for (key, value) in entries {
            map.insert((*key).to_string(), value.clone());
        }
        Ok(())
    }

    fn remove_many(&self, keys: &[&str]) -> Result<(), StoreError> {
        let mut map = self.entries.lock();
        for key in keys {
            map.remove(*key);
        }
        Ok(())
    }
}

/// All keys in one JSON map file. Writes go to a temp file and are renamed
/// into place, so a batch lands whole or not at all.
pub struct FileStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl FileStore {
    pub fn new(data_dir: &Path) -> Self {
        Self {
            path: data_dir.join(STORAGE_FILE),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_map(&self) -> Result<HashMap<String, String>, StoreError> {
        if !self.path.exists() {
            return Ok(HashMap::new());
        }
        let contents = std::fs::read_to_string(&self.path)?;
        match serde_json::from_str(&contents) {
            Ok(map) => Ok(map),
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "Storage file is corrupt, starting empty");
                Ok(HashMap::new())
            }
        }
    }

    fn write_map(&self, map: &HashMap<String, String>) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(map)?;
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, contents)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let _guard = self.lock.lock();
        Ok(self.read_map()?.remove(key))
    }

    fn set_many(&self, entries: &[(&str, String)]) -> Result<(), StoreError> {
        let _guard = self.lock.lock();
        let mut map = self.read_map()?;
        for (key, value) in entries {
            map.insert((*key).to_string(), value.clone());
        }
        self.write_map(&map)
    }

    fn remove_many(&self, keys: &[&str]) -> Result<(), StoreError> {
        let _guard = self.lock.lock();
        if !self.path.exists() {
            return Ok(());
        }
        let mut map = self.read_map()?;
        for key in keys {
            map.remove(*key);
        }
        self.write_map(&map)
    }
}

/// OS keychain storage, one entry per key.
///
/// Entries are opened once per key and reused, so credential back ends that
/// keep values on the entry itself still read back what this store wrote.
/// The keychain has no transactions; a failed batch puts back whatever the
/// keys held before it started.
pub struct KeyringStore {
    service: String,
    entries: Mutex<HashMap<String, Entry>>,
}

impl Default for KeyringStore {
    fn default() -> Self {
        Self::new(KEYRING_SERVICE)
    }
}

impl KeyringStore {
    pub fn new(service: &str) -> Self {
        Self {
            service: service.to_string(),
            entries: Mutex::new(HashMap::new()),
        }
    }

    fn with_entry<T>(
        &self,
        key: &str,
        f: impl FnOnce(&Entry) -> keyring::Result<T>,
    ) -> Result<T, StoreError> {
        let mut entries = self.entries.lock();
        if !entries.contains_key(key) {
            entries.insert(key.to_string(), Entry::new(&self.service, key)?);
        }
        match entries.get(key) {
            Some(entry) => Ok(f(entry)?),
            None => Err(keyring::Error::NoEntry.into()),
        }
    }

    fn read(&self, key: &str) -> Result<Option<String>, StoreError> {
        self.with_entry(key, |entry| match entry.get_password() {
            Ok(value) => Ok(Some(value)),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(e),
        })
    }

    fn write(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.with_entry(key, |entry| entry.set_password(value))
    }

    fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.with_entry(key, |entry| match entry.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(e),
        })
    }
}

impl KeyValueStore for KeyringStore {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        self.read(key)
    }

    fn set_many(&self, entries: &[(&str, String)]) -> Result<(), StoreError> {
        write_batch(
            entries,
            |key| self.read(key),
            |key, value| self.write(key, value),
            |key| self.delete(key),
        )
    }

    fn remove_many(&self, keys: &[&str]) -> Result<(), StoreError> {
        for key in keys {
            self.delete(key)?;
        }
        Ok(())
    }
}

/// Write `entries` one key at a time. If a write fails, every key written so
/// far gets its previous value back, or is removed if it had none.
fn write_batch(
    entries: &[(&str, String)],
    read: impl Fn(&str) -> Result<Option<String>, StoreError>,
    write: impl Fn(&str, &str) -> Result<(), StoreError>,
    remove: impl Fn(&str) -> Result<(), StoreError>,
) -> Result<(), StoreError> {
    let previous = entries
        .iter()
        .map(|(key, _)| read(key))
        .collect::<Result<Vec<_>, _>>()?;

    for (i, (key, value)) in entries.iter().enumerate() {
        if let Err(e) = write(key, value) {
            warn!(key = %key, error = %e, "Batch write failed, restoring previous values");
            for ((written, _), old) in entries[..i].iter().zip(&previous) {
                let restored = match old {
                    Some(old) => write(written, old),
                    None => remove(written),
                };
                if let Err(e) = restored {
                    warn!(key = %written, error = %e, "Failed to restore key");
                }
            }
            return Err(e);
        }
    }
    Ok(())
}

/// Combined blob under the legacy key.
#[derive(Debug, Serialize, Deserialize)]
struct LegacyAuthState {
    access_token: String,
    refresh_token: String,
    user: User,
    client: Tenant,
    #[serde(rename = "isAuthenticated")]
    is_authenticated: bool,
}

/// Reads and writes sessions in both storage schemas.
pub struct SessionStore<S> {
    backend: S,
}

impl<S: KeyValueStore> SessionStore<S> {
    pub fn new(backend: S) -> Self {
        Self { backend }
    }

    pub fn backend(&self) -> &S {
        &self.backend
    }

    /// Persist a session under the granular keys and the legacy key.
    ///
    /// Everything is serialized before anything is written.
    pub fn save(&self, data: &SessionData) -> Result<(), StoreError> {
        let user = serde_json::to_string(&data.user)?;
        let tenant = serde_json::to_string(&data.tenant)?;
        let legacy = serde_json::to_string(&LegacyAuthState {
            access_token: data.access_token.clone(),
            refresh_token: data.refresh_token.clone(),
            user: data.user.clone(),
            client: data.tenant.clone(),
            is_authenticated: true,
        })?;

        self.backend.set_many(&[
            (ACCESS_TOKEN_KEY, data.access_token.clone()),
            (REFRESH_TOKEN_KEY, data.refresh_token.clone()),
            (USER_KEY, user),
            (TENANT_KEY, tenant),
            (LEGACY_KEY, legacy),
        ])?;
        debug!(user_id = %data.user.id, tenant = %data.tenant.slug, "Session saved");
        Ok(())
    }

    /// Load a session from the granular keys.
    ///
    /// Anything missing, unreadable or incomplete yields `None`.
    pub fn load(&self) -> Option<SessionData> {
        let access_token = self.read_raw(ACCESS_TOKEN_KEY)?;
        let refresh_token = self.read_raw(REFRESH_TOKEN_KEY)?;
        let user: User = self.read_json(USER_KEY)?;
        let tenant: Tenant = self.read_json(TENANT_KEY)?;

        let data = SessionData {
            access_token,
            refresh_token,
            user,
            tenant,
        };
        if data.is_complete() {
            Some(data)
        } else {
            debug!("Stored session is incomplete");
            None
        }
    }

    /// Remove every key of both schemas. Safe to call repeatedly.
    pub fn clear(&self) -> Result<(), StoreError> {
        self.backend.remove_many(&ALL_KEYS)?;
        debug!("Session storage cleared");
        Ok(())
    }

    fn read_raw(&self, key: &str) -> Option<String> {
        match self.backend.get(key) {
            Ok(Some(value)) if !value.is_empty() => Some(value),
            Ok(_) => None,
            Err(e) => {
                warn!(key, error = %e, "Failed to read session key");
                None
            }
        }
    }

    fn read_json<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let raw = self.read_raw(key)?;
        match serde_json::from_str(&raw) {
            Ok(value) => Some(value),
            Err(e) => {
                warn!(key, error = %e, "Stored session value is corrupt");
                None
            }
        }
    }
}
