//! Shop record persistence
//!
//! There is exactly one record, identified by [`SHOP_RECORD_ID`]. Writes are
//! last-write-wins: two admins editing at once silently overwrite each other.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{PoisonError, RwLock};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::auth::AuthState;
use crate::model::{ShopConfig, ShopPatch};

/// Identity of the singleton shop record
pub const SHOP_RECORD_ID: &str = "00000000-0000-0000-0000-000000000001";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("failed to access {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to decode shop record: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("shop record has unexpected id {0:?}")]
    ForeignRecord(String),

    #[error("store lock poisoned")]
    Poisoned,
}

impl<T> From<PoisonError<T>> for StoreError {
    fn from(_: PoisonError<T>) -> Self {
        StoreError::Poisoned
    }
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// Everything persisted for the shop
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreRecord {
    pub id: String,
    pub data: ShopConfig,
    pub auth: AuthState,
    pub updated_at: DateTime<Utc>,
}

impl StoreRecord {
    pub fn new(data: ShopConfig, auth: AuthState) -> Self {
        Self {
            id: SHOP_RECORD_ID.to_string(),
            data,
            auth,
            updated_at: Utc::now(),
        }
    }
}

/// Read/replace access to the shop record
pub trait ShopStore: Send + Sync {
    /// Snapshot of the whole record
    fn record(&self) -> Result<StoreRecord>;

    /// Swap the whole record's data and, when given, its credential
    fn restore(&self, data: ShopConfig, auth: Option<AuthState>) -> Result<StoreRecord>;

    fn set_auth(&self, auth: AuthState) -> Result<()>;

    /// Apply a partial or full replacement and return the stored result
    fn replace(&self, patch: ShopPatch) -> Result<ShopConfig>;

    fn read(&self) -> Result<ShopConfig> {
        Ok(self.record()?.data)
    }

    fn auth(&self) -> Result<AuthState> {
        Ok(self.record()?.auth)
    }
}

/// In-process store, lost on restart
#[derive(Debug)]
pub struct MemoryStore {
    record: RwLock<StoreRecord>,
}

impl MemoryStore {
    pub fn new(data: ShopConfig, auth: AuthState) -> Self {
        Self {
            record: RwLock::new(StoreRecord::new(data, auth)),
        }
    }
}

impl ShopStore for MemoryStore {
    fn record(&self) -> Result<StoreRecord> {
        Ok(self.record.read()?.clone())
    }

    fn restore(&self, data: ShopConfig, auth: Option<AuthState>) -> Result<StoreRecord> {
        let mut record = self.record.write()?;
        record.data = data;
        if let Some(auth) = auth {
            record.auth = auth;
        }
        record.updated_at = Utc::now();
        Ok(record.clone())
    }

    fn set_auth(&self, auth: AuthState) -> Result<()> {
        let mut record = self.record.write()?;
        record.auth = auth;
        record.updated_at = Utc::now();
        Ok(())
    }

    fn replace(&self, patch: ShopPatch) -> Result<ShopConfig> {
        let mut record = self.record.write()?;
        patch.apply_to(&mut record.data);
        record.updated_at = Utc::now();
        Ok(record.data.clone())
    }
}

/// Store backed by a single pretty-printed JSON file.
///
/// Every read goes back to the file, so edits made by another process (or by
/// hand) are seen on the next status evaluation. Writes start from the file's
/// current contents and go to a temporary sibling that is renamed over the
/// original. The last good record is kept in memory and served if the file
/// disappears.
#[derive(Debug)]
pub struct JsonFileStore {
    path: PathBuf,
    record: RwLock<StoreRecord>,
}

impl JsonFileStore {
    /// Open the file at `path`, creating it from `seed` when it does not exist yet
    pub fn open(path: impl Into<PathBuf>, seed: impl FnOnce() -> StoreRecord) -> Result<Self> {
        let path = path.into();

        let record = match load(&path)? {
            Some(record) => {
                debug!("Loaded shop record from {}", path.display());
                record
            }
            None => {
                let record = seed();
                write_atomically(&path, &record)?;
                info!("Created new shop record at {}", path.display());
                record
            }
        };

        Ok(Self {
            path,
            record: RwLock::new(record),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Mutate the current record and persist it; the cache only changes if the write succeeds
    fn update<T>(&self, f: impl FnOnce(&mut StoreRecord) -> T) -> Result<T> {
        let mut guard = self.record.write()?;
        let mut next = match load(&self.path)? {
            Some(record) => record,
            None => {
                warn!("{} is missing, rewriting it from memory", self.path.display());
                guard.clone()
            }
        };
        let out = f(&mut next);
        next.updated_at = Utc::now();
        write_atomically(&self.path, &next)?;
        *guard = next;
        Ok(out)
    }
}

impl ShopStore for JsonFileStore {
    fn record(&self) -> Result<StoreRecord> {
        let cached = self.record.read()?;
        Ok(load(&self.path)?.unwrap_or_else(|| cached.clone()))
    }

    fn restore(&self, data: ShopConfig, auth: Option<AuthState>) -> Result<StoreRecord> {
        self.update(|record| {
            record.data = data;
            if let Some(auth) = auth {
                record.auth = auth;
            }
        })?;
        self.record()
    }

    fn set_auth(&self, auth: AuthState) -> Result<()> {
        self.update(|record| record.auth = auth)
    }

    fn replace(&self, patch: ShopPatch) -> Result<ShopConfig> {
        self.update(|record| {
            patch.apply_to(&mut record.data);
            record.data.clone()
        })
    }
}

/// Read and check the record at `path`; None when the file does not exist
fn load(path: &Path) -> Result<Option<StoreRecord>> {
    let contents = match fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(source) => {
            return Err(StoreError::Io {
                path: path.to_path_buf(),
                source,
            })
        }
    };

    let record: StoreRecord = serde_json::from_str(&contents)?;
    if record.id != SHOP_RECORD_ID {
        return Err(StoreError::ForeignRecord(record.id));
    }
    Ok(Some(record))
}

fn write_atomically(path: &Path, record: &StoreRecord) -> Result<()> {
    let io_err = |source| StoreError::Io {
        path: path.to_path_buf(),
        source,
    };

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(io_err)?;
    }

    let json = serde_json::to_string_pretty(record)?;
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, json).map_err(io_err)?;
    fs::rename(&tmp, path).map_err(io_err)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ShopStatus;
    use tempfile::TempDir;

    fn seed() -> StoreRecord {
        StoreRecord::new(ShopConfig::default(), AuthState::from_password("secret1"))
    }

    fn closed_patch() -> ShopPatch {
        ShopPatch {
            manual_status: Some(ShopStatus::Closed),
            close_message: Some("Gone fishing".to_string()),
            ..ShopPatch::default()
        }
    }

    #[test]
    fn test_memory_store_replace_is_partial() {
        let store = MemoryStore::new(ShopConfig::default(), AuthState::from_password("secret1"));
        let updated = store.replace(closed_patch()).unwrap();

        assert_eq!(updated.manual_status, ShopStatus::Closed);
        assert_eq!(updated.products.len(), 3);
        assert_eq!(store.read().unwrap(), updated);
    }

    #[test]
    fn test_last_write_wins() {
        let store = MemoryStore::new(ShopConfig::default(), AuthState::from_password("secret1"));
        store.replace(closed_patch()).unwrap();
        store
            .replace(ShopPatch {
                manual_status: Some(ShopStatus::Open),
                ..ShopPatch::default()
            })
            .unwrap();

        let config = store.read().unwrap();
        assert_eq!(config.manual_status, ShopStatus::Open);
        assert_eq!(config.close_message, "Gone fishing");
    }

    #[test]
    fn test_file_store_creates_from_seed() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("shop.json");

        let store = JsonFileStore::open(&path, seed).unwrap();
        assert!(path.exists());
        assert_eq!(store.record().unwrap().id, SHOP_RECORD_ID);
        assert!(store.auth().unwrap().verify("secret1"));
    }

    #[test]
    fn test_file_store_persists_across_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("shop.json");

        {
            let store = JsonFileStore::open(&path, seed).unwrap();
            store.replace(closed_patch()).unwrap();
            store.set_auth(AuthState::from_password("changed1")).unwrap();
        }

        let reopened = JsonFileStore::open(&path, || panic!("must not reseed")).unwrap();
        let config = reopened.read().unwrap();
        assert_eq!(config.manual_status, ShopStatus::Closed);
        assert_eq!(config.close_message, "Gone fishing");
        assert!(reopened.auth().unwrap().verify("changed1"));
        assert!(!path.with_extension("json.tmp").exists());
    }

    #[test]
    fn test_file_store_sees_outside_edits() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("shop.json");
        let store = JsonFileStore::open(&path, seed).unwrap();

        // Another writer closes the shop behind this store's back
        let mut record: StoreRecord = serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        record.data.manual_status = ShopStatus::Closed;
        record.data.shop_name = "Edited Elsewhere".to_string();
        fs::write(&path, serde_json::to_string_pretty(&record).unwrap()).unwrap();

        let config = store.read().unwrap();
        assert_eq!(config.manual_status, ShopStatus::Closed);
        assert_eq!(config.shop_name, "Edited Elsewhere");

        // A partial write builds on the outside edit instead of the old cache
        store
            .replace(ShopPatch {
                close_message: Some("Back at six".to_string()),
                ..ShopPatch::default()
            })
            .unwrap();
        let config = store.read().unwrap();
        assert_eq!(config.shop_name, "Edited Elsewhere");
        assert_eq!(config.close_message, "Back at six");
    }

    #[test]
    fn test_file_store_falls_back_when_file_removed() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("shop.json");
        let store = JsonFileStore::open(&path, seed).unwrap();
        store.replace(closed_patch()).unwrap();

        fs::remove_file(&path).unwrap();
        assert_eq!(store.read().unwrap().close_message, "Gone fishing");

        store.set_auth(AuthState::from_password("changed1")).unwrap();
        assert!(path.exists());
        assert_eq!(store.read().unwrap().close_message, "Gone fishing");
    }

    #[test]
    fn test_file_store_rejects_foreign_record() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("shop.json");
        let mut record = seed();
        record.id = "someone-else".to_string();
        fs::write(&path, serde_json::to_string(&record).unwrap()).unwrap();

        match JsonFileStore::open(&path, seed) {
            Err(StoreError::ForeignRecord(id)) => assert_eq!(id, "someone-else"),
            other => panic!("expected ForeignRecord, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_file_store_rejects_garbage() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("shop.json");
        fs::write(&path, "{not json").unwrap();

        assert!(matches!(JsonFileStore::open(&path, seed), Err(StoreError::Decode(_))));
    }

    #[test]
    fn test_restore_keeps_auth_when_absent() {
        let store = MemoryStore::new(ShopConfig::default(), AuthState::from_password("secret1"));
        let record = store.restore(ShopConfig::with_name("Imported"), None).unwrap();
        assert_eq!(record.data.shop_name, "Imported");
        assert!(record.auth.verify("secret1"));

        let record = store
            .restore(ShopConfig::default(), Some(AuthState::from_password("another1")))
            .unwrap();
        assert!(record.auth.verify("another1"));
    }
}
