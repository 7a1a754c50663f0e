use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;
use warden_core::{StoreError, StoreResult};

use crate::tables::{impl_repositories, TableAccess, Tables};
use crate::{lock_file, store_root, write_atomic};

/// All records in one JSON document; every write is a locked
/// load-modify-replace so several `warden` processes can share it.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    path: PathBuf,
    lock_path: PathBuf,
}

impl JsonFileStore {
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let lock_path = path.with_extension("lock");
        Self { path, lock_path }
    }

    /// `store_root/store.json`
    pub fn default_location() -> Self {
        Self::open(store_root().join("store.json"))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load(&self) -> StoreResult<Tables> {
        match fs::read_to_string(&self.path) {
            Ok(content) if content.trim().is_empty() => Ok(Tables::default()),
            Ok(content) => Ok(serde_json::from_str(&content)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Tables::default()),
            Err(e) => Err(StoreError::Io {
                path: self.path.clone(),
                source: e,
            }),
        }
    }
}

impl TableAccess for JsonFileStore {
    fn read<R>(&self, f: impl FnOnce(&Tables) -> R) -> StoreResult<R> {
        Ok(f(&self.load()?))
    }

    fn write<R>(&self, f: impl FnOnce(&mut Tables) -> R) -> StoreResult<R> {
        let _lock = lock_file(&self.lock_path)?;
        let mut tables = self.load()?;
        let out = f(&mut tables);
        let json = serde_json::to_vec_pretty(&tables)?;
        write_atomic(&self.path, &json)?;
        debug!(path = %self.path.display(), bytes = json.len(), "store written");
        Ok(out)
    }
}

impl_repositories!(JsonFileStore);
