mod config;
mod file;
mod memory;
mod tables;

pub use config::{
    global_config_path, load_config, load_config_from, project_config_path, read_config_map,
    set_config_value,
};
pub use file::JsonFileStore;
pub use memory::MemoryStore;
pub use tables::Tables;

use fs2::FileExt;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use warden_core::StoreError;

/// Return the per-user store root.
/// `$WARDEN_HOME` wins; otherwise `<data_dir>/warden` (falls back to `~/.warden`).
pub fn store_root() -> PathBuf {
    if let Some(home) = std::env::var_os("WARDEN_HOME") {
        return PathBuf::from(home);
    }
    if let Some(data_dir) = dirs::data_dir() {
        data_dir.join("warden")
    } else if let Some(home) = dirs::home_dir() {
        home.join(".warden")
    } else {
        PathBuf::from(".warden-store")
    }
}

/// `store_root/transcripts/<session_id>.jsonl`
pub fn transcript_path(session_id: &str) -> PathBuf {
    store_root()
        .join("transcripts")
        .join(format!("{session_id}.jsonl"))
}

/// `store_root/events.jsonl`
pub fn event_log_path() -> PathBuf {
    store_root().join("events.jsonl")
}

fn io_err(path: &Path, source: std::io::Error) -> StoreError {
    StoreError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// Atomic write: write to temp file in same dir, then rename.
pub fn write_atomic(path: &Path, data: &[u8]) -> Result<(), StoreError> {
    let parent = path.parent().ok_or_else(|| {
        io_err(
            path,
            std::io::Error::new(std::io::ErrorKind::InvalidInput, "no parent dir"),
        )
    })?;
    fs::create_dir_all(parent).map_err(|e| io_err(parent, e))?;
    let mut tmp = tempfile::NamedTempFile::new_in(parent).map_err(|e| io_err(parent, e))?;
    tmp.write_all(data).map_err(|e| io_err(path, e))?;
    tmp.flush().map_err(|e| io_err(path, e))?;
    tmp.persist(path).map_err(|e| io_err(path, e.error))?;
    Ok(())
}

/// File-based exclusive lock guard.
pub struct LockGuard {
    _file: fs::File,
}

/// Acquire an exclusive file lock. Creates the lock file if needed.
pub fn lock_file(path: &Path) -> Result<LockGuard, StoreError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| io_err(parent, e))?;
    }
    let file = fs::OpenOptions::new()
        .create(true)
        .truncate(false)
        .write(true)
        .open(path)
        .map_err(|e| io_err(path, e))?;
    file.lock_exclusive()
        .map_err(|e| StoreError::Lock(format!("{}: {e}", path.display())))?;
    Ok(LockGuard { _file: file })
}
