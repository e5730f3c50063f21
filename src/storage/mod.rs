//! # Storage Module - the durable state record
//!
//! All postbox processes coordinate through one JSON file holding a
//! [`DeviceState`]. This module is the serialization boundary for it: it applies no
//! business rules, it only guarantees that
//!
//! - a reader never observes a partially written record (writes go to a temp file in
//!   the same directory and are renamed over the destination),
//! - a read of a missing file yields the zero value,
//! - a read-modify-write ([`StateStore::update`]) from one process cannot drop a
//!   concurrent change made by another, because it runs under an exclusive lock on a
//!   sidecar `<state>.lock` file.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use postbox::storage::StateStore;
//!
//! fn main() -> anyhow::Result<()> {
//!     let store = StateStore::open("/var/lib/postbox/state.json")?;
//!     let state = store.read();
//!     println!("pending: {}", state.message_pending);
//!
//!     store.update(|s| s.nightlight_mode = true)?;
//!     Ok(())
//! }
//! ```
//!
//! ## Error Handling
//!
//! [`StoreError::Unavailable`] means the medium could not be read or written. Readers
//! going through [`StateStore::read`] log it and carry on with the zero value; writers
//! get it back and must retry or abandon their transition.

use crate::state::DeviceState;
use fs2::FileExt;
use log::{debug, error, warn};
use std::fs::{self, File, OpenOptions};
use std::io::{self, ErrorKind, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("state store {path} unavailable: {source}")]
    Unavailable {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("state file {path} is corrupt: {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

impl StoreError {
    fn unavailable(path: &Path, source: io::Error) -> Self {
        StoreError::Unavailable {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Handle on the state file. Cheap to clone; holds no open descriptors.
#[derive(Debug, Clone)]
pub struct StateStore {
    path: PathBuf,
    lock_path: PathBuf,
}

impl StateStore {
    /// Open the store at `path`, creating its parent directory if needed. The file
    /// itself is created by the first write.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            fs::create_dir_all(dir).map_err(|e| StoreError::unavailable(dir, e))?;
        }
        let mut lock_name = path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "state.json".into());
        lock_name.push(".lock");
        let lock_path = path.with_file_name(lock_name);
        Ok(StateStore { path, lock_path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Last fully written record, or the zero value. Never fails: errors are logged
    /// and read as "no state".
    pub fn read(&self) -> DeviceState {
        match self.try_read() {
            Ok(state) => state,
            Err(e) => {
                error!("{}; treating as empty state", e);
                DeviceState::default()
            }
        }
    }

    /// Like [`read`](Self::read) but reports why the record could not be loaded.
    pub fn try_read(&self) -> Result<DeviceState, StoreError> {
        let content = match fs::read_to_string(&self.path) {
            Ok(c) => c,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(DeviceState::default()),
            Err(e) => return Err(StoreError::unavailable(&self.path, e)),
        };
        if content.trim().is_empty() {
            return Ok(DeviceState::default());
        }
        serde_json::from_str(&content).map_err(|source| StoreError::Corrupt {
            path: self.path.clone(),
            source,
        })
    }

    /// Replace the whole record.
    pub fn write(&self, state: &DeviceState) -> Result<(), StoreError> {
        let lock = self.lock()?;
        let result = self.write_unlocked(state);
        drop(lock);
        result
    }

    /// Read-modify-write under the store lock. The closure sees the current record
    /// and its return value is passed back; the record is only rewritten when the
    /// closure changed it.
    pub fn update<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        F: FnOnce(&mut DeviceState) -> T,
    {
        let lock = self.lock()?;
        let current = match self.try_read() {
            Ok(state) => state,
            Err(StoreError::Corrupt { path, source }) => {
                error!(
                    "state file {} is corrupt ({}); rebuilding from empty state",
                    path.display(),
                    source
                );
                DeviceState::default()
            }
            Err(e) => return Err(e),
        };
        let mut next = current.clone();
        let out = f(&mut next);
        if next != current {
            self.write_unlocked(&next)?;
        }
        drop(lock);
        Ok(out)
    }

    /// Explicit operator reset back to the first-boot record.
    pub fn reset(&self) -> Result<(), StoreError> {
        self.write(&DeviceState::default())
    }

    fn lock(&self) -> Result<File, StoreError> {
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .open(&self.lock_path)
            .map_err(|e| StoreError::unavailable(&self.lock_path, e))?;
        file.lock_exclusive()
            .map_err(|e| StoreError::unavailable(&self.lock_path, e))?;
        Ok(file)
    }

    fn write_unlocked(&self, state: &DeviceState) -> Result<(), StoreError> {
        let content = serde_json::to_string_pretty(state).map_err(|e| {
            StoreError::unavailable(&self.path, io::Error::new(ErrorKind::InvalidData, e))
        })?;
        write_atomic(&self.path, content.as_bytes())
            .map_err(|e| StoreError::unavailable(&self.path, e))?;
        debug!("state written: {}", crate::logutil::escape_log(&content));
        Ok(())
    }
}

/// Write `content` to a unique temp file beside `path`, fsync it and rename it over
/// `path`. The directory is fsynced best-effort afterwards.
pub fn write_atomic(path: &Path, content: &[u8]) -> io::Result<()> {
    let dir = match path.parent() {
        Some(d) if !d.as_os_str().is_empty() => d,
        _ => Path::new("."),
    };
    let base = path
        .file_name()
        .and_then(|s| s.to_str())
        .unwrap_or("state.json");
    let mut counter = 0u32;
    let tmp_path = loop {
        let candidate = dir.join(format!(".{}.tmp-{}-{}", base, std::process::id(), counter));
        match OpenOptions::new().write(true).create_new(true).open(&candidate) {
            Ok(mut tmp) => {
                if let Err(e) = tmp.write_all(content).and_then(|_| tmp.flush()) {
                    let _ = fs::remove_file(&candidate);
                    return Err(e);
                }
                if let Err(e) = tmp.sync_all() {
                    warn!("fsync of {} failed: {}", candidate.display(), e);
                }
                break candidate;
            }
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                counter = counter.saturating_add(1);
            }
            Err(e) => return Err(e),
        }
    };

    if let Err(e) = fs::rename(&tmp_path, path) {
        let _ = fs::remove_file(&tmp_path);
        return Err(e);
    }
    if let Ok(dir_file) = File::open(dir) {
        let _ = dir_file.sync_all();
    }
    Ok(())
}
