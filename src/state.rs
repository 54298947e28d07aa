//! Durable State
//!
//! The three tables (usage records, monthly write counters, ledger entries)
//! are saved together as one JSON document. Saves go to a uniquely named
//! temp file next to the target and are then renamed over it.
//!
//! Processes sharing a state file serialise on a `<state>.lock` advisory
//! lock held across load, mutation and save.

use fs2::FileExt;
use serde::{Deserialize, Serialize};
use std::ffi::OsString;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{GateError, Result};
use crate::governor::{MonthlyWriteCounter, MonthlyWriteGovernor};
use crate::publish::{LedgerEntry, PublishLedger};
use crate::quota::{UsageRecord, UsageStore};

const STATE_VERSION: u32 = 1;

fn default_version() -> u32 {
    STATE_VERSION
}

/// Persisted form of all gate state
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateSnapshot {
    #[serde(default = "default_version")]
    pub version: u32,

    #[serde(default)]
    pub usage: Vec<UsageRecord>,

    #[serde(default)]
    pub months: Vec<MonthlyWriteCounter>,

    #[serde(default)]
    pub ledger: Vec<LedgerEntry>,
}

impl Default for StateSnapshot {
    fn default() -> Self {
        Self {
            version: STATE_VERSION,
            usage: Vec::new(),
            months: Vec::new(),
            ledger: Vec::new(),
        }
    }
}

impl StateSnapshot {
    /// Capture the current contents of the live stores
    pub fn capture(
        usage: &UsageStore,
        governor: &MonthlyWriteGovernor,
        ledger: &PublishLedger,
    ) -> Self {
        Self {
            version: STATE_VERSION,
            usage: usage.snapshot(),
            months: governor.snapshot(),
            ledger: ledger.snapshot(),
        }
    }

    /// Load the snapshot at `path`
    ///
    /// A missing file is an empty state; an unreadable or corrupt one is a
    /// `Storage` error.
    pub async fn load(path: &Path) -> Result<Self> {
        let bytes = match tokio::fs::read(path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("No state file at {:?}, starting empty", path);
                return Ok(Self::default());
            }
            Err(e) => {
                return Err(GateError::Storage(format!(
                    "failed to read state from {}: {}",
                    path.display(),
                    e
                )))
            }
        };

        let snapshot: Self = serde_json::from_slice(&bytes).map_err(|e| {
            GateError::Storage(format!("corrupt state file {}: {}", path.display(), e))
        })?;
        if snapshot.version > STATE_VERSION {
            return Err(GateError::Storage(format!(
                "state file {} has unsupported version {}",
                path.display(),
                snapshot.version
            )));
        }

        info!(
            "Loaded state from {:?}: {} usage records, {} months, {} ledger entries",
            path,
            snapshot.usage.len(),
            snapshot.months.len(),
            snapshot.ledger.len()
        );
        Ok(snapshot)
    }

    /// Write the snapshot to `path`, replacing any previous file
    pub async fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                GateError::Storage(format!(
                    "failed to create state directory {}: {}",
                    parent.display(),
                    e
                ))
            })?;
        }

        let payload = serde_json::to_vec_pretty(self)?;
        let temp_path = path.with_extension(format!("{}.tmp", Uuid::new_v4().simple()));
        tokio::fs::write(&temp_path, payload).await.map_err(|e| {
            GateError::Storage(format!("failed to write state payload: {}", e))
        })?;

        if let Err(e) = tokio::fs::rename(&temp_path, path).await {
            let _ = tokio::fs::remove_file(&temp_path).await;
            return Err(GateError::Storage(format!(
                "failed to finalize state file {}: {}",
                path.display(),
                e
            )));
        }

        debug!("Saved state to {:?}", path);
        Ok(())
    }

    /// Load this snapshot into live stores, replacing their contents
    pub fn restore_into(
        self,
        usage: &UsageStore,
        governor: &MonthlyWriteGovernor,
        ledger: &PublishLedger,
    ) {
        usage.restore(self.usage);
        governor.restore(self.months);
        ledger.restore(self.ledger);
    }
}

/// Exclusive lock on a state file, released on drop
#[derive(Debug)]
pub struct StateLock {
    file: File,
    path: PathBuf,
}

impl StateLock {
    /// Lock file guarding `state_path`
    pub fn lock_path(state_path: &Path) -> PathBuf {
        let mut name = OsString::from(state_path.as_os_str());
        name.push(".lock");
        PathBuf::from(name)
    }

    fn open(path: &Path) -> Result<File> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| {
                GateError::Storage(format!(
                    "failed to create state directory {}: {}",
                    parent.display(),
                    e
                ))
            })?;
        }
        OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(path)
            .map_err(|e| {
                GateError::Storage(format!("failed to open state lock {}: {}", path.display(), e))
            })
    }

    /// Wait until the lock on `state_path` is ours
    pub async fn acquire(state_path: &Path) -> Result<Self> {
        let path = Self::lock_path(state_path);
        tokio::task::spawn_blocking(move || {
            let file = Self::open(&path)?;
            FileExt::lock_exclusive(&file).map_err(|e| {
                GateError::Storage(format!("failed to lock state {}: {}", path.display(), e))
            })?;
            debug!("Holding state lock {:?}", path);
            Ok(Self { file, path })
        })
        .await
        .map_err(|e| GateError::Storage(format!("state lock task failed: {}", e)))?
    }

    /// Take the lock if nobody holds it, `None` otherwise
    pub fn try_acquire(state_path: &Path) -> Result<Option<Self>> {
        let path = Self::lock_path(state_path);
        let file = Self::open(&path)?;
        match FileExt::try_lock_exclusive(&file) {
            Ok(()) => Ok(Some(Self { file, path })),
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => Ok(None),
            Err(e) => Err(GateError::Storage(format!(
                "failed to lock state {}: {}",
                path.display(),
                e
            ))),
        }
    }
}

impl Drop for StateLock {
    fn drop(&mut self) {
        if let Err(e) = FileExt::unlock(&self.file) {
            warn!("Failed to release state lock {:?}: {}", self.path, e);
        }
    }
}
