//! JSON document store with atomic replace and rotating backups.
//!
//! Layout:
//! ```text
//! data/
//! ├── guard_state.json
//! └── backups/
//!     ├── guard_state-20240306T091500.123456.json
//!     └── guard_state-20240306T093000.456789.json
//! ```
//! Save checks that the encoded document reads back, writes
//! `guard_state.json.tmp` and fsyncs it, copies the current document to a
//! timestamped backup, renames the temp file over the document and fsyncs
//! the directory so the rename itself survives a crash.

use crate::error::StoreError;
use crate::state::{GuardState, Retention, STATE_VERSION};
use crate::PersistenceStore;
use campaign_core::config::StorageConfig;
use chrono::Utc;
use parking_lot::Mutex;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

const BACKUP_PREFIX: &str = "guard_state-";

pub struct JsonFileStore {
    path: PathBuf,
    backup_dir: PathBuf,
    backup_retention: usize,
    retention: Retention,
    // Serializes writers so two saves never interleave on the temp file.
    write_lock: Mutex<()>,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>, backup_dir: Option<PathBuf>, backup_retention: usize) -> Self {
        let path = path.into();
        let backup_dir = backup_dir.unwrap_or_else(|| {
            path.parent()
                .map(|p| p.join("backups"))
                .unwrap_or_else(|| PathBuf::from("backups"))
        });
        Self {
            path,
            backup_dir,
            backup_retention,
            retention: Retention::default(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn from_config(config: &StorageConfig) -> Self {
        let mut store = Self::new(
            &config.state_path,
            config.backup_dir.as_ref().map(PathBuf::from),
            config.backup_retention,
        );
        store.retention = Retention::from(config);
        store
    }

    pub fn with_retention(mut self, retention: Retention) -> Self {
        self.retention = retention;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn backup_dir(&self) -> &Path {
        &self.backup_dir
    }

    fn tmp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "guard_state.json".into());
        name.push(".tmp");
        self.path.with_file_name(name)
    }

    fn sync_parent(&self) {
        let parent = match self.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        };
        if let Ok(dir) = fs::File::open(parent) {
            if let Err(e) = dir.sync_all() {
                debug!(dir = %parent.display(), error = %e, "directory fsync failed");
            }
        }
    }

    fn read(path: &Path) -> Result<GuardState, StoreError> {
        let raw = fs::read_to_string(path)?;
        let state: GuardState = serde_json::from_str(&raw)?;
        if state.version > STATE_VERSION {
            return Err(StoreError::UnsupportedVersion {
                found: state.version,
                supported: STATE_VERSION,
            });
        }
        Ok(state)
    }

    /// Backup files, oldest first.
    pub fn backups(&self) -> Vec<PathBuf> {
        let Ok(entries) = fs::read_dir(&self.backup_dir) else {
            return Vec::new();
        };
        let mut files: Vec<PathBuf> = entries
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| {
                p.file_name()
                    .and_then(|n| n.to_str())
                    .map(|n| n.starts_with(BACKUP_PREFIX) && n.ends_with(".json"))
                    .unwrap_or(false)
            })
            .collect();
        files.sort();
        files
    }

    fn backup_current(&self) -> Result<(), StoreError> {
        if !self.path.exists() {
            return Ok(());
        }
        fs::create_dir_all(&self.backup_dir)?;
        let stamp = Utc::now().format("%Y%m%dT%H%M%S%.6f");
        let target = self.backup_dir.join(format!("{BACKUP_PREFIX}{stamp}.json"));
        fs::copy(&self.path, &target)?;
        debug!(backup = %target.display(), "state backup written");
        Ok(())
    }

    fn prune_backups(&self) {
        let backups = self.backups();
        if backups.len() <= self.backup_retention {
            return;
        }
        let excess = backups.len() - self.backup_retention;
        for old in backups.into_iter().take(excess) {
            if let Err(e) = fs::remove_file(&old) {
                warn!(backup = %old.display(), error = %e, "failed to prune backup");
            }
        }
    }
}

impl PersistenceStore for JsonFileStore {
    fn load(&self) -> GuardState {
        if !self.path.exists() {
            info!(path = %self.path.display(), "no saved state, starting fresh");
            return GuardState::new();
        }

        match Self::read(&self.path) {
            Ok(state) => {
                info!(
                    path = %self.path.display(),
                    cycles = state.cycle_count,
                    units = state.unit_states.len(),
                    "state loaded"
                );
                return state;
            }
            Err(e) => warn!(path = %self.path.display(), error = %e, "state unreadable, trying backups"),
        }

        for backup in self.backups().into_iter().rev() {
            match Self::read(&backup) {
                Ok(state) => {
                    warn!(backup = %backup.display(), "recovered state from backup");
                    return state;
                }
                Err(e) => debug!(backup = %backup.display(), error = %e, "backup unreadable"),
            }
        }

        warn!("no readable state or backup, starting fresh");
        GuardState::new()
    }

    fn save(&self, state: &mut GuardState) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock();
        state.trim(&self.retention);
        state.version = STATE_VERSION;

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }

        let json = serde_json::to_vec_pretty(state)?;
        // Non-finite floats encode as null and would fail the next load.
        serde_json::from_slice::<GuardState>(&json).map_err(StoreError::Unreadable)?;

        let tmp = self.tmp_path();
        {
            let mut file = fs::File::create(&tmp)?;
            file.write_all(&json)?;
            file.sync_all()?;
        }

        self.backup_current()?;
        fs::rename(&tmp, &self.path)?;
        self.sync_parent();
        self.prune_backups();

        debug!(path = %self.path.display(), bytes = json.len(), "state saved");
        Ok(())
    }
}
