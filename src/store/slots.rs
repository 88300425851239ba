//! Slot persistence
//!
//! Three named slots under the state directory, each holding one serialized
//! `ApplicationState`:
//!
//! - `primary.json` - the authoritative record
//! - `primary_backup.json` - written before every primary write
//! - `secondary_backup.json` (+ `.meta.json`) - the scheduler's second line
//!   of redundancy, staleness-checked on restore
//!
//! Every slot write is atomic: write to `<slot>.tmp`, fsync the file, rename
//! over the slot, fsync the directory. A crash at any point leaves either the
//! old record or the new one, never a torn file.
//!
//! The commit path writes the backup slot first and makes it durable before
//! touching primary, so the backup is never older than the previous
//! successfully committed primary and the two slots cannot both be lost to
//! one failed write.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use fs2::FileExt;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use crate::domain::{ApplicationState, SCHEMA_VERSION, now_ms};

/// Errors from slot I/O
#[derive(Debug, Error)]
pub enum SlotError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("schema version mismatch: expected {expected}, got {got}")]
    SchemaMismatch { expected: u32, got: u32 },

    #[error("state directory already locked by another process")]
    Locked,
}

pub type SlotResult<T> = Result<T, SlotError>;

/// Which slot a load was ultimately served from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadedFrom {
    Primary,
    Backup,
    Default,
}

/// Sidecar record for the secondary slot: when the backup was taken
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecondaryMeta {
    pub written_at_ms: i64,
}

/// Owns the state directory and its slots
///
/// Construction takes an exclusive advisory lock on the directory; a second
/// process opening the same directory fails fast instead of interleaving
/// writes.
pub struct SlotStore {
    dir: PathBuf,
    _lock: File,
}

impl SlotStore {
    /// Open (creating if needed) and lock the state directory
    pub fn open(dir: impl AsRef<Path>) -> SlotResult<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;

        let lock = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(dir.join(".lock"))?;
        lock.try_lock_exclusive().map_err(|_| SlotError::Locked)?;

        debug!(dir = %dir.display(), "slot store opened");
        Ok(Self { dir, _lock: lock })
    }

    pub fn primary_path(&self) -> PathBuf {
        self.dir.join("primary.json")
    }

    pub fn backup_path(&self) -> PathBuf {
        self.dir.join("primary_backup.json")
    }

    pub fn secondary_path(&self) -> PathBuf {
        self.dir.join("secondary_backup.json")
    }

    fn secondary_meta_path(&self) -> PathBuf {
        self.dir.join("secondary_backup.meta.json")
    }

    /// Commit a snapshot durably: backup slot first, then primary
    pub fn commit(&self, state: &ApplicationState) -> SlotResult<()> {
        self.write_slot(&self.backup_path(), state)?;
        self.write_slot(&self.primary_path(), state)?;
        debug!(last_modified = state.last_modified_ms, "committed to both slots");
        Ok(())
    }

    /// Write the backup slot only (explicit out-of-band backup)
    pub fn write_backup(&self, state: &ApplicationState) -> SlotResult<()> {
        self.write_slot(&self.backup_path(), state)
    }

    /// Write the secondary generation and its timestamp sidecar
    pub fn write_secondary(&self, state: &ApplicationState) -> SlotResult<()> {
        self.write_slot(&self.secondary_path(), state)?;
        let meta = SecondaryMeta { written_at_ms: now_ms() };
        let bytes = serde_json::to_vec_pretty(&meta)?;
        write_atomic(&self.secondary_meta_path(), &bytes)?;
        Ok(())
    }

    /// Load the primary slot, falling back to backup, falling back to the
    /// default state. A successful fallback is re-persisted to primary so the
    /// corruption heals on the spot.
    pub fn load_or_default(&self) -> (ApplicationState, LoadedFrom) {
        match self.read_slot(&self.primary_path()) {
            Ok(state) => (state, LoadedFrom::Primary),
            Err(primary_err) => {
                if is_missing(&primary_err) {
                    debug!("primary slot missing, trying backup");
                } else {
                    warn!(error = %primary_err, "primary slot unreadable, trying backup");
                }
                match self.read_slot(&self.backup_path()) {
                    Ok(state) => {
                        if let Err(e) = self.write_slot(&self.primary_path(), &state) {
                            warn!(error = %e, "failed to re-persist backup to primary");
                        }
                        (state, LoadedFrom::Backup)
                    }
                    Err(backup_err) => {
                        if is_missing(&backup_err) {
                            debug!("backup slot missing, using defaults");
                        } else {
                            warn!(error = %backup_err, "backup slot unreadable, using defaults");
                        }
                        (ApplicationState::default(), LoadedFrom::Default)
                    }
                }
            }
        }
    }

    /// Read the backup slot
    pub fn read_backup(&self) -> SlotResult<ApplicationState> {
        self.read_slot(&self.backup_path())
    }

    /// Read the secondary slot together with its write time, `Ok(None)` when
    /// no secondary backup has been taken yet
    pub fn read_secondary(&self) -> SlotResult<Option<(ApplicationState, i64)>> {
        let state = match self.read_slot(&self.secondary_path()) {
            Ok(state) => state,
            Err(SlotError::Io(e)) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e),
        };
        let meta: SecondaryMeta = match fs::read(self.secondary_meta_path()) {
            Ok(bytes) => serde_json::from_slice(&bytes)?,
            // Missing sidecar: treat the backup as taken at epoch, i.e. stale
            Err(e) if e.kind() == io::ErrorKind::NotFound => SecondaryMeta { written_at_ms: 0 },
            Err(e) => return Err(e.into()),
        };
        Ok(Some((state, meta.written_at_ms)))
    }

    fn write_slot(&self, path: &Path, state: &ApplicationState) -> SlotResult<()> {
        let bytes = serde_json::to_vec_pretty(state)?;
        write_atomic(path, &bytes)
    }

    fn read_slot(&self, path: &Path) -> SlotResult<ApplicationState> {
        let bytes = fs::read(path)?;
        let state: ApplicationState = serde_json::from_slice(&bytes)?;
        if state.schema_version != SCHEMA_VERSION {
            return Err(SlotError::SchemaMismatch {
                expected: SCHEMA_VERSION,
                got: state.schema_version,
            });
        }
        Ok(state)
    }
}

fn is_missing(e: &SlotError) -> bool {
    matches!(e, SlotError::Io(io_err) if io_err.kind() == io::ErrorKind::NotFound)
}

/// Write-to-temp-then-rename with file and directory fsync
fn write_atomic(path: &Path, bytes: &[u8]) -> SlotResult<()> {
    let tmp_path = path.with_extension("json.tmp");
    {
        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&tmp_path)?;
        file.write_all(bytes)?;
        file.sync_all()?;
    }
    fs::rename(&tmp_path, path)?;
    if let Some(parent) = path.parent() {
        fsync_dir(parent)?;
    }
    Ok(())
}

/// Directory fsync so the rename itself survives power loss
fn fsync_dir(dir: &Path) -> io::Result<()> {
    let dir = OpenOptions::new().read(true).open(dir)?;
    dir.sync_all()
}
