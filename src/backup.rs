//! BackupScheduler - periodic secondary backups and ordered restore
//!
//! A second line of redundancy beyond the store's own primary/backup pair.
//! The scheduler watches the committed-state stream and writes a secondary
//! generation whenever the last one is old enough; `restore_state` walks the
//! ordered chain current -> secondary backup -> partial recovery -> defaults.

use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::StoreConfig;
use crate::domain::{ApplicationState, now_ms};
use crate::store::{SlotStore, StateStore, StoreError};
use crate::validator;

/// Where `restore_state` ended up sourcing the state from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestoreSource {
    /// Current state already validates; nothing was written
    Current,
    /// The secondary backup was fresh and valid, and was adopted
    Backup,
    /// The partial-recovery transform of the current state was adopted
    Partial,
    /// Defaults (identity preserved) were adopted
    Default,
}

impl std::fmt::Display for RestoreSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Current => write!(f, "current"),
            Self::Backup => write!(f, "backup"),
            Self::Partial => write!(f, "partial"),
            Self::Default => write!(f, "default"),
        }
    }
}

/// Ordered restore against the current state.
///
/// Returns the state to adopt (`None` when the current state stands) and the
/// source tier. Runs inside the store actor so it cannot interleave with
/// updates. Identity is preserved through every tier.
pub(crate) fn run_restore(
    current: &ApplicationState,
    slots: &SlotStore,
    stale_after_ms: i64,
) -> (Option<ApplicationState>, RestoreSource) {
    if validator::validate(current).is_valid() {
        debug!("restore: current state validates, keeping it");
        return (None, RestoreSource::Current);
    }
    let now = now_ms();

    match slots.read_secondary() {
        Ok(Some((backup, written_at_ms))) => {
            if now - written_at_ms <= stale_after_ms {
                let mut candidate = backup;
                candidate.identity = current.identity.clone();
                candidate.last_restored_ms = now;
                if validator::validate(&candidate).is_valid() {
                    info!(age_ms = now - written_at_ms, "restore: adopting secondary backup");
                    return (Some(candidate), RestoreSource::Backup);
                }
                debug!("restore: secondary backup failed validation");
            } else {
                debug!(age_ms = now - written_at_ms, "restore: secondary backup is stale");
            }
        }
        Ok(None) => debug!("restore: no secondary backup present"),
        // An unreadable secondary is just a backup that cannot be adopted;
        // the later tiers do not depend on it.
        Err(e) => warn!(error = %e, "restore: secondary backup unreadable, falling through"),
    }

    let mut partial = current.with_session_reset();
    partial.last_restored_ms = now;
    if validator::validate(&partial).is_valid() {
        info!("restore: adopting partial session reset");
        return (Some(partial), RestoreSource::Partial);
    }

    info!("restore: falling back to defaults, identity preserved");
    let mut fresh = current.defaults_preserving_identity();
    fresh.last_restored_ms = now;
    (Some(fresh), RestoreSource::Default)
}

/// Takes periodic secondary snapshots of the committed-state stream
pub struct BackupScheduler {
    store: StateStore,
    interval_ms: i64,
}

impl BackupScheduler {
    pub fn new(store: StateStore, config: &StoreConfig) -> Self {
        Self {
            store,
            interval_ms: config.backup_interval_secs as i64 * 1000,
        }
    }

    /// Run the ordered restore through the store's single-writer path.
    /// Intended for startup, before the display loop begins.
    pub async fn restore_state(&self) -> Result<RestoreSource, StoreError> {
        self.store.restore().await
    }

    /// Spawn the watcher task. It exits when the store shuts down.
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut rx = self.store.observe();
            debug!(interval_ms = self.interval_ms, "backup scheduler started");
            loop {
                let snapshot = rx.borrow_and_update().clone();
                let now = now_ms();
                if now - snapshot.last_backup_ms >= self.interval_ms {
                    self.take_backup(snapshot, now).await;
                }
                if rx.changed().await.is_err() {
                    break;
                }
            }
            debug!("backup scheduler stopped");
        })
    }

    async fn take_backup(&self, snapshot: ApplicationState, now: i64) {
        // Only valid snapshots are worth a generation; recovery handles the
        // invalid ones.
        let report = validator::validate(&snapshot);
        if !report.is_valid() {
            debug!(%report, "skipping backup of invalid snapshot");
            return;
        }
        if let Err(e) = self.store.write_secondary(snapshot).await {
            warn!(error = %e, "secondary backup write failed");
            return;
        }
        let result = self
            .store
            .update(move |state| {
                let mut next = state.clone();
                next.last_backup_ms = now;
                next
            })
            .await;
        match result {
            Ok(_) => info!("secondary backup written"),
            Err(e) => warn!(error = %e, "failed to record backup timestamp"),
        }
    }
}
