//! Tiered recovery
//!
//! The `RecoveryCoordinator` watches the committed-state stream and
//! re-validates every emission. When a snapshot fails validation it asks the
//! store to recover; the tier logic itself runs inside the store actor so a
//! recovery can never interleave with an ordinary update.
//!
//! Tiers, in order: backup adoption, partial recovery (session fields reset,
//! configuration and identity kept), safe reset (defaults with identity
//! preserved). Escalation is rate-limited through the recovery-attempt
//! sequence carried inside the state: more than
//! `recovery_attempt_threshold` attempts inside the rolling window forces the
//! terminal safe reset. No tier ever publishes a state that fails validation.

use std::fs;
use std::path::Path;

use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::domain::{ApplicationState, now_ms};
use crate::store::{SlotStore, StateStore};
use crate::validator;

/// What tripped a recovery
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryTrigger {
    /// An observed snapshot failed invariant checks. Raised by the
    /// coordinator's watch loop.
    Validation,
    /// A slot could not be read or parsed. The store quietly falls back
    /// between its own slots, so this variant is for callers sitting outside
    /// that path, a boot-time initializer or a sync layer that hits storage
    /// directly.
    Persistence,
}

impl std::fmt::Display for RecoveryTrigger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Validation => write!(f, "validation"),
            Self::Persistence => write!(f, "persistence"),
        }
    }
}

/// Which tier produced the adopted state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryOutcome {
    /// The backup slot validated and was adopted
    BackupRestored { attempts_in_window: usize },
    /// Session fields were reset on the current state
    PartialRecovery { attempts_in_window: usize },
    /// Terminal tier: defaults with identity carried forward
    SafeReset { attempts_in_window: usize },
}

impl RecoveryOutcome {
    pub fn attempts_in_window(&self) -> usize {
        match self {
            Self::BackupRestored { attempts_in_window }
            | Self::PartialRecovery { attempts_in_window }
            | Self::SafeReset { attempts_in_window } => *attempts_in_window,
        }
    }
}

/// Knobs the tier logic needs from `StoreConfig`
pub(crate) struct RecoveryContext<'a> {
    pub slots: &'a SlotStore,
    pub cache_dir: Option<&'a Path>,
    pub window_ms: i64,
    pub attempt_threshold: usize,
}

/// Run the tiered procedure against the current (suspect) state.
///
/// Returns the state to adopt and the tier that produced it. The caller (the
/// store actor) stamps, persists, and publishes the result. Every returned
/// state has already passed validation, safe reset by construction.
pub(crate) fn run_recovery(
    current: &ApplicationState,
    trigger: RecoveryTrigger,
    preserve_identity: bool,
    ctx: &RecoveryContext<'_>,
) -> (ApplicationState, RecoveryOutcome) {
    let now = now_ms();
    let mut tracked = current.clone();
    let attempts = tracked.record_recovery_attempt(now, ctx.window_ms);
    info!(%trigger, attempts, "recovery triggered");

    // Terminal tier: too many attempts inside the window
    if attempts > ctx.attempt_threshold {
        warn!(attempts, threshold = ctx.attempt_threshold, "recovery rate exceeded, safe reset");
        return (
            safe_reset(current, preserve_identity, ctx.cache_dir),
            RecoveryOutcome::SafeReset { attempts_in_window: attempts },
        );
    }

    // Tier: adopt the backup slot if it validates
    match ctx.slots.read_backup() {
        Ok(backup) => {
            let mut candidate = backup;
            if preserve_identity {
                candidate.identity = current.identity.clone();
            }
            // Carry the attempt history so repeated failures still escalate
            candidate.recovery_attempts_ms = tracked.recovery_attempts_ms.clone();
            candidate.last_restored_ms = now;
            let report = validator::validate(&candidate);
            if report.is_valid() {
                info!("recovery adopted backup slot");
                return (candidate, RecoveryOutcome::BackupRestored { attempts_in_window: attempts });
            }
            debug!(%report, "backup slot failed validation, escalating");
        }
        Err(e) => debug!(error = %e, "backup slot unreadable, escalating"),
    }

    // Tier: reset session fields, keep configuration and identity
    let mut partial = current.with_session_reset();
    partial.last_restored_ms = now;
    let report = validator::validate(&partial);
    if report.is_valid() {
        info!("recovery applied partial session reset");
        return (partial, RecoveryOutcome::PartialRecovery { attempts_in_window: attempts });
    }
    debug!(%report, "partial recovery failed validation, falling back to safe reset");

    (
        safe_reset(current, preserve_identity, ctx.cache_dir),
        RecoveryOutcome::SafeReset { attempts_in_window: attempts },
    )
}

/// Defaults with identity optionally carried forward, plus cache cleanup.
///
/// This tier must always leave the store in a publishable state, so cache
/// cleanup failures are logged and swallowed.
fn safe_reset(
    current: &ApplicationState,
    preserve_identity: bool,
    cache_dir: Option<&Path>,
) -> ApplicationState {
    if let Some(dir) = cache_dir {
        clear_cache_dir(dir);
    }
    if preserve_identity {
        current.defaults_preserving_identity()
    } else {
        ApplicationState::default()
    }
}

/// Remove cached non-identity files (downloaded photos, thumbnails)
fn clear_cache_dir(dir: &Path) {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            debug!(dir = %dir.display(), error = %e, "cache dir not readable, skipping");
            return;
        }
    };
    let mut removed = 0usize;
    for entry in entries.flatten() {
        let path = entry.path();
        let result = if path.is_dir() {
            fs::remove_dir_all(&path)
        } else {
            fs::remove_file(&path)
        };
        match result {
            Ok(()) => removed += 1,
            Err(e) => error!(path = %path.display(), error = %e, "failed to remove cached file"),
        }
    }
    info!(dir = %dir.display(), removed, "cleared cache directory");
}

/// Watches the committed-state stream and drives recovery on bad snapshots
pub struct RecoveryCoordinator {
    store: StateStore,
}

impl RecoveryCoordinator {
    pub fn new(store: StateStore) -> Self {
        Self { store }
    }

    /// Spawn the watcher task. It exits when the store shuts down.
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut rx = self.store.observe();
            debug!("recovery coordinator started");
            loop {
                let report = {
                    let snapshot = rx.borrow_and_update();
                    validator::validate(&snapshot)
                };
                if !report.is_valid() {
                    warn!(%report, "observed invalid snapshot");
                    match self.store.recover(RecoveryTrigger::Validation).await {
                        Ok(outcome) => info!(?outcome, "recovery completed"),
                        // Contained: the store has already fallen back as far
                        // as it can; nothing useful to escalate to.
                        Err(e) => error!(error = %e, "recovery failed"),
                    }
                }
                if rx.changed().await.is_err() {
                    break;
                }
            }
            debug!("recovery coordinator stopped");
        })
    }
}
