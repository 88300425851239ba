//! ApplicationState - the one persisted record
//!
//! Every committed snapshot is a fresh value; nothing mutates a published
//! state in place. Transitions go through `StateStore`, which stamps
//! `last_modified_ms` on every accepted update.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use super::now_ms;

/// Schema version written into every slot. Bump on breaking layout changes.
pub const SCHEMA_VERSION: u32 = 1;

/// Smallest slide transition interval the display loop can keep up with
pub const MIN_TRANSITION_INTERVAL_SECS: u32 = 5;

/// How photos are sequenced on screen
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum DisplayMode {
    /// Random order across all selected sources
    #[default]
    Shuffle,
    /// Source order, album by album
    Sequential,
    /// Loop a single album
    SingleAlbum,
}

impl std::fmt::Display for DisplayMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Shuffle => write!(f, "shuffle"),
            Self::Sequential => write!(f, "sequential"),
            Self::SingleAlbum => write!(f, "single_album"),
        }
    }
}

/// Signed-in account material. Empty strings mean "absent".
///
/// These are the only fields every recovery tier is required to carry
/// forward; only `sign_out` may drop them.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Identity {
    pub auth_token: String,
    pub refresh_token: String,
    pub account_email: String,
}

impl Identity {
    /// True when no account material is present
    pub fn is_empty(&self) -> bool {
        self.auth_token.is_empty() && self.refresh_token.is_empty() && self.account_email.is_empty()
    }
}

/// The persisted application state
///
/// Serialized as-is into the storage slots. `#[serde(default)]` keeps old
/// records readable when fields are added.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApplicationState {
    /// Slot layout version, checked on load
    pub schema_version: u32,

    // === Configuration ===
    /// Seconds between slide transitions
    pub transition_interval_secs: u32,
    /// Enabled photo-source identifiers (e.g. provider names)
    pub photo_sources: BTreeSet<String>,
    /// Album ids selected for display
    pub selected_albums: BTreeSet<String>,
    /// Local folder ids selected for display
    pub selected_folders: BTreeSet<String>,
    /// Sequencing mode
    pub display_mode: DisplayMode,

    // === Session ===
    /// True while the user is previewing the slideshow from settings
    pub preview_mode: bool,
    /// Number of previews started this session
    pub preview_count: u32,
    /// When the last preview started (epoch ms, 0 = never)
    pub last_preview_at_ms: i64,

    // === Identity ===
    pub identity: Identity,

    // === Bookkeeping ===
    /// Stamped on every accepted update (epoch ms)
    pub last_modified_ms: i64,
    /// Last successful source sync (epoch ms, 0 = never)
    pub last_synced_ms: i64,
    /// Last secondary backup written by the scheduler (epoch ms, 0 = never)
    pub last_backup_ms: i64,
    /// Last time a restore adopted a non-current state (epoch ms, 0 = never)
    pub last_restored_ms: i64,
    /// Recovery attempt times, newest-last, pruned to the rolling window
    pub recovery_attempts_ms: Vec<i64>,
}

impl Default for ApplicationState {
    fn default() -> Self {
        Self {
            schema_version: SCHEMA_VERSION,
            transition_interval_secs: MIN_TRANSITION_INTERVAL_SECS,
            photo_sources: BTreeSet::new(),
            selected_albums: BTreeSet::new(),
            selected_folders: BTreeSet::new(),
            display_mode: DisplayMode::default(),
            preview_mode: false,
            preview_count: 0,
            last_preview_at_ms: 0,
            identity: Identity::default(),
            last_modified_ms: 0,
            last_synced_ms: 0,
            last_backup_ms: 0,
            last_restored_ms: 0,
            recovery_attempts_ms: Vec::new(),
        }
    }
}

impl ApplicationState {
    /// True when configuration is sufficient to run the screensaver
    pub fn screensaver_ready(&self) -> bool {
        !self.photo_sources.is_empty()
    }

    /// True when account material is present
    pub fn signed_in(&self) -> bool {
        !self.identity.is_empty()
    }

    /// Copy with `last_modified_ms` stamped to now
    pub fn with_stamped_modified_time(mut self) -> Self {
        self.last_modified_ms = now_ms();
        self
    }

    /// Default state carrying this state's identity
    pub fn defaults_preserving_identity(&self) -> Self {
        Self {
            identity: self.identity.clone(),
            ..Self::default()
        }
    }

    /// Copy with session fields and the recovery-attempt sequence cleared,
    /// configuration and identity untouched. The partial-recovery transform.
    pub fn with_session_reset(&self) -> Self {
        Self {
            preview_mode: false,
            preview_count: 0,
            last_preview_at_ms: 0,
            recovery_attempts_ms: Vec::new(),
            // A torn write can leave last_synced ahead of last_modified;
            // pulling sync back to modified keeps the pair consistent
            // without inventing a newer modification time.
            last_synced_ms: self.last_synced_ms.min(self.last_modified_ms),
            ..self.clone()
        }
    }

    /// Append a recovery attempt and prune entries older than `window_ms`,
    /// returning how many attempts remain inside the window
    pub fn record_recovery_attempt(&mut self, at_ms: i64, window_ms: i64) -> usize {
        self.recovery_attempts_ms.push(at_ms);
        self.recovery_attempts_ms.retain(|&t| at_ms - t <= window_ms);
        self.recovery_attempts_ms.len()
    }
}
