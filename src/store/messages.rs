//! Store messages
//!
//! Commands and errors for the actor pattern.

use thiserror::Error;
use tokio::sync::oneshot;

use crate::backup::RestoreSource;
use crate::domain::ApplicationState;
use crate::recovery::{RecoveryOutcome, RecoveryTrigger};

/// Errors from store operations
///
/// Everything here is handled inside the subsystem; the worst observable
/// effect of any failure is a safe reset with identity preserved. Callers of
/// `update` see `Validation` as "your transform was reverted", never a crash.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("state failed validation: {}", .0.join("; "))]
    Validation(Vec<String>),

    #[error("persistence error: {0}")]
    Persistence(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("recovery attempt rate exceeded, safe reset forced")]
    RecoveryExhausted,

    #[error("store channel closed")]
    Channel,
}

/// Response from store operations
pub type StoreResponse<T> = Result<T, StoreError>;

/// A state transform applied inside the actor against the canonical snapshot
pub type Transform = Box<dyn FnOnce(&ApplicationState) -> ApplicationState + Send>;

/// Commands sent to the StateStore actor
pub enum StoreCommand {
    /// Apply a transform; on validation failure the last durable state is
    /// reloaded and republished
    Update {
        transform: Transform,
        reply: oneshot::Sender<StoreResponse<ApplicationState>>,
    },
    /// Replace the state with defaults, optionally keeping identity
    ResetToDefaults {
        preserve_identity: bool,
        reply: oneshot::Sender<StoreResponse<ApplicationState>>,
    },
    /// Out-of-band write to the backup slot
    CreateBackup {
        state: ApplicationState,
        reply: oneshot::Sender<StoreResponse<()>>,
    },
    /// Clear identity and the external credential store
    SignOut {
        reply: oneshot::Sender<StoreResponse<ApplicationState>>,
    },
    /// Run the tiered recovery procedure
    Recover {
        trigger: RecoveryTrigger,
        preserve_identity: bool,
        reply: oneshot::Sender<StoreResponse<RecoveryOutcome>>,
    },
    /// Write the scheduler's secondary backup generation
    WriteSecondary {
        state: ApplicationState,
        reply: oneshot::Sender<StoreResponse<()>>,
    },
    /// Ordered restore: current, secondary backup, partial, defaults
    Restore {
        reply: oneshot::Sender<StoreResponse<RestoreSource>>,
    },
    /// Stop the actor; the in-flight command finishes first
    Shutdown,
}

impl std::fmt::Debug for StoreCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Update { .. } => "Update",
            Self::ResetToDefaults { .. } => "ResetToDefaults",
            Self::CreateBackup { .. } => "CreateBackup",
            Self::SignOut { .. } => "SignOut",
            Self::Recover { .. } => "Recover",
            Self::WriteSecondary { .. } => "WriteSecondary",
            Self::Restore { .. } => "Restore",
            Self::Shutdown => "Shutdown",
        };
        f.write_str(name)
    }
}
