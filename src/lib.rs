//! Framestore - self-healing persisted state for an unattended photo-frame
//! daemon
//!
//! The store owns the single source of truth for configuration and session
//! state, survives process death and partial writes through dual-slot
//! persistence, and heals inconsistent state through a tiered, rate-limited
//! recovery procedure that never loses the signed-in identity.
//!
//! # Components
//!
//! - [`validator`] - pure invariant checks over a snapshot
//! - [`store`] - the `StateStore` actor owning the canonical snapshot and the
//!   storage slots
//! - [`recovery`] - the `RecoveryCoordinator` and tiered recovery procedure
//! - [`backup`] - the `BackupScheduler`: periodic secondary backups and the
//!   ordered restore chain
//! - [`config`] - configuration types and loading
//! - [`credentials`] - the external credential-store seam used by sign-out

pub mod backup;
pub mod cli;
pub mod config;
pub mod credentials;
pub mod domain;
pub mod recovery;
pub mod store;
pub mod validator;

pub use backup::{BackupScheduler, RestoreSource};
pub use config::StoreConfig;
pub use credentials::{CredentialStore, NoopCredentialStore};
pub use domain::{ApplicationState, DisplayMode, Identity, MIN_TRANSITION_INTERVAL_SECS};
pub use recovery::{RecoveryCoordinator, RecoveryOutcome, RecoveryTrigger};
pub use store::{StateStore, StoreError, StoreResponse};
pub use validator::{ValidationReport, validate};
