//! Credential store seam
//!
//! The platform keychain (or whatever holds refresh tokens at rest) is
//! external to this crate. `sign_out` is the only operation that touches it.

use async_trait::async_trait;

/// External secure credential storage
#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Remove all stored credentials for the signed-in account
    async fn clear(&self) -> eyre::Result<()>;
}

/// No-op implementation for tests and headless tooling
#[derive(Debug, Default, Clone)]
pub struct NoopCredentialStore;

#[async_trait]
impl CredentialStore for NoopCredentialStore {
    async fn clear(&self) -> eyre::Result<()> {
        Ok(())
    }
}
