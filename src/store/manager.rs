//! StateStore - actor that owns the canonical snapshot and the storage slots
//!
//! All mutations funnel through one actor task, so no two writers can
//! interleave a read-modify-write and nothing outside the actor ever touches
//! the slots. Committed snapshots are published on a watch channel: readers
//! get lock-free access to the latest value, slow subscribers coalesce
//! intermediate states but always see the final one.

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, error, info, warn};

use crate::backup::{self, RestoreSource};
use crate::config::StoreConfig;
use crate::credentials::CredentialStore;
use crate::domain::{ApplicationState, Identity};
use crate::recovery::{self, RecoveryContext, RecoveryOutcome, RecoveryTrigger};
use crate::validator;

use super::messages::{StoreCommand, StoreError, StoreResponse, Transform};
use super::slots::{LoadedFrom, SlotError, SlotStore};

/// Handle to the StateStore actor
#[derive(Clone)]
pub struct StateStore {
    tx: mpsc::Sender<StoreCommand>,
    watch_rx: watch::Receiver<ApplicationState>,
}

impl StateStore {
    /// Open the slots, load state per the fallback protocol, and spawn the
    /// actor.
    ///
    /// Loading never fails outright: an unreadable primary falls back to the
    /// backup slot, and an unreadable backup falls back to defaults. A loaded
    /// state that fails validation is published as-is so the
    /// `RecoveryCoordinator` can take over.
    pub fn spawn(config: StoreConfig, credentials: Arc<dyn CredentialStore>) -> eyre::Result<Self> {
        let slots = SlotStore::open(&config.state_dir)?;
        let (mut state, loaded_from) = slots.load_or_default();
        info!(?loaded_from, "state loaded");

        // Boot normalization: preview sessions do not survive a restart.
        // Clearing the flag can only remove violations, never add one.
        if state.preview_mode {
            debug!("clearing stale preview flag from previous session");
            state.preview_mode = false;
            state = state.with_stamped_modified_time();
            if let Err(e) = slots.commit(&state) {
                warn!(error = %e, "failed to persist boot normalization");
            }
        } else if loaded_from == LoadedFrom::Default {
            // First run: make the default durable before anyone observes it
            state = state.with_stamped_modified_time();
            if let Err(e) = slots.commit(&state) {
                warn!(error = %e, "failed to persist initial state");
            }
        }

        let report = validator::validate(&state);
        if !report.is_valid() {
            warn!(%report, "loaded state is invalid, publishing for recovery");
        }

        let (watch_tx, watch_rx) = watch::channel(state.clone());
        let (tx, rx) = mpsc::channel(config.channel_capacity);

        let actor = Actor {
            slots,
            state,
            watch_tx,
            credentials,
            config,
        };
        tokio::spawn(actor_loop(actor, rx));

        info!("StateStore spawned");
        Ok(Self { tx, watch_rx })
    }

    /// Current committed snapshot. Never blocks on I/O or the actor.
    pub fn get(&self) -> ApplicationState {
        self.watch_rx.borrow().clone()
    }

    /// Subscribe to committed snapshots. Coalescing: a slow subscriber may
    /// miss intermediate states but always observes the latest one.
    pub fn observe(&self) -> watch::Receiver<ApplicationState> {
        self.watch_rx.clone()
    }

    /// Apply a transform to the canonical state.
    ///
    /// The candidate is stamped with the current time and validated; an
    /// invalid candidate is discarded and the last durably-persisted state is
    /// reloaded and republished (a revert, not a crash).
    pub async fn update<F>(&self, transform: F) -> StoreResponse<ApplicationState>
    where
        F: FnOnce(&ApplicationState) -> ApplicationState + Send + 'static,
    {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.send(StoreCommand::Update {
            transform: Box::new(transform) as Transform,
            reply: reply_tx,
        })
        .await?;
        reply_rx.await.map_err(|_| StoreError::Channel)?
    }

    /// Replace the state with defaults, optionally carrying identity forward
    pub async fn reset_to_defaults(&self, preserve_identity: bool) -> StoreResponse<ApplicationState> {
        debug!(preserve_identity, "reset_to_defaults: called");
        let (reply_tx, reply_rx) = oneshot::channel();
        self.send(StoreCommand::ResetToDefaults {
            preserve_identity,
            reply: reply_tx,
        })
        .await?;
        reply_rx.await.map_err(|_| StoreError::Channel)?
    }

    /// Out-of-band snapshot write to the backup slot, independent of the
    /// regular commit path
    pub async fn create_backup(&self, state: ApplicationState) -> StoreResponse<()> {
        debug!("create_backup: called");
        let (reply_tx, reply_rx) = oneshot::channel();
        self.send(StoreCommand::CreateBackup { state, reply: reply_tx }).await?;
        reply_rx.await.map_err(|_| StoreError::Channel)?
    }

    /// Clear identity and the external credential store. The only path that
    /// drops identity.
    pub async fn sign_out(&self) -> StoreResponse<ApplicationState> {
        debug!("sign_out: called");
        let (reply_tx, reply_rx) = oneshot::channel();
        self.send(StoreCommand::SignOut { reply: reply_tx }).await?;
        reply_rx.await.map_err(|_| StoreError::Channel)?
    }

    /// Run the tiered recovery procedure, preserving identity
    pub async fn recover(&self, trigger: RecoveryTrigger) -> StoreResponse<RecoveryOutcome> {
        self.recover_inner(trigger, true).await
    }

    /// Recovery with identity deliberately not carried forward
    pub async fn recover_dropping_identity(
        &self,
        trigger: RecoveryTrigger,
    ) -> StoreResponse<RecoveryOutcome> {
        self.recover_inner(trigger, false).await
    }

    async fn recover_inner(
        &self,
        trigger: RecoveryTrigger,
        preserve_identity: bool,
    ) -> StoreResponse<RecoveryOutcome> {
        debug!(%trigger, preserve_identity, "recover: called");
        let (reply_tx, reply_rx) = oneshot::channel();
        self.send(StoreCommand::Recover {
            trigger,
            preserve_identity,
            reply: reply_tx,
        })
        .await?;
        reply_rx.await.map_err(|_| StoreError::Channel)?
    }

    /// Write the scheduler's secondary backup generation
    pub async fn write_secondary(&self, state: ApplicationState) -> StoreResponse<()> {
        debug!("write_secondary: called");
        let (reply_tx, reply_rx) = oneshot::channel();
        self.send(StoreCommand::WriteSecondary { state, reply: reply_tx }).await?;
        reply_rx.await.map_err(|_| StoreError::Channel)?
    }

    /// Ordered restore: current, secondary backup, partial, defaults
    pub async fn restore(&self) -> StoreResponse<RestoreSource> {
        debug!("restore: called");
        let (reply_tx, reply_rx) = oneshot::channel();
        self.send(StoreCommand::Restore { reply: reply_tx }).await?;
        reply_rx.await.map_err(|_| StoreError::Channel)?
    }

    /// Stop the actor. The command in flight finishes its write first; this
    /// returns once the actor has fully stopped and released the slot lock.
    pub async fn shutdown(&self) -> Result<(), StoreError> {
        debug!("shutdown: called");
        self.send(StoreCommand::Shutdown).await?;
        self.tx.closed().await;
        Ok(())
    }

    async fn send(&self, cmd: StoreCommand) -> Result<(), StoreError> {
        self.tx.send(cmd).await.map_err(|_| StoreError::Channel)
    }
}

/// The actor that owns the slots and the canonical state
struct Actor {
    slots: SlotStore,
    state: ApplicationState,
    watch_tx: watch::Sender<ApplicationState>,
    credentials: Arc<dyn CredentialStore>,
    config: StoreConfig,
}

async fn actor_loop(mut actor: Actor, mut rx: mpsc::Receiver<StoreCommand>) {
    debug!("StateStore actor started");

    while let Some(cmd) = rx.recv().await {
        match cmd {
            StoreCommand::Update { transform, reply } => {
                let _ = reply.send(actor.handle_update(transform));
            }
            StoreCommand::ResetToDefaults { preserve_identity, reply } => {
                let _ = reply.send(actor.handle_reset(preserve_identity));
            }
            StoreCommand::CreateBackup { state, reply } => {
                let result = actor.slots.write_backup(&state).map_err(map_slot_error);
                let _ = reply.send(result);
            }
            StoreCommand::SignOut { reply } => {
                let _ = reply.send(actor.handle_sign_out().await);
            }
            StoreCommand::Recover { trigger, preserve_identity, reply } => {
                let _ = reply.send(actor.handle_recover(trigger, preserve_identity));
            }
            StoreCommand::WriteSecondary { state, reply } => {
                let result = actor.slots.write_secondary(&state).map_err(map_slot_error);
                let _ = reply.send(result);
            }
            StoreCommand::Restore { reply } => {
                let _ = reply.send(actor.handle_restore());
            }
            StoreCommand::Shutdown => {
                info!("StateStore shutting down");
                break;
            }
        }
    }

    debug!("StateStore actor stopped");
}

impl Actor {
    /// Commit to both slots and make the new state visible to observers
    fn commit_and_publish(&mut self, next: ApplicationState) -> Result<ApplicationState, SlotError> {
        self.slots.commit(&next)?;
        self.publish(next.clone());
        Ok(next)
    }

    fn publish(&mut self, next: ApplicationState) {
        self.state = next.clone();
        self.watch_tx.send_replace(next);
    }

    fn handle_update(&mut self, transform: Transform) -> StoreResponse<ApplicationState> {
        let candidate = transform(&self.state).with_stamped_modified_time();

        let report = validator::validate(&candidate);
        if !report.is_valid() {
            warn!(%report, "update rejected, reverting to last persisted state");
            let (reverted, _) = self.slots.load_or_default();
            self.publish(reverted);
            return Err(StoreError::Validation(report.violations));
        }

        match self.slots.commit(&candidate) {
            Ok(()) => {
                debug!(last_modified = candidate.last_modified_ms, "update committed");
                self.publish(candidate.clone());
                Ok(candidate)
            }
            Err(e) => {
                warn!(error = %e, "commit failed, reverting to last persisted state");
                let (reverted, _) = self.slots.load_or_default();
                self.publish(reverted);
                Err(map_slot_error(e))
            }
        }
    }

    fn handle_reset(&mut self, preserve_identity: bool) -> StoreResponse<ApplicationState> {
        let next = if preserve_identity {
            self.state.defaults_preserving_identity()
        } else {
            ApplicationState::default()
        }
        .with_stamped_modified_time();

        info!(preserve_identity, "resetting state to defaults");
        self.commit_and_publish(next).map_err(map_slot_error)
    }

    async fn handle_sign_out(&mut self) -> StoreResponse<ApplicationState> {
        // A failed keychain clear must not leave tokens in our own state;
        // log it and clear the persisted identity anyway.
        if let Err(e) = self.credentials.clear().await {
            error!(error = %e, "external credential clear failed");
        }

        let mut next = self.state.clone();
        next.identity = Identity::default();
        let next = next.with_stamped_modified_time();

        info!("signed out, identity cleared");
        self.commit_and_publish(next).map_err(map_slot_error)
    }

    fn handle_recover(
        &mut self,
        trigger: RecoveryTrigger,
        preserve_identity: bool,
    ) -> StoreResponse<RecoveryOutcome> {
        let ctx = RecoveryContext {
            slots: &self.slots,
            cache_dir: self.config.cache_dir.as_deref(),
            window_ms: self.config.recovery_window_ms(),
            attempt_threshold: self.config.recovery_attempt_threshold,
        };
        let (recovered, outcome) =
            recovery::run_recovery(&self.state, trigger, preserve_identity, &ctx);
        let next = recovered.with_stamped_modified_time();

        // Terminal containment: if even the recovered state cannot be
        // persisted, keep it in memory so consumers still see a valid value.
        if let Err(e) = self.slots.commit(&next) {
            error!(error = %e, "failed to persist recovered state, keeping in memory");
        }
        self.publish(next);
        Ok(outcome)
    }

    fn handle_restore(&mut self) -> StoreResponse<RestoreSource> {
        let stale_ms = self.config.backup_stale_ms();
        let (adopted, source) = backup::run_restore(&self.state, &self.slots, stale_ms);
        match adopted {
            None => Ok(source),
            Some(next) => {
                let next = next.with_stamped_modified_time();
                self.slots.commit(&next).map_err(map_slot_error)?;
                self.publish(next);
                info!(%source, "restore adopted a new state");
                Ok(source)
            }
        }
    }
}

fn map_slot_error(e: SlotError) -> StoreError {
    match e {
        SlotError::Json(json) => StoreError::Serialization(json.to_string()),
        mismatch @ SlotError::SchemaMismatch { .. } => {
            StoreError::Serialization(mismatch.to_string())
        }
        other => StoreError::Persistence(other.to_string()),
    }
}
