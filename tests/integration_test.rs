//! Integration tests for framestore
//!
//! End-to-end behavior of the store, recovery coordinator, and backup
//! scheduler working together against real storage.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;

use framestore::{
    ApplicationState, BackupScheduler, NoopCredentialStore, RecoveryCoordinator, RecoveryOutcome,
    RecoveryTrigger, StateStore, StoreConfig, validate,
};

fn config_for(dir: &Path) -> StoreConfig {
    StoreConfig {
        state_dir: dir.to_path_buf(),
        ..Default::default()
    }
}

fn spawn_store(dir: &Path) -> StateStore {
    StateStore::spawn(config_for(dir), Arc::new(NoopCredentialStore)).expect("spawn store")
}

async fn signed_in_with_source(store: &StateStore) -> ApplicationState {
    store
        .update(|s| {
            let mut next = s.clone();
            next.identity.auth_token = "auth-token".to_string();
            next.identity.refresh_token = "refresh-token".to_string();
            next.identity.account_email = "frame@example.com".to_string();
            next.photo_sources.insert("google_photos".to_string());
            next
        })
        .await
        .expect("seed state")
}

/// Poll the store until its published state validates, or panic
async fn wait_until_valid(store: &StateStore) -> ApplicationState {
    tokio::time::timeout(Duration::from_secs(5), async {
        let mut rx = store.observe();
        loop {
            let snapshot = rx.borrow_and_update().clone();
            if validate(&snapshot).is_valid() {
                return snapshot;
            }
            rx.changed().await.expect("store alive");
        }
    })
    .await
    .expect("state never became valid")
}

// =============================================================================
// Recovery Coordinator
// =============================================================================

#[tokio::test]
async fn test_coordinator_heals_invalid_persisted_state() {
    let temp = TempDir::new().expect("temp dir");

    // Seed the slots with a state whose bookkeeping is torn: last sync ahead
    // of last modified. Boot normalization does not touch this, so the store
    // publishes it invalid and the coordinator has to intervene.
    let mut torn = ApplicationState::default();
    torn.photo_sources.insert("local".to_string());
    torn.identity.auth_token = "auth-token".to_string();
    torn.identity.account_email = "frame@example.com".to_string();
    torn.last_modified_ms = 100;
    torn.last_synced_ms = 200;
    let bytes = serde_json::to_vec(&torn).expect("serialize");
    std::fs::write(temp.path().join("primary.json"), &bytes).expect("seed primary");
    std::fs::write(temp.path().join("primary_backup.json"), &bytes).expect("seed backup");

    let store = spawn_store(temp.path());
    assert!(!validate(&store.get()).is_valid(), "seeded state should start invalid");

    let coordinator = RecoveryCoordinator::new(store.clone()).spawn();

    let healed = wait_until_valid(&store).await;
    // Partial recovery: configuration and identity untouched
    assert!(healed.photo_sources.contains("local"));
    assert_eq!(healed.identity.auth_token, "auth-token");
    assert_eq!(healed.identity.account_email, "frame@example.com");

    store.shutdown().await.expect("shutdown");
    coordinator.await.expect("coordinator exits");
}

#[tokio::test]
async fn test_bounded_recovery_safe_reset_on_fourth_attempt() {
    let temp = TempDir::new().expect("temp dir");
    let store = spawn_store(temp.path());
    signed_in_with_source(&store).await;

    // First three triggers stay below the threshold and adopt the (valid)
    // backup slot; the fourth crosses it and forces the one safe reset.
    for attempt in 1..=3usize {
        let outcome = store.recover(RecoveryTrigger::Validation).await.expect("recover");
        match outcome {
            RecoveryOutcome::BackupRestored { attempts_in_window } => {
                assert_eq!(attempts_in_window, attempt);
            }
            other => panic!("attempt {attempt}: expected backup adoption, got {other:?}"),
        }
    }

    let outcome = store.recover(RecoveryTrigger::Validation).await.expect("recover");
    assert!(
        matches!(outcome, RecoveryOutcome::SafeReset { attempts_in_window: 4 }),
        "fourth attempt must safe-reset, got {outcome:?}"
    );

    let state = store.get();
    // Default configuration, empty attempt sequence, identity intact
    assert!(state.photo_sources.is_empty());
    assert!(state.recovery_attempts_ms.is_empty());
    assert_eq!(state.identity.auth_token, "auth-token");
    assert_eq!(state.identity.refresh_token, "refresh-token");
    assert_eq!(state.identity.account_email, "frame@example.com");

    // A fresh trigger after the reset starts a new window instead of
    // escalating again
    let outcome = store.recover(RecoveryTrigger::Validation).await.expect("recover");
    assert_eq!(outcome.attempts_in_window(), 1);
    assert!(!matches!(outcome, RecoveryOutcome::SafeReset { .. }));

    store.shutdown().await.expect("shutdown");
}

#[tokio::test]
async fn test_identity_survives_every_tier() {
    let temp = TempDir::new().expect("temp dir");
    let store = spawn_store(temp.path());
    let seeded = signed_in_with_source(&store).await;

    // Tier: backup adoption
    let outcome = store.recover(RecoveryTrigger::Persistence).await.expect("recover");
    assert!(matches!(outcome, RecoveryOutcome::BackupRestored { .. }));
    assert_eq!(store.get().identity, seeded.identity);

    // Tier: safe reset via explicit resets
    let reset = store.reset_to_defaults(true).await.expect("reset");
    assert_eq!(reset.identity, seeded.identity);

    store.shutdown().await.expect("shutdown");
}

#[tokio::test]
async fn test_explicitly_unpreserved_recovery_drops_identity() {
    let temp = TempDir::new().expect("temp dir");
    let store = spawn_store(temp.path());
    signed_in_with_source(&store).await;

    // Exceed the rate limit up front so the next trigger lands on the
    // terminal tier, where the no-preservation request takes effect
    let now = framestore::domain::now_ms();
    store
        .update(move |s| {
            let mut next = s.clone();
            next.recovery_attempts_ms = vec![now - 3_000, now - 2_000, now - 1_000];
            next
        })
        .await
        .expect("seed attempts");

    let outcome = store
        .recover_dropping_identity(RecoveryTrigger::Validation)
        .await
        .expect("recover");
    assert!(matches!(outcome, RecoveryOutcome::SafeReset { .. }));
    assert!(store.get().identity.is_empty());

    store.shutdown().await.expect("shutdown");
}

// =============================================================================
// Backup Scheduler
// =============================================================================

#[tokio::test]
async fn test_scheduler_writes_secondary_generation() {
    let temp = TempDir::new().expect("temp dir");
    let mut config = config_for(temp.path());
    config.backup_interval_secs = 1;
    let store = StateStore::spawn(config.clone(), Arc::new(NoopCredentialStore)).expect("spawn");
    signed_in_with_source(&store).await;

    let scheduler = BackupScheduler::new(store.clone(), &config).spawn();

    // The scheduler observes the committed stream and takes a generation once
    // the last one is old enough (never, here)
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if store.get().last_backup_ms > 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("secondary backup never recorded");

    assert!(temp.path().join("secondary_backup.json").exists());
    assert!(temp.path().join("secondary_backup.meta.json").exists());

    store.shutdown().await.expect("shutdown");
    scheduler.await.expect("scheduler exits");
}

#[tokio::test]
async fn test_restore_returns_current_without_writing() {
    let temp = TempDir::new().expect("temp dir");
    let config = config_for(temp.path());
    let store = StateStore::spawn(config.clone(), Arc::new(NoopCredentialStore)).expect("spawn");
    let seeded = signed_in_with_source(&store).await;

    let scheduler = BackupScheduler::new(store.clone(), &config);
    let source = scheduler.restore_state().await.expect("restore");

    assert_eq!(source, framestore::RestoreSource::Current);
    let after = store.get();
    assert_eq!(after.last_modified_ms, seeded.last_modified_ms);
    assert_eq!(after, seeded);

    store.shutdown().await.expect("shutdown");
}

#[tokio::test]
async fn test_restore_adopts_secondary_after_corruption() {
    let temp = TempDir::new().expect("temp dir");
    let config = config_for(temp.path());
    let store = StateStore::spawn(config.clone(), Arc::new(NoopCredentialStore)).expect("spawn");
    let seeded = signed_in_with_source(&store).await;

    // Take an explicit secondary generation, then corrupt the live state so
    // badly that only the secondary can heal it
    store.write_secondary(seeded.clone()).await.expect("secondary");
    store.shutdown().await.expect("shutdown");

    let mut broken = seeded.clone();
    broken.transition_interval_secs = 1;
    broken.photo_sources.clear();
    let bytes = serde_json::to_vec(&broken).expect("serialize");
    std::fs::write(temp.path().join("primary.json"), &bytes).expect("seed primary");
    std::fs::write(temp.path().join("primary_backup.json"), &bytes).expect("seed backup");

    let store = StateStore::spawn(config.clone(), Arc::new(NoopCredentialStore)).expect("respawn");
    let scheduler = BackupScheduler::new(store.clone(), &config);
    let source = scheduler.restore_state().await.expect("restore");

    assert_eq!(source, framestore::RestoreSource::Backup);
    let restored = store.get();
    assert!(restored.photo_sources.contains("google_photos"));
    assert_eq!(restored.identity, seeded.identity);
    assert!(restored.last_restored_ms > 0);

    store.shutdown().await.expect("shutdown");
}

#[tokio::test]
async fn test_restore_heals_despite_corrupt_secondary() {
    let temp = TempDir::new().expect("temp dir");
    let config = config_for(temp.path());
    let store = StateStore::spawn(config.clone(), Arc::new(NoopCredentialStore)).expect("spawn");
    let seeded = signed_in_with_source(&store).await;
    store.shutdown().await.expect("shutdown");

    // A torn sync timestamp plus an unreadable secondary: the restore chain
    // must skip the corrupt backup and still heal via the session reset
    let mut broken = seeded.clone();
    broken.last_synced_ms = broken.last_modified_ms + 60_000;
    let bytes = serde_json::to_vec(&broken).expect("serialize");
    std::fs::write(temp.path().join("primary.json"), &bytes).expect("seed primary");
    std::fs::write(temp.path().join("primary_backup.json"), &bytes).expect("seed backup");
    std::fs::write(temp.path().join("secondary_backup.json"), b"{ torn").expect("seed secondary");

    let store = StateStore::spawn(config.clone(), Arc::new(NoopCredentialStore)).expect("respawn");
    let scheduler = BackupScheduler::new(store.clone(), &config);
    let source = scheduler.restore_state().await.expect("restore");

    assert_eq!(source, framestore::RestoreSource::Partial);
    let restored = store.get();
    assert!(restored.last_modified_ms >= restored.last_synced_ms);
    assert_eq!(restored.identity, seeded.identity);

    store.shutdown().await.expect("shutdown");
}

// =============================================================================
// Persistence round trips
// =============================================================================

#[tokio::test]
async fn test_state_round_trip_across_restart() {
    let temp = TempDir::new().expect("temp dir");
    let store = spawn_store(temp.path());
    let committed = store
        .update(|s| {
            let mut next = s.clone();
            next.photo_sources.insert("local".to_string());
            next.selected_albums.insert("album-7".to_string());
            next.transition_interval_secs = 45;
            next.display_mode = framestore::DisplayMode::Sequential;
            next
        })
        .await
        .expect("update");
    store.shutdown().await.expect("shutdown");

    let store = spawn_store(temp.path());
    assert_eq!(store.get(), committed);
    store.shutdown().await.expect("shutdown");
}

#[tokio::test]
async fn test_corrupted_primary_repaired_by_next_update() {
    let temp = TempDir::new().expect("temp dir");
    let store = spawn_store(temp.path());
    signed_in_with_source(&store).await;
    store.shutdown().await.expect("shutdown");

    std::fs::write(temp.path().join("primary.json"), b"\0\0 torn").expect("corrupt");

    // Load falls back to the backup slot and re-persists it to primary
    let store = spawn_store(temp.path());
    assert!(store.get().photo_sources.contains("google_photos"));

    // The next update commits cleanly to both slots
    store
        .update(|s| {
            let mut next = s.clone();
            next.transition_interval_secs = 10;
            next
        })
        .await
        .expect("update after repair");
    store.shutdown().await.expect("shutdown");

    let primary: ApplicationState =
        serde_json::from_slice(&std::fs::read(temp.path().join("primary.json")).expect("read"))
            .expect("primary parses again");
    assert_eq!(primary.transition_interval_secs, 10);
}
