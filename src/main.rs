//! Framestore maintenance CLI
//!
//! Operator entry point for inspecting and repairing the persisted state of
//! an unattended photo-frame device.

use std::sync::Arc;

use clap::Parser;
use colored::*;
use eyre::{Context, Result};
use tracing::info;

use framestore::cli::{Cli, Command};
use framestore::{BackupScheduler, NoopCredentialStore, StateStore, StoreConfig, validate};

fn setup_logging(verbose: bool) -> Result<()> {
    let level = if verbose { tracing::Level::DEBUG } else { tracing::Level::WARN };
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into()),
        )
        .try_init()
        .map_err(|e| eyre::eyre!(e))?;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    setup_logging(cli.verbose).context("Failed to setup logging")?;

    let mut config = StoreConfig::load(cli.config.as_ref()).context("Failed to load configuration")?;
    if let Some(state_dir) = cli.state_dir {
        config.state_dir = state_dir;
    }

    info!(state_dir = %config.state_dir.display(), "framestore starting");
    let store = StateStore::spawn(config.clone(), Arc::new(NoopCredentialStore))
        .context("Failed to open state store")?;

    match cli.command {
        Command::Show => {
            let state = store.get();
            println!("{}", serde_json::to_string_pretty(&state)?);
        }
        Command::Validate => {
            let report = validate(&store.get());
            if report.is_valid() {
                println!("{} state is valid", "✓".green());
            } else {
                println!("{} state is invalid", "✗".red());
                for violation in &report.violations {
                    println!("  - {}", violation.yellow());
                }
            }
        }
        Command::Reset { drop_identity } => {
            let state = store
                .reset_to_defaults(!drop_identity)
                .await
                .context("Reset failed")?;
            let identity_note = if state.signed_in() { "identity kept" } else { "identity cleared" };
            println!("{} state reset to defaults ({})", "✓".green(), identity_note.dimmed());
        }
        Command::Restore => {
            let scheduler = BackupScheduler::new(store.clone(), &config);
            let source = scheduler.restore_state().await.context("Restore failed")?;
            println!("{} restored from: {}", "✓".green(), source.to_string().cyan());
        }
        Command::SignOut => {
            store.sign_out().await.context("Sign-out failed")?;
            println!("{} signed out, identity cleared", "✓".green());
        }
    }

    store.shutdown().await.ok();
    Ok(())
}
