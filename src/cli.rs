//! CLI argument parsing for the framestore maintenance tool

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "framestore")]
#[command(author, version, about = "Inspect and repair the photo-frame state store", long_about = None)]
pub struct Cli {
    /// Path to config file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Override the state directory from the config
    #[arg(long)]
    pub state_dir: Option<PathBuf>,

    /// Verbose logging
    #[arg(short, long)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Print the current state
    Show,

    /// Validate the current state against all invariants
    Validate,

    /// Reset the state to defaults
    Reset {
        /// Also drop the signed-in identity
        #[arg(long)]
        drop_identity: bool,
    },

    /// Run the ordered restore chain (current, backup, partial, defaults)
    Restore,

    /// Clear the signed-in identity
    SignOut,
}
