//! Command-line interface for taskq
//!
//! This module defines the CLI structure using clap derive macros.
//! Each subcommand is defined in its own submodule.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::config::{Config, CONFIG_FILE};
use crate::error::Result;

mod config;
mod run;

/// taskq - optimistic task mutations over a keyed serial queue
///
/// Replays scripted user actions against an in-memory task service and
/// shows how each mutation was queued, shown, confirmed, or rolled back.
#[derive(Parser, Debug)]
#[command(name = "taskq")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Path to the config file (defaults to ./.taskq.toml when present)
    #[arg(long, global = true, env = "TASKQ_CONFIG")]
    pub config: Option<PathBuf>,

    /// Output in JSON format
    #[arg(long, global = true)]
    pub json: bool,

    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Write controller events as JSONL to a file, or "-" for stdout
    #[arg(long, global = true, env = "TASKQ_EVENTS")]
    pub events: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available subcommands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run a scenario file through the optimistic controller
    Run {
        /// Scenario file (TOML)
        scenario: PathBuf,

        /// Override the remote latency for every call, in milliseconds
        #[arg(long)]
        latency_ms: Option<u64>,

        /// How repeated mutations on a busy lane are handled: queue or ignore
        #[arg(long)]
        reentry: Option<String>,
    },

    /// Configuration commands
    #[command(subcommand)]
    Config(ConfigCommands),
}

/// Config subcommands
#[derive(Subcommand, Debug)]
pub enum ConfigCommands {
    /// Show the effective configuration
    Show,
}

impl Cli {
    /// Execute the CLI command
    pub fn run(self) -> Result<()> {
        let config = self.load_config()?;
        match self.command {
            Commands::Run {
                scenario,
                latency_ms,
                reentry,
            } => run::run(run::RunOptions {
                scenario,
                latency_ms,
                reentry,
                config,
                events: self.events,
                json: self.json,
                quiet: self.quiet,
            }),
            Commands::Config(ConfigCommands::Show) => config::run_show(config::ShowOptions {
                config,
                path: self.config,
                json: self.json,
                quiet: self.quiet,
            }),
        }
    }

    fn load_config(&self) -> Result<Config> {
        match &self.config {
            Some(path) => Config::load(path),
            None => {
                let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
                let path = cwd.join(CONFIG_FILE);
                if path.exists() {
                    Config::load(&path)
                } else {
                    Ok(Config::default())
                }
            }
        }
    }
}
