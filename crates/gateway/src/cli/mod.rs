//! Administrative CLI.

pub mod archive;
pub mod config_cmd;

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};

use am_domain::config::Config;

/// AgentMaestro — an agent-run orchestration engine.
#[derive(Debug, Parser)]
#[command(name = "agentmaestro", version, about)]
pub struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the orchestration server. This is the default command.
    Serve,
    /// Archive terminal runs older than a cutoff and optionally compact
    /// their verbose events.
    ArchiveRuns {
        /// Archive runs that ended more than this many days ago.
        #[arg(long, default_value_t = 30)]
        older_than: i64,
        /// Maximum number of runs to archive in one invocation.
        #[arg(long)]
        limit: Option<usize>,
        /// Compact verbose events when archiving.
        #[arg(long)]
        compact: bool,
        /// Event types to compact (defaults to the configured list).
        #[arg(long = "verbose-events", num_args = 0..)]
        verbose_events: Option<Vec<String>>,
    },
    /// Configuration utilities.
    #[command(subcommand)]
    Config(ConfigCommand),
    /// Print version information.
    Version,
}

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Parse the config file and report any errors.
    Validate,
    /// Dump the resolved configuration (with defaults) as TOML.
    Show,
}

/// Load the configuration from `--config`, `$AM_CONFIG`, or
/// `agentmaestro.toml` in the working directory; defaults apply when no
/// file exists.
pub fn load_config(explicit: Option<&PathBuf>) -> anyhow::Result<(Arc<Config>, PathBuf)> {
    let path = explicit
        .cloned()
        .or_else(|| std::env::var("AM_CONFIG").ok().map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from("agentmaestro.toml"));

    let config = if path.exists() {
        let raw = std::fs::read_to_string(&path)?;
        toml::from_str(&raw).map_err(|e| anyhow::anyhow!("{}: {e}", path.display()))?
    } else {
        Config::default()
    };
    Ok((Arc::new(config), path))
}
