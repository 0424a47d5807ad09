//! CLI argument parsing for ragops.
//!
//! CLI flags override all other config sources.

use clap::{Parser, Subcommand};
use ragops_types::{FailMode, FailStep, StepName};

/// ragops: versioned index builds over a message queue
#[derive(Parser, Debug)]
#[command(name = "ragops")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to config file (overrides default ~/.config/ragops/config.toml)
    #[arg(short, long, global = true)]
    pub config: Option<String>,

    /// Set log level (trace, debug, info, warn, error)
    #[arg(short, long, global = true)]
    pub log_level: Option<String>,

    /// Override run-state database path
    #[arg(long, global = true)]
    pub db_path: Option<String>,

    /// Override queue service URL
    #[arg(long, global = true)]
    pub queue_url: Option<String>,

    /// Override vector backend URL
    #[arg(long, global = true)]
    pub vector_url: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

/// ragops commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Consume the build and control topics until Ctrl-C or SIGTERM
    Worker {
        /// Override the documents directory
        #[arg(long)]
        docs_dir: Option<String>,
    },

    /// Enqueue a build of the next version of an index
    Build {
        #[arg(long, default_value = "demo")]
        index: String,

        #[arg(long, default_value = "sample")]
        dataset: String,

        /// Step to fail on purpose (or "none")
        #[arg(long, default_value = "none", value_parser = parse_fail_step)]
        fail_step: FailStep,

        /// never, once or always
        #[arg(long, default_value = "never", value_parser = parse_fail_mode)]
        fail_mode: FailMode,
    },

    /// Enqueue a replay of an existing run
    Replay {
        run_id: String,

        /// First step to re-run
        #[arg(long, default_value = "discover", value_parser = parse_step)]
        from_step: StepName,

        #[arg(long, default_value = "none", value_parser = parse_fail_step)]
        fail_step: FailStep,

        #[arg(long, default_value = "never", value_parser = parse_fail_mode)]
        fail_mode: FailMode,
    },

    /// Enqueue a rollback of an index's active version
    Rollback {
        #[arg(long, default_value = "demo")]
        index: String,

        /// Versions to walk back from the active one
        #[arg(long, default_value = "1")]
        steps: u32,

        /// Explicit target version (takes precedence over --steps)
        #[arg(long)]
        to_version: Option<u32>,
    },

    /// Show a run's record and log
    Status { run_id: String },

    /// Show an index's versions and alias target
    Index { index: String },

    /// Probe the queue and vector services
    Health,
}

fn parse_step(s: &str) -> Result<StepName, String> {
    s.parse::<StepName>().map_err(|e| e.to_string())
}

fn parse_fail_step(s: &str) -> Result<FailStep, String> {
    FailStep::try_from(s.to_string())
}

fn parse_fail_mode(s: &str) -> Result<FailMode, String> {
    match s {
        "never" => Ok(FailMode::Never),
        "once" => Ok(FailMode::Once),
        "always" => Ok(FailMode::Always),
        other => Err(format!(
            "unknown fail mode '{}' (expected never, once or always)",
            other
        )),
    }
}
