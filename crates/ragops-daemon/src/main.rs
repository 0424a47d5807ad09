//! ragops
//!
//! Builds versioned search indexes from queue messages and rolls them back.
//!
//! # Usage
//!
//! ```bash
//! ragops worker [--docs-dir DIR]
//! ragops build [--index demo] [--dataset sample] [--fail-step embed --fail-mode once]
//! ragops replay <RUN_ID> --from-step chunk
//! ragops rollback [--index demo] [--steps 1 | --to-version N]
//! ragops status <RUN_ID>
//! ragops index <INDEX>
//! ragops health
//! ```
//!
//! # Configuration
//!
//! Configuration is loaded in order (later sources override earlier):
//! 1. Built-in defaults
//! 2. Config file (~/.config/ragops/config.toml)
//! 3. Environment variables (RAGOPS_*)
//! 4. CLI flags

use anyhow::Result;
use clap::Parser;

use ragops_daemon::{
    check_health, load_settings, run_worker, show_index, show_status, submit_build,
    submit_replay, submit_rollback, Cli, Commands,
};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let settings = load_settings(&cli)?;

    match cli.command {
        Commands::Worker { docs_dir } => {
            run_worker(settings, docs_dir.as_deref()).await?;
        }
        Commands::Build {
            index,
            dataset,
            fail_step,
            fail_mode,
        } => {
            submit_build(&settings, index, dataset, fail_step, fail_mode).await?;
        }
        Commands::Replay {
            run_id,
            from_step,
            fail_step,
            fail_mode,
        } => {
            submit_replay(&settings, &run_id, from_step, fail_step, fail_mode).await?;
        }
        Commands::Rollback {
            index,
            steps,
            to_version,
        } => {
            submit_rollback(&settings, index, steps, to_version).await?;
        }
        Commands::Status { run_id } => {
            show_status(&settings, &run_id)?;
        }
        Commands::Index { index } => {
            show_index(&settings, &index).await?;
        }
        Commands::Health => {
            check_health(&settings).await?;
        }
    }

    Ok(())
}
