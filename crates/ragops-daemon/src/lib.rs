//! ragops daemon library exports.
//!
//! # Modules
//!
//! - `cli`: Command-line argument parsing with clap
//! - `commands`: Command implementations (worker, build, replay, rollback,
//!   status, index, health)

pub mod cli;
pub mod commands;

pub use cli::{Cli, Commands};
pub use commands::{
    check_health, load_settings, run_worker, show_index, show_status, submit_build,
    submit_replay, submit_rollback,
};
