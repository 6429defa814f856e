//! KOMpass storage admin library exports.
//!
//! # Modules
//!
//! - `cli`: Command-line argument parsing with clap
//! - `commands`: Command implementations (status, monitor, usage, list, cleanup, migrate)

pub mod cli;
pub mod commands;

pub use cli::{Cli, Commands};
pub use commands::{
    connect, list_records, run_cleanup, run_migration, show_monitor, show_status, show_usage,
};
