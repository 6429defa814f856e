//! KOMpass storage admin
//!
//! # Usage
//!
//! ```bash
//! kompass-admin status
//! kompass-admin monitor
//! kompass-admin usage --scope <user>
//! kompass-admin list --scope <user> --category routes
//! kompass-admin cleanup --scope <user>
//! kompass-admin migrate [--scope <user>] [--from local] [--to object]
//! ```
//!
//! # Configuration
//!
//! Configuration is loaded in order (later sources override earlier):
//! 1. Built-in defaults
//! 2. Config file (~/.config/kompass/config.toml)
//! 3. Environment variables (MAX_FILE_SIZE_MB, OBJECT_STORE_BUCKET, ...)
//! 4. CLI flags

use anyhow::Result;
use clap::Parser;

use kompass_admin::{
    connect, list_records, run_cleanup, run_migration, show_monitor, show_status, show_usage, Cli,
    Commands,
};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let manager = connect(
        cli.config.as_deref(),
        cli.log_level.as_deref(),
        cli.data_dir.as_deref(),
    )
    .await?;

    match cli.command {
        Commands::Status => show_status(&manager),
        Commands::Monitor { json } => show_monitor(&manager, json).await?,
        Commands::Usage { scope, json } => show_usage(&manager, &scope, json).await?,
        Commands::List { scope, category } => list_records(&manager, &scope, &category).await?,
        Commands::Cleanup { scope } => run_cleanup(&manager, &scope).await?,
        Commands::Migrate { scope, from, to } => {
            run_migration(&manager, scope.as_deref(), &from, to.as_deref()).await?
        }
    }

    Ok(())
}
