//! CLI argument parsing for the storage admin tool.
//!
//! CLI flags override every other configuration source.

use clap::{Parser, Subcommand};

/// KOMpass storage administration
///
/// Inspect usage, run cleanup and migrate records between backends.
#[derive(Parser, Debug)]
#[command(name = "kompass-admin")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to config file (overrides default ~/.config/kompass/config.toml)
    #[arg(short, long, global = true)]
    pub config: Option<String>,

    /// Set log level (trace, debug, info, warn, error)
    #[arg(short, long, global = true)]
    pub log_level: Option<String>,

    /// Override the local data directory
    #[arg(long, global = true)]
    pub data_dir: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

/// Admin commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Show active and demoted backends
    Status,

    /// Show totals across every scope with a capacity alert level
    Monitor {
        /// Print the statistics as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show storage usage for a scope
    Usage {
        /// User id, or "global"
        #[arg(short, long)]
        scope: String,

        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },

    /// List records in a scope and category, oldest first
    List {
        /// User id, or "global"
        #[arg(short, long)]
        scope: String,

        /// routes, fitness, models or training_data
        #[arg(long)]
        category: String,
    },

    /// Run an eviction pass over a scope
    Cleanup {
        /// User id, or "global"
        #[arg(short, long)]
        scope: String,
    },

    /// Move records between backends
    Migrate {
        /// Only migrate this scope (default: every scope on the source)
        #[arg(short, long)]
        scope: Option<String>,

        /// Source backend
        #[arg(long, default_value = "local")]
        from: String,

        /// Destination backend (default: the active backend)
        #[arg(long)]
        to: Option<String>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_status() {
        let cli = Cli::parse_from(["kompass-admin", "status"]);
        assert!(matches!(cli.command, Commands::Status));
    }

    #[test]
    fn test_cli_usage() {
        let cli = Cli::parse_from(["kompass-admin", "usage", "-s", "u1", "--json"]);
        match cli.command {
            Commands::Usage { scope, json } => {
                assert_eq!(scope, "u1");
                assert!(json);
            }
            _ => panic!("Expected Usage command"),
        }
    }

    #[test]
    fn test_cli_list() {
        let cli = Cli::parse_from([
            "kompass-admin",
            "list",
            "--scope",
            "global",
            "--category",
            "models",
        ]);
        match cli.command {
            Commands::List { scope, category } => {
                assert_eq!(scope, "global");
                assert_eq!(category, "models");
            }
            _ => panic!("Expected List command"),
        }
    }

    #[test]
    fn test_cli_migrate_defaults() {
        let cli = Cli::parse_from(["kompass-admin", "migrate"]);
        match cli.command {
            Commands::Migrate { scope, from, to } => {
                assert!(scope.is_none());
                assert_eq!(from, "local");
                assert!(to.is_none());
            }
            _ => panic!("Expected Migrate command"),
        }
    }

    #[test]
    fn test_cli_global_flags() {
        let cli = Cli::parse_from([
            "kompass-admin",
            "cleanup",
            "-s",
            "u1",
            "--config",
            "/etc/kompass.toml",
            "--log-level",
            "debug",
        ]);
        assert_eq!(cli.config, Some("/etc/kompass.toml".to_string()));
        assert_eq!(cli.log_level, Some("debug".to_string()));
    }

    #[test]
    fn test_cli_monitor() {
        let cli = Cli::parse_from(["kompass-admin", "monitor", "--json"]);
        assert!(matches!(cli.command, Commands::Monitor { json: true }));
    }
}
