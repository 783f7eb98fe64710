//! Command-line interface

use clap::{Parser, Subcommand};

use crate::config::CliOverrides;

/// FedAvg Coordinator - Synchronous federated averaging server
///
/// Accepts training workers over WebSocket, broadcasts the global model each
/// round, averages the returned parameters and closes every worker once the
/// configured number of rounds has run.
#[derive(Parser, Debug)]
#[command(name = "fedavg-coordinator")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// More log output: -v debug, -vv trace
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Only log errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the coordinator (accepts workers and drives training sessions)
    Run {
        /// Path to configuration file
        #[arg(short, long, env = "FEDAVG_CONFIG")]
        config: Option<String>,

        /// Address to accept workers on (e.g. 0.0.0.0:8080)
        #[arg(long)]
        listen: Option<String>,

        /// Workers required before a session starts
        #[arg(long)]
        min_workers: Option<usize>,

        /// Rounds per session
        #[arg(long)]
        rounds: Option<u32>,
    },

    /// Print build metadata
    Version,

    /// Inspect, create or check configuration files
    Config {
        #[command(subcommand)]
        subcommand: ConfigSubcommand,
    },
}

#[derive(Subcommand, Debug, Clone)]
pub enum ConfigSubcommand {
    /// Print the effective configuration as TOML
    Show {
        /// Path to configuration file
        #[arg(short, long)]
        config: Option<String>,
    },

    /// Write a commented default configuration
    Init {
        /// Destination (defaults to ~/.fedavg/coordinator.toml)
        #[arg(short, long)]
        path: Option<String>,

        /// Replace an existing file
        #[arg(short, long)]
        force: bool,
    },

    /// Load a configuration and report the first problem
    Validate {
        /// File to check
        #[arg(short, long)]
        config: Option<String>,
    },
}

impl Commands {
    /// Settings given on the `run` command line
    pub fn overrides(&self) -> CliOverrides {
        match self {
            Commands::Run {
                listen,
                min_workers,
                rounds,
                ..
            } => CliOverrides {
                listen: listen.clone(),
                min_workers: *min_workers,
                rounds: *rounds,
            },
            _ => CliOverrides::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn verify_cli() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_run_command() {
        let cli = Cli::parse_from(["fedavg-coordinator", "run"]);
        match &cli.command {
            Commands::Run {
                listen,
                min_workers,
                rounds,
                ..
            } => {
                assert!(listen.is_none());
                assert!(min_workers.is_none());
                assert!(rounds.is_none());
            }
            _ => panic!("Expected Run command"),
        }

        let overrides = cli.command.overrides();
        assert!(overrides.listen.is_none());
    }

    #[test]
    fn test_run_with_config() {
        let cli = Cli::parse_from(["fedavg-coordinator", "run", "--config", "/path/to/config.toml"]);
        match cli.command {
            Commands::Run { config, .. } => {
                assert_eq!(config, Some("/path/to/config.toml".to_string()));
            }
            _ => panic!("Expected Run command"),
        }
    }

    #[test]
    fn test_run_overrides() {
        let cli = Cli::parse_from([
            "fedavg-coordinator",
            "run",
            "--listen",
            "127.0.0.1:9000",
            "--min-workers",
            "3",
            "--rounds",
            "10",
        ]);

        let overrides = cli.command.overrides();
        assert_eq!(overrides.listen.as_deref(), Some("127.0.0.1:9000"));
        assert_eq!(overrides.min_workers, Some(3));
        assert_eq!(overrides.rounds, Some(10));
    }

    #[test]
    fn test_run_rejects_non_numeric_rounds() {
        let result = Cli::try_parse_from(["fedavg-coordinator", "run", "--rounds", "many"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_verbose_flags() {
        let cli = Cli::parse_from(["fedavg-coordinator", "-vv", "version"]);
        assert_eq!(cli.verbose, 2);
        assert!(!cli.quiet);
    }

    #[test]
    fn test_quiet_flag() {
        let cli = Cli::parse_from(["fedavg-coordinator", "--quiet", "version"]);
        assert!(cli.quiet);
        assert!(cli.command.overrides().rounds.is_none());
    }

    #[test]
    fn test_config_show() {
        let cli = Cli::parse_from(["fedavg-coordinator", "config", "show"]);
        match cli.command {
            Commands::Config {
                subcommand: ConfigSubcommand::Show { config },
            } => {
                assert!(config.is_none());
            }
            _ => panic!("Expected Config Show command"),
        }
    }

    #[test]
    fn test_config_init() {
        let cli = Cli::parse_from(["fedavg-coordinator", "config", "init", "--force"]);
        match cli.command {
            Commands::Config {
                subcommand: ConfigSubcommand::Init { path, force },
            } => {
                assert!(path.is_none());
                assert!(force);
            }
            _ => panic!("Expected Config Init command"),
        }
    }
}
