//! FedAvg Coordinator - Synchronous federated averaging server
//!
//! This is the main entry point for the coordinator binary.
//! The coordinator accepts training workers over WebSocket, waits for a
//! quorum, runs a fixed number of fit/aggregate rounds and then closes every
//! worker before waiting for the next session.

mod cli;
mod config;
mod coordinator;
mod error;
mod gateway;
mod logging;
mod params;
mod protocol;
mod registry;
mod version;

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use futures_util::future::join_all;
use tokio::sync::mpsc;
use tokio::task::JoinError;
use tracing::{debug, error, info, trace, warn};

use crate::cli::{Cli, Commands};
use crate::config::CoordinatorConfig;
use crate::coordinator::{Coordinator, CoordinatorEvent};
use crate::error::{Error, Result};
use crate::gateway::{Gateway, CLOSE_LINGER};
use crate::registry::ConnectionRegistry;

fn main() -> Result<()> {
    // Parse CLI arguments first (before logging, so we know verbosity)
    let cli = Cli::parse();

    // For commands that don't need full logging, use simple setup
    match &cli.command {
        Commands::Version => {
            version::print_version();
            return Ok(());
        }
        Commands::Config { subcommand } => {
            // Config commands use minimal logging
            logging::init_simple(tracing::Level::WARN)?;
            return handle_config_command(subcommand.clone());
        }
        Commands::Run { .. } => {}
    }

    let config_path = match &cli.command {
        Commands::Run { config, .. } => config.clone(),
        _ => None,
    };

    let config =
        match CoordinatorConfig::load_with_overrides(config_path.as_deref(), &cli.command.overrides()) {
            Ok(cfg) => cfg,
            Err(e) => exit_with(e),
        };

    // The guards must be kept alive for the lifetime of the program
    let _log_guards = logging::init_logging(&config.logging, cli.verbose, cli.quiet)?;

    let build = version::build_info();
    info!(
        version = %build.full_version(),
        target = %build.target,
        profile = %build.profile,
        "Starting FedAvg Coordinator"
    );

    if let Err(e) = run_coordinator(config) {
        error!("{}", e.format_for_log());
        exit_with(e);
    }

    Ok(())
}

/// Print a startup error and exit with its code
fn exit_with(e: Error) -> ! {
    eprint!("{}", e.format_for_terminal());
    std::process::exit(e.exit_code());
}

/// Build the runtime and serve until interrupted
fn run_coordinator(config: CoordinatorConfig) -> Result<()> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .worker_threads(num_cpus::get().min(8))
        .thread_name("fedavg-coordinator")
        .build()
        .map_err(|e| Error::Internal(format!("Failed to create async runtime: {}", e)))?;

    runtime.block_on(async_coordinator_main(config))
}

async fn async_coordinator_main(config: CoordinatorConfig) -> Result<()> {
    let listen_addr = config.listen_addr()?;
    let session = config.session_config();

    info!(
        listen_addr = %listen_addr,
        min_workers = session.min_workers,
        total_rounds = session.total_rounds,
        local_epochs = session.local_epochs,
        "Configuration loaded"
    );

    let registry = Arc::new(ConnectionRegistry::new());
    let gateway = Gateway::bind(
        listen_addr,
        Arc::clone(&registry),
        config.server.message_queue_size,
    )
    .await?;
    info!(addr = %gateway.local_addr(), "Accepting workers");
    let gateway_task = gateway.spawn();

    let (event_tx, mut event_rx) = mpsc::unbounded_channel();
    let coordinator = Coordinator::new(session, Arc::clone(&registry)).with_events(event_tx);
    let mut coordinator_task = tokio::spawn(coordinator.run());

    // Set up graceful shutdown on Ctrl+C
    let shutdown_signal = tokio::signal::ctrl_c();
    tokio::pin!(shutdown_signal);

    loop {
        tokio::select! {
            result = &mut shutdown_signal => {
                if let Err(e) = result {
                    error!(error = %e, "Failed to listen for shutdown signal");
                }
                info!("Shutdown signal received");
                break;
            }

            result = &mut coordinator_task => return coordinator_exit(result),

            event = event_rx.recv() => match event {
                Some(event) => log_event(event),
                // Only happens once the coordinator task has ended
                None => return coordinator_exit((&mut coordinator_task).await),
            },
        }
    }

    gateway_task.abort();
    coordinator_task.abort();
    shutdown_workers(&registry).await;

    Ok(())
}

fn coordinator_exit(result: std::result::Result<(), JoinError>) -> Result<()> {
    result.map_err(|e| Error::Internal(format!("Coordinator task failed: {}", e)))
}

/// Close every connected worker and give the transports time to send the close frame
async fn shutdown_workers(registry: &ConnectionRegistry) {
    if registry.is_empty() {
        info!("Coordinator stopped");
        return;
    }

    let closing = registry.snapshot();
    let closed = registry.close_all("coordinator shutting down");
    let drained = tokio::time::timeout(
        CLOSE_LINGER + Duration::from_secs(1),
        join_all(closing.iter().map(|connection| connection.closed())),
    )
    .await;

    if drained.is_err() {
        warn!("Some workers did not finish closing");
    }
    info!(closed, "Coordinator stopped");
}

/// Operator-facing record of what the coordinator is doing
fn log_event(event: CoordinatorEvent) {
    match event {
        CoordinatorEvent::PhaseChanged(phase) => {
            trace!(phase = %phase, "Phase");
        }
        CoordinatorEvent::QuorumReached { workers } => {
            info!(workers, "Quorum reached");
        }
        CoordinatorEvent::RoundStarted {
            session,
            round,
            participants,
            delivered,
        } => {
            info!(session_id = %session, round, participants, delivered, "Round started");
        }
        CoordinatorEvent::ResponseAccepted { round, connection } => {
            debug!(round, connection = %connection, "Response accepted");
        }
        CoordinatorEvent::ResponseDiscarded {
            round,
            connection,
            reason,
        } => {
            debug!(round, connection = %connection, reason = %reason, "Response discarded");
        }
        CoordinatorEvent::RoundCompleted {
            round,
            accepted,
            discarded,
            global,
        } => {
            info!(round, accepted, discarded, parameters = %global, "Round complete");
        }
        CoordinatorEvent::SessionAborted { summary } => {
            warn!(
                session = summary.session,
                rounds_run = summary.rounds_run,
                "No workers left, session aborted"
            );
        }
        CoordinatorEvent::SessionCompleted { closed, summary } => {
            info!(
                session = summary.session,
                session_id = %summary.session_id,
                rounds_run = summary.rounds_run,
                closed,
                "Training session complete"
            );
        }
    }
}

/// Handle config subcommands
fn handle_config_command(subcommand: cli::ConfigSubcommand) -> Result<()> {
    use cli::ConfigSubcommand;

    match subcommand {
        ConfigSubcommand::Show { config } => {
            let cfg = CoordinatorConfig::load(config.as_deref())?;
            println!("{}", toml::to_string_pretty(&cfg)?);
        }
        ConfigSubcommand::Init { path, force } => {
            let written = config::init_config(path.as_deref(), force)?;
            println!("Configuration written to {}", written.display());
        }
        ConfigSubcommand::Validate { config } => match CoordinatorConfig::load(config.as_deref()) {
            Ok(_) => {
                println!("Configuration is valid.");
            }
            Err(e) => exit_with(e),
        },
    }

    Ok(())
}
