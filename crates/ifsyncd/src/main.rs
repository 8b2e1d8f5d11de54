//! Interface Synchronization Daemon
//!
//! Main entry point for the ifsyncd daemon.
//! Seeds the datastore from kernel state, then applies datastore changes to
//! the UCI network package and answers operational queries.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use ifsyncd::{
    ChangeOutcome, DatastoreMessage, DatastoreSubscription, IfsyncConfig, KernelStateReader,
    OperationalProvider, PersistentStore, RedisDatastore, ReconciliationEngine, ServiceRestarter,
};
use serde_json::json;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

/// Interface synchronization daemon
#[derive(Parser, Debug)]
#[command(name = "ifsyncd")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file
    #[arg(short = 'c', long, default_value = ifsyncd::config_file::DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Log filter (trace, debug, info, warn, error or a RUST_LOG directive)
    #[arg(short = 'l', long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq)]
enum Command {
    /// Run the daemon (default)
    Run,
    /// Print kernel interfaces and the neighbor table as JSON
    Show,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(&args.log_level)?;

    let config = IfsyncConfig::load_or_default(&args.config)
        .with_context(|| format!("loading {}", args.config.display()))?;

    match args.command.unwrap_or(Command::Run) {
        Command::Run => run_daemon(config).await,
        Command::Show => show_kernel_state(),
    }
}

/// Initialize structured logging. `RUST_LOG` wins over `--log-level`.
fn init_logging(log_level: &str) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .compact()
        .try_init()
        .map_err(|e| anyhow::anyhow!("failed to set logger: {}", e))
}

fn show_kernel_state() -> Result<()> {
    let mut kernel = KernelStateReader::netlink();
    let state = json!({
        "interfaces": kernel.links(),
        "neighbors": kernel.neighbor_table(),
    });
    println!("{}", serde_json::to_string_pretty(&state)?);
    Ok(())
}

async fn run_daemon(config: IfsyncConfig) -> Result<()> {
    info!("ifsyncd: Starting interface synchronization daemon");

    // Without a datastore session there is nothing to reconcile against.
    let datastore = Arc::new(
        RedisDatastore::connect(&config.datastore)
            .await
            .context("connecting to datastore")?,
    );

    let store = PersistentStore::new(
        &config.store.config_dir,
        &config.store.package,
        &config.store.ifname_option,
    );
    let restarter = Arc::new(ServiceRestarter::new(&config.restart.command));
    let mut engine = ReconciliationEngine::new(
        store,
        datastore.clone(),
        restarter,
        config.restart_delay(),
    );

    let mut kernel = KernelStateReader::netlink();
    let report = engine.startup(&mut kernel).await;
    let failed = report.pushed.iter().filter(|o| o.is_failure()).count();
    if failed > 0 {
        warn!(failed, "ifsyncd: Datastore seeding had failures");
    }

    let provider = OperationalProvider::with_shell(config.probes.clone());
    let mut subscription = DatastoreSubscription::connect(&config.datastore)
        .await
        .context("subscribing to datastore channels")?;
    info!("ifsyncd: Listening for datastore changes");

    loop {
        let message = tokio::select! {
            _ = signal::ctrl_c() => {
                info!("ifsyncd: Received shutdown signal");
                break;
            }
            message = subscription.next_message() => message,
        };

        let Some(message) = message else {
            error!("ifsyncd: Datastore subscription closed");
            anyhow::bail!("datastore subscription closed");
        };

        // Messages are handled one at a time, in arrival order.
        match message {
            DatastoreMessage::Change(event) => match engine.on_change(event).await {
                ChangeOutcome::Applied(report) => {
                    let failures = report.failures().count();
                    info!(
                        event = event.as_str(),
                        failures,
                        restart_scheduled = report.restart_scheduled,
                        "ifsyncd: Change processed"
                    );
                }
                outcome => debug!(event = event.as_str(), ?outcome, "ifsyncd: Change processed"),
            },
            DatastoreMessage::UnknownChange(kind) => {
                warn!(kind = %kind, "ifsyncd: Ignoring unrecognized change event");
            }
            DatastoreMessage::OperationalRequest(query) => {
                let values = provider.provide(&query, engine.registry()).await;
                debug!(
                    query = %query,
                    count = values.len(),
                    "ifsyncd: Answering operational query"
                );
                if let Err(e) = datastore.publish_operational(&values).await {
                    warn!(
                        query = %query,
                        error = %e,
                        "ifsyncd: Failed to publish operational data"
                    );
                }
            }
            DatastoreMessage::Other { channel } => {
                debug!(channel = %channel, "ifsyncd: Ignoring message");
            }
        }
    }

    info!("ifsyncd: Graceful shutdown complete");
    Ok(())
}
