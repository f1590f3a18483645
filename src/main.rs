//! rpc-guard CLI
//!
//! Offline tooling for guard configurations.
//!
//! ```text
//! rpc-guard validate guard.toml
//!     → load + validate, list every violation
//!
//! rpc-guard resolve guard.toml billing.Ledger/Charge --attr x-tenant-id=acme
//!     → matched rule, partition key and effective policy as JSON
//!
//! rpc-guard watch guard.toml
//!     → logging + metrics endpoint, hot reload, idle-key sweeper until Ctrl+C
//! ```

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use serde_json::json;

use rpc_guard::config::{load_config, spawn_reloader, ConfigError, ConfigWatcher, SnapshotHandle};
use rpc_guard::context::RequestContext;
use rpc_guard::observability::{logging, metrics};
use rpc_guard::{key, Guard};

#[derive(Parser)]
#[command(name = "rpc-guard")]
#[command(about = "Rate limiting and circuit breaking policies for RPC services", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate a configuration file
    Validate {
        config: PathBuf,
    },
    /// Show the policy and partition key a call would get
    Resolve {
        config: PathBuf,
        /// Method identity, e.g. `billing.Ledger/Charge`
        method: String,
        /// Context attribute as `name=value` (repeatable)
        #[arg(long = "attr", value_parser = parse_attribute)]
        attributes: Vec<(String, String)>,
    },
    /// Watch a configuration file and apply changes as they land
    Watch {
        config: PathBuf,
    },
}

fn parse_attribute(raw: &str) -> Result<(String, String), String> {
    raw.split_once('=')
        .map(|(name, value)| (name.trim().to_string(), value.to_string()))
        .filter(|(name, _)| !name.is_empty())
        .ok_or_else(|| format!("expected name=value, got `{raw}`"))
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Validate { config } => validate(&config),
        Commands::Resolve {
            config,
            method,
            attributes,
        } => resolve(&config, &method, attributes),
        Commands::Watch { config } => watch(config).await,
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            report(e.as_ref());
            ExitCode::FAILURE
        }
    }
}

fn report(error: &(dyn std::error::Error + 'static)) {
    match error.downcast_ref::<ConfigError>() {
        Some(ConfigError::Validation(errors)) => {
            eprintln!("Error: configuration is invalid ({} problems)", errors.len());
            for e in errors {
                eprintln!("  - {e}");
            }
        }
        _ => eprintln!("Error: {error}"),
    }
}

fn validate(path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let config = load_config(path)?;
    println!(
        "{}: ok ({} policies)",
        path.display(),
        config.policies.len()
    );
    Ok(())
}

fn resolve(
    path: &Path,
    method: &str,
    attributes: Vec<(String, String)>,
) -> Result<(), Box<dyn std::error::Error>> {
    let config = load_config(path)?;
    let snapshot = SnapshotHandle::new(config).map_err(ConfigError::Validation)?;

    let mut ctx = RequestContext::new();
    for (name, value) in attributes {
        ctx.insert(name, value);
    }

    let current = snapshot.load();
    let (key, policy) = key::extract(&current, method, &ctx);
    let output = json!({
        "method": key::normalize_method(method),
        "key": key.as_str(),
        "tenant": key.tenant(),
        "policy": &*policy,
    });
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

async fn watch(path: PathBuf) -> Result<(), Box<dyn std::error::Error>> {
    let config = load_config(&path)?;
    logging::init_logging(&config.observability)?;

    tracing::info!("rpc-guard v{} starting", env!("CARGO_PKG_VERSION"));

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::install_prometheus(addr)?,
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    tracing::info!(
        policies = config.policies.len(),
        rate_limit = config.rate_limit.enabled,
        circuit_breaker = config.circuit_breaker.enabled,
        "Configuration loaded"
    );

    let snapshot = SnapshotHandle::new(config).map_err(ConfigError::Validation)?;
    let guard = Guard::new(snapshot.clone());

    let (watcher, updates) = ConfigWatcher::new(&path);
    let _watcher = watcher.run()?;
    let reloader = spawn_reloader(updates, snapshot);
    let sweeper = guard.sweeper().spawn();

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutdown signal received");

    sweeper.shutdown().await;
    reloader.abort();

    tracing::info!("Shutdown complete");
    Ok(())
}
