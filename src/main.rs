//! kafka-fleet-scan CLI
//!
//! Discovers MSK clusters through the AWS control plane and scans their
//! brokers, keeping the results in a JSON state file.

use std::io::BufRead;
use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn, Level};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use kafka_fleet_scan::config::{EngineConfig, LoggingConfig};
use kafka_fleet_scan::infrastructure::kafka::AdminConnectionFactory;
use kafka_fleet_scan::infrastructure::msk::MskControlPlaneFactory;
use kafka_fleet_scan::infrastructure::persistence::credentials_store::CredentialsStore;
use kafka_fleet_scan::infrastructure::persistence::keyring_secret_repository::{
    KeyringSecretRepository, SecretRepository,
};
use kafka_fleet_scan::infrastructure::persistence::state_store::StateStore;
use kafka_fleet_scan::usecase::discovery_usecase::DiscoveryUsecase;
use kafka_fleet_scan::usecase::scan_usecase::ClusterScanOrchestrator;

/// Inventory of Amazon MSK clusters across regions.
#[derive(Parser)]
#[command(name = "kafka-fleet-scan")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to an optional YAML configuration file.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// JSON file holding discovered clusters and scan results.
    #[arg(long, global = true, default_value = "kafka-fleet-state.json")]
    state_file: PathBuf,

    /// YAML file holding per-cluster authentication settings.
    #[arg(long, global = true, default_value = "kafka-fleet-credentials.yaml")]
    credentials_file: PathBuf,

    /// Increase logging verbosity (-v for debug, -vv for trace).
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Record every MSK cluster visible in the given regions.
    Discover {
        #[arg(long = "region", required = true, num_args = 1..)]
        regions: Vec<String>,
    },
    /// Connect to discovered clusters and record topics, ACLs and connectors.
    Scan {
        /// Limit the scan to these regions. Defaults to all discovered regions.
        #[arg(long = "region", num_args = 1..)]
        regions: Vec<String>,
    },
    /// Store a SASL/SCRAM password in the OS keyring.
    SetPassword {
        #[arg(long)]
        cluster_arn: String,

        /// Read from stdin when omitted.
        #[arg(long)]
        password: Option<String>,
    },
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => EngineConfig::from_file(path)?,
        None => EngineConfig::default(),
    };

    let log_config = match args.verbose {
        0 => config.logging.clone(),
        1 => LoggingConfig {
            level: "debug".to_string(),
            ..config.logging.clone()
        },
        _ => LoggingConfig {
            level: "trace".to_string(),
            ..config.logging.clone()
        },
    };
    setup_tracing(&log_config);

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    runtime.block_on(async move { run(args, config).await })
}

fn setup_tracing(config: &LoggingConfig) {
    let level = match config.level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let filter = EnvFilter::builder()
        .with_default_directive(level.into())
        .from_env_lossy();

    let subscriber = tracing_subscriber::registry().with(filter);

    if config.json {
        subscriber.with(fmt::layer().json()).init();
    } else {
        subscriber.with(fmt::layer()).init();
    }
}

async fn run(args: Args, config: EngineConfig) -> anyhow::Result<()> {
    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        warn!("shutdown signal received, finishing the current cluster");
        on_signal.cancel();
    });

    match args.command {
        Command::Discover { regions } => {
            let state_store = StateStore::new(&args.state_file, &config.state);
            let credentials_store = CredentialsStore::new(&args.credentials_file);
            let _lock = state_store.lock()?;

            let mut state = state_store.load()?;
            let mut credentials = credentials_store.load()?;

            let factory = MskControlPlaneFactory::new(config.control_plane.clone(), cancel.clone());
            let report = DiscoveryUsecase::new(&factory, cancel)
                .discover(&regions, &mut state, &mut credentials)
                .await;

            state_store.save_with_retry(&state).await?;
            credentials_store.save(&credentials)?;
            info!(
                clusters = state.cluster_count(),
                state_file = %args.state_file.display(),
                credentials_file = %args.credentials_file.display(),
                "discovery saved"
            );
            if report.cancelled {
                anyhow::bail!("discovery interrupted; partial results were saved");
            }
        }
        Command::Scan { regions } => {
            let state_store = StateStore::new(&args.state_file, &config.state);
            let credentials_store = CredentialsStore::new(&args.credentials_file);
            let _lock = state_store.lock()?;

            let mut state = state_store.load()?;
            let credentials = credentials_store.load()?;

            let connector = AdminConnectionFactory::new(config.network.clone(), config.scan.clone());
            let secrets = KeyringSecretRepository::default();
            let report = ClusterScanOrchestrator::new(&connector, cancel)
                .with_secrets(&secrets)
                .scan(&mut state, &credentials, &regions)
                .await;

            state_store.save_with_retry(&state).await?;
            info!(
                scanned = report.scanned,
                failed = report.failed,
                state_file = %args.state_file.display(),
                "scan saved"
            );
            if report.cancelled {
                anyhow::bail!("scan interrupted; partial results were saved");
            }
        }
        Command::SetPassword {
            cluster_arn,
            password,
        } => {
            let password = match password {
                Some(password) => password,
                None => {
                    let mut line = String::new();
                    std::io::stdin()
                        .lock()
                        .read_line(&mut line)
                        .context("failed to read password from stdin")?;
                    line.trim_end_matches(['\r', '\n']).to_string()
                }
            };
            if password.is_empty() {
                anyhow::bail!("password must not be empty");
            }
            KeyringSecretRepository::default().save_password(&cluster_arn, &password)?;
            info!(cluster = %cluster_arn, "password stored in keyring");
        }
    }

    Ok(())
}

/// Resolves on Ctrl-C or, on unix, SIGTERM. A signal whose handler cannot be
/// installed never fires.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "cannot listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "cannot listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
}
