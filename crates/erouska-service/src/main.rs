//! eRouska Service - BLE advertising and proximity scanning.
//!
//! Run with: `cargo run -p erouska-service`

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::info;

use erouska_core::util::random_buid;
use erouska_core::{BluetoothRepository, PlatformRadio, RecordSink};
use erouska_service::receivers::{spawn_ctrl_c, spawn_state_poller, spawn_stdin_control};
use erouska_service::{Config, CovidService, HostMonitor, ServiceCommand, ServiceOptions, StoreSink};
use erouska_store::{RecordQuery, Store};

/// eRouska Service - BLE advertising and proximity scanning.
#[derive(Parser, Debug)]
#[command(name = "erouska-service")]
#[command(version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Option<Command>,

    /// Path to configuration file.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Database path (overrides config).
    #[arg(short, long, global = true)]
    database: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the service in the foreground (default behavior).
    Run {
        /// Start with the scan filter on.
        #[arg(long)]
        scan_filter: bool,

        /// Ignore standard input.
        #[arg(long)]
        no_stdin: bool,
    },

    /// Print the most recent stored scan results.
    Records {
        /// Number of records to print.
        #[arg(short = 'n', long, default_value_t = 20)]
        limit: u32,
    },

    /// Check the configuration file and print the effective settings.
    CheckConfig,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("erouska_service=info".parse()?)
                .add_directive("erouska_core=info".parse()?),
        )
        .init();

    let mut config = match &args.config {
        Some(path) => Config::load(path)?,
        None => Config::load_default()?,
    };
    if let Some(db_path) = args.database {
        config.storage.path = db_path;
    }

    match args.command {
        Some(Command::CheckConfig) => check_config(&config),
        Some(Command::Records { limit }) => print_records(&config, limit),
        Some(Command::Run {
            scan_filter,
            no_stdin,
        }) => {
            config.scanning.use_scan_filter |= scan_filter;
            config.receivers.stdin_control &= !no_stdin;
            run_service(config).await
        }
        None => run_service(config).await,
    }
}

fn check_config(config: &Config) -> anyhow::Result<()> {
    config.validate()?;
    println!("{}", toml::to_string_pretty(config)?);
    Ok(())
}

fn print_records(config: &Config, limit: u32) -> anyhow::Result<()> {
    let store = Store::open(&config.storage.path)?;
    let records = store.query_records(&RecordQuery::new().limit(limit))?;
    if records.is_empty() {
        println!("No scan results stored");
    }
    for record in records {
        println!("{}", record.to_record());
    }
    Ok(())
}

async fn run_service(config: Config) -> anyhow::Result<()> {
    config.validate()?;

    let store = Store::open(&config.storage.path)?;
    let sink = StoreSink::new(store, config.storage.retention());

    let radio = Arc::new(PlatformRadio::new().await?);
    let record_sink: Arc<dyn RecordSink> = Arc::new(sink.clone());
    let repo = BluetoothRepository::new(radio, record_sink, config.repository_options());

    let buid = config.device.buid.unwrap_or_else(|| {
        let buid = random_buid();
        info!("No BUID configured, generated {}", buid);
        buid
    });

    let monitor = Arc::new(HostMonitor::new(&config.location));
    let service = Arc::new(
        CovidService::new(
            Arc::clone(&repo),
            monitor.clone(),
            buid,
            ServiceOptions::from_config(&config),
        )
        .with_retention(sink),
    );

    let (tx, rx) = mpsc::channel(16);
    let cancel = CancellationToken::new();
    let receivers = vec![
        spawn_state_poller(
            repo,
            monitor,
            config.receivers.poll_interval(),
            tx.clone(),
            cancel.clone(),
        ),
        spawn_ctrl_c(tx.clone(), cancel.clone()),
    ];
    if config.receivers.stdin_control {
        spawn_stdin_control(tx.clone());
    }

    tx.send(ServiceCommand::Start).await?;
    drop(tx);
    service.run(rx).await;

    cancel.cancel();
    for receiver in receivers {
        let _ = receiver.await;
    }
    info!("eRouska service stopped");
    Ok(())
}
