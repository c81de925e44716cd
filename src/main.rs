use clap::Parser;
use jsonwebtoken::Algorithm;
use miette::{IntoDiagnostic, Result};
use payledger::application::service::PaymentService;
use payledger::clock::{ClockRef, SystemClock};
use payledger::config::AppConfig;
use payledger::domain::ports::{IdentityStoreBox, PaymentStoreBox};
use payledger::infrastructure::broker::InMemoryBroker;
use payledger::infrastructure::in_memory::{InMemoryIdentityStore, InMemoryPaymentStore};
#[cfg(feature = "storage-rocksdb")]
use payledger::infrastructure::rocksdb::RocksDBStore;
use payledger::interfaces::csv::command_reader::CommandReader;
use payledger::interfaces::csv::payment_writer::PaymentWriter;
use payledger::interfaces::csv::replay::Replayer;
use std::fs::File;
use std::io::{self, IsTerminal};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Input commands CSV file
    input: PathBuf,

    /// Path to persistent database (optional). If provided, uses RocksDB.
    #[cfg(feature = "storage-rocksdb")]
    #[arg(long)]
    db_path: Option<PathBuf>,

    /// Shared secret used to sign and verify bearer tokens
    #[arg(long, env = "JWT_SECRET_KEY", default_value = "jwt-secret-key", hide_env_values = true)]
    jwt_secret: String,

    #[arg(long, env = "JWT_ALGORITHM", default_value = "HS256")]
    jwt_algorithm: String,

    /// Publish payment events to the in-process broker
    #[arg(long, env = "RABBITMQ_ENABLED")]
    publish_events: bool,

    #[arg(long, env = "RABBITMQ_EXCHANGE", default_value = "payments")]
    exchange: String,

    #[arg(long, env = "RABBITMQ_QUEUE", default_value = "payment_events")]
    queue: String,

    /// Reject callers whose token does not mark them as verified
    #[arg(long)]
    require_verified: bool,
}

impl Cli {
    fn app_config(&self, algorithm: Algorithm) -> AppConfig {
        let mut config = AppConfig::default();
        config.auth.secret = self.jwt_secret.clone();
        config.auth.algorithms = vec![algorithm];
        config.auth.require_verified = self.require_verified;
        config.publisher.enabled = self.publish_events;
        config.publisher.exchange = self.exchange.clone();
        config.publisher.queue = self.queue.clone();
        config
    }

    #[cfg(feature = "storage-rocksdb")]
    fn stores(&self) -> Result<(IdentityStoreBox, PaymentStoreBox)> {
        match &self.db_path {
            Some(db_path) => {
                let store = RocksDBStore::open(db_path).into_diagnostic()?;
                let identities: IdentityStoreBox = Box::new(store.clone());
                let payments: PaymentStoreBox = Box::new(store);
                Ok((identities, payments))
            }
            None => Ok(in_memory_stores()),
        }
    }

    #[cfg(not(feature = "storage-rocksdb"))]
    fn stores(&self) -> Result<(IdentityStoreBox, PaymentStoreBox)> {
        Ok(in_memory_stores())
    }
}

fn in_memory_stores() -> (IdentityStoreBox, PaymentStoreBox) {
    let identities: IdentityStoreBox = Box::new(InMemoryIdentityStore::new());
    let payments: PaymentStoreBox = Box::new(InMemoryPaymentStore::new());
    (identities, payments)
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(io::stderr)
                .with_ansi(io::stderr().is_terminal()),
        )
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    let algorithm: Algorithm = cli.jwt_algorithm.parse().into_diagnostic()?;
    let config = cli.app_config(algorithm);
    let (identities, payments) = cli.stores()?;
    let broker = InMemoryBroker::new();
    let clock: ClockRef = Arc::new(SystemClock);

    let service = PaymentService::from_config(
        &config,
        identities,
        payments,
        Box::new(broker.clone()),
        clock.clone(),
    );
    let mut replayer = Replayer::new(service, config.auth.secret.clone(), algorithm, clock);

    // Replay commands
    let file = File::open(&cli.input).into_diagnostic()?;
    let reader = CommandReader::new(file);
    for command_result in reader.commands() {
        match command_result {
            Ok(command) => {
                if let Err(e) = replayer.apply(command).await {
                    warn!(error = %e, "Error processing command");
                }
            }
            Err(e) => {
                error!(error = %e, "Error reading command");
            }
        }
    }

    let failed = replayer.service().reconcile_stale().await.into_diagnostic()?;
    if !failed.is_empty() {
        warn!(count = failed.len(), "Failed payments stuck in processing");
    }
    if replayer.service().publisher().is_enabled() {
        info!(
            queue = %config.publisher.queue,
            pending = broker.queue_len(&config.publisher.queue),
            "Events queued"
        );
    }

    // Output final state
    let rows = replayer.snapshot().await.into_diagnostic()?;
    replayer.service().shutdown().await;

    let stdout = io::stdout();
    let mut writer = PaymentWriter::new(stdout.lock());
    writer
        .write_payments(rows.iter().map(|(subject, payment)| (subject.as_str(), payment)))
        .into_diagnostic()?;

    Ok(())
}
