use chrono::Utc;
use clap::{Args, Parser, Subcommand};
use loyalty_engine::application::calculator::CashbackCalculator;
use loyalty_engine::application::pipeline::{EventResult, LoyaltyPipeline};
use loyalty_engine::application::progression::ProgressionEngine;
use loyalty_engine::application::queue::PurchaseEventQueue;
use loyalty_engine::application::settlement::SettlementService;
use loyalty_engine::config::LoyaltyConfig;
use loyalty_engine::domain::ports::{
    CashbackStore, CashbackStoreRef, LoyaltyStoreRef, NotificationSinkRef,
};
use loyalty_engine::domain::purchase::PurchaseEvent;
use loyalty_engine::infrastructure::gateway::MockPaymentGateway;
use loyalty_engine::infrastructure::in_memory::{
    InMemoryCashbackStore, InMemoryLoyaltyStore, InMemoryUserDirectory,
};
use loyalty_engine::infrastructure::notifier::TracingNotifier;
#[cfg(feature = "storage-rocksdb")]
use loyalty_engine::infrastructure::rocksdb::RocksDBStore;
use loyalty_engine::interfaces::csv::cashback_writer::CashbackWriter;
use loyalty_engine::interfaces::csv::purchase_reader::PurchaseReader;
use loyalty_engine::interfaces::csv::user_reader::UserReader;
use miette::{IntoDiagnostic, Result};
use rust_decimal::Decimal;
use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Append one purchase event to a journal-backed queue
    Enqueue {
        /// Queue journal file
        #[arg(long)]
        journal: PathBuf,
        #[arg(long)]
        user: u64,
        #[arg(long)]
        amount: Decimal,
        #[arg(long)]
        currency: Option<String>,
        /// Payment method, e.g. card or transfer
        #[arg(long)]
        method: Option<String>,
    },
    /// Process purchase events and print the resulting cashbacks as CSV
    Process {
        /// Input purchase events CSV file
        input: PathBuf,
        /// Queue journal file; journaled events are processed first
        #[arg(long)]
        journal: Option<PathBuf>,
        #[command(flatten)]
        runtime: RuntimeArgs,
        /// Retry rounds to run after the queue has been drained
        #[arg(long, default_value_t = 0)]
        retry_rounds: u32,
    },
    /// Run one retry round over failed cashbacks
    Retry {
        #[command(flatten)]
        runtime: RuntimeArgs,
    },
}

#[derive(Args)]
struct RuntimeArgs {
    /// Users CSV file (id,name,email)
    #[arg(long)]
    users: Option<PathBuf>,

    /// JSON configuration file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Path to persistent database (optional). If provided, uses RocksDB.
    #[arg(long)]
    db_path: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(io::stderr))
        .init();

    let cli = Cli::parse();
    match cli.command {
        Command::Enqueue {
            journal,
            user,
            amount,
            currency,
            method,
        } => {
            let queue = PurchaseEventQueue::with_journal(journal).await?;
            let mut event = PurchaseEvent::new(user, amount);
            if let Some(currency) = currency {
                event = event.with_currency(&currency);
            }
            if let Some(method) = method {
                event = event.with_payment_method(&method);
            }
            queue.enqueue(event).await?;
            info!(pending = queue.size().await, "Test purchase event queued");
        }
        Command::Process {
            input,
            journal,
            runtime,
            retry_rounds,
        } => {
            let queue = match journal {
                Some(path) => PurchaseEventQueue::with_journal(path).await?,
                None => PurchaseEventQueue::new(),
            };
            let (pipeline, cashbacks) = build_pipeline(&runtime, Arc::new(queue))?;

            let file = File::open(input).into_diagnostic()?;
            for event in PurchaseReader::new(file).events() {
                match event {
                    Ok(event) => pipeline.submit_purchase_event(event).await?,
                    Err(e) => error!(error = %e, "Error reading purchase event"),
                }
            }

            for result in pipeline.drain_and_process().await? {
                let failure = match result {
                    EventResult::Failed(failure) => failure,
                    EventResult::Processed(processed) => match processed.cashback {
                        Ok(_) => continue,
                        Err(failure) => failure,
                    },
                };
                eprintln!("{}", serde_json::to_string(&failure).into_diagnostic()?);
            }

            for _ in 0..retry_rounds {
                pipeline
                    .settlement()
                    .process_due_retries(Utc::now())
                    .await?;
            }

            write_cashbacks(&cashbacks).await?;
        }
        Command::Retry { runtime } => {
            let (pipeline, cashbacks) =
                build_pipeline(&runtime, Arc::new(PurchaseEventQueue::new()))?;
            pipeline
                .settlement()
                .process_due_retries(Utc::now())
                .await?;
            write_cashbacks(&cashbacks).await?;
        }
    }

    Ok(())
}

fn build_pipeline(
    runtime: &RuntimeArgs,
    queue: Arc<PurchaseEventQueue>,
) -> Result<(LoyaltyPipeline, CashbackStoreRef)> {
    let config = LoyaltyConfig::load(runtime.config.as_deref())?;
    let users = Arc::new(load_users(runtime.users.as_deref())?);
    let (loyalty_store, cashback_store) = open_stores(runtime.db_path.as_deref())?;
    let notifier: NotificationSinkRef = Arc::new(TracingNotifier);

    let engine = ProgressionEngine::new(
        users.clone(),
        loyalty_store,
        Arc::new(config.catalog.clone()),
        notifier.clone(),
        config.cashback.default_currency.clone(),
    );
    let settlement = SettlementService::new(
        CashbackCalculator::new(config.cashback.clone()),
        cashback_store.clone(),
        Arc::new(MockPaymentGateway::new(config.gateway.clone())),
        users,
        notifier,
        config.retry.clone(),
        Duration::from_millis(config.gateway.timeout_ms),
    );

    Ok((LoyaltyPipeline::new(queue, engine, settlement), cashback_store))
}

fn load_users(path: Option<&Path>) -> Result<InMemoryUserDirectory> {
    let Some(path) = path else {
        warn!("No users file given, every purchase event will fail with user_not_found");
        return Ok(InMemoryUserDirectory::new());
    };
    let file = File::open(path).into_diagnostic()?;
    let users = UserReader::new(file)
        .users()
        .collect::<loyalty_engine::error::Result<Vec<_>>>()?;
    info!(count = users.len(), "Users loaded");
    Ok(InMemoryUserDirectory::with_users(users))
}

fn open_stores(db_path: Option<&Path>) -> Result<(LoyaltyStoreRef, CashbackStoreRef)> {
    match db_path {
        #[cfg(feature = "storage-rocksdb")]
        Some(path) => {
            let store = RocksDBStore::open(path)?;
            Ok((Arc::new(store.clone()), Arc::new(store)))
        }
        #[cfg(not(feature = "storage-rocksdb"))]
        Some(path) => {
            warn!(
                db_path = %path.display(),
                "Built without storage-rocksdb, falling back to in-memory storage"
            );
            Ok(in_memory_stores())
        }
        None => Ok(in_memory_stores()),
    }
}

fn in_memory_stores() -> (LoyaltyStoreRef, CashbackStoreRef) {
    (
        Arc::new(InMemoryLoyaltyStore::new()),
        Arc::new(InMemoryCashbackStore::new()),
    )
}

async fn write_cashbacks(cashbacks: &CashbackStoreRef) -> Result<()> {
    let records = cashbacks.all().await?;
    let stdout = io::stdout();
    let mut writer = CashbackWriter::new(stdout.lock());
    writer.write_cashbacks(&records)?;
    Ok(())
}
