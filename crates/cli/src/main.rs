//! CLI entrypoint and subcommand orchestration.

mod config;
#[cfg(test)]
mod test_support;

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use channels::default_chain;
use clap::{Parser, Subcommand};
use engine::{DeliveryStore, FallbackEngine, RecipientDirectory, SqliteStore};
use proto::{DeliveryRecord, Recipient, RecipientId};
use tokio::sync::mpsc;
use tracing::{error, info};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, Layer, fmt, layer::SubscriberExt, util::SubscriberInitExt};
use worker::{DeliveryTask, RetryEnvelope, TaskOutcome, TaskQueue, Worker};

use crate::config::Config;

/// Top-level command-line arguments for notify-relay.
#[derive(Parser)]
#[command(name = "notify-relay")]
#[command(about = "Multi-channel notification delivery with ordered fallback", version)]
struct Cli {
    /// Path to config file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Also write daily-rotated debug logs into this directory
    #[arg(long)]
    log_file_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Deliver one notification through the channel chain
    Send {
        /// Recipient ID
        #[arg(short, long)]
        recipient: String,

        /// Subject line
        #[arg(short, long)]
        subject: String,

        /// Message body
        #[arg(short, long)]
        message: String,

        /// Run through the task queue with bounded retries
        #[arg(long, default_value_t = false)]
        background: bool,
    },

    /// Show recent delivery records
    History {
        #[arg(short = 'n', long, default_value_t = 20)]
        limit: usize,
    },

    /// Manage recipients
    Recipient {
        #[command(subcommand)]
        command: RecipientCommands,
    },
}

#[derive(Subcommand)]
enum RecipientCommands {
    /// Add or replace a recipient's contact details
    Add {
        #[arg(long)]
        id: String,
        #[arg(long)]
        username: String,
        #[arg(long)]
        email: Option<String>,
        #[arg(long)]
        phone: Option<String>,
        /// Telegram chat ID
        #[arg(long)]
        chat_id: Option<String>,
    },
}

#[tokio::main]
/// Program entrypoint.
async fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();

    // WorkerGuard must outlive main() so buffered file writes are flushed on exit.
    let _file_guard = init_tracing(&cli.log_level, cli.log_file_dir.as_deref());

    let config = Config::load(cli.config.as_deref()).context("Failed to load config")?;

    match cli.command {
        Commands::Send {
            recipient,
            subject,
            message,
            background,
        } => {
            let recipient_id = RecipientId::from(recipient);
            if background {
                cmd_send_background(config, recipient_id, subject, message).await
            } else {
                cmd_send(config, recipient_id, subject, message).await
            }
        }
        Commands::History { limit } => cmd_history(config, limit).await,
        Commands::Recipient { command } => match command {
            RecipientCommands::Add {
                id,
                username,
                email,
                phone,
                chat_id,
            } => {
                let recipient = Recipient {
                    id: RecipientId::from(id),
                    username,
                    email,
                    phone_number: phone,
                    chat_id,
                };
                cmd_recipient_add(config, recipient).await
            }
        },
    }
}

/// Console logs go to stderr so stdout carries only command output.
fn init_tracing(log_level: &str, log_file_dir: Option<&Path>) -> Option<WorkerGuard> {
    let console_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));
    let console = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_filter(console_filter);

    let Some(dir) = log_file_dir else {
        tracing_subscriber::registry().with(console).init();
        return None;
    };

    std::fs::create_dir_all(dir).ok();
    let appender = tracing_appender::rolling::daily(dir, "notify-relay.log");
    let (writer, guard) = tracing_appender::non_blocking(appender);
    let file = fmt::layer()
        .with_writer(writer)
        .with_target(true)
        .with_ansi(false)
        .with_filter(EnvFilter::new(
            "debug,hyper_util=info,rustls=info,reqwest=info,sqlx=info,lettre=info",
        ));
    tracing_subscriber::registry()
        .with(console)
        .with(file)
        .init();
    info!(
        version = env!("CARGO_PKG_VERSION"),
        log_dir = %dir.display(),
        "========== notify-relay start =========="
    );
    Some(guard)
}

async fn open_store(config: &Config) -> anyhow::Result<Arc<SqliteStore>> {
    let store = SqliteStore::open(&config.database.url)
        .await
        .with_context(|| format!("Failed to open database {}", config.database.url))?;
    Ok(Arc::new(store))
}

fn build_engine(config: &Config, store: Arc<SqliteStore>) -> FallbackEngine {
    FallbackEngine::with_system_clock(default_chain(&config.channels), store)
}

/// Runs the engine once in the foreground and prints the report.
async fn cmd_send(
    config: Config,
    recipient_id: RecipientId,
    subject: String,
    message: String,
) -> anyhow::Result<ExitCode> {
    let store = open_store(&config).await?;
    let recipient = store
        .find(&recipient_id)
        .await?
        .with_context(|| format!("Recipient {recipient_id} not found"))?;

    let engine = build_engine(&config, Arc::clone(&store));
    let delivery = engine.deliver(&recipient, &subject, &message).await?;

    println!("{}", serde_json::to_string_pretty(&delivery.report)?);
    Ok(exit_code(delivery.report.success))
}

/// Pushes the notification through the queue and waits for a terminal outcome.
async fn cmd_send_background(
    config: Config,
    recipient_id: RecipientId,
    subject: String,
    message: String,
) -> anyhow::Result<ExitCode> {
    let store = open_store(&config).await?;
    let engine = Arc::new(build_engine(&config, Arc::clone(&store)));
    let (queue, tasks) = TaskQueue::new(config.worker.queue_capacity);
    let envelope = Arc::new(RetryEnvelope::new(
        engine,
        store,
        Arc::new(queue.clone()),
        config.retry.to_policy(),
    ));
    let (outcome_tx, mut outcome_rx) = mpsc::channel(config.worker.queue_capacity.max(1));
    let worker =
        tokio::spawn(Worker::new(envelope, config.worker.concurrency).run(tasks, outcome_tx));

    queue
        .enqueue(DeliveryTask::new(recipient_id, subject, message))
        .await?;

    let outcome = loop {
        match outcome_rx.recv().await {
            Some(outcome) if outcome.is_terminal() => break outcome,
            Some(outcome) => println!("{}", serde_json::to_string(&outcome)?),
            None => {
                error!("Worker stopped before the task finished");
                anyhow::bail!("Worker stopped before the task finished");
            }
        }
    };
    worker.abort();

    println!("{}", serde_json::to_string_pretty(&outcome)?);
    Ok(exit_code(matches!(outcome, TaskOutcome::Completed { .. })))
}

async fn cmd_history(config: Config, limit: usize) -> anyhow::Result<ExitCode> {
    let store = open_store(&config).await?;
    let records = store.list_recent(limit).await?;
    if records.is_empty() {
        println!("No deliveries yet.");
    }
    for record in &records {
        println!("{}", format_history_line(record));
    }
    Ok(ExitCode::SUCCESS)
}

async fn cmd_recipient_add(config: Config, recipient: Recipient) -> anyhow::Result<ExitCode> {
    let store = open_store(&config).await?;
    store.upsert_recipient(&recipient).await?;
    println!("Saved recipient {} ({})", recipient.id, recipient.username);
    Ok(ExitCode::SUCCESS)
}

fn format_history_line(record: &DeliveryRecord) -> String {
    format!(
        "{}  {}  {:<7}  {:<5}  {}  {}",
        record.created_at.format("%Y-%m-%d %H:%M:%S"),
        record.id,
        record.status.to_string(),
        record.sent_via.as_deref().unwrap_or("-"),
        record.recipient_id,
        record.subject
    )
}

fn exit_code(delivered: bool) -> ExitCode {
    if delivered {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}
