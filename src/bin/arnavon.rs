//! # Arnavon CLI
//!
//! Runs consumers and inspects or repairs queues.

use std::path::PathBuf;
use std::process;

use arnavon_core::config::ConfigManager;
use arnavon_core::consumer::Consumer;
use arnavon_core::context::AppContext;
use arnavon_core::logging::init_structured_logging;
use arnavon_core::messaging::RequeueOptions;
use arnavon_core::Result;
use clap::{Parser, Subcommand};
use tokio::signal::unix::{signal, SignalKind};
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "arnavon")]
#[command(about = "Job queue consumers and queue administration")]
#[command(version = env!("CARGO_PKG_VERSION"))]
pub struct Cli {
    /// Configuration file
    #[arg(short, long, global = true, default_value = "arnavon.yml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start every configured consumer
    Consumer {
        /// Status endpoint port, overrides the configuration
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Queue administration
    Queues {
        #[command(subcommand)]
        command: QueueCommands,
    },
}

#[derive(Subcommand)]
pub enum QueueCommands {
    /// Message and consumer counts of every topology queue
    Status,

    /// Move messages from a dead-letter queue back to a work queue
    Requeue {
        /// Source queue
        queue: String,

        /// Destination queue
        #[arg(long)]
        to: String,

        /// Number of messages to move, all by default
        #[arg(short = 'n', long)]
        count: Option<u64>,
    },
}

#[tokio::main]
async fn main() {
    init_structured_logging();
    let cli = Cli::parse();

    if let Err(e) = run(cli).await {
        error!(error = %e, "Command failed");
        eprintln!("❌ {e}");
        process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let manager = ConfigManager::load_from_file(&cli.config)?;
    let context = AppContext::from_manager(manager)?;

    match cli.command {
        Commands::Consumer { port } => run_consumers(context, port).await,
        Commands::Queues { command } => match command {
            QueueCommands::Status => queues_status(&context).await,
            QueueCommands::Requeue { queue, to, count } => {
                requeue(&context, queue, to, count).await
            }
        },
    }
}

async fn run_consumers(context: AppContext, port: Option<u16>) -> Result<()> {
    let mut consumer = Consumer::from_context(context)?;
    if let Some(port) = port {
        consumer = consumer.with_status_port(port);
    }
    let mut terminate = signal(SignalKind::terminate())?;

    consumer
        .run_until_shutdown(async move {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => info!("Interrupted"),
                _ = terminate.recv() => info!("Terminated"),
            }
        })
        .await
}

async fn queues_status(context: &AppContext) -> Result<()> {
    let names = context.config().queue_names();
    let infos = context
        .with_transport_connected(|transport| async move {
            Ok(transport.get_queues_info(&names).await?)
        })
        .await?;

    println!("{:<40} {:>10} {:>10}  STATE", "QUEUE", "MESSAGES", "CONSUMERS");
    for info in infos {
        println!(
            "{:<40} {:>10} {:>10}  {}",
            info.name, info.messages, info.consumers, info.state
        );
    }
    Ok(())
}

async fn requeue(context: &AppContext, queue: String, to: String, count: Option<u64>) -> Result<()> {
    let mut options = RequeueOptions::to(to);
    if let Some(count) = count {
        options = options.with_count(count);
    }

    let result = context
        .with_transport_connected(|transport| async move {
            Ok(transport.requeue(&queue, options).await?)
        })
        .await?;

    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(())
}
