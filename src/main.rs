use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use recall_core::rpc;
use recall_core::spaced_repetition::{CardCatalog, SpacedRepetitionService, StaticCatalog};

#[derive(Parser)]
#[command(name = "recall-core")]
#[command(about = "Recall Core - Spaced repetition engine for vocabulary learning")]
struct Cli {
    #[arg(long, default_value = "http")]
    mode: String,

    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    #[arg(long, default_value = "21430")]
    port: u16,

    /// Defaults to the platform local data directory.
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// JSON array of cards defining the order new cards are introduced in.
    #[arg(long)]
    catalog: Option<PathBuf>,
}

fn default_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("recall")
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    let data_dir = cli.data_dir.unwrap_or_else(default_data_dir);
    let catalog: Arc<dyn CardCatalog> = match &cli.catalog {
        Some(path) => Arc::new(StaticCatalog::load(path)?),
        None => {
            tracing::warn!("no catalog given, study queues will only contain introduced cards");
            Arc::new(StaticCatalog::empty())
        }
    };
    let service = Arc::new(SpacedRepetitionService::open(&data_dir, catalog).await?);
    tracing::info!(data_dir = %data_dir.display(), "spaced repetition service ready");

    match cli.mode.as_str() {
        "http" => {
            tracing::info!(
                "Starting recall-core HTTP server on {}:{}",
                cli.host,
                cli.port
            );
            rpc::run_http_server(service, &cli.host, cli.port).await
        }
        "stdio" => {
            tracing::info!("Starting recall-core JSON-RPC server (stdio mode)");
            rpc::run_stdio_server(service).await
        }
        _ => {
            anyhow::bail!("Invalid mode: {}. Use 'http' or 'stdio'", cli.mode)
        }
    }
}
