use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use cordex_catalog::{CatalogService, HeuristicAnalyzer, NullAnalyzer, TextAnalyzer};
use cordex_store::{MemoryCatalog, MemoryProfiles};
use cordex_sync::{SyncConfig, SyncPipeline};
use cordex_web::AppState;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "cordex-cli")]
#[command(about = "CORDIS grants catalog command-line interface")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Run the JSON API server.
    Serve {
        /// Refresh the catalog from the remote source before listening.
        #[arg(long)]
        sync_first: bool,
    },
    /// Run one catalog refresh and exit.
    Sync,
}

fn analyzer_from_env() -> Arc<dyn TextAnalyzer> {
    match std::env::var("CORDEX_ANALYZER").as_deref() {
        Ok("off") => Arc::new(NullAnalyzer),
        _ => Arc::new(HeuristicAnalyzer),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    let store = Arc::new(MemoryCatalog::new());
    let sync = Arc::new(SyncPipeline::new(SyncConfig::from_env(), store.clone())?);

    match cli.command.unwrap_or(Commands::Serve { sync_first: false }) {
        Commands::Serve { sync_first } => {
            if sync_first {
                let summary = sync.run_once().await?;
                println!(
                    "initial sync complete: run_id={} projects={} organizations={}",
                    summary.run_id, summary.projects_inserted, summary.organizations_inserted
                );
            }
            let catalog = Arc::new(CatalogService::new(store, analyzer_from_env()));
            let state = AppState::new(catalog, Arc::new(MemoryProfiles::new()), sync);
            cordex_web::serve_from_env(state).await?;
        }
        Commands::Sync => {
            let summary = sync.run_once().await?;
            println!(
                "sync complete: run_id={} projects={} organizations={} batches={} sha256={}",
                summary.run_id,
                summary.projects_inserted,
                summary.organizations_inserted,
                summary.batches,
                summary.archive_sha256
            );
        }
    }

    Ok(())
}
