use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use serde_json::Value;
use tracing_subscriber::EnvFilter;

use docrag::embeddings::embedding_from_config;
use docrag::ingest::Ingestor;
use docrag::models::Metadata;
use docrag::vector_store::vector_store_from_config;
use docrag::AppConfig;

#[derive(Parser, Debug)]
#[command(name = "ingest")]
#[command(about = "Load, split and store a file or directory into a collection")]
struct Cli {
    /// File or directory to ingest.
    source: PathBuf,
    #[arg(long)]
    collection: String,
    /// Extra chunk metadata as key=value; repeatable.
    #[arg(long = "meta", value_parser = parse_key_value)]
    meta: Vec<(String, String)>,
    #[arg(long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => AppConfig::from_file(path)?,
        None => AppConfig::load()?,
    };

    let embedder = embedding_from_config(&config.embedding)?;
    let store = vector_store_from_config(&config, embedder).await?;
    let ingestor = Ingestor::new(store, &config.chunking);

    let metadata: Metadata = cli
        .meta
        .into_iter()
        .map(|(key, value)| (key, Value::String(value)))
        .collect();

    let chunks = ingestor
        .ingest(&cli.collection, &cli.source, Some(&metadata))
        .await
        .with_context(|| format!("ingest of {} failed", cli.source.display()))?;

    println!(
        "Ingest complete. collection={} chunks={}",
        cli.collection, chunks
    );
    Ok(())
}

fn parse_key_value(raw: &str) -> Result<(String, String), String> {
    raw.split_once('=')
        .filter(|(key, _)| !key.is_empty())
        .map(|(key, value)| (key.to_string(), value.to_string()))
        .ok_or_else(|| format!("expected key=value, got `{raw}`"))
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}
