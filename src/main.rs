use anyhow::Result;
use tracing_subscriber::EnvFilter;

use docrag::embeddings::embedding_from_config;
use docrag::llm::language_model_from_config;
use docrag::vector_store::vector_store_from_config;
use docrag::{run_server, AppConfig};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    let config = AppConfig::load()?;
    tokio::fs::create_dir_all(&config.storage.upload_dir).await?;

    let embedder = embedding_from_config(&config.embedding)?;
    let store = vector_store_from_config(&config, embedder).await?;
    let llm = language_model_from_config(&config.llm)?;

    run_server(config, store, llm).await
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}
