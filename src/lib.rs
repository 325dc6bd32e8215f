pub mod config;
pub mod embeddings;
pub mod error;
pub mod ingest;
pub mod llm;
pub mod models;
pub mod ollama;
pub mod openai;
pub mod qdrant_store;
pub mod retrieval;
pub mod server;
pub mod splitter;
pub mod sqlite_store;
pub mod vector_store;

pub use config::AppConfig;
pub use error::{RagError, Result};
pub use server::run_server;
