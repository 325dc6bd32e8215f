use thiserror::Error;

/// Failures surfaced by the ingestion and retrieval pipelines.
#[derive(Debug, Error)]
pub enum RagError {
    /// Missing embedder, unknown provider or backend, or invalid settings.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// A source could not be loaded or split.
    #[error("failed to ingest {path}: {message}")]
    Ingestion { path: String, message: String },

    #[error("retrieval error: {0}")]
    Retrieval(String),

    #[error("generation error: {0}")]
    Generation(String),

    #[error("embedding error ({provider}): {message}")]
    Embedding { provider: String, message: String },

    #[error("vector store error ({backend}): {message}")]
    Storage { backend: String, message: String },
}

impl RagError {
    pub fn ingestion(path: impl Into<String>, message: impl ToString) -> Self {
        Self::Ingestion {
            path: path.into(),
            message: message.to_string(),
        }
    }

    pub fn embedding(provider: impl Into<String>, message: impl ToString) -> Self {
        Self::Embedding {
            provider: provider.into(),
            message: message.to_string(),
        }
    }

    pub fn storage(backend: impl Into<String>, message: impl ToString) -> Self {
        Self::Storage {
            backend: backend.into(),
            message: message.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, RagError>;
