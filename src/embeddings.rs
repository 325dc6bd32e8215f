use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;

use crate::config::EmbeddingConfig;
use crate::error::{RagError, Result};
use crate::ollama::OllamaEmbeddings;
use crate::openai::{normalize_err_body, OpenAiEmbeddings};

/// Text to vector mapping used for both stored chunks and queries.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Short provider label used in errors and logs.
    fn provider(&self) -> &str;

    async fn embed_query(&self, text: &str) -> Result<Vec<f32>>;

    /// Embeds a batch; sequential unless the backend batches natively.
    async fn embed_documents(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut vectors = Vec::with_capacity(texts.len());
        for text in texts {
            vectors.push(self.embed_query(text).await?);
        }
        Ok(vectors)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmbeddingProvider {
    OpenAi,
    HuggingFace,
    Ollama,
}

impl EmbeddingProvider {
    pub fn parse(name: &str) -> Result<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "openai" => Ok(Self::OpenAi),
            "huggingface" | "hf" => Ok(Self::HuggingFace),
            "ollama" => Ok(Self::Ollama),
            other => Err(RagError::Configuration(format!(
                "unknown embedding provider: {other}"
            ))),
        }
    }
}

/// Builds the embedder named by `embedding.provider`.
pub fn embedding_from_config(config: &EmbeddingConfig) -> Result<Arc<dyn Embedder>> {
    let provider = EmbeddingProvider::parse(&config.provider)?;
    let timeout = Duration::from_secs(config.timeout_secs);

    let embedder: Arc<dyn Embedder> = match provider {
        EmbeddingProvider::OpenAi => {
            let api_key = config
                .api_key
                .clone()
                .filter(|key| !key.is_empty())
                .or_else(|| std::env::var("OPENAI_API_KEY").ok());
            let base_url = config
                .base_url
                .clone()
                .unwrap_or_else(|| "https://api.openai.com/v1".to_string());
            Arc::new(OpenAiEmbeddings::new(
                base_url,
                api_key,
                config.model.clone(),
                timeout,
            )?)
        }
        EmbeddingProvider::HuggingFace => {
            let base_url = config
                .base_url
                .clone()
                .unwrap_or_else(|| "http://127.0.0.1:8080".to_string());
            Arc::new(HuggingFaceEmbeddings::new(
                base_url,
                config.model.clone(),
                timeout,
            )?)
        }
        EmbeddingProvider::Ollama => {
            let base_url = config
                .base_url
                .clone()
                .unwrap_or_else(|| "http://127.0.0.1:11434".to_string());
            Arc::new(OllamaEmbeddings::new(base_url, config.model.clone(), timeout)?)
        }
    };

    tracing::info!(
        "embedding provider {} with model {}",
        embedder.provider(),
        config.model
    );
    Ok(embedder)
}

/// text-embeddings-inference rejects larger batches unless started with
/// `--max-client-batch-size`.
const TEI_BATCH: usize = 32;

/// Client for a HuggingFace text-embeddings-inference server serving `model`.
pub struct HuggingFaceEmbeddings {
    client: Client,
    base_url: String,
    model: String,
}

impl HuggingFaceEmbeddings {
    pub fn new(base_url: impl Into<String>, model: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|err| RagError::embedding("huggingface", err))?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            model: model.into(),
        })
    }

    async fn embed_inputs(&self, inputs: &[String]) -> Result<Vec<Vec<f32>>> {
        #[derive(Serialize)]
        struct EmbedReq<'a> {
            inputs: &'a [String],
            truncate: bool,
        }

        let url = format!("{}/embed", self.base_url);
        let response = self
            .client
            .post(url)
            .json(&EmbedReq {
                inputs,
                truncate: true,
            })
            .send()
            .await
            .map_err(|err| {
                RagError::embedding("huggingface", format!("failed to call /embed: {err}"))
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(RagError::embedding(
                "huggingface",
                format!(
                    "/embed for {} returned {status}: {}",
                    self.model,
                    normalize_err_body(&body)
                ),
            ));
        }

        let vectors = response.json::<Vec<Vec<f32>>>().await.map_err(|err| {
            RagError::embedding("huggingface", format!("failed to decode /embed response: {err}"))
        })?;

        if vectors.len() != inputs.len() {
            return Err(RagError::embedding(
                "huggingface",
                format!("expected {} embeddings, got {}", inputs.len(), vectors.len()),
            ));
        }
        Ok(vectors)
    }
}

#[async_trait]
impl Embedder for HuggingFaceEmbeddings {
    fn provider(&self) -> &str {
        "huggingface"
    }

    async fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
        let mut vectors = self.embed_inputs(&[text.to_string()]).await?;
        vectors
            .pop()
            .ok_or_else(|| RagError::embedding("huggingface", "empty embeddings response"))
    }

    async fn embed_documents(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut vectors = Vec::with_capacity(texts.len());
        for batch in texts.chunks(TEI_BATCH) {
            vectors.extend(self.embed_inputs(batch).await?);
        }
        Ok(vectors)
    }
}
