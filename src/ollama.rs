use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};

use crate::embeddings::Embedder;
use crate::error::{RagError, Result};
use crate::openai::normalize_err_body;

const PROVIDER: &str = "ollama";

#[derive(Clone)]
pub struct OllamaEmbeddings {
    client: Client,
    base_url: String,
    model: String,
}

impl OllamaEmbeddings {
    pub fn new(base_url: impl Into<String>, model: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|err| RagError::embedding(PROVIDER, err))?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            model: model.into(),
        })
    }

    pub async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let input = text.trim();
        if input.is_empty() {
            return Err(RagError::embedding(PROVIDER, "cannot embed empty text input"));
        }

        match self.embed_with_endpoint_fallback(input).await {
            Ok(vector) => Ok(vector),
            Err(err) => {
                if !is_context_length_error(&err) {
                    return Err(err);
                }

                let word_count = input.split_whitespace().count();
                let mut last_err = err;
                for max_words in [1400usize, 1000, 800, 600, 450, 320, 240, 180, 120] {
                    if word_count <= max_words {
                        continue;
                    }

                    tracing::warn!(
                        "ollama context length exceeded, retrying with {} of {} words",
                        max_words,
                        word_count
                    );
                    let truncated = truncate_to_word_limit(input, max_words);
                    match self.embed_with_endpoint_fallback(&truncated).await {
                        Ok(vector) => return Ok(vector),
                        Err(next_err) => {
                            if !is_context_length_error(&next_err) {
                                return Err(next_err);
                            }
                            last_err = next_err;
                        }
                    }
                }

                Err(RagError::embedding(
                    PROVIDER,
                    format!(
                        "context length exceeded even after truncation \
                         (original_words={word_count}). last error: {last_err}"
                    ),
                ))
            }
        }
    }

    async fn embed_with_endpoint_fallback(&self, text: &str) -> Result<Vec<f32>> {
        // Older Ollama releases only expose /api/embeddings.
        match self.embed_modern(text).await {
            Ok(vector) => Ok(vector),
            Err(modern_err) => match self.embed_legacy(text).await {
                Ok(vector) => Ok(vector),
                Err(legacy_err) => Err(RagError::embedding(
                    PROVIDER,
                    format!(
                        "/api/embed and /api/embeddings both failed. \
                         modern error: {modern_err}; legacy error: {legacy_err}; \
                         ensure the model is pulled (e.g. `ollama pull {}`)",
                        self.model
                    ),
                )),
            },
        }
    }

    async fn embed_modern(&self, text: &str) -> Result<Vec<f32>> {
        #[derive(Serialize)]
        struct EmbedReq<'a> {
            model: &'a str,
            input: &'a str,
        }

        #[derive(Deserialize)]
        struct EmbedResp {
            embeddings: Vec<Vec<f32>>,
        }

        let url = format!("{}/api/embed", self.base_url);
        let response = self
            .client
            .post(url)
            .json(&EmbedReq {
                model: &self.model,
                input: text,
            })
            .send()
            .await
            .map_err(|err| RagError::embedding(PROVIDER, format!("failed to call /api/embed: {err}")))?;

        if response.status() != StatusCode::OK {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(RagError::embedding(
                PROVIDER,
                format!("/api/embed returned {status}: {}", normalize_err_body(&body)),
            ));
        }

        let response = response.json::<EmbedResp>().await.map_err(|err| {
            RagError::embedding(PROVIDER, format!("failed to decode /api/embed response: {err}"))
        })?;

        response
            .embeddings
            .into_iter()
            .next()
            .ok_or_else(|| RagError::embedding(PROVIDER, "/api/embed returned empty embeddings array"))
    }

    async fn embed_legacy(&self, text: &str) -> Result<Vec<f32>> {
        #[derive(Serialize)]
        struct EmbeddingReq<'a> {
            model: &'a str,
            prompt: &'a str,
        }

        #[derive(Deserialize)]
        struct EmbeddingResp {
            embedding: Vec<f32>,
        }

        let url = format!("{}/api/embeddings", self.base_url);
        let response = self
            .client
            .post(url)
            .json(&EmbeddingReq {
                model: &self.model,
                prompt: text,
            })
            .send()
            .await
            .map_err(|err| {
                RagError::embedding(PROVIDER, format!("failed to call /api/embeddings: {err}"))
            })?;

        if response.status() != StatusCode::OK {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(RagError::embedding(
                PROVIDER,
                format!("/api/embeddings returned {status}: {}", normalize_err_body(&body)),
            ));
        }

        let response = response.json::<EmbeddingResp>().await.map_err(|err| {
            RagError::embedding(
                PROVIDER,
                format!("failed to decode /api/embeddings response: {err}"),
            )
        })?;

        Ok(response.embedding)
    }
}

#[async_trait]
impl Embedder for OllamaEmbeddings {
    fn provider(&self) -> &str {
        PROVIDER
    }

    async fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
        self.embed(text).await
    }
}

fn is_context_length_error(err: &RagError) -> bool {
    let msg = err.to_string().to_ascii_lowercase();
    msg.contains("input length exceeds the context length")
        || (msg.contains("context length") && msg.contains("input length"))
}

fn truncate_to_word_limit(text: &str, max_words: usize) -> String {
    text.split_whitespace()
        .take(max_words)
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::routing::post;
    use axum::{Json, Router};
    use serde_json::{json, Value};

    async fn spawn(app: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}")
    }

    #[test]
    fn truncation_keeps_leading_words() {
        assert_eq!(truncate_to_word_limit("a b  c\nd", 3), "a b c");
    }

    #[test]
    fn detects_context_length_errors() {
        let err = RagError::embedding(PROVIDER, "the input length exceeds the context length");
        assert!(is_context_length_error(&err));
        assert!(!is_context_length_error(&RagError::embedding(PROVIDER, "model not found")));
    }

    #[tokio::test]
    async fn uses_modern_endpoint() {
        let app = Router::new().route(
            "/api/embed",
            post(|Json(body): Json<Value>| async move {
                assert_eq!(body["model"], "nomic-embed-text");
                Json(json!({ "embeddings": [[0.5, 0.25]] }))
            }),
        );
        let base = spawn(app).await;

        let embedder =
            OllamaEmbeddings::new(base, "nomic-embed-text", Duration::from_secs(5)).unwrap();
        let vector = embedder.embed_query("hello").await.unwrap();
        assert_eq!(vector, vec![0.5, 0.25]);
    }

    #[tokio::test]
    async fn falls_back_to_legacy_endpoint() {
        let app = Router::new().route(
            "/api/embeddings",
            post(|| async { Json(json!({ "embedding": [1.0, 0.0, 0.0] })) }),
        );
        let base = spawn(app).await;

        let embedder =
            OllamaEmbeddings::new(base, "nomic-embed-text", Duration::from_secs(5)).unwrap();
        let vector = embedder.embed_query("hello").await.unwrap();
        assert_eq!(vector.len(), 3);
    }

    #[tokio::test]
    async fn empty_input_is_rejected() {
        let embedder = OllamaEmbeddings::new(
            "http://127.0.0.1:9",
            "nomic-embed-text",
            Duration::from_secs(1),
        )
        .unwrap();
        let err = embedder.embed_query("   ").await.unwrap_err();
        assert!(matches!(err, RagError::Embedding { .. }));
    }
}
