use std::sync::Arc;

use async_trait::async_trait;
use reqwest::{Client, StatusCode, Url};
use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;

use crate::embeddings::Embedder;
use crate::error::{RagError, Result};
use crate::models::{Document, Metadata, ScoredDocument};
use crate::vector_store::{Collection, CollectionRegistry, VectorStore};

const BACKEND: &str = "qdrant";
const UPSERT_BATCH: usize = 64;
const DIMENSION_PROBE: &str = "dimension probe";

/// Vector store backed by a Qdrant server's REST API; one Qdrant collection
/// per store collection, chunk text and metadata kept in the point payload.
#[derive(Clone)]
pub struct QdrantVectorStore {
    client: Client,
    base_url: String,
    registry: Arc<CollectionRegistry>,
}

impl QdrantVectorStore {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            registry: Arc::new(CollectionRegistry::new()),
        }
    }

    /// `{base}/collections/{name}/{rest..}` with `name` percent-encoded as one segment.
    fn collection_url(&self, name: &str, rest: &[&str]) -> Result<Url> {
        let mut url = Url::parse(&self.base_url).map_err(|err| {
            RagError::storage(BACKEND, format!("invalid qdrant url {}: {err}", self.base_url))
        })?;
        url.path_segments_mut()
            .map_err(|_| {
                RagError::storage(BACKEND, format!("qdrant url {} cannot take a path", self.base_url))
            })?
            .pop_if_empty()
            .push("collections")
            .push(name)
            .extend(rest);
        Ok(url)
    }

    async fn collection_exists(&self, name: &str) -> Result<bool> {
        let response = self
            .client
            .get(self.collection_url(name, &[])?)
            .send()
            .await
            .map_err(|err| {
                RagError::storage(BACKEND, format!("failed to contact qdrant: {err}"))
            })?;

        match response.status() {
            StatusCode::NOT_FOUND => Ok(false),
            status if status.is_success() => Ok(true),
            status => Err(RagError::storage(
                BACKEND,
                format!("collection lookup for {name} returned {status}"),
            )),
        }
    }

    /// Creates `name` sized to the embedder's output unless it already exists.
    async fn ensure_collection(&self, name: &str, embedder: Arc<dyn Embedder>) -> Result<()> {
        if self.collection_exists(name).await? {
            return Ok(());
        }

        let vector_size = embedder.embed_query(DIMENSION_PROBE).await?.len();
        let payload = json!({
            "vectors": {
                "size": vector_size,
                "distance": "Cosine"
            }
        });

        let response = self
            .client
            .put(self.collection_url(name, &[])?)
            .json(&payload)
            .send()
            .await
            .map_err(|err| {
                RagError::storage(BACKEND, format!("failed to contact qdrant while creating collection: {err}"))
            })?;

        // A concurrent creator may have won the race.
        if response.status() == StatusCode::CONFLICT {
            return Ok(());
        }
        response.error_for_status().map_err(|err| {
            RagError::storage(BACKEND, format!("qdrant failed to create collection: {err}"))
        })?;

        tracing::info!("created qdrant collection {} ({} dims)", name, vector_size);
        Ok(())
    }

    async fn upsert_points(&self, collection: &str, points: &[QdrantPoint]) -> Result<()> {
        if points.is_empty() {
            return Ok(());
        }

        let mut upsert_url = self.collection_url(collection, &["points"])?;
        upsert_url.set_query(Some("wait=true"));
        let body = json!({ "points": points });

        self.client
            .put(upsert_url)
            .json(&body)
            .send()
            .await
            .map_err(|err| {
                RagError::storage(BACKEND, format!("failed to contact qdrant during upsert: {err}"))
            })?
            .error_for_status()
            .map_err(|err| {
                RagError::storage(BACKEND, format!("qdrant upsert returned non-success status: {err}"))
            })?;

        Ok(())
    }
}

#[async_trait]
impl VectorStore for QdrantVectorStore {
    fn set_embedding(&self, embedder: Arc<dyn Embedder>) {
        self.registry.set_embedder(embedder);
    }

    async fn get_or_create_collection(&self, name: &str) -> Result<Arc<Collection>> {
        self.registry
            .get_or_create(name, |embedder| self.ensure_collection(name, embedder))
            .await
    }

    async fn add_documents(&self, documents: &[Document], collection: &str) -> Result<()> {
        let handle = self.get_or_create_collection(collection).await?;
        if documents.is_empty() {
            return Ok(());
        }

        let vectors = handle.embed_documents(documents).await?;
        let points: Vec<QdrantPoint> = documents
            .iter()
            .zip(vectors)
            .map(|(doc, vector)| QdrantPoint {
                id: Uuid::new_v4().to_string(),
                vector,
                payload: QdrantPayload {
                    content: doc.content.clone(),
                    metadata: doc.metadata.clone(),
                },
            })
            .collect();

        for batch in points.chunks(UPSERT_BATCH) {
            self.upsert_points(collection, batch).await?;
        }

        tracing::debug!("upserted {} points into {}", points.len(), collection);
        Ok(())
    }

    async fn retrieve_with_scores(
        &self,
        query: &str,
        collection: &str,
        k: usize,
    ) -> Result<Vec<ScoredDocument>> {
        if k == 0 {
            return Ok(vec![]);
        }
        if !self
            .collection_exists(collection)
            .await
            .map_err(|err| RagError::Retrieval(err.to_string()))?
        {
            return Ok(vec![]);
        }

        let handle = self.get_or_create_collection(collection).await?;
        let vector = handle.embed_query(query).await?;

        let url = self.collection_url(collection, &["points", "search"])?;
        let body = json!({
            "vector": vector,
            "limit": k,
            "with_payload": true,
        });

        let response = self
            .client
            .post(url)
            .json(&body)
            .send()
            .await
            .map_err(|err| {
                RagError::Retrieval(format!("failed to contact qdrant during search: {err}"))
            })?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(vec![]);
        }

        let response = response
            .error_for_status()
            .map_err(|err| RagError::Retrieval(format!("qdrant search returned non-success status: {err}")))?
            .json::<QdrantSearchResponse>()
            .await
            .map_err(|err| RagError::Retrieval(format!("failed to decode qdrant search response: {err}")))?;

        Ok(response
            .result
            .into_iter()
            .filter_map(|point| {
                let payload = point.payload?;
                Some(ScoredDocument {
                    document: Document::new(payload.content, payload.metadata),
                    score: point.score,
                })
            })
            .collect())
    }

    async fn delete_collection(&self, name: &str) -> Result<()> {
        let response = self
            .client
            .delete(self.collection_url(name, &[])?)
            .send()
            .await
            .map_err(|err| {
                RagError::storage(BACKEND, format!("failed to contact qdrant while deleting collection: {err}"))
            })?;

        let status = response.status();
        if !status.is_success() && status != StatusCode::NOT_FOUND {
            return Err(RagError::storage(
                BACKEND,
                format!("qdrant delete of {name} returned {status}"),
            ));
        }

        self.registry.evict(name).await;
        Ok(())
    }

    async fn list_collections(&self) -> Result<Vec<String>> {
        let url = format!("{}/collections", self.base_url);
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|err| RagError::storage(BACKEND, format!("failed to contact qdrant: {err}")))?
            .error_for_status()
            .map_err(|err| RagError::storage(BACKEND, err))?
            .json::<QdrantListResponse>()
            .await
            .map_err(|err| {
                RagError::storage(BACKEND, format!("failed to decode collection list: {err}"))
            })?;

        let mut names: Vec<String> = response
            .result
            .collections
            .into_iter()
            .map(|c| c.name)
            .collect();
        names.sort();
        Ok(names)
    }
}

#[derive(Debug, Clone, Serialize)]
struct QdrantPoint {
    id: String,
    vector: Vec<f32>,
    payload: QdrantPayload,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct QdrantPayload {
    content: String,
    #[serde(default)]
    metadata: Metadata,
}

#[derive(Debug, Deserialize)]
struct QdrantSearchResponse {
    result: Vec<QdrantResultPoint>,
}

#[derive(Debug, Deserialize)]
struct QdrantResultPoint {
    score: f32,
    payload: Option<QdrantPayload>,
}

#[derive(Debug, Deserialize)]
struct QdrantListResponse {
    result: QdrantCollections,
}

#[derive(Debug, Deserialize)]
struct QdrantCollections {
    collections: Vec<QdrantCollectionName>,
}

#[derive(Debug, Deserialize)]
struct QdrantCollectionName {
    name: String,
}
