use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, RwLock as StdRwLock};

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::config::AppConfig;
use crate::embeddings::Embedder;
use crate::error::{RagError, Result};
use crate::models::{Document, ScoredDocument};
use crate::qdrant_store::QdrantVectorStore;
use crate::sqlite_store::SqliteVectorStore;

/// Collection-scoped storage of embedded chunks with similarity search.
///
/// `set_embedding` must be called before any collection is touched; each
/// collection handle keeps the embedder that was installed when it was built.
#[async_trait]
pub trait VectorStore: Send + Sync {
    fn set_embedding(&self, embedder: Arc<dyn Embedder>);

    /// Ensures `name` exists in storage and returns its cached handle.
    async fn get_or_create_collection(&self, name: &str) -> Result<Arc<Collection>>;

    async fn add_documents(&self, documents: &[Document], collection: &str) -> Result<()>;

    /// Up to `k` nearest chunks, most similar first. Absent collections yield nothing.
    async fn retrieve_with_scores(
        &self,
        query: &str,
        collection: &str,
        k: usize,
    ) -> Result<Vec<ScoredDocument>>;

    async fn retrieve(&self, query: &str, collection: &str, k: usize) -> Result<Vec<Document>> {
        Ok(self
            .retrieve_with_scores(query, collection, k)
            .await?
            .into_iter()
            .map(|scored| scored.document)
            .collect())
    }

    /// Drops the collection and its chunks. Absent names are not an error.
    async fn delete_collection(&self, name: &str) -> Result<()>;

    async fn list_collections(&self) -> Result<Vec<String>>;
}

/// In-process handle for one collection, bound to its embedder.
pub struct Collection {
    name: String,
    embedder: Arc<dyn Embedder>,
}

impl Collection {
    pub fn new(name: impl Into<String>, embedder: Arc<dyn Embedder>) -> Self {
        Self {
            name: name.into(),
            embedder,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn embedder(&self) -> &Arc<dyn Embedder> {
        &self.embedder
    }

    pub async fn embed_documents(&self, documents: &[Document]) -> Result<Vec<Vec<f32>>> {
        let texts: Vec<String> = documents.iter().map(|doc| doc.content.clone()).collect();
        let vectors = self.embedder.embed_documents(&texts).await?;
        if vectors.len() != documents.len() {
            return Err(RagError::embedding(
                self.embedder.provider(),
                format!(
                    "expected {} embeddings, got {}",
                    documents.len(),
                    vectors.len()
                ),
            ));
        }
        Ok(vectors)
    }

    pub async fn embed_query(&self, query: &str) -> Result<Vec<f32>> {
        self.embedder.embed_query(query).await
    }
}

/// Embedder slot plus the memoized collection handles shared by every backend.
#[derive(Default)]
pub struct CollectionRegistry {
    embedder: StdRwLock<Option<Arc<dyn Embedder>>>,
    handles: RwLock<HashMap<String, Arc<Collection>>>,
}

impl CollectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_embedder(&self, embedder: Arc<dyn Embedder>) {
        match self.embedder.write() {
            Ok(mut slot) => *slot = Some(embedder),
            Err(poisoned) => *poisoned.into_inner() = Some(embedder),
        }
    }

    pub fn embedder(&self) -> Result<Arc<dyn Embedder>> {
        let slot = self
            .embedder
            .read()
            .map_err(|_| RagError::Configuration("embedder lock poisoned".to_string()))?;
        slot.clone().ok_or_else(|| {
            RagError::Configuration("embedding function not set; call set_embedding first".to_string())
        })
    }

    /// Returns the cached handle for `name`, running `ensure` against storage first.
    ///
    /// The table lock is held while a missing handle is built, so concurrent
    /// first use of a name produces one handle.
    pub async fn get_or_create<F, Fut>(&self, name: &str, ensure: F) -> Result<Arc<Collection>>
    where
        F: FnOnce(Arc<dyn Embedder>) -> Fut,
        Fut: Future<Output = Result<()>>,
    {
        {
            let handles = self.handles.read().await;
            if let Some(handle) = handles.get(name) {
                ensure(handle.embedder().clone()).await?;
                return Ok(handle.clone());
            }
        }

        let mut handles = self.handles.write().await;
        if let Some(handle) = handles.get(name) {
            ensure(handle.embedder().clone()).await?;
            return Ok(handle.clone());
        }

        let embedder = self.embedder()?;
        ensure(embedder.clone()).await?;
        let handle = Arc::new(Collection::new(name, embedder));
        handles.insert(name.to_string(), handle.clone());
        tracing::debug!("built handle for collection {}", name);
        Ok(handle)
    }

    pub async fn cached(&self, name: &str) -> Option<Arc<Collection>> {
        self.handles.read().await.get(name).cloned()
    }

    pub async fn evict(&self, name: &str) {
        self.handles.write().await.remove(name);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    Sqlite,
    Qdrant,
}

impl StoreBackend {
    pub fn parse(name: &str) -> Result<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "sqlite" | "local" => Ok(Self::Sqlite),
            "qdrant" => Ok(Self::Qdrant),
            other => Err(RagError::Configuration(format!(
                "unknown storage backend: {other}"
            ))),
        }
    }
}

/// Opens the backend named by `storage.backend` with `embedder` installed.
pub async fn vector_store_from_config(
    config: &AppConfig,
    embedder: Arc<dyn Embedder>,
) -> Result<Arc<dyn VectorStore>> {
    let store: Arc<dyn VectorStore> = match StoreBackend::parse(&config.storage.backend)? {
        StoreBackend::Sqlite => Arc::new(SqliteVectorStore::open(&config.sqlite_path()).await?),
        StoreBackend::Qdrant => Arc::new(QdrantVectorStore::new(config.storage.qdrant_url.clone())),
    };
    store.set_embedding(embedder);
    tracing::info!("vector store backend {}", config.storage.backend);
    Ok(store)
}

/// Cosine similarity; 0.0 when either vector has zero magnitude or lengths differ.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}
