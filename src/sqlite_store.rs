use std::cmp::Ordering;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use crate::embeddings::Embedder;
use crate::error::{RagError, Result};
use crate::models::{Document, Metadata, ScoredDocument};
use crate::vector_store::{cosine_similarity, Collection, CollectionRegistry, VectorStore};

const BACKEND: &str = "sqlite";

/// On-disk vector store: one SQLite file, collections as rows, embeddings as
/// little-endian `f32` blobs searched by brute-force cosine similarity.
#[derive(Clone)]
pub struct SqliteVectorStore {
    pool: SqlitePool,
    registry: Arc<CollectionRegistry>,
}

impl SqliteVectorStore {
    pub async fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|err| RagError::storage(BACKEND, format!("{}: {err}", parent.display())))?;
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(8)
            .connect_with(options)
            .await
            .map_err(storage_err)?;

        let store = Self {
            pool,
            registry: Arc::new(CollectionRegistry::new()),
        };
        store.migrate().await?;
        tracing::info!("opened vector store at {}", path.display());
        Ok(store)
    }

    async fn migrate(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS collections (
                name TEXT PRIMARY KEY,
                created_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS chunks (
                id TEXT PRIMARY KEY,
                collection TEXT NOT NULL,
                content TEXT NOT NULL,
                metadata TEXT NOT NULL,
                embedding BLOB NOT NULL,
                FOREIGN KEY (collection) REFERENCES collections(name) ON DELETE CASCADE
            );

            CREATE INDEX IF NOT EXISTS idx_chunks_collection ON chunks(collection);
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(storage_err)?;

        Ok(())
    }

    async fn ensure_collection(&self, name: &str) -> Result<()> {
        sqlx::query("INSERT OR IGNORE INTO collections (name, created_at) VALUES (?, ?)")
            .bind(name)
            .bind(Utc::now().to_rfc3339())
            .execute(&self.pool)
            .await
            .map_err(storage_err)?;
        Ok(())
    }

    async fn collection_exists(&self, name: &str) -> Result<bool> {
        let row = sqlx::query("SELECT 1 FROM collections WHERE name = ?")
            .bind(name)
            .fetch_optional(&self.pool)
            .await
            .map_err(|err| RagError::Retrieval(err.to_string()))?;
        Ok(row.is_some())
    }

    pub async fn count_chunks(&self, collection: &str) -> Result<usize> {
        let count: i64 = sqlx::query("SELECT COUNT(*) AS n FROM chunks WHERE collection = ?")
            .bind(collection)
            .fetch_one(&self.pool)
            .await
            .map_err(storage_err)?
            .get("n");
        Ok(count as usize)
    }
}

#[async_trait]
impl VectorStore for SqliteVectorStore {
    fn set_embedding(&self, embedder: Arc<dyn Embedder>) {
        self.registry.set_embedder(embedder);
    }

    async fn get_or_create_collection(&self, name: &str) -> Result<Arc<Collection>> {
        self.registry
            .get_or_create(name, |_| self.ensure_collection(name))
            .await
    }

    async fn add_documents(&self, documents: &[Document], collection: &str) -> Result<()> {
        let handle = self.get_or_create_collection(collection).await?;
        if documents.is_empty() {
            return Ok(());
        }

        let vectors = handle.embed_documents(documents).await?;

        let mut tx = self.pool.begin().await.map_err(storage_err)?;
        for (doc, vector) in documents.iter().zip(vectors.iter()) {
            let metadata = serde_json::to_string(&doc.metadata)
                .map_err(|err| RagError::storage(BACKEND, err))?;
            sqlx::query(
                "INSERT INTO chunks (id, collection, content, metadata, embedding) VALUES (?, ?, ?, ?, ?)",
            )
            .bind(Uuid::new_v4().to_string())
            .bind(collection)
            .bind(&doc.content)
            .bind(metadata)
            .bind(encode_vector(vector))
            .execute(&mut *tx)
            .await
            .map_err(storage_err)?;
        }
        tx.commit().await.map_err(storage_err)?;

        tracing::debug!("stored {} chunks in {}", documents.len(), collection);
        Ok(())
    }

    async fn retrieve_with_scores(
        &self,
        query: &str,
        collection: &str,
        k: usize,
    ) -> Result<Vec<ScoredDocument>> {
        if k == 0 || !self.collection_exists(collection).await? {
            return Ok(vec![]);
        }

        let handle = self.get_or_create_collection(collection).await?;
        let query_vector = handle.embed_query(query).await?;

        let rows: Vec<SqliteRow> = sqlx::query(
            "SELECT content, metadata, embedding FROM chunks WHERE collection = ? ORDER BY rowid ASC",
        )
        .bind(collection)
        .fetch_all(&self.pool)
        .await
        .map_err(|err| RagError::Retrieval(err.to_string()))?;

        let mut scored = Vec::with_capacity(rows.len());
        for row in rows {
            let embedding = decode_vector(row.get::<Vec<u8>, _>("embedding").as_slice());
            scored.push(ScoredDocument {
                score: cosine_similarity(&query_vector, &embedding),
                document: row_to_document(&row)?,
            });
        }

        // Stable sort keeps insertion order among equal scores.
        scored.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(Ordering::Equal));
        scored.truncate(k);
        Ok(scored)
    }

    async fn delete_collection(&self, name: &str) -> Result<()> {
        let mut tx = self.pool.begin().await.map_err(storage_err)?;
        sqlx::query("DELETE FROM chunks WHERE collection = ?")
            .bind(name)
            .execute(&mut *tx)
            .await
            .map_err(storage_err)?;
        let removed = sqlx::query("DELETE FROM collections WHERE name = ?")
            .bind(name)
            .execute(&mut *tx)
            .await
            .map_err(storage_err)?
            .rows_affected();
        tx.commit().await.map_err(storage_err)?;

        self.registry.evict(name).await;
        if removed == 0 {
            tracing::debug!("delete of absent collection {} ignored", name);
        }
        Ok(())
    }

    async fn list_collections(&self) -> Result<Vec<String>> {
        let rows = sqlx::query("SELECT name FROM collections ORDER BY name ASC")
            .fetch_all(&self.pool)
            .await
            .map_err(storage_err)?;
        Ok(rows
            .into_iter()
            .map(|row| row.get::<String, _>("name"))
            .collect())
    }
}

fn row_to_document(row: &SqliteRow) -> Result<Document> {
    let metadata: Metadata = serde_json::from_str(&row.get::<String, _>("metadata"))
        .map_err(|err| RagError::Retrieval(format!("corrupt chunk metadata: {err}")))?;
    Ok(Document::new(row.get::<String, _>("content"), metadata))
}

fn encode_vector(vector: &[f32]) -> Vec<u8> {
    vector.iter().flat_map(|v| v.to_le_bytes()).collect()
}

fn decode_vector(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect()
}

fn storage_err(err: sqlx::Error) -> RagError {
    RagError::storage(BACKEND, err)
}
