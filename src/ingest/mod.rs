pub mod docx;
pub mod pdf;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use walkdir::WalkDir;

use crate::config::ChunkingConfig;
use crate::error::{RagError, Result};
use crate::models::{Document, Metadata};
use crate::splitter::TextSplitter;
use crate::vector_store::VectorStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    Directory,
    Pdf,
    Docx,
    Text,
}

impl SourceKind {
    pub fn classify(path: &Path) -> Self {
        if path.is_dir() {
            return SourceKind::Directory;
        }
        match extension(path).as_deref() {
            Some("pdf") => SourceKind::Pdf,
            Some("docx") => SourceKind::Docx,
            _ => SourceKind::Text,
        }
    }
}

/// Loads, splits and stores documents into named collections.
#[derive(Clone)]
pub struct Ingestor {
    store: Arc<dyn VectorStore>,
    splitter: TextSplitter,
}

impl Ingestor {
    pub fn new(store: Arc<dyn VectorStore>, chunking: &ChunkingConfig) -> Self {
        Self {
            store,
            splitter: TextSplitter::new(chunking.chunk_size, chunking.chunk_overlap),
        }
    }

    /// Ingests a file or directory into `collection` and returns the chunk count.
    ///
    /// Chunks written before a failure stay in the store.
    pub async fn ingest(
        &self,
        collection: &str,
        source: &Path,
        metadata: Option<&Metadata>,
    ) -> Result<usize> {
        let documents = load_documents(source).await?;
        let mut chunks = self.splitter.split_documents(&documents);

        if let Some(extra) = metadata.filter(|m| !m.is_empty()) {
            for chunk in &mut chunks {
                chunk.merge_metadata(extra);
            }
        }

        if chunks.is_empty() {
            tracing::warn!("{} produced no chunks", source.display());
        }

        self.store.add_documents(&chunks, collection).await?;

        tracing::info!(
            "ingested {} ({} documents, {} chunks) into {}",
            source.display(),
            documents.len(),
            chunks.len(),
            collection
        );
        Ok(chunks.len())
    }
}

/// Loads every document under `source`, dispatching on directory and extension.
pub async fn load_documents(source: &Path) -> Result<Vec<Document>> {
    if !source.exists() {
        return Err(RagError::ingestion(
            source.display().to_string(),
            "no such file or directory",
        ));
    }

    match SourceKind::classify(source) {
        SourceKind::Directory => load_directory(source).await,
        kind => load_file(source, kind).await,
    }
}

async fn load_file(path: &Path, kind: SourceKind) -> Result<Vec<Document>> {
    match kind {
        SourceKind::Pdf => pdf::load_pdf(path).await,
        SourceKind::Docx => {
            let docx_path = path.to_path_buf();
            tokio::task::spawn_blocking(move || docx::load_docx(&docx_path))
                .await
                .map_err(|err| {
                    RagError::ingestion(
                        path.display().to_string(),
                        format!("DOCX extraction task panicked: {err}"),
                    )
                })?
        }
        _ => load_text(path).await,
    }
}

async fn load_directory(dir: &Path) -> Result<Vec<Document>> {
    let files = collect_files(dir)?;
    tracing::info!("loading {} files from {}", files.len(), dir.display());

    let mut documents = Vec::new();
    for file in files {
        let kind = SourceKind::classify(&file);
        documents.extend(load_file(&file, kind).await?);
    }
    Ok(documents)
}

/// Regular, non-hidden files that have an extension, sorted by path.
fn collect_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    let walker = WalkDir::new(dir)
        .min_depth(1)
        .into_iter()
        .filter_entry(|entry| !is_hidden(entry.file_name().to_str()));

    for entry in walker {
        let entry = entry
            .map_err(|err| RagError::ingestion(dir.display().to_string(), err))?;
        if entry.file_type().is_file() && entry.path().extension().is_some() {
            files.push(entry.into_path());
        }
    }

    files.sort();
    Ok(files)
}

async fn load_text(path: &Path) -> Result<Vec<Document>> {
    let source = path.display().to_string();
    let content = tokio::fs::read_to_string(path)
        .await
        .map_err(|err| RagError::ingestion(&source, format!("failed to read text: {err}")))?;
    Ok(vec![Document::with_source(content, source)])
}

fn extension(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_ascii_lowercase())
}

fn is_hidden(name: Option<&str>) -> bool {
    name.map(|n| n.starts_with('.')).unwrap_or(false)
}
