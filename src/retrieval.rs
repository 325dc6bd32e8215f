use std::sync::Arc;

use crate::error::{RagError, Result};
use crate::llm::LanguageModel;
use crate::models::{Document, RagAnswer};
use crate::vector_store::VectorStore;

#[derive(Clone)]
pub struct Retriever {
    store: Arc<dyn VectorStore>,
    llm: Arc<dyn LanguageModel>,
    default_k: usize,
}

impl Retriever {
    pub fn new(store: Arc<dyn VectorStore>, llm: Arc<dyn LanguageModel>, default_k: usize) -> Self {
        Self {
            store,
            llm,
            default_k,
        }
    }

    pub fn resolve_k(&self, k: Option<usize>) -> Result<usize> {
        match k.unwrap_or(self.default_k) {
            0 => Err(RagError::Retrieval("k must be a positive integer".to_string())),
            k => Ok(k),
        }
    }

    pub async fn retrieve(
        &self,
        query: &str,
        collection: &str,
        k: Option<usize>,
    ) -> Result<Vec<Document>> {
        let k = self.resolve_k(k)?;
        self.store.retrieve(query, collection, k).await
    }

    /// Retrieves context for `query` and asks the model for a grounded answer.
    /// Sources come back in similarity order alongside the answer.
    pub async fn answer(
        &self,
        query: &str,
        collection: &str,
        k: Option<usize>,
    ) -> Result<RagAnswer> {
        let sources = self.retrieve(query, collection, k).await?;
        let context: Vec<String> = sources.iter().map(|doc| doc.content.clone()).collect();

        tracing::debug!(
            "answering from {} chunks of {}",
            context.len(),
            collection
        );
        let answer = self.llm.generate_with_context(query, &context, None).await?;

        Ok(RagAnswer { answer, sources })
    }
}
