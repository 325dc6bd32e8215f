use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Free-form chunk metadata: source path, page number, caller tags.
pub type Metadata = serde_json::Map<String, Value>;

/// A unit of retrievable text. Loaders produce whole documents, the splitter
/// turns them into chunks of the same shape.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub content: String,
    #[serde(default)]
    pub metadata: Metadata,
}

impl Document {
    pub fn new(content: impl Into<String>, metadata: Metadata) -> Self {
        Self {
            content: content.into(),
            metadata,
        }
    }

    pub fn with_source(content: impl Into<String>, source: impl Into<String>) -> Self {
        let mut metadata = Metadata::new();
        metadata.insert("source".to_string(), Value::String(source.into()));
        Self::new(content, metadata)
    }

    /// Overlays `extra` onto this document's metadata; keys in `extra` win.
    pub fn merge_metadata(&mut self, extra: &Metadata) {
        for (key, value) in extra {
            self.metadata.insert(key.clone(), value.clone());
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScoredDocument {
    pub document: Document,
    pub score: f32,
}

#[derive(Debug, Clone)]
pub struct RagAnswer {
    pub answer: String,
    pub sources: Vec<Document>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatRequest {
    pub prompt: String,
    #[serde(default)]
    pub system_prompt: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatResponse {
    pub answer: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryRequest {
    pub query: String,
    pub collection_name: String,
    #[serde(default)]
    pub k: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryResponse {
    pub answer: String,
    pub sources: Vec<Document>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct IngestParams {
    pub collection_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestResponse {
    pub message: String,
    pub chunks: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectionsResponse {
    pub collections: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageResponse {
    pub message: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn caller_metadata_wins_on_conflict() {
        let mut doc = Document::with_source("text", "/tmp/a.txt");
        doc.metadata.insert("page".to_string(), json!(2));

        let mut extra = Metadata::new();
        extra.insert("source".to_string(), json!("report.pdf"));
        extra.insert("source_tag".to_string(), json!("upload-1"));
        doc.merge_metadata(&extra);

        assert_eq!(doc.metadata["source"], json!("report.pdf"));
        assert_eq!(doc.metadata["source_tag"], json!("upload-1"));
        assert_eq!(doc.metadata["page"], json!(2));
    }

    #[test]
    fn query_request_k_is_optional() {
        let req: QueryRequest =
            serde_json::from_str(r#"{"query":"q","collection_name":"c"}"#).unwrap();
        assert_eq!(req.k, None);
    }
}
