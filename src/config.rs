use std::env;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::{RagError, Result};

pub const DEFAULT_CONFIG_PATH: &str = "config.yaml";

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind_addr: String,
    pub max_upload_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:8000".to_string(),
            max_upload_bytes: 50 * 1024 * 1024,
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct ChunkingConfig {
    pub chunk_size: usize,
    pub chunk_overlap: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: 1000,
            chunk_overlap: 200,
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct RetrievalConfig {
    pub default_k: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self { default_k: 5 }
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// `sqlite` or `qdrant`.
    pub backend: String,
    #[serde(alias = "db_path")]
    pub chroma_db_path: PathBuf,
    pub upload_dir: PathBuf,
    pub qdrant_url: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: "sqlite".to_string(),
            chroma_db_path: PathBuf::from("./chroma_db"),
            upload_dir: PathBuf::from("./uploads"),
            qdrant_url: "http://127.0.0.1:6333".to_string(),
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    pub model: String,
    pub base_url: String,
    pub api_key: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            model: "gpt-3.5-turbo".to_string(),
            base_url: "https://api.openai.com/v1".to_string(),
            api_key: String::new(),
            temperature: 0.7,
            max_tokens: 1024,
            timeout_secs: 120,
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    /// `openai`, `huggingface` or `ollama`.
    pub provider: String,
    pub model: String,
    pub base_url: Option<String>,
    pub api_key: Option<String>,
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: "openai".to_string(),
            model: "text-embedding-3-small".to_string(),
            base_url: None,
            api_key: None,
            timeout_secs: 120,
        }
    }
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub chunking: ChunkingConfig,
    pub retrieval: RetrievalConfig,
    pub storage: StorageConfig,
    pub llm: LlmConfig,
    pub embedding: EmbeddingConfig,
}

impl AppConfig {
    /// Loads `DOCRAG_CONFIG` (or `config.yaml`), then applies environment overrides.
    ///
    /// A missing default file is not an error; built-in defaults apply instead.
    pub fn load() -> Result<Self> {
        match env::var("DOCRAG_CONFIG") {
            Ok(path) => Self::from_file(path),
            Err(_) if Path::new(DEFAULT_CONFIG_PATH).exists() => {
                Self::from_file(DEFAULT_CONFIG_PATH)
            }
            Err(_) => {
                let mut config = Self::default();
                config.apply_overrides(|key| env::var(key).ok());
                config.validate()?;
                Ok(config)
            }
        }
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        Self::from_file_with(path.as_ref(), |key| env::var(key).ok())
    }

    /// Reads `path`, applies overrides from `lookup`, then validates the result.
    fn from_file_with(path: &Path, lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|err| {
            RagError::Configuration(format!("failed to read {}: {err}", path.display()))
        })?;

        let mut config = Self::parse_yaml(&raw).map_err(|err| match err {
            RagError::Configuration(message) => {
                RagError::Configuration(format!("{}: {message}", path.display()))
            }
            other => other,
        })?;
        config.apply_overrides(lookup);
        config.validate()?;
        Ok(config)
    }

    pub fn from_yaml(raw: &str) -> Result<Self> {
        let config = Self::parse_yaml(raw)?;
        config.validate()?;
        Ok(config)
    }

    fn parse_yaml(raw: &str) -> Result<Self> {
        serde_yaml::from_str(raw)
            .map_err(|err| RagError::Configuration(format!("invalid YAML: {err}")))
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(bind) = lookup("DOCRAG_BIND") {
            self.server.bind_addr = bind;
        }
        if let Some(key) = lookup("LLM_API_KEY") {
            self.llm.api_key = key;
        }
        if let Some(url) = lookup("LLM_BASE_URL") {
            self.llm.base_url = url;
        }
        if let Some(model) = lookup("LLM_MODEL") {
            self.llm.model = model;
        }
        if let Some(provider) = lookup("EMBEDDING_PROVIDER") {
            self.embedding.provider = provider;
        }
        if let Some(model) = lookup("EMBEDDING_MODEL") {
            self.embedding.model = model;
        }
        if let Some(key) = lookup("EMBEDDING_API_KEY") {
            self.embedding.api_key = Some(key);
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.chunking.chunk_size == 0 {
            return Err(RagError::Configuration(
                "chunking.chunk_size must be greater than zero".to_string(),
            ));
        }
        if self.chunking.chunk_overlap >= self.chunking.chunk_size {
            return Err(RagError::Configuration(format!(
                "chunking.chunk_overlap ({}) must be less than chunking.chunk_size ({})",
                self.chunking.chunk_overlap, self.chunking.chunk_size
            )));
        }
        if self.retrieval.default_k == 0 {
            return Err(RagError::Configuration(
                "retrieval.default_k must be greater than zero".to_string(),
            ));
        }
        if self.llm.max_tokens == 0 {
            return Err(RagError::Configuration(
                "llm.max_tokens must be greater than zero".to_string(),
            ));
        }
        if self.llm.model.trim().is_empty() || self.embedding.model.trim().is_empty() {
            return Err(RagError::Configuration(
                "llm.model and embedding.model must not be empty".to_string(),
            ));
        }
        Ok(())
    }

    pub fn sqlite_path(&self) -> PathBuf {
        self.storage.chroma_db_path.join("docrag.sqlite3")
    }
}
