use std::net::SocketAddr;
use std::path::{Path as FsPath, PathBuf};
use std::sync::Arc;

use anyhow::Result;
use axum::extract::multipart::MultipartRejection;
use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{DefaultBodyLimit, Multipart, Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json};
use axum::routing::{delete, get, post};
use axum::Router;
use serde_json::{json, Value};
use tower_http::trace::TraceLayer;

use crate::config::AppConfig;
use crate::error::RagError;
use crate::ingest::Ingestor;
use crate::llm::LanguageModel;
use crate::models::{
    ChatRequest, ChatResponse, CollectionsResponse, IngestParams, IngestResponse, Metadata,
    MessageResponse, QueryRequest, QueryResponse,
};
use crate::retrieval::Retriever;
use crate::vector_store::VectorStore;

#[derive(Clone)]
pub struct AppState {
    store: Arc<dyn VectorStore>,
    llm: Arc<dyn LanguageModel>,
    ingestor: Ingestor,
    retriever: Retriever,
    upload_dir: PathBuf,
}

impl AppState {
    pub fn new(
        config: &AppConfig,
        store: Arc<dyn VectorStore>,
        llm: Arc<dyn LanguageModel>,
    ) -> Self {
        Self {
            ingestor: Ingestor::new(store.clone(), &config.chunking),
            retriever: Retriever::new(store.clone(), llm.clone(), config.retrieval.default_k),
            store,
            llm,
            upload_dir: config.storage.upload_dir.clone(),
        }
    }
}

pub fn router(state: AppState, max_upload_bytes: usize) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/chat", post(chat_handler))
        .route("/ingest", post(ingest_handler))
        .route("/query", post(query_handler))
        .route("/collections", get(list_collections))
        .route("/collections/:collection_name", delete(delete_collection))
        .layer(DefaultBodyLimit::max(max_upload_bytes))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub async fn run_server(
    config: AppConfig,
    store: Arc<dyn VectorStore>,
    llm: Arc<dyn LanguageModel>,
) -> Result<()> {
    tokio::fs::create_dir_all(&config.storage.upload_dir).await?;

    let state = AppState::new(&config, store, llm);
    let app = router(state, config.server.max_upload_bytes);

    let addr: SocketAddr = config.server.bind_addr.parse()?;
    tracing::info!("listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

async fn chat_handler(
    State(state): State<AppState>,
    request: Result<Json<ChatRequest>, JsonRejection>,
) -> Result<Json<ChatResponse>, ApiError> {
    let Json(request) = request?;
    let answer = state
        .llm
        .generate(&request.prompt, request.system_prompt.as_deref())
        .await?;
    Ok(Json(ChatResponse { answer }))
}

async fn ingest_handler(
    State(state): State<AppState>,
    params: Result<Query<IngestParams>, QueryRejection>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<IngestResponse>, ApiError> {
    let Query(params) = params?;
    let mut multipart = multipart?;
    let mut upload: Option<(String, tempfile::NamedTempFile)> = None;
    let mut metadata = Metadata::new();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|err| ApiError::bad_request(err.to_string()))?
    {
        let name = field.name().map(str::to_string);
        match name.as_deref() {
            Some("file") => {
                let filename = sanitize_filename(field.file_name().unwrap_or("upload"));
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|err| ApiError::bad_request(err.to_string()))?;
                let temp = write_upload(&state.upload_dir, &filename, &bytes).await?;
                upload = Some((filename, temp));
            }
            Some("metadata") => {
                let text = field
                    .text()
                    .await
                    .map_err(|err| ApiError::bad_request(err.to_string()))?;
                metadata = parse_metadata(&text)?;
            }
            _ => {}
        }
    }

    let Some((filename, temp)) = upload else {
        return Err(ApiError::bad_request("missing multipart field `file`".to_string()));
    };

    let mut stamped = Metadata::new();
    stamped.insert("source".to_string(), Value::String(filename.clone()));
    stamped.extend(metadata);

    // `temp` is removed from disk when it drops, on success and failure alike.
    let chunks = state
        .ingestor
        .ingest(&params.collection_name, temp.path(), Some(&stamped))
        .await?;

    tracing::info!(
        "ingested upload {} into {} ({} chunks)",
        filename,
        params.collection_name,
        chunks
    );
    Ok(Json(IngestResponse {
        message: "File ingested successfully".to_string(),
        chunks,
    }))
}

async fn query_handler(
    State(state): State<AppState>,
    request: Result<Json<QueryRequest>, JsonRejection>,
) -> Result<Json<QueryResponse>, ApiError> {
    let Json(request) = request?;
    if request.k == Some(0) {
        return Err(ApiError::bad_request("k must be a positive integer".to_string()));
    }

    let result = state
        .retriever
        .answer(&request.query, &request.collection_name, request.k)
        .await?;

    Ok(Json(QueryResponse {
        answer: result.answer,
        sources: result.sources,
    }))
}

async fn list_collections(
    State(state): State<AppState>,
) -> Result<Json<CollectionsResponse>, ApiError> {
    let collections = state.store.list_collections().await?;
    Ok(Json(CollectionsResponse { collections }))
}

async fn delete_collection(
    State(state): State<AppState>,
    Path(collection_name): Path<String>,
) -> Result<Json<MessageResponse>, ApiError> {
    state.store.delete_collection(&collection_name).await?;
    Ok(Json(MessageResponse {
        message: format!("Collection '{collection_name}' deleted"),
    }))
}

/// Writes the upload into `upload_dir` under a unique name that keeps the
/// original extension, so loader dispatch still sees `.pdf` and friends.
async fn write_upload(
    upload_dir: &FsPath,
    filename: &str,
    bytes: &[u8],
) -> Result<tempfile::NamedTempFile, ApiError> {
    tokio::fs::create_dir_all(upload_dir)
        .await
        .map_err(|err| ApiError::internal(format!("failed to create upload dir: {err}")))?;

    let suffix = FsPath::new(filename)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| format!(".{ext}"))
        .unwrap_or_default();

    let temp = tempfile::Builder::new()
        .prefix("upload-")
        .suffix(&suffix)
        .tempfile_in(upload_dir)
        .map_err(|err| ApiError::internal(format!("failed to create upload file: {err}")))?;

    tokio::fs::write(temp.path(), bytes)
        .await
        .map_err(|err| ApiError::internal(format!("failed to write upload: {err}")))?;
    Ok(temp)
}

fn sanitize_filename(raw: &str) -> String {
    let name = raw.rsplit(['/', '\\']).next().unwrap_or("").trim();
    if name.is_empty() || name == "." || name == ".." {
        "upload".to_string()
    } else {
        name.to_string()
    }
}

fn parse_metadata(text: &str) -> Result<Metadata, ApiError> {
    if text.trim().is_empty() {
        return Ok(Metadata::new());
    }
    match serde_json::from_str::<Value>(text) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(_) => Err(ApiError::bad_request(
            "metadata must be a JSON object".to_string(),
        )),
        Err(err) => Err(ApiError::bad_request(format!("invalid metadata JSON: {err}"))),
    }
}

#[derive(Debug)]
struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn bad_request(message: String) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message,
        }
    }

    fn internal(message: String) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message,
        }
    }
}

impl From<RagError> for ApiError {
    fn from(value: RagError) -> Self {
        tracing::error!("request failed: {}", value);
        Self::internal(value.to_string())
    }
}

impl From<JsonRejection> for ApiError {
    fn from(value: JsonRejection) -> Self {
        Self::bad_request(value.body_text())
    }
}

impl From<QueryRejection> for ApiError {
    fn from(value: QueryRejection) -> Self {
        Self::bad_request(value.body_text())
    }
}

impl From<MultipartRejection> for ApiError {
    fn from(value: MultipartRejection) -> Self {
        Self::bad_request(value.body_text())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let body = json!({ "detail": self.message });
        (self.status, Json(body)).into_response()
    }
}
