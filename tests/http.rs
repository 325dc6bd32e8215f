mod common;

use std::sync::Arc;

use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use axum::Router;
use serde_json::{json, Value};
use tower::ServiceExt;

use docrag::config::AppConfig;
use docrag::server::{router, AppState};
use docrag::vector_store::VectorStore;

use common::{sqlite_store, RecordingModel};

const BOUNDARY: &str = "docrag-test-boundary";

struct Harness {
    app: Router,
    store: Arc<dyn VectorStore>,
    llm: Arc<RecordingModel>,
    upload_dir: std::path::PathBuf,
    _dir: tempfile::TempDir,
}

async fn harness() -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let store = sqlite_store(&dir).await;
    let llm = Arc::new(RecordingModel::default());

    let mut config = AppConfig::default();
    config.chunking.chunk_size = 200;
    config.chunking.chunk_overlap = 20;
    config.storage.upload_dir = dir.path().join("uploads");

    let state = AppState::new(&config, store.clone(), llm.clone());
    Harness {
        app: router(state, config.server.max_upload_bytes),
        store,
        llm,
        upload_dir: config.storage.upload_dir.clone(),
        _dir: dir,
    }
}

fn multipart_body(filename: &str, content: &str, metadata: Option<&str>) -> String {
    let mut body = format!(
        "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"{filename}\"\r\n\
         Content-Type: text/plain\r\n\r\n{content}\r\n"
    );
    if let Some(metadata) = metadata {
        body.push_str(&format!(
            "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"metadata\"\r\n\r\n{metadata}\r\n"
        ));
    }
    body.push_str(&format!("--{BOUNDARY}--\r\n"));
    body
}

fn ingest_request(collection: &str, body: String) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(format!("/ingest?collection_name={collection}"))
        .header(
            "content-type",
            format!("multipart/form-data; boundary={BOUNDARY}"),
        )
        .body(Body::from(body))
        .unwrap()
}

fn json_request(method: &str, uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, body)
}

#[tokio::test]
async fn health_reports_ok() {
    let h = harness().await;
    let request = Request::builder().uri("/health").body(Body::empty()).unwrap();
    let (status, body) = send(&h.app, request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "status": "ok" }));
}

#[tokio::test]
async fn upload_is_ingested_and_temp_file_removed() {
    let h = harness().await;
    let body = multipart_body(
        "report.txt",
        "The quarterly revenue was $4.2 million in Q3.",
        Some(r#"{"source_tag":"upload-1"}"#),
    );

    let (status, response) = send(&h.app, ingest_request("finance", body)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(response["message"], "File ingested successfully");
    assert_eq!(response["chunks"], 1);

    let leftovers: Vec<_> = std::fs::read_dir(&h.upload_dir).unwrap().collect();
    assert!(leftovers.is_empty());

    let stored = h.store.retrieve("revenue", "finance", 5).await.unwrap();
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].metadata["source"], "report.txt");
    assert_eq!(stored[0].metadata["source_tag"], "upload-1");
}

#[tokio::test]
async fn failed_upload_still_removes_temp_file() {
    let h = harness().await;
    let mut body = format!(
        "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"broken.docx\"\r\n\r\n"
    );
    body.push_str("not a zip archive\r\n");
    body.push_str(&format!("--{BOUNDARY}--\r\n"));

    let (status, response) = send(&h.app, ingest_request("docs", body)).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert!(response["detail"].as_str().unwrap().contains("ZIP"));

    let leftovers: Vec<_> = std::fs::read_dir(&h.upload_dir).unwrap().collect();
    assert!(leftovers.is_empty());
}

#[tokio::test]
async fn upload_without_file_field_is_rejected() {
    let h = harness().await;
    let body = format!(
        "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"metadata\"\r\n\r\n{{}}\r\n--{BOUNDARY}--\r\n"
    );
    let (status, response) = send(&h.app, ingest_request("docs", body)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(response["detail"].as_str().unwrap().contains("file"));
}

#[tokio::test]
async fn query_answers_with_sources() {
    let h = harness().await;
    let body = multipart_body("report.txt", "The quarterly revenue was $4.2 million in Q3.", None);
    send(&h.app, ingest_request("finance", body)).await;

    let (status, response) = send(
        &h.app,
        json_request(
            "POST",
            "/query",
            json!({ "query": "What was Q3 revenue?", "collection_name": "finance", "k": 3 }),
        ),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(response["answer"], "recorded answer");
    let sources = response["sources"].as_array().unwrap();
    assert_eq!(sources.len(), 1);
    assert!(sources[0]["content"]
        .as_str()
        .unwrap()
        .contains("$4.2 million"));
    assert_eq!(sources[0]["metadata"]["source"], "report.txt");
}

#[tokio::test]
async fn query_with_zero_k_is_a_bad_request() {
    let h = harness().await;
    let (status, response) = send(
        &h.app,
        json_request(
            "POST",
            "/query",
            json!({ "query": "anything", "collection_name": "finance", "k": 0 }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(response["detail"].is_string());
    assert!(h.llm.calls.lock().unwrap().is_empty());
}

#[tokio::test]
async fn chat_passes_the_system_prompt_through() {
    let h = harness().await;
    let (status, response) = send(
        &h.app,
        json_request(
            "POST",
            "/chat",
            json!({ "prompt": "Hello", "system_prompt": "Be brief." }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(response["answer"], "recorded answer");
    assert_eq!(
        h.llm.calls.lock().unwrap()[0],
        ("Hello".to_string(), Some("Be brief.".to_string()))
    );
}

#[tokio::test]
async fn collections_are_listed_and_deleted() {
    let h = harness().await;
    for name in ["temp", "finance"] {
        let body = multipart_body("notes.txt", "some notes", None);
        send(&h.app, ingest_request(name, body)).await;
    }

    let list = || Request::builder().uri("/collections").body(Body::empty()).unwrap();
    let (_, response) = send(&h.app, list()).await;
    assert_eq!(response["collections"], json!(["finance", "temp"]));

    let delete = Request::builder()
        .method("DELETE")
        .uri("/collections/temp")
        .body(Body::empty())
        .unwrap();
    let (status, response) = send(&h.app, delete).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(response["message"], "Collection 'temp' deleted");

    let (_, response) = send(&h.app, list()).await;
    assert_eq!(response["collections"], json!(["finance"]));
}

#[tokio::test]
async fn malformed_requests_get_a_detail_body() {
    let h = harness().await;

    let broken_json = Request::builder()
        .method("POST")
        .uri("/query")
        .header("content-type", "application/json")
        .body(Body::from("{\"query\": "))
        .unwrap();
    let (status, response) = send(&h.app, broken_json).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(response["detail"].is_string());

    let (status, response) = send(
        &h.app,
        json_request("POST", "/query", json!({ "query": "no collection" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(response["detail"].as_str().unwrap().contains("collection_name"));

    let no_collection = Request::builder()
        .method("POST")
        .uri("/ingest")
        .header(
            "content-type",
            format!("multipart/form-data; boundary={BOUNDARY}"),
        )
        .body(Body::from(multipart_body("notes.txt", "text", None)))
        .unwrap();
    let (status, response) = send(&h.app, no_collection).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(response["detail"].as_str().unwrap().contains("collection_name"));

    let not_multipart = json_request("POST", "/ingest?collection_name=docs", json!({}));
    let (status, response) = send(&h.app, not_multipart).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(response["detail"].is_string());
    assert!(h.store.list_collections().await.unwrap().is_empty());
}
