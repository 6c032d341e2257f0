mod common;

use std::sync::Arc;

use axum::body::Body;
use axum::http::{header, Method, Request, StatusCode};
use axum::Router;
use serde_json::Value;
use tempfile::TempDir;
use tower::ServiceExt;

use common::{pipeline, test_config, EchoGenerator, VocabEmbedder, ANSWER, PARIS, PARIS_VOCAB};
use docqa::error::ServiceError;
use docqa::server::router;

const BOUNDARY: &str = "docqa-test-boundary";

fn app(tmp: &TempDir, embedder: VocabEmbedder) -> Router {
    router(pipeline(
        test_config(tmp.path()),
        Arc::new(embedder),
        Arc::new(EchoGenerator::default()),
    ))
}

fn upload(filename: &str, content: &[u8]) -> Request<Body> {
    let mut body = Vec::new();
    body.extend_from_slice(
        format!(
            "--{}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"{}\"\r\nContent-Type: application/octet-stream\r\n\r\n",
            BOUNDARY, filename
        )
        .as_bytes(),
    );
    body.extend_from_slice(content);
    body.extend_from_slice(format!("\r\n--{}--\r\n", BOUNDARY).as_bytes());

    Request::builder()
        .method(Method::POST)
        .uri("/process-pdf")
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={}", BOUNDARY),
        )
        .body(Body::from(body))
        .unwrap()
}

fn query(body: Value) -> Request<Body> {
    Request::builder()
        .method(Method::POST)
        .uri("/query")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

async fn send(app: &Router, req: Request<Body>) -> (StatusCode, Value) {
    let resp = app.clone().oneshot(req).await.unwrap();
    let status = resp.status();
    let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX)
        .await
        .unwrap();
    let json = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, json)
}

#[tokio::test]
async fn health_and_root() {
    let tmp = TempDir::new().unwrap();
    let app = app(&tmp, VocabEmbedder::new(PARIS_VOCAB));

    let (status, body) = send(&app, get("/health")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["service"], "docqa");
    assert!(body["version"].is_string());

    let (status, body) = send(&app, get("/")).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["message"].as_str().unwrap().contains("running"));
}

#[tokio::test]
async fn upload_then_query() {
    let tmp = TempDir::new().unwrap();
    let app = app(&tmp, VocabEmbedder::new(PARIS_VOCAB));

    let (status, body) = send(&app, upload("paris.txt", PARIS.as_bytes())).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["filename"], "paris.txt");
    assert_eq!(body["status"], "indexed");
    assert_eq!(body["chunks"], 2);

    let (status, body) = send(
        &app,
        query(serde_json::json!({
            "question": "What is Paris known for?",
            "filename": "paris.txt"
        })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["answer"], ANSWER);
    assert_eq!(body["filename"], "paris.txt");
    let sources = body["source_chunks"].as_array().unwrap();
    assert_eq!(sources.len(), 2);
    assert_eq!(sources[0]["chunk_index"], 1);
    assert!(sources[0]["content"].as_str().unwrap().contains("Eiffel Tower"));

    let (status, body) = send(&app, get("/documents")).await;
    assert_eq!(status, StatusCode::OK);
    let docs = body["documents"].as_array().unwrap();
    assert_eq!(docs.len(), 1);
    assert_eq!(docs[0]["filename"], "paris.txt");
    assert_eq!(docs[0]["status"]["state"], "indexed");
}

#[tokio::test]
async fn query_errors() {
    let tmp = TempDir::new().unwrap();
    let app = app(&tmp, VocabEmbedder::new(PARIS_VOCAB));

    let (status, body) = send(&app, query(serde_json::json!({ "question": "  " }))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "bad_request");

    let (status, body) = send(
        &app,
        query(serde_json::json!({ "question": "Hello?", "filename": "missing.pdf" })),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["code"], "not_found");
    assert!(body["error"]["message"]
        .as_str()
        .unwrap()
        .contains("missing.pdf"));
}

#[tokio::test]
async fn upload_errors() {
    let tmp = TempDir::new().unwrap();
    let app = app(&tmp, VocabEmbedder::new(PARIS_VOCAB));

    let (status, body) = send(&app, upload("slides.pptx", b"PK\x03\x04")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "bad_request");

    let (status, body) = send(&app, upload("broken.pdf", b"garbage bytes")).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["error"]["code"], "extraction_failed");
    assert!(body["error"]["message"]
        .as_str()
        .unwrap()
        .contains("broken.pdf"));

    let (_, body) = send(&app, get("/documents")).await;
    assert_eq!(body["documents"][0]["status"]["state"], "failed");
    assert_eq!(body["documents"][0]["status"]["stage"], "extracting");
}

#[tokio::test]
async fn exhausted_rate_limit_maps_to_429() {
    let tmp = TempDir::new().unwrap();
    let failures = (0..10)
        .map(|_| ServiceError::RateLimit("quota exceeded".into()))
        .collect();
    let app = app(
        &tmp,
        VocabEmbedder::new(PARIS_VOCAB).failing_first(failures),
    );

    let (status, body) = send(&app, upload("paris.txt", PARIS.as_bytes())).await;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(body["error"]["code"], "rate_limited");
}

#[tokio::test]
async fn delete_document() {
    let tmp = TempDir::new().unwrap();
    let app = app(&tmp, VocabEmbedder::new(PARIS_VOCAB));

    let delete = |name: &str| {
        Request::builder()
            .method(Method::DELETE)
            .uri(format!("/documents/{}", name))
            .body(Body::empty())
            .unwrap()
    };

    let (status, _) = send(&app, delete("paris.txt")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    send(&app, upload("paris.txt", PARIS.as_bytes())).await;
    let (status, body) = send(&app, delete("paris.txt")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["deleted"], "paris.txt");

    let (_, body) = send(&app, get("/documents")).await;
    assert!(body["documents"].as_array().unwrap().is_empty());
}
