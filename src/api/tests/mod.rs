use super::*;
use crate::engine::Options;
use crate::engine::test_helpers::{self, Recorder, TEST_KIND, scripted_registry, scripted_task};
use crate::types::TaskState;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::response::Response;
use std::time::Duration;
use tower::ServiceExt;

mod tasks;

/// Helper to create a test engine wrapped in Arc, running the scripted job kind
async fn create_test_engine(
    options: Options,
) -> (Arc<TaskEngine>, Arc<Recorder>, tempfile::TempDir) {
    let recorder = Recorder::new();
    let (engine, temp_dir) =
        test_helpers::create_test_engine(scripted_registry(&recorder, options)).await;
    (Arc::new(engine), recorder, temp_dir)
}

fn test_router(engine: &Arc<TaskEngine>) -> Router {
    create_router(engine.clone(), engine.get_config())
}

async fn json_body(response: Response) -> serde_json::Value {
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&body).unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn post(uri: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .body(Body::empty())
        .unwrap()
}

#[tokio::test]
async fn test_api_server_spawns() {
    let (engine, _recorder, _temp_dir) = create_test_engine(Options::default()).await;

    let mut config = (*engine.get_config()).clone();
    config.server.api.bind_address = "127.0.0.1:0".parse().unwrap();
    let config = Arc::new(config);

    let api_handle = tokio::spawn({
        let engine = engine.clone();
        let config = config.clone();
        async move { start_api_server(engine, config).await }
    });

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(!api_handle.is_finished(), "server exited early");
    api_handle.abort();
}

#[tokio::test]
async fn test_cors_enabled() {
    let (engine, _recorder, _temp_dir) = create_test_engine(Options::default()).await;

    let mut config = (*engine.get_config()).clone();
    config.server.api.cors_enabled = true;
    config.server.api.cors_origins = vec!["*".to_string()];
    let app = create_router(engine, Arc::new(config));

    let request = Request::builder()
        .uri("/health")
        .header("Origin", "http://localhost:3000")
        .body(Body::empty())
        .unwrap();
    let response = app.oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert!(
        response
            .headers()
            .contains_key("access-control-allow-origin")
    );
}

#[tokio::test]
async fn test_cors_disabled() {
    let (engine, _recorder, _temp_dir) = create_test_engine(Options::default()).await;

    let mut config = (*engine.get_config()).clone();
    config.server.api.cors_enabled = false;
    let app = create_router(engine, Arc::new(config));

    let request = Request::builder()
        .uri("/health")
        .header("Origin", "http://localhost:3000")
        .body(Body::empty())
        .unwrap();
    let response = app.oneshot(request).await.unwrap();

    assert!(
        !response
            .headers()
            .contains_key("access-control-allow-origin")
    );
}
