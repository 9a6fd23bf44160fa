//! End-to-end tests for `POST /execute` against a local data source

use axum::{
    body::Body,
    extract::Path,
    http::{Request, StatusCode},
    routing::get,
    Router,
};
use pyjit_core::{ExecutionService, ServiceConfig, StagingConfig};
use pyjit_sandbox::ExecutionLimits;
use pyjit_server::app;
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tower::ServiceExt;

/// Data source on 127.0.0.1:0 serving `/abc`, `/echo/:id` and `/big`; anything else is 404.
async fn start_data_source() -> SocketAddr {
    let routes = Router::new()
        .route("/abc", get(|| async { "abc" }))
        .route("/echo/:id", get(|Path(id): Path<String>| async move { format!("payload-{}", id) }))
        .route("/big", get(|| async { vec![b'x'; 4096] }));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, routes).await.unwrap();
    });
    addr
}

struct Harness {
    router: Router,
    staging: TempDir,
    source: SocketAddr,
}

impl Harness {
    async fn new() -> Self {
        Self::with_limits(ExecutionLimits::default()).await
    }

    async fn with_limits(limits: ExecutionLimits) -> Self {
        let staging = TempDir::new().unwrap();
        let config = ServiceConfig {
            staging: StagingConfig {
                dir: Some(staging.path().to_path_buf()),
                max_data_bytes: 1024,
                fetch_timeout: Duration::from_secs(5),
            },
            limits,
        };
        let service = ExecutionService::new(config).unwrap();
        Self {
            router: app(Arc::new(service)),
            staging,
            source: start_data_source().await,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.source, path)
    }

    async fn post(&self, code: impl Into<Body>, data_url: Option<String>) -> (StatusCode, Value) {
        let mut builder = Request::builder()
            .method("POST")
            .uri("/execute")
            .header("File-Format", "csv");
        if let Some(url) = data_url {
            builder = builder.header("Data-URL", url);
        }
        let response = self
            .router
            .clone()
            .oneshot(builder.body(code.into()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let body = axum::body::to_bytes(response.into_body(), 64 * 1024)
            .await
            .unwrap();
        (status, serde_json::from_slice(&body).unwrap())
    }

    fn staged_file_count(&self) -> usize {
        std::fs::read_dir(self.staging.path()).unwrap().count()
    }
}

#[tokio::test]
async fn test_simple_program_succeeds() {
    let h = Harness::new().await;
    let (status, body) = h.post("x = 1 + 1", Some(h.url("/abc"))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"result": "Code executed successfully"}));
    assert_eq!(h.staged_file_count(), 0);
}

#[tokio::test]
async fn test_empty_program_succeeds() {
    let h = Harness::new().await;
    let (status, body) = h.post("", Some(h.url("/abc"))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"result": "Code executed successfully"}));
    assert_eq!(h.staged_file_count(), 0);
}

#[tokio::test]
async fn test_script_sees_fetched_data() {
    let h = Harness::new().await;
    let code = "text = data_file.read()\nassert text == 'abc', text\nassert len(data_file.lines()) == 1";
    let (status, body) = h.post(code, Some(h.url("/abc"))).await;
    assert_eq!(status, StatusCode::OK, "{}", body);
}

#[tokio::test]
async fn test_import_is_forbidden() {
    let h = Harness::new().await;
    let (status, body) = h.post("import os", Some(h.url("/abc"))).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    let message = body["error"].as_str().unwrap();
    assert!(message.contains("Forbidden"), "{}", message);
    assert_eq!(h.staged_file_count(), 0);
}

#[tokio::test]
async fn test_escape_attempts_are_rejected() {
    let h = Harness::new().await;
    for code in [
        "().__class__.__bases__[0].__subclasses__()",
        "open('/etc/passwd').read()",
        "eval('1')",
        "x = getattr",
        "'abc'.format",
        "from os import path",
    ] {
        let (status, body) = h.post(code, Some(h.url("/abc"))).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR, "{}", code);
        let message = body["error"].as_str().unwrap();
        assert!(message.contains("Forbidden"), "{}: {}", code, message);
    }
    assert_eq!(h.staged_file_count(), 0);
}

#[tokio::test]
async fn test_non_2xx_source_is_400() {
    let h = Harness::new().await;
    let (status, body) = h.post("x = 1", Some(h.url("/missing"))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(
        body,
        json!({"error": "Failed to fetch data from the provided URL"})
    );
    assert_eq!(h.staged_file_count(), 0);
}

#[tokio::test]
async fn test_missing_data_url_is_500() {
    let h = Harness::new().await;
    let (status, body) = h.post("x = 1", None).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert!(body["error"].as_str().unwrap().contains("Data-URL"));
}

#[tokio::test]
async fn test_unreachable_source_is_500() {
    let h = Harness::new().await;
    // Bind then drop to get a port nothing listens on.
    let closed = {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap()
    };
    let (status, body) = h.post("x = 1", Some(format!("http://{}/abc", closed))).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert!(body["error"].is_string());
}

#[tokio::test]
async fn test_oversized_source_is_500() {
    let h = Harness::new().await;
    let (status, body) = h.post("x = 1", Some(h.url("/big"))).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert!(body["error"].as_str().unwrap().contains("1024"));
    assert_eq!(h.staged_file_count(), 0);
}

#[tokio::test]
async fn test_runtime_error_is_500_without_paths() {
    let h = Harness::new().await;
    let (status, body) = h.post("x = 1 // 0", Some(h.url("/abc"))).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    let message = body["error"].as_str().unwrap();
    assert!(message.starts_with("ZeroDivisionError"), "{}", message);
    assert!(!message.contains(&*h.staging.path().to_string_lossy()));
    assert_eq!(h.staged_file_count(), 0);
}

#[tokio::test]
async fn test_syntax_error_is_500() {
    let h = Harness::new().await;
    let (status, body) = h.post("x = (1 +", Some(h.url("/abc"))).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert!(body["error"].as_str().unwrap().starts_with("SyntaxError"));
}

#[tokio::test]
async fn test_invalid_utf8_body_is_500() {
    let h = Harness::new().await;
    let (status, body) = h.post(vec![0xff, 0xfe, 0x00], Some(h.url("/abc"))).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert!(body["error"].as_str().unwrap().contains("UTF-8"));
    assert_eq!(h.staged_file_count(), 0);
}

#[tokio::test]
async fn test_runaway_script_is_stopped() {
    let h = Harness::with_limits(ExecutionLimits {
        max_steps: 10_000,
        ..Default::default()
    })
    .await;
    let (status, body) = h.post("while True:\n    pass", Some(h.url("/abc"))).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert!(body["error"].as_str().unwrap().contains("limit"));
    assert_eq!(h.staged_file_count(), 0);
}

#[tokio::test]
async fn test_concurrent_requests_see_only_their_own_data() {
    let h = Arc::new(Harness::new().await);
    let mut tasks = Vec::new();
    for i in 0..12 {
        let h = Arc::clone(&h);
        tasks.push(tokio::spawn(async move {
            let code = format!(
                "seen = data_file.read()\nassert seen == 'payload-{}', seen\nassert data_file.size() == {}",
                i,
                format!("payload-{}", i).len()
            );
            h.post(code, Some(h.url(&format!("/echo/{}", i)))).await
        }));
    }
    for task in tasks {
        let (status, body) = task.await.unwrap();
        assert_eq!(status, StatusCode::OK, "{}", body);
    }
    assert_eq!(h.staged_file_count(), 0);
}

#[tokio::test]
async fn test_only_post_execute_is_routed() {
    let h = Harness::new().await;
    let response = h
        .router
        .clone()
        .oneshot(
            Request::builder()
                .method("GET")
                .uri("/execute")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);

    let response = h
        .router
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/other")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}
