//! PyJIT Server - HTTP surface
//!
//! One endpoint: `POST /execute` with the script as the body, the data
//! source in `Data-URL` and an advisory `File-Format`.

use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::post,
    Json, Router,
};
use pyjit_core::{report, ExecutionOutcome, ExecutionRequest, ExecutionService};
use pyjit_sandbox::ValidationError;
use std::future::Future;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;

pub const DATA_URL_HEADER: &str = "data-url";
pub const FILE_FORMAT_HEADER: &str = "file-format";

/// Router with the execute endpoint
pub fn app(service: Arc<ExecutionService>) -> Router {
    Router::new()
        .route("/execute", post(execute))
        .layer(TraceLayer::new_for_http())
        .with_state(service)
}

/// Serve on `listener` until `shutdown` resolves.
pub async fn serve(
    listener: TcpListener,
    service: Arc<ExecutionService>,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> std::io::Result<()> {
    axum::serve(listener, app(service))
        .with_graceful_shutdown(shutdown)
        .await
}

async fn execute(
    State(service): State<Arc<ExecutionService>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let outcome = match String::from_utf8(body.to_vec()) {
        Ok(code) => {
            let request = ExecutionRequest {
                code,
                data_url: header(&headers, DATA_URL_HEADER),
                file_format: header(&headers, FILE_FORMAT_HEADER),
            };
            service.execute(request).await
        }
        Err(_) => ExecutionOutcome::ValidationRejected(ValidationError::Syntax {
            line: 1,
            message: "program text is not valid UTF-8".to_string(),
        }),
    };

    let envelope = report(&outcome);
    let status =
        StatusCode::from_u16(envelope.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (status, Json(envelope.to_json())).into_response()
}

fn header(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .map(|value| String::from_utf8_lossy(value.as_bytes()).into_owned())
}
