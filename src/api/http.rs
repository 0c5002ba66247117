//! HTTP API
//!
//! Routes custody requests through the admission gate and maps gate
//! outcomes to HTTP responses. The caller identity arrives as a request
//! extension set by the TLS accept loop.

use std::sync::Arc;
use std::time::Instant;

use axum::{
    body::Body,
    extract::{DefaultBodyLimit, Multipart, Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Extension, Json, Router,
};
use futures::TryStreamExt;
use serde::{Deserialize, Serialize};
use tokio_util::io::{ReaderStream, StreamReader};
use tower_http::trace::TraceLayer;

use crate::error::Error;
use crate::gate::{AdmissionGate, Outcome};
use crate::identity::PeerIdentity;

/// Multipart field carrying the uploaded file
pub const UPLOAD_FIELD: &str = "file";

/// Shared application state
pub struct AppState {
    pub gate: AdmissionGate,
    pub started_at: Instant,
}

/// Build the router for all custody endpoints
pub fn create_router(gate: AdmissionGate, max_upload_bytes: usize) -> Router {
    let state = Arc::new(AppState {
        gate,
        started_at: Instant::now(),
    });

    Router::new()
        // Custody operations
        .route("/upload", post(handle_upload))
        .route("/files", get(handle_list))
        .route("/files/:name", get(handle_download).delete(handle_delete))
        // Liveness
        .route("/health", get(handle_health))
        .layer(DefaultBodyLimit::max(max_upload_bytes))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// ============ Response Types ============

/// Upload response
#[derive(Debug, Serialize, Deserialize)]
pub struct UploadResponse {
    pub client: String,
    pub stored_name: String,
    pub original_name: String,
    pub size_bytes: u64,
    pub created_at_millis: i64,
}

/// List response
#[derive(Debug, Serialize, Deserialize)]
pub struct ListResponse {
    pub files: Vec<String>,
}

/// Delete response
#[derive(Debug, Serialize, Deserialize)]
pub struct DeleteResponse {
    pub deleted: String,
}

/// Health response
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub healthy: bool,
    pub uptime_seconds: u64,
}

/// Error response
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

// ============ Handlers ============

async fn handle_upload(
    State(state): State<Arc<AppState>>,
    identity: Option<Extension<PeerIdentity>>,
    mut multipart: Multipart,
) -> Response {
    let identity = peer(identity);

    loop {
        let field = match multipart.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => break,
            Err(e) => {
                tracing::debug!("Malformed multipart upload from {}: {}", identity, e);
                break;
            }
        };

        if field.name() != Some(UPLOAD_FIELD) {
            continue;
        }

        let original_name = field.file_name().unwrap_or_default().to_string();
        let body = Box::pin(
            field.map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e)),
        );
        let outcome = state
            .gate
            .put(&identity, &original_name, StreamReader::new(body))
            .await;

        return outcome_response(outcome, |object| {
            Json(UploadResponse {
                client: identity.audit_name().to_string(),
                stored_name: object.stored_name,
                original_name: object.original_name,
                size_bytes: object.size_bytes,
                created_at_millis: object.created_at_millis,
            })
            .into_response()
        });
    }

    // No file part: still decided (and audited) by the gate
    let outcome = state.gate.put(&identity, "", tokio::io::empty()).await;
    outcome_response(outcome, |_| StatusCode::BAD_REQUEST.into_response())
}

async fn handle_list(
    State(state): State<Arc<AppState>>,
    identity: Option<Extension<PeerIdentity>>,
) -> Response {
    let identity = peer(identity);
    let outcome = state.gate.list(&identity).await;
    outcome_response(outcome, |files| Json(ListResponse { files }).into_response())
}

async fn handle_download(
    State(state): State<Arc<AppState>>,
    identity: Option<Extension<PeerIdentity>>,
    Path(name): Path<String>,
) -> Response {
    let identity = peer(identity);
    let outcome = state.gate.get(&identity, &name).await;

    outcome_response(outcome, |object| {
        let disposition = content_disposition(object.name.as_str());
        (
            StatusCode::OK,
            [
                (header::CONTENT_TYPE, "application/octet-stream".to_string()),
                (header::CONTENT_LENGTH, object.size_bytes.to_string()),
                (header::CONTENT_DISPOSITION, disposition),
            ],
            Body::from_stream(ReaderStream::new(object.file)),
        )
            .into_response()
    })
}

async fn handle_delete(
    State(state): State<Arc<AppState>>,
    identity: Option<Extension<PeerIdentity>>,
    Path(name): Path<String>,
) -> Response {
    let identity = peer(identity);
    let outcome = state.gate.delete(&identity, &name).await;
    outcome_response(outcome, |deleted| {
        Json(DeleteResponse {
            deleted: deleted.into_string(),
        })
        .into_response()
    })
}

async fn handle_health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(HealthResponse {
        healthy: true,
        uptime_seconds: state.started_at.elapsed().as_secs(),
    })
}

// ============ Helpers ============

fn peer(identity: Option<Extension<PeerIdentity>>) -> PeerIdentity {
    identity
        .map(|Extension(identity)| identity)
        .unwrap_or_else(PeerIdentity::anonymous)
}

fn outcome_response<T>(outcome: Outcome<T>, on_success: impl FnOnce(T) -> Response) -> Response {
    match outcome.into_result() {
        Ok(value) => on_success(value),
        Err(e) => error_response(&e),
    }
}

/// Map an error to a caller-visible response. Store and I/O failures are
/// reported generically; their detail is in the audit record and the log.
pub fn error_response(error: &Error) -> Response {
    let (status, code, message) = match error {
        Error::Unauthorized => (
            StatusCode::FORBIDDEN,
            "AccessDenied",
            "A verified client certificate is required".to_string(),
        ),
        Error::InvalidName(reason) => (
            StatusCode::BAD_REQUEST,
            "InvalidName",
            format!("Invalid file name: {}", reason),
        ),
        Error::NotFound(_) => (StatusCode::NOT_FOUND, "NotFound", "File not found".to_string()),
        _ => (
            StatusCode::INTERNAL_SERVER_ERROR,
            "InternalError",
            "The operation could not be completed".to_string(),
        ),
    };

    (
        status,
        Json(ErrorResponse {
            error: message,
            code: code.to_string(),
        }),
    )
        .into_response()
}

/// Attachment header suggesting `name` as the download filename
fn content_disposition(name: &str) -> String {
    let quoted: String = name
        .chars()
        .map(|c| if c == '"' || c == '\\' { '_' } else { c })
        .collect();
    format!("attachment; filename=\"{}\"", quoted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gate::MemoryAuditSink;
    use crate::store::{FileStore, FixedClock};
    use axum::http::{Method, Request};
    use tempfile::{tempdir, TempDir};
    use tower::ServiceExt;

    const BOUNDARY: &str = "wolfvault-test-boundary";

    async fn router() -> (TempDir, Router, Arc<MemoryAuditSink>) {
        let dir = tempdir().unwrap();
        let store = FileStore::with_clock(dir.path(), Arc::new(FixedClock::new(1_700_000_000_000)))
            .await
            .unwrap();
        let audit = Arc::new(MemoryAuditSink::new());
        let gate = AdmissionGate::new(Arc::new(store), audit.clone());
        (dir, create_router(gate, 1024 * 1024), audit)
    }

    fn request(method: Method, uri: &str, identity: Option<&str>) -> axum::http::request::Builder {
        let builder = Request::builder().method(method).uri(uri);
        match identity {
            Some(cn) => builder.extension(PeerIdentity::authenticated(cn)),
            None => builder,
        }
    }

    fn upload(identity: Option<&str>, filename: &str, content: &str) -> Request<Body> {
        let body = format!(
            "--{b}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"{f}\"\r\n\
             Content-Type: text/plain\r\n\r\n{c}\r\n--{b}--\r\n",
            b = BOUNDARY,
            f = filename,
            c = content
        );
        request(Method::POST, "/upload", identity)
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={}", BOUNDARY),
            )
            .body(Body::from(body))
            .unwrap()
    }

    async fn body_bytes(response: Response) -> Vec<u8> {
        axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap()
            .to_vec()
    }

    #[tokio::test]
    async fn test_upload_list_download_delete() {
        let (_dir, app, audit) = router().await;

        let response = app
            .clone()
            .oneshot(upload(Some("alice"), "report.txt", "0123456789"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let uploaded: UploadResponse = serde_json::from_slice(&body_bytes(response).await).unwrap();
        assert_eq!(uploaded.client, "alice");
        assert_eq!(uploaded.stored_name, "1700000000000-report.txt");
        assert_eq!(uploaded.size_bytes, 10);

        let response = app
            .clone()
            .oneshot(request(Method::GET, "/files", Some("alice")).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let listed: ListResponse = serde_json::from_slice(&body_bytes(response).await).unwrap();
        assert_eq!(listed.files, vec!["1700000000000-report.txt".to_string()]);

        let response = app
            .clone()
            .oneshot(
                request(Method::GET, "/files/1700000000000-report.txt", Some("alice"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()[header::CONTENT_DISPOSITION],
            "attachment; filename=\"1700000000000-report.txt\""
        );
        assert_eq!(body_bytes(response).await, b"0123456789");

        let response = app
            .clone()
            .oneshot(
                request(Method::DELETE, "/files/1700000000000-report.txt", Some("alice"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = app
            .oneshot(
                request(Method::GET, "/files/1700000000000-report.txt", Some("alice"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        assert_eq!(audit.records().len(), 5);
    }

    #[tokio::test]
    async fn test_missing_identity_is_forbidden() {
        let (dir, app, audit) = router().await;

        let response = app
            .clone()
            .oneshot(request(Method::GET, "/files", None).body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        let error: ErrorResponse = serde_json::from_slice(&body_bytes(response).await).unwrap();
        assert_eq!(error.code, "AccessDenied");

        let response = app.oneshot(upload(None, "report.txt", "data")).await.unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);

        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
        assert_eq!(audit.records().len(), 2);
    }

    #[tokio::test]
    async fn test_traversal_is_bad_request() {
        let (_dir, app, _audit) = router().await;
        let response = app
            .oneshot(
                request(Method::GET, "/files/..%2Fsecret.pem", Some("alice"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let error: ErrorResponse = serde_json::from_slice(&body_bytes(response).await).unwrap();
        assert_eq!(error.code, "InvalidName");
    }

    #[tokio::test]
    async fn test_upload_without_file_field() {
        let (_dir, app, audit) = router().await;
        let body = format!(
            "--{b}\r\nContent-Disposition: form-data; name=\"note\"\r\n\r\nhello\r\n--{b}--\r\n",
            b = BOUNDARY
        );
        let req = request(Method::POST, "/upload", Some("alice"))
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={}", BOUNDARY),
            )
            .body(Body::from(body))
            .unwrap();

        let response = app.oneshot(req).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let records = audit.records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].error_kind.as_deref(), Some("InvalidName"));
    }

    #[tokio::test]
    async fn test_overlong_filename_is_bad_request() {
        let (dir, app, audit) = router().await;
        let filename = format!("{}.txt", "x".repeat(300));

        let response = app.oneshot(upload(Some("alice"), &filename, "data")).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let error: ErrorResponse = serde_json::from_slice(&body_bytes(response).await).unwrap();
        assert_eq!(error.code, "InvalidName");

        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
        assert_eq!(audit.records()[0].outcome, crate::gate::audit::AuditOutcome::Denied);
    }

    #[tokio::test]
    async fn test_delete_unknown_is_not_found() {
        let (_dir, app, _audit) = router().await;
        let response = app
            .oneshot(
                request(Method::DELETE, "/files/never-uploaded.txt", Some("alice"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn test_io_failures_are_generic() {
        let io = std::io::Error::new(
            std::io::ErrorKind::Other,
            "No space left on /var/lib/wolfvault",
        );
        let response = error_response(&Error::WriteFailed {
            name: "x".into(),
            source: io,
        });
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn test_content_disposition_quotes() {
        assert_eq!(
            content_disposition("a\"b.txt"),
            "attachment; filename=\"a_b.txt\""
        );
    }

    #[tokio::test]
    async fn test_health_is_ungated() {
        let (_dir, app, audit) = router().await;
        let response = app
            .oneshot(request(Method::GET, "/health", None).body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(audit.records().is_empty());
    }
}
