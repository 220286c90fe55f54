//! HTTP surface for Paperquery.
//!
//! A compact Axum router over the [`QaBackend`] trait:
//!
//! - `POST /api/v1/auth/register`, `POST /api/v1/auth/login`,
//!   `POST /api/v1/auth/logout`, `GET /api/v1/auth/me` – account lifecycle.
//! - `POST /api/v1/upload` – multipart document ingestion, one or more
//!   `files` parts.
//! - `POST /api/v1/query` – question answering over the caller's documents.
//! - `GET /api/v1/files`, `DELETE /api/v1/files/:filename` – file management.
//! - `GET /api/v1/tables` – registered SQL tables.
//! - `GET /api/v1/export` – SELECT results rendered as XLSX or CSV.
//! - `GET /api/v1/messages` – recent chat history.
//! - `GET /health`, `GET /metrics` – unauthenticated operational probes.
//!
//! Handlers are generic over the backend so tests can substitute a stub.

mod handlers;

use std::sync::Arc;

use axum::extract::DefaultBodyLimit;
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use serde_json::json;

use crate::service::QaBackend;
use crate::service::types::{ServiceError, UserRecord};

const MAX_UPLOAD_BYTES: usize = 50 * 1024 * 1024;

/// Build the HTTP router exposing the question-answering API surface.
pub fn create_router<S>(service: Arc<S>) -> Router
where
    S: QaBackend + 'static,
{
    Router::new()
        .route("/api/v1/auth/register", post(handlers::register::<S>))
        .route("/api/v1/auth/login", post(handlers::login::<S>))
        .route("/api/v1/auth/logout", post(handlers::logout::<S>))
        .route("/api/v1/auth/me", get(handlers::me::<S>))
        .route("/api/v1/upload", post(handlers::upload::<S>))
        .route("/api/v1/query", post(handlers::run_query::<S>))
        .route("/api/v1/files", get(handlers::list_files::<S>))
        .route("/api/v1/files/:filename", delete(handlers::delete_file::<S>))
        .route("/api/v1/tables", get(handlers::list_tables::<S>))
        .route("/api/v1/export", get(handlers::export::<S>))
        .route("/api/v1/messages", get(handlers::messages::<S>))
        .route("/health", get(handlers::health::<S>))
        .route("/metrics", get(handlers::metrics::<S>))
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
        .with_state(service)
}

struct AppError(ServiceError);

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            ServiceError::InvalidInput(_)
            | ServiceError::UnsupportedFileType(_)
            | ServiceError::Parse { .. }
            | ServiceError::Chunking(_) => StatusCode::BAD_REQUEST,
            ServiceError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ServiceError::NotFound(_) => StatusCode::NOT_FOUND,
            ServiceError::Conflict(_) => StatusCode::CONFLICT,
            ServiceError::Embedding(_) | ServiceError::Qdrant(_) | ServiceError::Llm(_) => {
                StatusCode::BAD_GATEWAY
            }
            ServiceError::Storage(_)
            | ServiceError::Io(_)
            | ServiceError::Serialization(_)
            | ServiceError::Export(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            tracing::error!(status = %status, error = %self.0, "Request failed");
        } else {
            tracing::debug!(status = %status, error = %self.0, "Request rejected");
        }
        (status, Json(json!({ "error": self.0.to_string() }))).into_response()
    }
}

impl From<ServiceError> for AppError {
    fn from(inner: ServiceError) -> Self {
        Self(inner)
    }
}

fn unauthorized() -> AppError {
    AppError(ServiceError::Unauthorized(
        "Invalid or expired session token".into(),
    ))
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
}

/// Resolve the request's bearer token to its user.
async fn require_user<S>(service: &S, headers: &HeaderMap) -> Result<UserRecord, AppError>
where
    S: QaBackend,
{
    let token = bearer_token(headers).ok_or_else(unauthorized)?;
    service.authenticate(token).await.map_err(AppError)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::MetricsSnapshot;
    use crate::service::types::{
        Citation, ExportFormat, ExportPayload, FileRecord, HealthReport, HistoryTurn,
        MessageRecord, QdrantHealthSnapshot, QueryOutcome, QueryRoute, SessionToken, TableInfo,
        UploadOutcome,
    };
    use async_trait::async_trait;
    use axum::body::{Body, to_bytes};
    use axum::http::{Method, Request};
    use std::sync::Mutex;
    use tower::ServiceExt;

    const GOOD_TOKEN: &str = "token-1234";

    fn test_user() -> UserRecord {
        UserRecord {
            id: "user-1".into(),
            email: "ada@example.com".into(),
            role: "user".into(),
            created_at: "2024-01-01T00:00:00Z".into(),
        }
    }

    #[derive(Default)]
    struct StubBackend {
        uploads: Mutex<Vec<String>>,
        queries: Mutex<Vec<(String, usize)>>,
    }

    #[async_trait]
    impl QaBackend for StubBackend {
        async fn register_user(
            &self,
            email: &str,
            _password: &str,
        ) -> Result<UserRecord, ServiceError> {
            if email == "taken@example.com" {
                return Err(ServiceError::Conflict("Email already registered".into()));
            }
            let mut user = test_user();
            user.email = email.to_string();
            Ok(user)
        }

        async fn login(&self, _email: &str, password: &str) -> Result<SessionToken, ServiceError> {
            if password != "sufficiently-long" {
                return Err(ServiceError::Unauthorized(
                    "Incorrect email or password".into(),
                ));
            }
            Ok(SessionToken {
                access_token: GOOD_TOKEN.into(),
                token_type: "bearer".into(),
                expires_at: "2999-01-01T00:00:00Z".into(),
            })
        }

        async fn logout(&self, _token: &str) -> Result<(), ServiceError> {
            Ok(())
        }

        async fn authenticate(&self, token: &str) -> Result<UserRecord, ServiceError> {
            if token == GOOD_TOKEN {
                Ok(test_user())
            } else {
                Err(ServiceError::Unauthorized(
                    "Invalid or expired session token".into(),
                ))
            }
        }

        async fn upload_files(
            &self,
            _owner: &UserRecord,
            files: Vec<(String, Vec<u8>)>,
        ) -> Result<Vec<UploadOutcome>, ServiceError> {
            let mut recorded = self.uploads.lock().unwrap();
            files
                .into_iter()
                .map(|(filename, _bytes)| {
                    recorded.push(filename.clone());
                    Ok(UploadOutcome {
                        filename,
                        file_type: "txt".into(),
                        is_structured: false,
                        documents_indexed: 1,
                        chunks_indexed: 1,
                        tables_registered: Vec::new(),
                    })
                })
                .collect()
        }

        async fn list_files(&self, _owner: &UserRecord) -> Result<Vec<FileRecord>, ServiceError> {
            Ok(Vec::new())
        }

        async fn delete_file(
            &self,
            _owner: &UserRecord,
            filename: &str,
        ) -> Result<String, ServiceError> {
            Err(ServiceError::NotFound(format!(
                "File '{filename}' not found"
            )))
        }

        async fn query(
            &self,
            _owner: &UserRecord,
            query: &str,
            _history: &[HistoryTurn],
            top_k: Option<usize>,
        ) -> Result<QueryOutcome, ServiceError> {
            self.queries
                .lock()
                .unwrap()
                .push((query.to_string(), top_k.unwrap_or(0)));
            Ok(QueryOutcome {
                answer: "Stub answer [notes.txt]".into(),
                route: QueryRoute::Semantic,
                citations: vec![Citation {
                    source: "notes.txt".into(),
                    locator: None,
                    score: 0.9,
                    snippet: "stub".into(),
                }],
                table: None,
                sql: None,
            })
        }

        async fn list_tables(&self, _owner: &UserRecord) -> Result<Vec<TableInfo>, ServiceError> {
            Ok(Vec::new())
        }

        async fn export(
            &self,
            _owner: &UserRecord,
            _sql: &str,
            filename: Option<&str>,
            format: ExportFormat,
        ) -> Result<ExportPayload, ServiceError> {
            Ok(ExportPayload {
                filename: filename.unwrap_or("export_1.csv").to_string(),
                content_type: format.content_type(),
                bytes: b"a,b\n1,2\n".to_vec(),
            })
        }

        async fn recent_messages(
            &self,
            _owner: &UserRecord,
            _limit: usize,
        ) -> Result<Vec<MessageRecord>, ServiceError> {
            Ok(Vec::new())
        }

        async fn health(&self) -> HealthReport {
            HealthReport {
                status: "ok",
                embedding_provider: "hashing",
                embedding_model: "stub".into(),
                embedding_dimension: 16,
                qdrant: QdrantHealthSnapshot {
                    reachable: true,
                    collection_present: true,
                    error: None,
                },
            }
        }

        fn metrics_snapshot(&self) -> MetricsSnapshot {
            crate::metrics::ServiceMetrics::new().snapshot()
        }
    }

    fn router_with_stub() -> (Arc<StubBackend>, Router) {
        let stub = Arc::new(StubBackend::default());
        (stub.clone(), create_router(stub))
    }

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("body bytes");
        serde_json::from_slice(&bytes).expect("json body")
    }

    #[tokio::test]
    async fn register_returns_created_user() {
        let (_stub, app) = router_with_stub();
        let response = app
            .oneshot(
                Request::builder()
                    .method(Method::POST)
                    .uri("/api/v1/auth/register")
                    .header("content-type", "application/json")
                    .body(Body::from(
                        json!({"email": "new@example.com", "password": "sufficiently-long"})
                            .to_string(),
                    ))
                    .expect("request"),
            )
            .await
            .expect("response");

        assert_eq!(response.status(), StatusCode::CREATED);
        let body = body_json(response).await;
        assert_eq!(body["email"], "new@example.com");
    }

    #[tokio::test]
    async fn duplicate_registration_maps_to_conflict() {
        let (_stub, app) = router_with_stub();
        let response = app
            .oneshot(
                Request::builder()
                    .method(Method::POST)
                    .uri("/api/v1/auth/register")
                    .header("content-type", "application/json")
                    .body(Body::from(
                        json!({"email": "taken@example.com", "password": "sufficiently-long"})
                            .to_string(),
                    ))
                    .expect("request"),
            )
            .await
            .expect("response");

        assert_eq!(response.status(), StatusCode::CONFLICT);
        let body = body_json(response).await;
        assert_eq!(body["error"], "Email already registered");
    }

    #[tokio::test]
    async fn protected_routes_reject_missing_and_bad_tokens() {
        let (_stub, app) = router_with_stub();
        let bare = app
            .clone()
            .oneshot(
                Request::builder()
                    .uri("/api/v1/files")
                    .body(Body::empty())
                    .expect("request"),
            )
            .await
            .expect("response");
        assert_eq!(bare.status(), StatusCode::UNAUTHORIZED);
        let body = body_json(bare).await;
        assert_eq!(body["error"], "Invalid or expired session token");

        let stale = app
            .oneshot(
                Request::builder()
                    .uri("/api/v1/files")
                    .header("authorization", "Bearer nope")
                    .body(Body::empty())
                    .expect("request"),
            )
            .await
            .expect("response");
        assert_eq!(stale.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn query_forwards_body_fields() {
        let (stub, app) = router_with_stub();
        let response = app
            .oneshot(
                Request::builder()
                    .method(Method::POST)
                    .uri("/api/v1/query")
                    .header("authorization", format!("Bearer {GOOD_TOKEN}"))
                    .header("content-type", "application/json")
                    .body(Body::from(
                        json!({"query": "what changed?", "top_k": 3}).to_string(),
                    ))
                    .expect("request"),
            )
            .await
            .expect("response");

        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["route"], "semantic");
        assert_eq!(body["citations"][0]["source"], "notes.txt");

        let queries = stub.queries.lock().unwrap();
        assert_eq!(queries.as_slice(), &[("what changed?".to_string(), 3)]);
    }

    #[tokio::test]
    async fn upload_accepts_multipart_files() {
        let (stub, app) = router_with_stub();
        let boundary = "qa-test-boundary";
        let body = format!(
            "--{boundary}\r\n\
             Content-Disposition: form-data; name=\"files\"; filename=\"notes.txt\"\r\n\
             Content-Type: text/plain\r\n\r\n\
             hello world\r\n\
             --{boundary}--\r\n"
        );

        let response = app
            .oneshot(
                Request::builder()
                    .method(Method::POST)
                    .uri("/api/v1/upload")
                    .header("authorization", format!("Bearer {GOOD_TOKEN}"))
                    .header(
                        "content-type",
                        format!("multipart/form-data; boundary={boundary}"),
                    )
                    .body(Body::from(body))
                    .expect("request"),
            )
            .await
            .expect("response");

        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body[0]["filename"], "notes.txt");
        assert_eq!(stub.uploads.lock().unwrap().as_slice(), &["notes.txt"]);
    }

    #[tokio::test]
    async fn delete_of_unknown_file_is_not_found() {
        let (_stub, app) = router_with_stub();
        let response = app
            .oneshot(
                Request::builder()
                    .method(Method::DELETE)
                    .uri("/api/v1/files/ghost.pdf")
                    .header("authorization", format!("Bearer {GOOD_TOKEN}"))
                    .body(Body::empty())
                    .expect("request"),
            )
            .await
            .expect("response");

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let body = body_json(response).await;
        assert_eq!(body["error"], "File 'ghost.pdf' not found");
    }

    #[tokio::test]
    async fn export_validates_parameters_and_sets_disposition() {
        let (_stub, app) = router_with_stub();
        let missing_sql = app
            .clone()
            .oneshot(
                Request::builder()
                    .uri("/api/v1/export")
                    .header("authorization", format!("Bearer {GOOD_TOKEN}"))
                    .body(Body::empty())
                    .expect("request"),
            )
            .await
            .expect("response");
        assert_eq!(missing_sql.status(), StatusCode::BAD_REQUEST);

        let bad_format = app
            .clone()
            .oneshot(
                Request::builder()
                    .uri("/api/v1/export?sql=SELECT%20*%20FROM%20sales&format=pdf")
                    .header("authorization", format!("Bearer {GOOD_TOKEN}"))
                    .body(Body::empty())
                    .expect("request"),
            )
            .await
            .expect("response");
        assert_eq!(bad_format.status(), StatusCode::BAD_REQUEST);

        let good = app
            .oneshot(
                Request::builder()
                    .uri("/api/v1/export?sql=SELECT%20*%20FROM%20sales&format=csv&filename=out")
                    .header("authorization", format!("Bearer {GOOD_TOKEN}"))
                    .body(Body::empty())
                    .expect("request"),
            )
            .await
            .expect("response");
        assert_eq!(good.status(), StatusCode::OK);
        let disposition = good
            .headers()
            .get(header::CONTENT_DISPOSITION)
            .and_then(|value| value.to_str().ok())
            .expect("disposition");
        assert!(disposition.starts_with("attachment; filename=\""));
    }

    #[tokio::test]
    async fn health_and_metrics_are_open() {
        let (_stub, app) = router_with_stub();
        let health = app
            .clone()
            .oneshot(
                Request::builder()
                    .uri("/health")
                    .body(Body::empty())
                    .expect("request"),
            )
            .await
            .expect("response");
        assert_eq!(health.status(), StatusCode::OK);
        let body = body_json(health).await;
        assert_eq!(body["status"], "ok");
        assert_eq!(body["qdrant"]["collection_present"], true);

        let metrics = app
            .oneshot(
                Request::builder()
                    .uri("/metrics")
                    .body(Body::empty())
                    .expect("request"),
            )
            .await
            .expect("response");
        assert_eq!(metrics.status(), StatusCode::OK);
        let body = body_json(metrics).await;
        assert_eq!(body["files_uploaded"], 0);
    }

    #[tokio::test]
    async fn unknown_routes_are_not_found() {
        let (_stub, app) = router_with_stub();
        let response = app
            .oneshot(
                Request::builder()
                    .uri("/api/v1/unknown")
                    .body(Body::empty())
                    .expect("request"),
            )
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
