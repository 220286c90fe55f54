//! Request handlers for the HTTP surface.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Multipart, Path, Query, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use serde::{Deserialize, Serialize};

use super::{AppError, bearer_token, require_user, unauthorized};
use crate::metrics::MetricsSnapshot;
use crate::service::QaBackend;
use crate::service::types::{
    ExportFormat, FileRecord, HealthReport, HistoryTurn, MessageRecord, QueryOutcome,
    ServiceError, SessionToken, TableInfo, UploadOutcome, UserRecord,
};

/// Login or registration credentials.
#[derive(Debug, Deserialize)]
pub(super) struct CredentialsRequest {
    /// Login email address.
    email: String,
    /// Plaintext password, hashed before storage.
    password: String,
}

/// Confirmation body for actions without richer output.
#[derive(Debug, Serialize)]
pub(super) struct MessageResponse {
    /// Human-readable confirmation.
    message: String,
}

/// Body accepted by the query endpoint.
#[derive(Debug, Deserialize)]
pub(super) struct QueryRequest {
    /// Natural-language question or SQL statement.
    query: String,
    /// Prior turns replayed into the LLM conversation.
    #[serde(default)]
    history: Vec<HistoryTurn>,
    /// Optional override for the number of passages retrieved.
    #[serde(default)]
    top_k: Option<usize>,
}

/// Query-string parameters of the export endpoint.
#[derive(Debug, Deserialize)]
pub(super) struct ExportParams {
    /// SELECT statement to run.
    #[serde(default)]
    sql: Option<String>,
    /// Optional download filename, extension appended when missing.
    #[serde(default)]
    filename: Option<String>,
    /// `xlsx` (default) or `csv`.
    #[serde(default)]
    format: Option<String>,
}

/// Query-string parameters of the message history endpoint.
#[derive(Debug, Deserialize)]
pub(super) struct MessagesParams {
    /// Maximum number of turns to return, newest kept.
    #[serde(default)]
    limit: Option<usize>,
}

/// Create a user account.
pub(super) async fn register<S>(
    State(service): State<Arc<S>>,
    Json(request): Json<CredentialsRequest>,
) -> Result<(StatusCode, Json<UserRecord>), AppError>
where
    S: QaBackend,
{
    let user = service
        .register_user(&request.email, &request.password)
        .await?;
    Ok((StatusCode::CREATED, Json(user)))
}

/// Exchange credentials for a bearer token.
pub(super) async fn login<S>(
    State(service): State<Arc<S>>,
    Json(request): Json<CredentialsRequest>,
) -> Result<Json<SessionToken>, AppError>
where
    S: QaBackend,
{
    let token = service.login(&request.email, &request.password).await?;
    Ok(Json(token))
}

/// Revoke the caller's session token.
pub(super) async fn logout<S>(
    State(service): State<Arc<S>>,
    headers: HeaderMap,
) -> Result<Json<MessageResponse>, AppError>
where
    S: QaBackend,
{
    let token = bearer_token(&headers).ok_or_else(unauthorized)?;
    service.authenticate(token).await?;
    service.logout(token).await?;
    Ok(Json(MessageResponse {
        message: "Successfully logged out".into(),
    }))
}

/// Return the authenticated user.
pub(super) async fn me<S>(
    State(service): State<Arc<S>>,
    headers: HeaderMap,
) -> Result<Json<UserRecord>, AppError>
where
    S: QaBackend,
{
    let user = require_user(service.as_ref(), &headers).await?;
    Ok(Json(user))
}

/// Ingest the `files` parts of a multipart upload.
pub(super) async fn upload<S>(
    State(service): State<Arc<S>>,
    headers: HeaderMap,
    mut multipart: Multipart,
) -> Result<Json<Vec<UploadOutcome>>, AppError>
where
    S: QaBackend,
{
    let user = require_user(service.as_ref(), &headers).await?;
    let mut files = Vec::new();
    while let Some(field) = multipart.next_field().await.map_err(|err| {
        AppError(ServiceError::InvalidInput(format!(
            "Malformed multipart request: {err}"
        )))
    })? {
        if field.name() != Some("files") {
            continue;
        }
        let filename = field.file_name().map(str::to_string).unwrap_or_default();
        if filename.is_empty() {
            return Err(AppError(ServiceError::InvalidInput(
                "Uploaded file part is missing a filename".into(),
            )));
        }
        let bytes = field
            .bytes()
            .await
            .map_err(|err| {
                AppError(ServiceError::InvalidInput(format!(
                    "Failed to read uploaded file '{filename}': {err}"
                )))
            })?
            .to_vec();
        files.push((filename, bytes));
    }
    if files.is_empty() {
        return Err(AppError(ServiceError::InvalidInput(
            "No files were provided in the 'files' field".into(),
        )));
    }
    let outcomes = service.upload_files(&user, files).await?;
    Ok(Json(outcomes))
}

/// Answer a question over the caller's documents.
pub(super) async fn run_query<S>(
    State(service): State<Arc<S>>,
    headers: HeaderMap,
    Json(request): Json<QueryRequest>,
) -> Result<Json<QueryOutcome>, AppError>
where
    S: QaBackend,
{
    let user = require_user(service.as_ref(), &headers).await?;
    let outcome = service
        .query(&user, &request.query, &request.history, request.top_k)
        .await?;
    Ok(Json(outcome))
}

/// List the caller's stored files.
pub(super) async fn list_files<S>(
    State(service): State<Arc<S>>,
    headers: HeaderMap,
) -> Result<Json<Vec<FileRecord>>, AppError>
where
    S: QaBackend,
{
    let user = require_user(service.as_ref(), &headers).await?;
    Ok(Json(service.list_files(&user).await?))
}

/// Delete one stored file and everything derived from it.
pub(super) async fn delete_file<S>(
    State(service): State<Arc<S>>,
    headers: HeaderMap,
    Path(filename): Path<String>,
) -> Result<Json<MessageResponse>, AppError>
where
    S: QaBackend,
{
    let user = require_user(service.as_ref(), &headers).await?;
    let message = service.delete_file(&user, &filename).await?;
    Ok(Json(MessageResponse { message }))
}

/// List the caller's registered SQL tables.
pub(super) async fn list_tables<S>(
    State(service): State<Arc<S>>,
    headers: HeaderMap,
) -> Result<Json<Vec<TableInfo>>, AppError>
where
    S: QaBackend,
{
    let user = require_user(service.as_ref(), &headers).await?;
    Ok(Json(service.list_tables(&user).await?))
}

/// Run a SELECT statement and stream the result as a spreadsheet download.
pub(super) async fn export<S>(
    State(service): State<Arc<S>>,
    headers: HeaderMap,
    Query(params): Query<ExportParams>,
) -> Result<Response, AppError>
where
    S: QaBackend,
{
    let user = require_user(service.as_ref(), &headers).await?;
    let sql = params
        .sql
        .as_deref()
        .map(str::trim)
        .filter(|sql| !sql.is_empty())
        .ok_or_else(|| {
            AppError(ServiceError::InvalidInput(
                "Missing required query parameter 'sql'".into(),
            ))
        })?;
    let format = match params.format.as_deref() {
        None => ExportFormat::Xlsx,
        Some(raw) => ExportFormat::from_param(raw).ok_or_else(|| {
            AppError(ServiceError::InvalidInput(format!(
                "Unsupported export format '{raw}'. Use xlsx or csv."
            )))
        })?,
    };
    let payload = service
        .export(&user, sql, params.filename.as_deref(), format)
        .await?;
    let headers = [
        (header::CONTENT_TYPE, payload.content_type.to_string()),
        (
            header::CONTENT_DISPOSITION,
            format!("attachment; filename=\"{}\"", payload.filename),
        ),
    ];
    Ok((headers, payload.bytes).into_response())
}

/// Return the caller's recent chat turns, oldest first.
pub(super) async fn messages<S>(
    State(service): State<Arc<S>>,
    headers: HeaderMap,
    Query(params): Query<MessagesParams>,
) -> Result<Json<Vec<MessageRecord>>, AppError>
where
    S: QaBackend,
{
    let user = require_user(service.as_ref(), &headers).await?;
    let limit = params.limit.unwrap_or(50).clamp(1, 500);
    Ok(Json(service.recent_messages(&user, limit).await?))
}

/// Report dependency reachability and the configured embedding setup.
pub(super) async fn health<S>(State(service): State<Arc<S>>) -> Json<HealthReport>
where
    S: QaBackend,
{
    Json(service.health().await)
}

/// Expose ingestion and query counters.
pub(super) async fn metrics<S>(State(service): State<Arc<S>>) -> Json<MetricsSnapshot>
where
    S: QaBackend,
{
    Json(service.metrics_snapshot())
}
