//! Core data types and error definitions shared across the service.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{
    embedding::EmbeddingClientError, ingest::chunking::ChunkingError, llm::LlmError,
    qdrant::QdrantError,
};

/// Errors emitted by the document question-answering service.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// Request carried input the service refuses to process.
    #[error("{0}")]
    InvalidInput(String),
    /// Uploaded file extension has no registered loader.
    #[error("Unsupported file type: '{0}'")]
    UnsupportedFileType(String),
    /// Uploaded file could not be parsed by its loader.
    #[error("Failed to read '{filename}': {reason}")]
    Parse {
        /// Sanitized filename of the offending upload.
        filename: String,
        /// Loader diagnostic.
        reason: String,
    },
    /// Credentials or session token were missing, wrong, or expired.
    #[error("{0}")]
    Unauthorized(String),
    /// Referenced entity does not exist for this user.
    #[error("{0}")]
    NotFound(String),
    /// Write conflicts with existing state, such as a duplicate email.
    #[error("{0}")]
    Conflict(String),
    /// Chunking step failed to segment a document.
    #[error("Failed to chunk document: {0}")]
    Chunking(#[from] ChunkingError),
    /// Embedding provider failed to produce vectors for the input text.
    #[error("Failed to generate embeddings: {0}")]
    Embedding(#[from] EmbeddingClientError),
    /// Qdrant interaction failed during ingestion, search, or deletion.
    #[error("Qdrant request failed: {0}")]
    Qdrant(#[from] QdrantError),
    /// Chat completion provider failed to synthesize an answer.
    #[error("Answer synthesis failed: {0}")]
    Llm(#[from] LlmError),
    /// Metadata or tabular store failure outside the user's control.
    #[error("Storage failure: {0}")]
    Storage(#[from] rusqlite::Error),
    /// Filesystem interaction failed.
    #[error("I/O failure: {0}")]
    Io(#[from] std::io::Error),
    /// Persisted JSON could not be encoded or decoded.
    #[error("Serialization failure: {0}")]
    Serialization(#[from] serde_json::Error),
    /// Export rendering failed.
    #[error("Failed to render export: {0}")]
    Export(String),
}

/// Registered user, as exposed through the API.
#[derive(Debug, Clone, Serialize)]
pub struct UserRecord {
    /// Stable user identifier.
    pub id: String,
    /// Unique login email.
    pub email: String,
    /// Coarse authorization role (`user` or `admin`).
    pub role: String,
    /// RFC 3339 creation timestamp.
    pub created_at: String,
}

/// Issued session token returned by login.
#[derive(Debug, Clone, Serialize)]
pub struct SessionToken {
    /// Opaque bearer token.
    pub access_token: String,
    /// Always `bearer`.
    pub token_type: String,
    /// RFC 3339 expiry timestamp.
    pub expires_at: String,
}

/// Stored file metadata, as exposed through the API.
#[derive(Debug, Clone, Serialize)]
pub struct FileRecord {
    /// Stable file identifier.
    pub id: String,
    /// Sanitized original filename, unique per owner.
    pub filename: String,
    /// Lowercased extension the loader was selected by.
    pub file_type: String,
    /// Whether the file was routed to the tabular pipeline.
    pub is_structured: bool,
    /// Size of the stored bytes.
    pub size_bytes: u64,
    /// RFC 3339 upload timestamp.
    pub created_at: String,
}

/// Per-file result of an upload request.
#[derive(Debug, Clone, Serialize)]
pub struct UploadOutcome {
    /// Sanitized filename the file was stored under.
    pub filename: String,
    /// Lowercased extension the loader was selected by.
    pub file_type: String,
    /// Whether the file was routed to the tabular pipeline.
    pub is_structured: bool,
    /// Documents extracted from the file.
    pub documents_indexed: usize,
    /// Chunks written to the vector store.
    pub chunks_indexed: usize,
    /// SQL tables registered for the file, empty for unstructured uploads.
    pub tables_registered: Vec<String>,
}

/// Route a query was resolved through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryRoute {
    /// User-written SQL executed verbatim.
    Sql,
    /// Counting or listing question answered from table metadata.
    Direct,
    /// Semantic retrieval plus LLM synthesis.
    Semantic,
}

/// Citation attached to a synthesized answer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Citation {
    /// Source filename the passage came from.
    pub source: String,
    /// Sub-file locator such as `page=3`, when known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub locator: Option<String>,
    /// Similarity score reported by the vector store.
    pub score: f32,
    /// Leading excerpt of the cited passage.
    pub snippet: String,
}

/// Tabular result attached to SQL and direct answers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TablePayload {
    /// Column names in result order.
    pub columns: Vec<String>,
    /// Row values, one JSON value per cell.
    pub rows: Vec<Vec<serde_json::Value>>,
}

/// Answer produced for a query.
#[derive(Debug, Clone, Serialize)]
pub struct QueryOutcome {
    /// Natural-language answer text.
    pub answer: String,
    /// Route the query was resolved through.
    pub route: QueryRoute,
    /// Citations backing the answer, empty outside the semantic route.
    pub citations: Vec<Citation>,
    /// Result table for SQL and direct routes.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub table: Option<TablePayload>,
    /// SQL statement that was executed, when one was.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sql: Option<String>,
}

/// Persisted chat history entry.
#[derive(Debug, Clone, Serialize)]
pub struct MessageRecord {
    /// Monotonic message identifier.
    pub id: i64,
    /// `user` or `assistant`.
    pub role: String,
    /// Message text.
    pub content: String,
    /// Tabular payload stored with assistant answers, when present.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub table: Option<TablePayload>,
    /// Citations stored with assistant answers, when present.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub citations: Option<Vec<Citation>>,
    /// RFC 3339 creation timestamp.
    pub created_at: String,
}

/// Prior conversation turn forwarded with a query.
#[derive(Debug, Clone, Deserialize)]
pub struct HistoryTurn {
    /// `user` or `assistant`.
    pub role: String,
    /// Turn text.
    pub content: String,
}

/// Registered SQL table description.
#[derive(Debug, Clone, Serialize)]
pub struct TableInfo {
    /// Table name as usable in SQL.
    pub name: String,
    /// Current row count.
    pub rows: u64,
    /// Column metadata in declaration order.
    pub columns: Vec<ColumnInfo>,
}

/// Column of a registered SQL table.
#[derive(Debug, Clone, Serialize)]
pub struct ColumnInfo {
    /// Sanitized column name.
    pub name: String,
    /// Declared SQLite type (`TEXT` or `REAL`).
    pub data_type: String,
}

/// Reachability and readiness snapshot for Qdrant.
#[derive(Debug, Clone, Serialize)]
pub struct QdrantHealthSnapshot {
    /// Indicates whether the Qdrant HTTP endpoint responded successfully.
    pub reachable: bool,
    /// Whether the configured collection is currently present.
    pub collection_present: bool,
    /// Optional diagnostic string captured when Qdrant is unreachable.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Service health report returned by `GET /health`.
#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    /// `ok` when every dependency responded, `degraded` otherwise.
    pub status: &'static str,
    /// Configured embedding provider name.
    pub embedding_provider: &'static str,
    /// Configured embedding model identifier.
    pub embedding_model: String,
    /// Configured embedding dimensionality.
    pub embedding_dimension: usize,
    /// Vector store reachability and collection presence.
    pub qdrant: QdrantHealthSnapshot,
}

/// Spreadsheet formats supported by the export endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    /// Excel workbook with a bold header row.
    Xlsx,
    /// Comma-separated values with standard quoting.
    Csv,
}

impl ExportFormat {
    /// Parse the `format` query parameter, case-insensitively.
    pub fn from_param(raw: &str) -> Option<Self> {
        match raw.trim().to_lowercase().as_str() {
            "xlsx" => Some(Self::Xlsx),
            "csv" => Some(Self::Csv),
            _ => None,
        }
    }

    /// File extension without the leading dot.
    pub fn extension(self) -> &'static str {
        match self {
            Self::Xlsx => "xlsx",
            Self::Csv => "csv",
        }
    }

    /// MIME type sent with the rendered bytes.
    pub fn content_type(self) -> &'static str {
        match self {
            Self::Xlsx => {
                "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet"
            }
            Self::Csv => "text/csv",
        }
    }
}

/// Rendered export ready to stream back to the client.
#[derive(Debug, Clone)]
pub struct ExportPayload {
    /// Filename offered in the `Content-Disposition` header.
    pub filename: String,
    /// MIME type of the rendered bytes.
    pub content_type: &'static str,
    /// Rendered spreadsheet bytes.
    pub bytes: Vec<u8>,
}
