//! Document question-answering service.
//!
//! [`QaService`] owns the stores and upstream clients and implements the
//! [`QaBackend`] trait the HTTP layer is written against. Uploads run
//! parse → register → chunk → embed → index; queries are routed per
//! [`query`] and answered from SQL, table metadata, or retrieval plus
//! synthesis.

pub mod auth;
pub mod query;
pub mod types;

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use uuid::Uuid;
use walkdir::WalkDir;

use crate::config::{Config, EmbeddingProvider};
use crate::embedding::{EmbeddingClient, EmbeddingClientError, embedding_client_from_config};
use crate::ingest::chunking::{TextSplitter, resolve_chunk_budget};
use crate::ingest::sanitize::sanitize_filename;
use crate::ingest::sheet::sheet_documents;
use crate::ingest::{Document, FileKind, Locator, ParsedUpload, parse_upload};
use crate::llm::{LlmClient, llm_client_from_config};
use crate::metrics::{MetricsSnapshot, ServiceMetrics};
use crate::qdrant::filters::owner_filter;
use crate::qdrant::{
    PayloadContext, PointInsert, QdrantService, ScoredPoint, compute_chunk_hash,
};
use crate::store::tabular::TabularStore;
use crate::store::{MetaStore, StoredFile};

use query::{DirectAnswer, Passage};
use types::{
    Citation, ExportFormat, ExportPayload, FileRecord, HealthReport, HistoryTurn, MessageRecord,
    QdrantHealthSnapshot, QueryOutcome, QueryRoute, ServiceError, SessionToken, TableInfo,
    TablePayload, UploadOutcome, UserRecord,
};

/// Tuning values the service reads per request, extracted from [`Config`] so
/// tests can construct a service without touching the process-wide cache.
#[derive(Debug, Clone)]
pub struct ServiceSettings {
    /// Qdrant collection documents are indexed into.
    pub collection: String,
    /// Session token lifetime in minutes.
    pub session_ttl_minutes: i64,
    /// Passages retrieved per semantic query unless the request overrides it.
    pub search_default_limit: usize,
    /// Upper bound on the per-query passage count.
    pub search_max_limit: usize,
    /// Optional minimum similarity score for retrieved passages.
    pub search_score_threshold: Option<f32>,
    /// Optional override for the automatic chunk size selection.
    pub chunk_size_override: Option<usize>,
    /// Token overlap between adjacent chunks.
    pub chunk_overlap: usize,
    /// Clamp derived chunk sizes into a conservative range.
    pub use_safe_defaults: bool,
    /// Embedding provider the chunker sizes against.
    pub embedding_provider: EmbeddingProvider,
    /// Embedding model identifier.
    pub embedding_model: String,
    /// Embedding dimensionality, also the collection's vector size.
    pub embedding_dimension: usize,
    /// Maximum number of per-row documents indexed per spreadsheet.
    pub tabular_row_document_limit: usize,
    /// Directory uploaded bytes are stored under, one subdirectory per owner.
    pub upload_dir: PathBuf,
}

impl From<&Config> for ServiceSettings {
    fn from(config: &Config) -> Self {
        Self {
            collection: config.qdrant_collection_name.clone(),
            session_ttl_minutes: config.session_ttl_minutes,
            search_default_limit: config.search_default_limit,
            search_max_limit: config.search_max_limit,
            search_score_threshold: config.search_score_threshold,
            chunk_size_override: config.text_splitter_chunk_size,
            chunk_overlap: config.text_splitter_chunk_overlap.unwrap_or(0),
            use_safe_defaults: config.text_splitter_use_safe_defaults,
            embedding_provider: config.embedding_provider,
            embedding_model: config.embedding_model.clone(),
            embedding_dimension: config.embedding_dimension,
            tabular_row_document_limit: config.tabular_row_document_limit,
            upload_dir: config.upload_dir.clone(),
        }
    }
}

/// Operations the HTTP layer needs from the service.
#[async_trait]
pub trait QaBackend: Send + Sync {
    /// Register a new user account.
    async fn register_user(
        &self,
        email: &str,
        password: &str,
    ) -> Result<UserRecord, ServiceError>;

    /// Verify credentials and issue a session token.
    async fn login(&self, email: &str, password: &str) -> Result<SessionToken, ServiceError>;

    /// Revoke a session token.
    async fn logout(&self, token: &str) -> Result<(), ServiceError>;

    /// Resolve a bearer token to its user.
    async fn authenticate(&self, token: &str) -> Result<UserRecord, ServiceError>;

    /// Ingest one or more uploaded files for the owner, failing fast on the
    /// first file that cannot be processed.
    async fn upload_files(
        &self,
        owner: &UserRecord,
        files: Vec<(String, Vec<u8>)>,
    ) -> Result<Vec<UploadOutcome>, ServiceError>;

    /// The owner's stored files.
    async fn list_files(&self, owner: &UserRecord) -> Result<Vec<FileRecord>, ServiceError>;

    /// Delete one file and everything derived from it, returning a
    /// confirmation message.
    async fn delete_file(
        &self,
        owner: &UserRecord,
        filename: &str,
    ) -> Result<String, ServiceError>;

    /// Answer a question over the owner's documents.
    async fn query(
        &self,
        owner: &UserRecord,
        query: &str,
        history: &[HistoryTurn],
        top_k: Option<usize>,
    ) -> Result<QueryOutcome, ServiceError>;

    /// The owner's registered SQL tables.
    async fn list_tables(&self, owner: &UserRecord) -> Result<Vec<TableInfo>, ServiceError>;

    /// Run a SELECT statement and render the result as a spreadsheet.
    async fn export(
        &self,
        owner: &UserRecord,
        sql: &str,
        filename: Option<&str>,
        format: ExportFormat,
    ) -> Result<ExportPayload, ServiceError>;

    /// The owner's recent chat turns, oldest first.
    async fn recent_messages(
        &self,
        owner: &UserRecord,
        limit: usize,
    ) -> Result<Vec<MessageRecord>, ServiceError>;

    /// Dependency reachability and configuration summary.
    async fn health(&self) -> HealthReport;

    /// Current counter snapshot.
    fn metrics_snapshot(&self) -> MetricsSnapshot;
}

/// Production implementation of [`QaBackend`].
pub struct QaService {
    meta: MetaStore,
    tabular: TabularStore,
    qdrant: QdrantService,
    embedder: Arc<dyn EmbeddingClient + Send + Sync>,
    llm: Arc<dyn LlmClient + Send + Sync>,
    metrics: Arc<ServiceMetrics>,
    settings: ServiceSettings,
}

impl QaService {
    /// Assemble a service from explicit parts.
    pub fn new(
        meta: MetaStore,
        tabular: TabularStore,
        qdrant: QdrantService,
        embedder: Arc<dyn EmbeddingClient + Send + Sync>,
        llm: Arc<dyn LlmClient + Send + Sync>,
        settings: ServiceSettings,
    ) -> Self {
        Self {
            meta,
            tabular,
            qdrant,
            embedder,
            llm,
            metrics: Arc::new(ServiceMetrics::new()),
            settings,
        }
    }

    /// Build the production service from loaded configuration.
    pub fn from_config(config: &Config) -> Result<Self, ServiceError> {
        let meta = MetaStore::open(&config.database_path)?;
        let tabular = TabularStore::new(config.tabular_dir.clone());
        let qdrant = QdrantService::new()?;
        Ok(Self::new(
            meta,
            tabular,
            qdrant,
            embedding_client_from_config(config),
            llm_client_from_config(config),
            ServiceSettings::from(config),
        ))
    }

    /// The metadata store, exposed for startup reconciliation.
    pub fn meta(&self) -> &MetaStore {
        &self.meta
    }

    /// The vector store client, exposed for startup collection checks.
    pub fn qdrant(&self) -> &QdrantService {
        &self.qdrant
    }

    /// Per-request tuning values.
    pub fn settings(&self) -> &ServiceSettings {
        &self.settings
    }

    /// Drop file rows whose stored bytes vanished from the upload directory,
    /// and report files on disk that no row references.
    ///
    /// Returns the number of rows dropped.
    pub fn reconcile_upload_dir(&self) -> Result<usize, ServiceError> {
        let files = self.meta.all_files()?;
        let mut known = HashSet::new();
        let mut dropped = 0;
        for file in &files {
            let path = PathBuf::from(&file.storage_path);
            if path.is_file() {
                known.insert(path);
            } else {
                tracing::warn!(
                    owner_id = %file.owner_id,
                    filename = %file.filename,
                    path = %file.storage_path,
                    "Stored bytes missing; dropping file row"
                );
                self.meta.delete_file(&file.owner_id, &file.filename)?;
                dropped += 1;
            }
        }

        let orphans = WalkDir::new(&self.settings.upload_dir)
            .into_iter()
            .filter_map(Result::ok)
            .filter(|entry| entry.file_type().is_file() && !known.contains(entry.path()))
            .count();
        if orphans > 0 {
            tracing::warn!(
                count = orphans,
                dir = %self.settings.upload_dir.display(),
                "Upload directory contains files no row references"
            );
        }

        Ok(dropped)
    }

    fn note_failure(&self, err: &ServiceError) {
        if matches!(
            err,
            ServiceError::Embedding(_) | ServiceError::Qdrant(_) | ServiceError::Llm(_)
        ) {
            self.metrics.record_upstream_failure();
        }
    }

    async fn ingest_one(
        &self,
        owner: &UserRecord,
        raw_name: &str,
        bytes: Vec<u8>,
    ) -> Result<UploadOutcome, ServiceError> {
        let filename = sanitize_filename(raw_name);
        let kind = FileKind::from_filename(&filename).ok_or_else(|| {
            let extension = filename
                .rsplit_once('.')
                .map(|(_, ext)| ext.to_string())
                .unwrap_or_else(|| filename.clone());
            ServiceError::UnsupportedFileType(extension)
        })?;

        let parsed = parse_upload(kind, &filename, &bytes).map_err(|err| ServiceError::Parse {
            filename: filename.clone(),
            reason: err.to_string(),
        })?;

        // Re-uploading a filename replaces the previous version.
        if let Some(existing) = self.meta.get_file(&owner.id, &filename)? {
            if existing.is_structured {
                self.tabular.drop_tables_for_file(&owner.id, &existing.id)?;
            }
        }

        let file_id = Uuid::new_v4().to_string();
        let (documents, tables_registered) = match parsed {
            ParsedUpload::Unstructured(documents) => (documents, Vec::new()),
            ParsedUpload::Structured(sheets) => {
                let mut documents = Vec::new();
                let mut tables = Vec::new();
                for sheet in &sheets {
                    let registered = self.tabular.register_sheet(
                        &owner.id,
                        &file_id,
                        &filename,
                        &sheet.table_seed,
                        &sheet.grid,
                    )?;
                    documents.extend(sheet_documents(
                        &filename,
                        &registered,
                        &sheet.grid,
                        self.settings.tabular_row_document_limit,
                    ));
                    tables.push(registered.name);
                }
                (documents, tables)
            }
        };

        let points = self.chunk_documents(&documents).await?;

        self.qdrant
            .ensure_collection(
                &self.settings.collection,
                self.settings.embedding_dimension as u64,
            )
            .await?;
        self.qdrant
            .delete_points(
                &self.settings.collection,
                owner_filter(&owner.id, Some(&filename)),
            )
            .await?;

        let context = PayloadContext {
            owner_id: owner.id.clone(),
            file_id: file_id.clone(),
            source: filename.clone(),
        };
        let indexed = self
            .qdrant
            .index_points(&self.settings.collection, &context, points)
            .await?;

        let owner_dir = self.settings.upload_dir.join(&owner.id);
        std::fs::create_dir_all(&owner_dir)?;
        let storage_path = owner_dir.join(&filename);
        std::fs::write(&storage_path, &bytes)?;

        let stored = StoredFile {
            id: file_id,
            owner_id: owner.id.clone(),
            filename: filename.clone(),
            file_type: kind.as_str().to_string(),
            is_structured: kind.is_structured(),
            storage_path: storage_path.display().to_string(),
            size_bytes: bytes.len() as u64,
            created_at: now_rfc3339(),
        };
        self.meta.upsert_file(&stored)?;
        self.metrics
            .record_upload(documents.len() as u64, indexed as u64);
        tracing::info!(
            owner_id = %owner.id,
            filename = %filename,
            documents = documents.len(),
            chunks = indexed,
            tables = tables_registered.len(),
            "Ingested upload"
        );

        Ok(UploadOutcome {
            filename,
            file_type: kind.as_str().to_string(),
            is_structured: kind.is_structured(),
            documents_indexed: documents.len(),
            chunks_indexed: indexed,
            tables_registered,
        })
    }

    /// Split every document into token-bounded chunks and embed the whole
    /// batch in one provider call.
    async fn chunk_documents(
        &self,
        documents: &[Document],
    ) -> Result<Vec<PointInsert>, ServiceError> {
        let budget = resolve_chunk_budget(
            self.settings.chunk_size_override,
            self.settings.embedding_provider,
            &self.settings.embedding_model,
            self.settings.use_safe_defaults,
        );
        let splitter = TextSplitter::new(
            budget,
            self.settings.chunk_overlap,
            self.settings.embedding_provider,
            &self.settings.embedding_model,
        )?;

        let mut points = Vec::new();
        let mut texts = Vec::new();
        for document in documents {
            let chunks = splitter.split(&document.content);
            for (chunk_index, chunk) in chunks.into_iter().enumerate() {
                let (locator, section) = match &document.locator {
                    Locator::Section(name) => (None, Some(name.clone())),
                    other => (other.suffix(), None),
                };
                points.push(PointInsert {
                    text: chunk.clone(),
                    chunk_hash: compute_chunk_hash(&chunk),
                    chunk_index,
                    locator,
                    section,
                    table: document.table.clone(),
                    vector: Vec::new(),
                });
                texts.push(chunk);
            }
        }

        if texts.is_empty() {
            return Ok(points);
        }
        let vectors = self.embedder.generate_embeddings(texts).await?;
        for (point, vector) in points.iter_mut().zip(vectors) {
            point.vector = vector;
        }
        Ok(points)
    }

    async fn query_inner(
        &self,
        owner: &UserRecord,
        query_text: &str,
        history: &[HistoryTurn],
        top_k: Option<usize>,
    ) -> Result<QueryOutcome, ServiceError> {
        let query_text = query_text.trim();
        if query_text.is_empty() {
            return Err(ServiceError::InvalidInput("Query cannot be empty.".into()));
        }

        if query::is_sql_query(query_text) {
            let table = self.tabular.execute_select(&owner.id, query_text)?;
            let answer = query::sql_summary(&table);
            self.metrics.record_sql_query();
            self.record_turns(owner, query_text, &answer, Some(&table), None)?;
            return Ok(QueryOutcome {
                answer,
                route: QueryRoute::Sql,
                citations: Vec::new(),
                table: Some(table),
                sql: Some(query_text.to_string()),
            });
        }

        let tables = if self.meta.has_structured_files(&owner.id)? {
            self.tabular.list_tables(&owner.id)?
        } else {
            Vec::new()
        };
        if let Some(direct) = query::detect_direct_answer(query_text, &tables) {
            let sql = direct.sql();
            let table = match &direct {
                DirectAnswer::FilteredRows {
                    table,
                    column,
                    operator,
                    value,
                } => self
                    .tabular
                    .filtered_rows(&owner.id, table, column, operator, value)?,
                DirectAnswer::ListColumn { table, column } => {
                    let values =
                        self.tabular
                            .distinct_values(&owner.id, table, column, query::LIST_LIMIT)?;
                    TablePayload {
                        columns: vec![column.clone()],
                        rows: values
                            .into_iter()
                            .map(|value| vec![Value::String(value)])
                            .collect(),
                    }
                }
                _ => self.tabular.execute_select(&owner.id, &sql)?,
            };
            let answer = query::direct_summary(&direct, &table);
            self.metrics.record_direct_query();
            self.record_turns(owner, query_text, &answer, Some(&table), None)?;
            tracing::debug!(owner_id = %owner.id, sql = %sql, "Answered query directly");
            return Ok(QueryOutcome {
                answer,
                route: QueryRoute::Direct,
                citations: Vec::new(),
                table: Some(table),
                sql: Some(sql),
            });
        }

        self.semantic_answer(owner, query_text, history, top_k).await
    }

    async fn semantic_answer(
        &self,
        owner: &UserRecord,
        query_text: &str,
        history: &[HistoryTurn],
        top_k: Option<usize>,
    ) -> Result<QueryOutcome, ServiceError> {
        let indexed = self
            .qdrant
            .count_points(&self.settings.collection, owner_filter(&owner.id, None))
            .await?;
        if indexed == 0 {
            let answer = query::NO_DOCUMENTS_MESSAGE.to_string();
            self.metrics.record_semantic_query();
            self.record_turns(owner, query_text, &answer, None, None)?;
            return Ok(semantic_outcome(answer, Vec::new()));
        }

        let limit = top_k
            .unwrap_or(self.settings.search_default_limit)
            .clamp(1, self.settings.search_max_limit);
        let mut vectors = self
            .embedder
            .generate_embeddings(vec![query_text.to_string()])
            .await?;
        let vector = if vectors.is_empty() {
            return Err(EmbeddingClientError::GenerationFailed(
                "provider returned no vector for the query".into(),
            )
            .into());
        } else {
            vectors.remove(0)
        };

        let hits = self
            .qdrant
            .search_points(
                &self.settings.collection,
                vector,
                owner_filter(&owner.id, None),
                limit,
                self.settings.search_score_threshold,
            )
            .await?;
        if hits.is_empty() {
            let answer = query::NO_HITS_MESSAGE.to_string();
            self.metrics.record_semantic_query();
            self.record_turns(owner, query_text, &answer, None, None)?;
            return Ok(semantic_outcome(answer, Vec::new()));
        }

        let passages = passages_from_hits(&hits);
        let citations: Vec<Citation> = passages
            .iter()
            .map(|passage| Citation {
                source: passage.source.clone(),
                locator: passage.locator.clone(),
                score: passage.score,
                snippet: query::snippet_of(&passage.text),
            })
            .collect();

        let context = query::build_context(&passages, query::leans_tabular(query_text));
        let messages = query::build_messages(&context, query_text, history);
        let raw_answer = self.llm.chat(messages).await?;
        let answer = query::ensure_citation(raw_answer, &passages);

        self.metrics.record_semantic_query();
        self.record_turns(owner, query_text, &answer, None, Some(&citations))?;
        tracing::debug!(
            owner_id = %owner.id,
            passages = passages.len(),
            "Synthesized answer from retrieved context"
        );
        Ok(semantic_outcome(answer, citations))
    }

    fn record_turns(
        &self,
        owner: &UserRecord,
        query_text: &str,
        answer: &str,
        table: Option<&TablePayload>,
        citations: Option<&[Citation]>,
    ) -> Result<(), ServiceError> {
        self.meta
            .append_message(&owner.id, "user", query_text, None, None)?;
        self.meta
            .append_message(&owner.id, "assistant", answer, table, citations)?;
        Ok(())
    }
}

#[async_trait]
impl QaBackend for QaService {
    async fn register_user(
        &self,
        email: &str,
        password: &str,
    ) -> Result<UserRecord, ServiceError> {
        let email = email.trim().to_lowercase();
        if !auth::email_is_valid(&email) {
            return Err(ServiceError::InvalidInput("Invalid email address".into()));
        }
        if password.len() < auth::MIN_PASSWORD_LENGTH {
            return Err(ServiceError::InvalidInput(format!(
                "Password must be at least {} characters long",
                auth::MIN_PASSWORD_LENGTH
            )));
        }
        let user = self
            .meta
            .create_user(&email, &auth::hash_password(password), "user")?;
        tracing::info!(user_id = %user.id, "Registered user");
        Ok(user)
    }

    async fn login(&self, email: &str, password: &str) -> Result<SessionToken, ServiceError> {
        let email = email.trim().to_lowercase();
        let (user, digest) = self
            .meta
            .find_user_by_email(&email)?
            .ok_or_else(|| ServiceError::Unauthorized("Incorrect email or password".into()))?;
        if !auth::verify_password(password, &digest) {
            return Err(ServiceError::Unauthorized(
                "Incorrect email or password".into(),
            ));
        }

        let token = auth::generate_session_token();
        let expires_at = auth::session_expiry(self.settings.session_ttl_minutes);
        self.meta.insert_session(&token, &user.id, &expires_at)?;
        Ok(SessionToken {
            access_token: token,
            token_type: "bearer".to_string(),
            expires_at,
        })
    }

    async fn logout(&self, token: &str) -> Result<(), ServiceError> {
        self.meta.delete_session(token)?;
        Ok(())
    }

    async fn authenticate(&self, token: &str) -> Result<UserRecord, ServiceError> {
        self.meta
            .session_user(token)?
            .ok_or_else(|| ServiceError::Unauthorized("Invalid or expired session token".into()))
    }

    async fn upload_files(
        &self,
        owner: &UserRecord,
        files: Vec<(String, Vec<u8>)>,
    ) -> Result<Vec<UploadOutcome>, ServiceError> {
        if files.is_empty() {
            return Err(ServiceError::InvalidInput("No files provided".into()));
        }
        let mut outcomes = Vec::with_capacity(files.len());
        for (filename, bytes) in files {
            let outcome = self.ingest_one(owner, &filename, bytes).await;
            match outcome {
                Ok(outcome) => outcomes.push(outcome),
                Err(err) => {
                    self.note_failure(&err);
                    return Err(err);
                }
            }
        }
        Ok(outcomes)
    }

    async fn list_files(&self, owner: &UserRecord) -> Result<Vec<FileRecord>, ServiceError> {
        let files = self.meta.list_files(&owner.id)?;
        Ok(files.iter().map(StoredFile::to_record).collect())
    }

    async fn delete_file(
        &self,
        owner: &UserRecord,
        filename: &str,
    ) -> Result<String, ServiceError> {
        let file = self
            .meta
            .get_file(&owner.id, filename)?
            .ok_or_else(|| ServiceError::NotFound(format!("File '{filename}' not found")))?;

        if let Err(err) = self
            .qdrant
            .delete_points(
                &self.settings.collection,
                owner_filter(&owner.id, Some(filename)),
            )
            .await
        {
            let err = ServiceError::Qdrant(err);
            self.note_failure(&err);
            return Err(err);
        }

        if file.is_structured {
            self.tabular.drop_tables_for_file(&owner.id, &file.id)?;
        }
        if let Err(err) = std::fs::remove_file(&file.storage_path) {
            if err.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!(
                    path = %file.storage_path,
                    error = %err,
                    "Could not remove stored upload bytes"
                );
            }
        }
        self.meta.delete_file(&owner.id, filename)?;
        self.metrics.record_delete();
        tracing::info!(owner_id = %owner.id, filename, "Deleted file");
        Ok(format!(
            "File '{filename}' and associated data deleted successfully."
        ))
    }

    async fn query(
        &self,
        owner: &UserRecord,
        query: &str,
        history: &[HistoryTurn],
        top_k: Option<usize>,
    ) -> Result<QueryOutcome, ServiceError> {
        let result = self.query_inner(owner, query, history, top_k).await;
        if let Err(err) = &result {
            self.note_failure(err);
        }
        result
    }

    async fn list_tables(&self, owner: &UserRecord) -> Result<Vec<TableInfo>, ServiceError> {
        if !self.meta.has_structured_files(&owner.id)? {
            return Ok(Vec::new());
        }
        self.tabular.list_tables(&owner.id)
    }

    async fn export(
        &self,
        owner: &UserRecord,
        sql: &str,
        filename: Option<&str>,
        format: ExportFormat,
    ) -> Result<ExportPayload, ServiceError> {
        let table = self.tabular.execute_select(&owner.id, sql)?;
        if table.rows.is_empty() {
            return Err(ServiceError::NotFound("Query returned no data".into()));
        }

        let bytes = match format {
            ExportFormat::Xlsx => render_xlsx(&table)?,
            ExportFormat::Csv => render_csv(&table)?,
        };
        Ok(ExportPayload {
            filename: export_filename(filename, format),
            content_type: format.content_type(),
            bytes,
        })
    }

    async fn recent_messages(
        &self,
        owner: &UserRecord,
        limit: usize,
    ) -> Result<Vec<MessageRecord>, ServiceError> {
        self.meta
            .recent_messages(&owner.id, limit)
            .map_err(ServiceError::from)
    }

    async fn health(&self) -> HealthReport {
        let qdrant = match self
            .qdrant
            .collection_exists(&self.settings.collection)
            .await
        {
            Ok(present) => QdrantHealthSnapshot {
                reachable: true,
                collection_present: present,
                error: None,
            },
            Err(err) => QdrantHealthSnapshot {
                reachable: false,
                collection_present: false,
                error: Some(err.to_string()),
            },
        };
        HealthReport {
            status: if qdrant.reachable { "ok" } else { "degraded" },
            embedding_provider: self.settings.embedding_provider.as_str(),
            embedding_model: self.settings.embedding_model.clone(),
            embedding_dimension: self.settings.embedding_dimension,
            qdrant,
        }
    }

    fn metrics_snapshot(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }
}

fn semantic_outcome(answer: String, citations: Vec<Citation>) -> QueryOutcome {
    QueryOutcome {
        answer,
        route: QueryRoute::Semantic,
        citations,
        table: None,
        sql: None,
    }
}

/// Read retrieval hits back into passages, skipping points without payloads.
fn passages_from_hits(hits: &[ScoredPoint]) -> Vec<Passage> {
    hits.iter()
        .filter_map(|hit| {
            let payload = hit.payload.as_ref()?;
            let text = payload.get("text").and_then(Value::as_str)?;
            Some(Passage {
                source: payload
                    .get("source")
                    .and_then(Value::as_str)
                    .unwrap_or("unknown")
                    .to_string(),
                locator: payload
                    .get("locator")
                    .and_then(Value::as_str)
                    .map(str::to_string),
                table: payload
                    .get("table")
                    .and_then(Value::as_str)
                    .map(str::to_string),
                score: hit.score,
                text: text.to_string(),
            })
        })
        .collect()
}

fn export_filename(requested: Option<&str>, format: ExportFormat) -> String {
    let extension = format.extension();
    match requested {
        Some(name) if !name.trim().is_empty() => {
            let mut name = sanitize_filename(name);
            if !name.to_lowercase().ends_with(&format!(".{extension}")) {
                name.push('.');
                name.push_str(extension);
            }
            name
        }
        _ => format!(
            "export_{}.{extension}",
            OffsetDateTime::now_utc().unix_timestamp()
        ),
    }
}

fn render_xlsx(table: &TablePayload) -> Result<Vec<u8>, ServiceError> {
    let export_err = |err: rust_xlsxwriter::XlsxError| ServiceError::Export(err.to_string());
    let mut workbook = rust_xlsxwriter::Workbook::new();
    let worksheet = workbook.add_worksheet();
    let bold = rust_xlsxwriter::Format::new().set_bold();

    for (column, name) in table.columns.iter().enumerate() {
        worksheet
            .write_string_with_format(0, column as u16, name.as_str(), &bold)
            .map_err(export_err)?;
    }
    for (row_index, row) in table.rows.iter().enumerate() {
        for (column, value) in row.iter().enumerate() {
            let row_number = (row_index + 1) as u32;
            let column = column as u16;
            match value {
                Value::Null => {}
                Value::Number(number) => {
                    worksheet
                        .write_number(row_number, column, number.as_f64().unwrap_or(0.0))
                        .map_err(export_err)?;
                }
                Value::String(text) => {
                    worksheet
                        .write_string(row_number, column, text.as_str())
                        .map_err(export_err)?;
                }
                other => {
                    worksheet
                        .write_string(row_number, column, other.to_string())
                        .map_err(export_err)?;
                }
            }
        }
    }

    workbook.save_to_buffer().map_err(export_err)
}

fn render_csv(table: &TablePayload) -> Result<Vec<u8>, ServiceError> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    writer
        .write_record(&table.columns)
        .map_err(|err| ServiceError::Export(err.to_string()))?;
    for row in &table.rows {
        let record: Vec<String> = row.iter().map(csv_cell).collect();
        writer
            .write_record(&record)
            .map_err(|err| ServiceError::Export(err.to_string()))?;
    }
    writer
        .into_inner()
        .map_err(|err| ServiceError::Export(err.to_string()))
}

fn csv_cell(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

fn now_rfc3339() -> String {
    OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .unwrap_or_else(|_| "1970-01-01T00:00:00Z".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_table() -> TablePayload {
        TablePayload {
            columns: vec!["name".into(), "amount".into()],
            rows: vec![
                vec![json!("Widget"), json!(9.5)],
                vec![json!("Gadget"), Value::Null],
            ],
        }
    }

    #[test]
    fn export_filenames_default_and_complete() {
        let defaulted = export_filename(None, ExportFormat::Xlsx);
        assert!(defaulted.starts_with("export_"), "{defaulted}");
        assert!(defaulted.ends_with(".xlsx"), "{defaulted}");

        assert_eq!(
            export_filename(Some("report"), ExportFormat::Csv),
            "report.csv"
        );
        assert_eq!(
            export_filename(Some("report.XLSX"), ExportFormat::Xlsx),
            "report.XLSX"
        );
        assert_eq!(
            export_filename(Some("../escape"), ExportFormat::Csv),
            "escape.csv"
        );
    }

    #[test]
    fn csv_rendering_quotes_and_blanks() {
        let bytes = render_csv(&sample_table()).expect("render");
        let text = String::from_utf8(bytes).expect("utf8");
        assert_eq!(text, "name,amount\nWidget,9.5\nGadget,\n");
    }

    #[test]
    fn xlsx_rendering_round_trips_through_calamine() {
        let bytes = render_xlsx(&sample_table()).expect("render");
        let cursor = std::io::Cursor::new(bytes);
        let mut workbook: calamine::Xlsx<_> =
            calamine::open_workbook_from_rs(cursor).expect("open");
        let range = calamine::Reader::worksheet_range(&mut workbook, "Sheet1").expect("range");
        assert_eq!(
            range.get_value((0, 0)),
            Some(&calamine::Data::String("name".into()))
        );
        assert_eq!(
            range.get_value((1, 1)),
            Some(&calamine::Data::Float(9.5))
        );
    }

    #[test]
    fn hits_without_payload_are_skipped() {
        let mut payload = serde_json::Map::new();
        payload.insert("text".into(), json!("Revenue grew."));
        payload.insert("source".into(), json!("report.pdf"));
        payload.insert("locator".into(), json!("page=3"));

        let hits = vec![
            ScoredPoint {
                id: "a".into(),
                score: 0.9,
                payload: Some(payload),
            },
            ScoredPoint {
                id: "b".into(),
                score: 0.5,
                payload: None,
            },
        ];

        let passages = passages_from_hits(&hits);
        assert_eq!(passages.len(), 1);
        assert_eq!(passages[0].source, "report.pdf");
        assert_eq!(passages[0].locator.as_deref(), Some("page=3"));
        assert_eq!(passages[0].text, "Revenue grew.");
    }
}
