use std::sync::atomic::{AtomicU64, Ordering};

/// Thread-safe counters describing ingestion and query activity.
#[derive(Default)]
pub struct ServiceMetrics {
    files_uploaded: AtomicU64,
    documents_indexed: AtomicU64,
    chunks_indexed: AtomicU64,
    files_deleted: AtomicU64,
    queries_sql: AtomicU64,
    queries_direct: AtomicU64,
    queries_semantic: AtomicU64,
    upstream_failures: AtomicU64,
}

impl ServiceMetrics {
    /// Create an empty metrics accumulator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an ingested file together with the documents and chunks it produced.
    pub fn record_upload(&self, document_count: u64, chunk_count: u64) {
        self.files_uploaded.fetch_add(1, Ordering::Relaxed);
        self.documents_indexed
            .fetch_add(document_count, Ordering::Relaxed);
        self.chunks_indexed
            .fetch_add(chunk_count, Ordering::Relaxed);
    }

    /// Record a deleted file.
    pub fn record_delete(&self) {
        self.files_deleted.fetch_add(1, Ordering::Relaxed);
    }

    /// Record an answered query routed to direct SQL execution.
    pub fn record_sql_query(&self) {
        self.queries_sql.fetch_add(1, Ordering::Relaxed);
    }

    /// Record an answered query resolved by the tabular pattern matcher.
    pub fn record_direct_query(&self) {
        self.queries_direct.fetch_add(1, Ordering::Relaxed);
    }

    /// Record an answered query routed through semantic retrieval.
    pub fn record_semantic_query(&self) {
        self.queries_semantic.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a failed call to an upstream engine (vector store, embedder, LLM).
    pub fn record_upstream_failure(&self) {
        self.upstream_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Return a snapshot of the current counters.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            files_uploaded: self.files_uploaded.load(Ordering::Relaxed),
            documents_indexed: self.documents_indexed.load(Ordering::Relaxed),
            chunks_indexed: self.chunks_indexed.load(Ordering::Relaxed),
            files_deleted: self.files_deleted.load(Ordering::Relaxed),
            queries_sql: self.queries_sql.load(Ordering::Relaxed),
            queries_direct: self.queries_direct.load(Ordering::Relaxed),
            queries_semantic: self.queries_semantic.load(Ordering::Relaxed),
            upstream_failures: self.upstream_failures.load(Ordering::Relaxed),
        }
    }
}

/// Immutable view of service counters used for reporting.
#[derive(Debug, Clone, Copy, serde::Serialize)]
pub struct MetricsSnapshot {
    /// Number of files ingested since startup.
    pub files_uploaded: u64,
    /// Number of documents extracted from uploaded files.
    pub documents_indexed: u64,
    /// Total chunk count produced across all indexed documents.
    pub chunks_indexed: u64,
    /// Number of files removed since startup.
    pub files_deleted: u64,
    /// Queries executed as user-written SQL.
    pub queries_sql: u64,
    /// Queries answered by the tabular pattern matcher without an LLM call.
    pub queries_direct: u64,
    /// Queries answered through semantic retrieval and synthesis.
    pub queries_semantic: u64,
    /// Failed calls to upstream engines.
    pub upstream_failures: u64,
}
