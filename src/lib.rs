#![deny(missing_docs)]

//! Core library for the Paperquery question-answering backend.

/// HTTP routing and REST handlers.
pub mod api;
/// Environment-driven configuration management.
pub mod config;
/// Embedding client abstraction and adapters.
pub mod embedding;
/// Upload parsing, chunking, and sanitization.
pub mod ingest;
/// Chat completion client for answer synthesis.
pub mod llm;
/// Structured logging and tracing setup.
pub mod logging;
/// Ingestion and query metrics helpers.
pub mod metrics;
/// Qdrant vector store integration.
pub mod qdrant;
/// Query routing, retrieval, and the service facade.
pub mod service;
/// Metadata and tabular SQLite stores.
pub mod store;
