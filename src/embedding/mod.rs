//! Embedding providers.
//!
//! Three backends implement [`EmbeddingClient`], selected by `EMBEDDING_PROVIDER`: a local
//! Ollama runtime, an OpenAI-compatible embeddings endpoint, and a deterministic hashing
//! embedder that needs no provider at all. Every backend validates vector width against
//! `EMBEDDING_DIMENSION` so a misconfigured model fails loudly instead of corrupting the
//! collection.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::config::{Config, EmbeddingProvider};

/// Errors raised by embedding providers.
#[derive(Debug, Error)]
pub enum EmbeddingClientError {
    /// Provider was unable to produce embeddings for the supplied input.
    #[error("Failed to generate embeddings: {0}")]
    GenerationFailed(String),
    /// Transport-level failure talking to the provider.
    #[error("Embedding request failed: {0}")]
    Http(#[from] reqwest::Error),
    /// Provider returned vectors of a width other than the configured one.
    #[error("Embedding dimension mismatch: provider returned {actual}, configured {expected}")]
    DimensionMismatch {
        /// Width demanded by `EMBEDDING_DIMENSION`.
        expected: usize,
        /// Width the provider actually returned.
        actual: usize,
    },
}

/// Interface implemented by embedding backends.
#[async_trait]
pub trait EmbeddingClient {
    /// Produce an embedding vector for each supplied chunk of text.
    async fn generate_embeddings(
        &self,
        texts: Vec<String>,
    ) -> Result<Vec<Vec<f32>>, EmbeddingClientError>;
}

fn ensure_dimension(vector: &[f32], expected: usize) -> Result<(), EmbeddingClientError> {
    if vector.len() != expected {
        return Err(EmbeddingClientError::DimensionMismatch {
            expected,
            actual: vector.len(),
        });
    }
    Ok(())
}

async fn error_snippet(response: reqwest::Response) -> String {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    let snippet: String = body.chars().take(200).collect();
    format!("{status}: {snippet}")
}

/// Embedding client backed by a local Ollama runtime.
pub struct OllamaEmbedder {
    http: reqwest::Client,
    base_url: String,
    model: String,
    dimension: usize,
}

#[derive(Deserialize)]
struct OllamaEmbeddingResponse {
    embedding: Vec<f32>,
}

impl OllamaEmbedder {
    /// Build a client against the given Ollama base URL.
    pub fn new(base_url: &str, model: &str, dimension: usize) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
            dimension,
        }
    }
}

#[async_trait]
impl EmbeddingClient for OllamaEmbedder {
    async fn generate_embeddings(
        &self,
        texts: Vec<String>,
    ) -> Result<Vec<Vec<f32>>, EmbeddingClientError> {
        if texts.is_empty() {
            return Err(EmbeddingClientError::GenerationFailed(
                "no texts provided".to_string(),
            ));
        }

        let url = format!("{}/api/embeddings", self.base_url);
        let mut embeddings = Vec::with_capacity(texts.len());

        // The Ollama embeddings endpoint takes one prompt per request.
        for text in texts {
            let response = self
                .http
                .post(&url)
                .json(&serde_json::json!({ "model": self.model, "prompt": text }))
                .send()
                .await?;

            if !response.status().is_success() {
                return Err(EmbeddingClientError::GenerationFailed(format!(
                    "Ollama returned {}",
                    error_snippet(response).await
                )));
            }

            let parsed: OllamaEmbeddingResponse = response.json().await?;
            ensure_dimension(&parsed.embedding, self.dimension)?;
            embeddings.push(parsed.embedding);
        }

        Ok(embeddings)
    }
}

/// Embedding client for OpenAI-compatible `/embeddings` endpoints.
pub struct OpenAiEmbedder {
    http: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    model: String,
    dimension: usize,
}

#[derive(Deserialize)]
struct OpenAiEmbeddingResponse {
    data: Vec<OpenAiEmbeddingEntry>,
}

#[derive(Deserialize)]
struct OpenAiEmbeddingEntry {
    index: usize,
    embedding: Vec<f32>,
}

impl OpenAiEmbedder {
    /// Build a client against the given OpenAI-compatible base URL.
    pub fn new(base_url: &str, api_key: Option<&str>, model: &str, dimension: usize) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.map(|key| key.to_string()),
            model: model.to_string(),
            dimension,
        }
    }
}

#[async_trait]
impl EmbeddingClient for OpenAiEmbedder {
    async fn generate_embeddings(
        &self,
        texts: Vec<String>,
    ) -> Result<Vec<Vec<f32>>, EmbeddingClientError> {
        if texts.is_empty() {
            return Err(EmbeddingClientError::GenerationFailed(
                "no texts provided".to_string(),
            ));
        }

        let expected = texts.len();
        let mut request = self
            .http
            .post(format!("{}/embeddings", self.base_url))
            .json(&serde_json::json!({ "model": self.model, "input": texts }));
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await?;
        if !response.status().is_success() {
            return Err(EmbeddingClientError::GenerationFailed(format!(
                "embeddings endpoint returned {}",
                error_snippet(response).await
            )));
        }

        let mut parsed: OpenAiEmbeddingResponse = response.json().await?;
        if parsed.data.len() != expected {
            return Err(EmbeddingClientError::GenerationFailed(format!(
                "embeddings endpoint returned {} vectors for {} inputs",
                parsed.data.len(),
                expected
            )));
        }

        parsed.data.sort_by_key(|entry| entry.index);
        let mut embeddings = Vec::with_capacity(parsed.data.len());
        for entry in parsed.data {
            ensure_dimension(&entry.embedding, self.dimension)?;
            embeddings.push(entry.embedding);
        }

        Ok(embeddings)
    }
}

/// Deterministic offline embedder.
///
/// Folds byte features into the configured dimension at slots offset by the text's SHA-256
/// digest, then L2-normalizes. Similar texts land near each other only by shared bytes, which
/// is enough for tests and for running the stack without any embedding provider.
pub struct HashingEmbedder {
    dimension: usize,
}

impl HashingEmbedder {
    /// Build an embedder producing vectors of the given width.
    pub const fn new(dimension: usize) -> Self {
        Self { dimension }
    }

    fn encode(&self, text: &str) -> Vec<f32> {
        let mut embedding = vec![0.0_f32; self.dimension];
        if text.is_empty() || self.dimension == 0 {
            return embedding;
        }

        let digest = Sha256::digest(text.as_bytes());
        for (index, byte) in text.bytes().enumerate() {
            let offset = usize::from(digest[index % digest.len()]);
            let slot = (index + offset) % self.dimension;
            embedding[slot] += f32::from(byte) / 255.0;
        }

        let norm = embedding
            .iter()
            .map(|value| value * value)
            .sum::<f32>()
            .sqrt();
        if norm > 0.0 {
            for value in &mut embedding {
                *value /= norm;
            }
        }

        embedding
    }
}

#[async_trait]
impl EmbeddingClient for HashingEmbedder {
    async fn generate_embeddings(
        &self,
        texts: Vec<String>,
    ) -> Result<Vec<Vec<f32>>, EmbeddingClientError> {
        if self.dimension == 0 {
            return Err(EmbeddingClientError::GenerationFailed(
                "embedding dimension must be greater than zero".to_string(),
            ));
        }
        if texts.is_empty() {
            return Err(EmbeddingClientError::GenerationFailed(
                "no texts provided".to_string(),
            ));
        }

        Ok(texts.iter().map(|text| self.encode(text)).collect())
    }
}

/// Build the embedding client selected by configuration.
pub fn embedding_client_from_config(config: &Config) -> Arc<dyn EmbeddingClient + Send + Sync> {
    match config.embedding_provider {
        EmbeddingProvider::Ollama => Arc::new(OllamaEmbedder::new(
            &config.ollama_url,
            &config.embedding_model,
            config.embedding_dimension,
        )),
        EmbeddingProvider::OpenAI => Arc::new(OpenAiEmbedder::new(
            &config.llm_base_url,
            config.llm_api_key.as_deref(),
            &config.embedding_model,
            config.embedding_dimension,
        )),
        EmbeddingProvider::Hashing => Arc::new(HashingEmbedder::new(config.embedding_dimension)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn hashing_embedder_is_deterministic() {
        let embedder = HashingEmbedder::new(64);
        let first = embedder
            .generate_embeddings(vec!["quarterly revenue".to_string()])
            .await
            .unwrap();
        let second = embedder
            .generate_embeddings(vec!["quarterly revenue".to_string()])
            .await
            .unwrap();
        assert_eq!(first, second);
        assert_eq!(first[0].len(), 64);
    }

    #[tokio::test]
    async fn hashing_embedder_normalizes_vectors() {
        let embedder = HashingEmbedder::new(32);
        let vectors = embedder
            .generate_embeddings(vec!["some document text".to_string()])
            .await
            .unwrap();
        let norm: f32 = vectors[0].iter().map(|v| v * v).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[tokio::test]
    async fn hashing_embedder_distinguishes_texts() {
        let embedder = HashingEmbedder::new(64);
        let vectors = embedder
            .generate_embeddings(vec!["alpha".to_string(), "omega".to_string()])
            .await
            .unwrap();
        assert_ne!(vectors[0], vectors[1]);
    }

    #[tokio::test]
    async fn rejects_empty_input() {
        let embedder = HashingEmbedder::new(16);
        let error = embedder.generate_embeddings(Vec::new()).await.unwrap_err();
        assert!(matches!(error, EmbeddingClientError::GenerationFailed(_)));
    }

    #[test]
    fn dimension_check_names_both_numbers() {
        let error = ensure_dimension(&[0.0; 3], 8).unwrap_err();
        assert_eq!(
            error.to_string(),
            "Embedding dimension mismatch: provider returned 3, configured 8"
        );
    }
}
