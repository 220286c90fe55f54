//! Minimal REST client for the Qdrant collections and points APIs.

use crate::config::get_config;
use crate::qdrant::{
    payload::{build_payload, current_timestamp_rfc3339, generate_point_id},
    types::{
        CountResponse, PayloadContext, PointInsert, QdrantError, QueryResponse,
        QueryResponseResult, ScoredPoint,
    },
};
use reqwest::{Client, Method, StatusCode};
use serde_json::{Map, Value, json};

/// Lightweight HTTP client for Qdrant operations.
pub struct QdrantService {
    pub(crate) client: Client,
    pub(crate) base_url: String,
    pub(crate) api_key: Option<String>,
}

impl QdrantService {
    /// Construct a new client using configuration derived from the environment.
    pub fn new() -> Result<Self, QdrantError> {
        let config = get_config();
        Self::from_parts(&config.qdrant_url, config.qdrant_api_key.clone())
    }

    /// Construct a client for an explicit endpoint, bypassing the process
    /// configuration.
    pub fn from_parts(url: &str, api_key: Option<String>) -> Result<Self, QdrantError> {
        let client = Client::builder().user_agent("paperquery/0.2").build()?;
        let base_url = normalize_base_url(url).map_err(QdrantError::InvalidUrl)?;
        tracing::debug!(
            url = %base_url,
            authenticated = api_key.as_deref().is_some_and(|key| !key.is_empty()),
            "Initialized Qdrant HTTP client"
        );

        Ok(Self {
            client,
            base_url,
            api_key,
        })
    }

    /// Create the collection when missing and make sure the payload indexes
    /// used for scoped filtering exist.
    pub async fn ensure_collection(
        &self,
        collection: &str,
        vector_size: u64,
    ) -> Result<(), QdrantError> {
        if !self.collection_exists(collection).await? {
            tracing::debug!(collection, vector_size, "Creating collection");
            self.create_collection(collection, vector_size).await?;
        }
        self.ensure_payload_indexes(collection).await
    }

    /// Create a collection with the specified vector size, tolerating a
    /// concurrent creation racing this one.
    pub async fn create_collection(
        &self,
        collection: &str,
        vector_size: u64,
    ) -> Result<(), QdrantError> {
        let response = self
            .request(Method::PUT, &format!("collections/{collection}"))
            .json(&json!({
                "vectors": { "size": vector_size, "distance": "Cosine" }
            }))
            .send()
            .await?;

        match response.status() {
            status if status.is_success() => Ok(()),
            StatusCode::CONFLICT => {
                tracing::debug!(collection, "Collection already exists");
                Ok(())
            }
            _ => {
                let error = unexpected_status(response).await;
                tracing::error!(collection, error = %error, "Failed to create collection");
                Err(error)
            }
        }
    }

    /// Keyword indexes on the fields every query filters by. Failures are
    /// logged and skipped; filtering still works without the index.
    pub async fn ensure_payload_indexes(&self, collection: &str) -> Result<(), QdrantError> {
        for field in ["owner_id", "source"] {
            let response = self
                .request(Method::PUT, &format!("collections/{collection}/index"))
                .json(&json!({ "field_name": field, "field_schema": "keyword" }))
                .send()
                .await?;

            let status = response.status();
            if status.is_success() || status == StatusCode::CONFLICT {
                tracing::debug!(collection, field, "Payload index ensured");
            } else {
                let error = unexpected_status(response).await;
                tracing::warn!(collection, field, error = %error, "Failed to ensure payload index");
            }
        }
        Ok(())
    }

    /// Upsert chunk vectors with their payloads. Returns how many points were
    /// written.
    pub async fn index_points(
        &self,
        collection: &str,
        context: &PayloadContext,
        points: Vec<PointInsert>,
    ) -> Result<usize, QdrantError> {
        if points.is_empty() {
            return Ok(0);
        }

        let now = current_timestamp_rfc3339();
        let serialized: Vec<Value> = points
            .iter()
            .map(|point| {
                json!({
                    "id": generate_point_id(),
                    "vector": point.vector,
                    "payload": build_payload(context, point, &now),
                })
            })
            .collect();
        let written = serialized.len();

        let response = self
            .request(Method::PUT, &format!("collections/{collection}/points"))
            .query(&[("wait", true)])
            .json(&json!({ "points": serialized }))
            .send()
            .await?;

        if !response.status().is_success() {
            let error = unexpected_status(response).await;
            tracing::error!(collection, source = %context.source, error = %error, "Failed to index points");
            return Err(error);
        }

        tracing::debug!(
            collection,
            points = written,
            source = %context.source,
            "Points indexed"
        );
        Ok(written)
    }

    /// Similarity search scoped by `filter`, returning scored payloads.
    pub async fn search_points(
        &self,
        collection: &str,
        vector: Vec<f32>,
        filter: Value,
        limit: usize,
        score_threshold: Option<f32>,
    ) -> Result<Vec<ScoredPoint>, QdrantError> {
        let mut body = Map::new();
        body.insert("query".into(), json!(vector));
        body.insert("limit".into(), json!(limit));
        body.insert("with_payload".into(), Value::Bool(true));
        body.insert("filter".into(), filter);
        if let Some(threshold) = score_threshold {
            body.insert("score_threshold".into(), json!(threshold));
        }

        let response = self
            .request(
                Method::POST,
                &format!("collections/{collection}/points/query"),
            )
            .json(&Value::Object(body))
            .send()
            .await?;

        if !response.status().is_success() {
            let error = unexpected_status(response).await;
            tracing::error!(collection, error = %error, "Qdrant search failed");
            return Err(error);
        }

        let payload: QueryResponse = response.json().await?;
        let points = match payload.result {
            QueryResponseResult::Points(points) => points,
            QueryResponseResult::Object { points, .. } => points,
        };
        Ok(points
            .into_iter()
            .map(|point| ScoredPoint {
                id: point_id_string(point.id),
                score: point.score,
                payload: point.payload,
            })
            .collect())
    }

    /// Delete every point matching the filter.
    pub async fn delete_points(&self, collection: &str, filter: Value) -> Result<(), QdrantError> {
        let response = self
            .request(
                Method::POST,
                &format!("collections/{collection}/points/delete"),
            )
            .query(&[("wait", true)])
            .json(&json!({ "filter": filter }))
            .send()
            .await?;

        if !response.status().is_success() {
            let error = unexpected_status(response).await;
            tracing::error!(collection, error = %error, "Failed to delete points");
            return Err(error);
        }

        tracing::debug!(collection, "Points deleted by filter");
        Ok(())
    }

    /// Exact count of the points matching the filter.
    pub async fn count_points(&self, collection: &str, filter: Value) -> Result<u64, QdrantError> {
        let response = self
            .request(
                Method::POST,
                &format!("collections/{collection}/points/count"),
            )
            .json(&json!({ "filter": filter, "exact": true }))
            .send()
            .await?;

        if !response.status().is_success() {
            let error = unexpected_status(response).await;
            tracing::error!(collection, error = %error, "Qdrant count failed");
            return Err(error);
        }

        let payload: CountResponse = response.json().await?;
        Ok(payload.result.count)
    }

    /// Check whether the collection currently exists.
    pub async fn collection_exists(&self, collection: &str) -> Result<bool, QdrantError> {
        let response = self
            .request(Method::GET, &format!("collections/{collection}"))
            .send()
            .await?;

        match response.status() {
            StatusCode::OK => Ok(true),
            StatusCode::NOT_FOUND => Ok(false),
            _ => {
                let error = unexpected_status(response).await;
                tracing::error!(collection, error = %error, "Collection existence check failed");
                Err(error)
            }
        }
    }

    fn request(&self, method: Method, path: &str) -> reqwest::RequestBuilder {
        let url = format!("{}/{}", self.base_url.trim_end_matches('/'), path);
        let mut builder = self.client.request(method, url);
        if let Some(key) = self.api_key.as_deref().filter(|key| !key.is_empty()) {
            builder = builder.header("api-key", key);
        }
        builder
    }
}

/// Drain a failed response into an error carrying the status and body text.
async fn unexpected_status(response: reqwest::Response) -> QdrantError {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    QdrantError::UnexpectedStatus { status, body }
}

fn normalize_base_url(url: &str) -> Result<String, String> {
    let mut parsed = reqwest::Url::parse(url).map_err(|error| error.to_string())?;
    let trimmed = parsed.path().trim_end_matches('/').to_string();
    parsed.set_path(&trimmed);
    Ok(parsed.to_string())
}

fn point_id_string(id: Value) -> String {
    match id {
        Value::String(text) => text,
        Value::Number(number) => number.to_string(),
        Value::Object(map) => {
            let uuid = map.get("uuid").map(|value| match value {
                Value::String(text) => text.clone(),
                other => other.to_string(),
            });
            uuid.unwrap_or_else(|| Value::Object(map).to_string())
        }
        Value::Null => String::new(),
        other => other.to_string(),
    }
}
