//! Payloads stored with each chunk vector.

use crate::qdrant::types::{PayloadContext, PointInsert};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use time::OffsetDateTime;
use uuid::Uuid;

/// Assemble the payload for one chunk: ownership keys for filtering, the text
/// itself, and the citation locator fields that are present.
pub(crate) fn build_payload(
    context: &PayloadContext,
    point: &PointInsert,
    timestamp_rfc3339: &str,
) -> Value {
    let mut payload = Map::new();
    payload.insert("owner_id".into(), Value::String(context.owner_id.clone()));
    payload.insert("file_id".into(), Value::String(context.file_id.clone()));
    payload.insert("source".into(), Value::String(context.source.clone()));
    payload.insert("text".into(), Value::String(point.text.clone()));
    payload.insert("chunk_hash".into(), Value::String(point.chunk_hash.clone()));
    payload.insert("chunk_index".into(), Value::from(point.chunk_index));
    payload.insert(
        "timestamp".into(),
        Value::String(timestamp_rfc3339.to_string()),
    );

    if let Some(locator) = point.locator.as_ref().filter(|value| !value.is_empty()) {
        payload.insert("locator".into(), Value::String(locator.clone()));
    }
    if let Some(section) = point.section.as_ref().filter(|value| !value.is_empty()) {
        payload.insert("section".into(), Value::String(section.clone()));
    }
    if let Some(table) = point.table.as_ref().filter(|value| !value.is_empty()) {
        payload.insert("table".into(), Value::String(table.clone()));
    }

    Value::Object(payload)
}

/// Deterministic SHA-256 fingerprint of a chunk's text.
pub fn compute_chunk_hash(text: &str) -> String {
    hex::encode(Sha256::digest(text.as_bytes()))
}

/// Indexing time in RFC 3339 form.
pub(crate) fn current_timestamp_rfc3339() -> String {
    OffsetDateTime::now_utc()
        .format(&time::format_description::well_known::Rfc3339)
        .unwrap_or_else(|_| "1970-01-01T00:00:00Z".to_string())
}

/// Fresh UUID for a Qdrant point id.
pub(crate) fn generate_point_id() -> String {
    Uuid::new_v4().to_string()
}
