//! Mapping between chunks and the payload stored beside each vector.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::ingestion::Chunk;

/// Payload persisted with every chunk vector.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkPayload {
    /// Chunk text.
    pub content: String,
    /// Document title.
    pub title: String,
    /// Optional document source.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    /// Document tags.
    #[serde(default)]
    pub tags: Vec<String>,
    /// Page the chunk is attributed to.
    pub page_num: u32,
    /// Page count of the document.
    pub total_pages: u32,
    /// SHA-256 of the chunk text, hex encoded.
    pub chunk_hash: String,
    /// Unix timestamp (seconds) of the ingestion run.
    #[serde(default)]
    pub created_at: i64,
    /// RFC3339 time the point was written.
    #[serde(default)]
    pub indexed_at: String,
}

impl ChunkPayload {
    /// Build the payload for `chunk`, stamping the current time.
    pub fn from_chunk(chunk: &Chunk) -> Self {
        Self {
            content: chunk.content.clone(),
            title: chunk.title.clone(),
            source: chunk.source.clone(),
            tags: chunk.tags.clone(),
            page_num: chunk.page_num,
            total_pages: chunk.total_pages,
            chunk_hash: compute_chunk_hash(&chunk.content),
            created_at: chunk.created_at,
            indexed_at: current_timestamp_rfc3339(),
        }
    }
}

/// Compute a deterministic SHA-256 hash for the chunk text.
pub fn compute_chunk_hash(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    hex::encode(hasher.finalize())
}

pub(crate) fn current_timestamp_rfc3339() -> String {
    OffsetDateTime::now_utc()
        .format(&time::format_description::well_known::Rfc3339)
        .unwrap_or_else(|_| "1970-01-01T00:00:00Z".to_string())
}

pub(crate) fn generate_point_id() -> String {
    Uuid::new_v4().to_string()
}
