//! Typed request and response bodies for the Qdrant REST API.

use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use super::payload::ChunkPayload;
use crate::config::Config;

/// Errors returned while interacting with Qdrant.
#[derive(Debug, Error)]
pub enum QdrantError {
    /// Base URL failed to parse or normalize.
    #[error("Invalid Qdrant URL: {0}")]
    InvalidUrl(String),
    /// HTTP layer failed before receiving a response.
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
    /// Qdrant responded with an unexpected status code.
    #[error("Unexpected Qdrant response ({status}): {body}")]
    UnexpectedStatus {
        /// HTTP status returned from Qdrant.
        status: StatusCode,
        /// Body payload associated with the failing response.
        body: String,
    },
    /// Collection description was rejected before any request was sent.
    #[error("Invalid collection: {0}")]
    InvalidCollection(String),
    /// Query text could not be embedded.
    #[error("Failed to embed query: {0}")]
    Embedding(String),
}

/// Vector similarity metric.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Distance {
    /// Cosine similarity.
    Cosine,
    /// Dot product.
    Dot,
    /// Euclidean distance.
    Euclid,
}

/// Immutable description of the collection a store writes into.
///
/// Built once per store configuration and never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectionSpec {
    name: String,
    vector_size: u64,
    distance: Distance,
}

impl CollectionSpec {
    /// Describe a collection, rejecting empty names and zero-sized vectors.
    pub fn new(name: impl Into<String>, vector_size: u64, distance: Distance) -> Result<Self, QdrantError> {
        let name = name.into().trim().to_string();
        if name.is_empty() {
            return Err(QdrantError::InvalidCollection(
                "collection name must not be empty".into(),
            ));
        }
        if vector_size == 0 {
            return Err(QdrantError::InvalidCollection(format!(
                "collection {name} needs a vector size greater than zero"
            )));
        }
        Ok(Self {
            name,
            vector_size,
            distance,
        })
    }

    /// Cosine collection sized for the configured embedding dimension.
    pub fn from_config(config: &Config) -> Result<Self, QdrantError> {
        Self::new(
            config.qdrant_collection_name.clone(),
            config.embedding_dimension as u64,
            Distance::Cosine,
        )
    }

    /// Collection name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Expected vector length.
    pub fn vector_size(&self) -> u64 {
        self.vector_size
    }

    pub(crate) fn create_request(&self) -> CreateCollectionRequest {
        CreateCollectionRequest {
            vectors: VectorParams {
                size: self.vector_size,
                distance: self.distance,
            },
        }
    }

    /// Payload fields indexed for filtered retrieval.
    pub(crate) fn payload_indexes(&self) -> [PayloadIndexRequest; 3] {
        [
            PayloadIndexRequest::new("tags", "keyword"),
            PayloadIndexRequest::new("title", "keyword"),
            PayloadIndexRequest::new("page_num", "integer"),
        ]
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct CreateCollectionRequest {
    pub(crate) vectors: VectorParams,
}

#[derive(Debug, Serialize)]
pub(crate) struct VectorParams {
    pub(crate) size: u64,
    pub(crate) distance: Distance,
}

#[derive(Debug, Serialize)]
pub(crate) struct PayloadIndexRequest {
    pub(crate) field_name: &'static str,
    pub(crate) field_schema: &'static str,
}

impl PayloadIndexRequest {
    const fn new(field_name: &'static str, field_schema: &'static str) -> Self {
        Self {
            field_name,
            field_schema,
        }
    }
}

/// One point written by an upsert.
#[derive(Debug, Clone, Serialize)]
pub struct PointStruct {
    /// Point identifier (UUID).
    pub id: String,
    /// Embedding vector.
    pub vector: Vec<f32>,
    /// Stored chunk payload.
    pub payload: ChunkPayload,
}

#[derive(Debug, Serialize)]
pub(crate) struct UpsertPointsRequest<'a> {
    pub(crate) points: &'a [PointStruct],
}

/// Match clause of a [`FieldCondition`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum MatchCondition {
    /// Exact value match.
    Value {
        /// Value the field must equal.
        value: String,
    },
    /// Field matches any of the listed values.
    Any {
        /// Accepted values.
        any: Vec<String>,
    },
}

/// Constraint on one payload field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldCondition {
    /// Payload key.
    pub key: String,
    /// Match clause.
    #[serde(rename = "match")]
    pub condition: MatchCondition,
}

/// Conjunction of field conditions.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Filter {
    /// Conditions that must all hold.
    pub must: Vec<FieldCondition>,
}

/// Optional restrictions applied to retrieval.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SearchFilterArgs {
    /// Chunks carrying any of these tags.
    #[serde(default)]
    pub tags: Vec<String>,
    /// Chunks from the document with exactly this title.
    #[serde(default)]
    pub title: Option<String>,
}

#[derive(Debug, Serialize)]
pub(crate) struct QueryRequest<'a> {
    pub(crate) query: &'a [f32],
    pub(crate) limit: usize,
    pub(crate) with_payload: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) filter: Option<Filter>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) score_threshold: Option<f32>,
}

/// Retrieved chunk with its similarity score.
#[derive(Debug, Clone, Serialize)]
pub struct ScoredChunk {
    /// Point identifier.
    pub id: String,
    /// Similarity score computed by Qdrant.
    pub score: f32,
    /// Stored payload.
    pub payload: ChunkPayload,
}

#[derive(Deserialize)]
pub(crate) struct QueryResponse {
    pub(crate) result: QueryResponseResult,
}

#[derive(Deserialize)]
#[serde(untagged)]
pub(crate) enum QueryResponseResult {
    Points(Vec<QueryPoint>),
    Object {
        #[serde(default)]
        points: Vec<QueryPoint>,
    },
}

#[derive(Deserialize)]
pub(crate) struct QueryPoint {
    pub(crate) id: Value,
    pub(crate) score: f32,
    #[serde(default)]
    pub(crate) payload: Option<ChunkPayload>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn collection_spec_validates_inputs() {
        assert!(CollectionSpec::new(" ", 8, Distance::Cosine).is_err());
        assert!(CollectionSpec::new("docs", 0, Distance::Cosine).is_err());

        let spec = CollectionSpec::new(" docs ", 8, Distance::Cosine).unwrap();
        assert_eq!(spec.name(), "docs");
        assert_eq!(
            serde_json::to_value(spec.create_request()).unwrap(),
            json!({ "vectors": { "size": 8, "distance": "Cosine" } })
        );
    }

    #[test]
    fn filter_serializes_match_clauses() {
        let filter = Filter {
            must: vec![
                FieldCondition {
                    key: "title".into(),
                    condition: MatchCondition::Value {
                        value: "Handbook".into(),
                    },
                },
                FieldCondition {
                    key: "tags".into(),
                    condition: MatchCondition::Any {
                        any: vec!["hr".into()],
                    },
                },
            ],
        };

        assert_eq!(
            serde_json::to_value(filter).unwrap(),
            json!({
                "must": [
                    { "key": "title", "match": { "value": "Handbook" } },
                    { "key": "tags", "match": { "any": ["hr"] } }
                ]
            })
        );
    }
}
