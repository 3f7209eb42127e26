//! Qdrant vector store integration.

pub mod client;
pub mod filters;
pub mod payload;
pub mod types;

pub use client::QdrantStore;
pub use filters::build_search_filter;
pub use payload::{ChunkPayload, compute_chunk_hash};
pub use types::{
    CollectionSpec, Distance, FieldCondition, Filter, MatchCondition, PointStruct, QdrantError,
    ScoredChunk, SearchFilterArgs,
};
