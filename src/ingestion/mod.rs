//! PDF ingestion: page extraction, chunking, and relayed persistence.

pub mod chunking;
pub mod extractor;
pub mod pipeline;
pub mod relay;
pub mod sanitize;
pub mod service;
pub mod storage;
pub mod types;

pub use chunking::{ChunkPass, Chunker};
pub use extractor::{OcrOptions, PageTextExtractor, PopplerExtractor, ToolPaths};
pub use pipeline::IngestionPipeline;
pub use relay::{ProgressSink, RelayStats, VectorSink, relay};
pub use service::{IngestionApi, IngestionService, PreparedDocument, SearchError, SearchRequest};
pub use types::{
    Chunk, ChunkingError, DocumentMetadata, ExtractionError, IngestionError, IngestionSettings,
    IngestionSummary, PipelineEvent, ProcessingStatus, SinkError, StatusKind, UploadOutcome,
    UploadRequest,
};
