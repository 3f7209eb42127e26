//! Core data types and error definitions for the ingestion pipeline.

use crate::{embedding::EmbeddingClientError, qdrant::QdrantError};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Metadata supplied alongside an upload, either as multipart JSON or CLI flags.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
pub struct UploadRequest {
    /// Human readable document title.
    pub title: String,
    /// Optional origin of the document (URL, path, citation).
    #[serde(default)]
    pub source: Option<String>,
    /// Free-form tags copied onto every chunk.
    #[serde(default)]
    pub tags: Vec<String>,
}

/// Sanitized metadata template copied into every chunk of one document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentMetadata {
    /// Document title.
    pub title: String,
    /// Optional source reference.
    pub source: Option<String>,
    /// Normalized, de-duplicated tags.
    pub tags: Vec<String>,
    /// Unix timestamp (seconds) captured when ingestion started.
    pub created_at: i64,
}

/// Unit persisted to the vector sink.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Chunk {
    /// Trimmed, non-empty chunk text.
    pub content: String,
    /// Page the chunk is attributed to (1-based).
    pub page_num: u32,
    /// Page count of the source document.
    pub total_pages: u32,
    /// Document title.
    pub title: String,
    /// Optional source reference.
    pub source: Option<String>,
    /// Document tags.
    pub tags: Vec<String>,
    /// Unix timestamp (seconds) of the ingestion run.
    pub created_at: i64,
}

/// Phase reported by a [`ProcessingStatus`] event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StatusKind {
    /// Ingestion is still running.
    Processing,
    /// Ingestion finished successfully.
    Completed,
    /// Ingestion stopped with an error.
    Failed,
}

/// Progress event relayed to the caller while a document is ingested.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessingStatus {
    /// Current phase.
    pub status: StatusKind,
    /// Human readable description.
    pub message: String,
    /// Fraction of pages handled, in `[0, 1]`.
    pub progress: f64,
    /// Page count of the document (0 when unknown).
    pub total_pages: u32,
    /// Pages handled so far.
    pub processed_pages: u32,
}

impl ProcessingStatus {
    /// In-flight progress event.
    pub fn processing(message: impl Into<String>, processed_pages: u32, total_pages: u32) -> Self {
        Self {
            status: StatusKind::Processing,
            message: message.into(),
            progress: progress_fraction(processed_pages, total_pages),
            total_pages,
            processed_pages,
        }
    }

    /// Terminal success event.
    pub fn completed(message: impl Into<String>, total_pages: u32) -> Self {
        Self {
            status: StatusKind::Completed,
            message: message.into(),
            progress: 1.0,
            total_pages,
            processed_pages: total_pages,
        }
    }

    /// Terminal failure event.
    pub fn failed(message: impl Into<String>, processed_pages: u32, total_pages: u32) -> Self {
        Self {
            status: StatusKind::Failed,
            message: message.into(),
            progress: progress_fraction(processed_pages, total_pages),
            total_pages,
            processed_pages,
        }
    }
}

fn progress_fraction(processed: u32, total: u32) -> f64 {
    if total == 0 {
        0.0
    } else {
        (f64::from(processed) / f64::from(total)).clamp(0.0, 1.0)
    }
}

/// Item handed from the orchestrator to the relay.
#[derive(Debug, Clone, PartialEq)]
pub enum PipelineEvent {
    /// A finalized chunk ready for persistence.
    Chunk(Chunk),
    /// A page was extracted and chunked.
    PageProcessed {
        /// Page number (1-based).
        page_num: u32,
        /// Page count of the document.
        total_pages: u32,
        /// Chunks finalized while processing this page.
        chunks: usize,
    },
    /// A page produced no text and was skipped.
    PageSkipped {
        /// Page number (1-based).
        page_num: u32,
        /// Page count of the document.
        total_pages: u32,
        /// Rendered extraction error.
        reason: String,
    },
}

/// Totals reported by the orchestrator once every page has been visited.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct IngestionSummary {
    /// Page count read before extraction.
    pub total_pages: u32,
    /// Pages that yielded text.
    pub processed_pages: u32,
    /// Pages skipped after extraction failures.
    pub skipped_pages: u32,
    /// Chunks sent to the relay.
    pub chunks_emitted: usize,
}

/// Result of a relayed ingestion.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct UploadOutcome {
    /// Orchestrator totals.
    pub summary: IngestionSummary,
    /// Chunks acknowledged by the vector sink.
    pub persisted_chunks: usize,
}

/// Immutable knobs for one ingestion service instance.
#[derive(Debug, Clone)]
pub struct IngestionSettings {
    /// Upper bound on chunk length, in characters.
    pub max_chunk_size: usize,
    /// Characters shared between consecutive chunks.
    pub chunk_overlap: usize,
    /// Report documents without any chunk as [`IngestionError::NoContent`].
    pub require_content: bool,
    /// Directory receiving uploaded files.
    pub upload_dir: PathBuf,
    /// Parent directory for OCR scratch space; the system temp dir when `None`.
    pub ocr_work_dir: Option<PathBuf>,
    /// Tesseract language list.
    pub ocr_languages: String,
    /// Tesseract `--oem` value.
    pub ocr_engine_mode: u8,
    /// Tesseract `--psm` value.
    pub ocr_page_segmentation_mode: u8,
    /// Limit applied to each extraction subprocess.
    pub page_timeout: Duration,
}

impl Default for IngestionSettings {
    fn default() -> Self {
        Self {
            max_chunk_size: 1000,
            chunk_overlap: 100,
            require_content: true,
            upload_dir: PathBuf::from("uploads"),
            ocr_work_dir: None,
            ocr_languages: "vie+eng".into(),
            ocr_engine_mode: 1,
            ocr_page_segmentation_mode: 3,
            page_timeout: Duration::from_secs(120),
        }
    }
}

/// Errors produced while building chunks.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ChunkingError {
    /// Chunk size of zero cannot make progress.
    #[error("chunk size must be greater than zero")]
    InvalidChunkSize,
    /// Overlap must stay strictly below the chunk size.
    #[error("chunk overlap ({overlap}) must be smaller than chunk size ({max})")]
    OverlapTooLarge {
        /// Requested chunk size.
        max: usize,
        /// Requested overlap.
        overlap: usize,
    },
}

/// Errors raised while probing or extracting PDF pages.
#[derive(Debug, Error)]
pub enum ExtractionError {
    /// External tool could not be started.
    #[error("failed to spawn {tool}: {source}")]
    Spawn {
        /// Tool binary.
        tool: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
    /// External tool exited unsuccessfully.
    #[error("{tool} exited with {status}: {stderr}")]
    ToolFailed {
        /// Tool binary.
        tool: String,
        /// Rendered exit status.
        status: String,
        /// Captured standard error, trimmed.
        stderr: String,
    },
    /// External tool exceeded the per-page time limit.
    #[error("{tool} timed out after {seconds}s")]
    Timeout {
        /// Tool binary.
        tool: String,
        /// Limit that was exceeded.
        seconds: u64,
    },
    /// Page count could not be determined, or the document has none.
    #[error("unable to determine page count: {0}")]
    PageCount(String),
    /// Rasterization produced no image to OCR.
    #[error("no rendered image found for page {page}")]
    MissingImage {
        /// Page number.
        page: u32,
    },
    /// Neither extraction method produced text.
    #[error("got nothing at page {page}")]
    NothingExtracted {
        /// Page number.
        page: u32,
        /// Failure reported by the last method attempted, if any.
        #[source]
        cause: Option<Box<ExtractionError>>,
    },
    /// Scratch directory handling failed.
    #[error("OCR work directory error: {0}")]
    WorkDir(#[from] std::io::Error),
}

/// Errors returned by a vector sink.
#[derive(Debug, Error)]
pub enum SinkError {
    /// Embedding could not be computed for the chunk.
    #[error("Failed to embed chunk: {0}")]
    Embedding(#[from] EmbeddingClientError),
    /// Qdrant rejected the write.
    #[error("Qdrant request failed: {0}")]
    Qdrant(#[from] QdrantError),
    /// Sink refused the chunk for another reason.
    #[error("Sink rejected chunk: {0}")]
    Rejected(String),
}

/// Errors that end the ingestion of a document.
#[derive(Debug, Error)]
pub enum IngestionError {
    /// Upload metadata failed validation.
    #[error("invalid metadata: {0}")]
    InvalidMetadata(String),
    /// File extension is not supported for ingestion.
    #[error("unsupported file type: {0}")]
    UnsupportedFileType(String),
    /// Chunker settings were rejected.
    #[error("invalid chunking settings: {0}")]
    Chunking(#[from] ChunkingError),
    /// Page count lookup failed; nothing was processed.
    #[error("failed to read page count of {path}: {source}")]
    PageCount {
        /// Document path.
        path: String,
        /// Lookup failure.
        #[source]
        source: ExtractionError,
    },
    /// Every page was visited but no chunk was produced.
    #[error("no text could be extracted from any of the {total_pages} pages ({skipped_pages} skipped)")]
    NoContent {
        /// Page count of the document.
        total_pages: u32,
        /// Pages whose extraction failed.
        skipped_pages: u32,
    },
    /// Vector sink rejected a chunk; remaining chunks were not persisted.
    #[error("failed to persist chunk {chunk_index} (page {page_num}): {source}")]
    Persistence {
        /// Zero-based index of the chunk within the document.
        chunk_index: usize,
        /// Page the chunk was attributed to.
        page_num: u32,
        /// Sink failure.
        #[source]
        source: SinkError,
    },
    /// Caller went away or cancellation was requested.
    #[error("ingestion cancelled")]
    Cancelled,
    /// Upload storage failed.
    #[error("failed to store upload: {0}")]
    Storage(#[from] std::io::Error),
    /// Producer task ended abnormally.
    #[error("ingestion task failed: {0}")]
    Producer(String),
}

impl IngestionError {
    /// Whether the error stems from caller input rather than processing.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidMetadata(_) | Self::UnsupportedFileType(_)
        )
    }
}
