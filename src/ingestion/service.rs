//! Ingestion service shared by the HTTP server and the CLI.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use thiserror::Error;
use time::OffsetDateTime;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::chunking::Chunker;
use super::extractor::PageTextExtractor;
use super::pipeline::IngestionPipeline;
use super::relay::{ProgressSink, RelayStats, VectorSink, relay};
use super::sanitize::sanitize_metadata;
use super::storage::{self, validate_extension};
use super::types::{
    DocumentMetadata, IngestionError, IngestionSettings, ProcessingStatus, UploadOutcome,
    UploadRequest,
};
use crate::metrics::{IngestionMetrics, MetricsSnapshot};
use crate::qdrant::{QdrantError, QdrantStore, ScoredChunk, SearchFilterArgs};

/// Retrieval request accepted by [`IngestionService::search`].
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SearchRequest {
    /// Natural-language query.
    pub query: String,
    /// Maximum hits; the configured default when omitted.
    #[serde(default)]
    pub limit: Option<usize>,
    /// Optional tag/title restrictions.
    #[serde(flatten)]
    pub filter: SearchFilterArgs,
}

/// Errors surfaced by retrieval.
#[derive(Debug, Error)]
pub enum SearchError {
    /// Query text was empty after trimming.
    #[error("query must not be empty")]
    EmptyQuery,
    /// No retrieval backend is attached to this service.
    #[error("search is not available")]
    Unavailable,
    /// Qdrant query failed.
    #[error(transparent)]
    Qdrant(#[from] QdrantError),
}

/// Document validated and ready for ingestion.
#[derive(Debug, Clone)]
pub struct PreparedDocument {
    /// Location of the PDF on disk.
    pub path: PathBuf,
    /// Sanitized metadata copied onto every chunk.
    pub metadata: DocumentMetadata,
}

/// Abstraction over the ingestion service used by the HTTP router.
#[async_trait]
pub trait IngestionApi: Send + Sync {
    /// Validate an upload and persist its bytes under the upload directory.
    async fn store_upload(
        &self,
        file_name: &str,
        bytes: &[u8],
        request: UploadRequest,
    ) -> Result<PreparedDocument, IngestionError>;

    /// Run extraction, chunking and persistence, streaming progress to `progress`.
    async fn ingest(
        &self,
        document: PreparedDocument,
        progress: mpsc::Sender<ProcessingStatus>,
        cancel: CancellationToken,
    ) -> Result<UploadOutcome, IngestionError>;

    /// Retrieve chunks similar to the query.
    async fn search(&self, request: SearchRequest) -> Result<Vec<ScoredChunk>, SearchError>;

    /// Retrieve the current metrics snapshot for diagnostics.
    fn metrics_snapshot(&self) -> MetricsSnapshot;
}

/// Owns the pipeline, sink and counters for every document ingested by this process.
pub struct IngestionService {
    pipeline: IngestionPipeline,
    sink: Arc<dyn VectorSink>,
    retriever: Option<Arc<QdrantStore>>,
    metrics: Arc<IngestionMetrics>,
    settings: IngestionSettings,
    default_limit: usize,
    max_limit: usize,
}

impl IngestionService {
    /// Build a service writing into `sink`. Chunker settings are validated here.
    pub fn new(
        settings: IngestionSettings,
        extractor: Arc<dyn PageTextExtractor>,
        sink: Arc<dyn VectorSink>,
    ) -> Result<Self, IngestionError> {
        let chunker = Chunker::new(settings.max_chunk_size, settings.chunk_overlap)?;
        Ok(Self {
            pipeline: IngestionPipeline::new(extractor, chunker, settings.require_content),
            sink,
            retriever: None,
            metrics: Arc::new(IngestionMetrics::new()),
            settings,
            default_limit: 5,
            max_limit: 50,
        })
    }

    /// Attach the store used to answer search requests.
    pub fn with_retriever(mut self, store: Arc<QdrantStore>) -> Self {
        self.retriever = Some(store);
        self
    }

    /// Override the default and maximum number of search hits.
    pub fn with_search_limits(mut self, default_limit: usize, max_limit: usize) -> Self {
        self.max_limit = max_limit.max(1);
        self.default_limit = default_limit.clamp(1, self.max_limit);
        self
    }

    /// Settings the service was built with.
    pub fn settings(&self) -> &IngestionSettings {
        &self.settings
    }

    /// Validate a PDF already on disk for ingestion under its own path.
    pub fn prepare_file(
        &self,
        path: &Path,
        request: UploadRequest,
    ) -> Result<PreparedDocument, IngestionError> {
        let file_name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        validate_extension(&file_name)?;
        let metadata = sanitize_metadata(request, unix_now())?;
        Ok(PreparedDocument {
            path: path.to_path_buf(),
            metadata,
        })
    }

    /// Validate an upload, then write it to `<upload_dir>/<title>_<ts>.pdf`.
    pub async fn store_upload(
        &self,
        file_name: &str,
        bytes: &[u8],
        request: UploadRequest,
    ) -> Result<PreparedDocument, IngestionError> {
        validate_extension(file_name)?;
        let metadata = sanitize_metadata(request, unix_now())?;
        let path = storage::store_upload(
            &self.settings.upload_dir,
            file_name,
            &metadata.title,
            bytes,
            metadata.created_at,
        )
        .await?;
        Ok(PreparedDocument { path, metadata })
    }

    /// Ingest a prepared document, relaying progress to `progress`.
    pub async fn ingest(
        &self,
        document: PreparedDocument,
        progress: &dyn ProgressSink,
        cancel: CancellationToken,
    ) -> Result<UploadOutcome, IngestionError> {
        let PreparedDocument { path, metadata } = document;
        let title = metadata.title.clone();
        let stats = RelayStats::default();

        let (events, producer) = self.pipeline.spawn(path.clone(), metadata, cancel.clone());
        let result = relay(events, producer, self.sink.as_ref(), progress, cancel, &stats).await;

        match &result {
            Ok(outcome) => {
                self.metrics.record_document(
                    outcome.persisted_chunks as u64,
                    u64::from(outcome.summary.skipped_pages),
                );
                tracing::info!(
                    path = %path.display(),
                    title = %title,
                    chunks = outcome.persisted_chunks,
                    skipped_pages = outcome.summary.skipped_pages,
                    "Document ingested"
                );
            }
            Err(error) => {
                let stored = stats.persisted();
                self.metrics
                    .record_failure(stored as u64, u64::from(stats.skipped_pages()));
                tracing::error!(
                    path = %path.display(),
                    title = %title,
                    persisted_chunks = stored,
                    skipped_pages = stats.skipped_pages(),
                    error = %error,
                    "Document ingestion failed"
                );
            }
        }

        result
    }

    /// Validate and ingest a PDF already on disk.
    pub async fn ingest_file(
        &self,
        path: &Path,
        request: UploadRequest,
        progress: &dyn ProgressSink,
        cancel: CancellationToken,
    ) -> Result<UploadOutcome, IngestionError> {
        let document = self.prepare_file(path, request)?;
        self.ingest(document, progress, cancel).await
    }

    /// Retrieve chunks similar to the query text.
    pub async fn search(&self, request: SearchRequest) -> Result<Vec<ScoredChunk>, SearchError> {
        let query = request.query.trim();
        if query.is_empty() {
            return Err(SearchError::EmptyQuery);
        }
        let store = self.retriever.as_ref().ok_or(SearchError::Unavailable)?;
        let limit = request
            .limit
            .unwrap_or(self.default_limit)
            .clamp(1, self.max_limit);

        let hits = store.search(query, &request.filter, limit, None).await?;
        tracing::debug!(hits = hits.len(), limit, "Search completed");
        Ok(hits)
    }

    /// Snapshot the ingestion counters.
    pub fn metrics_snapshot(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }
}

#[async_trait]
impl IngestionApi for IngestionService {
    async fn store_upload(
        &self,
        file_name: &str,
        bytes: &[u8],
        request: UploadRequest,
    ) -> Result<PreparedDocument, IngestionError> {
        IngestionService::store_upload(self, file_name, bytes, request).await
    }

    async fn ingest(
        &self,
        document: PreparedDocument,
        progress: mpsc::Sender<ProcessingStatus>,
        cancel: CancellationToken,
    ) -> Result<UploadOutcome, IngestionError> {
        IngestionService::ingest(self, document, &progress, cancel).await
    }

    async fn search(&self, request: SearchRequest) -> Result<Vec<ScoredChunk>, SearchError> {
        IngestionService::search(self, request).await
    }

    fn metrics_snapshot(&self) -> MetricsSnapshot {
        IngestionService::metrics_snapshot(self)
    }
}

fn unix_now() -> i64 {
    OffsetDateTime::now_utc().unix_timestamp()
}
