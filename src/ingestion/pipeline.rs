//! Producer side of an ingestion: walks the pages of one document and emits events.
//!
//! Events travel over a bounded channel of capacity one, so a slow consumer stalls page
//! processing instead of letting chunks pile up in memory. Closing the channel is the only
//! completion signal; the verdict (summary or fatal error) comes back through the task handle.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::chunking::{Chunker, merge_carryover};
use super::extractor::PageTextExtractor;
use super::sanitize::clean_page_text;
use super::types::{
    DocumentMetadata, ExtractionError, IngestionError, IngestionSummary, PipelineEvent,
};

/// Handle returned by [`IngestionPipeline::spawn`].
pub type ProducerHandle = JoinHandle<Result<IngestionSummary, IngestionError>>;

/// Orchestrates extraction and chunking for single documents.
#[derive(Clone)]
pub struct IngestionPipeline {
    extractor: Arc<dyn PageTextExtractor>,
    chunker: Chunker,
    require_content: bool,
}

impl IngestionPipeline {
    /// Build a pipeline around an extractor and a validated chunker.
    pub fn new(extractor: Arc<dyn PageTextExtractor>, chunker: Chunker, require_content: bool) -> Self {
        Self {
            extractor,
            chunker,
            require_content,
        }
    }

    /// Start processing `path` on a background task.
    ///
    /// The receiver yields chunks and per-page notices in reading order and closes once the
    /// producer stops, whether it finished, failed or was cancelled.
    pub fn spawn(
        &self,
        path: PathBuf,
        metadata: DocumentMetadata,
        cancel: CancellationToken,
    ) -> (mpsc::Receiver<PipelineEvent>, ProducerHandle) {
        let (tx, rx) = mpsc::channel(1);
        let producer = Producer {
            extractor: Arc::clone(&self.extractor),
            chunker: self.chunker,
            require_content: self.require_content,
            tx,
            cancel,
        };

        let handle = tokio::spawn(async move { producer.run(&path, &metadata).await });
        (rx, handle)
    }
}

struct Producer {
    extractor: Arc<dyn PageTextExtractor>,
    chunker: Chunker,
    require_content: bool,
    tx: mpsc::Sender<PipelineEvent>,
    cancel: CancellationToken,
}

impl Producer {
    async fn run(
        self,
        path: &Path,
        metadata: &DocumentMetadata,
    ) -> Result<IngestionSummary, IngestionError> {
        let total_pages = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return Err(IngestionError::Cancelled),
            count = self.extractor.page_count(path) => {
                count.map_err(|source| IngestionError::PageCount {
                    path: path.display().to_string(),
                    source,
                })?
            }
        };
        if total_pages == 0 {
            return Err(IngestionError::PageCount {
                path: path.display().to_string(),
                source: ExtractionError::PageCount("document has no pages".into()),
            });
        }

        tracing::info!(path = %path.display(), total_pages, title = %metadata.title, "Ingesting document");

        let mut summary = IngestionSummary {
            total_pages,
            ..Default::default()
        };
        let mut carryover = String::new();
        let mut carryover_page = 0;

        for page_num in 1..=total_pages {
            if self.cancel.is_cancelled() {
                tracing::info!(path = %path.display(), page = page_num, "Ingestion cancelled");
                return Err(IngestionError::Cancelled);
            }

            let extracted = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Err(IngestionError::Cancelled),
                text = self.extractor.extract_page(path, page_num) => text,
            };

            let text = extracted.map(|raw| clean_page_text(&raw)).and_then(|text| {
                if text.is_empty() {
                    Err(ExtractionError::NothingExtracted {
                        page: page_num,
                        cause: None,
                    })
                } else {
                    Ok(text)
                }
            });

            let text = match text {
                Ok(text) => text,
                Err(error) => {
                    tracing::warn!(
                        path = %path.display(),
                        page = page_num,
                        error = %error,
                        "Skipping page without extractable text"
                    );
                    summary.skipped_pages += 1;
                    self.send(PipelineEvent::PageSkipped {
                        page_num,
                        total_pages,
                        reason: error.to_string(),
                    })
                    .await?;
                    continue;
                }
            };

            let merged = merge_carryover(&carryover, &text);
            let pass = self.chunker.chunk(&merged, metadata, page_num, total_pages);
            let produced = pass.chunks.len();

            for chunk in pass.chunks {
                self.send(PipelineEvent::Chunk(chunk)).await?;
                summary.chunks_emitted += 1;
            }
            carryover = pass.carryover;
            carryover_page = page_num;
            summary.processed_pages += 1;

            self.send(PipelineEvent::PageProcessed {
                page_num,
                total_pages,
                chunks: produced,
            })
            .await?;
        }

        if let Some(chunk) = self
            .chunker
            .flush(&carryover, metadata, carryover_page, total_pages)
        {
            self.send(PipelineEvent::Chunk(chunk)).await?;
            summary.chunks_emitted += 1;
        }

        if summary.chunks_emitted == 0 {
            if self.require_content {
                return Err(IngestionError::NoContent {
                    total_pages,
                    skipped_pages: summary.skipped_pages,
                });
            }
            tracing::warn!(path = %path.display(), total_pages, "Document produced no chunks");
        }

        tracing::info!(
            path = %path.display(),
            chunks = summary.chunks_emitted,
            skipped = summary.skipped_pages,
            "Finished extracting document"
        );
        Ok(summary)
    }

    async fn send(&self, event: PipelineEvent) -> Result<(), IngestionError> {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(IngestionError::Cancelled),
            sent = self.tx.send(event) => sent.map_err(|_| IngestionError::Cancelled),
        }
    }
}
