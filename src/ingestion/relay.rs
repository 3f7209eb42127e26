//! Consumer side of an ingestion: persists chunks and reports progress to the caller.

use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::pipeline::ProducerHandle;
use super::types::{
    Chunk, IngestionError, PipelineEvent, ProcessingStatus, SinkError, UploadOutcome,
};

/// Destination for finalized chunks.
#[async_trait]
pub trait VectorSink: Send + Sync {
    /// Store one chunk. When `embedding` is `None` the sink computes it.
    async fn upsert(&self, chunk: &Chunk, embedding: Option<Vec<f32>>) -> Result<(), SinkError>;
}

/// Transport relaying [`ProcessingStatus`] events to whoever started the ingestion.
#[async_trait]
pub trait ProgressSink: Send + Sync {
    /// Deliver a status event. Returns `false` once the caller is gone.
    async fn publish(&self, status: ProcessingStatus) -> bool;

    /// Resolves when the caller stops listening. Never resolves by default.
    async fn closed(&self) {
        std::future::pending::<()>().await
    }
}

#[async_trait]
impl ProgressSink for mpsc::Sender<ProcessingStatus> {
    async fn publish(&self, status: ProcessingStatus) -> bool {
        self.send(status).await.is_ok()
    }

    async fn closed(&self) {
        mpsc::Sender::closed(self).await
    }
}

/// Totals kept by [`relay`], readable after it returns on every outcome.
#[derive(Debug, Default)]
pub struct RelayStats {
    persisted: AtomicUsize,
    skipped_pages: AtomicU32,
}

impl RelayStats {
    /// Chunks acknowledged by the sink.
    pub fn persisted(&self) -> usize {
        self.persisted.load(Ordering::Relaxed)
    }

    /// Skipped pages observed before the relay stopped.
    pub fn skipped_pages(&self) -> u32 {
        self.skipped_pages.load(Ordering::Relaxed)
    }
}

#[derive(Default)]
struct Progress {
    total_pages: u32,
    processed_pages: u32,
    persisted: usize,
}

impl Progress {
    fn observe_page(&mut self, page_num: u32, total_pages: u32) {
        self.total_pages = total_pages;
        self.processed_pages = self.processed_pages.max(page_num);
    }
}

/// Drain the producer's events into `sink`, publishing progress after each one.
///
/// A persistence failure or a vanished caller cancels the producer; the first persistence
/// failure is returned and chunks stored before it stay stored. `stats` is updated as events
/// are handled, so partial totals survive an error.
pub async fn relay(
    mut events: mpsc::Receiver<PipelineEvent>,
    producer: ProducerHandle,
    sink: &dyn VectorSink,
    progress: &dyn ProgressSink,
    cancel: CancellationToken,
    stats: &RelayStats,
) -> Result<UploadOutcome, IngestionError> {
    let mut state = Progress::default();

    loop {
        let event = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                return abort(producer, progress, &state, IngestionError::Cancelled).await;
            }
            _ = progress.closed() => {
                tracing::info!("Caller disconnected; cancelling ingestion");
                cancel.cancel();
                return abort(producer, progress, &state, IngestionError::Cancelled).await;
            }
            event = events.recv() => event,
        };

        let Some(event) = event else {
            break;
        };

        let status = match event {
            PipelineEvent::Chunk(chunk) => {
                state.total_pages = chunk.total_pages;
                if let Err(source) = sink.upsert(&chunk, None).await {
                    tracing::error!(
                        chunk_index = state.persisted,
                        page = chunk.page_num,
                        error = %source,
                        "Failed to persist chunk; aborting document"
                    );
                    cancel.cancel();
                    drop(events);
                    let error = IngestionError::Persistence {
                        chunk_index: state.persisted,
                        page_num: chunk.page_num,
                        source,
                    };
                    return abort(producer, progress, &state, error).await;
                }
                state.persisted += 1;
                stats.persisted.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(
                    chunk_index = state.persisted - 1,
                    page = chunk.page_num,
                    "Persisted chunk"
                );
                ProcessingStatus::processing(
                    format!(
                        "Stored chunk {} from page {} of {}",
                        state.persisted, chunk.page_num, chunk.total_pages
                    ),
                    state.processed_pages,
                    state.total_pages,
                )
            }
            PipelineEvent::PageProcessed {
                page_num,
                total_pages,
                chunks,
            } => {
                state.observe_page(page_num, total_pages);
                ProcessingStatus::processing(
                    format!("Processed page {page_num} of {total_pages} ({chunks} chunks)"),
                    state.processed_pages,
                    state.total_pages,
                )
            }
            PipelineEvent::PageSkipped {
                page_num,
                total_pages,
                reason,
            } => {
                state.observe_page(page_num, total_pages);
                stats.skipped_pages.fetch_add(1, Ordering::Relaxed);
                ProcessingStatus::processing(
                    format!("Skipped page {page_num} of {total_pages}: {reason}"),
                    state.processed_pages,
                    state.total_pages,
                )
            }
        };

        if !progress.publish(status).await {
            tracing::info!("Progress receiver dropped; cancelling ingestion");
            cancel.cancel();
            return abort(producer, progress, &state, IngestionError::Cancelled).await;
        }
    }

    let verdict = match producer.await {
        Ok(result) => result,
        Err(join_error) => Err(IngestionError::Producer(join_error.to_string())),
    };

    match verdict {
        Ok(summary) => {
            let message = format!(
                "Stored {} chunks from {} pages ({} skipped)",
                state.persisted, summary.total_pages, summary.skipped_pages
            );
            progress
                .publish(ProcessingStatus::completed(message, summary.total_pages))
                .await;
            Ok(UploadOutcome {
                summary,
                persisted_chunks: state.persisted,
            })
        }
        Err(error) => {
            progress
                .publish(ProcessingStatus::failed(
                    error.to_string(),
                    state.processed_pages,
                    state.total_pages,
                ))
                .await;
            Err(error)
        }
    }
}

async fn abort(
    producer: ProducerHandle,
    progress: &dyn ProgressSink,
    state: &Progress,
    error: IngestionError,
) -> Result<UploadOutcome, IngestionError> {
    if let Err(join_error) = producer.await {
        tracing::warn!(error = %join_error, "Producer task ended abnormally during abort");
    }
    progress
        .publish(ProcessingStatus::failed(
            error.to_string(),
            state.processed_pages,
            state.total_pages,
        ))
        .await;
    Err(error)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingestion::chunking::Chunker;
    use crate::ingestion::extractor::PageTextExtractor;
    use crate::ingestion::pipeline::IngestionPipeline;
    use crate::ingestion::types::{DocumentMetadata, ExtractionError, StatusKind};
    use std::path::{Path, PathBuf};
    use std::sync::{Arc, Mutex};

    struct FixedPages(Vec<String>);

    #[async_trait]
    impl PageTextExtractor for FixedPages {
        async fn page_count(&self, _path: &Path) -> Result<u32, ExtractionError> {
            Ok(self.0.len() as u32)
        }

        async fn extract_page(&self, _path: &Path, page: u32) -> Result<String, ExtractionError> {
            Ok(self.0[(page - 1) as usize].clone())
        }
    }

    #[derive(Default)]
    struct MemorySink {
        stored: Mutex<Vec<Chunk>>,
        fail_at: Option<usize>,
    }

    #[async_trait]
    impl VectorSink for MemorySink {
        async fn upsert(&self, chunk: &Chunk, embedding: Option<Vec<f32>>) -> Result<(), SinkError> {
            assert!(embedding.is_none());
            let mut stored = self.stored.lock().unwrap();
            if self.fail_at == Some(stored.len()) {
                return Err(SinkError::Rejected("disk full".into()));
            }
            stored.push(chunk.clone());
            Ok(())
        }
    }

    fn spawn(pages: Vec<String>, max: usize, cancel: &CancellationToken) -> (mpsc::Receiver<PipelineEvent>, ProducerHandle) {
        let pipeline = IngestionPipeline::new(
            Arc::new(FixedPages(pages)),
            Chunker::new(max, 10).unwrap(),
            true,
        );
        pipeline.spawn(
            PathBuf::from("doc.pdf"),
            DocumentMetadata {
                title: "Doc".into(),
                source: None,
                tags: vec![],
                created_at: 0,
            },
            cancel.clone(),
        )
    }

    async fn collect(mut rx: mpsc::Receiver<ProcessingStatus>) -> Vec<ProcessingStatus> {
        let mut statuses = Vec::new();
        while let Some(status) = rx.recv().await {
            statuses.push(status);
        }
        statuses
    }

    #[tokio::test]
    async fn reports_page_progress_and_completion() {
        let cancel = CancellationToken::new();
        let (events, producer) = spawn(
            vec!["Page one.".into(), "Page two.".into(), "Page three.".into()],
            100,
            &cancel,
        );
        let sink = MemorySink::default();
        let stats = RelayStats::default();
        let (tx, rx) = mpsc::channel(64);
        let statuses = tokio::spawn(collect(rx));

        let outcome = relay(events, producer, &sink, &tx, cancel, &stats).await.expect("outcome");
        drop(tx);
        let statuses = statuses.await.unwrap();

        assert_eq!(outcome.persisted_chunks, 1);
        assert_eq!(sink.stored.lock().unwrap().len(), 1);

        let page_fractions: Vec<(u32, u32)> = statuses
            .iter()
            .filter(|status| status.message.starts_with("Processed page"))
            .map(|status| (status.processed_pages, status.total_pages))
            .collect();
        assert_eq!(page_fractions, vec![(1, 3), (2, 3), (3, 3)]);

        assert!(statuses
            .windows(2)
            .all(|pair| pair[0].processed_pages <= pair[1].processed_pages));
        let last = statuses.last().unwrap();
        assert_eq!(last.status, StatusKind::Completed);
        assert_eq!(last.processed_pages, 3);
        assert_eq!(last.progress, 1.0);
    }

    #[tokio::test]
    async fn persistence_failure_stops_the_upload() {
        let cancel = CancellationToken::new();
        let (events, producer) = spawn(vec!["word ".repeat(100)], 40, &cancel);
        let sink = MemorySink {
            fail_at: Some(1),
            ..Default::default()
        };
        let stats = RelayStats::default();
        let (tx, rx) = mpsc::channel(64);
        let statuses = tokio::spawn(collect(rx));

        let error = relay(events, producer, &sink, &tx, cancel.clone(), &stats)
            .await
            .unwrap_err();
        drop(tx);

        assert!(matches!(
            error,
            IngestionError::Persistence {
                chunk_index: 1,
                page_num: 1,
                source: SinkError::Rejected(_)
            }
        ));
        assert_eq!(sink.stored.lock().unwrap().len(), 1);
        assert_eq!(stats.persisted(), 1);
        assert!(cancel.is_cancelled());

        let statuses = statuses.await.unwrap();
        assert_eq!(statuses.last().unwrap().status, StatusKind::Failed);
    }

    #[tokio::test]
    async fn vanished_caller_cancels_ingestion() {
        let cancel = CancellationToken::new();
        let (events, producer) = spawn(vec!["word ".repeat(400)], 40, &cancel);
        let sink = MemorySink::default();
        let stats = RelayStats::default();
        let (tx, rx) = mpsc::channel(1);
        drop(rx);

        let error = relay(events, producer, &sink, &tx, cancel.clone(), &stats)
            .await
            .unwrap_err();

        assert!(matches!(error, IngestionError::Cancelled));
        assert!(cancel.is_cancelled());
    }

    #[tokio::test]
    async fn producer_failure_is_reported_as_failed_status() {
        let cancel = CancellationToken::new();
        let (events, producer) = spawn(vec!["\u{0}".into()], 40, &cancel);
        let sink = MemorySink::default();
        let stats = RelayStats::default();
        let (tx, rx) = mpsc::channel(64);
        let statuses = tokio::spawn(collect(rx));

        let error = relay(events, producer, &sink, &tx, cancel, &stats).await.unwrap_err();
        drop(tx);

        assert!(matches!(error, IngestionError::NoContent { .. }));
        let statuses = statuses.await.unwrap();
        let last = statuses.last().unwrap();
        assert_eq!(last.status, StatusKind::Failed);
        assert!(last.message.contains("no text could be extracted"));
    }
}
