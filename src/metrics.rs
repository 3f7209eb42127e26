use std::sync::atomic::{AtomicU64, Ordering};

/// Thread-safe counters describing ingestion activity.
#[derive(Default)]
pub struct IngestionMetrics {
    documents_ingested: AtomicU64,
    documents_failed: AtomicU64,
    chunks_persisted: AtomicU64,
    pages_skipped: AtomicU64,
}

impl IngestionMetrics {
    /// Create an empty metrics accumulator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a completed document with its persisted chunk and skipped page counts.
    pub fn record_document(&self, chunk_count: u64, skipped_pages: u64) {
        self.documents_ingested.fetch_add(1, Ordering::Relaxed);
        self.chunks_persisted.fetch_add(chunk_count, Ordering::Relaxed);
        self.pages_skipped.fetch_add(skipped_pages, Ordering::Relaxed);
    }

    /// Record a document whose ingestion ended in an error.
    ///
    /// Chunks persisted before the failure stay committed in the sink, so they are counted
    /// together with the pages skipped up to that point.
    pub fn record_failure(&self, persisted_chunks: u64, skipped_pages: u64) {
        self.documents_failed.fetch_add(1, Ordering::Relaxed);
        self.chunks_persisted.fetch_add(persisted_chunks, Ordering::Relaxed);
        self.pages_skipped.fetch_add(skipped_pages, Ordering::Relaxed);
    }

    /// Return a snapshot of the current counters.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            documents_ingested: self.documents_ingested.load(Ordering::Relaxed),
            documents_failed: self.documents_failed.load(Ordering::Relaxed),
            chunks_persisted: self.chunks_persisted.load(Ordering::Relaxed),
            pages_skipped: self.pages_skipped.load(Ordering::Relaxed),
        }
    }
}

/// Immutable view of ingestion counters used for reporting.
#[derive(Debug, Clone, Copy, Default, serde::Serialize)]
pub struct MetricsSnapshot {
    /// Documents that finished ingestion since startup.
    pub documents_ingested: u64,
    /// Documents whose ingestion failed.
    pub documents_failed: u64,
    /// Chunks written to the vector sink.
    pub chunks_persisted: u64,
    /// Pages skipped because no text could be extracted.
    pub pages_skipped: u64,
}
