//! Reindex pipeline orchestration: read, batch, write with retries.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::{StreamExt, TryStreamExt};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::{info, warn};

use crate::batcher::BackpressureBatcher;
use crate::config::ReindexRequest;
use crate::error::{Result, Stage};
use crate::retry::{is_retryable_error, retry_with};
use crate::solr::{Document, DocumentWriter, SourceDocuments, SourceReader};

/// Counters for one reindex run.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ReindexStats {
    /// Documents pulled from the source.
    pub docs_read: u64,
    /// Documents in successfully written batches.
    pub docs_indexed: u64,
    /// Successfully written batches.
    pub batches_sent: u64,
    /// Write retries scheduled.
    pub retries: u64,
    /// Wall-clock time of the run.
    pub elapsed: Duration,
}

impl ReindexStats {
    /// Calculate throughput (indexed documents per second).
    #[must_use]
    pub fn throughput(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs > 0.0 {
            self.docs_indexed as f64 / secs
        } else {
            0.0
        }
    }
}

/// Outcome of a successful run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReindexResult {
    /// Final counters.
    pub stats: ReindexStats,
    /// `true` when shards were streamed through `/export`.
    pub export_mode_used: bool,
    /// Why export was not used, if it was not.
    pub warnings: Vec<String>,
}

#[derive(Debug, Default)]
struct Counters {
    docs_read: AtomicU64,
    docs_indexed: AtomicU64,
    batches_sent: AtomicU64,
    retries: AtomicU64,
}

impl Counters {
    fn snapshot(&self, elapsed: Duration) -> ReindexStats {
        ReindexStats {
            docs_read: self.docs_read.load(Ordering::Relaxed),
            docs_indexed: self.docs_indexed.load(Ordering::Relaxed),
            batches_sent: self.batches_sent.load(Ordering::Relaxed),
            retries: self.retries.load(Ordering::Relaxed),
            elapsed,
        }
    }
}

/// Wires a [`SourceReader`] to a [`DocumentWriter`].
pub struct ReindexPipeline {
    reader: Arc<dyn SourceReader>,
    writer: Arc<dyn DocumentWriter>,
    progress: Option<ProgressBar>,
}

impl ReindexPipeline {
    /// Creates a pipeline.
    pub fn new(reader: Arc<dyn SourceReader>, writer: Arc<dyn DocumentWriter>) -> Self {
        Self {
            reader,
            writer,
            progress: None,
        }
    }

    /// Reports indexed documents on a spinner.
    #[must_use]
    pub fn with_progress(mut self, progress: ProgressBar) -> Self {
        self.progress = Some(progress);
        self
    }

    /// Runs one reindex to completion.
    ///
    /// Up to `write_concurrency` batches are written at once, each retried
    /// under the request's policy. The first failure cancels the read side
    /// and is returned; counters are only reported on success.
    ///
    /// # Errors
    ///
    /// Returns the first discovery, read or write failure.
    pub async fn execute(&self, request: &ReindexRequest) -> Result<ReindexResult> {
        let start = Instant::now();
        let tuning = &request.tuning;
        let counters = Arc::new(Counters::default());

        let SourceDocuments {
            documents,
            export_mode_used,
            warnings,
        } = self.reader.stream_documents(request).await?;
        for warning in &warnings {
            warn!("{}", warning);
        }

        let read_counter = Arc::clone(&counters);
        let documents = documents
            .inspect_ok(move |_| {
                read_counter.docs_read.fetch_add(1, Ordering::Relaxed);
            })
            .boxed();

        let batcher =
            BackpressureBatcher::new(tuning.write_batch_size(), tuning.max_in_flight_batches());
        let counters_ref = &counters;
        batcher
            .batch(documents)
            .try_for_each_concurrent(tuning.write_concurrency(), |batch| async move {
                self.write_batch(request, &batch, counters_ref).await?;
                let size = batch.len() as u64;
                counters_ref.docs_indexed.fetch_add(size, Ordering::Relaxed);
                counters_ref.batches_sent.fetch_add(1, Ordering::Relaxed);
                if let Some(pb) = &self.progress {
                    pb.inc(size);
                }
                Ok(())
            })
            .await?;

        let stats = counters.snapshot(start.elapsed());
        if let Some(pb) = &self.progress {
            pb.finish_with_message(format!("{} documents indexed", stats.docs_indexed));
        }
        info!(
            "Pipeline finished: {} read, {} indexed in {} batches, {} retries ({:.0} docs/sec)",
            stats.docs_read,
            stats.docs_indexed,
            stats.batches_sent,
            stats.retries,
            stats.throughput()
        );

        Ok(ReindexResult {
            stats,
            export_mode_used,
            warnings,
        })
    }

    async fn write_batch(
        &self,
        request: &ReindexRequest,
        batch: &[Document],
        counters: &Counters,
    ) -> Result<()> {
        retry_with(
            request.tuning.retry_policy(),
            "write batch",
            is_retryable_error,
            || {
                counters.retries.fetch_add(1, Ordering::Relaxed);
            },
            || self.writer.write_batch(request, batch),
        )
        .await
        .map_err(|e| e.in_stage(Stage::WriteBatch, request.target.collection()))
    }
}

/// Creates a spinner for runs whose total is unknown up front.
#[must_use]
pub fn create_progress_bar() -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.green} [{elapsed_precise}] {pos} documents indexed ({per_sec})")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    pb.enable_steady_tick(Duration::from_millis(120));
    pb
}

#[cfg(test)]
#[path = "pipeline_tests.rs"]
mod tests;
