//! Entry point for one reindex run against live clusters.

use std::sync::Arc;
use std::time::Duration;

use indicatif::ProgressBar;
use tracing::{error, info};

use crate::config::ReindexRequest;
use crate::error::{Error, Result};
use crate::pipeline::{ReindexPipeline, ReindexResult};
use crate::solr::{SolrClient, SolrSourceReader, SolrTargetWriter};

/// Runs reindex requests end to end.
#[derive(Debug, Default, Clone)]
pub struct ReindexService {
    progress: Option<ProgressBar>,
}

impl ReindexService {
    /// Creates a service without progress reporting.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Reports indexed documents on `progress`.
    #[must_use]
    pub fn with_progress(mut self, progress: ProgressBar) -> Self {
        self.progress = Some(progress);
        self
    }

    /// Copies the request's documents from source to target, giving up
    /// after `deadline`.
    ///
    /// Both cluster clients are built here and released when the run ends,
    /// whether it succeeds, fails or times out. On timeout every in-flight
    /// read and write is abandoned.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DeadlineExceeded`] on timeout, or the first
    /// discovery, read or write failure.
    pub async fn reindex(&self, request: &ReindexRequest, deadline: Duration) -> Result<ReindexResult> {
        info!(
            "Starting reindex. source={}/{} target={}/{} query={} timeout={:?}",
            request.source.cluster().base_url(),
            request.source.collection(),
            request.target.cluster().base_url(),
            request.target.collection(),
            request.filters.query(),
            deadline
        );

        let source = SolrClient::new(request.source.cluster())?;
        let target = SolrClient::new(request.target.cluster())?;
        let mut pipeline = ReindexPipeline::new(
            Arc::new(SolrSourceReader::new(source)),
            Arc::new(SolrTargetWriter::new(target)),
        );
        if let Some(progress) = &self.progress {
            pipeline = pipeline.with_progress(progress.clone());
        }

        let outcome = tokio::time::timeout(deadline, pipeline.execute(request)).await;
        drop(pipeline);

        let result = match outcome {
            Ok(result) => result,
            Err(_) => Err(Error::DeadlineExceeded(deadline)),
        };
        match &result {
            Ok(done) => info!(
                "Reindex complete. docs_read={} docs_indexed={} batches_sent={} retries={} elapsed={:?} export_mode={}",
                done.stats.docs_read,
                done.stats.docs_indexed,
                done.stats.batches_sent,
                done.stats.retries,
                done.stats.elapsed,
                done.export_mode_used
            ),
            Err(e) => error!("Reindex failed: {}", e),
        }
        result
    }
}
