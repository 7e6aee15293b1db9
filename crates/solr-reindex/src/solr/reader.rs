//! Shard-aware reading of the source collection.
//!
//! One producer task runs per shard leader and pushes documents into a
//! single bounded channel; the receiving end is the merged stream handed to
//! the pipeline. Dropping that stream (completion, failure or deadline)
//! aborts every producer, even one sleeping in a retry backoff or waiting
//! on a page.
//! Documents from different shards interleave in arrival order.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use super::client::SolrClient;
use super::discovery::{ShardLeaderDiscovery, ShardLeaderReplica};
use super::export::DocsArrayScanner;
use super::schema::{
    decide_export, ExportDecision, SchemaMetadata, SchemaMetadataProvider, ALL_FIELDS_REASON,
};
use super::{strip_internal_fields, Document};
use crate::config::ReindexRequest;
use crate::error::{Error, Result, Stage};
use crate::retry::{with_retry, RetryPolicy};

/// Cursor value that starts a cursorMark traversal.
pub const CURSOR_START: &str = "*";

/// Merged stream of source documents; an `Err` item ends the read.
pub type DocumentStream = BoxStream<'static, Result<Document>>;

/// A source stream plus how it was produced.
pub struct SourceDocuments {
    /// Documents from every selected shard.
    pub documents: DocumentStream,
    /// `true` when shards are read through `/export`.
    pub export_mode_used: bool,
    /// Reasons export was not used; empty in export mode.
    pub warnings: Vec<String>,
}

impl std::fmt::Debug for SourceDocuments {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SourceDocuments")
            .field("export_mode_used", &self.export_mode_used)
            .field("warnings", &self.warnings)
            .finish_non_exhaustive()
    }
}

/// Source of documents for a reindex run.
#[async_trait]
pub trait SourceReader: Send + Sync {
    /// Plans the read and starts streaming.
    async fn stream_documents(&self, request: &ReindexRequest) -> Result<SourceDocuments>;
}

/// How each shard is read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadStrategy {
    /// `/select` with cursorMark pagination.
    Cursor,
    /// `/export` streaming.
    Export,
}

impl ReadStrategy {
    const fn stage(self) -> Stage {
        match self {
            Self::Cursor => Stage::ReadCursor,
            Self::Export => Stage::ReadExport,
        }
    }
}

/// Reads a SolrCloud collection shard by shard from the leaders.
#[derive(Debug, Clone)]
pub struct SolrSourceReader {
    client: SolrClient,
    schema: SchemaMetadataProvider,
    discovery: ShardLeaderDiscovery,
}

impl SolrSourceReader {
    /// Creates a reader bound to the source cluster client.
    #[must_use]
    pub fn new(client: SolrClient) -> Self {
        Self {
            schema: SchemaMetadataProvider::new(client.clone()),
            discovery: ShardLeaderDiscovery::new(client.clone()),
            client,
        }
    }

    async fn schema_metadata(&self, request: &ReindexRequest) -> SchemaMetadata {
        match self
            .schema
            .fetch(&request.source, request.tuning.retry_policy())
            .await
        {
            Ok(metadata) => metadata,
            Err(e) => {
                warn!("Schema introspection failed, assuming defaults: {}", e);
                SchemaMetadata::default()
            }
        }
    }
}

#[async_trait]
impl SourceReader for SolrSourceReader {
    async fn stream_documents(&self, request: &ReindexRequest) -> Result<SourceDocuments> {
        let tuning = &request.tuning;

        // All-fields reads never use export, so the schema is not needed.
        let (metadata, decision) = if request.fields.is_all() {
            (
                SchemaMetadata::default(),
                ExportDecision::disabled(vec![ALL_FIELDS_REASON.to_string()]),
            )
        } else {
            let metadata = self.schema_metadata(request).await;
            let decision = decide_export(&request.fields, &metadata);
            (metadata, decision)
        };

        let leaders = self
            .discovery
            .discover_leaders(
                &request.source,
                request.filters.source_shards(),
                tuning.retry_policy(),
            )
            .await?;

        let strategy = if decision.use_export() {
            ReadStrategy::Export
        } else {
            ReadStrategy::Cursor
        };
        info!(
            "Reading {} shard(s) of '{}' with {:?} strategy (sort field '{}')",
            leaders.len(),
            request.source.collection(),
            strategy,
            metadata.unique_key_field()
        );

        let plan = Arc::new(ShardReadPlan {
            client: self.client.clone(),
            collection: request.source.collection().to_string(),
            params: read_params(request, metadata.unique_key_field()),
            page_size: tuning.read_page_size(),
            stall_timeout: tuning.request_timeout(),
            retry_policy: tuning.retry_policy().clone(),
        });
        let documents = merge_shards(plan, leaders, strategy, tuning.read_buffer_capacity());

        Ok(SourceDocuments {
            documents,
            export_mode_used: decision.use_export(),
            warnings: decision.into_reasons(),
        })
    }
}

/// Query parameters shared by every shard request.
///
/// Always `distrib=false` against the leader core; never a `shards` list.
/// `wt=json` is added per request.
pub(crate) fn read_params(request: &ReindexRequest, sort_field: &str) -> Vec<(&'static str, String)> {
    let mut params = vec![
        ("q", request.filters.query().to_string()),
        ("fl", request.fields.field_list(sort_field)),
        ("sort", format!("{sort_field} asc")),
        ("distrib", "false".to_string()),
    ];
    params.extend(request.filters.fqs().iter().map(|fq| ("fq", fq.clone())));
    params
}

#[derive(Debug)]
struct ShardReadPlan {
    client: SolrClient,
    collection: String,
    params: Vec<(&'static str, String)>,
    page_size: usize,
    stall_timeout: Duration,
    retry_policy: RetryPolicy,
}

type DocumentSender = mpsc::Sender<Result<Document>>;

fn merge_shards(
    plan: Arc<ShardReadPlan>,
    leaders: Vec<ShardLeaderReplica>,
    strategy: ReadStrategy,
    capacity: usize,
) -> DocumentStream {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    let mut producers = JoinSet::new();

    for shard in leaders {
        let plan = Arc::clone(&plan);
        let tx = tx.clone();
        producers.spawn(async move {
            let outcome = match strategy {
                ReadStrategy::Cursor => read_cursor(&plan, &shard, &tx).await,
                ReadStrategy::Export => read_export(&plan, &shard, &tx).await,
            };
            match outcome {
                Ok(()) => debug!("Shard {} finished", shard.logical_shard),
                Err(e) => {
                    let e = e.in_stage(strategy.stage(), plan.collection.clone());
                    let message = e.to_string();
                    if tx.send(Err(e)).await.is_err() {
                        debug!(
                            "Shard {} failed after the reader was dropped: {}",
                            shard.logical_shard, message
                        );
                    }
                }
            }
        });
    }
    drop(tx);

    // Dropping the stream drops the set, which aborts producers still
    // sleeping in a backoff or waiting on a page.
    stream::unfold((rx, producers), |(mut rx, producers)| async move {
        rx.recv().await.map(|item| (item, (rx, producers)))
    })
    .boxed()
}

/// Sends `docs` downstream; returns `false` once the consumer is gone.
async fn forward(tx: &DocumentSender, docs: impl IntoIterator<Item = Document>) -> bool {
    for doc in docs {
        if tx.send(Ok(strip_internal_fields(doc))).await.is_err() {
            return false;
        }
    }
    true
}

#[derive(Debug)]
pub(crate) struct CursorPage {
    documents: Vec<Document>,
    next_cursor: String,
}

async fn read_cursor(
    plan: &ShardReadPlan,
    shard: &ShardLeaderReplica,
    tx: &DocumentSender,
) -> Result<()> {
    let url = &format!("{}/select", shard.core_url());
    let mut cursor = CURSOR_START.to_string();

    loop {
        if tx.is_closed() {
            debug!("Shard {} cancelled", shard.logical_shard);
            return Ok(());
        }

        let current = &cursor;
        let page = with_retry(&plan.retry_policy, "cursor page", || async move {
            fetch_cursor_page(plan, url, current).await
        })
        .await?;

        if !forward(tx, page.documents).await {
            return Ok(());
        }
        // Solr repeats the sent mark once the shard is exhausted.
        if page.next_cursor == cursor {
            return Ok(());
        }
        cursor = page.next_cursor;
    }
}

async fn fetch_cursor_page(plan: &ShardReadPlan, url: &str, cursor: &str) -> Result<CursorPage> {
    let mut params = plan.params.clone();
    params.push(("rows", plan.page_size.to_string()));
    params.push(("cursorMark", cursor.to_string()));

    let response = plan.client.get_json(url, &params).await?;
    parse_cursor_page(response, cursor)
}

/// Splits a `/select` response into documents and the next cursor mark.
/// A missing mark is treated as "no more pages".
pub(crate) fn parse_cursor_page(response: Value, sent_cursor: &str) -> Result<CursorPage> {
    let Value::Object(mut body) = response else {
        return Err(Error::MalformedResponse(
            "cursor page was not a JSON object".to_string(),
        ));
    };

    let next_cursor = match body.remove("nextCursorMark") {
        Some(Value::String(mark)) => mark,
        _ => sent_cursor.to_string(),
    };
    let docs = match body.remove("response") {
        Some(Value::Object(mut response)) => response.remove("docs"),
        _ => None,
    };
    let docs = match docs {
        Some(Value::Array(docs)) => docs,
        Some(Value::Null) | None => Vec::new(),
        Some(_) => {
            return Err(Error::MalformedResponse(
                "cursor page 'docs' was not an array".to_string(),
            ))
        }
    };

    let documents = docs
        .into_iter()
        .map(|doc| match doc {
            Value::Object(doc) => Ok(doc),
            other => Err(Error::MalformedResponse(format!(
                "cursor page document was not an object: {other}"
            ))),
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(CursorPage {
        documents,
        next_cursor,
    })
}

async fn read_export(
    plan: &ShardReadPlan,
    shard: &ShardLeaderReplica,
    tx: &DocumentSender,
) -> Result<()> {
    let url = &format!("{}/export", shard.core_url());
    let params = &plan.params;

    let response = with_retry(&plan.retry_policy, "export open", || async move {
        let send = plan
            .client
            .get_streaming(url)
            .query(params)
            .query(&[("wt", "json")])
            .send();
        match tokio::time::timeout(plan.stall_timeout, send).await {
            Ok(response) => Ok(response?),
            Err(_) => Err(stalled(shard, plan.stall_timeout)),
        }
    })
    .await?;

    // Mid-stream failures are not retried: the export cannot resume.
    let status = response.status();
    if status.as_u16() >= 400 {
        return Err(Error::Export(format!(
            "export request to shard '{}' returned HTTP {}",
            shard.logical_shard, status
        )));
    }

    let mut body = Box::pin(response.bytes_stream());
    let mut scanner = DocsArrayScanner::new();
    let mut docs = Vec::new();

    loop {
        if tx.is_closed() {
            debug!("Shard {} cancelled", shard.logical_shard);
            return Ok(());
        }
        let chunk = match tokio::time::timeout(plan.stall_timeout, body.next()).await {
            Err(_) => return Err(stalled(shard, plan.stall_timeout)),
            Ok(None) => break,
            Ok(Some(chunk)) => chunk?,
        };

        scanner.push(&chunk, &mut docs)?;
        if !forward(tx, docs.drain(..)).await {
            return Ok(());
        }
        if scanner.is_done() {
            return Ok(());
        }
    }

    scanner.finish()
}

fn stalled(shard: &ShardLeaderReplica, timeout: Duration) -> Error {
    Error::Io(std::io::Error::new(
        std::io::ErrorKind::TimedOut,
        format!(
            "export stream of shard '{}' stalled for {:?}",
            shard.logical_shard, timeout
        ),
    ))
}

#[cfg(test)]
#[path = "reader_tests.rs"]
mod tests;
