// Reindex tool - pedantic lints relaxed for CLI ergonomics
#![allow(clippy::pedantic)]

//! # Solr Reindex
//!
//! `solr-reindex` is a CLI tool and library that copies a query-defined
//! subset of one SolrCloud collection into another collection, possibly on
//! a different cluster.
//!
//! ## How a run works
//!
//! | Step | What happens |
//! |------|--------------|
//! | Discovery | `CLUSTERSTATUS` names the active leader of every (selected) shard |
//! | Strategy | `/export` when every requested field has docValues, cursorMark paging otherwise |
//! | Read | One producer per shard leader, queried with `distrib=false`, merged into one bounded stream |
//! | Batch | Fixed-size batches behind a bounded buffer (backpressure) |
//! | Write | Concurrent JSON updates to the target, retried with jittered exponential backoff |
//!
//! ## Quick Start
//!
//! ```bash
//! # Generate a request template, edit it, then run it
//! solr-reindex init --output request.yaml
//! solr-reindex run --request request.yaml --timeout-secs 900
//!
//! # Job mode: reads reindex-job.toml and REINDEX_JOB_* variables
//! solr-reindex
//! ```
//!
//! ## Request Example
//!
//! ```yaml
//! source:
//!   cluster:
//!     base_url: http://solr-a:8983/solr
//!   collection: products_v1
//! target:
//!   cluster:
//!     base_url: http://solr-b:8983/solr
//!   collection: products_v2
//! filters:
//!   query: "category:books"
//! fields: [id, title, price]
//! tuning:
//!   write_batch_size: 500
//!   write_concurrency: 4
//! ```

#![warn(missing_docs)]

pub mod batcher;
pub mod config;
pub mod error;
pub mod job;
pub mod pipeline;
pub mod retry;
pub mod service;
pub mod solr;

pub use config::{
    ClusterConfig, CollectionRef, FieldSelection, ReindexFilters, ReindexRequest, ReindexTuning,
    TuningSettings,
};
pub use error::{Error, Result, Stage};
pub use job::JobConfig;
pub use pipeline::{ReindexPipeline, ReindexResult, ReindexStats};
pub use retry::{is_retryable_error, retry_with, with_retry, RetryPolicy};
pub use service::ReindexService;
pub use solr::{Document, DocumentWriter, SourceReader};
