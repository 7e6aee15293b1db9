//! Error types for `solr-reindex`.
//!
//! Every failure the pipeline can surface is a variant of [`Error`]. Variants
//! carry a stable `REINDEX-XXX` code in their display text so failures can be
//! grepped out of job logs. Whether a failure is worth retrying is decided by
//! [`crate::retry::is_retryable_error`], not by the variant alone.

use std::fmt;
use std::time::Duration;

use thiserror::Error;

/// Result type alias for reindex operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Pipeline stage a failure happened in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    /// Cluster topology lookup (shard leaders).
    Discovery,
    /// Schema introspection of the source collection.
    Schema,
    /// Cursor-paginated read of one shard.
    ReadCursor,
    /// Export-streamed read of one shard.
    ReadExport,
    /// Batch write to the target collection.
    WriteBatch,
}

impl Stage {
    /// Returns the stage name used in logs and error messages.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Discovery => "discovery",
            Self::Schema => "schema",
            Self::ReadCursor => "read-cursor",
            Self::ReadExport => "read-export",
            Self::WriteBatch => "write-batch",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors that can occur while reindexing.
#[derive(Error, Debug)]
pub enum Error {
    /// The request (or one of its parts) is malformed (REINDEX-001).
    #[error("[REINDEX-001] Invalid request: {0}")]
    Validation(String),

    /// Process configuration could not be loaded (REINDEX-002).
    #[error("[REINDEX-002] Configuration error: {0}")]
    Config(String),

    /// Transport-level HTTP failure (REINDEX-003).
    #[error("[REINDEX-003] HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Solr answered with a non-success HTTP status (REINDEX-004).
    #[error("[REINDEX-004] Solr returned HTTP {status}: {message}")]
    Remote {
        /// HTTP status code.
        status: u16,
        /// Response body or reason phrase.
        message: String,
    },

    /// IO error (REINDEX-005).
    #[error("[REINDEX-005] IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON encoding or decoding error (REINDEX-006).
    #[error("[REINDEX-006] JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML request parsing error (REINDEX-007).
    #[error("[REINDEX-007] YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// Cluster status response could not be turned into shard leaders (REINDEX-008).
    #[error("[REINDEX-008] Cluster topology error: {0}")]
    Topology(String),

    /// The request names shards the source collection does not have (REINDEX-009).
    #[error(
        "[REINDEX-009] Requested source shards were not found in source collection '{collection}': {shards:?}"
    )]
    UnknownShards {
        /// Source collection name.
        collection: String,
        /// Shard names that were not discovered.
        shards: Vec<String>,
    },

    /// Export handler failure (REINDEX-010).
    #[error("[REINDEX-010] Export stream error: {0}")]
    Export(String),

    /// Target update response reported a failing status (REINDEX-011).
    #[error("[REINDEX-011] Solr update request failed with status {status}")]
    UpdateRejected {
        /// Status from `responseHeader.status`.
        status: i64,
    },

    /// A Solr response did not have the expected shape (REINDEX-012).
    #[error("[REINDEX-012] Malformed Solr response: {0}")]
    MalformedResponse(String),

    /// A Solr response was missing entirely (REINDEX-013).
    #[error("[REINDEX-013] Empty Solr response: {0}")]
    EmptyResponse(String),

    /// The whole run exceeded the caller's deadline (REINDEX-014).
    #[error("[REINDEX-014] Reindex did not finish within {0:?}")]
    DeadlineExceeded(Duration),

    /// A failure tagged with the stage and collection it came from (REINDEX-015).
    #[error("[REINDEX-015] Reindex stage failure at {stage} for collection '{collection}': {source}")]
    Stage {
        /// Stage that failed.
        stage: Stage,
        /// Collection involved.
        collection: String,
        /// Underlying failure.
        #[source]
        source: Box<Error>,
    },
}

impl Error {
    /// Returns the error code (e.g., "REINDEX-001").
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "REINDEX-001",
            Self::Config(_) => "REINDEX-002",
            Self::Http(_) => "REINDEX-003",
            Self::Remote { .. } => "REINDEX-004",
            Self::Io(_) => "REINDEX-005",
            Self::Json(_) => "REINDEX-006",
            Self::Yaml(_) => "REINDEX-007",
            Self::Topology(_) => "REINDEX-008",
            Self::UnknownShards { .. } => "REINDEX-009",
            Self::Export(_) => "REINDEX-010",
            Self::UpdateRejected { .. } => "REINDEX-011",
            Self::MalformedResponse(_) => "REINDEX-012",
            Self::EmptyResponse(_) => "REINDEX-013",
            Self::DeadlineExceeded(_) => "REINDEX-014",
            Self::Stage { .. } => "REINDEX-015",
        }
    }

    /// Tags this error with the stage and collection it came from.
    ///
    /// An error that already carries a stage is returned unchanged, so the
    /// innermost (most precise) stage wins.
    #[must_use]
    pub fn in_stage(self, stage: Stage, collection: impl Into<String>) -> Self {
        match self {
            staged @ Self::Stage { .. } => staged,
            other => Self::Stage {
                stage,
                collection: collection.into(),
                source: Box::new(other),
            },
        }
    }

    /// Returns the stage this error is tagged with, if any.
    #[must_use]
    pub fn stage(&self) -> Option<Stage> {
        match self {
            Self::Stage { stage, .. } => Some(*stage),
            _ => None,
        }
    }

    /// Strips stage tags and returns the underlying failure.
    #[must_use]
    pub fn root_cause(&self) -> &Self {
        let mut current = self;
        while let Self::Stage { source, .. } = current {
            current = source;
        }
        current
    }

    /// Returns `true` if the error was raised before any network call.
    #[must_use]
    pub fn is_validation(&self) -> bool {
        matches!(self.root_cause(), Self::Validation(_))
    }
}

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;
