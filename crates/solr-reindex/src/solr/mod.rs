//! Solr-facing building blocks: HTTP client, topology discovery, schema
//! introspection, shard readers and the target writer.

pub mod client;
pub mod discovery;
pub mod export;
pub mod reader;
pub mod schema;
pub mod writer;

pub use client::SolrClient;
pub use discovery::{ShardLeaderDiscovery, ShardLeaderReplica};
pub use reader::{DocumentStream, ReadStrategy, SolrSourceReader, SourceDocuments, SourceReader};
pub use schema::{decide_export, ExportDecision, SchemaMetadata, SchemaMetadataProvider};
pub use writer::{DocumentWriter, SolrTargetWriter};

use serde_json::{Map, Value};

/// A Solr document: field name to JSON value.
pub type Document = Map<String, Value>;

/// Internal optimistic-concurrency field that must not be copied across.
pub const VERSION_FIELD: &str = "_version_";

/// Removes fields the target must assign itself.
pub(crate) fn strip_internal_fields(mut doc: Document) -> Document {
    doc.remove(VERSION_FIELD);
    doc
}
