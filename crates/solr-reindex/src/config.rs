//! Request model for a reindex run.
//!
//! A [`ReindexRequest`] names the source and target collections, the filters
//! selecting which documents move, the fields to copy and the tuning knobs.
//! Every part validates itself at construction, so a request that exists is
//! a request the pipeline can run. Requests are usually read from YAML:
//!
//! ```yaml
//! source:
//!   cluster:
//!     base_url: http://solr-a:8983/solr
//!   collection: products_v1
//! target:
//!   cluster:
//!     base_url: http://solr-b:8983/solr
//!     basic_auth_user: indexer
//!     basic_auth_password: secret
//!   collection: products_v2
//! filters:
//!   query: "category:books"
//!   fqs: ["in_stock:true"]
//!   source_shards: [shard1, shard2]
//! fields: [id, title, price]
//! tuning:
//!   write_batch_size: 500
//! ```

use std::fmt;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::retry::RetryPolicy;

/// Query used when the request does not provide one.
pub const DEFAULT_QUERY: &str = "*:*";

/// Default per-request HTTP timeout.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Field list value meaning "every stored field".
pub const ALL_FIELDS: &str = "*";

fn duration_millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

fn default_request_timeout_ms() -> u64 {
    duration_millis(DEFAULT_REQUEST_TIMEOUT)
}

/// Validates a URL scheme.
pub fn validate_url(url: &str) -> Result<()> {
    let has_valid_scheme = ["http://", "https://"].iter().any(|s| url.starts_with(s));
    if !has_valid_scheme {
        return Err(Error::Validation(format!(
            "Invalid URL scheme in '{}'. Allowed: http, https",
            url
        )));
    }
    if url.len() <= "http://".len() {
        return Err(Error::Validation(format!("Invalid URL format: {}", url)));
    }
    Ok(())
}

// =============================================================================
// Cluster
// =============================================================================

/// Basic-auth credentials.
#[derive(Clone, PartialEq, Eq)]
pub struct BasicAuth {
    /// User name.
    pub user: String,
    /// Password.
    pub password: String,
}

impl fmt::Debug for BasicAuth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BasicAuth")
            .field("user", &self.user)
            .field("password", &"***")
            .finish()
    }
}

/// Connection settings for one SolrCloud cluster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "ClusterSettings", into = "ClusterSettings")]
pub struct ClusterConfig {
    base_url: String,
    request_timeout: Duration,
    basic_auth: Option<BasicAuth>,
}

impl ClusterConfig {
    /// Creates a validated cluster config.
    ///
    /// The base URL is trimmed and loses any trailing `/`. Credentials must
    /// come as a pair: a user without a password (or the reverse) is
    /// rejected.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Validation`] for a blank or non-HTTP base URL, a zero
    /// timeout, or half-specified credentials.
    pub fn new(
        base_url: &str,
        request_timeout: Duration,
        basic_auth_user: Option<String>,
        basic_auth_password: Option<String>,
    ) -> Result<Self> {
        let base_url = base_url.trim().trim_end_matches('/');
        if base_url.is_empty() {
            return Err(Error::Validation("cluster base_url cannot be blank".to_string()));
        }
        validate_url(base_url)?;
        if request_timeout.is_zero() {
            return Err(Error::Validation(
                "cluster request_timeout must be positive".to_string(),
            ));
        }

        let user = basic_auth_user.filter(|u| !u.trim().is_empty());
        let password = basic_auth_password.filter(|p| !p.is_empty());
        let basic_auth = match (user, password) {
            (Some(user), Some(password)) => Some(BasicAuth {
                user: user.trim().to_string(),
                password,
            }),
            (None, None) => None,
            _ => {
                return Err(Error::Validation(
                    "basic auth user and password must both be set or both be absent"
                        .to_string(),
                ))
            }
        };

        Ok(Self {
            base_url: base_url.to_string(),
            request_timeout,
            basic_auth,
        })
    }

    /// Creates a config with the default timeout and no credentials.
    pub fn with_defaults(base_url: &str) -> Result<Self> {
        Self::new(base_url, DEFAULT_REQUEST_TIMEOUT, None, None)
    }

    /// Base URL without a trailing slash (e.g. `http://solr:8983/solr`).
    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Timeout applied to each HTTP request.
    #[must_use]
    pub const fn request_timeout(&self) -> Duration {
        self.request_timeout
    }

    /// Credentials, when configured.
    #[must_use]
    pub const fn basic_auth(&self) -> Option<&BasicAuth> {
        self.basic_auth.as_ref()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct ClusterSettings {
    base_url: String,
    #[serde(default = "default_request_timeout_ms")]
    request_timeout_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    basic_auth_user: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    basic_auth_password: Option<String>,
}

impl TryFrom<ClusterSettings> for ClusterConfig {
    type Error = Error;

    fn try_from(settings: ClusterSettings) -> Result<Self> {
        Self::new(
            &settings.base_url,
            Duration::from_millis(settings.request_timeout_ms),
            settings.basic_auth_user,
            settings.basic_auth_password,
        )
    }
}

impl From<ClusterConfig> for ClusterSettings {
    fn from(config: ClusterConfig) -> Self {
        let (basic_auth_user, basic_auth_password) = match config.basic_auth {
            Some(auth) => (Some(auth.user), Some(auth.password)),
            None => (None, None),
        };
        Self {
            base_url: config.base_url,
            request_timeout_ms: duration_millis(config.request_timeout),
            basic_auth_user,
            basic_auth_password,
        }
    }
}

// =============================================================================
// Collection
// =============================================================================

/// A collection on a cluster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "CollectionSettings", into = "CollectionSettings")]
pub struct CollectionRef {
    cluster: ClusterConfig,
    collection: String,
}

impl CollectionRef {
    /// Creates a collection reference; the name is trimmed and must not be blank.
    pub fn new(cluster: ClusterConfig, collection: &str) -> Result<Self> {
        let collection = collection.trim();
        if collection.is_empty() {
            return Err(Error::Validation("collection name cannot be blank".to_string()));
        }
        Ok(Self {
            cluster,
            collection: collection.to_string(),
        })
    }

    /// Cluster hosting the collection.
    #[must_use]
    pub const fn cluster(&self) -> &ClusterConfig {
        &self.cluster
    }

    /// Collection name.
    #[must_use]
    pub fn collection(&self) -> &str {
        &self.collection
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct CollectionSettings {
    cluster: ClusterConfig,
    collection: String,
}

impl TryFrom<CollectionSettings> for CollectionRef {
    type Error = Error;

    fn try_from(settings: CollectionSettings) -> Result<Self> {
        Self::new(settings.cluster, &settings.collection)
    }
}

impl From<CollectionRef> for CollectionSettings {
    fn from(collection: CollectionRef) -> Self {
        Self {
            cluster: collection.cluster,
            collection: collection.collection,
        }
    }
}

// =============================================================================
// Filters
// =============================================================================

/// Which documents to copy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "FilterSettings", into = "FilterSettings")]
pub struct ReindexFilters {
    query: String,
    fqs: Vec<String>,
    source_shards: Vec<String>,
}

impl Default for ReindexFilters {
    fn default() -> Self {
        Self {
            query: DEFAULT_QUERY.to_string(),
            fqs: Vec::new(),
            source_shards: Vec::new(),
        }
    }
}

impl ReindexFilters {
    /// Creates filters. A blank query becomes `*:*`, any other query is kept
    /// as given. Filter queries and shard names are trimmed, blanks dropped
    /// and shard names de-duplicated.
    #[must_use]
    pub fn new(
        query: Option<String>,
        fqs: impl IntoIterator<Item = String>,
        source_shards: impl IntoIterator<Item = String>,
    ) -> Self {
        let query = query
            .filter(|q| !q.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_QUERY.to_string());
        let fqs = fqs
            .into_iter()
            .map(|fq| fq.trim().to_string())
            .filter(|fq| !fq.is_empty())
            .collect();
        Self {
            query,
            fqs,
            source_shards: normalize_names(source_shards),
        }
    }

    /// Main query (`q`).
    #[must_use]
    pub fn query(&self) -> &str {
        &self.query
    }

    /// Filter queries (`fq`), sent in order.
    #[must_use]
    pub fn fqs(&self) -> &[String] {
        &self.fqs
    }

    /// Explicit source shards; empty means every shard.
    #[must_use]
    pub fn source_shards(&self) -> &[String] {
        &self.source_shards
    }
}

/// Trims, drops blanks and de-duplicates while keeping first-seen order.
pub(crate) fn normalize_names(names: impl IntoIterator<Item = String>) -> Vec<String> {
    let mut normalized: Vec<String> = Vec::new();
    for name in names {
        let name = name.trim();
        if !name.is_empty() && !normalized.iter().any(|n| n == name) {
            normalized.push(name.to_string());
        }
    }
    normalized
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct FilterSettings {
    #[serde(default)]
    query: Option<String>,
    #[serde(default)]
    fqs: Vec<String>,
    #[serde(default)]
    source_shards: Vec<String>,
}

impl From<FilterSettings> for ReindexFilters {
    fn from(settings: FilterSettings) -> Self {
        Self::new(settings.query, settings.fqs, settings.source_shards)
    }
}

impl From<ReindexFilters> for FilterSettings {
    fn from(filters: ReindexFilters) -> Self {
        Self {
            query: Some(filters.query),
            fqs: filters.fqs,
            source_shards: filters.source_shards,
        }
    }
}

// =============================================================================
// Field selection
// =============================================================================

/// Which fields to copy.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "FieldsSettings", into = "FieldsSettings")]
pub enum FieldSelection {
    /// Every stored field.
    #[default]
    All,
    /// An explicit, non-empty, de-duplicated list.
    Fields(Vec<String>),
}

impl FieldSelection {
    /// Builds an explicit selection.
    ///
    /// Names are trimmed, blanks dropped and duplicates removed. A list that
    /// is exactly `["*"]` selects every field.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Validation`] for an empty list or `*` mixed with names.
    pub fn fields(names: impl IntoIterator<Item = String>) -> Result<Self> {
        let names = normalize_names(names);
        if names.is_empty() {
            return Err(Error::Validation(
                "fields cannot be empty when all fields are not requested".to_string(),
            ));
        }
        if names.iter().any(|n| n == ALL_FIELDS) {
            if names.len() == 1 {
                return Ok(Self::All);
            }
            return Err(Error::Validation(
                "'*' cannot be combined with explicit field names".to_string(),
            ));
        }
        Ok(Self::Fields(names))
    }

    /// Returns `true` when every field is requested.
    #[must_use]
    pub const fn is_all(&self) -> bool {
        matches!(self, Self::All)
    }

    /// Explicit names; empty for [`FieldSelection::All`].
    #[must_use]
    pub fn names(&self) -> &[String] {
        match self {
            Self::All => &[],
            Self::Fields(names) => names,
        }
    }

    /// Renders the Solr `fl` parameter, appending `sort_field` when it is
    /// not already selected.
    #[must_use]
    pub fn field_list(&self, sort_field: &str) -> String {
        match self {
            Self::All => ALL_FIELDS.to_string(),
            Self::Fields(names) => {
                let mut fields: Vec<&str> = names.iter().map(String::as_str).collect();
                if !fields.contains(&sort_field) {
                    fields.push(sort_field);
                }
                fields.join(",")
            }
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
enum FieldsSettings {
    Wildcard(String),
    List(Vec<String>),
}

impl TryFrom<FieldsSettings> for FieldSelection {
    type Error = Error;

    fn try_from(settings: FieldsSettings) -> Result<Self> {
        match settings {
            FieldsSettings::Wildcard(value) if value.trim() == ALL_FIELDS => Ok(Self::All),
            FieldsSettings::Wildcard(value) => Err(Error::Validation(format!(
                "fields must be '*' or a list of field names, got '{value}'"
            ))),
            FieldsSettings::List(names) => Self::fields(names),
        }
    }
}

impl From<FieldSelection> for FieldsSettings {
    fn from(selection: FieldSelection) -> Self {
        match selection {
            FieldSelection::All => Self::Wildcard(ALL_FIELDS.to_string()),
            FieldSelection::Fields(names) => Self::List(names),
        }
    }
}

// =============================================================================
// Tuning
// =============================================================================

/// Throughput and resilience knobs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "TuningSettings", into = "TuningSettings")]
pub struct ReindexTuning {
    read_page_size: usize,
    write_batch_size: usize,
    read_concurrency: usize,
    write_concurrency: usize,
    max_in_flight_batches: usize,
    request_timeout: Duration,
    retry_policy: RetryPolicy,
}

impl Default for ReindexTuning {
    fn default() -> Self {
        let settings = TuningSettings::default();
        Self {
            read_page_size: settings.read_page_size,
            write_batch_size: settings.write_batch_size,
            read_concurrency: settings.read_concurrency,
            write_concurrency: settings.write_concurrency,
            max_in_flight_batches: settings.max_in_flight_batches,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            retry_policy: RetryPolicy::default(),
        }
    }
}

impl ReindexTuning {
    /// Rows per cursor page.
    #[must_use]
    pub const fn read_page_size(&self) -> usize {
        self.read_page_size
    }

    /// Documents per update request.
    #[must_use]
    pub const fn write_batch_size(&self) -> usize {
        self.write_batch_size
    }

    /// Read buffer multiplier: the merged shard stream holds up to
    /// `read_page_size * read_concurrency` documents.
    #[must_use]
    pub const fn read_concurrency(&self) -> usize {
        self.read_concurrency
    }

    /// Concurrent update requests.
    #[must_use]
    pub const fn write_concurrency(&self) -> usize {
        self.write_concurrency
    }

    /// Batches that may sit buffered ahead of the writers.
    #[must_use]
    pub const fn max_in_flight_batches(&self) -> usize {
        self.max_in_flight_batches
    }

    /// Longest an export stream may stall between chunks.
    #[must_use]
    pub const fn request_timeout(&self) -> Duration {
        self.request_timeout
    }

    /// Retry policy for every stage.
    #[must_use]
    pub const fn retry_policy(&self) -> &RetryPolicy {
        &self.retry_policy
    }

    /// Capacity of the merged read buffer.
    #[must_use]
    pub fn read_buffer_capacity(&self) -> usize {
        self.read_page_size.saturating_mul(self.read_concurrency).max(1)
    }
}

/// Raw tuning values; convert with [`ReindexTuning::try_from`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TuningSettings {
    /// Rows per cursor page.
    #[serde(default = "default_read_page_size")]
    pub read_page_size: usize,
    /// Documents per update request.
    #[serde(default = "default_write_batch_size")]
    pub write_batch_size: usize,
    /// Read buffer multiplier.
    #[serde(default = "default_read_concurrency")]
    pub read_concurrency: usize,
    /// Concurrent update requests.
    #[serde(default = "default_write_concurrency")]
    pub write_concurrency: usize,
    /// Buffered batches ahead of the writers.
    #[serde(default = "default_max_in_flight_batches")]
    pub max_in_flight_batches: usize,
    /// Export stall timeout in milliseconds.
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    /// Retry policy.
    #[serde(default)]
    pub retry_policy: RetryPolicy,
}

fn default_read_page_size() -> usize {
    500
}

fn default_write_batch_size() -> usize {
    200
}

fn default_read_concurrency() -> usize {
    1
}

fn default_write_concurrency() -> usize {
    4
}

fn default_max_in_flight_batches() -> usize {
    32
}

impl Default for TuningSettings {
    fn default() -> Self {
        Self {
            read_page_size: default_read_page_size(),
            write_batch_size: default_write_batch_size(),
            read_concurrency: default_read_concurrency(),
            write_concurrency: default_write_concurrency(),
            max_in_flight_batches: default_max_in_flight_batches(),
            request_timeout_ms: default_request_timeout_ms(),
            retry_policy: RetryPolicy::default(),
        }
    }
}

impl TryFrom<TuningSettings> for ReindexTuning {
    type Error = Error;

    fn try_from(settings: TuningSettings) -> Result<Self> {
        let positive = [
            ("read_page_size", settings.read_page_size),
            ("write_batch_size", settings.write_batch_size),
            ("read_concurrency", settings.read_concurrency),
            ("write_concurrency", settings.write_concurrency),
            ("max_in_flight_batches", settings.max_in_flight_batches),
        ];
        for (name, value) in positive {
            if value == 0 {
                return Err(Error::Validation(format!("tuning {name} must be positive")));
            }
        }
        if settings.request_timeout_ms == 0 {
            return Err(Error::Validation(
                "tuning request_timeout_ms must be positive".to_string(),
            ));
        }

        Ok(Self {
            read_page_size: settings.read_page_size,
            write_batch_size: settings.write_batch_size,
            read_concurrency: settings.read_concurrency,
            write_concurrency: settings.write_concurrency,
            max_in_flight_batches: settings.max_in_flight_batches,
            request_timeout: Duration::from_millis(settings.request_timeout_ms),
            retry_policy: settings.retry_policy,
        })
    }
}

impl From<ReindexTuning> for TuningSettings {
    fn from(tuning: ReindexTuning) -> Self {
        Self {
            read_page_size: tuning.read_page_size,
            write_batch_size: tuning.write_batch_size,
            read_concurrency: tuning.read_concurrency,
            write_concurrency: tuning.write_concurrency,
            max_in_flight_batches: tuning.max_in_flight_batches,
            request_timeout_ms: duration_millis(tuning.request_timeout),
            retry_policy: tuning.retry_policy,
        }
    }
}

// =============================================================================
// Request
// =============================================================================

/// Everything one reindex run needs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ReindexRequest {
    /// Collection documents are read from.
    pub source: CollectionRef,
    /// Collection documents are written to.
    pub target: CollectionRef,
    /// Query, filter queries and shard subset.
    #[serde(default)]
    pub filters: ReindexFilters,
    /// Fields to copy; omitted means every field.
    #[serde(default)]
    pub fields: FieldSelection,
    /// Batch sizes, concurrency and retries.
    #[serde(default)]
    pub tuning: ReindexTuning,
}

impl ReindexRequest {
    /// Creates a request with default filters, all fields and default tuning.
    #[must_use]
    pub fn new(source: CollectionRef, target: CollectionRef) -> Self {
        Self {
            source,
            target,
            filters: ReindexFilters::default(),
            fields: FieldSelection::All,
            tuning: ReindexTuning::default(),
        }
    }

    /// Replaces the filters.
    #[must_use]
    pub fn with_filters(mut self, filters: ReindexFilters) -> Self {
        self.filters = filters;
        self
    }

    /// Replaces the field selection.
    #[must_use]
    pub fn with_fields(mut self, fields: FieldSelection) -> Self {
        self.fields = fields;
        self
    }

    /// Replaces the tuning.
    #[must_use]
    pub fn with_tuning(mut self, tuning: ReindexTuning) -> Self {
        self.tuning = tuning;
        self
    }

    /// Parses a request from YAML text.
    ///
    /// Validation failures surfaced by serde are reported as
    /// [`Error::Validation`].
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        if yaml.trim().is_empty() {
            return Err(Error::Validation("request document is empty".to_string()));
        }
        serde_yaml::from_str(yaml).map_err(|e| Error::Validation(e.to_string()))
    }

    /// Loads a request from a YAML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&content)
    }

    /// Renders the request as YAML.
    pub fn to_yaml(&self) -> Result<String> {
        Ok(serde_yaml::to_string(self)?)
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
