//! Shard leader discovery through the Collections API `CLUSTERSTATUS` action.
//!
//! Reads always go to the leader replica of each logical shard, queried
//! directly on its core with `distrib=false`.

use serde_json::{Map, Value};
use tracing::{debug, info};

use super::client::SolrClient;
use crate::config::{normalize_names, CollectionRef};
use crate::error::{Error, Result, Stage};
use crate::retry::{with_retry, RetryPolicy};

const CORE_NAME_KEYS: [&str; 3] = ["core", "core_name", "coreName"];

/// The active leader replica of one logical shard.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShardLeaderReplica {
    /// Logical shard name (e.g. `shard1`).
    pub logical_shard: String,
    /// Node base URL without a trailing slash.
    pub base_url: String,
    /// Physical core name on that node.
    pub core_name: String,
}

impl ShardLeaderReplica {
    /// Returns `{base_url}/{core_name}`.
    #[must_use]
    pub fn core_url(&self) -> String {
        format!("{}/{}", self.base_url, self.core_name)
    }
}

/// Looks up shard leaders of a source collection.
#[derive(Debug, Clone)]
pub struct ShardLeaderDiscovery {
    client: SolrClient,
}

impl ShardLeaderDiscovery {
    /// Creates a discovery bound to the source cluster client.
    #[must_use]
    pub const fn new(client: SolrClient) -> Self {
        Self { client }
    }

    /// Returns one active leader per shard, sorted by shard name.
    ///
    /// The status call is retried under `policy`; topology problems (a shard
    /// without an active leader, unknown requested shards) are not.
    pub async fn discover_leaders(
        &self,
        source: &CollectionRef,
        requested_shards: &[String],
        policy: &RetryPolicy,
    ) -> Result<Vec<ShardLeaderReplica>> {
        let collection = source.collection();
        let url = &self.client.url("admin/collections");
        let params = &[
            ("action", "CLUSTERSTATUS".to_string()),
            ("collection", collection.to_string()),
        ];

        let leaders = with_retry(policy, "cluster status", || async move {
            let status = self.client.get_json(url, params).await?;
            extract_shard_leaders(&status, collection, requested_shards)
        })
        .await
        .map_err(|e| e.in_stage(Stage::Discovery, collection))?;

        info!(
            "Discovered {} shard leader(s) for collection '{}'",
            leaders.len(),
            collection
        );
        for leader in &leaders {
            debug!("{} -> {}", leader.logical_shard, leader.core_url());
        }
        Ok(leaders)
    }
}

/// Extracts active shard leaders from a `CLUSTERSTATUS` response.
///
/// Walks `cluster.collections.<collection>.shards`, picks the replica with
/// `leader` true (boolean or the string `"true"`) and state `active`, and
/// keeps only `requested_shards` when that list is non-empty.
pub fn extract_shard_leaders(
    status: &Value,
    collection: &str,
    requested_shards: &[String],
) -> Result<Vec<ShardLeaderReplica>> {
    let cluster = required_object(status, "cluster")?;
    let collections = required_object_in(cluster, "collections")?;
    let collection_state = required_object_in(collections, collection)?;
    let shards = required_object_in(collection_state, "shards")?;

    let requested = normalize_names(requested_shards.iter().cloned());
    if !requested.is_empty() {
        let missing: Vec<String> = requested
            .iter()
            .filter(|name| !shards.contains_key(name.as_str()))
            .cloned()
            .collect();
        if !missing.is_empty() {
            return Err(Error::UnknownShards {
                collection: collection.to_string(),
                shards: missing,
            });
        }
    }

    let mut leaders = Vec::with_capacity(shards.len());
    for (shard_name, shard_state) in shards {
        if !requested.is_empty() && !requested.contains(shard_name) {
            continue;
        }
        let shard_state = as_object(shard_state, shard_name)?;
        leaders.push(active_leader(shard_name, shard_state)?);
    }

    if leaders.is_empty() {
        return Err(Error::Topology(format!(
            "No active shard leaders were discovered for collection '{}'",
            collection
        )));
    }
    leaders.sort_by(|a, b| a.logical_shard.cmp(&b.logical_shard));
    Ok(leaders)
}

fn active_leader(shard_name: &str, shard_state: &Map<String, Value>) -> Result<ShardLeaderReplica> {
    let leader = shard_state
        .get("replicas")
        .and_then(Value::as_object)
        .and_then(|replicas| {
            replicas
                .values()
                .filter_map(Value::as_object)
                .find(|replica| is_leader(replica) && is_active(replica))
        })
        .ok_or_else(|| {
            Error::Topology(format!(
                "No ACTIVE leader replica found for shard '{}'",
                shard_name
            ))
        })?;

    let base_url = optional_string(leader, "base_url").ok_or_else(|| {
        Error::Topology(format!(
            "Leader replica for shard '{}' is missing base_url",
            shard_name
        ))
    })?;
    let core_name = CORE_NAME_KEYS
        .iter()
        .find_map(|key| optional_string(leader, key))
        .ok_or_else(|| {
            Error::Topology(format!(
                "Leader replica for shard '{}' is missing a core name",
                shard_name
            ))
        })?;

    Ok(ShardLeaderReplica {
        logical_shard: shard_name.to_string(),
        base_url: base_url.trim_end_matches('/').to_string(),
        core_name,
    })
}

fn is_leader(replica: &Map<String, Value>) -> bool {
    match replica.get("leader") {
        Some(Value::Bool(flag)) => *flag,
        Some(Value::String(flag)) => flag.trim().eq_ignore_ascii_case("true"),
        _ => false,
    }
}

fn is_active(replica: &Map<String, Value>) -> bool {
    replica
        .get("state")
        .and_then(Value::as_str)
        .is_some_and(|state| state.trim().eq_ignore_ascii_case("active"))
}

fn optional_string(object: &Map<String, Value>, key: &str) -> Option<String> {
    let value = match object.get(key)? {
        Value::Null => return None,
        Value::String(s) => s.trim().to_string(),
        other => other.to_string(),
    };
    (!value.is_empty()).then_some(value)
}

fn required_object<'a>(value: &'a Value, key: &str) -> Result<&'a Map<String, Value>> {
    match value {
        Value::Object(map) => required_object_in(map, key),
        _ => Err(Error::Topology(
            "Cluster status response was not a JSON object".to_string(),
        )),
    }
}

fn required_object_in<'a>(
    map: &'a Map<String, Value>,
    key: &str,
) -> Result<&'a Map<String, Value>> {
    let value = map.get(key).ok_or_else(|| {
        Error::Topology(format!(
            "Required object '{}' was missing from cluster status response",
            key
        ))
    })?;
    as_object(value, key)
}

fn as_object<'a>(value: &'a Value, key: &str) -> Result<&'a Map<String, Value>> {
    value.as_object().ok_or_else(|| {
        Error::Topology(format!(
            "Object '{}' in cluster status response must be map-like",
            key
        ))
    })
}

#[cfg(test)]
#[path = "discovery_tests.rs"]
mod tests;
