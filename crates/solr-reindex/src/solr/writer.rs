//! Batch writes to the target collection's update handler.

use async_trait::async_trait;
use serde_json::Value;

use super::client::{check_status, SolrClient};
use super::Document;
use crate::config::ReindexRequest;
use crate::error::{Error, Result};

/// Sink for document batches.
///
/// A call either indexes the whole batch or fails; retries are the
/// caller's concern.
#[async_trait]
pub trait DocumentWriter: Send + Sync {
    /// Writes one batch to the request's target collection.
    async fn write_batch(&self, request: &ReindexRequest, batch: &[Document]) -> Result<()>;
}

/// Writes batches as a JSON array to `/{collection}/update`.
#[derive(Debug, Clone)]
pub struct SolrTargetWriter {
    client: SolrClient,
}

impl SolrTargetWriter {
    /// Creates a writer bound to the target cluster client.
    #[must_use]
    pub const fn new(client: SolrClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl DocumentWriter for SolrTargetWriter {
    async fn write_batch(&self, request: &ReindexRequest, batch: &[Document]) -> Result<()> {
        if batch.is_empty() {
            return Ok(());
        }

        let url = self
            .client
            .url(&format!("{}/update", request.target.collection()));
        let response = self
            .client
            .post(&url)
            .query(&[("wt", "json")])
            .json(batch)
            .send()
            .await?;
        let body = check_status(response).await?.text().await?;

        if body.trim().is_empty() {
            return Err(Error::EmptyResponse(format!(
                "update request to '{}' returned no body",
                request.target.collection()
            )));
        }
        validate_update_response(&serde_json::from_str(&body)?)
    }
}

/// Checks `responseHeader.status` of an update response.
///
/// A JSON `null` counts as a missing response; a status of 400 or more is
/// a rejection.
pub fn validate_update_response(response: &Value) -> Result<()> {
    if response.is_null() {
        return Err(Error::EmptyResponse("update response was null".to_string()));
    }
    let status = response
        .get("responseHeader")
        .and_then(|header| header.get("status"))
        .and_then(Value::as_i64);
    match status {
        Some(status) if status >= 400 => Err(Error::UpdateRejected { status }),
        _ => Ok(()),
    }
}
