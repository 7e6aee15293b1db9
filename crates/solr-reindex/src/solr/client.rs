//! HTTP client bound to one SolrCloud cluster.

use reqwest::{Client, RequestBuilder, Response};
use serde_json::Value;
use std::time::Duration;

use crate::config::{BasicAuth, ClusterConfig};
use crate::error::{Error, Result};

/// Upper bound on the connect phase, independent of the request timeout.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Reusable client for one cluster: connection pool, base URL and
/// credentials. Cloning shares the pool; dropping the last clone closes it.
#[derive(Debug, Clone)]
pub struct SolrClient {
    http: Client,
    base_url: String,
    request_timeout: Duration,
    auth: Option<BasicAuth>,
}

impl SolrClient {
    /// Creates a client for the given cluster.
    pub fn new(cluster: &ClusterConfig) -> Result<Self> {
        let http = Client::builder()
            .connect_timeout(CONNECT_TIMEOUT.min(cluster.request_timeout()))
            .pool_idle_timeout(Duration::from_secs(90))
            .build()?;

        Ok(Self {
            http,
            base_url: cluster.base_url().to_string(),
            request_timeout: cluster.request_timeout(),
            auth: cluster.basic_auth().cloned(),
        })
    }

    /// Cluster base URL without a trailing slash.
    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Builds `{base_url}/{path}`.
    #[must_use]
    pub fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    /// Starts a GET with credentials and the request timeout applied.
    pub fn get(&self, url: &str) -> RequestBuilder {
        self.authorize(self.http.get(url).timeout(self.request_timeout))
    }

    /// Starts a GET for a long-lived streaming body; only the connect phase
    /// is bounded here, callers bound the gaps between chunks.
    pub fn get_streaming(&self, url: &str) -> RequestBuilder {
        self.authorize(self.http.get(url))
    }

    /// Starts a POST with credentials and the request timeout applied.
    pub fn post(&self, url: &str) -> RequestBuilder {
        self.authorize(self.http.post(url).timeout(self.request_timeout))
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.auth {
            Some(auth) => request.basic_auth(&auth.user, Some(&auth.password)),
            None => request,
        }
    }

    /// Sends a GET with `wt=json` and decodes the JSON body.
    pub async fn get_json(&self, url: &str, params: &[(&str, String)]) -> Result<Value> {
        let response = self
            .get(url)
            .query(params)
            .query(&[("wt", "json")])
            .send()
            .await?;
        let response = check_status(response).await?;
        Ok(response.json::<Value>().await?)
    }
}

/// Maps a non-success status to [`Error::Remote`], keeping the body as the
/// message.
pub async fn check_status(response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    let message = if body.trim().is_empty() {
        status.canonical_reason().unwrap_or("unknown status").to_string()
    } else {
        body
    };
    Err(Error::Remote {
        status: status.as_u16(),
        message,
    })
}
