//! Process configuration for running `solr-reindex` as a batch job.
//!
//! Values are layered: built-in defaults < TOML file < `REINDEX_JOB_*`
//! environment variables. The reindex request itself comes either inline
//! (`request`) or from a YAML file (`request_file`).

use std::path::{Path, PathBuf};
use std::time::Duration;

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::config::ReindexRequest;
use crate::error::{Error, Result};

/// Default job config file name.
pub const DEFAULT_JOB_CONFIG: &str = "reindex-job.toml";

/// Where the request is read from when nothing else is configured.
pub const DEFAULT_REQUEST_FILE: &str = "/etc/reindex/request.yaml";

/// Overall deadline when none (or zero) is configured: 15 minutes.
pub const DEFAULT_TIMEOUT_SECS: u64 = 900;

const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// Job-level settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct JobConfig {
    /// YAML request file, used when `request` is not set.
    pub request_file: PathBuf,
    /// Inline YAML request; takes precedence over `request_file`.
    pub request: Option<String>,
    /// Deadline for the whole run in seconds; zero means the default.
    pub timeout_secs: u64,
    /// Default log level when `RUST_LOG` is not set.
    pub log_level: String,
}

impl Default for JobConfig {
    fn default() -> Self {
        Self {
            request_file: PathBuf::from(DEFAULT_REQUEST_FILE),
            request: None,
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            log_level: "info".to_string(),
        }
    }
}

impl JobConfig {
    /// Loads configuration from `reindex-job.toml` and the environment.
    ///
    /// # Errors
    ///
    /// Returns an error if configuration parsing fails.
    pub fn load() -> Result<Self> {
        Self::load_from_path(DEFAULT_JOB_CONFIG)
    }

    /// Loads configuration from a specific file path. A missing file is not
    /// an error; defaults and the environment still apply.
    ///
    /// # Errors
    ///
    /// Returns an error if configuration parsing fails.
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let figment = Figment::new()
            .merge(Serialized::defaults(Self::default()))
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed("REINDEX_JOB_"));

        figment
            .extract()
            .map_err(|e| Error::Config(e.to_string()))
    }

    /// Creates a configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns an error if parsing fails.
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        let figment = Figment::new()
            .merge(Serialized::defaults(Self::default()))
            .merge(Toml::string(toml_str));

        figment
            .extract()
            .map_err(|e| Error::Config(e.to_string()))
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if any configuration value is invalid.
    pub fn validate(&self) -> Result<()> {
        if !LOG_LEVELS.contains(&self.log_level.to_ascii_lowercase().as_str()) {
            return Err(Error::Config(format!(
                "log_level must be one of {:?}, got '{}'",
                LOG_LEVELS, self.log_level
            )));
        }
        let inline = self.request.as_deref().is_some_and(|r| !r.trim().is_empty());
        if !inline && self.request_file.as_os_str().is_empty() {
            return Err(Error::Config(
                "either request or request_file must be set".to_string(),
            ));
        }
        Ok(())
    }

    /// Deadline for the whole run.
    #[must_use]
    pub fn timeout(&self) -> Duration {
        match self.timeout_secs {
            0 => Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            secs => Duration::from_secs(secs),
        }
    }

    /// Reads the request: inline text when present, otherwise the file.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] when the file cannot be read and
    /// [`Error::Validation`] when the request is malformed.
    pub fn load_request(&self) -> Result<ReindexRequest> {
        match self.request.as_deref().filter(|r| !r.trim().is_empty()) {
            Some(inline) => ReindexRequest::from_yaml_str(inline),
            None => ReindexRequest::from_file(&self.request_file),
        }
    }
}
