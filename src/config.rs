use crate::backend::BackendMode;
use crate::ingest::DEFAULT_CHUNK_BYTES;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BridgeConfig {
    /// Base URL of the remote store. Absent (or empty) selects local mode.
    #[serde(default)]
    pub server_url: Option<String>,
    #[serde(default = "default_chunk_bytes")]
    pub chunk_bytes: usize,
    /// HTTP client timeout. A timeout fails the call; it is never retried.
    #[serde(default)]
    pub request_timeout_secs: Option<u64>,
    #[serde(default = "default_history_limit")]
    pub history_limit: usize,
}

fn default_chunk_bytes() -> usize { DEFAULT_CHUNK_BYTES }
fn default_history_limit() -> usize { 20 }

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            server_url: None,
            chunk_bytes: DEFAULT_CHUNK_BYTES,
            request_timeout_secs: None,
            history_limit: 20,
        }
    }
}

impl BridgeConfig {
    /// Read `VIZBRIDGE_SERVER_URL`, `VIZBRIDGE_CHUNK_BYTES`, ...
    pub fn from_env() -> Result<Self> {
        envy::prefixed("VIZBRIDGE_")
            .from_env()
            .context("failed to parse VIZBRIDGE_* environment variables")
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        serde_json::from_str(&text)
            .with_context(|| format!("invalid config file {}", path.display()))
    }

    pub fn with_server_url(mut self, url: impl Into<String>) -> Self {
        self.server_url = Some(url.into());
        self
    }

    pub fn server_url(&self) -> Option<&str> {
        self.server_url
            .as_deref()
            .map(str::trim)
            .filter(|url| !url.is_empty())
    }

    pub fn mode(&self) -> BackendMode {
        if self.server_url().is_some() {
            BackendMode::Remote
        } else {
            BackendMode::Local
        }
    }

    pub fn request_timeout(&self) -> Option<Duration> {
        self.request_timeout_secs.map(Duration::from_secs)
    }
}
