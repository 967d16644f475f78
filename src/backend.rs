// Execution backends: where tables live and where queries run.

use crate::config::BridgeConfig;
use crate::error::Result;
use crate::ingest::{IngestProgress, IngestReport};
use crate::local::LocalBackend;
use crate::remote::RemoteBackend;
use crate::schema::Schema;
use crate::translate::TranslatedQuery;
use crate::Row;
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendMode {
    Remote,
    Local,
}

impl fmt::Display for BackendMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendMode::Remote => write!(f, "remote"),
            BackendMode::Local => write!(f, "local"),
        }
    }
}

/// Receives ingestion progress while a backend stores rows.
pub type ProgressFn<'a> = &'a mut (dyn FnMut(IngestProgress) + Send);

#[async_trait]
pub trait ExecutionBackend: Send + Sync {
    fn mode(&self) -> BackendMode;

    async fn check_exists(&self, table: &str) -> Result<bool>;

    /// Store `rows` as `table`. Callers check existence first.
    async fn ingest(&self, table: &str, rows: &[Row], progress: ProgressFn<'_>) -> Result<IngestReport>;

    /// Schema of `table`. `rows` are the rows just ingested, or empty when
    /// the table already existed.
    async fn build_schema(&self, table: &str, rows: &[Row]) -> Result<Schema>;

    async fn run_query(&self, query: &TranslatedQuery) -> Result<Vec<Row>>;
}

/// Choose the backend once. A remote failure never falls back to local
/// execution.
pub fn backend_from_config(config: &BridgeConfig) -> Result<Arc<dyn ExecutionBackend>> {
    let backend: Arc<dyn ExecutionBackend> = match config.server_url() {
        Some(url) => Arc::new(RemoteBackend::from_config(url, config)?),
        None => Arc::new(LocalBackend::new()),
    };
    info!(mode = %backend.mode(), "execution backend selected");
    Ok(backend)
}
