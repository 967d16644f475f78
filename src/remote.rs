//! HTTP client for the remote tabular store.
//!
//! Every endpoint takes a JSON POST body at `<base_url>/<endpoint>`. A
//! non-2xx reply becomes [`BridgeError::Status`] with the response body; a
//! connection failure or client timeout becomes [`BridgeError::Transport`].
//! Nothing here retries.

use crate::backend::{BackendMode, ExecutionBackend, ProgressFn};
use crate::config::BridgeConfig;
use crate::error::{BridgeError, Result};
use crate::ingest::{ChunkedIngestor, IngestReport, TableSink};
use crate::schema::Schema;
use crate::translate::TranslatedQuery;
use crate::Row;
use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, info};

pub const CHECK_EXISTS: &str = "checkExistsSql";
pub const CREATE: &str = "createSql";
pub const INSERT: &str = "insertSql";
pub const BUILD: &str = "build";
pub const QUERY: &str = "querySql";
pub const RECOMMEND: &str = "recommend";

#[derive(Debug, Clone)]
pub struct RemoteClient {
    http: Client,
    base_url: String,
}

#[derive(Deserialize)]
struct ExistsResponse {
    exists: bool,
}

#[derive(Deserialize)]
struct QueryResponse {
    rows: Vec<Row>,
}

#[derive(Serialize)]
struct TablePayload<'a, T> {
    data: T,
    name: &'a str,
}

impl RemoteClient {
    pub fn new(base_url: impl Into<String>, timeout: Option<Duration>) -> Result<Self> {
        let mut builder = Client::builder();
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }
        let http = builder
            .build()
            .map_err(|e| BridgeError::transport("client", e))?;
        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub async fn check_exists(&self, name: &str) -> Result<bool> {
        let reply: ExistsResponse = self.post_json(CHECK_EXISTS, &json!({ "name": name })).await?;
        debug!(table = name, exists = reply.exists, "existence checked");
        Ok(reply.exists)
    }

    /// Ask the store to compute the schema of `name`.
    pub async fn build_schema(&self, name: &str) -> Result<Schema> {
        let reply: Value = self.post_json(BUILD, &json!({ "name": name })).await?;
        Schema::from_remote(reply)
    }

    pub async fn query(&self, sql: &str) -> Result<Vec<Row>> {
        let reply: QueryResponse = self
            .post_json(QUERY, &json!({ "data": { "query": sql } }))
            .await?;
        Ok(reply.rows)
    }

    /// Pass-through to the store's recommendation endpoint. The reply is
    /// returned as-is.
    pub async fn recommend(&self, query: &Value, schema: &Schema, data: &Value) -> Result<Value> {
        self.post_json(
            RECOMMEND,
            &json!({ "query": query, "schema": schema, "data": data }),
        )
        .await
    }

    async fn post_json<B, R>(&self, endpoint: &str, body: &B) -> Result<R>
    where
        B: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let bytes = self.post(endpoint, body).await?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    async fn post<B: Serialize + ?Sized>(&self, endpoint: &str, body: &B) -> Result<Vec<u8>> {
        let url = format!("{}/{}", self.base_url, endpoint);
        let response = self
            .http
            .post(&url)
            .json(body)
            .send()
            .await
            .map_err(|e| BridgeError::transport(endpoint, e))?;

        let status = response.status();
        let bytes = response
            .bytes()
            .await
            .map_err(|e| BridgeError::transport(endpoint, e))?;
        if !status.is_success() {
            return Err(BridgeError::Status {
                endpoint: endpoint.to_string(),
                status: status.as_u16(),
                body: String::from_utf8_lossy(&bytes).into_owned(),
            });
        }
        Ok(bytes.to_vec())
    }
}

#[async_trait]
impl TableSink for RemoteClient {
    async fn create_table(&self, table: &str, sample: &Row) -> Result<()> {
        self.post(CREATE, &TablePayload { data: sample, name: table }).await?;
        Ok(())
    }

    async fn insert_rows(&self, table: &str, rows: &[Row]) -> Result<()> {
        self.post(INSERT, &TablePayload { data: rows, name: table }).await?;
        Ok(())
    }
}

pub struct RemoteBackend {
    client: RemoteClient,
    ingestor: ChunkedIngestor,
}

impl RemoteBackend {
    pub fn new(client: RemoteClient, ingestor: ChunkedIngestor) -> Self {
        Self { client, ingestor }
    }

    pub fn from_config(url: &str, config: &BridgeConfig) -> Result<Self> {
        let client = RemoteClient::new(url, config.request_timeout())?;
        Ok(Self::new(client, ChunkedIngestor::new(config.chunk_bytes)))
    }

    pub fn client(&self) -> &RemoteClient {
        &self.client
    }
}

#[async_trait]
impl ExecutionBackend for RemoteBackend {
    fn mode(&self) -> BackendMode {
        BackendMode::Remote
    }

    async fn check_exists(&self, table: &str) -> Result<bool> {
        self.client.check_exists(table).await
    }

    async fn ingest(&self, table: &str, rows: &[Row], progress: ProgressFn<'_>) -> Result<IngestReport> {
        self.ingestor
            .ingest_with_progress(&self.client, table, rows, |p| progress(p))
            .await
    }

    async fn build_schema(&self, table: &str, _rows: &[Row]) -> Result<Schema> {
        self.client.build_schema(table).await
    }

    async fn run_query(&self, query: &TranslatedQuery) -> Result<Vec<Row>> {
        info!(sql = %query.sql, "running remote query");
        self.client.query(&query.sql).await
    }
}
