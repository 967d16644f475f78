//! Dataset loading and spec application.
//!
//! Load progress is published on a `watch` channel. The renderer-facing view
//! lives in an `ArcSwap`: readers always see one complete snapshot, and a
//! query result is only published if no newer spec was applied while it was
//! in flight.

use crate::backend::{backend_from_config, BackendMode, ExecutionBackend};
use crate::config::BridgeConfig;
use crate::error::{BridgeError, Result};
use crate::history::History;
use crate::ingest::IngestProgress;
use crate::schema::Schema;
use crate::source::{load_rows, records_from_json};
use crate::spec::{DataRef, ExpandedType, VisualizationSpec};
use crate::translate::{translate, DeaggregatedSpec, Translation};
use crate::Row;
use arc_swap::{ArcSwap, ArcSwapOption};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadState {
    Idle,
    Requested,
    ExistenceChecked { exists: bool },
    SchemaFetch,
    Creating,
    Inserting { sent: usize, total: usize },
    SchemaReady,
    Received,
    Failed(String),
}

impl From<IngestProgress> for LoadState {
    fn from(progress: IngestProgress) -> Self {
        match progress {
            IngestProgress::Creating => LoadState::Creating,
            IngestProgress::Inserting { sent, total } => LoadState::Inserting { sent, total },
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Dataset {
    pub name: String,
    /// Empty once the rows are persisted in the backend.
    pub rows: Vec<Row>,
    pub schema: Option<Schema>,
}

/// What the renderer binds to. Never mutated after publication.
#[derive(Debug, Clone, PartialEq)]
pub struct ViewSnapshot {
    pub version: u64,
    pub spec: Option<DeaggregatedSpec>,
    pub rows: Arc<[Row]>,
}

impl ViewSnapshot {
    fn empty(version: u64, spec: Option<DeaggregatedSpec>) -> Self {
        Self {
            version,
            spec,
            rows: Arc::from(Vec::new()),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ApplyOutcome {
    Published(Arc<ViewSnapshot>),
    /// A newer spec was applied while this query ran; its rows were dropped.
    Superseded { ticket: u64 },
}

pub struct QueryOrchestrator {
    backend: Arc<dyn ExecutionBackend>,
    http: reqwest::Client,
    state: watch::Sender<LoadState>,
    view: ArcSwap<ViewSnapshot>,
    schema: ArcSwapOption<Schema>,
    history: Mutex<History<VisualizationSpec>>,
    latest_ticket: AtomicU64,
}

impl QueryOrchestrator {
    pub fn new(backend: Arc<dyn ExecutionBackend>, history_limit: usize) -> Self {
        Self::with_http(backend, reqwest::Client::new(), history_limit)
    }

    pub fn with_http(backend: Arc<dyn ExecutionBackend>, http: reqwest::Client, history_limit: usize) -> Self {
        let (state, _) = watch::channel(LoadState::Idle);
        Self {
            backend,
            http,
            state,
            view: ArcSwap::from_pointee(ViewSnapshot::empty(0, None)),
            schema: ArcSwapOption::empty(),
            history: Mutex::new(History::new(history_limit)),
            latest_ticket: AtomicU64::new(0),
        }
    }

    pub fn from_config(config: &BridgeConfig) -> Result<Self> {
        let mut builder = reqwest::Client::builder();
        if let Some(timeout) = config.request_timeout() {
            builder = builder.timeout(timeout);
        }
        let http = builder
            .build()
            .map_err(|e| BridgeError::transport("client", e))?;
        Ok(Self::with_http(backend_from_config(config)?, http, config.history_limit))
    }

    pub fn mode(&self) -> BackendMode {
        self.backend.mode()
    }

    pub fn subscribe(&self) -> watch::Receiver<LoadState> {
        self.state.subscribe()
    }

    pub fn state(&self) -> LoadState {
        self.state.borrow().clone()
    }

    pub fn view(&self) -> Arc<ViewSnapshot> {
        self.view.load_full()
    }

    pub fn schema(&self) -> Option<Arc<Schema>> {
        self.schema.load_full()
    }

    pub fn can_undo(&self) -> bool {
        self.history.lock().can_undo()
    }

    pub fn can_redo(&self) -> bool {
        self.history.lock().can_redo()
    }

    /// Make `data` available as table `name` and publish its schema. An
    /// existing table is reused as-is; otherwise the rows are obtained and
    /// ingested first.
    pub async fn load_dataset(&self, name: &str, data: &DataRef) -> Result<Dataset> {
        match self.load_inner(name, data).await {
            Ok(dataset) => Ok(dataset),
            Err(err) => {
                warn!(dataset = name, error = %err, "dataset load failed");
                self.transition(LoadState::Failed(err.to_string()));
                Err(err)
            }
        }
    }

    async fn load_inner(&self, name: &str, data: &DataRef) -> Result<Dataset> {
        self.transition(LoadState::Requested);
        // Invalidate any query still running against the previous dataset.
        let ticket = self.issue_ticket();
        self.view.store(Arc::new(ViewSnapshot::empty(ticket, None)));

        // Inline rows are validated before anything goes over the wire.
        let inline_rows = match data {
            DataRef::Inline { values, .. } => Some(records_from_json(values.clone())?),
            _ => None,
        };

        let exists = self.backend.check_exists(name).await?;
        self.transition(LoadState::ExistenceChecked { exists });

        let schema = if exists {
            self.transition(LoadState::SchemaFetch);
            self.backend.build_schema(name, &[]).await?
        } else {
            let rows = match (inline_rows, data) {
                (Some(rows), _) => rows,
                (None, DataRef::Url { url, .. }) => load_rows(&self.http, url).await?,
                (None, _) => return Err(BridgeError::UnknownTable(name.to_string())),
            };
            let state = &self.state;
            let mut progress = |p: IngestProgress| publish_state(state, p.into());
            let report = self.backend.ingest(name, &rows, &mut progress).await?;
            debug!(dataset = name, rows = report.rows, chunks = report.chunks, "dataset stored");
            self.backend.build_schema(name, &rows).await?
        };

        self.transition(LoadState::SchemaReady);
        self.schema.store(Some(Arc::new(schema.clone())));
        self.history.lock().clear();
        self.transition(LoadState::Received);

        Ok(Dataset {
            name: name.to_string(),
            rows: Vec::new(),
            schema: Some(schema),
        })
    }

    /// Record `spec` in the history and run it.
    pub async fn apply_spec(&self, spec: VisualizationSpec) -> Result<ApplyOutcome> {
        let translation = translate(&spec)?;
        self.history.lock().push(spec);
        self.run(translation).await
    }

    /// Re-run the previous spec. `None` when there is nothing to undo.
    pub async fn undo(&self) -> Result<Option<ApplyOutcome>> {
        let spec = self.history.lock().undo().cloned();
        match spec {
            Some(spec) => Ok(Some(self.run(translate(&spec)?).await?)),
            None => Ok(None),
        }
    }

    pub async fn redo(&self) -> Result<Option<ApplyOutcome>> {
        let spec = self.history.lock().redo().cloned();
        match spec {
            Some(spec) => Ok(Some(self.run(translate(&spec)?).await?)),
            None => Ok(None),
        }
    }

    pub fn set_field_type(&self, field: &str, field_type: ExpandedType) -> Result<()> {
        self.edit_schema(|schema| schema.set_field_type(field, field_type))
    }

    pub fn set_ordinal_domain(&self, field: &str, domain: Vec<String>) -> Result<()> {
        self.edit_schema(|schema| schema.set_ordinal_domain(field, domain))
    }

    async fn run(&self, translation: Translation) -> Result<ApplyOutcome> {
        let Translation { deagg_spec, query } = translation;
        let ticket = self.issue_ticket();

        // Rows from the previous spec never pair with the new one.
        self.publish_view(ticket, Arc::new(ViewSnapshot::empty(ticket, Some(deagg_spec.clone()))));

        debug!(ticket, sql = %query.sql, "running query");
        let rows = self.backend.run_query(&query).await?;
        let snapshot = Arc::new(ViewSnapshot {
            version: ticket,
            spec: Some(deagg_spec),
            rows: rows.into(),
        });

        if self.publish_view(ticket, Arc::clone(&snapshot)) {
            info!(ticket, rows = snapshot.rows.len(), "view updated");
            Ok(ApplyOutcome::Published(snapshot))
        } else {
            debug!(ticket, "discarding superseded result");
            Ok(ApplyOutcome::Superseded { ticket })
        }
    }

    fn issue_ticket(&self) -> u64 {
        self.latest_ticket.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Store `snapshot` unless a newer ticket has been issued.
    fn publish_view(&self, ticket: u64, snapshot: Arc<ViewSnapshot>) -> bool {
        let mut published = false;
        self.view.rcu(|current| {
            published = ticket == self.latest_ticket.load(Ordering::SeqCst) && ticket >= current.version;
            if published {
                Arc::clone(&snapshot)
            } else {
                Arc::clone(current)
            }
        });
        published
    }

    fn edit_schema(&self, edit: impl FnOnce(&mut Schema) -> Result<()>) -> Result<()> {
        let current = self
            .schema
            .load_full()
            .ok_or_else(|| BridgeError::Schema("no dataset loaded".to_string()))?;
        let mut next = (*current).clone();
        edit(&mut next)?;
        self.schema.store(Some(Arc::new(next)));
        Ok(())
    }

    fn transition(&self, next: LoadState) {
        publish_state(&self.state, next);
    }
}

fn publish_state(state: &watch::Sender<LoadState>, next: LoadState) {
    info!(state = ?next, "load state");
    state.send_replace(next);
}
