// Library exports for vizbridge

pub mod backend;
pub mod config;
pub mod error;
pub mod history;
pub mod ingest;
pub mod local;
pub mod orchestrator;
pub mod parser;
pub mod remote;
pub mod schema;
pub mod source;
pub mod spec;
pub mod telemetry;
pub mod translate;

pub use backend::{backend_from_config, BackendMode, ExecutionBackend};
pub use config::BridgeConfig;
pub use error::{BridgeError, Result};
pub use orchestrator::{ApplyOutcome, Dataset, LoadState, QueryOrchestrator, ViewSnapshot};
pub use schema::Schema;
pub use spec::{Channel, DataRef, Encoding, ExpandedType, FieldDef, VisualizationSpec};
pub use translate::{translate, DeaggregatedSpec, TranslatedQuery, Translation};

/// One record of a dataset or query result.
pub type Row = serde_json::Map<String, serde_json::Value>;
