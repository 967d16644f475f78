use thiserror::Error;

pub type Result<T> = std::result::Result<T, BridgeError>;

/// Every failure the bridge can surface. Nothing in the library retries or
/// swallows one of these; they propagate to whoever started the chain.
#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("transport error calling {endpoint}: {source}")]
    Transport {
        endpoint: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("{endpoint} returned status {status}: {body}")]
    Status {
        endpoint: String,
        status: u16,
        body: String,
    },

    #[error("malformed spec: {0}")]
    MalformedSpec(String),

    #[error("unknown encoding channel '{0}'")]
    UnknownChannel(String),

    #[error("unsupported aggregate '{0}'")]
    UnsupportedAggregate(String),

    #[error("cannot create table '{0}' without a representative row")]
    EmptyDataset(String),

    /// A chunk send failed. Rows before `offset` are already in the remote
    /// table and are not rolled back.
    #[error("ingesting '{table}' failed at row offset {offset}: {source}")]
    Ingest {
        table: String,
        offset: usize,
        #[source]
        source: Box<BridgeError>,
    },

    #[error("schema error: {0}")]
    Schema(String),

    #[error("failed to load rows: {0}")]
    Source(String),

    #[error("unknown table '{0}'")]
    UnknownTable(String),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Csv(#[from] csv::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl BridgeError {
    pub(crate) fn transport(endpoint: &str, source: reqwest::Error) -> Self {
        BridgeError::Transport {
            endpoint: endpoint.to_string(),
            source,
        }
    }

    /// True for failures raised before any network call was attempted.
    pub fn is_input_error(&self) -> bool {
        matches!(
            self,
            BridgeError::MalformedSpec(_)
                | BridgeError::UnknownChannel(_)
                | BridgeError::UnsupportedAggregate(_)
                | BridgeError::EmptyDataset(_)
        )
    }
}
