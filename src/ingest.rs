//! Chunked upload of a row set into a remote table.
//!
//! The table is created from one representative row, then rows are sent in
//! chunks of roughly `chunk_bytes` serialized bytes, one chunk in flight at a
//! time and in offset order. The first failed chunk aborts the upload; rows
//! already sent stay in the table. Chunk sends carry no dedup token, so an
//! outer layer that retries a timed-out send may insert rows twice.

use crate::error::{BridgeError, Result};
use crate::Row;
use async_trait::async_trait;
use std::ops::Range;
use tracing::{debug, info};

/// 10 MiB.
pub const DEFAULT_CHUNK_BYTES: usize = 10 * 1024 * 1024;

/// Write side of a tabular store.
#[async_trait]
pub trait TableSink: Send + Sync {
    /// Create `table`, letting the store infer column types from `sample`.
    async fn create_table(&self, table: &str, sample: &Row) -> Result<()>;

    /// Append `rows` to `table`.
    async fn insert_rows(&self, table: &str, rows: &[Row]) -> Result<()>;
}

/// Row ranges an upload is split into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkPlan {
    len: usize,
    rows_per_chunk: usize,
}

impl ChunkPlan {
    /// Size chunks from the serialized length of the first row. Rows are not
    /// measured individually, so a chunk of heterogeneous rows can exceed the
    /// budget.
    pub fn for_rows(rows: &[Row], chunk_bytes: usize) -> Result<Self> {
        let row_bytes_sample = match rows.first() {
            Some(row) => serde_json::to_vec(row)?.len().max(1),
            None => 1,
        };
        Ok(Self::with_rows_per_chunk(rows.len(), chunk_bytes / row_bytes_sample))
    }

    /// A row larger than the whole budget still gets a chunk of its own.
    pub fn with_rows_per_chunk(len: usize, rows_per_chunk: usize) -> Self {
        Self {
            len,
            rows_per_chunk: rows_per_chunk.max(1),
        }
    }

    pub fn rows_per_chunk(&self) -> usize {
        self.rows_per_chunk
    }

    pub fn chunk_count(&self) -> usize {
        self.len.div_ceil(self.rows_per_chunk)
    }

    pub fn ranges(&self) -> impl Iterator<Item = Range<usize>> {
        let Self { len, rows_per_chunk } = *self;
        (0..len)
            .step_by(rows_per_chunk)
            .map(move |start| start..(start + rows_per_chunk).min(len))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestProgress {
    Creating,
    Inserting { sent: usize, total: usize },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IngestReport {
    pub rows: usize,
    pub chunks: usize,
    pub rows_per_chunk: usize,
}

#[derive(Debug, Clone)]
pub struct ChunkedIngestor {
    chunk_bytes: usize,
}

impl Default for ChunkedIngestor {
    fn default() -> Self {
        Self::new(DEFAULT_CHUNK_BYTES)
    }
}

impl ChunkedIngestor {
    pub fn new(chunk_bytes: usize) -> Self {
        Self { chunk_bytes }
    }

    pub async fn ingest(&self, sink: &dyn TableSink, table: &str, rows: &[Row]) -> Result<IngestReport> {
        self.ingest_with_progress(sink, table, rows, |_| {}).await
    }

    /// Create `table` and upload `rows`. Only call this once the table is
    /// known not to exist.
    pub async fn ingest_with_progress(
        &self,
        sink: &dyn TableSink,
        table: &str,
        rows: &[Row],
        mut progress: impl FnMut(IngestProgress) + Send,
    ) -> Result<IngestReport> {
        let sample = rows
            .first()
            .ok_or_else(|| BridgeError::EmptyDataset(table.to_string()))?;
        let plan = ChunkPlan::for_rows(rows, self.chunk_bytes)?;
        info!(
            table,
            rows = rows.len(),
            rows_per_chunk = plan.rows_per_chunk(),
            chunks = plan.chunk_count(),
            "ingesting dataset"
        );

        progress(IngestProgress::Creating);
        sink.create_table(table, sample).await?;

        let total = plan.chunk_count();
        for (sent, range) in plan.ranges().enumerate() {
            debug!(table, start = range.start, end = range.end, "sending chunk");
            let offset = range.start;
            sink.insert_rows(table, &rows[range])
                .await
                .map_err(|e| BridgeError::Ingest {
                    table: table.to_string(),
                    offset,
                    source: Box::new(e),
                })?;
            progress(IngestProgress::Inserting {
                sent: sent + 1,
                total,
            });
        }

        Ok(IngestReport {
            rows: rows.len(),
            chunks: total,
            rows_per_chunk: plan.rows_per_chunk(),
        })
    }
}
