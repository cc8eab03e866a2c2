//! Remote write ingestion
//!
//! Each request is one transaction boundary:
//! - Remove the snappy envelope and decode the protobuf write request
//! - Make sure the destination table is ready (memoized after the first time)
//! - Normalize series into storage rows, dropping non-finite samples
//! - Insert every row with a single store call
//!
//! Nothing is buffered across requests. Decode failures are reported before
//! the store is touched.

mod telemetry;

use crate::context::RequestContext;
use crate::schema::TableRef;
use crate::store::StoreGateway;
use crate::table::TableManager;
use crate::{transform, wire, Error, Result};

use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, warn};

/// Outcome of one accepted write request
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriteSummary {
    /// Series in the request
    pub series: usize,
    /// Samples in the request
    pub samples: usize,
    /// Rows handed to the store
    pub rows: usize,
}

impl WriteSummary {
    /// Samples dropped as invalid
    pub fn dropped(&self) -> usize {
        self.samples - self.rows
    }
}

/// Handles remote write requests
pub struct Ingester {
    store: Arc<dyn StoreGateway>,
    tables: Arc<TableManager>,
}

impl Ingester {
    pub fn new(store: Arc<dyn StoreGateway>, tables: Arc<TableManager>) -> Self {
        Self { store, tables }
    }

    pub fn table(&self) -> &TableRef {
        self.tables.table()
    }

    /// Persist one snappy-compressed remote write request
    pub async fn handle_write(&self, body: &[u8], ctx: &RequestContext) -> Result<WriteSummary> {
        let start_time = Instant::now();

        let result = self.write(body, ctx).await;
        match &result {
            Ok(summary) => telemetry::record_write(
                start_time.elapsed().as_secs_f64(),
                body.len() as u64,
                summary.series as u64,
                summary.rows as u64,
                summary.dropped() as u64,
            ),
            Err(e) => telemetry::record_write_failure(e.kind()),
        }
        result
    }

    async fn write(&self, body: &[u8], ctx: &RequestContext) -> Result<WriteSummary> {
        let raw = wire::decode_envelope(body).inspect_err(|e| {
            warn!(error = %e, size_bytes = body.len(), "Rejected write request");
        })?;
        let series = wire::parse_write_request(&raw).inspect_err(|e| {
            warn!(error = %e, size_bytes = raw.len(), "Rejected write request");
        })?;

        for s in &series {
            debug!(labels = ?s.labels, samples = s.samples.len(), "Received series");
        }

        ctx.run(self.tables.ensure_ready()).await?;

        let samples = series.iter().map(|s| s.samples.len()).sum();
        let rows = transform::normalize(&series);
        let summary = WriteSummary {
            series: series.len(),
            samples,
            rows: rows.len(),
        };

        if summary.dropped() > 0 {
            debug!(dropped = summary.dropped(), "Dropped invalid samples");
        }

        ctx.run(self.store.insert_rows(self.table(), rows))
            .await
            .map_err(|e| match e {
                Error::StoreWrite(_) | Error::DeadlineExceeded | Error::Cancelled => e,
                other => Error::StoreWrite(other.to_string()),
            })
            .inspect_err(|e| {
                error!(table = %self.table(), rows = summary.rows, error = %e, "Insert failed");
            })?;

        debug!(
            table = %self.table(),
            series = summary.series,
            rows = summary.rows,
            "Write persisted"
        );
        Ok(summary)
    }
}
