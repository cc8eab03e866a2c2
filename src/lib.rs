//! # prombridge
//!
//! A Prometheus remote storage bridge onto a columnar, time-partitioned
//! table store.
//!
//! Remote write batches are decoded, filtered and flattened into one row per
//! sample (metric name, full label set, value, timestamp) and appended to a
//! table partitioned by day. Remote read queries are translated into
//! predicates over that table and the matching rows are regrouped into
//! series.
//!
//! ## Architecture
//!
//! - **Wire codec**: snappy envelope around the remote storage protobufs
//! - **Transform**: series to rows and back
//! - **Table manager**: makes sure the destination table exists before the
//!   first write
//! - **Ingester / Query node**: the write and read request handlers
//! - **Store gateway**: narrow storage interface with in-memory and
//!   Parquet-on-object-store implementations

pub mod api;
pub mod config;
pub mod context;
pub mod ingester;
pub mod query;
pub mod schema;
pub mod store;
pub mod table;
pub mod telemetry;
pub mod transform;
pub mod wire;

mod error;

pub use error::{Error, Result};

use std::str::FromStr;

/// Configuration for the bridge
#[derive(Debug, Clone, Default)]
pub struct Config {
    /// Destination table
    pub table: TableConfig,
    /// Table readiness behaviour
    pub readiness: table::ReadinessConfig,
    /// HTTP server
    pub api: api::ApiServerConfig,
    /// Storage backend
    pub store: StoreConfig,
}

/// Destination table coordinates
#[derive(Debug, Clone)]
pub struct TableConfig {
    pub project: String,
    pub dataset: String,
    pub table: String,
}

impl TableConfig {
    pub fn table_ref(&self) -> schema::TableRef {
        schema::TableRef::new(&self.project, &self.dataset, &self.table)
    }
}

impl Default for TableConfig {
    fn default() -> Self {
        Self {
            project: "local".to_string(),
            dataset: "prometheus".to_string(),
            table: "metrics".to_string(),
        }
    }
}

/// Supported storage backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageBackend {
    Memory,
    Local,
    S3,
}

impl StorageBackend {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Memory => "memory",
            Self::Local => "local",
            Self::S3 => "s3",
        }
    }
}

impl FromStr for StorageBackend {
    type Err = String;

    fn from_str(value: &str) -> std::result::Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "memory" => Ok(Self::Memory),
            "local" | "file" => Ok(Self::Local),
            "s3" | "aws" => Ok(Self::S3),
            other => Err(format!(
                "unknown storage backend '{}'; expected one of memory, local, s3",
                other
            )),
        }
    }
}

/// Storage backend configuration
#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub backend: StorageBackend,
    /// Root directory for the local backend
    pub path: Option<String>,
    /// Bucket for the s3 backend
    pub bucket: Option<String>,
    pub region: String,
    /// Custom S3 endpoint (MinIO, LocalStack)
    pub endpoint: Option<String>,
    /// Key prefix for all objects
    pub prefix: String,
    /// Concurrent file reads per query
    pub read_parallelism: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::Memory,
            path: None,
            bucket: None,
            region: "us-east-1".to_string(),
            endpoint: None,
            prefix: String::new(),
            read_parallelism: 8,
        }
    }
}

/// Re-exports for convenience
pub mod prelude {
    pub use crate::api::{build_http_router, ApiServerConfig, ApiState};
    pub use crate::config::ComponentFactory;
    pub use crate::context::RequestContext;
    pub use crate::ingester::{Ingester, WriteSummary};
    pub use crate::query::{LabelMatcher, MatchOp, QueryNode, ReadPredicate, StoreQuery};
    pub use crate::schema::{LabelSet, SamplePoint, StorageRow, TableDescriptor, TableRef, WireSeries};
    pub use crate::store::{MemoryStore, ObjectStoreGateway, StoreGateway};
    pub use crate::table::{ReadinessConfig, TableManager, TableState};
    pub use crate::{Config, Error, Result, StorageBackend, StoreConfig, TableConfig};
}
