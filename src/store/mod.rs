//! Store gateway: the capability set the bridge needs from a backend
//!
//! The trait is intentionally narrow (existence checks, create, delete,
//! insert, predicate retrieval) so backends can be swapped or mocked.
//!
//! Error contract for implementations:
//! - `table_exists` / `dataset_exists` failures are [`Error::Probe`]
//! - `create_table` on an existing table is [`Error::TableAlreadyExists`],
//!   other failures [`Error::TableCreation`]
//! - `insert_rows` failures are [`Error::StoreWrite`]
//! - `query_rows` failures are [`Error::StoreQuery`]
//!
//! [`Error::Probe`]: crate::Error::Probe
//! [`Error::TableAlreadyExists`]: crate::Error::TableAlreadyExists
//! [`Error::TableCreation`]: crate::Error::TableCreation
//! [`Error::StoreWrite`]: crate::Error::StoreWrite
//! [`Error::StoreQuery`]: crate::Error::StoreQuery

mod memory;
mod object;
mod parquet_codec;

pub use memory::{MemoryStore, StoreCallCounts};
pub use object::{ObjectStoreGateway, ObjectStoreGatewayConfig};
pub use parquet_codec::RowCodec;

use crate::query::StoreQuery;
use crate::schema::{StorageRow, TableDescriptor, TableRef};
use crate::Result;
use async_trait::async_trait;

/// Storage backend interface
#[async_trait]
pub trait StoreGateway: Send + Sync {
    /// Check whether a dataset exists
    async fn dataset_exists(&self, dataset: &str) -> Result<bool>;

    /// Create a dataset; creating an existing dataset is not an error
    async fn create_dataset(&self, dataset: &str) -> Result<()>;

    /// Check whether a table exists
    async fn table_exists(&self, table: &TableRef) -> Result<bool>;

    /// Create a table with the descriptor's schema and partitioning
    async fn create_table(&self, descriptor: &TableDescriptor) -> Result<()>;

    /// Delete a table and all of its rows
    async fn delete_table(&self, table: &TableRef) -> Result<()>;

    /// Append rows; all or nothing from the caller's point of view
    async fn insert_rows(&self, table: &TableRef, rows: Vec<StorageRow>) -> Result<()>;

    /// Retrieve rows satisfying the query
    async fn query_rows(&self, table: &TableRef, query: &StoreQuery) -> Result<Vec<StorageRow>>;
}
