//! Shared helpers for integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use prombridge::api::ApiState;
use prombridge::config::ComponentFactory;
use prombridge::query::{ReadPredicate, StoreQuery};
use prombridge::schema::{StorageRow, TableDescriptor, TableRef, WireSeries};
use prombridge::store::{MemoryStore, StoreGateway};
use prombridge::table::ReadinessConfig;
use prombridge::{wire, Config, Result, TableConfig};
use std::sync::Arc;
use std::time::Duration;

pub fn test_config() -> Config {
    Config {
        table: TableConfig {
            project: "test-project".to_string(),
            dataset: "prometheus".to_string(),
            table: "metrics".to_string(),
        },
        readiness: ReadinessConfig {
            poll_interval: Duration::from_millis(10),
            readiness_timeout: Duration::from_millis(500),
            ..Default::default()
        },
        ..Default::default()
    }
}

pub fn test_table() -> TableRef {
    test_config().table.table_ref()
}

pub fn api_state(store: Arc<dyn StoreGateway>) -> ApiState {
    ComponentFactory::create_api_state(&test_config(), store)
}

/// Snappy-compressed remote write body
pub fn write_body(series: &[WireSeries]) -> Vec<u8> {
    wire::encode_envelope(&wire::encode_write_request(series)).unwrap()
}

/// Snappy-compressed remote read body
pub fn read_body(predicates: &[ReadPredicate]) -> Vec<u8> {
    wire::encode_envelope(&wire::encode_read_request(predicates)).unwrap()
}

/// Decode a snappy-compressed remote read response
pub fn decode_read_response(body: &[u8]) -> Vec<Vec<WireSeries>> {
    wire::parse_read_response(&wire::decode_envelope(body).unwrap()).unwrap()
}

/// Gateway that records every insert batch before delegating
#[derive(Default)]
pub struct RecordingStore {
    pub inner: MemoryStore,
    inserts: Mutex<Vec<Vec<StorageRow>>>,
}

impl RecordingStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inserts(&self) -> Vec<Vec<StorageRow>> {
        self.inserts.lock().clone()
    }
}

#[async_trait]
impl StoreGateway for RecordingStore {
    async fn dataset_exists(&self, dataset: &str) -> Result<bool> {
        self.inner.dataset_exists(dataset).await
    }

    async fn create_dataset(&self, dataset: &str) -> Result<()> {
        self.inner.create_dataset(dataset).await
    }

    async fn table_exists(&self, table: &TableRef) -> Result<bool> {
        self.inner.table_exists(table).await
    }

    async fn create_table(&self, descriptor: &TableDescriptor) -> Result<()> {
        self.inner.create_table(descriptor).await
    }

    async fn delete_table(&self, table: &TableRef) -> Result<()> {
        self.inner.delete_table(table).await
    }

    async fn insert_rows(&self, table: &TableRef, rows: Vec<StorageRow>) -> Result<()> {
        self.inserts.lock().push(rows.clone());
        self.inner.insert_rows(table, rows).await
    }

    async fn query_rows(&self, table: &TableRef, query: &StoreQuery) -> Result<Vec<StorageRow>> {
        self.inner.query_rows(table, query).await
    }
}
