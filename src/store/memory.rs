//! In-memory store gateway for development and testing

use super::StoreGateway;
use crate::query::StoreQuery;
use crate::schema::{StorageRow, TableDescriptor, TableRef};
use crate::{Error, Result};

use async_trait::async_trait;
use dashmap::{DashMap, DashSet};
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;
use tracing::debug;

/// Number of calls made against a [`MemoryStore`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreCallCounts {
    pub probes: u64,
    pub creates: u64,
    pub deletes: u64,
    pub inserts: u64,
    pub queries: u64,
}

impl StoreCallCounts {
    pub fn total(&self) -> u64 {
        self.probes + self.creates + self.deletes + self.inserts + self.queries
    }
}

#[derive(Debug)]
struct MemoryTable {
    descriptor: TableDescriptor,
    rows: RwLock<Vec<StorageRow>>,
}

#[derive(Debug, Default)]
struct Counters {
    probes: AtomicU64,
    creates: AtomicU64,
    deletes: AtomicU64,
    inserts: AtomicU64,
    queries: AtomicU64,
}

/// Faults to inject into the next calls
#[derive(Debug, Default)]
struct Faults {
    probe_failures: AtomicUsize,
    table_probe_failures: AtomicUsize,
    insert_failures: AtomicUsize,
    query_failures: AtomicUsize,
    /// Number of probes after creation that still report the table missing
    invisible_probes: AtomicUsize,
    latency: Mutex<Option<Duration>>,
}

/// In-memory store gateway
///
/// Rows are kept per table in insertion order. Suitable for tests and
/// single-process development; nothing survives a restart. Fault injection
/// helpers let tests exercise probe, insert and query failure paths.
#[derive(Debug, Default)]
pub struct MemoryStore {
    datasets: DashSet<String>,
    tables: DashMap<TableRef, MemoryTable>,
    counters: Counters,
    faults: Faults,
}

impl MemoryStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Rows currently stored in a table
    pub fn rows(&self, table: &TableRef) -> Vec<StorageRow> {
        self.tables
            .get(table)
            .map(|t| t.rows.read().clone())
            .unwrap_or_default()
    }

    /// Descriptor a table was created with
    pub fn descriptor(&self, table: &TableRef) -> Option<TableDescriptor> {
        self.tables.get(table).map(|t| t.descriptor.clone())
    }

    pub fn call_counts(&self) -> StoreCallCounts {
        StoreCallCounts {
            probes: self.counters.probes.load(Ordering::Relaxed),
            creates: self.counters.creates.load(Ordering::Relaxed),
            deletes: self.counters.deletes.load(Ordering::Relaxed),
            inserts: self.counters.inserts.load(Ordering::Relaxed),
            queries: self.counters.queries.load(Ordering::Relaxed),
        }
    }

    /// Fail the next `n` existence probes, dataset or table
    pub fn fail_next_probes(&self, n: usize) {
        self.faults.probe_failures.store(n, Ordering::SeqCst);
    }

    /// Fail the next `n` table existence probes; dataset probes still succeed
    pub fn fail_next_table_probes(&self, n: usize) {
        self.faults.table_probe_failures.store(n, Ordering::SeqCst);
    }

    /// Create a dataset without counting the call
    pub fn seed_dataset(&self, dataset: &str) {
        self.datasets.insert(dataset.to_string());
    }

    /// Fail the next `n` inserts
    pub fn fail_next_inserts(&self, n: usize) {
        self.faults.insert_failures.store(n, Ordering::SeqCst);
    }

    /// Fail the next `n` queries
    pub fn fail_next_queries(&self, n: usize) {
        self.faults.query_failures.store(n, Ordering::SeqCst);
    }

    /// Report newly created tables as missing for the next `n` probes
    pub fn delay_visibility(&self, n: usize) {
        self.faults.invisible_probes.store(n, Ordering::SeqCst);
    }

    /// Add latency to every call
    pub fn set_latency(&self, latency: Option<Duration>) {
        *self.faults.latency.lock() = latency;
    }

    async fn simulate_latency(&self) {
        let latency = *self.faults.latency.lock();
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
    }
}

/// Decrement a fault counter, returning whether a fault fired
fn take_fault(counter: &AtomicUsize) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

#[async_trait]
impl StoreGateway for MemoryStore {
    async fn dataset_exists(&self, dataset: &str) -> Result<bool> {
        self.counters.probes.fetch_add(1, Ordering::Relaxed);
        self.simulate_latency().await;
        if take_fault(&self.faults.probe_failures) {
            return Err(Error::Probe(format!("injected probe failure for dataset {}", dataset)));
        }
        Ok(self.datasets.contains(dataset))
    }

    async fn create_dataset(&self, dataset: &str) -> Result<()> {
        self.counters.creates.fetch_add(1, Ordering::Relaxed);
        self.simulate_latency().await;
        self.datasets.insert(dataset.to_string());
        Ok(())
    }

    async fn table_exists(&self, table: &TableRef) -> Result<bool> {
        self.counters.probes.fetch_add(1, Ordering::Relaxed);
        self.simulate_latency().await;
        if take_fault(&self.faults.probe_failures) || take_fault(&self.faults.table_probe_failures) {
            return Err(Error::Probe(format!("injected probe failure for {}", table)));
        }
        if !self.tables.contains_key(table) {
            return Ok(false);
        }
        Ok(!take_fault(&self.faults.invisible_probes))
    }

    async fn create_table(&self, descriptor: &TableDescriptor) -> Result<()> {
        self.counters.creates.fetch_add(1, Ordering::Relaxed);
        self.simulate_latency().await;

        if !self.datasets.contains(&descriptor.table.dataset) {
            return Err(Error::TableCreation(format!(
                "dataset {} does not exist",
                descriptor.table.dataset
            )));
        }

        match self.tables.entry(descriptor.table.clone()) {
            dashmap::mapref::entry::Entry::Occupied(_) => {
                Err(Error::TableAlreadyExists(descriptor.table.to_string()))
            }
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(MemoryTable {
                    descriptor: descriptor.clone(),
                    rows: RwLock::new(Vec::new()),
                });
                debug!(table = %descriptor.table, "Created in-memory table");
                Ok(())
            }
        }
    }

    async fn delete_table(&self, table: &TableRef) -> Result<()> {
        self.counters.deletes.fetch_add(1, Ordering::Relaxed);
        self.simulate_latency().await;
        self.tables
            .remove(table)
            .map(|_| ())
            .ok_or_else(|| Error::StoreWrite(format!("table {} does not exist", table)))
    }

    async fn insert_rows(&self, table: &TableRef, rows: Vec<StorageRow>) -> Result<()> {
        self.counters.inserts.fetch_add(1, Ordering::Relaxed);
        self.simulate_latency().await;
        if take_fault(&self.faults.insert_failures) {
            return Err(Error::StoreWrite(format!(
                "injected insert failure ({} rows rejected)",
                rows.len()
            )));
        }

        let entry = self
            .tables
            .get(table)
            .ok_or_else(|| Error::StoreWrite(format!("table {} does not exist", table)))?;
        entry.rows.write().extend(rows);
        Ok(())
    }

    async fn query_rows(&self, table: &TableRef, query: &StoreQuery) -> Result<Vec<StorageRow>> {
        self.counters.queries.fetch_add(1, Ordering::Relaxed);
        self.simulate_latency().await;
        if take_fault(&self.faults.query_failures) {
            return Err(Error::StoreQuery("injected query failure".to_string()));
        }

        let entry = self
            .tables
            .get(table)
            .ok_or_else(|| Error::StoreQuery(format!("table {} does not exist", table)))?;
        let rows = entry.rows.read();
        Ok(rows.iter().filter(|r| query.matches(r)).cloned().collect())
    }
}
