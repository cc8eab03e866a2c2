//! Destination table lifecycle
//!
//! The [`TableManager`] guarantees that the destination table exists with
//! the expected schema and partitioning before the first write goes out:
//!
//! ```text
//! Unknown -> Checking -> Present
//!                     -> Absent -> Creating -> Present
//! ```
//!
//! `Present` is memoized for the life of the process. Concurrent first
//! callers share a single bring-up; a failed or abandoned bring-up is not
//! memoized and the next call starts over from `Unknown`.

use crate::schema::{TableDescriptor, TableRef};
use crate::store::StoreGateway;
use crate::{Error, Result};

use parking_lot::RwLock;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::OnceCell;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Readiness behaviour on startup and first write
#[derive(Debug, Clone)]
pub struct ReadinessConfig {
    /// Poll until a newly created table is visible
    pub wait_for_ready: bool,
    /// Delay between visibility probes
    pub poll_interval: Duration,
    /// Give up waiting for visibility after this long. A bring-up started by
    /// a request is also bounded by that request's deadline.
    pub readiness_timeout: Duration,
    /// Create the dataset when it is missing
    pub create_dataset: bool,
}

impl Default for ReadinessConfig {
    fn default() -> Self {
        Self {
            wait_for_ready: true,
            poll_interval: Duration::from_secs(1),
            readiness_timeout: Duration::from_secs(60),
            create_dataset: true,
        }
    }
}

/// Lifecycle state of the destination table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableState {
    Unknown,
    Checking,
    Absent,
    Creating,
    Present,
}

impl TableState {
    pub fn as_str(&self) -> &'static str {
        match self {
            TableState::Unknown => "unknown",
            TableState::Checking => "checking",
            TableState::Absent => "absent",
            TableState::Creating => "creating",
            TableState::Present => "present",
        }
    }
}

impl fmt::Display for TableState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Brings the destination table to `Present` exactly once
pub struct TableManager {
    store: Arc<dyn StoreGateway>,
    descriptor: TableDescriptor,
    config: ReadinessConfig,
    state: RwLock<TableState>,
    ready: OnceCell<()>,
}

impl TableManager {
    pub fn new(
        store: Arc<dyn StoreGateway>,
        descriptor: TableDescriptor,
        config: ReadinessConfig,
    ) -> Self {
        Self {
            store,
            descriptor,
            config,
            state: RwLock::new(TableState::Unknown),
            ready: OnceCell::new(),
        }
    }

    pub fn table(&self) -> &TableRef {
        &self.descriptor.table
    }

    pub fn descriptor(&self) -> &TableDescriptor {
        &self.descriptor
    }

    pub fn state(&self) -> TableState {
        *self.state.read()
    }

    /// Whether the table has been confirmed present
    pub fn is_ready(&self) -> bool {
        self.ready.initialized()
    }

    /// Ensure the table exists, creating it if needed.
    ///
    /// Returns immediately once the table has been seen present. Probe
    /// failures are reported as errors and never taken to mean the table is
    /// absent.
    pub async fn ensure_ready(&self) -> Result<()> {
        self.ready
            .get_or_try_init(|| async {
                let mut guard = BringUpGuard {
                    manager: self,
                    finished: false,
                };
                let result = self.bring_up().await;
                guard.finished = result.is_ok();
                result
            })
            .await
            .map(|_| ())
    }

    /// Delete the table through the gateway
    pub async fn drop_table(&self) -> Result<()> {
        self.store.delete_table(self.table()).await?;
        info!(table = %self.table(), "Dropped table");
        Ok(())
    }

    async fn bring_up(&self) -> Result<()> {
        self.transition(TableState::Checking);
        self.ensure_dataset().await?;

        if self.store.table_exists(self.table()).await? {
            self.transition(TableState::Present);
            return Ok(());
        }

        self.transition(TableState::Absent);
        self.transition(TableState::Creating);

        match self.store.create_table(&self.descriptor).await {
            Ok(()) => {
                if self.config.wait_for_ready {
                    self.wait_until_visible().await?;
                }
            }
            Err(Error::TableAlreadyExists(_)) => {
                // Another process created it between our probe and create
                info!(table = %self.table(), "Table created concurrently elsewhere");
                self.confirm_existing().await?;
            }
            Err(e @ Error::TableCreation(_)) => return Err(e),
            Err(e) => return Err(Error::TableCreation(e.to_string())),
        }

        self.transition(TableState::Present);
        Ok(())
    }

    async fn ensure_dataset(&self) -> Result<()> {
        let dataset = &self.table().dataset;
        if self.store.dataset_exists(dataset).await? {
            return Ok(());
        }

        if !self.config.create_dataset {
            return Err(Error::DatasetNotFound(dataset.clone()));
        }

        info!(dataset = %dataset, "Dataset missing, creating it");
        self.store.create_dataset(dataset).await
    }

    async fn confirm_existing(&self) -> Result<()> {
        if self.config.wait_for_ready {
            return self.wait_until_visible().await;
        }
        if self.store.table_exists(self.table()).await? {
            Ok(())
        } else {
            Err(Error::TableCreation(format!(
                "{} reported as existing but is not visible",
                self.table()
            )))
        }
    }

    async fn wait_until_visible(&self) -> Result<()> {
        let started = Instant::now();
        loop {
            if self.store.table_exists(self.table()).await? {
                debug!(
                    table = %self.table(),
                    waited_ms = started.elapsed().as_millis() as u64,
                    "Table visible"
                );
                return Ok(());
            }

            let waited = started.elapsed();
            if waited >= self.config.readiness_timeout {
                warn!(table = %self.table(), waited_ms = waited.as_millis() as u64, "Table never became visible");
                return Err(Error::ReadinessTimeout {
                    table: self.table().to_string(),
                    waited,
                });
            }

            let left = self.config.readiness_timeout - waited;
            tokio::time::sleep(self.config.poll_interval.min(left)).await;
        }
    }

    fn transition(&self, next: TableState) {
        let mut state = self.state.write();
        let previous = *state;
        if previous != next {
            info!(table = %self.descriptor.table, from = %previous, to = %next, "Table state changed");
            *state = next;
        }
    }
}

/// Resets the state to `Unknown` when a bring-up fails or its future is
/// dropped part way, e.g. at a request deadline
struct BringUpGuard<'a> {
    manager: &'a TableManager,
    finished: bool,
}

impl Drop for BringUpGuard<'_> {
    fn drop(&mut self) {
        if !self.finished {
            self.manager.transition(TableState::Unknown);
        }
    }
}
