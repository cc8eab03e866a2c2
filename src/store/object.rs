//! Store gateway over an object store, one Parquet file per partition per insert
//!
//! Layout below the configured prefix:
//!
//! ```text
//! {project}/{dataset}/_dataset.json
//! {project}/{dataset}/{table}/_table.json
//! {project}/{dataset}/{table}/date=YYYY-MM-DD/part-{uuid}.parquet
//! ```
//!
//! Markers are written with create-if-absent semantics, so a table can be
//! created at most once even when several processes race on startup.

use super::{RowCodec, StoreGateway};
use crate::query::StoreQuery;
use crate::schema::{millis_to_datetime, StorageRow, TableDescriptor, TableRef};
use crate::{Error, Result};

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use futures::{StreamExt, TryStreamExt};
use object_store::path::Path;
use object_store::{ObjectStore, PutMode, PutOptions, PutPayload};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

const DATASET_MARKER: &str = "_dataset.json";
const TABLE_MANIFEST: &str = "_table.json";
const PARTITION_PREFIX: &str = "date=";

/// Object store gateway configuration
#[derive(Debug, Clone)]
pub struct ObjectStoreGatewayConfig {
    /// Key prefix for everything the gateway writes
    pub prefix: String,
    /// Concurrent Parquet reads per query
    pub read_parallelism: usize,
}

impl Default for ObjectStoreGatewayConfig {
    fn default() -> Self {
        Self {
            prefix: String::new(),
            read_parallelism: 8,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct DatasetMarker {
    dataset: String,
    created_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize)]
struct TableManifest {
    descriptor: TableDescriptor,
    partitioning: String,
    created_at: DateTime<Utc>,
}

/// Store gateway persisting rows as day-partitioned Parquet files
pub struct ObjectStoreGateway {
    object_store: Arc<dyn ObjectStore>,
    project: String,
    config: ObjectStoreGatewayConfig,
    codec: RowCodec,
}

impl ObjectStoreGateway {
    pub fn new(
        object_store: Arc<dyn ObjectStore>,
        project: impl Into<String>,
        config: ObjectStoreGatewayConfig,
    ) -> Self {
        Self {
            object_store,
            project: project.into(),
            config,
            codec: RowCodec::new(),
        }
    }

    fn path(&self, parts: &[&str]) -> Path {
        let joined = std::iter::once(self.config.prefix.trim_matches('/'))
            .chain(std::iter::once(self.project.as_str()))
            .chain(parts.iter().copied())
            .filter(|p| !p.is_empty())
            .collect::<Vec<_>>()
            .join("/");
        Path::from(joined)
    }

    fn dataset_marker(&self, dataset: &str) -> Path {
        self.path(&[dataset, DATASET_MARKER])
    }

    fn table_root(&self, table: &TableRef) -> Result<Path> {
        if table.project != self.project {
            return Err(Error::Config(format!(
                "table {} is outside project {}",
                table, self.project
            )));
        }
        Ok(self.path(&[&table.dataset, &table.table]))
    }

    fn table_manifest(&self, table: &TableRef) -> Result<Path> {
        Ok(self.table_root(table)?.child(TABLE_MANIFEST))
    }

    async fn exists(&self, path: &Path) -> std::result::Result<bool, object_store::Error> {
        match self.object_store.head(path).await {
            Ok(_) => Ok(true),
            Err(object_store::Error::NotFound { .. }) => Ok(false),
            Err(e) => Err(e),
        }
    }

    async fn put_if_absent(
        &self,
        path: &Path,
        bytes: Vec<u8>,
    ) -> std::result::Result<(), object_store::Error> {
        let opts = PutOptions {
            mode: PutMode::Create,
            ..Default::default()
        };
        self.object_store
            .put_opts(path, PutPayload::from(bytes), opts)
            .await
            .map(|_| ())
    }

    async fn list_files(&self, root: &Path) -> std::result::Result<Vec<Path>, object_store::Error> {
        self.object_store
            .list(Some(root))
            .map_ok(|meta| meta.location)
            .try_collect()
            .await
    }

    async fn write_partitions(
        &self,
        root: &Path,
        partitions: BTreeMap<NaiveDate, Vec<StorageRow>>,
        pending: &mut PendingFiles,
    ) -> Result<()> {
        for (day, rows) in partitions {
            let bytes = self.codec.write_parquet(&rows)?;
            let path = root
                .child(format!("{}{}", PARTITION_PREFIX, day.format("%Y-%m-%d")))
                .child(format!("part-{}.parquet", uuid::Uuid::new_v4()));

            debug!(path = %path, rows = rows.len(), size_bytes = bytes.len(), "Writing Parquet file");
            // Tracked before the put: a put abandoned mid-flight may still land
            pending.track(path.clone());
            self.object_store
                .put(&path, PutPayload::from(bytes))
                .await?;
        }
        Ok(())
    }

    async fn read_rows(&self, path: Path) -> Result<Vec<StorageRow>> {
        let bytes = self.object_store.get(&path).await?.bytes().await?;
        self.codec.read_parquet(bytes)
    }
}

/// Data files of an insert that has not finished yet.
///
/// Unless committed, the files are removed again: directly by
/// [`PendingFiles::rollback`] when the insert fails, or from a spawned task
/// when the insert future is dropped part way (deadline or cancellation).
struct PendingFiles {
    object_store: Arc<dyn ObjectStore>,
    paths: Vec<Path>,
}

impl PendingFiles {
    fn new(object_store: Arc<dyn ObjectStore>) -> Self {
        Self {
            object_store,
            paths: Vec::new(),
        }
    }

    fn track(&mut self, path: Path) {
        self.paths.push(path);
    }

    fn commit(mut self) {
        self.paths.clear();
    }

    async fn rollback(mut self) {
        // A path leaves the list only once deleted, so a dropped rollback
        // hands the rest to the drop cleanup
        while let Some(path) = self.paths.last().cloned() {
            remove_file(self.object_store.as_ref(), &path).await;
            self.paths.pop();
        }
    }
}

impl Drop for PendingFiles {
    fn drop(&mut self) {
        if self.paths.is_empty() {
            return;
        }
        let paths = std::mem::take(&mut self.paths);
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                warn!(files = paths.len(), "Insert abandoned, removing its files");
                handle.spawn(remove_files(self.object_store.clone(), paths));
            }
            Err(_) => {
                warn!(files = paths.len(), "Insert abandoned outside a runtime, files left behind");
            }
        }
    }
}

async fn remove_files(object_store: Arc<dyn ObjectStore>, paths: Vec<Path>) {
    for path in paths {
        remove_file(object_store.as_ref(), &path).await;
    }
}

async fn remove_file(object_store: &dyn ObjectStore, path: &Path) {
    match object_store.delete(path).await {
        Ok(()) | Err(object_store::Error::NotFound { .. }) => {}
        Err(e) => warn!(path = %path, error = %e, "Failed to remove partial insert"),
    }
}

/// Partition date encoded in a data file path
fn partition_of(path: &Path) -> Option<NaiveDate> {
    path.parts().find_map(|part| {
        part.as_ref()
            .strip_prefix(PARTITION_PREFIX)
            .and_then(|day| NaiveDate::parse_from_str(day, "%Y-%m-%d").ok())
    })
}

fn is_data_file(path: &Path) -> bool {
    path.filename().is_some_and(|name| name.ends_with(".parquet"))
}

#[async_trait]
impl StoreGateway for ObjectStoreGateway {
    async fn dataset_exists(&self, dataset: &str) -> Result<bool> {
        self.exists(&self.dataset_marker(dataset))
            .await
            .map_err(|e| Error::Probe(format!("dataset {}: {}", dataset, e)))
    }

    async fn create_dataset(&self, dataset: &str) -> Result<()> {
        let marker = DatasetMarker {
            dataset: dataset.to_string(),
            created_at: Utc::now(),
        };
        let bytes = serde_json::to_vec_pretty(&marker)?;

        match self.put_if_absent(&self.dataset_marker(dataset), bytes).await {
            Ok(()) => {
                info!(project = %self.project, dataset = %dataset, "Created dataset");
                Ok(())
            }
            Err(object_store::Error::AlreadyExists { .. }) => Ok(()),
            Err(e) => Err(Error::TableCreation(format!("dataset {}: {}", dataset, e))),
        }
    }

    async fn table_exists(&self, table: &TableRef) -> Result<bool> {
        let manifest = self
            .table_manifest(table)
            .map_err(|e| Error::Probe(e.to_string()))?;
        self.exists(&manifest)
            .await
            .map_err(|e| Error::Probe(format!("table {}: {}", table, e)))
    }

    async fn create_table(&self, descriptor: &TableDescriptor) -> Result<()> {
        let table = &descriptor.table;
        let manifest_path = self
            .table_manifest(table)
            .map_err(|e| Error::TableCreation(e.to_string()))?;

        let dataset_present = self
            .exists(&self.dataset_marker(&table.dataset))
            .await
            .map_err(|e| Error::TableCreation(format!("dataset {}: {}", table.dataset, e)))?;
        if !dataset_present {
            return Err(Error::TableCreation(format!(
                "dataset {} does not exist",
                table.dataset
            )));
        }

        let manifest = TableManifest {
            descriptor: descriptor.clone(),
            partitioning: "DAY".to_string(),
            created_at: Utc::now(),
        };
        let bytes = serde_json::to_vec_pretty(&manifest)?;

        match self.put_if_absent(&manifest_path, bytes).await {
            Ok(()) => {
                info!(
                    table = %table,
                    partition_field = %descriptor.partition_field,
                    "Created table"
                );
                Ok(())
            }
            Err(object_store::Error::AlreadyExists { .. }) => {
                Err(Error::TableAlreadyExists(table.to_string()))
            }
            Err(e) => Err(Error::TableCreation(format!("table {}: {}", table, e))),
        }
    }

    async fn delete_table(&self, table: &TableRef) -> Result<()> {
        let root = self.table_root(table)?;
        let manifest = root.child(TABLE_MANIFEST);

        let files = self.list_files(&root).await?;
        let mut deleted = 0usize;
        for path in files.iter().filter(|p| **p != manifest) {
            self.object_store.delete(path).await?;
            deleted += 1;
        }

        match self.object_store.delete(&manifest).await {
            Ok(()) | Err(object_store::Error::NotFound { .. }) => {}
            Err(e) => return Err(e.into()),
        }

        info!(table = %table, files = deleted, "Deleted table");
        Ok(())
    }

    async fn insert_rows(&self, table: &TableRef, rows: Vec<StorageRow>) -> Result<()> {
        let root = self
            .table_root(table)
            .map_err(|e| Error::StoreWrite(e.to_string()))?;

        let present = self
            .exists(&root.child(TABLE_MANIFEST))
            .await
            .map_err(|e| Error::StoreWrite(format!("table {}: {}", table, e)))?;
        if !present {
            return Err(Error::StoreWrite(format!("table {} does not exist", table)));
        }

        if rows.is_empty() {
            return Ok(());
        }

        let mut partitions: BTreeMap<NaiveDate, Vec<StorageRow>> = BTreeMap::new();
        for row in rows {
            partitions
                .entry(row.timestamp.date_naive())
                .or_default()
                .push(row);
        }

        // All partitions of one insert become visible together or not at all
        let mut pending = PendingFiles::new(self.object_store.clone());
        match self.write_partitions(&root, partitions, &mut pending).await {
            Ok(()) => {
                pending.commit();
                Ok(())
            }
            Err(e) => {
                pending.rollback().await;
                Err(Error::StoreWrite(format!("table {}: {}", table, e)))
            }
        }
    }

    async fn query_rows(&self, table: &TableRef, query: &StoreQuery) -> Result<Vec<StorageRow>> {
        let root = self
            .table_root(table)
            .map_err(|e| Error::StoreQuery(e.to_string()))?;

        let present = self
            .exists(&root.child(TABLE_MANIFEST))
            .await
            .map_err(|e| Error::StoreQuery(format!("table {}: {}", table, e)))?;
        if !present {
            return Err(Error::StoreQuery(format!("table {} does not exist", table)));
        }

        let range = query.time_range;
        if range.is_empty() {
            return Ok(Vec::new());
        }

        let first_day = millis_to_datetime(range.start)
            .map(|t| t.date_naive())
            .unwrap_or(NaiveDate::MIN);
        let last_day = millis_to_datetime(range.end)
            .map(|t| t.date_naive())
            .unwrap_or(NaiveDate::MAX);

        let files: Vec<Path> = self
            .list_files(&root)
            .await
            .map_err(|e| Error::StoreQuery(format!("table {}: {}", table, e)))?
            .into_iter()
            .filter(|path| is_data_file(path))
            .filter(|path| match partition_of(path) {
                Some(day) => day >= first_day && day <= last_day,
                None => {
                    warn!(path = %path, "Skipping data file outside any partition");
                    false
                }
            })
            .collect();

        debug!(table = %table, files = files.len(), "Scanning partitions");

        let batches: Vec<Vec<StorageRow>> = futures::stream::iter(files)
            .map(|path| self.read_rows(path))
            .buffered(self.config.read_parallelism.max(1))
            .try_collect()
            .await
            .map_err(|e| Error::StoreQuery(format!("table {}: {}", table, e)))?;

        let mut rows: Vec<StorageRow> = batches
            .into_iter()
            .flatten()
            .filter(|row| query.matches(row))
            .collect();
        rows.sort_by_key(|row| row.timestamp);

        Ok(rows)
    }
}
