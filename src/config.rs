//! Component factory
//!
//! Builds the store gateway and the request handlers from explicit
//! configuration structs, so binaries and tests wire the bridge the same way.

use crate::api::ApiState;
use crate::ingester::Ingester;
use crate::query::QueryNode;
use crate::schema::TableDescriptor;
use crate::store::{MemoryStore, ObjectStoreGateway, ObjectStoreGatewayConfig, StoreGateway};
use crate::table::TableManager;
use crate::{Config, Error, Result, StorageBackend, StoreConfig, TableConfig};

use object_store::{aws::AmazonS3Builder, local::LocalFileSystem, ObjectStore};
use std::sync::Arc;
use tracing::info;

/// Destination table flags shared by the binaries
#[derive(clap::Args, Debug, Clone)]
pub struct TableArgs {
    /// Project owning the dataset
    #[arg(long, env = "BQ_PROJECT_ID")]
    pub project: String,

    /// Dataset holding the table
    #[arg(long, env = "BQ_DATASET", default_value = "prometheus")]
    pub dataset: String,

    /// Table name
    #[arg(long, env = "BQ_TABLE", default_value = "metrics")]
    pub table: String,
}

impl From<TableArgs> for TableConfig {
    fn from(args: TableArgs) -> Self {
        TableConfig {
            project: args.project,
            dataset: args.dataset,
            table: args.table,
        }
    }
}

/// Storage backend flags shared by the binaries
#[derive(clap::Args, Debug, Clone)]
pub struct StoreArgs {
    /// Storage backend: memory, local or s3
    #[arg(long = "storage-backend", env = "STORAGE_BACKEND", default_value = "memory")]
    pub backend: StorageBackend,

    /// Root directory for the local backend
    #[arg(long = "storage-path", env = "STORAGE_PATH")]
    pub path: Option<String>,

    /// Key prefix for all objects
    #[arg(long = "storage-prefix", env = "STORAGE_PREFIX", default_value = "")]
    pub prefix: String,

    /// S3 bucket name
    #[arg(long, env = "S3_BUCKET")]
    pub bucket: Option<String>,

    /// S3 region
    #[arg(long, env = "S3_REGION", default_value = "us-east-1")]
    pub region: String,

    /// S3 endpoint (for MinIO)
    #[arg(long, env = "S3_ENDPOINT")]
    pub endpoint: Option<String>,

    /// Concurrent file reads per query
    #[arg(long, env = "STORAGE_READ_PARALLELISM", default_value = "8")]
    pub read_parallelism: usize,
}

impl From<StoreArgs> for StoreConfig {
    fn from(args: StoreArgs) -> Self {
        StoreConfig {
            backend: args.backend,
            path: args.path,
            bucket: args.bucket,
            region: args.region,
            endpoint: args.endpoint,
            prefix: args.prefix,
            read_parallelism: args.read_parallelism,
        }
    }
}

pub struct ComponentFactory;

impl ComponentFactory {
    /// Create the store gateway for the configured backend
    ///
    /// - `memory`: in-process rows, lost on restart
    /// - `local`: Parquet files under `StoreConfig::path`
    /// - `s3`: Parquet files in `StoreConfig::bucket`; credentials come from
    ///   the standard `AWS_*` environment variables or the instance role
    pub fn create_store_gateway(project: &str, config: &StoreConfig) -> Result<Arc<dyn StoreGateway>> {
        match config.backend {
            StorageBackend::Memory => {
                info!("Using in-memory store (development mode)");
                Ok(Arc::new(MemoryStore::new()))
            }
            StorageBackend::Local | StorageBackend::S3 => {
                let object_store = Self::create_object_store(config)?;
                let gateway_config = ObjectStoreGatewayConfig {
                    prefix: config.prefix.clone(),
                    read_parallelism: config.read_parallelism,
                };
                Ok(Arc::new(ObjectStoreGateway::new(
                    object_store,
                    project,
                    gateway_config,
                )))
            }
        }
    }

    /// Create the object store behind a file-based backend
    pub fn create_object_store(config: &StoreConfig) -> Result<Arc<dyn ObjectStore>> {
        match config.backend {
            StorageBackend::Local => {
                let path = config.path.as_deref().ok_or_else(|| {
                    Error::Config("STORAGE_PATH required when STORAGE_BACKEND=local".to_string())
                })?;
                std::fs::create_dir_all(path)?;

                info!(path = %path, "Using local filesystem store");
                Ok(Arc::new(LocalFileSystem::new_with_prefix(path)?))
            }
            StorageBackend::S3 => {
                let bucket = config.bucket.as_deref().ok_or_else(|| {
                    Error::Config("S3_BUCKET required when STORAGE_BACKEND=s3".to_string())
                })?;

                info!(bucket = %bucket, region = %config.region, "Using S3 object store");

                let mut builder = AmazonS3Builder::from_env()
                    .with_bucket_name(bucket)
                    .with_region(&config.region);

                // Custom endpoints (MinIO, LocalStack)
                if let Some(endpoint) = &config.endpoint {
                    info!(endpoint = %endpoint, "Using custom S3 endpoint");
                    builder = builder.with_endpoint(endpoint).with_allow_http(true);
                }

                Ok(Arc::new(builder.build()?))
            }
            StorageBackend::Memory => Err(Error::Config(
                "the memory backend has no object store".to_string(),
            )),
        }
    }

    /// Wire the table manager and both request handlers over a gateway
    pub fn create_api_state(config: &Config, store: Arc<dyn StoreGateway>) -> ApiState {
        let descriptor = TableDescriptor::for_storage_rows(config.table.table_ref());
        let tables = Arc::new(TableManager::new(
            store.clone(),
            descriptor,
            config.readiness.clone(),
        ));
        let ingester = Arc::new(Ingester::new(store.clone(), tables.clone()));
        let query_node = Arc::new(QueryNode::new(store, config.table.table_ref()));

        ApiState {
            ingester,
            query_node,
            tables,
            config: config.api.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[derive(Parser, Debug)]
    struct TestArgs {
        #[command(flatten)]
        table: TableArgs,
        #[command(flatten)]
        store: StoreArgs,
    }

    #[test]
    fn test_args_map_to_config() {
        let args = TestArgs::try_parse_from([
            "bridge",
            "--project",
            "acme",
            "--dataset",
            "prom",
            "--storage-backend",
            "local",
            "--storage-path",
            "/tmp/prom",
        ])
        .unwrap();

        let table: TableConfig = args.table.into();
        let store: StoreConfig = args.store.into();

        assert_eq!(table.table_ref().to_string(), "acme.prom.metrics");
        assert_eq!(store.backend, StorageBackend::Local);
        assert_eq!(store.path.as_deref(), Some("/tmp/prom"));
    }

    #[test]
    fn test_unknown_backend_rejected() {
        let result = TestArgs::try_parse_from([
            "bridge",
            "--project",
            "acme",
            "--storage-backend",
            "gcs",
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn test_local_backend_requires_path() {
        let config = StoreConfig {
            backend: StorageBackend::Local,
            ..Default::default()
        };
        let err = ComponentFactory::create_store_gateway("p", &config)
            .err()
            .unwrap();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_s3_backend_requires_bucket() {
        let config = StoreConfig {
            backend: StorageBackend::S3,
            ..Default::default()
        };
        assert!(ComponentFactory::create_store_gateway("p", &config).is_err());
    }

    #[test]
    fn test_local_backend_creates_directory() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("store");
        let config = StoreConfig {
            backend: StorageBackend::Local,
            path: Some(path.to_string_lossy().into_owned()),
            ..Default::default()
        };

        ComponentFactory::create_store_gateway("p", &config).unwrap();
        assert!(path.is_dir());
    }
}
