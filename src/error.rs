//! Error types for prombridge

use std::fmt;
use std::time::Duration;

/// Result type alias for prombridge operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for prombridge
#[derive(Debug)]
pub enum Error {
    /// Request envelope is not valid snappy
    Decompression(String),
    /// Request payload is not a valid protobuf message
    MalformedMessage(String),
    /// A read matcher could not be compiled
    InvalidMatcher(String),
    /// Existence probe against the store failed
    Probe(String),
    /// Dataset is missing and auto-creation is disabled
    DatasetNotFound(String),
    /// Create was issued for a table that already exists
    TableAlreadyExists(String),
    /// Table creation failed
    TableCreation(String),
    /// Table did not become visible within the readiness budget
    ReadinessTimeout { table: String, waited: Duration },
    /// Row insertion failed (whole request)
    StoreWrite(String),
    /// Row retrieval failed (whole request)
    StoreQuery(String),
    /// Request deadline elapsed before the store answered
    DeadlineExceeded,
    /// Request was cancelled by the caller
    Cancelled,
    /// Arrow-related errors
    Arrow(arrow_schema::ArrowError),
    /// Parquet-related errors
    Parquet(parquet::errors::ParquetError),
    /// Object store errors
    ObjectStore(object_store::Error),
    /// IO errors
    Io(std::io::Error),
    /// Serialization errors
    Serialization(String),
    /// Configuration errors
    Config(String),
    /// Internal error
    Internal(String),
}

impl Error {
    /// Whether the request itself was at fault.
    ///
    /// Client errors are rejected without touching the store and must not be
    /// retried by the sender.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Error::Decompression(_) | Error::MalformedMessage(_) | Error::InvalidMatcher(_)
        )
    }

    /// Whether the failure concerns table readiness rather than the data.
    pub fn is_readiness_error(&self) -> bool {
        matches!(
            self,
            Error::Probe(_)
                | Error::DatasetNotFound(_)
                | Error::TableCreation(_)
                | Error::ReadinessTimeout { .. }
        )
    }

    /// Short stable label for metrics and logs
    pub fn kind(&self) -> &'static str {
        match self {
            Error::Decompression(_) => "decompression",
            Error::MalformedMessage(_) => "malformed_message",
            Error::InvalidMatcher(_) => "invalid_matcher",
            Error::Probe(_) => "probe",
            Error::DatasetNotFound(_) => "dataset_not_found",
            Error::TableAlreadyExists(_) => "table_already_exists",
            Error::TableCreation(_) => "table_creation",
            Error::ReadinessTimeout { .. } => "readiness_timeout",
            Error::StoreWrite(_) => "store_write",
            Error::StoreQuery(_) => "store_query",
            Error::DeadlineExceeded => "deadline_exceeded",
            Error::Cancelled => "cancelled",
            Error::Arrow(_) => "arrow",
            Error::Parquet(_) => "parquet",
            Error::ObjectStore(_) => "object_store",
            Error::Io(_) => "io",
            Error::Serialization(_) => "serialization",
            Error::Config(_) => "config",
            Error::Internal(_) => "internal",
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Arrow(e) => Some(e),
            Error::Parquet(e) => Some(e),
            Error::ObjectStore(e) => Some(e),
            Error::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Decompression(msg) => write!(f, "Decompression error: {}", msg),
            Error::MalformedMessage(msg) => write!(f, "Malformed message: {}", msg),
            Error::InvalidMatcher(msg) => write!(f, "Invalid matcher: {}", msg),
            Error::Probe(msg) => write!(f, "Existence probe failed: {}", msg),
            Error::DatasetNotFound(dataset) => write!(f, "Dataset not found: {}", dataset),
            Error::TableAlreadyExists(table) => write!(f, "Table already exists: {}", table),
            Error::TableCreation(msg) => write!(f, "Table creation failed: {}", msg),
            Error::ReadinessTimeout { table, waited } => {
                write!(f, "Table {} not ready after {:?}", table, waited)
            }
            Error::StoreWrite(msg) => write!(f, "Store write failed: {}", msg),
            Error::StoreQuery(msg) => write!(f, "Store query failed: {}", msg),
            Error::DeadlineExceeded => write!(f, "Request deadline exceeded"),
            Error::Cancelled => write!(f, "Request cancelled"),
            Error::Arrow(e) => write!(f, "Arrow error: {}", e),
            Error::Parquet(e) => write!(f, "Parquet error: {}", e),
            Error::ObjectStore(e) => write!(f, "Object store error: {}", e),
            Error::Io(e) => write!(f, "IO error: {}", e),
            Error::Serialization(msg) => write!(f, "Serialization error: {}", msg),
            Error::Config(msg) => write!(f, "Configuration error: {}", msg),
            Error::Internal(msg) => write!(f, "Internal error: {}", msg),
        }
    }
}

impl From<arrow_schema::ArrowError> for Error {
    fn from(e: arrow_schema::ArrowError) -> Self {
        Error::Arrow(e)
    }
}

impl From<parquet::errors::ParquetError> for Error {
    fn from(e: parquet::errors::ParquetError) -> Self {
        Error::Parquet(e)
    }
}

impl From<object_store::Error> for Error {
    fn from(e: object_store::Error) -> Self {
        Error::ObjectStore(e)
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Io(e)
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

impl From<snap::Error> for Error {
    fn from(e: snap::Error) -> Self {
        Error::Decompression(e.to_string())
    }
}

impl From<prost::DecodeError> for Error {
    fn from(e: prost::DecodeError) -> Self {
        Error::MalformedMessage(e.to_string())
    }
}

impl From<regex::Error> for Error {
    fn from(e: regex::Error) -> Self {
        Error::InvalidMatcher(e.to_string())
    }
}
