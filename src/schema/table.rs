//! Table schema and descriptor definitions
//!
//! The schema mirrors [`StorageRow`](super::StorageRow) field for field and
//! is declared once, statically. Stores that need an Arrow representation
//! derive it with [`TableSchema::arrow_schema`].

use arrow_schema::{DataType, Field, Fields, Schema, SchemaRef, TimeUnit};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Standard field names
pub const NAME_FIELD: &str = "name";
pub const LABELS_FIELD: &str = "labels";
pub const LABEL_NAME_FIELD: &str = "name";
pub const LABEL_VALUE_FIELD: &str = "value";
pub const VALUE_FIELD: &str = "value";
pub const TIMESTAMP_FIELD: &str = "timestamp";

/// Storage type of a column
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FieldType {
    String,
    Float,
    Timestamp,
    Record(Vec<SchemaField>),
}

/// Column mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FieldMode {
    Required,
    Nullable,
    Repeated,
}

/// Column definition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaField {
    pub name: String,
    pub field_type: FieldType,
    pub mode: FieldMode,
}

impl SchemaField {
    pub fn new(name: impl Into<String>, field_type: FieldType, mode: FieldMode) -> Self {
        Self {
            name: name.into(),
            field_type,
            mode,
        }
    }

    pub fn required(name: impl Into<String>, field_type: FieldType) -> Self {
        Self::new(name, field_type, FieldMode::Required)
    }

    /// Convert to Arrow field
    pub fn to_field(&self) -> Field {
        let element = match &self.field_type {
            FieldType::String => DataType::Utf8,
            FieldType::Float => DataType::Float64,
            FieldType::Timestamp => DataType::Timestamp(TimeUnit::Millisecond, Some("UTC".into())),
            FieldType::Record(children) => DataType::Struct(
                children.iter().map(SchemaField::to_field).collect::<Fields>(),
            ),
        };

        match self.mode {
            FieldMode::Required => Field::new(&self.name, element, false),
            FieldMode::Nullable => Field::new(&self.name, element, true),
            FieldMode::Repeated => Field::new(
                &self.name,
                DataType::List(Arc::new(Field::new("item", element, false))),
                false,
            ),
        }
    }
}

/// Statically declared table layout
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableSchema {
    pub fields: Vec<SchemaField>,
}

impl TableSchema {
    /// Layout of [`StorageRow`](super::StorageRow)
    pub fn storage_rows() -> Self {
        Self {
            fields: vec![
                SchemaField::required(NAME_FIELD, FieldType::String),
                SchemaField::new(
                    LABELS_FIELD,
                    FieldType::Record(vec![
                        SchemaField::required(LABEL_NAME_FIELD, FieldType::String),
                        SchemaField::required(LABEL_VALUE_FIELD, FieldType::String),
                    ]),
                    FieldMode::Repeated,
                ),
                SchemaField::required(VALUE_FIELD, FieldType::Float),
                SchemaField::required(TIMESTAMP_FIELD, FieldType::Timestamp),
            ],
        }
    }

    pub fn field(&self, name: &str) -> Option<&SchemaField> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.field(name).is_some()
    }

    /// Get the Arrow schema
    pub fn arrow_schema(&self) -> SchemaRef {
        Arc::new(Schema::new(
            self.fields.iter().map(SchemaField::to_field).collect::<Vec<_>>(),
        ))
    }
}

/// Fully qualified table identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TableRef {
    pub project: String,
    pub dataset: String,
    pub table: String,
}

impl TableRef {
    pub fn new(
        project: impl Into<String>,
        dataset: impl Into<String>,
        table: impl Into<String>,
    ) -> Self {
        Self {
            project: project.into(),
            dataset: dataset.into(),
            table: table.into(),
        }
    }
}

impl fmt::Display for TableRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.project, self.dataset, self.table)
    }
}

/// Everything a store needs to create the destination table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableDescriptor {
    pub table: TableRef,
    pub schema: TableSchema,
    /// Column the table is time-partitioned on
    pub partition_field: String,
}

impl TableDescriptor {
    /// Descriptor for a storage-row table partitioned by timestamp
    pub fn for_storage_rows(table: TableRef) -> Self {
        Self {
            table,
            schema: TableSchema::storage_rows(),
            partition_field: TIMESTAMP_FIELD.to_string(),
        }
    }
}
