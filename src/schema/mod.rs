//! Row and table schema definitions
//!
//! A stored row carries the series' full label set next to its metric name,
//! value and timestamp. The table layout is declared statically here rather
//! than inferred from the row type at runtime.

mod rows;
mod table;

pub use rows::{
    datetime_to_millis, millis_to_datetime, Label, LabelSet, SamplePoint, StorageRow, WireSeries,
    METRIC_NAME_LABEL,
};
pub use table::{
    FieldMode, FieldType, SchemaField, TableDescriptor, TableRef, TableSchema, LABELS_FIELD,
    LABEL_NAME_FIELD, LABEL_VALUE_FIELD, NAME_FIELD, TIMESTAMP_FIELD, VALUE_FIELD,
};
