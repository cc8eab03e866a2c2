//! Storage rows to Arrow record batches and Parquet files, and back

use crate::schema::{
    LabelSet, StorageRow, TableSchema, LABELS_FIELD, LABEL_NAME_FIELD, LABEL_VALUE_FIELD,
    NAME_FIELD, TIMESTAMP_FIELD, VALUE_FIELD,
};
use crate::schema::{millis_to_datetime, Label};
use crate::{Error, Result};

use arrow_array::builder::{ArrayBuilder, ListBuilder, StringBuilder, StructBuilder};
use arrow_array::cast::AsArray;
use arrow_array::types::{Float64Type, TimestampMillisecondType};
use arrow_array::{Array, ArrayRef, Float64Array, RecordBatch, StringArray, TimestampMillisecondArray};
use arrow_schema::{DataType, FieldRef, Fields, SchemaRef};
use bytes::Bytes;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use parquet::arrow::ArrowWriter;
use parquet::basic::{Compression, ZstdLevel};
use parquet::file::properties::{EnabledStatistics, WriterProperties, WriterVersion};
use std::sync::Arc;

/// Converts storage rows to and from Parquet
pub struct RowCodec {
    schema: SchemaRef,
    label_item: FieldRef,
    label_fields: Fields,
    props: WriterProperties,
}

impl RowCodec {
    pub fn new() -> Self {
        let schema = TableSchema::storage_rows().arrow_schema();
        let (label_item, label_fields) = label_layout(&schema);

        Self {
            schema,
            label_item,
            label_fields,
            props: Self::build_writer_properties(),
        }
    }

    fn build_writer_properties() -> WriterProperties {
        WriterProperties::builder()
            .set_writer_version(WriterVersion::PARQUET_2_0)
            .set_compression(Compression::ZSTD(
                ZstdLevel::try_new(3).unwrap_or_default(),
            ))
            // Label names and metric names repeat heavily within a file
            .set_dictionary_enabled(true)
            .set_statistics_enabled(EnabledStatistics::Page)
            .set_max_row_group_size(500_000)
            .build()
    }

    pub fn arrow_schema(&self) -> SchemaRef {
        self.schema.clone()
    }

    /// Build a record batch in the table layout
    pub fn to_record_batch(&self, rows: &[StorageRow]) -> Result<RecordBatch> {
        let names = StringArray::from_iter_values(rows.iter().map(|r| r.name.as_str()));
        let values = Float64Array::from_iter_values(rows.iter().map(|r| r.value));
        let timestamps =
            TimestampMillisecondArray::from_iter_values(rows.iter().map(|r| r.timestamp_ms()))
                .with_timezone("UTC");

        let entry_builders: Vec<Box<dyn ArrayBuilder>> =
            vec![Box::new(StringBuilder::new()), Box::new(StringBuilder::new())];
        let mut labels = ListBuilder::new(StructBuilder::new(
            self.label_fields.clone(),
            entry_builders,
        ))
        .with_field(self.label_item.clone());

        for row in rows {
            let entries = labels.values();
            for label in row.labels.iter() {
                entries
                    .field_builder::<StringBuilder>(0)
                    .ok_or_else(|| Error::Internal("label name builder missing".into()))?
                    .append_value(&label.name);
                entries
                    .field_builder::<StringBuilder>(1)
                    .ok_or_else(|| Error::Internal("label value builder missing".into()))?
                    .append_value(&label.value);
                entries.append(true);
            }
            labels.append(true);
        }

        let columns: Vec<ArrayRef> = vec![
            Arc::new(names),
            Arc::new(labels.finish()),
            Arc::new(values),
            Arc::new(timestamps),
        ];

        Ok(RecordBatch::try_new(self.schema.clone(), columns)?)
    }

    /// Decode a record batch in the table layout
    pub fn from_record_batch(&self, batch: &RecordBatch) -> Result<Vec<StorageRow>> {
        let names = column(batch, NAME_FIELD)?
            .as_string_opt::<i32>()
            .ok_or_else(|| invalid(NAME_FIELD))?;
        let labels = column(batch, LABELS_FIELD)?
            .as_list_opt::<i32>()
            .ok_or_else(|| invalid(LABELS_FIELD))?;
        let values = column(batch, VALUE_FIELD)?
            .as_primitive_opt::<Float64Type>()
            .ok_or_else(|| invalid(VALUE_FIELD))?;
        let timestamps = column(batch, TIMESTAMP_FIELD)?
            .as_primitive_opt::<TimestampMillisecondType>()
            .ok_or_else(|| invalid(TIMESTAMP_FIELD))?;

        let mut rows = Vec::with_capacity(batch.num_rows());
        for i in 0..batch.num_rows() {
            let entries = labels.value(i);
            let entries = entries
                .as_struct_opt()
                .ok_or_else(|| invalid(LABELS_FIELD))?;
            let label_names = entries
                .column_by_name(LABEL_NAME_FIELD)
                .and_then(|c| c.as_string_opt::<i32>())
                .ok_or_else(|| invalid(LABELS_FIELD))?;
            let label_values = entries
                .column_by_name(LABEL_VALUE_FIELD)
                .and_then(|c| c.as_string_opt::<i32>())
                .ok_or_else(|| invalid(LABELS_FIELD))?;

            let label_set = LabelSet::new(
                (0..entries.len())
                    .map(|j| Label::new(label_names.value(j), label_values.value(j)))
                    .collect(),
            );

            let millis = timestamps.value(i);
            let timestamp = millis_to_datetime(millis).ok_or_else(|| {
                Error::Serialization(format!("stored timestamp {} out of range", millis))
            })?;

            rows.push(StorageRow {
                name: names.value(i).to_string(),
                labels: label_set,
                value: values.value(i),
                timestamp,
            });
        }

        Ok(rows)
    }

    /// Encode rows as a Parquet file
    pub fn write_parquet(&self, rows: &[StorageRow]) -> Result<Bytes> {
        let batch = self.to_record_batch(rows)?;
        let mut buffer = Vec::new();

        {
            let mut writer =
                ArrowWriter::try_new(&mut buffer, batch.schema(), Some(self.props.clone()))?;
            writer.write(&batch)?;
            writer.close()?;
        }

        Ok(Bytes::from(buffer))
    }

    /// Decode every row of a Parquet file
    pub fn read_parquet(&self, bytes: Bytes) -> Result<Vec<StorageRow>> {
        let reader = ParquetRecordBatchReaderBuilder::try_new(bytes)?
            .with_batch_size(8192)
            .build()?;

        let mut rows = Vec::new();
        for batch in reader {
            rows.extend(self.from_record_batch(&batch?)?);
        }
        Ok(rows)
    }
}

impl Default for RowCodec {
    fn default() -> Self {
        Self::new()
    }
}

fn label_layout(schema: &SchemaRef) -> (FieldRef, Fields) {
    let item = match schema.field_with_name(LABELS_FIELD).map(|f| f.data_type()) {
        Ok(DataType::List(item)) => item.clone(),
        other => unreachable!("labels column is declared as a list, got {:?}", other),
    };
    let fields = match item.data_type() {
        DataType::Struct(fields) => fields.clone(),
        other => unreachable!("label entries are declared as a struct, got {:?}", other),
    };
    (item, fields)
}

fn column<'a>(batch: &'a RecordBatch, name: &str) -> Result<&'a ArrayRef> {
    batch
        .column_by_name(name)
        .ok_or_else(|| Error::Serialization(format!("missing column '{}'", name)))
}

fn invalid(name: &str) -> Error {
    Error::Serialization(format!("column '{}' has an unexpected type", name))
}
