//! Parquet writer with inferred, nullable column types.

use std::collections::HashSet;
use std::fs::File;
use std::path::Path;
use std::sync::Arc;

use arrow_array::builder::{BooleanBuilder, Float64Builder, Int64Builder, StringBuilder};
use arrow_array::{ArrayRef, RecordBatch};
use arrow_schema::{DataType, Field, Schema as ArrowSchema, SchemaRef};
use parquet::arrow::ArrowWriter;
use parquet::basic::{Compression, ZstdLevel};
use parquet::file::properties::{EnabledStatistics, WriterProperties, WriterVersion};
use tracing::{debug, warn};

use crate::record::{FlatRecord, FlatValue, Schema, ValueKind};

use super::ExportError;
use super::writer::{FormatWriter, coerce};

/// Rows buffered in column builders before a record batch is written.
const BATCH_ROWS: usize = 1024;

fn writer_properties() -> Result<WriterProperties, ExportError> {
    Ok(WriterProperties::builder()
        .set_writer_version(WriterVersion::PARQUET_2_0)
        .set_compression(Compression::ZSTD(ZstdLevel::try_new(3)?))
        .set_dictionary_enabled(true)
        .set_statistics_enabled(EnabledStatistics::Page)
        .set_bloom_filter_enabled(false)
        .build())
}

/// Column kind to Arrow type. Columns that never held a value are Utf8.
fn data_type(kind: Option<ValueKind>) -> DataType {
    match kind {
        Some(ValueKind::Integer) => DataType::Int64,
        Some(ValueKind::Floating) => DataType::Float64,
        Some(ValueKind::Boolean) => DataType::Boolean,
        Some(ValueKind::String) | None => DataType::Utf8,
    }
}

enum ColumnBuilder {
    Int(Int64Builder),
    Float(Float64Builder),
    Bool(BooleanBuilder),
    Str(StringBuilder),
}

impl ColumnBuilder {
    fn new(kind: Option<ValueKind>) -> Self {
        match kind {
            Some(ValueKind::Integer) => ColumnBuilder::Int(Int64Builder::new()),
            Some(ValueKind::Floating) => ColumnBuilder::Float(Float64Builder::new()),
            Some(ValueKind::Boolean) => ColumnBuilder::Bool(BooleanBuilder::new()),
            Some(ValueKind::String) | None => ColumnBuilder::Str(StringBuilder::new()),
        }
    }

    fn kind(&self) -> ValueKind {
        match self {
            ColumnBuilder::Int(_) => ValueKind::Integer,
            ColumnBuilder::Float(_) => ValueKind::Floating,
            ColumnBuilder::Bool(_) => ValueKind::Boolean,
            ColumnBuilder::Str(_) => ValueKind::String,
        }
    }

    /// Appends an already-coerced value, or null.
    fn append(&mut self, value: Option<FlatValue>) {
        match (self, value) {
            (ColumnBuilder::Int(b), Some(FlatValue::Int(v))) => b.append_value(v),
            (ColumnBuilder::Float(b), Some(FlatValue::Float(v))) => b.append_value(v),
            (ColumnBuilder::Bool(b), Some(FlatValue::Bool(v))) => b.append_value(v),
            (ColumnBuilder::Str(b), Some(FlatValue::Str(v))) => b.append_value(v),
            (ColumnBuilder::Int(b), _) => b.append_null(),
            (ColumnBuilder::Float(b), _) => b.append_null(),
            (ColumnBuilder::Bool(b), _) => b.append_null(),
            (ColumnBuilder::Str(b), _) => b.append_null(),
        }
    }

    fn finish(&mut self) -> ArrayRef {
        match self {
            ColumnBuilder::Int(b) => Arc::new(b.finish()),
            ColumnBuilder::Float(b) => Arc::new(b.finish()),
            ColumnBuilder::Bool(b) => Arc::new(b.finish()),
            ColumnBuilder::Str(b) => Arc::new(b.finish()),
        }
    }
}

/// Columnar writer. Column kinds come from the schema; values of another
/// kind are coerced and counted.
pub struct ParquetFileWriter {
    names: Vec<String>,
    builders: Vec<ColumnBuilder>,
    arrow_schema: Option<SchemaRef>,
    writer: Option<ArrowWriter<File>>,
    buffered: usize,
    coercions: u64,
    conflicted: HashSet<String>,
}

impl ParquetFileWriter {
    pub fn new() -> Self {
        Self {
            names: Vec::new(),
            builders: Vec::new(),
            arrow_schema: None,
            writer: None,
            buffered: 0,
            coercions: 0,
            conflicted: HashSet::new(),
        }
    }

    fn flush(&mut self) -> Result<(), ExportError> {
        if self.buffered == 0 {
            return Ok(());
        }
        let (Some(writer), Some(schema)) = (self.writer.as_mut(), self.arrow_schema.as_ref()) else {
            return Err(ExportError::Closed);
        };
        let columns: Vec<ArrayRef> = self.builders.iter_mut().map(|b| b.finish()).collect();
        let batch = RecordBatch::try_new(schema.clone(), columns)?;
        writer.write(&batch)?;
        self.buffered = 0;
        Ok(())
    }

    fn note_conflict(&mut self, column: &str, value: &FlatValue, kind: ValueKind) {
        self.coercions += 1;
        if self.conflicted.insert(column.to_string()) {
            warn!(
                "column {} is {} but got {} value {:?}; coercing",
                column,
                kind,
                value.kind(),
                value.to_text()
            );
        } else {
            debug!("coercing {} value in {} column {}", value.kind(), kind, column);
        }
    }
}

impl Default for ParquetFileWriter {
    fn default() -> Self {
        Self::new()
    }
}

impl FormatWriter for ParquetFileWriter {
    fn init(&mut self, path: &Path, schema: &Schema) -> Result<(), ExportError> {
        let fields: Vec<Field> = schema
            .columns()
            .iter()
            .map(|c| Field::new(c.name.clone(), data_type(c.kind), true))
            .collect();
        let arrow_schema: SchemaRef = Arc::new(ArrowSchema::new(fields));

        let file = File::create(path)?;
        let writer = ArrowWriter::try_new(file, arrow_schema.clone(), Some(writer_properties()?))?;

        self.names = schema.names().map(str::to_string).collect();
        self.builders = schema
            .columns()
            .iter()
            .map(|c| ColumnBuilder::new(c.kind))
            .collect();
        self.arrow_schema = Some(arrow_schema);
        self.writer = Some(writer);
        self.buffered = 0;
        Ok(())
    }

    fn write(&mut self, record: &FlatRecord) -> Result<(), ExportError> {
        if self.writer.is_none() {
            return Err(ExportError::Closed);
        }
        for i in 0..self.names.len() {
            let kind = self.builders[i].kind();
            let value = match record.get(&self.names[i]) {
                None => None,
                Some(v) if v.kind() == kind => Some(v.clone()),
                Some(v) => {
                    let name = self.names[i].clone();
                    self.note_conflict(&name, v, kind);
                    coerce(v, kind)
                }
            };
            self.builders[i].append(value);
        }
        self.buffered += 1;
        if self.buffered >= BATCH_ROWS {
            self.flush()?;
        }
        Ok(())
    }

    fn close(&mut self) -> Result<(), ExportError> {
        if self.writer.is_none() {
            return Ok(());
        }
        self.flush()?;
        if let Some(writer) = self.writer.take() {
            writer.close()?;
        }
        Ok(())
    }

    fn coercions(&self) -> u64 {
        self.coercions
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow_array::{Array, BooleanArray, Float64Array, Int64Array, StringArray};
    use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;

    fn rec(pairs: &[(&str, FlatValue)]) -> FlatRecord {
        pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
    }

    fn read_back(path: &Path) -> Vec<RecordBatch> {
        let file = File::open(path).unwrap();
        ParquetRecordBatchReaderBuilder::try_new(file)
            .unwrap()
            .build()
            .unwrap()
            .map(|b| b.unwrap())
            .collect()
    }

    #[test]
    fn test_inferred_types_and_nulls() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.parquet");

        let a = rec(&[
            ("i", FlatValue::Int(1)),
            ("f", FlatValue::Float(0.5)),
            ("b", FlatValue::Bool(true)),
            ("s", FlatValue::Str("x".into())),
        ]);
        let b = rec(&[("i", FlatValue::Int(2))]);
        let schema = Schema::union([&a, &b]);

        let mut w = ParquetFileWriter::new();
        w.init(&path, &schema).unwrap();
        w.write(&a).unwrap();
        w.write(&b).unwrap();
        w.close().unwrap();
        w.close().unwrap();

        let batches = read_back(&path);
        let total: usize = batches.iter().map(|b| b.num_rows()).sum();
        assert_eq!(total, 2);

        let batch = &batches[0];
        let schema = batch.schema();
        assert_eq!(schema.field_with_name("i").unwrap().data_type(), &DataType::Int64);
        assert_eq!(schema.field_with_name("f").unwrap().data_type(), &DataType::Float64);
        assert_eq!(schema.field_with_name("b").unwrap().data_type(), &DataType::Boolean);
        assert_eq!(schema.field_with_name("s").unwrap().data_type(), &DataType::Utf8);
        assert!(schema.fields().iter().all(|f| f.is_nullable()));

        let ints = batch
            .column_by_name("i")
            .unwrap()
            .as_any()
            .downcast_ref::<Int64Array>()
            .unwrap();
        assert_eq!(ints.value(0), 1);
        assert_eq!(ints.value(1), 2);

        let floats = batch
            .column_by_name("f")
            .unwrap()
            .as_any()
            .downcast_ref::<Float64Array>()
            .unwrap();
        assert!(floats.is_null(1));

        let bools = batch
            .column_by_name("b")
            .unwrap()
            .as_any()
            .downcast_ref::<BooleanArray>()
            .unwrap();
        assert!(bools.value(0));
        assert!(bools.is_null(1));

        let strs = batch
            .column_by_name("s")
            .unwrap()
            .as_any()
            .downcast_ref::<StringArray>()
            .unwrap();
        assert_eq!(strs.value(0), "x");
    }

    #[test]
    fn test_conflicting_values_are_coerced_and_counted() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.parquet");

        let first = rec(&[("n", FlatValue::Int(1)), ("s", FlatValue::Str("a".into()))]);
        let drift = rec(&[("n", FlatValue::Float(2.6)), ("s", FlatValue::Int(7))]);
        let bad = rec(&[("n", FlatValue::Str("nope".into()))]);
        let schema = Schema::union([&first, &drift, &bad]);

        let mut w = ParquetFileWriter::new();
        w.init(&path, &schema).unwrap();
        for r in [&first, &drift, &bad] {
            w.write(r).unwrap();
        }
        assert_eq!(w.coercions(), 3);
        w.close().unwrap();

        let batches = read_back(&path);
        let n = batches[0]
            .column_by_name("n")
            .unwrap()
            .as_any()
            .downcast_ref::<Int64Array>()
            .unwrap();
        assert_eq!(n.value(0), 1);
        assert_eq!(n.value(1), 3);
        assert!(n.is_null(2));

        let s = batches[0]
            .column_by_name("s")
            .unwrap()
            .as_any()
            .downcast_ref::<StringArray>()
            .unwrap();
        assert_eq!(s.value(1), "7");
    }

    #[test]
    fn test_declared_column_without_values_is_utf8() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.parquet");
        let a = rec(&[("x", FlatValue::Int(1))]);
        let schema = Schema::from_record(&a).with_declared(&["later".to_string()]);

        let mut w = ParquetFileWriter::new();
        w.init(&path, &schema).unwrap();
        w.write(&a).unwrap();
        w.close().unwrap();

        let batches = read_back(&path);
        let field = batches[0].schema().field_with_name("later").unwrap().clone();
        assert_eq!(field.data_type(), &DataType::Utf8);
        assert!(batches[0].column_by_name("later").unwrap().is_null(0));
    }

    #[test]
    fn test_many_rows_span_batches() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.parquet");
        let first = rec(&[("k", FlatValue::Int(0))]);

        let mut w = ParquetFileWriter::new();
        w.init(&path, &Schema::from_record(&first)).unwrap();
        for i in 0..(BATCH_ROWS as i64 * 2 + 5) {
            w.write(&rec(&[("k", FlatValue::Int(i))])).unwrap();
        }
        w.close().unwrap();

        let total: usize = read_back(&path).iter().map(|b| b.num_rows()).sum();
        assert_eq!(total, BATCH_ROWS * 2 + 5);
    }
}
