//! Format writer abstraction and value coercion.

use std::path::Path;

use crate::record::{FlatRecord, FlatValue, Schema, ValueKind};

use super::columnar::ParquetFileWriter;
use super::delimited::DelimitedWriter;
use super::jsonl::JsonlWriter;
use super::{ExportError, ExportFormat};

/// One output format. Implemented once per format.
///
/// Lifecycle: `init` once, `write` per record, `close` once. `close` is
/// a no-op on a writer that is already closed.
pub trait FormatWriter: Send {
    /// Creates the output file at `path` for the given ordered columns.
    fn init(&mut self, path: &Path, schema: &Schema) -> Result<(), ExportError>;

    /// Writes one record. Keys outside the schema are ignored by
    /// tabular formats; missing keys become null/empty.
    fn write(&mut self, record: &FlatRecord) -> Result<(), ExportError>;

    fn close(&mut self) -> Result<(), ExportError>;

    /// Values coerced into a column of a different kind so far.
    fn coercions(&self) -> u64 {
        0
    }
}

/// Builds the writer for `format`.
pub fn new_writer(format: ExportFormat) -> Box<dyn FormatWriter> {
    match format {
        ExportFormat::Jsonl => Box::new(JsonlWriter::new()),
        ExportFormat::Csv => Box::new(DelimitedWriter::new(b',')),
        ExportFormat::Tsv => Box::new(DelimitedWriter::new(b'\t')),
        ExportFormat::Parquet => Box::new(ParquetFileWriter::new()),
    }
}

/// Converts `value` into a column of `kind`.
///
/// Numbers widen or round between integer and float, booleans become
/// 0/1, strings are parsed where possible and anything else is
/// stringified. `None` means the value cannot be represented and is
/// written as null.
pub fn coerce(value: &FlatValue, kind: ValueKind) -> Option<FlatValue> {
    match (kind, value) {
        (ValueKind::Integer, FlatValue::Int(v)) => Some(FlatValue::Int(*v)),
        (ValueKind::Integer, FlatValue::Float(v)) => Some(FlatValue::Int(v.round() as i64)),
        (ValueKind::Integer, FlatValue::Bool(v)) => Some(FlatValue::Int(i64::from(*v))),
        (ValueKind::Integer, FlatValue::Str(s)) => {
            let s = s.trim();
            s.parse::<i64>()
                .ok()
                .or_else(|| {
                    s.parse::<f64>()
                        .ok()
                        .filter(|f| f.is_finite())
                        .map(|f| f.round() as i64)
                })
                .map(FlatValue::Int)
        }

        (ValueKind::Floating, FlatValue::Int(v)) => Some(FlatValue::Float(*v as f64)),
        (ValueKind::Floating, FlatValue::Float(v)) => Some(FlatValue::float(*v)),
        (ValueKind::Floating, FlatValue::Bool(v)) => Some(FlatValue::Float(f64::from(u8::from(*v)))),
        (ValueKind::Floating, FlatValue::Str(s)) => s
            .trim()
            .parse::<f64>()
            .ok()
            .filter(|f| f.is_finite())
            .map(FlatValue::Float),

        (ValueKind::Boolean, FlatValue::Bool(v)) => Some(FlatValue::Bool(*v)),
        (ValueKind::Boolean, FlatValue::Int(v)) => Some(FlatValue::Bool(*v != 0)),
        (ValueKind::Boolean, FlatValue::Float(v)) => Some(FlatValue::Bool(*v != 0.0)),
        (ValueKind::Boolean, FlatValue::Str(s)) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "1" => Some(FlatValue::Bool(true)),
            "false" | "0" => Some(FlatValue::Bool(false)),
            _ => None,
        },

        (ValueKind::String, v) => Some(FlatValue::Str(v.to_text())),
    }
}
