use std::fs::File;
use std::path::Path;

use crate::record::{FlatRecord, Schema};

use super::ExportError;
use super::writer::FormatWriter;

/// Comma- or tab-separated text with a header row.
///
/// Every row has exactly one field per schema column; a column the
/// record lacks is written as an empty field.
pub struct DelimitedWriter {
    delimiter: u8,
    columns: Vec<String>,
    out: Option<csv::Writer<File>>,
}

impl DelimitedWriter {
    pub fn new(delimiter: u8) -> Self {
        Self {
            delimiter,
            columns: Vec::new(),
            out: None,
        }
    }
}

impl FormatWriter for DelimitedWriter {
    fn init(&mut self, path: &Path, schema: &Schema) -> Result<(), ExportError> {
        self.columns = schema.names().map(str::to_string).collect();
        let mut out = csv::WriterBuilder::new()
            .delimiter(self.delimiter)
            .from_path(path)?;
        out.write_record(&self.columns)?;
        self.out = Some(out);
        Ok(())
    }

    fn write(&mut self, record: &FlatRecord) -> Result<(), ExportError> {
        let out = self.out.as_mut().ok_or(ExportError::Closed)?;
        let row = self
            .columns
            .iter()
            .map(|c| record.get(c).map(|v| v.to_text()).unwrap_or_default());
        out.write_record(row)?;
        Ok(())
    }

    fn close(&mut self) -> Result<(), ExportError> {
        if let Some(mut out) = self.out.take() {
            out.flush()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::FlatValue;

    fn rec(pairs: &[(&str, FlatValue)]) -> FlatRecord {
        pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
    }

    #[test]
    fn test_every_row_has_schema_width() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.csv");

        let full = rec(&[
            ("a", FlatValue::Int(1)),
            ("b", FlatValue::Str("x,y".into())),
            ("c", FlatValue::Float(0.5)),
        ]);
        let sparse = rec(&[("b", FlatValue::Bool(true))]);
        let schema = Schema::from_record(&full);

        let mut w = DelimitedWriter::new(b',');
        w.init(&path, &schema).unwrap();
        w.write(&full).unwrap();
        w.write(&sparse).unwrap();
        w.close().unwrap();

        let mut reader = csv::Reader::from_path(&path).unwrap();
        let headers = reader.headers().unwrap().clone();
        assert_eq!(headers.iter().collect::<Vec<_>>(), vec!["a", "b", "c"]);

        let rows: Vec<csv::StringRecord> = reader.records().map(|r| r.unwrap()).collect();
        assert_eq!(rows.len(), 2);
        for row in &rows {
            assert_eq!(row.len(), schema.len());
        }
        assert_eq!(&rows[0][1], "x,y");
        assert_eq!(rows[1].iter().collect::<Vec<_>>(), vec!["", "true", ""]);
    }

    #[test]
    fn test_tab_separated() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.tsv");
        let r = rec(&[("a", FlatValue::Int(1)), ("b", FlatValue::Int(2))]);

        let mut w = DelimitedWriter::new(b'\t');
        w.init(&path, &Schema::from_record(&r)).unwrap();
        w.write(&r).unwrap();
        w.close().unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        assert_eq!(text, "a\tb\n1\t2\n");
    }
}
