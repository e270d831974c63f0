use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use crate::record::{FlatRecord, Schema};

use super::ExportError;
use super::writer::FormatWriter;

/// Line-delimited JSON. Schema-less: every key of every record is written.
#[derive(Default)]
pub struct JsonlWriter {
    out: Option<BufWriter<File>>,
}

impl JsonlWriter {
    pub fn new() -> Self {
        Self::default()
    }
}

impl FormatWriter for JsonlWriter {
    fn init(&mut self, path: &Path, _schema: &Schema) -> Result<(), ExportError> {
        self.out = Some(BufWriter::new(File::create(path)?));
        Ok(())
    }

    fn write(&mut self, record: &FlatRecord) -> Result<(), ExportError> {
        let out = self.out.as_mut().ok_or(ExportError::Closed)?;
        serde_json::to_writer(&mut *out, record)?;
        out.write_all(b"\n")?;
        Ok(())
    }

    fn close(&mut self) -> Result<(), ExportError> {
        if let Some(mut out) = self.out.take() {
            out.flush()?;
        }
        Ok(())
    }
}
