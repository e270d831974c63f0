//! Multi-format record exporter.
//!
//! Two modes:
//!
//! - **Streaming**: each record is written straight to the output file.
//!   The schema is frozen from the first record plus any declared
//!   columns; keys that show up later are dropped (and logged once).
//! - **Batch**: each cycle goes to a numbered snapshot file. `finalize`
//!   reads them back, computes the union schema over every record and
//!   writes the output in one pass, so schema drift is harmless.
//!
//! Output files live in `output_dir`:
//!
//! ```text
//! <session>.json               static info
//! <session>.<ext>              records (jsonl | parquet | csv | tsv)
//! <session>-snapshots/         batch intermediates, removed by cleanup
//! ```

mod columnar;
mod delimited;
mod jsonl;
mod snapshot_file;
mod writer;

use std::collections::BTreeSet;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use arrow_schema::ArrowError;
use tracing::{debug, error, info, warn};

use crate::config::ConfigError;
use crate::model::StaticInfo;
use crate::record::{FlatRecord, Schema, record_timestamp};

pub use snapshot_file::SnapshotStore;
pub use writer::{FormatWriter, coerce, new_writer};

/// Error type for export failures.
#[derive(Debug)]
pub enum ExportError {
    Io(std::io::Error),
    Json(serde_json::Error),
    Csv(csv::Error),
    Arrow(ArrowError),
    Parquet(::parquet::errors::ParquetError),
    /// Write after the exporter or writer was closed.
    Closed,
}

impl fmt::Display for ExportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExportError::Io(e) => write!(f, "I/O error: {}", e),
            ExportError::Json(e) => write!(f, "JSON error: {}", e),
            ExportError::Csv(e) => write!(f, "CSV error: {}", e),
            ExportError::Arrow(e) => write!(f, "Arrow error: {}", e),
            ExportError::Parquet(e) => write!(f, "Parquet error: {}", e),
            ExportError::Closed => write!(f, "exporter is closed"),
        }
    }
}

impl std::error::Error for ExportError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ExportError::Io(e) => Some(e),
            ExportError::Json(e) => Some(e),
            ExportError::Csv(e) => Some(e),
            ExportError::Arrow(e) => Some(e),
            ExportError::Parquet(e) => Some(e),
            ExportError::Closed => None,
        }
    }
}

impl From<std::io::Error> for ExportError {
    fn from(e: std::io::Error) -> Self {
        ExportError::Io(e)
    }
}

impl From<serde_json::Error> for ExportError {
    fn from(e: serde_json::Error) -> Self {
        ExportError::Json(e)
    }
}

impl From<csv::Error> for ExportError {
    fn from(e: csv::Error) -> Self {
        ExportError::Csv(e)
    }
}

impl From<ArrowError> for ExportError {
    fn from(e: ArrowError) -> Self {
        ExportError::Arrow(e)
    }
}

impl From<::parquet::errors::ParquetError> for ExportError {
    fn from(e: ::parquet::errors::ParquetError) -> Self {
        ExportError::Parquet(e)
    }
}

/// On-disk output format.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ExportFormat {
    #[default]
    Jsonl,
    Parquet,
    Csv,
    Tsv,
}

impl ExportFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            ExportFormat::Jsonl => "jsonl",
            ExportFormat::Parquet => "parquet",
            ExportFormat::Csv => "csv",
            ExportFormat::Tsv => "tsv",
        }
    }

    /// Formats that write every key of every record.
    pub fn is_schemaless(&self) -> bool {
        matches!(self, ExportFormat::Jsonl)
    }
}

impl FromStr for ExportFormat {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "jsonl" | "ndjson" => Ok(ExportFormat::Jsonl),
            "parquet" => Ok(ExportFormat::Parquet),
            "csv" => Ok(ExportFormat::Csv),
            "tsv" => Ok(ExportFormat::Tsv),
            _ => Err(ConfigError::UnknownFormat(s.to_string())),
        }
    }
}

impl fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ExportMode {
    Streaming,
    #[default]
    Batch,
}

impl FromStr for ExportMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "stream" | "streaming" => Ok(ExportMode::Streaming),
            "batch" => Ok(ExportMode::Batch),
            _ => Err(ConfigError::UnknownMode(s.to_string())),
        }
    }
}

impl fmt::Display for ExportMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExportMode::Streaming => f.write_str("stream"),
            ExportMode::Batch => f.write_str("batch"),
        }
    }
}

/// Streaming writer state. The writer is created on the first record.
struct StreamState {
    declared: Vec<String>,
    schema: Option<Schema>,
    writer: Option<Box<dyn FormatWriter>>,
    dropped: BTreeSet<String>,
}

enum Sink {
    Streaming(StreamState),
    Batch(SnapshotStore),
}

pub struct Exporter {
    output_dir: PathBuf,
    session_id: String,
    format: ExportFormat,
    mode: ExportMode,
    output_path: PathBuf,
    sink: Sink,
    finalized: bool,
    rows_written: u64,
    coercions: u64,
}

impl Exporter {
    /// Creates the output directory tree and prepares the sink.
    pub fn open(
        output_dir: impl Into<PathBuf>,
        session_id: &str,
        format: ExportFormat,
        mode: ExportMode,
    ) -> Result<Self, ExportError> {
        let output_dir = output_dir.into();
        std::fs::create_dir_all(&output_dir)?;
        let output_path = output_dir.join(format!("{}.{}", session_id, format.extension()));

        let sink = match mode {
            ExportMode::Streaming => Sink::Streaming(StreamState {
                declared: Vec::new(),
                schema: None,
                writer: None,
                dropped: BTreeSet::new(),
            }),
            ExportMode::Batch => Sink::Batch(SnapshotStore::open(
                output_dir.join(format!("{}-snapshots", session_id)),
                session_id,
            )?),
        };

        debug!(
            "Exporter opened: dir={}, format={}, mode={}",
            output_dir.display(),
            format,
            mode
        );

        Ok(Self {
            output_dir,
            session_id: session_id.to_string(),
            format,
            mode,
            output_path,
            sink,
            finalized: false,
            rows_written: 0,
            coercions: 0,
        })
    }

    /// Columns added to the streaming schema when it is frozen.
    pub fn with_declared_columns(mut self, columns: Vec<String>) -> Self {
        if let Sink::Streaming(state) = &mut self.sink {
            state.declared = columns;
        }
        self
    }

    pub fn format(&self) -> ExportFormat {
        self.format
    }

    pub fn mode(&self) -> ExportMode {
        self.mode
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// Path of the record output file. It exists once a record is written.
    pub fn output_path(&self) -> &Path {
        &self.output_path
    }

    pub fn static_path(&self) -> PathBuf {
        self.output_dir.join(format!("{}.json", self.session_id))
    }

    /// Rows in the output file (batch mode: known after finalize).
    pub fn rows_written(&self) -> u64 {
        self.rows_written
    }

    /// Values coerced into a column of another kind.
    pub fn coercion_count(&self) -> u64 {
        self.coercions
    }

    pub fn is_finalized(&self) -> bool {
        self.finalized
    }

    /// Writes the run-constant info as pretty JSON to `<session>.json`.
    pub fn save_static(&self, info: &StaticInfo) -> Result<PathBuf, ExportError> {
        let path = self.static_path();
        let text = serde_json::to_string_pretty(info)?;
        std::fs::write(&path, text)?;
        Ok(path)
    }

    pub fn delta_path(&self) -> PathBuf {
        self.output_dir.join(format!("{}-delta.json", self.session_id))
    }

    /// Writes a run delta record as pretty JSON to `<session>-delta.json`.
    pub fn save_delta(&self, record: &FlatRecord) -> Result<PathBuf, ExportError> {
        let path = self.delta_path();
        std::fs::write(&path, serde_json::to_string_pretty(record)?)?;
        Ok(path)
    }

    /// Persists one cycle.
    pub fn write_cycle(&mut self, records: &[FlatRecord]) -> Result<(), ExportError> {
        if self.finalized {
            return Err(ExportError::Closed);
        }
        if records.is_empty() {
            return Ok(());
        }

        match &mut self.sink {
            Sink::Batch(store) => {
                store.append(records)?;
            }
            Sink::Streaming(state) => {
                for record in records {
                    if state.writer.is_none() {
                        let schema = Schema::from_record(record).with_declared(&state.declared);
                        let mut writer = new_writer(self.format);
                        writer.init(&self.output_path, &schema)?;
                        debug!(
                            "Streaming schema frozen with {} columns: {}",
                            schema.len(),
                            self.output_path.display()
                        );
                        state.schema = Some(schema);
                        state.writer = Some(writer);
                    }

                    if let (false, Some(schema)) = (self.format.is_schemaless(), &state.schema) {
                        for key in record.keys() {
                            if !schema.contains(key) && state.dropped.insert(key.clone()) {
                                warn!(
                                    "Dropping field {} in streaming mode: not in the schema fixed by the first record (declare it to keep it)",
                                    key
                                );
                            }
                        }
                    }

                    if let Some(writer) = state.writer.as_mut() {
                        writer.write(record)?;
                        self.rows_written += 1;
                    }
                }
            }
        }
        Ok(())
    }

    /// Keys dropped by the frozen streaming schema so far.
    pub fn dropped_fields(&self) -> Vec<String> {
        match &self.sink {
            Sink::Streaming(state) => state.dropped.iter().cloned().collect(),
            Sink::Batch(_) => Vec::new(),
        }
    }

    /// Completes the output file. Repeated calls are no-ops.
    ///
    /// Streaming closes the writer. Batch reads every snapshot file back,
    /// orders records by timestamp, builds the union schema and writes
    /// the output in one pass; with no records no output is written.
    pub fn finalize(&mut self) -> Result<(), ExportError> {
        if self.finalized {
            return Ok(());
        }
        self.finalized = true;

        match &mut self.sink {
            Sink::Streaming(state) => {
                if let Some(mut writer) = state.writer.take() {
                    writer.close()?;
                    self.coercions += writer.coercions();
                }
                if !state.dropped.is_empty() {
                    warn!(
                        "{} fields were dropped by the streaming schema",
                        state.dropped.len()
                    );
                }
                let columns = state.schema.as_ref().map_or(0, Schema::len);
                info!(
                    rows = self.rows_written,
                    columns,
                    "Export finalized: {}",
                    self.output_path.display()
                );
            }
            Sink::Batch(store) => {
                let mut records = store.read_all()?;
                if records.is_empty() {
                    info!("No records collected, skipping output file");
                    return Ok(());
                }
                records.sort_by_key(record_timestamp);

                let schema = Schema::union(&records);
                let mut writer = new_writer(self.format);
                writer.init(&self.output_path, &schema)?;
                for record in &records {
                    writer.write(record)?;
                    self.rows_written += 1;
                }
                writer.close()?;
                self.coercions += writer.coercions();

                info!(
                    rows = self.rows_written,
                    columns = schema.len(),
                    "Export finalized: {}",
                    self.output_path.display()
                );
            }
        }

        if self.coercions > 0 {
            warn!("{} values were coerced to their column type", self.coercions);
        }
        Ok(())
    }

    /// Removes intermediate snapshot files. Snapshot files are kept until
    /// `finalize` has consumed them.
    pub fn cleanup(&mut self) -> Result<(), ExportError> {
        match &self.sink {
            Sink::Batch(store) if self.finalized => store.remove_all(),
            Sink::Batch(_) => {
                debug!("Cleanup skipped: export not finalized");
                Ok(())
            }
            Sink::Streaming(_) => Ok(()),
        }
    }
}

impl Drop for Exporter {
    fn drop(&mut self) {
        if let Err(e) = self.finalize() {
            error!("Failed to finalize export on drop: {}", e);
        }
    }
}
