//! Profiler configuration.

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use tracing::warn;

use crate::export::{ExportFormat, ExportMode};
use crate::record::{FlattenOptions, RecordLayout};
use crate::scraper::{DEFAULT_SCRAPE_TIMEOUT, DEFAULT_SCRAPE_URL};

pub const DEFAULT_OUTPUT_DIR: &str = "./profiler-output";
pub const DEFAULT_INTERVAL: Duration = Duration::from_millis(100);
pub const DEFAULT_MAX_PROCESSES: usize = 64;
const MIN_INTERVAL: Duration = Duration::from_millis(1);

/// Error type for invalid configuration.
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigError {
    /// Sampling interval below 1ms.
    InvalidInterval(Duration),
    /// Subprocess requested with an empty argv.
    EmptyCommand,
    EmptySessionId,
    UnknownFormat(String),
    UnknownMode(String),
    UnknownLayout(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::InvalidInterval(d) => {
                write!(f, "sampling interval {:?} is below the 1ms minimum", d)
            }
            ConfigError::EmptyCommand => write!(f, "subprocess command is empty"),
            ConfigError::EmptySessionId => write!(f, "session id is empty"),
            ConfigError::UnknownFormat(s) => {
                write!(f, "unknown export format '{}' (expected jsonl, parquet, csv or tsv)", s)
            }
            ConfigError::UnknownMode(s) => {
                write!(f, "unknown export mode '{}' (expected batch or stream)", s)
            }
            ConfigError::UnknownLayout(s) => {
                write!(f, "unknown record layout '{}' (expected flatten or json)", s)
            }
        }
    }
}

impl std::error::Error for ConfigError {}

/// Enables or disables individual collectors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectorToggles {
    pub cpu: bool,
    pub memory: bool,
    pub disk: bool,
    pub network: bool,
    pub container: bool,
    pub processes: bool,
    pub accelerator: bool,
    /// Per-device process lists. Ignored when `accelerator` is off.
    pub accelerator_processes: bool,
    /// Inference-engine metric scrape.
    pub inference: bool,
}

impl Default for CollectorToggles {
    fn default() -> Self {
        Self {
            cpu: true,
            memory: true,
            disk: true,
            network: true,
            container: true,
            processes: true,
            accelerator: true,
            accelerator_processes: true,
            inference: true,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ProfilerConfig {
    pub output_dir: PathBuf,
    pub session_id: String,
    pub format: ExportFormat,
    pub mode: ExportMode,
    pub layout: RecordLayout,
    pub interval: Duration,
    /// Remove intermediate snapshot files after finalize.
    pub cleanup: bool,
    /// Write a first-to-last delta record next to the output on finalize.
    pub delta: bool,
    pub max_processes: usize,
    /// Columns added to the frozen streaming schema up front.
    pub declared_columns: Vec<String>,
    pub scrape_url: String,
    pub scrape_timeout: Duration,
    pub collectors: CollectorToggles,
    /// Supervised child argv.
    pub subprocess: Option<Vec<String>>,
    /// Listen for SIGINT/SIGTERM while running.
    pub handle_signals: bool,
    pub proc_path: PathBuf,
    pub cgroup_path: PathBuf,
}

impl Default for ProfilerConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from(DEFAULT_OUTPUT_DIR),
            session_id: uuid::Uuid::new_v4().to_string(),
            format: ExportFormat::Jsonl,
            mode: ExportMode::Batch,
            layout: RecordLayout::Flatten,
            interval: DEFAULT_INTERVAL,
            cleanup: true,
            delta: false,
            max_processes: DEFAULT_MAX_PROCESSES,
            declared_columns: Vec::new(),
            scrape_url: DEFAULT_SCRAPE_URL.to_string(),
            scrape_timeout: DEFAULT_SCRAPE_TIMEOUT,
            collectors: CollectorToggles::default(),
            subprocess: None,
            handle_signals: true,
            proc_path: PathBuf::from("/proc"),
            cgroup_path: PathBuf::from("/sys/fs/cgroup"),
        }
    }
}

impl ProfilerConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.interval < MIN_INTERVAL {
            return Err(ConfigError::InvalidInterval(self.interval));
        }
        if self.session_id.trim().is_empty() {
            return Err(ConfigError::EmptySessionId);
        }
        if self.subprocess.as_ref().is_some_and(|argv| argv.is_empty()) {
            return Err(ConfigError::EmptyCommand);
        }
        Ok(())
    }

    /// Validates and applies mode constraints.
    ///
    /// Streaming export cannot carry the JSON layout, so it is switched
    /// to flatten.
    pub fn validated(mut self) -> Result<Self, ConfigError> {
        self.validate()?;
        if self.mode == ExportMode::Streaming && self.layout != RecordLayout::Flatten {
            warn!("streaming mode requires the flatten layout; switching from {}", self.layout);
            self.layout = RecordLayout::Flatten;
        }
        Ok(self)
    }

    pub fn flatten_options(&self) -> FlattenOptions {
        FlattenOptions {
            layout: self.layout,
            max_processes: self.max_processes,
        }
    }
}
