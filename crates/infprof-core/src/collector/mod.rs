//! Collector layer: host, container, process and accelerator sampling.
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                        Collector                         │
//! │  procfs parsers      cgroup v2/v1       AcceleratorBackend│
//! │  /proc/stat, ...     cpu.stat, ...      (NoAccelerator)   │
//! │        └──────────────┬──────┘                           │
//! │                ┌──────▼──────┐                           │
//! │                │  FileSystem │ (trait)                   │
//! │                └──────┬──────┘                           │
//! └───────────────────────┼──────────────────────────────────┘
//!                  ┌──────┴──────┐
//!            ┌─────▼────┐  ┌─────▼────┐
//!            │  RealFs  │  │  MockFs  │
//!            └──────────┘  └──────────┘
//! ```
//!
//! ```
//! use infprof_core::collector::{Collector, MockFs};
//!
//! let mut collector = Collector::new(MockFs::typical_system(), "/proc", "/sys/fs/cgroup");
//! let snapshot = collector.collect_snapshot();
//! assert_eq!(snapshot.processes.len(), 2);
//! ```

pub mod accelerator;
pub mod cgroup;
#[allow(clippy::module_inception)]
mod collector;
pub mod mock;
pub mod procfs;
pub mod traits;

use std::path::PathBuf;

pub use accelerator::{AcceleratorBackend, NoAccelerator};
pub use collector::Collector;
pub use mock::MockFs;
pub use traits::{FileSystem, RealFs};

/// Error type for collector-layer failures that abort a run.
#[derive(Debug)]
pub enum CollectError {
    /// The proc filesystem root does not exist.
    ProcRootMissing(PathBuf),
    Io(std::io::Error),
}

impl std::fmt::Display for CollectError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CollectError::ProcRootMissing(p) => write!(f, "proc root {} not found", p.display()),
            CollectError::Io(e) => write!(f, "I/O error: {}", e),
        }
    }
}

impl std::error::Error for CollectError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CollectError::Io(e) => Some(e),
            CollectError::ProcRootMissing(_) => None,
        }
    }
}

impl From<std::io::Error> for CollectError {
    fn from(e: std::io::Error) -> Self {
        CollectError::Io(e)
    }
}
