use serde::{Deserialize, Serialize};

use super::{AcceleratorRecord, ContainerMetrics, ProcessRecord, SystemMetrics};
use crate::scraper::ScrapeResult;

/// One sampling cycle's dynamic measurements.
///
/// The accelerator and process lists vary in length between cycles as
/// devices and processes come and go.
#[derive(Clone, Serialize, Deserialize, Debug, PartialEq, Default)]
pub struct Snapshot {
    /// Cycle start, nanoseconds since epoch.
    pub timestamp: i64,
    pub system: SystemMetrics,
    /// `None` when the container collector is disabled.
    pub container: Option<ContainerMetrics>,
    pub accelerators: Vec<AcceleratorRecord>,
    pub processes: Vec<ProcessRecord>,
    /// `None` when the inference-engine scraper is disabled.
    pub inference: Option<ScrapeResult>,
}
