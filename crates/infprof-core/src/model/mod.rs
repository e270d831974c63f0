//! Measurement data model.
//!
//! - [`timed`]: `TimedValue`, the unit of every measurement
//! - [`system`]: host and container scalars
//! - [`accelerator`]: per-device dynamic and static records
//! - [`process`]: per-process records
//! - [`snapshot`]: the per-cycle `Snapshot`
//! - [`static_info`]: run-constant `StaticInfo`
//!
//! ```text
//! Snapshot
//!   ├── system: SystemMetrics           (fixed shape)
//!   ├── container: Option<...>          (fixed per run)
//!   ├── accelerators: Vec<AcceleratorRecord>   0..N, varies per cycle
//!   ├── processes: Vec<ProcessRecord>          0..M, varies per cycle
//!   └── inference: Option<ScrapeResult>
//! ```

mod accelerator;
mod process;
mod snapshot;
mod static_info;
mod system;
mod timed;

pub use accelerator::{
    AcceleratorRecord, AcceleratorStatic, DeviceProcess, DeviceProcessUtilization, LinkBandwidth,
};
pub use process::ProcessRecord;
pub use snapshot::Snapshot;
pub use static_info::StaticInfo;
pub use system::{ContainerMetrics, SystemMetrics};
pub use timed::{TimedValue, now_ns};
