//! Run-constant host information, collected once at startup.

use serde::{Deserialize, Serialize};

use super::AcceleratorStatic;

/// Static system information persisted as `<session>.json`.
///
/// Collected exactly once per run and never re-collected.
#[derive(Clone, Serialize, Deserialize, Debug, PartialEq, Default)]
pub struct StaticInfo {
    pub uuid: String,
    #[serde(rename = "vId")]
    pub machine_id: String,
    #[serde(rename = "vHostname")]
    pub hostname: String,
    /// Seconds since epoch.
    #[serde(rename = "vBootTime")]
    pub boot_time: i64,
    #[serde(rename = "vNumProcessors")]
    pub num_processors: u32,
    #[serde(rename = "vCpuType")]
    pub cpu_type: String,
    #[serde(rename = "vKernelInfo")]
    pub kernel_info: String,
    #[serde(rename = "vMemoryTotalBytes")]
    pub memory_total_bytes: i64,
    #[serde(rename = "vSwapTotalBytes")]
    pub swap_total_bytes: i64,

    #[serde(rename = "cId")]
    pub container_id: String,
    /// 0 when no cgroup hierarchy was found.
    #[serde(rename = "cCgroupVersion")]
    pub cgroup_version: u8,

    #[serde(rename = "acceleratorBackend")]
    pub accelerator_backend: String,
    #[serde(rename = "nvidiaDriverVersion", skip_serializing_if = "String::is_empty", default)]
    pub accelerator_driver_version: String,
    #[serde(rename = "nvidiaGpuCount")]
    pub accelerator_count: usize,
    #[serde(rename = "nvidiaGpus", skip_serializing_if = "Vec::is_empty", default)]
    pub accelerators: Vec<AcceleratorStatic>,
}
