//! Accelerator (GPU) device records.

use serde::{Deserialize, Serialize};

use super::TimedValue;

/// Dynamic metrics for one installed accelerator device.
#[derive(Clone, Serialize, Deserialize, Debug, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct AcceleratorRecord {
    /// Device index as reported by the vendor library.
    pub index: u32,

    /// Percent, 0-100.
    pub utilization_gpu: TimedValue<i64>,
    /// Percent, 0-100.
    pub utilization_memory: TimedValue<i64>,
    pub utilization_encoder: TimedValue<i64>,
    pub utilization_decoder: TimedValue<i64>,

    pub memory_used_bytes: TimedValue<i64>,
    pub memory_free_bytes: TimedValue<i64>,
    pub memory_total_bytes: TimedValue<i64>,

    pub temperature_c: TimedValue<i64>,
    pub fan_speed_percent: TimedValue<i64>,

    pub clock_graphics_mhz: TimedValue<i64>,
    pub clock_sm_mhz: TimedValue<i64>,
    pub clock_memory_mhz: TimedValue<i64>,
    /// P-state, 0 (max performance) to 15.
    pub performance_state: TimedValue<i64>,

    pub power_usage_mw: TimedValue<i64>,
    pub power_limit_mw: TimedValue<i64>,
    /// Millijoules since driver load.
    pub energy_consumption_mj: TimedValue<i64>,

    pub pcie_tx_bytes_per_sec: TimedValue<i64>,
    pub pcie_rx_bytes_per_sec: TimedValue<i64>,

    pub ecc_volatile_sbe: TimedValue<i64>,
    pub ecc_volatile_dbe: TimedValue<i64>,

    pub process_count: TimedValue<i64>,

    /// Per-link bandwidth counters.
    pub nvlink_bandwidth: Vec<LinkBandwidth>,
    /// Per-process utilization samples.
    pub process_utilization: Vec<DeviceProcessUtilization>,
    /// Processes holding a context on the device.
    pub processes: Vec<DeviceProcess>,
}

#[derive(Clone, Serialize, Deserialize, Debug, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct LinkBandwidth {
    pub link: u32,
    pub tx_bytes: i64,
    pub rx_bytes: i64,
}

#[derive(Clone, Serialize, Deserialize, Debug, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct DeviceProcessUtilization {
    pub pid: u32,
    pub sm_util: u32,
    pub mem_util: u32,
    pub enc_util: u32,
    pub dec_util: u32,
    pub timestamp: i64,
}

#[derive(Clone, Serialize, Deserialize, Debug, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct DeviceProcess {
    pub pid: u32,
    pub name: String,
    pub used_memory_bytes: i64,
}

/// Static capabilities of one accelerator, collected once per run.
#[derive(Clone, Serialize, Deserialize, Debug, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct AcceleratorStatic {
    pub index: u32,
    pub name: String,
    pub uuid: String,
    pub memory_total_bytes: i64,
    pub pci_bus_id: String,
    pub cuda_capability_major: i32,
    pub cuda_capability_minor: i32,
    pub power_default_limit_mw: i64,
    pub max_clock_sm_mhz: i64,
    pub max_clock_memory_mhz: i64,
}
