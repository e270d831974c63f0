//! Statically declared field tables.
//!
//! Each table lists the exportable fields of one model type as
//! (canonical key, accessor). The flattener walks these tables; adding a
//! field to the export means adding one line here.

use crate::model::{AcceleratorRecord, ContainerMetrics, ProcessRecord, SystemMetrics};

use super::FlatValue;

/// A timestamped scalar field. Emits `<key>` and `<key>T`.
pub struct FieldSpec<T> {
    pub key: &'static str,
    pub read: fn(&T) -> (FlatValue, i64),
}

/// A nested sub-collection, exported as one embedded JSON string.
pub struct NestedSpec<T> {
    pub key: &'static str,
    pub read: fn(&T) -> String,
}

/// Suffix appended to a field key for its observation timestamp.
pub const TIMESTAMP_SUFFIX: &str = "T";

pub static SYSTEM_FIELDS: &[FieldSpec<SystemMetrics>] = &[
    FieldSpec { key: "vCpuTime", read: |m| m.cpu_time.flat() },
    FieldSpec { key: "vCpuTimeUserMode", read: |m| m.cpu_user.flat() },
    FieldSpec { key: "vCpuTimeKernelMode", read: |m| m.cpu_kernel.flat() },
    FieldSpec { key: "vCpuIdleTime", read: |m| m.cpu_idle.flat() },
    FieldSpec { key: "vCpuTimeIOWait", read: |m| m.cpu_iowait.flat() },
    FieldSpec { key: "vCpuTimeIntSrvc", read: |m| m.cpu_irq.flat() },
    FieldSpec { key: "vCpuTimeSoftIntSrvc", read: |m| m.cpu_softirq.flat() },
    FieldSpec { key: "vCpuNice", read: |m| m.cpu_nice.flat() },
    FieldSpec { key: "vCpuSteal", read: |m| m.cpu_steal.flat() },
    FieldSpec { key: "vCpuContextSwitches", read: |m| m.context_switches.flat() },
    FieldSpec { key: "vLoadAvg", read: |m| m.load_avg.flat() },
    FieldSpec { key: "vMemoryTotal", read: |m| m.memory_total.flat() },
    FieldSpec { key: "vMemoryFree", read: |m| m.memory_free.flat() },
    FieldSpec { key: "vMemoryUsed", read: |m| m.memory_used.flat() },
    FieldSpec { key: "vMemoryBuffers", read: |m| m.memory_buffers.flat() },
    FieldSpec { key: "vMemoryCached", read: |m| m.memory_cached.flat() },
    FieldSpec { key: "vMemoryPercent", read: |m| m.memory_percent.flat() },
    FieldSpec { key: "vMemorySwapTotal", read: |m| m.swap_total.flat() },
    FieldSpec { key: "vMemorySwapFree", read: |m| m.swap_free.flat() },
    FieldSpec { key: "vMemorySwapUsed", read: |m| m.swap_used.flat() },
    FieldSpec { key: "vMemoryPgFault", read: |m| m.page_faults.flat() },
    FieldSpec { key: "vMemoryMajorPageFault", read: |m| m.major_page_faults.flat() },
    FieldSpec { key: "vDiskSectorReads", read: |m| m.disk_sector_reads.flat() },
    FieldSpec { key: "vDiskSectorWrites", read: |m| m.disk_sector_writes.flat() },
    FieldSpec { key: "vDiskReadBytes", read: |m| m.disk_read_bytes.flat() },
    FieldSpec { key: "vDiskWriteBytes", read: |m| m.disk_write_bytes.flat() },
    FieldSpec { key: "vDiskSuccessfulReads", read: |m| m.disk_reads.flat() },
    FieldSpec { key: "vDiskSuccessfulWrites", read: |m| m.disk_writes.flat() },
    FieldSpec { key: "vDiskMergedReads", read: |m| m.disk_merged_reads.flat() },
    FieldSpec { key: "vDiskMergedWrites", read: |m| m.disk_merged_writes.flat() },
    FieldSpec { key: "vDiskReadTime", read: |m| m.disk_read_time.flat() },
    FieldSpec { key: "vDiskWriteTime", read: |m| m.disk_write_time.flat() },
    FieldSpec { key: "vDiskIOInProgress", read: |m| m.disk_io_in_progress.flat() },
    FieldSpec { key: "vDiskIOTime", read: |m| m.disk_io_time.flat() },
    FieldSpec { key: "vDiskWeightedIOTime", read: |m| m.disk_weighted_io_time.flat() },
    FieldSpec { key: "vNetworkBytesRecvd", read: |m| m.net_bytes_recv.flat() },
    FieldSpec { key: "vNetworkBytesSent", read: |m| m.net_bytes_sent.flat() },
    FieldSpec { key: "vNetworkPacketsRecvd", read: |m| m.net_packets_recv.flat() },
    FieldSpec { key: "vNetworkPacketsSent", read: |m| m.net_packets_sent.flat() },
    FieldSpec { key: "vNetworkErrorsRecvd", read: |m| m.net_errors_recv.flat() },
    FieldSpec { key: "vNetworkErrorsSent", read: |m| m.net_errors_sent.flat() },
    FieldSpec { key: "vNetworkDropsRecvd", read: |m| m.net_drops_recv.flat() },
    FieldSpec { key: "vNetworkDropsSent", read: |m| m.net_drops_sent.flat() },
];

pub static CONTAINER_FIELDS: &[FieldSpec<ContainerMetrics>] = &[
    FieldSpec { key: "cCpuTime", read: |m| m.cpu_time.flat() },
    FieldSpec { key: "cCpuTimeUserMode", read: |m| m.cpu_user.flat() },
    FieldSpec { key: "cCpuTimeKernelMode", read: |m| m.cpu_kernel.flat() },
    FieldSpec { key: "cMemoryUsed", read: |m| m.memory_used.flat() },
    FieldSpec { key: "cMemoryMaxUsed", read: |m| m.memory_max_used.flat() },
    FieldSpec { key: "cDiskReadBytes", read: |m| m.disk_read_bytes.flat() },
    FieldSpec { key: "cDiskWriteBytes", read: |m| m.disk_write_bytes.flat() },
    FieldSpec { key: "cPgFault", read: |m| m.page_faults.flat() },
    FieldSpec { key: "cMajorPgFault", read: |m| m.major_page_faults.flat() },
    FieldSpec { key: "cNumProcesses", read: |m| m.num_processes.flat() },
];

/// Accelerator fields, prefixed with `nvidia{i}` when flattened.
pub static ACCELERATOR_FIELDS: &[FieldSpec<AcceleratorRecord>] = &[
    FieldSpec { key: "UtilizationGpu", read: |g| g.utilization_gpu.flat() },
    FieldSpec { key: "UtilizationMemory", read: |g| g.utilization_memory.flat() },
    FieldSpec { key: "UtilizationEncoder", read: |g| g.utilization_encoder.flat() },
    FieldSpec { key: "UtilizationDecoder", read: |g| g.utilization_decoder.flat() },
    FieldSpec { key: "MemoryUsedBytes", read: |g| g.memory_used_bytes.flat() },
    FieldSpec { key: "MemoryFreeBytes", read: |g| g.memory_free_bytes.flat() },
    FieldSpec { key: "MemoryTotalBytes", read: |g| g.memory_total_bytes.flat() },
    FieldSpec { key: "TemperatureGpuC", read: |g| g.temperature_c.flat() },
    FieldSpec { key: "FanSpeedPercent", read: |g| g.fan_speed_percent.flat() },
    FieldSpec { key: "ClockGraphicsMhz", read: |g| g.clock_graphics_mhz.flat() },
    FieldSpec { key: "ClockSmMhz", read: |g| g.clock_sm_mhz.flat() },
    FieldSpec { key: "ClockMemoryMhz", read: |g| g.clock_memory_mhz.flat() },
    FieldSpec { key: "PerformanceState", read: |g| g.performance_state.flat() },
    FieldSpec { key: "PowerUsageMw", read: |g| g.power_usage_mw.flat() },
    FieldSpec { key: "PowerLimitMw", read: |g| g.power_limit_mw.flat() },
    FieldSpec { key: "EnergyConsumptionMj", read: |g| g.energy_consumption_mj.flat() },
    FieldSpec { key: "PcieTxBytesPerSec", read: |g| g.pcie_tx_bytes_per_sec.flat() },
    FieldSpec { key: "PcieRxBytesPerSec", read: |g| g.pcie_rx_bytes_per_sec.flat() },
    FieldSpec { key: "EccVolatileSbe", read: |g| g.ecc_volatile_sbe.flat() },
    FieldSpec { key: "EccVolatileDbe", read: |g| g.ecc_volatile_dbe.flat() },
    FieldSpec { key: "ProcessCount", read: |g| g.process_count.flat() },
];

pub static ACCELERATOR_NESTED: &[NestedSpec<AcceleratorRecord>] = &[
    NestedSpec {
        key: "NvlinkBandwidthJson",
        read: |g| serde_json::to_string(&g.nvlink_bandwidth).unwrap_or_default(),
    },
    NestedSpec {
        key: "ProcessUtilizationJson",
        read: |g| serde_json::to_string(&g.process_utilization).unwrap_or_default(),
    },
    NestedSpec {
        key: "ProcessesJson",
        read: |g| serde_json::to_string(&g.processes).unwrap_or_default(),
    },
];

/// Process fields, prefixed with `process{i}` when flattened.
pub static PROCESS_FIELDS: &[FieldSpec<ProcessRecord>] = &[
    FieldSpec { key: "Pid", read: |p| p.pid.flat() },
    FieldSpec { key: "Name", read: |p| p.name.flat() },
    FieldSpec { key: "Cmdline", read: |p| p.cmdline.flat() },
    FieldSpec { key: "NumThreads", read: |p| p.num_threads.flat() },
    FieldSpec { key: "CpuTimeUserMode", read: |p| p.cpu_user.flat() },
    FieldSpec { key: "CpuTimeKernelMode", read: |p| p.cpu_kernel.flat() },
    FieldSpec { key: "ChildrenUserMode", read: |p| p.children_user.flat() },
    FieldSpec { key: "ChildrenKernelMode", read: |p| p.children_kernel.flat() },
    FieldSpec { key: "VoluntaryCtxSwitches", read: |p| p.voluntary_ctx_switches.flat() },
    FieldSpec { key: "NonvoluntaryCtxSwitches", read: |p| p.nonvoluntary_ctx_switches.flat() },
    FieldSpec { key: "BlockIODelays", read: |p| p.block_io_delays.flat() },
    FieldSpec { key: "VirtualMemoryBytes", read: |p| p.virtual_memory_bytes.flat() },
    FieldSpec { key: "ResidentSetSize", read: |p| p.resident_set_bytes.flat() },
];
