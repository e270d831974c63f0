//! Host- and container-level scalar metrics.
//!
//! CPU times are in centiseconds (jiffies at USER_HZ=100), memory and I/O
//! sizes in bytes, unless a field says otherwise.

use serde::{Deserialize, Serialize};

use super::TimedValue;

/// Host-wide metrics sampled once per cycle.
///
/// Sources: `/proc/stat`, `/proc/loadavg`, `/proc/meminfo`, `/proc/vmstat`,
/// `/proc/diskstats`, `/proc/net/dev`.
#[derive(Clone, Serialize, Deserialize, Debug, PartialEq, Default)]
pub struct SystemMetrics {
    /// User + kernel time.
    pub cpu_time: TimedValue<i64>,
    pub cpu_user: TimedValue<i64>,
    pub cpu_kernel: TimedValue<i64>,
    pub cpu_idle: TimedValue<i64>,
    pub cpu_iowait: TimedValue<i64>,
    /// Hardware interrupt servicing time.
    pub cpu_irq: TimedValue<i64>,
    /// Software interrupt servicing time.
    pub cpu_softirq: TimedValue<i64>,
    pub cpu_nice: TimedValue<i64>,
    pub cpu_steal: TimedValue<i64>,
    /// Context switches since boot.
    pub context_switches: TimedValue<i64>,
    /// 1-minute load average.
    pub load_avg: TimedValue<f64>,

    pub memory_total: TimedValue<i64>,
    /// `MemAvailable`.
    pub memory_free: TimedValue<i64>,
    pub memory_used: TimedValue<i64>,
    pub memory_buffers: TimedValue<i64>,
    pub memory_cached: TimedValue<i64>,
    pub memory_percent: TimedValue<f64>,
    pub swap_total: TimedValue<i64>,
    pub swap_free: TimedValue<i64>,
    pub swap_used: TimedValue<i64>,
    pub page_faults: TimedValue<i64>,
    pub major_page_faults: TimedValue<i64>,

    /// Sectors are 512 bytes.
    pub disk_sector_reads: TimedValue<i64>,
    pub disk_sector_writes: TimedValue<i64>,
    pub disk_read_bytes: TimedValue<i64>,
    pub disk_write_bytes: TimedValue<i64>,
    pub disk_reads: TimedValue<i64>,
    pub disk_writes: TimedValue<i64>,
    pub disk_merged_reads: TimedValue<i64>,
    pub disk_merged_writes: TimedValue<i64>,
    /// Milliseconds.
    pub disk_read_time: TimedValue<i64>,
    /// Milliseconds.
    pub disk_write_time: TimedValue<i64>,
    pub disk_io_in_progress: TimedValue<i64>,
    /// Milliseconds.
    pub disk_io_time: TimedValue<i64>,
    /// Milliseconds.
    pub disk_weighted_io_time: TimedValue<i64>,

    /// Loopback excluded.
    pub net_bytes_recv: TimedValue<i64>,
    pub net_bytes_sent: TimedValue<i64>,
    pub net_packets_recv: TimedValue<i64>,
    pub net_packets_sent: TimedValue<i64>,
    pub net_errors_recv: TimedValue<i64>,
    pub net_errors_sent: TimedValue<i64>,
    pub net_drops_recv: TimedValue<i64>,
    pub net_drops_sent: TimedValue<i64>,
}

/// Container (cgroup) metrics.
///
/// Source: cgroup v2 controller files, falling back to v1 where a
/// v2 file is not present.
#[derive(Clone, Serialize, Deserialize, Debug, PartialEq, Default)]
pub struct ContainerMetrics {
    /// Nanoseconds.
    pub cpu_time: TimedValue<i64>,
    pub cpu_user: TimedValue<i64>,
    pub cpu_kernel: TimedValue<i64>,
    pub memory_used: TimedValue<i64>,
    pub memory_max_used: TimedValue<i64>,
    pub disk_read_bytes: TimedValue<i64>,
    pub disk_write_bytes: TimedValue<i64>,
    pub page_faults: TimedValue<i64>,
    pub major_page_faults: TimedValue<i64>,
    pub num_processes: TimedValue<i64>,
}
