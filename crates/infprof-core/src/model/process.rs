//! Per-process metrics from `/proc/[pid]/`.

use serde::{Deserialize, Serialize};

use super::TimedValue;

/// One observed OS process.
///
/// Sources: `/proc/[pid]/stat`, `/proc/[pid]/status`, `/proc/[pid]/cmdline`.
/// CPU times are in centiseconds.
#[derive(Clone, Serialize, Deserialize, Debug, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct ProcessRecord {
    pub pid: TimedValue<i64>,
    pub name: TimedValue<String>,
    pub cmdline: TimedValue<String>,
    pub num_threads: TimedValue<i64>,
    pub cpu_user: TimedValue<i64>,
    pub cpu_kernel: TimedValue<i64>,
    pub children_user: TimedValue<i64>,
    pub children_kernel: TimedValue<i64>,
    pub voluntary_ctx_switches: TimedValue<i64>,
    pub nonvoluntary_ctx_switches: TimedValue<i64>,
    pub block_io_delays: TimedValue<i64>,
    pub virtual_memory_bytes: TimedValue<i64>,
    pub resident_set_bytes: TimedValue<i64>,
}
