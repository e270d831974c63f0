//! Container metrics from the cgroup hierarchy.
//!
//! cgroup v2 files are read from the hierarchy root; on a v1 host the
//! per-controller directories (`cpuacct/`, `memory/`, `blkio/`, `pids/`)
//! are used instead.

use std::path::{Path, PathBuf};

use crate::model::{ContainerMetrics, TimedValue};

use super::traits::FileSystem;

/// `key value` lines, as in `cpu.stat`, `memory.stat` and `cpuacct.stat`.
pub fn parse_flat_keyed(content: &str, key: &str) -> Option<u64> {
    content.lines().find_map(|line| {
        let mut parts = line.split_whitespace();
        if parts.next()? != key {
            return None;
        }
        parts.next()?.parse().ok()
    })
}

/// Single-integer files such as `memory.current` or `pids.current`.
pub fn parse_single(content: &str) -> Option<u64> {
    content.trim().parse().ok()
}

/// Sums `rbytes=`/`wbytes=` across the devices of a v2 `io.stat`.
pub fn parse_io_stat(content: &str) -> (u64, u64) {
    let mut read = 0u64;
    let mut write = 0u64;
    for field in content.split_whitespace() {
        if let Some(v) = field.strip_prefix("rbytes=") {
            read += v.parse::<u64>().unwrap_or(0);
        } else if let Some(v) = field.strip_prefix("wbytes=") {
            write += v.parse::<u64>().unwrap_or(0);
        }
    }
    (read, write)
}

/// Sums `Read`/`Write` lines of a v1 `blkio.throttle.io_service_bytes`.
pub fn parse_blkio_service_bytes(content: &str) -> (u64, u64) {
    let mut read = 0u64;
    let mut write = 0u64;
    for line in content.lines() {
        let parts: Vec<&str> = line.split_whitespace().collect();
        if parts.len() < 3 {
            continue;
        }
        let value: u64 = parts[2].parse().unwrap_or(0);
        match parts[1].to_ascii_lowercase().as_str() {
            "read" => read += value,
            "write" => write += value,
            _ => {}
        }
    }
    (read, write)
}

fn as_i64(v: u64) -> i64 {
    i64::try_from(v).unwrap_or(i64::MAX)
}

/// Reads container metrics for one cgroup hierarchy.
pub struct CgroupSampler {
    root: PathBuf,
    version: u8,
}

impl CgroupSampler {
    /// `version` is 1 or 2; any other value yields only zero values.
    pub fn new(root: impl Into<PathBuf>, version: u8) -> Self {
        Self {
            root: root.into(),
            version,
        }
    }

    pub fn version(&self) -> u8 {
        self.version
    }

    fn read<F: FileSystem>(&self, fs: &F, rel: &str) -> Option<(String, i64)> {
        let ts = crate::model::now_ns();
        fs.read_to_string(&self.root.join(rel)).ok().map(|c| (c, ts))
    }

    fn single<F: FileSystem>(&self, fs: &F, rel: &str) -> TimedValue<i64> {
        self.read(fs, rel)
            .and_then(|(c, ts)| parse_single(&c).map(|v| TimedValue::new(as_i64(v), ts)))
            .unwrap_or_else(TimedValue::absent)
    }

    fn keyed<F: FileSystem>(&self, fs: &F, rel: &str, key: &str) -> TimedValue<i64> {
        self.read(fs, rel)
            .and_then(|(c, ts)| parse_flat_keyed(&c, key).map(|v| TimedValue::new(as_i64(v), ts)))
            .unwrap_or_else(TimedValue::absent)
    }

    /// CPU user/kernel times are in centiseconds, total CPU in nanoseconds.
    pub fn collect<F: FileSystem>(&self, fs: &F) -> ContainerMetrics {
        match self.version {
            2 => self.collect_v2(fs),
            1 => self.collect_v1(fs),
            _ => ContainerMetrics {
                cpu_time: TimedValue::absent(),
                cpu_user: TimedValue::absent(),
                cpu_kernel: TimedValue::absent(),
                memory_used: TimedValue::absent(),
                memory_max_used: TimedValue::absent(),
                disk_read_bytes: TimedValue::absent(),
                disk_write_bytes: TimedValue::absent(),
                page_faults: TimedValue::absent(),
                major_page_faults: TimedValue::absent(),
                num_processes: TimedValue::absent(),
            },
        }
    }

    fn collect_v2<F: FileSystem>(&self, fs: &F) -> ContainerMetrics {
        let cpu = self.read(fs, "cpu.stat");
        let cpu_field = |key: &str, scale: fn(u64) -> u64| -> TimedValue<i64> {
            cpu.as_ref()
                .and_then(|(c, ts)| parse_flat_keyed(c, key).map(|v| TimedValue::new(as_i64(scale(v)), *ts)))
                .unwrap_or_else(TimedValue::absent)
        };
        let (disk_read_bytes, disk_write_bytes) = self.io_pair(fs, "io.stat", parse_io_stat);

        ContainerMetrics {
            cpu_time: cpu_field("usage_usec", |us| us.saturating_mul(1_000)),
            cpu_user: cpu_field("user_usec", |us| us / 10_000),
            cpu_kernel: cpu_field("system_usec", |us| us / 10_000),
            memory_used: self.single(fs, "memory.current"),
            memory_max_used: self.single(fs, "memory.peak"),
            disk_read_bytes,
            disk_write_bytes,
            page_faults: self.keyed(fs, "memory.stat", "pgfault"),
            major_page_faults: self.keyed(fs, "memory.stat", "pgmajfault"),
            num_processes: self.single(fs, "pids.current"),
        }
    }

    fn collect_v1<F: FileSystem>(&self, fs: &F) -> ContainerMetrics {
        let (disk_read_bytes, disk_write_bytes) = self.io_pair(
            fs,
            "blkio/blkio.throttle.io_service_bytes",
            parse_blkio_service_bytes,
        );

        // cpuacct.stat is already in USER_HZ ticks, i.e. centiseconds
        ContainerMetrics {
            cpu_time: self.single(fs, "cpuacct/cpuacct.usage"),
            cpu_user: self.keyed(fs, "cpuacct/cpuacct.stat", "user"),
            cpu_kernel: self.keyed(fs, "cpuacct/cpuacct.stat", "system"),
            memory_used: self.single(fs, "memory/memory.usage_in_bytes"),
            memory_max_used: self.single(fs, "memory/memory.max_usage_in_bytes"),
            disk_read_bytes,
            disk_write_bytes,
            page_faults: self.keyed(fs, "memory/memory.stat", "pgfault"),
            major_page_faults: self.keyed(fs, "memory/memory.stat", "pgmajfault"),
            num_processes: self.single(fs, "pids/pids.current"),
        }
    }

    fn io_pair<F: FileSystem>(
        &self,
        fs: &F,
        rel: &str,
        parse: fn(&str) -> (u64, u64),
    ) -> (TimedValue<i64>, TimedValue<i64>) {
        match self.read(fs, rel) {
            Some((c, ts)) => {
                let (r, w) = parse(&c);
                (TimedValue::new(as_i64(r), ts), TimedValue::new(as_i64(w), ts))
            }
            None => (TimedValue::absent(), TimedValue::absent()),
        }
    }
}

/// Detects the cgroup version mounted at `root`: 2, 1, or 0 when none.
pub fn detect_version<F: FileSystem>(fs: &F, root: &Path) -> u8 {
    if fs.exists(&root.join("cgroup.controllers")) {
        2
    } else if ["cpuacct", "memory", "cpu,cpuacct"]
        .iter()
        .any(|c| fs.exists(&root.join(c)))
    {
        1
    } else {
        0
    }
}
