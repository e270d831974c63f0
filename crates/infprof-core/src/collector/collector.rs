//! The collector-layer entry point.

use std::path::{Path, PathBuf};

use tracing::debug;

use crate::config::CollectorToggles;
use crate::model::{
    ContainerMetrics, ProcessRecord, Snapshot, StaticInfo, SystemMetrics, TimedValue, now_ns,
};
use crate::util::container;

use super::accelerator::{AcceleratorBackend, NoAccelerator};
use super::cgroup::{CgroupSampler, detect_version};
use super::procfs::{
    self, DiskStats, GlobalStat, LoadAvg, MemInfo, NetDevStats, ProcStat, ProcStatus, SECTOR_SIZE,
    VmStat,
};
use super::traits::FileSystem;
use super::CollectError;

const MACHINE_ID_PATH: &str = "/etc/machine-id";
const KB: i64 = 1024;

fn as_i64(v: u64) -> i64 {
    i64::try_from(v).unwrap_or(i64::MAX)
}

/// Stamps each value derived from one file read with that read's time,
/// or yields absent values when the read or parse failed.
fn stamped<T>(read: &Option<(T, i64)>, f: impl Fn(&T) -> i64) -> TimedValue<i64> {
    match read {
        Some((parsed, ts)) => TimedValue::new(f(parsed), *ts),
        None => TimedValue::absent(),
    }
}

/// Samples host, container, process and accelerator sources.
///
/// Every dynamic source degrades to zero values stamped with the read
/// attempt's time; only a missing proc root is an error, and only at
/// [`Collector::collect_static`].
pub struct Collector<F: FileSystem> {
    fs: F,
    proc_path: PathBuf,
    cgroup: CgroupSampler,
    toggles: CollectorToggles,
    accelerator: Box<dyn AcceleratorBackend>,
    closed: bool,
}

impl<F: FileSystem> Collector<F> {
    pub fn new(fs: F, proc_path: impl Into<PathBuf>, cgroup_path: impl Into<PathBuf>) -> Self {
        let cgroup_path = cgroup_path.into();
        let version = detect_version(&fs, &cgroup_path);
        Self {
            fs,
            proc_path: proc_path.into(),
            cgroup: CgroupSampler::new(cgroup_path, version),
            toggles: CollectorToggles::default(),
            accelerator: Box::new(NoAccelerator::new()),
            closed: false,
        }
    }

    pub fn with_toggles(mut self, toggles: CollectorToggles) -> Self {
        self.toggles = toggles;
        self
    }

    pub fn with_accelerator(mut self, backend: Box<dyn AcceleratorBackend>) -> Self {
        self.accelerator = backend;
        self
    }

    pub fn toggles(&self) -> &CollectorToggles {
        &self.toggles
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Reads a file under the proc root with the time of the attempt.
    fn read_proc(&self, rel: impl AsRef<Path>) -> Option<(String, i64)> {
        let ts = now_ns();
        self.fs
            .read_to_string(&self.proc_path.join(rel))
            .ok()
            .map(|content| (content, ts))
    }

    fn parsed<T>(&self, rel: &str, parse: impl FnOnce(&str) -> Option<T>) -> Option<(T, i64)> {
        let (content, ts) = self.read_proc(rel)?;
        match parse(&content) {
            Some(v) => Some((v, ts)),
            None => {
                debug!("Unparseable {}/{}", self.proc_path.display(), rel);
                None
            }
        }
    }

    /// Collects run-constant host information.
    pub fn collect_static(&mut self, session_id: &str) -> Result<StaticInfo, CollectError> {
        if !self.fs.exists(&self.proc_path) {
            return Err(CollectError::ProcRootMissing(self.proc_path.clone()));
        }

        let read_trimmed = |path: &Path| {
            self.fs
                .read_to_string(path)
                .map(|s| s.trim().to_string())
                .unwrap_or_default()
        };

        let hostname = read_trimmed(&self.proc_path.join("sys/kernel/hostname"));
        let machine_id = match read_trimmed(Path::new(MACHINE_ID_PATH)) {
            id if id.is_empty() => hostname.clone(),
            id => id,
        };
        let stat = self.parsed("stat", |c| procfs::parse_global_stat(c).ok());
        let mem = self.parsed("meminfo", |c| procfs::parse_meminfo(c).ok());
        let (cpu_type, cpuinfo_count) = self
            .read_proc("cpuinfo")
            .map(|(c, _)| procfs::parse_cpuinfo(&c))
            .unwrap_or_default();
        let num_processors = if cpuinfo_count > 0 {
            cpuinfo_count
        } else {
            stat.as_ref().map_or(0, |(s, _)| s.num_cpus)
        };

        let devices = self.accelerator.static_devices();

        Ok(StaticInfo {
            uuid: session_id.to_string(),
            machine_id,
            hostname,
            boot_time: stat.as_ref().map_or(0, |(s, _)| as_i64(s.boot_time)),
            num_processors: u32::try_from(num_processors).unwrap_or(u32::MAX),
            cpu_type,
            kernel_info: read_trimmed(&self.proc_path.join("sys/kernel/osrelease")),
            memory_total_bytes: mem.as_ref().map_or(0, |(m, _)| as_i64(m.mem_total) * KB),
            swap_total_bytes: mem.as_ref().map_or(0, |(m, _)| as_i64(m.swap_total) * KB),
            container_id: container::container_id(&self.fs, &self.proc_path),
            cgroup_version: self.cgroup.version(),
            accelerator_backend: self.accelerator.name().to_string(),
            accelerator_driver_version: self.accelerator.driver_version().unwrap_or_default(),
            accelerator_count: devices.len(),
            accelerators: devices,
        })
    }

    /// Collects one cycle's measurements. Never fails.
    ///
    /// `inference` is left empty; the scraper fills it.
    pub fn collect_snapshot(&mut self) -> Snapshot {
        let timestamp = now_ns();
        let t = self.toggles.clone();

        let mut system = SystemMetrics::default();
        if t.cpu {
            self.fill_cpu(&mut system);
        }
        if t.memory {
            self.fill_memory(&mut system);
        }
        if t.disk {
            self.fill_disk(&mut system);
        }
        if t.network {
            self.fill_network(&mut system);
        }

        let container = t.container.then(|| self.collect_container()).flatten();
        let processes = if t.processes {
            self.collect_processes()
        } else {
            Vec::new()
        };
        let accelerators = if t.accelerator {
            self.accelerator.sample(t.accelerator_processes)
        } else {
            Vec::new()
        };

        Snapshot {
            timestamp,
            system,
            container,
            accelerators,
            processes,
            inference: None,
        }
    }

    /// CPU times in centiseconds: USER_HZ is 100 on every supported kernel,
    /// so jiffies are reported unchanged.
    fn fill_cpu(&self, s: &mut SystemMetrics) {
        let stat: Option<(GlobalStat, i64)> =
            self.parsed("stat", |c| procfs::parse_global_stat(c).ok());
        s.cpu_time = stamped(&stat, |g| as_i64(g.cpu.user + g.cpu.system));
        s.cpu_user = stamped(&stat, |g| as_i64(g.cpu.user));
        s.cpu_kernel = stamped(&stat, |g| as_i64(g.cpu.system));
        s.cpu_idle = stamped(&stat, |g| as_i64(g.cpu.idle));
        s.cpu_iowait = stamped(&stat, |g| as_i64(g.cpu.iowait));
        s.cpu_irq = stamped(&stat, |g| as_i64(g.cpu.irq));
        s.cpu_softirq = stamped(&stat, |g| as_i64(g.cpu.softirq));
        s.cpu_nice = stamped(&stat, |g| as_i64(g.cpu.nice));
        s.cpu_steal = stamped(&stat, |g| as_i64(g.cpu.steal));
        s.context_switches = stamped(&stat, |g| as_i64(g.context_switches));

        let load: Option<(LoadAvg, i64)> = self.parsed("loadavg", |c| procfs::parse_loadavg(c).ok());
        s.load_avg = match load {
            Some((l, ts)) => TimedValue::new(l.load1, ts),
            None => TimedValue::absent(),
        };
    }

    fn fill_memory(&self, s: &mut SystemMetrics) {
        let mem: Option<(MemInfo, i64)> = self.parsed("meminfo", |c| procfs::parse_meminfo(c).ok());
        let kb = |v: u64| as_i64(v) * KB;
        s.memory_total = stamped(&mem, |m| kb(m.mem_total));
        s.memory_free = stamped(&mem, |m| kb(m.mem_available));
        s.memory_used = stamped(&mem, |m| kb(m.mem_total.saturating_sub(m.mem_available)));
        s.memory_buffers = stamped(&mem, |m| kb(m.buffers));
        s.memory_cached = stamped(&mem, |m| kb(m.cached));
        s.swap_total = stamped(&mem, |m| kb(m.swap_total));
        s.swap_free = stamped(&mem, |m| kb(m.swap_free));
        s.swap_used = stamped(&mem, |m| kb(m.swap_total.saturating_sub(m.swap_free)));
        s.memory_percent = match &mem {
            Some((m, ts)) if m.mem_total > 0 => TimedValue::new(
                m.mem_total.saturating_sub(m.mem_available) as f64 / m.mem_total as f64 * 100.0,
                *ts,
            ),
            Some((_, ts)) => TimedValue::new(0.0, *ts),
            None => TimedValue::absent(),
        };

        let vm: Option<(VmStat, i64)> = self.parsed("vmstat", |c| Some(procfs::parse_vmstat(c)));
        s.page_faults = stamped(&vm, |v| as_i64(v.pgfault));
        s.major_page_faults = stamped(&vm, |v| as_i64(v.pgmajfault));
    }

    fn fill_disk(&self, s: &mut SystemMetrics) {
        let disks: Option<(Vec<DiskStats>, i64)> = self.parsed("diskstats", |c| {
            Some(
                procfs::parse_diskstats(c)
                    .into_iter()
                    .filter(|d| procfs::is_whole_disk(&d.device))
                    .collect(),
            )
        });
        let sum = |f: fn(&DiskStats) -> u64| {
            move |ds: &Vec<DiskStats>| as_i64(ds.iter().map(f).sum())
        };
        s.disk_sector_reads = stamped(&disks, sum(|d| d.read_sectors));
        s.disk_sector_writes = stamped(&disks, sum(|d| d.write_sectors));
        s.disk_read_bytes = stamped(&disks, |ds| sum(|d| d.read_sectors)(ds) * SECTOR_SIZE);
        s.disk_write_bytes = stamped(&disks, |ds| sum(|d| d.write_sectors)(ds) * SECTOR_SIZE);
        s.disk_reads = stamped(&disks, sum(|d| d.reads));
        s.disk_writes = stamped(&disks, sum(|d| d.writes));
        s.disk_merged_reads = stamped(&disks, sum(|d| d.reads_merged));
        s.disk_merged_writes = stamped(&disks, sum(|d| d.writes_merged));
        s.disk_read_time = stamped(&disks, sum(|d| d.read_time));
        s.disk_write_time = stamped(&disks, sum(|d| d.write_time));
        s.disk_io_in_progress = stamped(&disks, sum(|d| d.io_in_progress));
        s.disk_io_time = stamped(&disks, sum(|d| d.io_time));
        s.disk_weighted_io_time = stamped(&disks, sum(|d| d.io_weighted_time));
    }

    fn fill_network(&self, s: &mut SystemMetrics) {
        let ifaces: Option<(Vec<NetDevStats>, i64)> = self.parsed("net/dev", |c| {
            Some(
                procfs::parse_net_dev(c)
                    .into_iter()
                    .filter(|i| i.interface != "lo")
                    .collect(),
            )
        });
        let sum = |f: fn(&NetDevStats) -> u64| {
            move |is: &Vec<NetDevStats>| as_i64(is.iter().map(f).sum())
        };
        s.net_bytes_recv = stamped(&ifaces, sum(|i| i.rx_bytes));
        s.net_bytes_sent = stamped(&ifaces, sum(|i| i.tx_bytes));
        s.net_packets_recv = stamped(&ifaces, sum(|i| i.rx_packets));
        s.net_packets_sent = stamped(&ifaces, sum(|i| i.tx_packets));
        s.net_errors_recv = stamped(&ifaces, sum(|i| i.rx_errs));
        s.net_errors_sent = stamped(&ifaces, sum(|i| i.tx_errs));
        s.net_drops_recv = stamped(&ifaces, sum(|i| i.rx_drop));
        s.net_drops_sent = stamped(&ifaces, sum(|i| i.tx_drop));
    }

    /// `None` when no cgroup hierarchy was found.
    fn collect_container(&self) -> Option<ContainerMetrics> {
        (self.cgroup.version() != 0).then(|| self.cgroup.collect(&self.fs))
    }

    /// Every numeric `/proc` entry, ordered by pid. A process that exits
    /// between listing and reading its `stat` is skipped.
    fn collect_processes(&self) -> Vec<ProcessRecord> {
        let Ok(entries) = self.fs.read_dir(&self.proc_path) else {
            return Vec::new();
        };
        let mut pids: Vec<u32> = entries
            .iter()
            .filter_map(|p| p.file_name()?.to_str()?.parse().ok())
            .collect();
        pids.sort_unstable();

        pids.into_iter()
            .filter_map(|pid| self.collect_process(pid))
            .collect()
    }

    fn collect_process(&self, pid: u32) -> Option<ProcessRecord> {
        let dir = PathBuf::from(pid.to_string());
        let (stat, stat_ts): (ProcStat, i64) = self
            .read_proc(dir.join("stat"))
            .and_then(|(c, ts)| procfs::parse_proc_stat(&c).ok().map(|s| (s, ts)))?;
        let status: Option<(ProcStatus, i64)> = self
            .read_proc(dir.join("status"))
            .map(|(c, ts)| (procfs::parse_proc_status(&c), ts));
        let cmdline = match self.read_proc(dir.join("cmdline")) {
            Some((c, ts)) => TimedValue::new(procfs::parse_cmdline(&c), ts),
            None => TimedValue::absent(),
        };

        let name = match &status {
            Some((st, ts)) if !st.name.is_empty() => TimedValue::new(st.name.clone(), *ts),
            _ => TimedValue::new(stat.comm.clone(), stat_ts),
        };
        let at = |v: i64| TimedValue::new(v, stat_ts);

        Some(ProcessRecord {
            pid: at(i64::from(stat.pid)),
            name,
            cmdline,
            num_threads: at(stat.num_threads),
            cpu_user: at(as_i64(stat.utime)),
            cpu_kernel: at(as_i64(stat.stime)),
            children_user: at(stat.cutime),
            children_kernel: at(stat.cstime),
            voluntary_ctx_switches: stamped(&status, |s| as_i64(s.voluntary_ctxt_switches)),
            nonvoluntary_ctx_switches: stamped(&status, |s| as_i64(s.nonvoluntary_ctxt_switches)),
            block_io_delays: at(as_i64(stat.blkio_ticks)),
            virtual_memory_bytes: at(as_i64(stat.vsize)),
            resident_set_bytes: stamped(&status, |s| as_i64(s.vm_rss_kb) * KB),
        })
    }

    /// Releases the accelerator handle. Safe to call more than once.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.accelerator.close();
        self.closed = true;
    }
}

impl<F: FileSystem> Drop for Collector<F> {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::MockFs;
    use crate::model::{AcceleratorRecord, AcceleratorStatic};
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn typical() -> Collector<MockFs> {
        Collector::new(MockFs::typical_system(), "/proc", "/sys/fs/cgroup")
    }

    #[test]
    fn test_collect_static() {
        let mut c = typical();
        let info = c.collect_static("session-1").unwrap();

        assert_eq!(info.uuid, "session-1");
        assert_eq!(info.hostname, "gpu-node-7");
        assert_eq!(info.machine_id, "0123456789abcdef0123456789abcdef");
        assert_eq!(info.boot_time, 1700000000);
        assert_eq!(info.num_processors, 2);
        assert_eq!(info.cpu_type, "Intel(R) Xeon(R) Platinum 8480+");
        assert_eq!(info.kernel_info, "6.8.0-45-generic");
        assert_eq!(info.memory_total_bytes, 16000000 * 1024);
        assert_eq!(info.swap_total_bytes, 4000000 * 1024);
        assert_eq!(info.container_id, "3f4e5d6c7b8a");
        assert_eq!(info.cgroup_version, 2);
        assert_eq!(info.accelerator_backend, "none");
        assert_eq!(info.accelerator_count, 0);
    }

    #[test]
    fn test_collect_static_requires_proc_root() {
        let mut c = Collector::new(MockFs::new(), "/proc", "/sys/fs/cgroup");
        assert!(matches!(
            c.collect_static("s"),
            Err(CollectError::ProcRootMissing(p)) if p == Path::new("/proc")
        ));
    }

    #[test]
    fn test_collect_snapshot_system() {
        let mut c = typical();
        let snap = c.collect_snapshot();
        let s = &snap.system;

        assert_eq!(s.cpu_time.value, 1400);
        assert_eq!(s.cpu_user.value, 1000);
        assert_eq!(s.cpu_kernel.value, 400);
        assert_eq!(s.cpu_idle.value, 90000);
        assert_eq!(s.cpu_steal.value, 5);
        assert_eq!(s.context_switches.value, 5550000);
        assert!((s.load_avg.value - 1.25).abs() < 1e-9);

        assert_eq!(s.memory_total.value, 16000000 * 1024);
        assert_eq!(s.memory_used.value, 4000000 * 1024);
        assert!((s.memory_percent.value - 25.0).abs() < 1e-9);
        assert_eq!(s.swap_used.value, 1000000 * 1024);
        assert_eq!(s.page_faults.value, 700000);

        // sda and nvme0n1 only
        assert_eq!(s.disk_reads.value, 1010);
        assert_eq!(s.disk_sector_reads.value, 80800);
        assert_eq!(s.disk_read_bytes.value, 80800 * 512);
        assert_eq!(s.disk_io_in_progress.value, 1);

        // eth0 and eth1, not lo
        assert_eq!(s.net_bytes_recv.value, 10500);
        assert_eq!(s.net_bytes_sent.value, 20700);
        assert_eq!(s.net_drops_sent.value, 5);

        let container = snap.container.unwrap();
        assert_eq!(container.num_processes.value, 17);
        assert!(snap.inference.is_none());
    }

    #[test]
    fn test_collect_snapshot_processes_sorted_by_pid() {
        let mut c = typical();
        let snap = c.collect_snapshot();

        assert_eq!(snap.processes.len(), 2);
        assert_eq!(snap.processes[0].pid.value, 1);
        let p = &snap.processes[1];
        assert_eq!(p.pid.value, 4242);
        assert_eq!(p.name.value, "python3");
        assert_eq!(p.cmdline.value, "python3 -m vllm.entrypoints.openai.api_server");
        assert_eq!(p.num_threads.value, 24);
        assert_eq!(p.cpu_user.value, 300);
        assert_eq!(p.children_kernel.value, 5);
        assert_eq!(p.voluntary_ctx_switches.value, 1500);
        assert_eq!(p.block_io_delays.value, 6);
        assert_eq!(p.virtual_memory_bytes.value, 8000000000);
        assert_eq!(p.resident_set_bytes.value, 204800 * 1024);
    }

    #[test]
    fn test_unreadable_sources_are_zero_stamped_now() {
        let mut fs = MockFs::new();
        fs.add_dir("/proc");
        let mut c = Collector::new(fs, "/proc", "/sys/fs/cgroup");

        let before = now_ns();
        let snap = c.collect_snapshot();
        let after = now_ns();

        for v in [
            &snap.system.cpu_time,
            &snap.system.memory_total,
            &snap.system.disk_reads,
            &snap.system.net_bytes_recv,
            &snap.system.page_faults,
        ] {
            assert_eq!(v.value, 0);
            assert!(v.timestamp >= before && v.timestamp <= after);
        }
        assert_eq!(snap.system.load_avg.value, 0.0);
        assert!(snap.system.load_avg.timestamp >= before);
        assert!(snap.container.is_none());
        assert!(snap.processes.is_empty());
    }

    #[test]
    fn test_vanished_process_is_skipped() {
        let mut fs = MockFs::typical_system();
        fs.remove_file("/proc/1/stat");
        let mut c = Collector::new(fs, "/proc", "/sys/fs/cgroup");
        let snap = c.collect_snapshot();
        assert_eq!(snap.processes.len(), 1);
        assert_eq!(snap.processes[0].pid.value, 4242);
    }

    #[test]
    fn test_toggles_disable_sources() {
        let toggles = CollectorToggles {
            cpu: false,
            processes: false,
            container: false,
            ..CollectorToggles::default()
        };
        let mut c = typical().with_toggles(toggles);
        let snap = c.collect_snapshot();

        assert_eq!(snap.system.cpu_time, TimedValue::default());
        assert!(snap.system.memory_total.value > 0);
        assert!(snap.processes.is_empty());
        assert!(snap.container.is_none());
    }

    struct FakeGpu {
        closes: Arc<AtomicUsize>,
    }

    impl AcceleratorBackend for FakeGpu {
        fn name(&self) -> &str {
            "fake"
        }

        fn driver_version(&self) -> Option<String> {
            Some("550.54".into())
        }

        fn static_devices(&mut self) -> Vec<AcceleratorStatic> {
            vec![AcceleratorStatic {
                index: 0,
                name: "Fake H100".into(),
                ..Default::default()
            }]
        }

        fn sample(&mut self, with_processes: bool) -> Vec<AcceleratorRecord> {
            let mut rec = AcceleratorRecord {
                utilization_gpu: TimedValue::now(87),
                ..Default::default()
            };
            if with_processes {
                rec.processes.push(Default::default());
            }
            vec![rec]
        }

        fn close(&mut self) {
            self.closes.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_accelerator_backend_and_close_once() {
        let closes = Arc::new(AtomicUsize::new(0));
        let mut c = typical().with_accelerator(Box::new(FakeGpu {
            closes: closes.clone(),
        }));

        let info = c.collect_static("s").unwrap();
        assert_eq!(info.accelerator_backend, "fake");
        assert_eq!(info.accelerator_driver_version, "550.54");
        assert_eq!(info.accelerator_count, 1);

        let snap = c.collect_snapshot();
        assert_eq!(snap.accelerators.len(), 1);
        assert_eq!(snap.accelerators[0].processes.len(), 1);

        c.close();
        c.close();
        drop(c);
        assert_eq!(closes.load(Ordering::SeqCst), 1);
    }
}
