//! Parsers for `/proc` text files.
//!
//! Pure functions over file contents so they can be tested with string
//! fixtures. Counters are returned in the kernel's own units; callers
//! convert kB to bytes and sectors to bytes.

/// Error type for parsing failures.
#[derive(Debug, Clone, PartialEq)]
pub struct ParseError {
    pub message: String,
}

impl ParseError {
    pub fn new(msg: impl Into<String>) -> Self {
        Self {
            message: msg.into(),
        }
    }
}

impl std::fmt::Display for ParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Parse error: {}", self.message)
    }
}

impl std::error::Error for ParseError {}

/// Bytes per `/proc/diskstats` sector, independent of the device.
pub const SECTOR_SIZE: i64 = 512;

fn nth_u64(parts: &[&str], idx: usize) -> u64 {
    parts.get(idx).and_then(|s| s.parse().ok()).unwrap_or(0)
}

// ============ /proc/stat ============

/// Aggregate CPU jiffies from the `cpu` line of `/proc/stat`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CpuTimes {
    pub user: u64,
    pub nice: u64,
    pub system: u64,
    pub idle: u64,
    pub iowait: u64,
    pub irq: u64,
    pub softirq: u64,
    pub steal: u64,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct GlobalStat {
    pub cpu: CpuTimes,
    pub context_switches: u64,
    /// Seconds since epoch.
    pub boot_time: u64,
    /// Number of `cpuN` lines.
    pub num_cpus: usize,
}

pub fn parse_global_stat(content: &str) -> Result<GlobalStat, ParseError> {
    let mut stat = GlobalStat::default();
    let mut seen_cpu = false;

    for line in content.lines() {
        let parts: Vec<&str> = line.split_whitespace().collect();
        let Some(&label) = parts.first() else {
            continue;
        };
        match label {
            "cpu" => {
                seen_cpu = true;
                stat.cpu = CpuTimes {
                    user: nth_u64(&parts, 1),
                    nice: nth_u64(&parts, 2),
                    system: nth_u64(&parts, 3),
                    idle: nth_u64(&parts, 4),
                    iowait: nth_u64(&parts, 5),
                    irq: nth_u64(&parts, 6),
                    softirq: nth_u64(&parts, 7),
                    steal: nth_u64(&parts, 8),
                };
            }
            "ctxt" => stat.context_switches = nth_u64(&parts, 1),
            "btime" => stat.boot_time = nth_u64(&parts, 1),
            l if l.starts_with("cpu") && l[3..].bytes().all(|b| b.is_ascii_digit()) => {
                stat.num_cpus += 1;
            }
            _ => {}
        }
    }

    if !seen_cpu {
        return Err(ParseError::new("missing aggregate cpu line"));
    }
    Ok(stat)
}

// ============ /proc/meminfo ============

/// Selected `/proc/meminfo` fields, in kB.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MemInfo {
    pub mem_total: u64,
    pub mem_free: u64,
    pub mem_available: u64,
    pub buffers: u64,
    pub cached: u64,
    pub swap_total: u64,
    pub swap_free: u64,
}

pub fn parse_meminfo(content: &str) -> Result<MemInfo, ParseError> {
    let mut info = MemInfo::default();
    let mut seen_total = false;

    for line in content.lines() {
        let Some((key, rest)) = line.split_once(':') else {
            continue;
        };
        let kb: u64 = rest
            .split_whitespace()
            .next()
            .and_then(|s| s.parse().ok())
            .unwrap_or(0);
        match key {
            "MemTotal" => {
                info.mem_total = kb;
                seen_total = true;
            }
            "MemFree" => info.mem_free = kb,
            "MemAvailable" => info.mem_available = kb,
            "Buffers" => info.buffers = kb,
            "Cached" => info.cached = kb,
            "SwapTotal" => info.swap_total = kb,
            "SwapFree" => info.swap_free = kb,
            _ => {}
        }
    }

    if !seen_total {
        return Err(ParseError::new("missing MemTotal"));
    }
    Ok(info)
}

// ============ /proc/vmstat ============

#[derive(Debug, Clone, Default, PartialEq)]
pub struct VmStat {
    pub pgfault: u64,
    pub pgmajfault: u64,
}

pub fn parse_vmstat(content: &str) -> VmStat {
    let mut vm = VmStat::default();
    for line in content.lines() {
        let parts: Vec<&str> = line.split_whitespace().collect();
        match parts.first() {
            Some(&"pgfault") => vm.pgfault = nth_u64(&parts, 1),
            Some(&"pgmajfault") => vm.pgmajfault = nth_u64(&parts, 1),
            _ => {}
        }
    }
    vm
}

// ============ /proc/loadavg ============

#[derive(Debug, Clone, Default, PartialEq)]
pub struct LoadAvg {
    pub load1: f64,
    pub load5: f64,
    pub load15: f64,
}

pub fn parse_loadavg(content: &str) -> Result<LoadAvg, ParseError> {
    let parts: Vec<&str> = content.split_whitespace().collect();
    if parts.len() < 3 {
        return Err(ParseError::new("invalid loadavg format"));
    }
    let load = |idx: usize, name: &str| -> Result<f64, ParseError> {
        parts[idx]
            .parse()
            .map_err(|_| ParseError::new(format!("invalid {name}")))
    };
    Ok(LoadAvg {
        load1: load(0, "load1")?,
        load5: load(1, "load5")?,
        load15: load(2, "load15")?,
    })
}

// ============ /proc/diskstats ============

#[derive(Debug, Clone, Default, PartialEq)]
pub struct DiskStats {
    pub device: String,
    pub reads: u64,
    pub reads_merged: u64,
    pub read_sectors: u64,
    /// Milliseconds.
    pub read_time: u64,
    pub writes: u64,
    pub writes_merged: u64,
    pub write_sectors: u64,
    pub write_time: u64,
    pub io_in_progress: u64,
    pub io_time: u64,
    pub io_weighted_time: u64,
}

/// Parses every device line, partitions included. Malformed lines are skipped.
pub fn parse_diskstats(content: &str) -> Vec<DiskStats> {
    content
        .lines()
        .filter_map(|line| {
            let parts: Vec<&str> = line.split_whitespace().collect();
            if parts.len() < 14 {
                return None;
            }
            Some(DiskStats {
                device: parts[2].to_string(),
                reads: nth_u64(&parts, 3),
                reads_merged: nth_u64(&parts, 4),
                read_sectors: nth_u64(&parts, 5),
                read_time: nth_u64(&parts, 6),
                writes: nth_u64(&parts, 7),
                writes_merged: nth_u64(&parts, 8),
                write_sectors: nth_u64(&parts, 9),
                write_time: nth_u64(&parts, 10),
                io_in_progress: nth_u64(&parts, 11),
                io_time: nth_u64(&parts, 12),
                io_weighted_time: nth_u64(&parts, 13),
            })
        })
        .collect()
}

/// Whether `name` is a whole physical disk rather than a partition or a
/// virtual device.
///
/// Accepts `sdX`, `hdX`, `vdX`, `xvdX` (letters only), `nvmeNnM` and
/// `mmcblkN`.
pub fn is_whole_disk(name: &str) -> bool {
    fn letters(s: &str) -> bool {
        !s.is_empty() && s.bytes().all(|b| b.is_ascii_lowercase())
    }
    fn digits(s: &str) -> bool {
        !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit())
    }

    if let Some(rest) = name.strip_prefix("xvd") {
        return letters(rest);
    }
    for prefix in ["sd", "hd", "vd"] {
        if let Some(rest) = name.strip_prefix(prefix) {
            return letters(rest);
        }
    }
    if let Some(rest) = name.strip_prefix("nvme") {
        return rest
            .split_once('n')
            .is_some_and(|(ctrl, ns)| digits(ctrl) && digits(ns));
    }
    if let Some(rest) = name.strip_prefix("mmcblk") {
        return digits(rest);
    }
    false
}

// ============ /proc/net/dev ============

#[derive(Debug, Clone, Default, PartialEq)]
pub struct NetDevStats {
    pub interface: String,
    pub rx_bytes: u64,
    pub rx_packets: u64,
    pub rx_errs: u64,
    pub rx_drop: u64,
    pub tx_bytes: u64,
    pub tx_packets: u64,
    pub tx_errs: u64,
    pub tx_drop: u64,
}

/// Parses interface lines; the two header lines have no `:` and are skipped.
pub fn parse_net_dev(content: &str) -> Vec<NetDevStats> {
    content
        .lines()
        .filter_map(|line| {
            let (iface, counters) = line.split_once(':')?;
            let parts: Vec<&str> = counters.split_whitespace().collect();
            if parts.len() < 16 {
                return None;
            }
            Some(NetDevStats {
                interface: iface.trim().to_string(),
                rx_bytes: nth_u64(&parts, 0),
                rx_packets: nth_u64(&parts, 1),
                rx_errs: nth_u64(&parts, 2),
                rx_drop: nth_u64(&parts, 3),
                tx_bytes: nth_u64(&parts, 8),
                tx_packets: nth_u64(&parts, 9),
                tx_errs: nth_u64(&parts, 10),
                tx_drop: nth_u64(&parts, 11),
            })
        })
        .collect()
}

// ============ /proc/[pid]/* ============

/// Fields of `/proc/[pid]/stat` the process collector reports. Times in jiffies.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProcStat {
    pub pid: u32,
    pub comm: String,
    pub utime: u64,
    pub stime: u64,
    pub cutime: i64,
    pub cstime: i64,
    pub num_threads: i64,
    pub vsize: u64,
    /// Aggregated block I/O delay; 0 on kernels without delay accounting.
    pub blkio_ticks: u64,
}

/// Parses `/proc/[pid]/stat`.
///
/// The command name may contain spaces and parentheses, so fields are
/// counted from the last `)`.
pub fn parse_proc_stat(content: &str) -> Result<ProcStat, ParseError> {
    let open = content
        .find('(')
        .ok_or_else(|| ParseError::new("missing '(' in stat"))?;
    let close = content
        .rfind(')')
        .ok_or_else(|| ParseError::new("missing ')' in stat"))?;
    if close < open {
        return Err(ParseError::new("invalid parentheses in stat"));
    }

    let pid = content[..open]
        .trim()
        .parse()
        .map_err(|_| ParseError::new("invalid pid"))?;
    let comm = content[open + 1..close].to_string();

    // fields[0] is the state, i.e. field 3 of proc(5)
    let fields: Vec<&str> = content[close + 1..].split_whitespace().collect();
    if fields.len() < 21 {
        return Err(ParseError::new(format!(
            "too few fields in stat: {}",
            fields.len()
        )));
    }
    let signed = |idx: usize| -> i64 { fields.get(idx).and_then(|s| s.parse().ok()).unwrap_or(0) };

    Ok(ProcStat {
        pid,
        comm,
        utime: nth_u64(&fields, 11),
        stime: nth_u64(&fields, 12),
        cutime: signed(13),
        cstime: signed(14),
        num_threads: signed(17),
        vsize: nth_u64(&fields, 20),
        blkio_ticks: nth_u64(&fields, 39),
    })
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProcStatus {
    pub name: String,
    pub vm_rss_kb: u64,
    pub voluntary_ctxt_switches: u64,
    pub nonvoluntary_ctxt_switches: u64,
}

pub fn parse_proc_status(content: &str) -> ProcStatus {
    let mut status = ProcStatus::default();
    for line in content.lines() {
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let value = value.trim();
        let first = || value.split_whitespace().next().and_then(|s| s.parse().ok()).unwrap_or(0);
        match key {
            "Name" => status.name = value.to_string(),
            "VmRSS" => status.vm_rss_kb = first(),
            "voluntary_ctxt_switches" => status.voluntary_ctxt_switches = first(),
            "nonvoluntary_ctxt_switches" => status.nonvoluntary_ctxt_switches = first(),
            _ => {}
        }
    }
    status
}

/// NUL-separated argv joined with spaces.
pub fn parse_cmdline(raw: &str) -> String {
    raw.split('\0')
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

// ============ /proc/cpuinfo ============

/// CPU model name and number of logical processors.
pub fn parse_cpuinfo(content: &str) -> (String, usize) {
    let mut model = String::new();
    let mut count = 0;
    for line in content.lines() {
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        match key.trim() {
            "processor" => count += 1,
            "model name" if model.is_empty() => model = value.trim().to_string(),
            _ => {}
        }
    }
    (model, count)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_global_stat() {
        let content = "cpu  100 5 50 1000 20 3 2 1 0 0\n\
                       cpu0 50 2 25 500 10 1 1 0 0 0\n\
                       cpu1 50 3 25 500 10 2 1 1 0 0\n\
                       intr 12345\n\
                       ctxt 987654\n\
                       btime 1700000000\n\
                       processes 4242\n";
        let stat = parse_global_stat(content).unwrap();
        assert_eq!(stat.cpu.user, 100);
        assert_eq!(stat.cpu.steal, 1);
        assert_eq!(stat.context_switches, 987654);
        assert_eq!(stat.boot_time, 1700000000);
        assert_eq!(stat.num_cpus, 2);
    }

    #[test]
    fn test_parse_global_stat_rejects_garbage() {
        assert!(parse_global_stat("").is_err());
        assert!(parse_global_stat("intr 1\n").is_err());
    }

    #[test]
    fn test_parse_meminfo() {
        let content = "MemTotal:       16384000 kB\n\
                       MemFree:         1000000 kB\n\
                       MemAvailable:    8000000 kB\n\
                       Buffers:          200000 kB\n\
                       Cached:          3000000 kB\n\
                       SwapCached:         1000 kB\n\
                       SwapTotal:       2000000 kB\n\
                       SwapFree:        1500000 kB\n";
        let info = parse_meminfo(content).unwrap();
        assert_eq!(info.mem_total, 16384000);
        assert_eq!(info.mem_available, 8000000);
        assert_eq!(info.cached, 3000000);
        assert_eq!(info.swap_free, 1500000);
        assert!(parse_meminfo("garbage").is_err());
    }

    #[test]
    fn test_parse_vmstat() {
        let vm = parse_vmstat("nr_free_pages 100\npgfault 5000\npgmajfault 12\n");
        assert_eq!(vm, VmStat { pgfault: 5000, pgmajfault: 12 });
    }

    #[test]
    fn test_parse_loadavg() {
        let load = parse_loadavg("0.52 0.41 0.30 2/512 12345\n").unwrap();
        assert!((load.load1 - 0.52).abs() < 1e-9);
        assert!((load.load15 - 0.30).abs() < 1e-9);
        assert!(parse_loadavg("x y").is_err());
        assert!(parse_loadavg("a b c").is_err());
    }

    #[test]
    fn test_whole_disk_filter() {
        for name in ["sda", "sdab", "vda", "xvdf", "hdb", "nvme0n1", "nvme12n3", "mmcblk0"] {
            assert!(is_whole_disk(name), "{name}");
        }
        for name in ["sda1", "nvme0n1p1", "mmcblk0p2", "loop0", "dm-0", "ram1", "sd", "nvme0"] {
            assert!(!is_whole_disk(name), "{name}");
        }
    }

    #[test]
    fn test_parse_diskstats_skips_short_lines() {
        let content = "   8       0 sda 100 10 2000 50 200 20 4000 80 1 120 130\n\
                       broken line\n\
                       8       1 sda1 90 9 1800 45 190 19 3800 75 0 110 120 0 0 0 0\n";
        let disks = parse_diskstats(content);
        assert_eq!(disks.len(), 2);
        assert_eq!(disks[0].device, "sda");
        assert_eq!(disks[0].read_sectors, 2000);
        assert_eq!(disks[0].io_weighted_time, 130);
    }

    #[test]
    fn test_parse_net_dev() {
        let content = "Inter-|   Receive                                                |  Transmit\n \
                       face |bytes    packets errs drop fifo frame compressed multicast|bytes    packets errs drop fifo colls carrier compressed\n    \
                       lo: 1000 10 0 0 0 0 0 0 1000 10 0 0 0 0 0 0\n  \
                       eth0: 5000 50 1 2 0 0 0 0 3000 30 3 4 0 0 0 0\n";
        let ifaces = parse_net_dev(content);
        assert_eq!(ifaces.len(), 2);
        assert_eq!(ifaces[1].interface, "eth0");
        assert_eq!(ifaces[1].rx_bytes, 5000);
        assert_eq!(ifaces[1].rx_drop, 2);
        assert_eq!(ifaces[1].tx_packets, 30);
        assert_eq!(ifaces[1].tx_drop, 4);
    }

    #[test]
    fn test_parse_proc_stat_with_spaces_in_comm() {
        let content = "4321 (vllm (worker) 1) S 1 4321 4321 0 -1 4194304 500 0 3 0 \
                       150 40 7 2 20 0 12 0 1000 987654321 2048 18446744073709551615 \
                       0 0 0 0 0 0 0 0 0 0 0 0 17 3 0 0 9 0 0";
        let stat = parse_proc_stat(content).unwrap();
        assert_eq!(stat.pid, 4321);
        assert_eq!(stat.comm, "vllm (worker) 1");
        assert_eq!(stat.utime, 150);
        assert_eq!(stat.stime, 40);
        assert_eq!(stat.cutime, 7);
        assert_eq!(stat.cstime, 2);
        assert_eq!(stat.num_threads, 12);
        assert_eq!(stat.vsize, 987654321);
        assert_eq!(stat.blkio_ticks, 9);
    }

    #[test]
    fn test_parse_proc_stat_errors() {
        assert!(parse_proc_stat("").is_err());
        assert!(parse_proc_stat("12 (x) S 1 2").is_err());
        assert!(parse_proc_stat("abc (x) S 1 2 3 4 5 6 7 8 9 10 11 12 13 14 15 16 17 18 19 20").is_err());
    }

    #[test]
    fn test_parse_proc_status_and_cmdline() {
        let status = parse_proc_status(
            "Name:\tpython3\nVmRSS:\t  20480 kB\nvoluntary_ctxt_switches:\t150\nnonvoluntary_ctxt_switches:\t7\n",
        );
        assert_eq!(status.name, "python3");
        assert_eq!(status.vm_rss_kb, 20480);
        assert_eq!(status.voluntary_ctxt_switches, 150);
        assert_eq!(status.nonvoluntary_ctxt_switches, 7);

        assert_eq!(parse_cmdline("python3\0-m\0vllm.entrypoints\0"), "python3 -m vllm.entrypoints");
        assert_eq!(parse_cmdline(""), "");
    }

    #[test]
    fn test_parse_cpuinfo() {
        let content = "processor\t: 0\nmodel name\t: AMD EPYC 7763\n\nprocessor\t: 1\nmodel name\t: AMD EPYC 7763\n";
        assert_eq!(parse_cpuinfo(content), ("AMD EPYC 7763".to_string(), 2));
    }
}
