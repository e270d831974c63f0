//! In-memory filesystem for exercising collectors without a real `/proc`.

use std::collections::{HashMap, HashSet};
use std::io;
use std::path::{Path, PathBuf};

use super::traits::FileSystem;

/// Files and directories held in memory.
#[derive(Debug, Clone, Default)]
pub struct MockFs {
    files: HashMap<PathBuf, String>,
    directories: HashSet<PathBuf>,
}

impl MockFs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a file, creating its parent directories.
    pub fn add_file(&mut self, path: impl AsRef<Path>, content: impl Into<String>) {
        let path = path.as_ref().to_path_buf();
        self.add_parents(&path);
        self.files.insert(path, content.into());
    }

    pub fn add_dir(&mut self, path: impl AsRef<Path>) {
        let path = path.as_ref().to_path_buf();
        self.add_parents(&path);
        self.directories.insert(path);
    }

    pub fn remove_file(&mut self, path: impl AsRef<Path>) {
        self.files.remove(path.as_ref());
    }

    fn add_parents(&mut self, path: &Path) {
        let mut parent = path.parent();
        while let Some(p) = parent {
            if !p.as_os_str().is_empty() {
                self.directories.insert(p.to_path_buf());
            }
            parent = p.parent();
        }
    }

    /// Adds `/proc/<pid>/{stat,status,cmdline}`.
    pub fn add_process(&mut self, pid: u32, stat: &str, status: &str, cmdline: &str) {
        let base = PathBuf::from(format!("/proc/{pid}"));
        self.add_dir(&base);
        self.add_file(base.join("stat"), stat);
        self.add_file(base.join("status"), status);
        self.add_file(base.join("cmdline"), cmdline);
    }

    /// A small two-CPU host with one inference server process and a
    /// cgroup v2 hierarchy mounted at `/sys/fs/cgroup`.
    pub fn typical_system() -> Self {
        let mut fs = Self::new();

        fs.add_file(
            "/proc/stat",
            "cpu  1000 50 400 90000 120 10 20 5 0 0\n\
             cpu0 500 25 200 45000 60 5 10 2 0 0\n\
             cpu1 500 25 200 45000 60 5 10 3 0 0\n\
             ctxt 5550000\n\
             btime 1700000000\n\
             processes 9000\n",
        );
        fs.add_file(
            "/proc/meminfo",
            "MemTotal:       16000000 kB\n\
             MemFree:         2000000 kB\n\
             MemAvailable:   12000000 kB\n\
             Buffers:          100000 kB\n\
             Cached:          3000000 kB\n\
             SwapTotal:       4000000 kB\n\
             SwapFree:        3000000 kB\n",
        );
        fs.add_file("/proc/vmstat", "nr_free_pages 500000\npgfault 700000\npgmajfault 300\n");
        fs.add_file("/proc/loadavg", "1.25 0.80 0.60 3/400 4242\n");
        fs.add_file(
            "/proc/diskstats",
            "   8       0 sda 1000 100 80000 500 2000 200 160000 900 0 1200 1400 0 0 0 0\n\
                8       1 sda1 900 90 70000 450 1900 190 150000 850 0 1100 1300 0 0 0 0\n\
              259       0 nvme0n1 10 1 800 5 20 2 1600 9 1 12 14 0 0 0 0\n\
                7       0 loop0 5 0 40 1 0 0 0 0 0 1 1 0 0 0 0\n",
        );
        fs.add_file(
            "/proc/net/dev",
            "Inter-|   Receive                                                |  Transmit\n \
             face |bytes    packets errs drop fifo frame compressed multicast|bytes    packets errs drop fifo colls carrier compressed\n    \
             lo: 9999 99 0 0 0 0 0 0 9999 99 0 0 0 0 0 0\n  \
             eth0: 10000 100 1 2 0 0 0 0 20000 200 3 4 0 0 0 0\n  \
             eth1: 500 5 0 0 0 0 0 0 700 7 0 1 0 0 0 0\n",
        );
        fs.add_file(
            "/proc/cpuinfo",
            "processor\t: 0\nmodel name\t: Intel(R) Xeon(R) Platinum 8480+\n\n\
             processor\t: 1\nmodel name\t: Intel(R) Xeon(R) Platinum 8480+\n",
        );
        fs.add_file("/proc/sys/kernel/hostname", "gpu-node-7\n");
        fs.add_file("/proc/sys/kernel/osrelease", "6.8.0-45-generic\n");
        fs.add_file("/etc/machine-id", "0123456789abcdef0123456789abcdef\n");
        fs.add_file(
            "/proc/self/cgroup",
            "0::/kubepods/burstable/pod1234/3f4e5d6c7b8a9f0e1d2c3b4a5968778695a4b3c2d1e0f9a8b7c6d5e4f3a2b1c0\n",
        );

        fs.add_process(
            4242,
            "4242 (python3) S 1 4242 4242 0 -1 4194304 900 0 4 0 \
             300 120 10 5 20 0 24 0 5000 8000000000 50000 18446744073709551615 \
             0 0 0 0 0 0 0 0 0 0 0 0 17 1 0 0 6 0 0",
            "Name:\tpython3\nVmRSS:\t  204800 kB\nvoluntary_ctxt_switches:\t1500\nnonvoluntary_ctxt_switches:\t42\n",
            "python3\0-m\0vllm.entrypoints.openai.api_server\0",
        );
        fs.add_process(
            1,
            "1 (init) S 0 1 1 0 -1 4194560 100 0 0 0 \
             5 3 0 0 20 0 1 0 1 20000000 300 18446744073709551615 \
             0 0 0 0 0 0 0 0 0 0 0 0 17 0 0 0 0 0 0",
            "Name:\tinit\nVmRSS:\t    1200 kB\nvoluntary_ctxt_switches:\t10\nnonvoluntary_ctxt_switches:\t1\n",
            "/sbin/init\0",
        );

        fs.add_file("/sys/fs/cgroup/cgroup.controllers", "cpu io memory pids\n");
        fs.add_file(
            "/sys/fs/cgroup/cpu.stat",
            "usage_usec 2500000\nuser_usec 2000000\nsystem_usec 500000\n",
        );
        fs.add_file("/sys/fs/cgroup/memory.current", "734003200\n");
        fs.add_file("/sys/fs/cgroup/memory.peak", "1073741824\n");
        fs.add_file("/sys/fs/cgroup/memory.stat", "anon 100\npgfault 9000\npgmajfault 12\n");
        fs.add_file(
            "/sys/fs/cgroup/io.stat",
            "8:0 rbytes=4096 wbytes=8192 rios=1 wios=2 dbytes=0 dios=0\n\
             259:0 rbytes=1024 wbytes=0 rios=1 wios=0 dbytes=0 dios=0\n",
        );
        fs.add_file("/sys/fs/cgroup/pids.current", "17\n");

        fs
    }
}

impl FileSystem for MockFs {
    fn read_to_string(&self, path: &Path) -> io::Result<String> {
        self.files.get(path).cloned().ok_or_else(|| {
            io::Error::new(io::ErrorKind::NotFound, format!("file not found: {path:?}"))
        })
    }

    fn exists(&self, path: &Path) -> bool {
        self.files.contains_key(path) || self.directories.contains(path)
    }

    fn read_dir(&self, path: &Path) -> io::Result<Vec<PathBuf>> {
        if !self.directories.contains(path) {
            return Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("directory not found: {path:?}"),
            ));
        }

        let children: HashSet<PathBuf> = self
            .files
            .keys()
            .chain(self.directories.iter())
            .filter(|p| p.parent() == Some(path) && p.as_path() != path)
            .cloned()
            .collect();
        Ok(children.into_iter().collect())
    }
}
