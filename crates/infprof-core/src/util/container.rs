//! Container environment detection.
//!
//! Identifies whether the profiler runs inside a container (Docker,
//! Kubernetes, Podman, LXC, containerd) and, if so, the short container id
//! recorded in the static info.

use std::env;
use std::path::Path;

use crate::collector::FileSystem;

/// Reported when no container id can be derived.
pub const UNAVAILABLE_ID: &str = "unavailable";

const SHORT_ID_LEN: usize = 12;

const CGROUP_PATTERNS: [&str; 5] = [
    "kubepods",
    "docker",
    "containerd",
    "lxc",
    "/system.slice/containerd",
];

/// Returns `true` when any container marker is present.
pub fn is_container<F: FileSystem>(fs: &F, proc_path: &Path) -> bool {
    env::var("KUBERNETES_SERVICE_HOST").is_ok()
        || fs.exists(Path::new("/var/run/secrets/kubernetes.io/serviceaccount/token"))
        || fs.exists(Path::new("/.dockerenv"))
        || fs.exists(Path::new("/run/.containerenv"))
        || fs
            .read_to_string(&proc_path.join("1/cgroup"))
            .is_ok_and(|c| CGROUP_PATTERNS.iter().any(|p| c.contains(p)))
}

/// Short container id from `/proc/self/cgroup`, else a 12-hex-digit
/// hostname (the Docker default), else [`UNAVAILABLE_ID`].
pub fn container_id<F: FileSystem>(fs: &F, proc_path: &Path) -> String {
    if let Ok(content) = fs.read_to_string(&proc_path.join("self/cgroup")) {
        if let Some(id) = content.lines().find_map(id_from_cgroup_line) {
            return id;
        }
    }

    let hostname = fs
        .read_to_string(&proc_path.join("sys/kernel/hostname"))
        .unwrap_or_default();
    let hostname = hostname.trim();
    if hostname.len() == SHORT_ID_LEN && hostname.bytes().all(|b| b.is_ascii_hexdigit()) {
        return hostname.to_ascii_lowercase();
    }

    UNAVAILABLE_ID.to_string()
}

/// `hierarchy-id:controllers:path` with a Docker, containerd or Kubernetes
/// path yields the first 12 characters of the last path segment.
fn id_from_cgroup_line(line: &str) -> Option<String> {
    let path = line.splitn(3, ':').nth(2)?;
    if !["/docker/", "/kubepods", "cri-containerd-", "docker-"]
        .iter()
        .any(|p| path.contains(p))
    {
        return None;
    }

    let segment = path.rsplit('/').next()?;
    let segment = segment
        .trim_end_matches(".scope")
        .trim_start_matches("cri-containerd-")
        .trim_start_matches("docker-");
    if segment.len() < SHORT_ID_LEN || !segment.bytes().all(|b| b.is_ascii_hexdigit()) {
        return None;
    }
    Some(segment[..SHORT_ID_LEN].to_string())
}
