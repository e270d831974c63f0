//! Sampling orchestrator.
//!
//! ```text
//! Initializing ──► Sampling ──► Draining ──► Finalizing ──► Closed
//!   static info      tick: scrape, collect,     final       exporter
//!   child spawn      flatten, export            sample      finalize
//! ```
//!
//! Sampling ends on whichever comes first: the cancellation token, a
//! SIGINT/SIGTERM, or the supervised child exiting. Collection, export and
//! finalize run on the blocking pool behind one mutex, so cycles never
//! overlap and the sample counter has a single writer. Signal handlers are
//! held by a [`SignalGuard`] for the length of one run.

mod capture;
mod signals;

pub use capture::{CaptureMap, CaptureScope, Capturer, capture_with};
pub use signals::SignalGuard;

use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::process::{Child, Command};
use tokio::time::{MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::collector::{CollectError, Collector, FileSystem, RealFs};
use crate::config::{ConfigError, ProfilerConfig};
use crate::export::{ExportError, Exporter};
use crate::model::StaticInfo;
use crate::record::{DeltaScope, FlatRecord, FlattenOptions, delta_record, flatten, record_timestamp};
use crate::scraper::{MetricScraper, ScrapeResult};

const PROGRESS_EVERY: u64 = 100;

/// Error type for failures that abort a run.
#[derive(Debug)]
pub enum ProfilerError {
    Config(ConfigError),
    Collect(CollectError),
    Export(ExportError),
    /// The supervised child could not be started.
    Spawn(std::io::Error),
    /// A sampling task panicked.
    Join(tokio::task::JoinError),
}

impl std::fmt::Display for ProfilerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProfilerError::Config(e) => write!(f, "invalid configuration: {}", e),
            ProfilerError::Collect(e) => write!(f, "collection failed: {}", e),
            ProfilerError::Export(e) => write!(f, "export failed: {}", e),
            ProfilerError::Spawn(e) => write!(f, "failed to start subprocess: {}", e),
            ProfilerError::Join(e) => write!(f, "sampling task failed: {}", e),
        }
    }
}

impl std::error::Error for ProfilerError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ProfilerError::Config(e) => Some(e),
            ProfilerError::Collect(e) => Some(e),
            ProfilerError::Export(e) => Some(e),
            ProfilerError::Spawn(e) => Some(e),
            ProfilerError::Join(e) => Some(e),
        }
    }
}

impl From<ConfigError> for ProfilerError {
    fn from(e: ConfigError) -> Self {
        ProfilerError::Config(e)
    }
}

impl From<CollectError> for ProfilerError {
    fn from(e: CollectError) -> Self {
        ProfilerError::Collect(e)
    }
}

impl From<ExportError> for ProfilerError {
    fn from(e: ExportError) -> Self {
        ProfilerError::Export(e)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Initializing,
    Sampling,
    Draining,
    Finalizing,
    Closed,
}

/// How a run ended.
#[derive(Debug, Clone, PartialEq)]
pub struct RunOutcome {
    /// Cycles successfully exported, the final one included.
    pub samples: u64,
    /// Child exit code, or 128 + signal number when it was killed.
    pub child_exit_code: Option<i32>,
    /// Ended by the token or a signal rather than by the child.
    pub cancelled: bool,
    pub output_path: PathBuf,
    /// Finalizing the output failed; details were logged.
    pub export_failed: bool,
}

/// Everything one sampling cycle touches.
struct SamplerState<F: FileSystem> {
    collector: Collector<F>,
    exporter: Exporter,
    options: FlattenOptions,
    samples: u64,
    /// First and latest exported records, kept for the run delta.
    first: Option<FlatRecord>,
    last: Option<FlatRecord>,
}

impl<F: FileSystem> SamplerState<F> {
    /// Collects, flattens and exports one cycle. A failed export is
    /// logged and the cycle skipped.
    fn cycle(&mut self, inference: Option<ScrapeResult>) {
        let mut snapshot = self.collector.collect_snapshot();
        snapshot.inference = inference;
        let record = flatten(&snapshot, &self.options);

        let written = self.exporter.write_cycle(std::slice::from_ref(&record));
        match written {
            Ok(()) => {
                self.samples += 1;
                if self.samples.is_multiple_of(PROGRESS_EVERY) {
                    info!(samples = self.samples, "Sampling progress");
                }
                if self.first.is_none() {
                    self.first = Some(record.clone());
                }
                self.last = Some(record);
            }
            Err(e) => error!(error = %e, "Export failed, cycle skipped"),
        }
    }

    /// Finalizes the export, writes the delta record and removes
    /// intermediates as requested.
    fn finish(&mut self, delta: bool, cleanup: bool) -> Result<(), ProfilerError> {
        self.exporter.finalize()?;
        if delta {
            self.save_delta()?;
        }
        if cleanup {
            self.exporter.cleanup()?;
        }
        Ok(())
    }

    fn save_delta(&self) -> Result<(), ProfilerError> {
        let (Some(first), Some(last)) = (&self.first, &self.last) else {
            debug!("No samples, delta record skipped");
            return Ok(());
        };
        let duration_ms = (record_timestamp(last) - record_timestamp(first)) / 1_000_000;
        let record = delta_record(first, last, duration_ms, DeltaScope::Counters);
        let path = self.exporter.save_delta(&record)?;
        info!(duration_ms, "Delta record saved to {}", path.display());
        Ok(())
    }
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

pub struct Profiler<F: FileSystem + 'static> {
    config: ProfilerConfig,
    state: Arc<Mutex<SamplerState<F>>>,
    scraper: Option<MetricScraper>,
    static_info: StaticInfo,
    output_path: PathBuf,
    phase: Phase,
    finalized: bool,
}

impl Profiler<RealFs> {
    /// Profiler over the real `/proc` and cgroup paths of `config`.
    pub fn from_config(config: ProfilerConfig) -> Result<Self, ProfilerError> {
        let collector = Collector::new(RealFs::new(), &config.proc_path, &config.cgroup_path);
        Self::new(config, collector)
    }
}

impl<F: FileSystem + 'static> Profiler<F> {
    /// Validates the config, collects and persists static info and opens
    /// the exporter. Any failure here is fatal.
    pub fn new(config: ProfilerConfig, collector: Collector<F>) -> Result<Self, ProfilerError> {
        let config = config.validated()?;
        let mut collector = collector.with_toggles(config.collectors.clone());

        let static_info = collector.collect_static(&config.session_id)?;

        let exporter = Exporter::open(
            &config.output_dir,
            &config.session_id,
            config.format,
            config.mode,
        )?
        .with_declared_columns(config.declared_columns.clone());
        let static_path = exporter.save_static(&static_info)?;
        info!("Static info saved to {}", static_path.display());

        let scraper = if config.collectors.inference {
            match MetricScraper::new(config.scrape_url.clone(), config.scrape_timeout) {
                Ok(s) => Some(s),
                Err(e) => {
                    warn!(error = %e, "Metric scraper disabled: client setup failed");
                    None
                }
            }
        } else {
            None
        };

        info!(
            session = %config.session_id,
            format = %config.format,
            mode = %config.mode,
            layout = %config.layout,
            interval_ms = config.interval.as_millis() as u64,
            "Profiler initialized"
        );

        let output_path = exporter.output_path().to_path_buf();
        Ok(Self {
            state: Arc::new(Mutex::new(SamplerState {
                collector,
                exporter,
                options: config.flatten_options(),
                samples: 0,
                first: None,
                last: None,
            })),
            config,
            scraper,
            static_info,
            output_path,
            phase: Phase::Initializing,
            finalized: false,
        })
    }

    pub fn config(&self) -> &ProfilerConfig {
        &self.config
    }

    pub fn static_info(&self) -> &StaticInfo {
        &self.static_info
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn samples(&self) -> u64 {
        lock(&self.state).samples
    }

    /// Runs one collect-and-export cycle on the blocking pool.
    pub async fn sample(&self) -> Result<(), ProfilerError> {
        let inference = match &self.scraper {
            Some(scraper) => Some(scraper.scrape().await),
            None => None,
        };
        let state = Arc::clone(&self.state);
        tokio::task::spawn_blocking(move || lock(&state).cycle(inference))
            .await
            .map_err(ProfilerError::Join)
    }

    /// Samples until cancelled, signalled, or the child exits, then takes
    /// one final sample, finalizes the export and releases collectors.
    pub async fn run(&mut self, cancel: CancellationToken) -> Result<RunOutcome, ProfilerError> {
        if self.finalized {
            return Err(ProfilerError::Export(ExportError::Closed));
        }

        let mut child = match &self.config.subprocess {
            Some(argv) => Some(spawn_child(argv)?),
            None => None,
        };

        // Dropped when run returns, restoring the previous dispositions.
        let mut signals = if self.config.handle_signals {
            match SignalGuard::install() {
                Ok(guard) => Some(guard),
                Err(e) => {
                    warn!(error = %e, "Failed to install signal handlers");
                    None
                }
            }
        } else {
            None
        };

        self.phase = Phase::Sampling;
        let mut ticker = interval(self.config.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut cancelled = false;
        let mut child_exit_code = None;

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    info!("Cancellation requested");
                    cancelled = true;
                    break;
                }
                name = wait_signal(&mut signals) => {
                    info!("Received {}, shutting down", name);
                    cancelled = true;
                    break;
                }
                status = wait_child(&mut child) => {
                    match status {
                        Ok(status) => {
                            let code = exit_code(status);
                            info!(exit_code = code, "Subprocess exited");
                            child_exit_code = Some(code);
                        }
                        Err(e) => error!(error = %e, "Failed to wait for subprocess"),
                    }
                    child = None;
                    break;
                }
                _ = ticker.tick() => {
                    self.sample().await?;
                }
            }
        }

        self.phase = Phase::Draining;
        self.sample().await?;

        if let Some(mut child) = child.take() {
            debug!("Stopping subprocess");
            if let Err(e) = child.start_kill() {
                warn!(error = %e, "Failed to kill subprocess");
            }
            match child.wait().await {
                Ok(status) => child_exit_code = Some(exit_code(status)),
                Err(e) => error!(error = %e, "Failed to reap subprocess"),
            }
        }

        let export_failed = match self.finalize().await {
            Ok(()) => false,
            Err(e) => {
                error!(error = %e, "Failed to finalize export");
                true
            }
        };
        self.close();

        let outcome = RunOutcome {
            samples: self.samples(),
            child_exit_code,
            cancelled,
            output_path: self.output_path.clone(),
            export_failed,
        };
        info!(
            samples = outcome.samples,
            cancelled = outcome.cancelled,
            "Profiler stopped, output: {}",
            outcome.output_path.display()
        );
        Ok(outcome)
    }

    /// Finalizes the export on the blocking pool, writes the delta record
    /// and removes intermediates when configured. Repeated calls are no-ops.
    pub async fn finalize(&mut self) -> Result<(), ProfilerError> {
        if !self.begin_finalize() {
            return Ok(());
        }
        let state = Arc::clone(&self.state);
        let (delta, cleanup) = (self.config.delta, self.config.cleanup);
        tokio::task::spawn_blocking(move || lock(&state).finish(delta, cleanup))
            .await
            .map_err(ProfilerError::Join)?
    }

    /// Marks the profiler finalized; false if it already was.
    fn begin_finalize(&mut self) -> bool {
        if self.finalized {
            return false;
        }
        self.finalized = true;
        if self.phase != Phase::Closed {
            self.phase = Phase::Finalizing;
        }
        true
    }

    /// Releases collector resources. Safe to call more than once.
    pub fn close(&mut self) {
        if self.phase == Phase::Closed {
            return;
        }
        lock(&self.state).collector.close();
        self.phase = Phase::Closed;
    }
}

impl<F: FileSystem + 'static> Drop for Profiler<F> {
    fn drop(&mut self) {
        if self.begin_finalize() {
            let (delta, cleanup) = (self.config.delta, self.config.cleanup);
            if let Err(e) = lock(&self.state).finish(delta, cleanup) {
                error!("Failed to finalize profiler on drop: {}", e);
            }
        }
        self.close();
    }
}

fn spawn_child(argv: &[String]) -> Result<Child, ProfilerError> {
    let (program, args) = argv
        .split_first()
        .ok_or(ProfilerError::Config(ConfigError::EmptyCommand))?;
    let child = Command::new(program)
        .args(args)
        .stdin(Stdio::inherit())
        .stdout(Stdio::inherit())
        .stderr(Stdio::inherit())
        .kill_on_drop(true)
        .spawn()
        .map_err(ProfilerError::Spawn)?;
    info!(pid = child.id().unwrap_or(0), "Started subprocess: {}", argv.join(" "));
    Ok(child)
}

/// Resolves when the child exits; never resolves without a child.
async fn wait_child(child: &mut Option<Child>) -> std::io::Result<ExitStatus> {
    match child {
        Some(child) => child.wait().await,
        None => std::future::pending().await,
    }
}

fn exit_code(status: ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return 128 + signal;
        }
    }
    1
}

/// Resolves with the signal's name; never resolves without a guard.
async fn wait_signal(guard: &mut Option<SignalGuard>) -> &'static str {
    match guard {
        Some(guard) => guard.recv().await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::MockFs;
    use crate::config::CollectorToggles;
    use crate::export::{ExportFormat, ExportMode};
    use std::time::Duration;

    fn test_config(dir: &std::path::Path) -> ProfilerConfig {
        ProfilerConfig {
            output_dir: dir.to_path_buf(),
            session_id: "run".into(),
            interval: Duration::from_millis(10),
            handle_signals: false,
            collectors: CollectorToggles {
                inference: false,
                ..CollectorToggles::default()
            },
            ..ProfilerConfig::default()
        }
    }

    fn collector() -> Collector<MockFs> {
        Collector::new(MockFs::typical_system(), "/proc", "/sys/fs/cgroup")
    }

    fn jsonl_rows(path: &std::path::Path) -> Vec<serde_json::Value> {
        std::fs::read_to_string(path)
            .unwrap()
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect()
    }

    #[tokio::test]
    async fn test_pre_cancelled_run_takes_one_final_sample() {
        let dir = tempfile::tempdir().unwrap();
        let mut profiler = Profiler::new(test_config(dir.path()), collector()).unwrap();
        assert_eq!(profiler.phase(), Phase::Initializing);
        assert!(dir.path().join("run.json").exists());

        let cancel = CancellationToken::new();
        cancel.cancel();
        let outcome = profiler.run(cancel).await.unwrap();

        assert!(outcome.cancelled);
        assert_eq!(outcome.samples, 1);
        assert_eq!(outcome.child_exit_code, None);
        assert!(!outcome.export_failed);
        assert_eq!(profiler.phase(), Phase::Closed);

        let rows = jsonl_rows(&outcome.output_path);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["processCount"], 2);
        assert!(!dir.path().join("run-snapshots").exists());
    }

    #[tokio::test]
    async fn test_run_until_cancelled() {
        let dir = tempfile::tempdir().unwrap();
        let mut profiler = Profiler::new(test_config(dir.path()), collector()).unwrap();

        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(80)).await;
            trigger.cancel();
        });
        let outcome = profiler.run(cancel).await.unwrap();

        assert!(outcome.cancelled);
        assert!(outcome.samples >= 2);
        let rows = jsonl_rows(&outcome.output_path);
        assert_eq!(rows.len() as u64, outcome.samples);

        let ts: Vec<i64> = rows.iter().map(|r| r["timestamp"].as_i64().unwrap()).collect();
        assert!(ts.windows(2).all(|w| w[0] <= w[1]));
    }

    #[tokio::test]
    async fn test_finalize_and_close_are_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let mut profiler = Profiler::new(test_config(dir.path()), collector()).unwrap();
        profiler.sample().await.unwrap();

        profiler.finalize().await.unwrap();
        profiler.finalize().await.unwrap();
        profiler.close();
        profiler.close();
        assert_eq!(profiler.phase(), Phase::Closed);
        assert_eq!(profiler.samples(), 1);

        let err = profiler.run(CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, ProfilerError::Export(ExportError::Closed)));
    }

    #[tokio::test]
    async fn test_drop_finalizes_output() {
        let dir = tempfile::tempdir().unwrap();
        {
            let profiler = Profiler::new(test_config(dir.path()), collector()).unwrap();
            profiler.sample().await.unwrap();
            profiler.sample().await.unwrap();
        }
        assert_eq!(jsonl_rows(&dir.path().join("run.jsonl")).len(), 2);
    }

    #[tokio::test]
    async fn test_streaming_parquet_run() {
        let dir = tempfile::tempdir().unwrap();
        let config = ProfilerConfig {
            format: ExportFormat::Parquet,
            mode: ExportMode::Streaming,
            ..test_config(dir.path())
        };
        let mut profiler = Profiler::new(config, collector()).unwrap();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let outcome = profiler.run(cancel).await.unwrap();

        let file = std::fs::File::open(&outcome.output_path).unwrap();
        let reader = ::parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder::try_new(file)
            .unwrap()
            .build()
            .unwrap();
        let rows: usize = reader.map(|b| b.unwrap().num_rows()).sum();
        assert_eq!(rows as u64, outcome.samples);
    }

    #[tokio::test]
    async fn test_unreachable_inference_endpoint_is_recorded_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let config = ProfilerConfig {
            scrape_url: "http://127.0.0.1:1/metrics".into(),
            scrape_timeout: Duration::from_millis(100),
            collectors: CollectorToggles::default(),
            ..test_config(dir.path())
        };
        let mut profiler = Profiler::new(config, collector()).unwrap();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let outcome = profiler.run(cancel).await.unwrap();

        let rows = jsonl_rows(&outcome.output_path);
        assert_eq!(rows[0]["vllmAvailable"], false);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_child_exit_ends_run_with_its_code() {
        let dir = tempfile::tempdir().unwrap();
        let config = ProfilerConfig {
            subprocess: Some(vec!["sh".into(), "-c".into(), "exit 3".into()]),
            ..test_config(dir.path())
        };
        let mut profiler = Profiler::new(config, collector()).unwrap();
        let outcome = profiler.run(CancellationToken::new()).await.unwrap();

        assert!(!outcome.cancelled);
        assert_eq!(outcome.child_exit_code, Some(3));
        assert!(outcome.samples >= 1);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_cancel_kills_child() {
        let dir = tempfile::tempdir().unwrap();
        let config = ProfilerConfig {
            subprocess: Some(vec!["sleep".into(), "30".into()]),
            ..test_config(dir.path())
        };
        let mut profiler = Profiler::new(config, collector()).unwrap();

        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trigger.cancel();
        });
        let outcome = profiler.run(cancel).await.unwrap();

        assert!(outcome.cancelled);
        assert_eq!(outcome.child_exit_code, Some(128 + 9));
    }

    /// Sleeps once on the next `/proc/stat` read after being armed.
    struct StallingFs {
        inner: MockFs,
        stall: Arc<Mutex<Option<Duration>>>,
    }

    impl FileSystem for StallingFs {
        fn read_to_string(&self, path: &std::path::Path) -> std::io::Result<String> {
            if path == std::path::Path::new("/proc/stat") {
                if let Some(delay) = lock(&self.stall).take() {
                    std::thread::sleep(delay);
                }
            }
            self.inner.read_to_string(path)
        }

        fn exists(&self, path: &std::path::Path) -> bool {
            self.inner.exists(path)
        }

        fn read_dir(&self, path: &std::path::Path) -> std::io::Result<Vec<PathBuf>> {
            self.inner.read_dir(path)
        }
    }

    #[tokio::test]
    async fn test_slow_cycle_delays_next_tick_instead_of_bursting() {
        let dir = tempfile::tempdir().unwrap();
        let stall = Arc::new(Mutex::new(None));
        let fs = StallingFs {
            inner: MockFs::typical_system(),
            stall: Arc::clone(&stall),
        };
        let config = ProfilerConfig {
            interval: Duration::from_millis(50),
            ..test_config(dir.path())
        };
        let mut profiler =
            Profiler::new(config, Collector::new(fs, "/proc", "/sys/fs/cgroup")).unwrap();
        *lock(&stall) = Some(Duration::from_millis(300));

        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(700)).await;
            trigger.cancel();
        });
        let outcome = profiler.run(cancel).await.unwrap();

        let rows = jsonl_rows(&outcome.output_path);
        assert_eq!(rows.len() as u64, outcome.samples);
        assert!(outcome.samples >= 3);
        assert!(outcome.samples <= 700 / 50 + 2);

        // The last row is the final sample taken on cancellation, not a tick.
        let ts: Vec<i64> = rows.iter().map(|r| r["timestamp"].as_i64().unwrap()).collect();
        let gaps: Vec<i64> = ts[..ts.len() - 1].windows(2).map(|w| w[1] - w[0]).collect();
        assert!(gaps.iter().any(|g| *g >= 300_000_000), "stall not observed: {gaps:?}");
        assert!(
            gaps.iter().all(|g| *g >= 25_000_000),
            "missed ticks fired back to back: {gaps:?}"
        );
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_signal_ends_run_and_previous_handlers_return() {
        let _serial = signals::SERIAL.lock().unwrap_or_else(PoisonError::into_inner);
        let before_int = signals::current_handler(libc::SIGINT);
        let before_term = signals::current_handler(libc::SIGTERM);

        let dir = tempfile::tempdir().unwrap();
        let config = ProfilerConfig {
            handle_signals: true,
            ..test_config(dir.path())
        };
        let mut profiler = Profiler::new(config, collector()).unwrap();

        let cancel = CancellationToken::new();
        let fallback = cancel.clone();
        tokio::spawn(async move {
            while signals::live_guards() == 0 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
            // SAFETY: the run's handler is installed for SIGINT.
            unsafe {
                libc::raise(libc::SIGINT);
            }
            tokio::time::sleep(Duration::from_secs(2)).await;
            fallback.cancel();
        });
        let outcome = profiler.run(cancel).await.unwrap();

        assert!(outcome.cancelled);
        assert!(outcome.samples >= 1);
        assert_eq!(signals::live_guards(), 0);
        assert_eq!(signals::current_handler(libc::SIGINT), before_int);
        assert_eq!(signals::current_handler(libc::SIGTERM), before_term);

        drop(profiler);
        assert_eq!(signals::current_handler(libc::SIGINT), before_int);
    }

    #[tokio::test]
    async fn test_delta_record_written_on_finalize() {
        let dir = tempfile::tempdir().unwrap();
        let config = ProfilerConfig {
            delta: true,
            ..test_config(dir.path())
        };
        let mut profiler = Profiler::new(config, collector()).unwrap();
        profiler.sample().await.unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;
        profiler.sample().await.unwrap();
        profiler.finalize().await.unwrap();

        let rows = jsonl_rows(&dir.path().join("run.jsonl"));
        let text = std::fs::read_to_string(dir.path().join("run-delta.json")).unwrap();
        let delta: serde_json::Value = serde_json::from_str(&text).unwrap();

        assert_eq!(delta["_delta_start_ts"], rows[0]["timestamp"]);
        assert_eq!(delta["_delta_end_ts"], rows[1]["timestamp"]);
        assert!(delta["_delta_duration_ms"].as_i64().unwrap() >= 5);
        assert_eq!(delta["vCpuTime"], 0);
        assert_eq!(delta["vMemoryPercent"], rows[1]["vMemoryPercent"]);
    }

    #[tokio::test]
    async fn test_no_delta_record_by_default() {
        let dir = tempfile::tempdir().unwrap();
        let mut profiler = Profiler::new(test_config(dir.path()), collector()).unwrap();
        profiler.sample().await.unwrap();
        profiler.finalize().await.unwrap();
        assert!(!dir.path().join("run-delta.json").exists());
    }

    #[tokio::test]
    async fn test_missing_binary_is_spawn_error() {
        let dir = tempfile::tempdir().unwrap();
        let config = ProfilerConfig {
            subprocess: Some(vec!["/nonexistent/infprof-test-binary".into()]),
            ..test_config(dir.path())
        };
        let mut profiler = Profiler::new(config, collector()).unwrap();
        let err = profiler.run(CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, ProfilerError::Spawn(_)));
    }

    #[test]
    fn test_fatal_startup_errors() {
        let dir = tempfile::tempdir().unwrap();

        let missing_proc = Collector::new(MockFs::new(), "/proc", "/sys/fs/cgroup");
        let err = Profiler::new(test_config(dir.path()), missing_proc).err().unwrap();
        assert!(matches!(err, ProfilerError::Collect(_)));

        let bad = ProfilerConfig {
            interval: Duration::ZERO,
            ..test_config(dir.path())
        };
        let err = Profiler::new(bad, collector()).err().unwrap();
        assert!(matches!(err, ProfilerError::Config(ConfigError::InvalidInterval(_))));
    }
}
