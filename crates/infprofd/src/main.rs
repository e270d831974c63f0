//! infprofd - telemetry sampler for inference workloads.
//!
//! Samples host, container, accelerator and inference-server metrics at a
//! fixed interval and writes them as JSONL, Parquet, CSV or TSV, optionally
//! while supervising a child command. `snapshot` prints one capture and
//! `serve` exposes captures over HTTP.

use tikv_jemallocator::Jemalloc;
#[global_allocator]
static GLOBAL: Jemalloc = Jemalloc;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{Level, error, info};
use tracing_subscriber::EnvFilter;

use infprof_core::config::{CollectorToggles, DEFAULT_MAX_PROCESSES, DEFAULT_OUTPUT_DIR, ProfilerConfig};
use infprof_core::export::{ExportFormat, ExportMode};
use infprof_core::profiler::{CaptureScope, Capturer, Profiler, RunOutcome};
use infprof_core::record::RecordLayout;
use infprof_core::scraper::DEFAULT_SCRAPE_URL;

mod serve;

/// Telemetry sampler for inference workloads.
#[derive(Parser, Debug)]
#[command(name = "infprofd", about = "Telemetry sampler for inference workloads", version)]
struct Cli {
    /// Increase logging verbosity (-v for debug, -vv for trace). Default is info level.
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Quiet mode - only show errors.
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Sample at a fixed interval until interrupted or the supervised
    /// command exits.
    #[command(visible_alias = "profile")]
    Run(RunArgs),
    /// Print or save one capture of static and/or dynamic metrics.
    Snapshot(SnapshotArgs),
    /// Serve live captures over HTTP.
    Serve(ServeArgs),
}

/// Collector selection shared by every command.
#[derive(Args, Debug)]
struct CollectArgs {
    #[arg(long)]
    no_cpu: bool,

    #[arg(long)]
    no_memory: bool,

    #[arg(long)]
    no_disk: bool,

    #[arg(long)]
    no_network: bool,

    #[arg(long)]
    no_container: bool,

    #[arg(long)]
    no_procs: bool,

    #[arg(long)]
    no_accelerator: bool,

    /// Skip per-device process lists.
    #[arg(long)]
    no_gpu_procs: bool,

    /// Skip the inference-server metrics scrape.
    #[arg(long)]
    no_vllm: bool,

    /// Store accelerator and process lists as JSON strings instead of
    /// indexed columns. Ignored with --stream.
    #[arg(long)]
    no_flatten: bool,

    /// Processes written per record in the flatten layout.
    #[arg(long, default_value_t = DEFAULT_MAX_PROCESSES)]
    max_processes: usize,

    /// Inference-server metrics endpoint.
    #[arg(long, env = "VLLM_METRICS_URL", default_value = DEFAULT_SCRAPE_URL)]
    scrape_url: String,

    /// Scrape timeout in milliseconds.
    #[arg(long, default_value_t = 500)]
    scrape_timeout_ms: u64,

    /// Path to /proc filesystem (for testing/mocking).
    #[arg(long, default_value = "/proc")]
    proc_path: PathBuf,

    /// Path to cgroup filesystem.
    #[arg(long, default_value = "/sys/fs/cgroup")]
    cgroup_path: PathBuf,
}

impl CollectArgs {
    /// Config with these collectors and defaults elsewhere.
    fn into_config(self) -> ProfilerConfig {
        ProfilerConfig {
            layout: if self.no_flatten {
                RecordLayout::Json
            } else {
                RecordLayout::Flatten
            },
            max_processes: self.max_processes,
            scrape_url: self.scrape_url,
            scrape_timeout: Duration::from_millis(self.scrape_timeout_ms),
            collectors: CollectorToggles {
                cpu: !self.no_cpu,
                memory: !self.no_memory,
                disk: !self.no_disk,
                network: !self.no_network,
                container: !self.no_container,
                processes: !self.no_procs,
                accelerator: !self.no_accelerator,
                accelerator_processes: !self.no_gpu_procs,
                inference: !self.no_vllm,
            },
            proc_path: self.proc_path,
            cgroup_path: self.cgroup_path,
            ..ProfilerConfig::default()
        }
    }
}

#[derive(Args, Debug)]
struct RunArgs {
    /// Output directory for records and static info.
    #[arg(short, long, default_value = DEFAULT_OUTPUT_DIR)]
    output_dir: PathBuf,

    /// Sampling interval in milliseconds.
    #[arg(short = 't', long, default_value_t = 100)]
    interval_ms: u64,

    /// Output format: jsonl, parquet, csv or tsv.
    #[arg(short, long, default_value = "jsonl")]
    format: ExportFormat,

    /// Write records as they are sampled instead of at the end of the run.
    #[arg(long)]
    stream: bool,

    /// Keep intermediate snapshot files after the run.
    #[arg(long)]
    no_cleanup: bool,

    /// Write the first-to-last counter delta as <session>-delta.json.
    #[arg(long)]
    delta: bool,

    /// Column to include in the streaming schema even if the first record
    /// lacks it. Repeatable.
    #[arg(long = "declare-column", value_name = "KEY")]
    declared_columns: Vec<String>,

    /// Session id used in output file names. Random when omitted.
    #[arg(long)]
    session_id: Option<String>,

    #[command(flatten)]
    collect: CollectArgs,

    /// Command to run and supervise; sampling stops when it exits.
    #[arg(trailing_var_arg = true, allow_hyphen_values = true, value_name = "COMMAND")]
    command: Vec<String>,
}

impl RunArgs {
    fn into_config(self) -> ProfilerConfig {
        let base = self.collect.into_config();
        ProfilerConfig {
            output_dir: self.output_dir,
            session_id: self.session_id.unwrap_or(base.session_id),
            format: self.format,
            mode: if self.stream {
                ExportMode::Streaming
            } else {
                ExportMode::Batch
            },
            interval: Duration::from_millis(self.interval_ms),
            cleanup: !self.no_cleanup,
            delta: self.delta,
            declared_columns: self.declared_columns,
            subprocess: (!self.command.is_empty()).then_some(self.command),
            handle_signals: true,
            ..base
        }
    }
}

#[derive(Args, Debug)]
struct SnapshotArgs {
    /// Only the run-constant host information.
    #[arg(long = "static", conflicts_with = "dynamic")]
    static_only: bool,

    /// Only one sample of dynamic metrics.
    #[arg(long)]
    dynamic: bool,

    /// Write the JSON here instead of stdout.
    #[arg(short, long)]
    output: Option<PathBuf>,

    #[command(flatten)]
    collect: CollectArgs,
}

impl SnapshotArgs {
    fn scope(&self) -> CaptureScope {
        match (self.static_only, self.dynamic) {
            (true, false) => CaptureScope::Static,
            (false, true) => CaptureScope::Dynamic,
            _ => CaptureScope::Both,
        }
    }
}

#[derive(Args, Debug)]
struct ServeArgs {
    /// Listen address.
    #[arg(long, default_value = "0.0.0.0:8080")]
    addr: SocketAddr,

    #[command(flatten)]
    collect: CollectArgs,
}

fn init_logging(verbose: u8, quiet: bool) {
    let level = if quiet {
        Level::ERROR
    } else {
        match verbose {
            0 => Level::INFO,
            1 => Level::DEBUG,
            _ => Level::TRACE,
        }
    };

    let mut filter = EnvFilter::from_default_env();
    for target in ["infprofd", "infprof_core"] {
        if let Ok(directive) = format!("{}={}", target, level).parse() {
            filter = filter.add_directive(directive);
        }
    }

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

/// The child's exit code when one was supervised, else 1 if the output
/// could not be finalized.
fn exit_status(outcome: &RunOutcome) -> u8 {
    match outcome.child_exit_code {
        Some(code) => u8::try_from(code).unwrap_or(1),
        None if outcome.export_failed => 1,
        None => 0,
    }
}

async fn run(args: RunArgs) -> ExitCode {
    info!(
        "Config: interval={}ms, output={}, format={}, proc={}",
        args.interval_ms,
        args.output_dir.display(),
        args.format,
        args.collect.proc_path.display()
    );

    let mut profiler = match Profiler::from_config(args.into_config()) {
        Ok(p) => p,
        Err(e) => {
            error!("Startup failed: {}", e);
            return ExitCode::FAILURE;
        }
    };

    match profiler.run(CancellationToken::new()).await {
        Ok(outcome) => {
            info!("Shutdown complete");
            ExitCode::from(exit_status(&outcome))
        }
        Err(e) => {
            error!("Run failed: {}", e);
            ExitCode::FAILURE
        }
    }
}

async fn snapshot(args: SnapshotArgs) -> ExitCode {
    let scope = args.scope();
    let capturer = Capturer::from_config(&args.collect.into_config());
    let captured = match capturer.capture(scope).await {
        Ok(c) => c,
        Err(e) => {
            error!("Snapshot failed: {}", e);
            return ExitCode::FAILURE;
        }
    };
    let json = match serde_json::to_string_pretty(&captured) {
        Ok(j) => j,
        Err(e) => {
            error!("Failed to encode snapshot: {}", e);
            return ExitCode::FAILURE;
        }
    };

    match args.output {
        Some(path) => match std::fs::write(&path, json) {
            Ok(()) => {
                info!(%scope, "Snapshot saved to {}", path.display());
                ExitCode::SUCCESS
            }
            Err(e) => {
                error!("Failed to write {}: {}", path.display(), e);
                ExitCode::FAILURE
            }
        },
        None => {
            println!("{}", json);
            ExitCode::SUCCESS
        }
    }
}

async fn serve_http(args: ServeArgs) -> ExitCode {
    let capturer = Arc::new(Capturer::from_config(&args.collect.into_config()));
    match serve::serve(args.addr, capturer, CancellationToken::new()).await {
        Ok(()) => {
            info!("Shutdown complete");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("Server failed on {}: {}", args.addr, e);
            ExitCode::FAILURE
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.quiet);

    info!("infprofd {} starting", env!("CARGO_PKG_VERSION"));

    match cli.command {
        Command::Run(args) => run(args).await,
        Command::Snapshot(args) => snapshot(args).await,
        Command::Serve(args) => serve_http(args).await,
    }
}
