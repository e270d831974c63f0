//! infprof-core — telemetry sampling library behind `infprofd`.
//!
//! Provides:
//! - `collector` — `/proc`, cgroup and accelerator collectors behind a `FileSystem` seam
//! - `model` — `Snapshot` and `StaticInfo` measurement types
//! - `record` — flattening snapshots into key/value records, schema inference, run deltas
//! - `export` — JSONL, Parquet, CSV and TSV output in streaming or batch mode
//! - `scraper` — Prometheus text-exposition scraper for inference servers
//! - `profiler` — the sampling orchestrator, scoped signal handling, one-shot captures
//! - `config` — run configuration
//! - `util` — helper utilities

pub mod collector;
pub mod config;
pub mod export;
pub mod model;
pub mod profiler;
pub mod record;
pub mod scraper;
pub mod util;
