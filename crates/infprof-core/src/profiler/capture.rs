//! One-shot captures outside a sampling run.
//!
//! Backs `infprofd snapshot` and the HTTP endpoints of `infprofd serve`.
//! Nothing is written to disk: a capture is one JSON object holding the
//! static info, one flattened record, or both merged.

use std::str::FromStr;
use std::sync::{Arc, Mutex};

use serde_json::{Map, Value};
use tracing::warn;

use super::{ProfilerError, lock};
use crate::collector::{Collector, FileSystem, RealFs};
use crate::config::ProfilerConfig;
use crate::export::ExportError;
use crate::record::{FlattenOptions, flatten};
use crate::scraper::{MetricScraper, ScrapeResult};

/// JSON object returned by a capture.
pub type CaptureMap = Map<String, Value>;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum CaptureScope {
    Static,
    Dynamic,
    /// Static fields first; a dynamic key of the same name wins.
    #[default]
    Both,
}

impl CaptureScope {
    fn includes_static(self) -> bool {
        matches!(self, CaptureScope::Static | CaptureScope::Both)
    }

    fn includes_dynamic(self) -> bool {
        matches!(self, CaptureScope::Dynamic | CaptureScope::Both)
    }
}

impl FromStr for CaptureScope {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "static" => Ok(CaptureScope::Static),
            "dynamic" => Ok(CaptureScope::Dynamic),
            "both" => Ok(CaptureScope::Both),
            other => Err(format!("unknown capture scope: {}", other)),
        }
    }
}

impl std::fmt::Display for CaptureScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            CaptureScope::Static => "static",
            CaptureScope::Dynamic => "dynamic",
            CaptureScope::Both => "both",
        };
        f.write_str(s)
    }
}

/// Shared collector for repeated captures. Cheap to wrap in an `Arc`.
pub struct Capturer<F: FileSystem + 'static> {
    collector: Arc<Mutex<Collector<F>>>,
    scraper: Option<MetricScraper>,
    options: FlattenOptions,
    session_id: String,
}

impl Capturer<RealFs> {
    pub fn from_config(config: &ProfilerConfig) -> Self {
        let collector = Collector::new(RealFs::new(), &config.proc_path, &config.cgroup_path);
        Self::new(config, collector)
    }
}

impl<F: FileSystem + 'static> Capturer<F> {
    pub fn new(config: &ProfilerConfig, collector: Collector<F>) -> Self {
        let collector = collector.with_toggles(config.collectors.clone());
        let scraper = if config.collectors.inference {
            MetricScraper::new(config.scrape_url.clone(), config.scrape_timeout)
                .map_err(|e| warn!(error = %e, "Metric scraper disabled: client setup failed"))
                .ok()
        } else {
            None
        };
        Self {
            collector: Arc::new(Mutex::new(collector)),
            scraper,
            options: config.flatten_options(),
            session_id: config.session_id.clone(),
        }
    }

    /// Scrapes if needed, then collects on the blocking pool.
    pub async fn capture(&self, scope: CaptureScope) -> Result<CaptureMap, ProfilerError> {
        let inference = match &self.scraper {
            Some(scraper) if scope.includes_dynamic() => Some(scraper.scrape().await),
            _ => None,
        };
        let collector = Arc::clone(&self.collector);
        let options = self.options.clone();
        let session_id = self.session_id.clone();
        tokio::task::spawn_blocking(move || {
            capture_with(&mut lock(&collector), &session_id, scope, &options, inference)
        })
        .await
        .map_err(ProfilerError::Join)?
    }
}

/// Synchronous capture over a borrowed collector.
pub fn capture_with<F: FileSystem>(
    collector: &mut Collector<F>,
    session_id: &str,
    scope: CaptureScope,
    options: &FlattenOptions,
    inference: Option<ScrapeResult>,
) -> Result<CaptureMap, ProfilerError> {
    let mut out = CaptureMap::new();
    if scope.includes_static() {
        let info = collector.collect_static(session_id)?;
        if let Value::Object(fields) = serde_json::to_value(info).map_err(ExportError::from)? {
            out.extend(fields);
        }
    }
    if scope.includes_dynamic() {
        let mut snapshot = collector.collect_snapshot();
        snapshot.inference = inference;
        for (key, value) in flatten(&snapshot, options) {
            out.insert(key, serde_json::to_value(value).map_err(ExportError::from)?);
        }
    }
    Ok(out)
}
