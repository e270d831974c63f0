//! Inference-engine metric scraper.
//!
//! Fetches a Prometheus text endpoint on a short timeout and folds it
//! into a [`ScrapeResult`]. A failed scrape never fails the sampling
//! cycle; it yields [`ScrapeResult::unavailable`].

mod parser;

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use serde::de::{self, Deserializer, MapAccess, Visitor};
use serde::ser::{SerializeMap, Serializer};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::model::now_ns;
use crate::record::FlatValue;

pub use parser::{ParseError, Sample, canonical_name, fold_key, parse_exposition, parse_line};

/// Default endpoint of a local vLLM server.
pub const DEFAULT_SCRAPE_URL: &str = "http://localhost:8000/metrics";
pub const DEFAULT_SCRAPE_TIMEOUT: Duration = Duration::from_millis(500);

/// One cumulative bucket. `key` is the `le` label text as scraped, with
/// the infinite bound spelled `"inf"`; `bound` orders the buckets.
#[derive(Clone, Debug, PartialEq)]
pub struct Bucket {
    pub bound: f64,
    pub key: String,
    pub count: f64,
}

impl Bucket {
    /// Builds a bucket from an `le` label value; `None` if it is not a
    /// number or an infinity.
    pub fn from_label(label: &str, count: f64) -> Option<Self> {
        let label = label.trim();
        let bound = parse_bound(label)?;
        let key = if bound == f64::INFINITY {
            "inf".to_string()
        } else {
            label.to_string()
        };
        Some(Self { bound, key, count })
    }
}

/// Parses a histogram bound; `+Inf`/`inf` is the terminal bound.
fn parse_bound(text: &str) -> Option<f64> {
    match text.to_ascii_lowercase().as_str() {
        "inf" | "+inf" => Some(f64::INFINITY),
        "-inf" => Some(f64::NEG_INFINITY),
        _ => text.parse::<f64>().ok().filter(|b| !b.is_nan()),
    }
}

/// Cumulative histogram buckets, ascending by upper bound.
///
/// The infinite bound, when present, is last. Serialized as an ordered
/// `le -> count` map keyed by the scraped label text.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Histogram {
    buckets: Vec<Bucket>,
}

impl Histogram {
    /// Sorts buckets by bound; for a repeated bound the last one wins.
    pub fn from_buckets(mut buckets: Vec<Bucket>) -> Self {
        buckets.sort_by(|a, b| a.bound.total_cmp(&b.bound));
        let mut sorted: Vec<Bucket> = Vec::with_capacity(buckets.len());
        for bucket in buckets {
            match sorted.last_mut() {
                Some(last) if last.bound == bucket.bound => *last = bucket,
                _ => sorted.push(bucket),
            }
        }
        Self { buckets: sorted }
    }

    pub fn buckets(&self) -> &[Bucket] {
        &self.buckets
    }

    pub fn bounds(&self) -> impl Iterator<Item = f64> + '_ {
        self.buckets.iter().map(|b| b.bound)
    }

    /// `(le key, cumulative count)` in bound order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> + '_ {
        self.buckets.iter().map(|b| (b.key.as_str(), b.count))
    }

    /// Count of the infinite bucket, i.e. the total observation count.
    pub fn total(&self) -> Option<f64> {
        self.buckets
            .last()
            .filter(|b| b.bound == f64::INFINITY)
            .map(|b| b.count)
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }
}

impl Serialize for Histogram {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.buckets.len()))?;
        for (key, count) in self.iter() {
            map.serialize_entry(key, &count)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for Histogram {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct HistogramVisitor;

        impl<'de> Visitor<'de> for HistogramVisitor {
            type Value = Histogram;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a map of histogram bound to cumulative count")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Histogram, A::Error> {
                let mut buckets = Vec::new();
                while let Some((key, count)) = access.next_entry::<String, f64>()? {
                    let bucket = Bucket::from_label(&key, count)
                        .ok_or_else(|| de::Error::custom(format!("invalid bound {key}")))?;
                    buckets.push(bucket);
                }
                Ok(Histogram::from_buckets(buckets))
            }
        }

        deserializer.deserialize_map(HistogramVisitor)
    }
}

/// One scrape, stamped with a single scrape-wide timestamp.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScrapeResult {
    /// False when the endpoint could not be reached or read.
    pub available: bool,
    /// Nanoseconds since epoch.
    pub timestamp: i64,
    pub scalars: BTreeMap<String, f64>,
    /// `_sum` series, keyed as a plain scalar would be.
    pub sums: BTreeMap<String, f64>,
    /// `_count` series, keyed as a plain scalar would be.
    pub counts: BTreeMap<String, f64>,
    pub histograms: BTreeMap<String, Histogram>,
    /// Labels of `_info` series.
    pub config: BTreeMap<String, FlatValue>,
    pub skipped_lines: usize,
}

impl ScrapeResult {
    /// Empty result for a failed scrape.
    pub fn unavailable(timestamp: i64) -> Self {
        Self {
            available: false,
            timestamp,
            ..Default::default()
        }
    }
}

/// HTTP client for one exposition endpoint.
pub struct MetricScraper {
    client: reqwest::Client,
    url: String,
}

impl MetricScraper {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .build()?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Fetches and parses the endpoint. Never fails.
    pub async fn scrape(&self) -> ScrapeResult {
        let ts = now_ns();
        match self.fetch().await {
            Ok(body) => parse_exposition(&body, ts),
            Err(e) => {
                debug!(url = %self.url, error = %e, "metric scrape failed");
                ScrapeResult::unavailable(ts)
            }
        }
    }

    async fn fetch(&self) -> Result<String, reqwest::Error> {
        self.client
            .get(&self.url)
            .send()
            .await?
            .error_for_status()?
            .text()
            .await
    }
}
