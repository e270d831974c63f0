//! Parser for the Prometheus text exposition format.
//!
//! Pure functions over string input. [`parse_exposition`] folds a whole
//! scrape body into a [`ScrapeResult`].

use std::collections::BTreeMap;

use crate::record::FlatValue;

use super::{Bucket, Histogram, ScrapeResult};

/// Namespace prefix stripped from every metric name.
const VENDOR_PREFIX: &str = "vllm:";

/// Upstream metric names mapped to stable internal names.
const ALIASES: &[(&str, &str)] = &[
    ("num_requests_running", "system_requests_running"),
    ("num_requests_waiting", "system_requests_waiting"),
    ("engine_sleep_state", "system_engine_sleep_state"),
    ("num_preemptions", "system_preemptions_total"),
    ("kv_cache_usage_perc", "cache_kv_usage_percent"),
    ("prefix_cache_hits", "cache_prefix_hits"),
    ("prefix_cache_queries", "cache_prefix_queries"),
    ("mm_cache_hits", "cache_multimodal_hits"),
    ("mm_cache_queries", "cache_multimodal_queries"),
    ("request_success", "requests_finished_total"),
    ("corrupted_requests", "requests_corrupted_total"),
    ("prompt_tokens", "tokens_prompt_total"),
    ("generation_tokens", "tokens_generation_total"),
    ("time_to_first_token_seconds", "latency_ttft_s"),
    ("e2e_request_latency_seconds", "latency_e2e_s"),
    ("request_queue_time_seconds", "latency_queue_s"),
    ("request_inference_time_seconds", "latency_inference_s"),
    ("request_prefill_time_seconds", "latency_prefill_s"),
    ("request_decode_time_seconds", "latency_decode_s"),
    ("inter_token_latency_seconds", "latency_inter_token_s"),
];

/// High-cardinality labels never folded into a key.
const IGNORED_LABELS: &[&str] = &["model_name", "model", "engine_id", "engine", "handler", "method"];

const BOUND_LABEL: &str = "le";

/// Error type for a single malformed exposition line.
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

/// One sample line: `name{labels} value [timestamp]`.
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    pub name: String,
    /// Label pairs in encounter order.
    pub labels: Vec<(String, String)>,
    /// Raw value; may be NaN or infinite.
    pub value: f64,
}

/// Metric kind, decided by name suffix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Suffix {
    Bucket,
    Sum,
    Count,
    Info,
    Plain,
}

/// Parses one non-comment line.
pub fn parse_line(line: &str) -> Result<Sample, ParseError> {
    let line = line.trim();
    let name_end = line
        .find(|c: char| c == '{' || c.is_whitespace())
        .ok_or_else(|| ParseError::new("missing value"))?;
    let name = &line[..name_end];
    if !is_valid_name(name) {
        return Err(ParseError::new(format!("invalid metric name: {name}")));
    }

    let mut rest = &line[name_end..];
    let mut labels = Vec::new();
    if let Some(body) = rest.strip_prefix('{') {
        let close = find_label_end(body).ok_or_else(|| ParseError::new("unterminated label set"))?;
        labels = parse_labels(&body[..close])?;
        rest = &body[close + 1..];
    }

    let mut fields = rest.split_whitespace();
    let value_text = fields.next().ok_or_else(|| ParseError::new("missing value"))?;
    let value = parse_value(value_text)?;
    if let Some(ts) = fields.next() {
        ts.parse::<i64>()
            .map_err(|_| ParseError::new(format!("invalid timestamp: {ts}")))?;
    }
    if fields.next().is_some() {
        return Err(ParseError::new("trailing fields"));
    }

    Ok(Sample {
        name: name.to_string(),
        labels,
        value,
    })
}

fn is_valid_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' || c == ':' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == ':')
}

/// Index of the closing `}` outside any quoted value.
fn find_label_end(body: &str) -> Option<usize> {
    let mut in_quotes = false;
    let mut escaped = false;
    for (i, c) in body.char_indices() {
        match c {
            _ if escaped => escaped = false,
            '\\' if in_quotes => escaped = true,
            '"' => in_quotes = !in_quotes,
            '}' if !in_quotes => return Some(i),
            _ => {}
        }
    }
    None
}

/// Parses `k="v",k2="v2"`; commas inside quotes do not split.
fn parse_labels(body: &str) -> Result<Vec<(String, String)>, ParseError> {
    let mut labels = Vec::new();
    let mut chars = body.chars().peekable();

    loop {
        while chars.peek().is_some_and(|c| c.is_whitespace() || *c == ',') {
            chars.next();
        }
        if chars.peek().is_none() {
            break;
        }

        let mut key = String::new();
        for c in chars.by_ref() {
            if c == '=' {
                break;
            }
            key.push(c);
        }
        let key = key.trim().to_string();
        if key.is_empty() {
            return Err(ParseError::new("empty label name"));
        }

        while chars.peek().is_some_and(|c| c.is_whitespace()) {
            chars.next();
        }
        if chars.next() != Some('"') {
            return Err(ParseError::new(format!("unquoted value for label {key}")));
        }

        let mut value = String::new();
        let mut closed = false;
        while let Some(c) = chars.next() {
            match c {
                '\\' => match chars.next() {
                    Some('n') => value.push('\n'),
                    Some(other) => value.push(other),
                    None => break,
                },
                '"' => {
                    closed = true;
                    break;
                }
                _ => value.push(c),
            }
        }
        if !closed {
            return Err(ParseError::new(format!("unterminated value for label {key}")));
        }
        labels.push((key, value));
    }

    Ok(labels)
}

/// Parses a sample value. `NaN` and `±Inf` are accepted in any case.
fn parse_value(text: &str) -> Result<f64, ParseError> {
    match text.to_ascii_lowercase().as_str() {
        "nan" => Ok(f64::NAN),
        "inf" | "+inf" => Ok(f64::INFINITY),
        "-inf" => Ok(f64::NEG_INFINITY),
        _ => text
            .parse::<f64>()
            .map_err(|_| ParseError::new(format!("invalid value: {text}"))),
    }
}

/// NaN and infinities collapse to 0 outside histogram bounds.
fn sanitize(value: f64) -> f64 {
    if value.is_finite() { value } else { 0.0 }
}

fn split_suffix(name: &str) -> (&str, Suffix) {
    for (suffix, kind) in [
        ("_bucket", Suffix::Bucket),
        ("_sum", Suffix::Sum),
        ("_count", Suffix::Count),
        ("_info", Suffix::Info),
    ] {
        if let Some(base) = name.strip_suffix(suffix) {
            if !base.is_empty() {
                return (base, kind);
            }
        }
    }
    (name, Suffix::Plain)
}

/// Replaces anything outside `[A-Za-z0-9_]` with `_`.
fn normalize(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
        .collect()
}

/// Maps an upstream name to its stable internal name.
///
/// Counters exposed with a `_total` suffix resolve to the same alias as
/// their bare name.
pub fn canonical_name(name: &str) -> String {
    let name = normalize(name.strip_prefix(VENDOR_PREFIX).unwrap_or(name));
    if let Some(alias) = lookup_alias(&name) {
        return alias.to_string();
    }
    if let Some(stem) = name.strip_suffix("_total") {
        if let Some(alias) = lookup_alias(stem) {
            return if alias.ends_with("_total") {
                alias.to_string()
            } else {
                format!("{alias}_total")
            };
        }
    }
    name
}

fn lookup_alias(name: &str) -> Option<&'static str> {
    ALIASES
        .iter()
        .find(|(from, _)| *from == name)
        .map(|(_, to)| *to)
}

/// Builds `base_k1_v1_k2_v2` from the surviving labels sorted by key.
pub fn fold_key(base: &str, labels: &[(String, String)]) -> String {
    let mut kept: Vec<&(String, String)> = labels
        .iter()
        .filter(|(k, _)| !IGNORED_LABELS.contains(&k.as_str()))
        .collect();
    if kept.is_empty() {
        return base.to_string();
    }
    kept.sort();

    let mut key = base.to_string();
    for (k, v) in kept {
        key.push('_');
        key.push_str(&normalize(k));
        key.push('_');
        key.push_str(&normalize(v));
    }
    key
}

/// Integer, else float, else the raw string.
fn typed_config_value(text: &str) -> FlatValue {
    if let Ok(i) = text.parse::<i64>() {
        return FlatValue::Int(i);
    }
    match text.parse::<f64>() {
        Ok(f) if f.is_finite() => FlatValue::Float(f),
        _ => FlatValue::Str(text.to_string()),
    }
}

/// Parses a full exposition body scraped at `timestamp` (ns).
pub fn parse_exposition(text: &str, timestamp: i64) -> ScrapeResult {
    let mut result = ScrapeResult {
        available: true,
        timestamp,
        ..Default::default()
    };
    let mut buckets: BTreeMap<String, Vec<Bucket>> = BTreeMap::new();

    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let sample = match parse_line(line) {
            Ok(sample) => sample,
            Err(_) => {
                result.skipped_lines += 1;
                continue;
            }
        };

        let (raw_base, suffix) = split_suffix(&sample.name);
        let has_bound = sample.labels.iter().any(|(k, _)| k == BOUND_LABEL);
        let suffix = if suffix == Suffix::Plain && has_bound {
            Suffix::Bucket
        } else {
            suffix
        };
        let base = canonical_name(raw_base);

        match suffix {
            Suffix::Info => {
                for (k, v) in &sample.labels {
                    if IGNORED_LABELS.contains(&k.as_str()) {
                        continue;
                    }
                    result
                        .config
                        .insert(format!("{base}_{}", normalize(k)), typed_config_value(v));
                }
            }
            Suffix::Bucket => {
                let Some(bucket) = sample
                    .labels
                    .iter()
                    .find(|(k, _)| k == BOUND_LABEL)
                    .and_then(|(_, v)| Bucket::from_label(v, sanitize(sample.value)))
                else {
                    result.skipped_lines += 1;
                    continue;
                };
                let rest: Vec<(String, String)> = sample
                    .labels
                    .into_iter()
                    .filter(|(k, _)| k != BOUND_LABEL)
                    .collect();
                buckets
                    .entry(fold_key(&base, &rest))
                    .or_default()
                    .push(bucket);
            }
            Suffix::Sum => {
                result
                    .sums
                    .insert(fold_key(&base, &sample.labels), sanitize(sample.value));
            }
            Suffix::Count => {
                result
                    .counts
                    .insert(fold_key(&base, &sample.labels), sanitize(sample.value));
            }
            Suffix::Plain => {
                result
                    .scalars
                    .insert(fold_key(&base, &sample.labels), sanitize(sample.value));
            }
        }
    }

    result.histograms = buckets
        .into_iter()
        .map(|(key, pairs)| (key, Histogram::from_buckets(pairs)))
        .collect();
    result
}
