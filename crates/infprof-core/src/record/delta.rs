//! Difference between two flat records of one run.
//!
//! Numeric values become `last - first`; strings and booleans keep the
//! last value. The result carries the window as `_delta_start_ts`,
//! `_delta_end_ts` and `_delta_duration_ms`.

use super::{FlatRecord, FlatValue, TIMESTAMP_KEY};

pub const DELTA_START_KEY: &str = "_delta_start_ts";
pub const DELTA_END_KEY: &str = "_delta_end_ts";
pub const DELTA_DURATION_KEY: &str = "_delta_duration_ms";

/// Name suffixes of cumulative counters.
const COUNTER_SUFFIXES: &[&str] = &[
    "Time", "Bytes", "Count", "Switches", "Fault", "Reads", "Writes", "Sent", "Recvd", "Errors",
    "Drops", "Packets",
];

/// Which fields are differenced.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum DeltaScope {
    /// Every numeric field.
    All,
    /// Only fields named like cumulative counters; gauges keep the last value.
    #[default]
    Counters,
}

/// True if `key` names a cumulative counter.
pub fn is_counter_field(key: &str) -> bool {
    COUNTER_SUFFIXES.iter().any(|s| key.ends_with(s))
}

/// Builds the delta of `last` over `first`.
///
/// With [`DeltaScope::All`], keys found only in `first` are carried over
/// unchanged; with [`DeltaScope::Counters`] only `last`'s keys appear.
pub fn delta_record(
    first: &FlatRecord,
    last: &FlatRecord,
    duration_ms: i64,
    scope: DeltaScope,
) -> FlatRecord {
    let mut out = FlatRecord::new();
    if let Some(start) = first.get(TIMESTAMP_KEY) {
        out.insert(DELTA_START_KEY.to_string(), start.clone());
    }
    if let Some(end) = last.get(TIMESTAMP_KEY) {
        out.insert(DELTA_END_KEY.to_string(), end.clone());
        out.insert(TIMESTAMP_KEY.to_string(), end.clone());
    }
    out.insert(DELTA_DURATION_KEY.to_string(), FlatValue::Int(duration_ms));

    for (key, value) in last {
        if key == TIMESTAMP_KEY {
            continue;
        }
        let wanted = match scope {
            DeltaScope::All => true,
            DeltaScope::Counters => is_counter_field(key),
        };
        let diff = if wanted {
            first.get(key).and_then(|before| difference(before, value))
        } else {
            None
        };
        out.insert(key.clone(), diff.unwrap_or_else(|| value.clone()));
    }

    if scope == DeltaScope::All {
        for (key, value) in first {
            if !out.contains_key(key) {
                out.insert(key.clone(), value.clone());
            }
        }
    }
    out
}

/// `after - before` for two numbers; integers stay integers.
fn difference(before: &FlatValue, after: &FlatValue) -> Option<FlatValue> {
    match (before, after) {
        (FlatValue::Int(a), FlatValue::Int(b)) => Some(FlatValue::Int(b.wrapping_sub(*a))),
        (FlatValue::Int(a), FlatValue::Float(b)) => Some(FlatValue::float(b - *a as f64)),
        (FlatValue::Float(a), FlatValue::Int(b)) => Some(FlatValue::float(*b as f64 - a)),
        (FlatValue::Float(a), FlatValue::Float(b)) => Some(FlatValue::float(b - a)),
        _ => None,
    }
}
