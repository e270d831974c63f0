use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// A flat scalar, the unit every export format writes.
///
/// Serialized untagged so intermediate JSON files round-trip the kind:
/// `5` reads back as `Int`, `5.0` as `Float`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FlatValue {
    Int(i64),
    Float(f64),
    Bool(bool),
    Str(String),
}

/// Runtime kind of a [`FlatValue`], used for columnar type inference.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ValueKind {
    Integer,
    Floating,
    Boolean,
    String,
}

/// Canonical key to scalar. Keys iterate in sorted order.
pub type FlatRecord = BTreeMap<String, FlatValue>;

/// Key holding the cycle timestamp in every record.
pub const TIMESTAMP_KEY: &str = "timestamp";

/// Returns the cycle timestamp of a record, or 0 when missing.
pub fn record_timestamp(record: &FlatRecord) -> i64 {
    match record.get(TIMESTAMP_KEY) {
        Some(FlatValue::Int(ts)) => *ts,
        Some(FlatValue::Float(ts)) => *ts as i64,
        _ => 0,
    }
}

impl FlatValue {
    /// Builds a float value; NaN and infinities become 0.
    pub fn float(v: f64) -> Self {
        if v.is_finite() {
            FlatValue::Float(v)
        } else {
            FlatValue::Float(0.0)
        }
    }

    pub fn kind(&self) -> ValueKind {
        match self {
            FlatValue::Int(_) => ValueKind::Integer,
            FlatValue::Float(_) => ValueKind::Floating,
            FlatValue::Bool(_) => ValueKind::Boolean,
            FlatValue::Str(_) => ValueKind::String,
        }
    }

    /// Text form used by delimited writers.
    pub fn to_text(&self) -> String {
        match self {
            FlatValue::Int(v) => v.to_string(),
            FlatValue::Float(v) if v.is_nan() => String::new(),
            FlatValue::Float(v) => v.to_string(),
            FlatValue::Bool(v) => v.to_string(),
            FlatValue::Str(v) => v.clone(),
        }
    }
}

impl fmt::Display for FlatValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_text())
    }
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ValueKind::Integer => "integer",
            ValueKind::Floating => "float",
            ValueKind::Boolean => "boolean",
            ValueKind::String => "string",
        };
        f.write_str(name)
    }
}

impl From<i64> for FlatValue {
    fn from(v: i64) -> Self {
        FlatValue::Int(v)
    }
}

impl From<i32> for FlatValue {
    fn from(v: i32) -> Self {
        FlatValue::Int(v as i64)
    }
}

impl From<u32> for FlatValue {
    fn from(v: u32) -> Self {
        FlatValue::Int(v as i64)
    }
}

impl From<u64> for FlatValue {
    fn from(v: u64) -> Self {
        FlatValue::Int(i64::try_from(v).unwrap_or(i64::MAX))
    }
}

impl From<usize> for FlatValue {
    fn from(v: usize) -> Self {
        FlatValue::Int(i64::try_from(v).unwrap_or(i64::MAX))
    }
}

impl From<f64> for FlatValue {
    fn from(v: f64) -> Self {
        FlatValue::float(v)
    }
}

impl From<bool> for FlatValue {
    fn from(v: bool) -> Self {
        FlatValue::Bool(v)
    }
}

impl From<String> for FlatValue {
    fn from(v: String) -> Self {
        FlatValue::Str(v)
    }
}

impl From<&str> for FlatValue {
    fn from(v: &str) -> Self {
        FlatValue::Str(v.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_round_trip_keeps_kind() {
        let mut record = FlatRecord::new();
        record.insert("a".into(), FlatValue::Int(5));
        record.insert("b".into(), FlatValue::Float(2.0));
        record.insert("c".into(), FlatValue::Bool(true));
        record.insert("d".into(), FlatValue::Str("x".into()));

        let text = serde_json::to_string(&record).unwrap();
        let back: FlatRecord = serde_json::from_str(&text).unwrap();
        assert_eq!(back, record);
        assert_eq!(back["b"].kind(), ValueKind::Floating);
    }

    #[test]
    fn non_finite_floats_are_zeroed() {
        assert_eq!(FlatValue::from(f64::NAN), FlatValue::Float(0.0));
        assert_eq!(FlatValue::from(f64::INFINITY), FlatValue::Float(0.0));
    }

    #[test]
    fn record_timestamp_reads_int_key() {
        let mut record = FlatRecord::new();
        assert_eq!(record_timestamp(&record), 0);
        record.insert(TIMESTAMP_KEY.into(), FlatValue::Int(77));
        assert_eq!(record_timestamp(&record), 77);
    }
}
