//! Timestamped measurement values.
//!
//! Every measurement carries the instant it was read, because the files
//! backing a single sampling cycle are read at slightly different times.

use serde::{Deserialize, Serialize};

use crate::record::FlatValue;

/// Current wall-clock time as nanoseconds since the Unix epoch.
pub fn now_ns() -> i64 {
    chrono::Utc::now().timestamp_nanos_opt().unwrap_or(0)
}

/// A scalar value together with the instant (ns since epoch) it was observed.
#[derive(Clone, Serialize, Deserialize, Debug, PartialEq, Default)]
pub struct TimedValue<T> {
    pub value: T,
    pub timestamp: i64,
}

impl<T> TimedValue<T> {
    pub fn new(value: T, timestamp: i64) -> Self {
        Self { value, timestamp }
    }

    /// Stamps `value` with the current time.
    pub fn now(value: T) -> Self {
        Self::new(value, now_ns())
    }
}

impl<T: Default> TimedValue<T> {
    /// Zero value stamped with the current time.
    ///
    /// Used when a source is missing or unreadable.
    pub fn absent() -> Self {
        Self::now(T::default())
    }
}

impl<T: Clone + Into<FlatValue>> TimedValue<T> {
    /// Converts into the flat value and its observation timestamp.
    pub fn flat(&self) -> (FlatValue, i64) {
        (self.value.clone().into(), self.timestamp)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn absent_value_is_zero_and_stamped_near_call_time() {
        let before = now_ns();
        let v: TimedValue<i64> = TimedValue::absent();
        let after = now_ns();

        assert_eq!(v.value, 0);
        assert!(v.timestamp >= before && v.timestamp <= after);
    }

    #[test]
    fn flat_carries_timestamp() {
        let v = TimedValue::new(42i64, 1_000);
        assert_eq!(v.flat(), (FlatValue::Int(42), 1_000));
    }
}
