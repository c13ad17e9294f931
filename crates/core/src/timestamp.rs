//! Nanosecond timestamps and closed time ranges.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};

/// Nanoseconds since the Unix epoch.
pub type Timestamp = i64;

/// Name of the mandatory timestamp column of every record.
pub const TIMESTAMP_FIELD: &str = "timestamp_ns";

/// Closed interval `[start, end]` of timestamps.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimestampRange {
    pub start: Timestamp,
    pub end: Timestamp,
}

impl TimestampRange {
    /// Create a range, rejecting inverted bounds.
    pub fn new(start: Timestamp, end: Timestamp) -> Result<Self> {
        if start > end {
            return Err(Error::InvalidRange(format!(
                "start ({start}) is after end ({end})"
            )));
        }
        Ok(Self { start, end })
    }

    /// Range covering every representable timestamp.
    pub fn unbounded() -> Self {
        Self {
            start: Timestamp::MIN,
            end: Timestamp::MAX,
        }
    }

    /// Build from optional bounds; a missing bound is open-ended.
    pub fn from_bounds(start: Option<Timestamp>, end: Option<Timestamp>) -> Result<Self> {
        Self::new(
            start.unwrap_or(Timestamp::MIN),
            end.unwrap_or(Timestamp::MAX),
        )
    }

    pub fn is_unbounded(&self) -> bool {
        self.start == Timestamp::MIN && self.end == Timestamp::MAX
    }

    pub fn contains(&self, ts: Timestamp) -> bool {
        self.start <= ts && ts <= self.end
    }

    pub fn intersects(&self, other: &TimestampRange) -> bool {
        self.start <= other.end && other.start <= self.end
    }

    /// Whether `other` lies entirely inside this range.
    pub fn covers(&self, other: &TimestampRange) -> bool {
        self.start <= other.start && other.end <= self.end
    }

    /// Smallest range covering both.
    pub fn union(&self, other: &TimestampRange) -> Self {
        Self {
            start: self.start.min(other.start),
            end: self.end.max(other.end),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_inverted_range() {
        assert!(TimestampRange::new(10, 5).is_err());
        assert!(TimestampRange::new(5, 5).is_ok());
    }

    #[test]
    fn test_intersection_is_closed() {
        let a = TimestampRange::new(0, 99).unwrap();
        assert!(a.intersects(&TimestampRange::new(99, 150).unwrap()));
        assert!(!a.intersects(&TimestampRange::new(100, 150).unwrap()));
        assert!(a.intersects(&TimestampRange::unbounded()));
    }

    #[test]
    fn test_from_bounds_open_ends() {
        let r = TimestampRange::from_bounds(Some(100), None).unwrap();
        assert!(r.contains(i64::MAX));
        assert!(!r.contains(99));
        assert!(TimestampRange::from_bounds(None, None).unwrap().is_unbounded());
    }

    #[test]
    fn test_covers_and_union() {
        let outer = TimestampRange::new(0, 300).unwrap();
        let inner = TimestampRange::new(100, 199).unwrap();
        assert!(outer.covers(&inner));
        assert!(!inner.covers(&outer));
        assert_eq!(
            inner.union(&TimestampRange::new(250, 260).unwrap()),
            TimestampRange::new(100, 260).unwrap()
        );
    }
}
