use std::fmt;

use serde::{Deserialize, Serialize};

use crate::clock::{duration_compact, Timestamp};

/// A `[t0, t1]` window during which a claim is in force.
///
/// Either bound may be open. Intervals are used as map keys and are
///  never merged: two claims over different windows stay distinct.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Validity {
    pub t0: Option<Timestamp>,
    pub t1: Option<Timestamp>,
}

impl Validity {
    pub fn new(t0: Option<Timestamp>, t1: Option<Timestamp>) -> Self {
        Self { t0, t1 }
    }

    /// A window open on both ends
    pub fn forever() -> Self {
        Self::new(None, None)
    }

    /// A window starting at `t0` that never closes
    pub fn since(t0: Timestamp) -> Self {
        Self::new(Some(t0), None)
    }

    pub fn between(t0: Timestamp, t1: Timestamp) -> Self {
        Self::new(Some(t0), Some(t1))
    }

    /* Getters */

    /// True once `t1` is set and has passed
    pub fn is_expired(&self, now: Timestamp) -> bool {
        match self.t1 {
            Some(t1) => now > t1,
            None => false,
        }
    }

    /// True iff `t0 <= at <= t1` for every bound present
    pub fn is_active(&self, at: Timestamp) -> bool {
        let after_start = self.t0.map_or(true, |t0| t0 <= at);
        let before_end = self.t1.map_or(true, |t1| at <= t1);
        after_start && before_end
    }

    /// An open-ended window; as a dismiss this is a tombstone
    pub fn is_open_ended(&self) -> bool {
        self.t1.is_none()
    }

    /// Operator-facing rendering relative to `now`
    pub fn describe(&self, now: Timestamp) -> String {
        let relative = |t: Timestamp| {
            if t <= now {
                format!("{} ago", duration_compact(now.saturating_sub(t)))
            } else {
                format!("{} in the future", duration_compact(t.saturating_sub(now)))
            }
        };
        let from = self.t0.map_or("forever".to_string(), relative);
        let to = self.t1.map_or("forever".to_string(), relative);
        format!("[from {} to {}]", from, to)
    }
}

impl fmt::Display for Validity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let bound = |t: Option<Timestamp>| t.map_or("null".to_string(), |t| t.to_string());
        write!(f, "[{}, {}]", bound(self.t0), bound(self.t1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_active_bounds_are_inclusive() {
        let v = Validity::between(100, 200);
        assert!(!v.is_active(99));
        assert!(v.is_active(100));
        assert!(v.is_active(200));
        assert!(!v.is_active(201));
    }

    #[test]
    fn test_open_bounds() {
        assert!(Validity::forever().is_active(i64::MIN));
        assert!(Validity::since(10).is_active(i64::MAX));
        assert!(!Validity::since(10).is_active(9));
        assert!(Validity::new(None, Some(5)).is_active(-1000));
    }

    #[test]
    fn test_expiry_needs_an_end() {
        assert!(!Validity::since(0).is_expired(i64::MAX));
        assert!(!Validity::between(0, 10).is_expired(10));
        assert!(Validity::between(0, 10).is_expired(11));
    }

    #[test]
    fn test_describe() {
        assert_eq!(
            Validity::between(90, 130).describe(100),
            "[from 10s ago to 30s in the future]"
        );
        assert_eq!(Validity::forever().describe(0), "[from forever to forever]");
    }

    #[test]
    fn test_describe_extreme_bounds() {
        let v = Validity::between(i64::MIN, i64::MAX);
        assert!(v.describe(100).starts_with("[from "));
        assert!(v.describe(-100).ends_with("in the future]"));
    }

    #[test]
    fn test_display_uses_null_for_open_bounds() {
        assert_eq!(Validity::since(0).to_string(), "[0, null]");
        assert_eq!(Validity::between(100, 200).to_string(), "[100, 200]");
    }
}
