use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::clock::Timestamp;
use crate::stats::Stats;
use crate::validity::Validity;

/// Identities whose signature backs a claim
pub type Evidence = BTreeSet<String>;

/// Everything known about one datum inside a bucket.
///
/// Claims are keyed by their exact validity window; the same window
///  proposed twice only grows its evidence set. A datum is valid at `t`
///  when some propose window covers `t` and no dismiss window does:
///  retraction always wins.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BucketDataItem {
    proposed: BTreeMap<Validity, Evidence>,
    dismissed: BTreeMap<Validity, Evidence>,
    last_broadcast_propose: BTreeMap<String, Stats>,
    last_broadcast_dismiss: BTreeMap<String, Stats>,
}

impl BucketDataItem {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn propose<I>(&mut self, validity: Validity, evidence: I, from_channel: &str, now: Timestamp)
    where
        I: IntoIterator<Item = String>,
    {
        self.proposed.entry(validity).or_default().extend(evidence);
        self.last_broadcast_propose
            .entry(from_channel.to_string())
            .or_default()
            .just_received(now);
    }

    pub fn dismiss<I>(&mut self, validity: Validity, evidence: I, from_channel: &str, now: Timestamp)
    where
        I: IntoIterator<Item = String>,
    {
        self.dismissed.entry(validity).or_default().extend(evidence);
        self.last_broadcast_dismiss
            .entry(from_channel.to_string())
            .or_default()
            .just_received(now);
    }

    /// Drop every expired window from both sides
    pub fn cleanup(&mut self, now: Timestamp) {
        self.proposed.retain(|validity, _| !validity.is_expired(now));
        self.dismissed.retain(|validity, _| !validity.is_expired(now));
    }

    /* Getters */

    pub fn proposed(&self) -> &BTreeMap<Validity, Evidence> {
        &self.proposed
    }

    pub fn dismissed(&self) -> &BTreeMap<Validity, Evidence> {
        &self.dismissed
    }

    /// No windows left on either side
    pub fn is_empty(&self) -> bool {
        self.proposed.is_empty() && self.dismissed.is_empty()
    }

    /// An open-ended dismiss is in force at `now`
    pub fn is_tombstoned(&self, now: Timestamp) -> bool {
        self.dismissed
            .keys()
            .any(|validity| validity.is_open_ended() && validity.is_active(now))
    }

    pub fn valid(&self, at: Timestamp) -> bool {
        if self.dismissed.keys().any(|validity| validity.is_active(at)) {
            return false;
        }
        self.proposed.keys().any(|validity| validity.is_active(at))
    }

    /// Some propose window covering `at`
    pub fn active_proposal(&self, at: Timestamp) -> Option<Validity> {
        self.proposed
            .keys()
            .find(|validity| validity.is_active(at))
            .copied()
    }

    /// Last time this datum's proposal crossed `channel`, either way
    pub fn last_broadcast(&self, channel: &str) -> Timestamp {
        self.last_broadcast_propose
            .get(channel)
            .map(Stats::last_activity)
            .unwrap_or(0)
    }

    pub fn mark_broadcast(&mut self, channel: &str, now: Timestamp) {
        self.last_broadcast_propose
            .entry(channel.to_string())
            .or_default()
            .just_sent(now);
    }

    pub fn summary(&self, now: Timestamp) -> String {
        let mut lines = Vec::new();
        if self.is_tombstoned(now) {
            lines.push("TOMBSTONED".to_string());
        }
        for (validity, evidence) in &self.proposed {
            lines.push(format!("propose {} by {:?}", validity.describe(now), evidence));
        }
        for (validity, evidence) in &self.dismissed {
            lines.push(format!("dismiss {} by {:?}", validity.describe(now), evidence));
        }
        for (channel, stats) in &self.last_broadcast_propose {
            lines.push(format!("{}: {}", stats.describe(now), channel));
        }
        for (channel, stats) in &self.last_broadcast_dismiss {
            lines.push(format!("{}: {}", stats.describe(now), channel));
        }
        lines.join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn signers(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_propose_then_overlapping_dismiss() {
        let mut item = BucketDataItem::new();
        item.propose(Validity::between(0, 100), signers(&["a"]), "c1", 0);
        assert!(item.valid(50));

        item.dismiss(Validity::between(40, 60), signers(&["b"]), "c1", 0);
        assert!(!item.valid(50));
        assert!(item.valid(70));
        assert!(!item.valid(101));
    }

    #[test]
    fn test_dismiss_alone_is_not_valid() {
        let mut item = BucketDataItem::new();
        item.dismiss(Validity::forever(), signers(&["a"]), "c1", 0);
        assert!(!item.valid(0));
    }

    #[test]
    fn test_windows_are_not_merged() {
        let mut item = BucketDataItem::new();
        item.propose(Validity::between(0, 10), signers(&["a"]), "c1", 0);
        item.propose(Validity::between(5, 20), signers(&["b"]), "c2", 0);
        item.propose(Validity::between(0, 10), signers(&["a", "c"]), "c1", 0);
        assert_eq!(item.proposed().len(), 2);
        assert_eq!(
            item.proposed()[&Validity::between(0, 10)],
            ["a", "c"].iter().map(|s| s.to_string()).collect::<Evidence>()
        );
    }

    #[test]
    fn test_tombstone_ignores_proposals() {
        let mut item = BucketDataItem::new();
        item.dismiss(Validity::since(10), signers(&["a"]), "c1", 0);
        assert!(!item.is_tombstoned(5));
        assert!(item.is_tombstoned(10));

        item.propose(Validity::between(1000, 2000), signers(&["a"]), "c1", 0);
        assert!(item.is_tombstoned(1500));
        assert!(!item.valid(1500));
    }

    #[test]
    fn test_bounded_dismiss_is_not_a_tombstone() {
        let mut item = BucketDataItem::new();
        item.dismiss(Validity::between(0, 100), signers(&["a"]), "c1", 0);
        assert!(!item.is_tombstoned(50));
    }

    #[test]
    fn test_cleanup_is_idempotent() {
        let mut item = BucketDataItem::new();
        item.propose(Validity::between(0, 10), signers(&["a"]), "c1", 0);
        item.propose(Validity::since(0), signers(&["a"]), "c1", 0);
        item.dismiss(Validity::between(0, 20), signers(&["a"]), "c1", 0);

        item.cleanup(15);
        let once = item.clone();
        item.cleanup(15);
        assert_eq!(item, once);
        assert_eq!(item.proposed().len(), 1);
        assert_eq!(item.dismissed().len(), 1);
        assert!(!item.valid(15));
        assert!(item.valid(21));
    }

    #[test]
    fn test_broadcast_bookkeeping() {
        let mut item = BucketDataItem::new();
        assert_eq!(item.last_broadcast("c1"), 0);
        item.propose(Validity::forever(), signers(&["a"]), "c1", 10);
        assert_eq!(item.last_broadcast("c1"), 10);
        item.mark_broadcast("c1", 30);
        assert_eq!(item.last_broadcast("c1"), 30);
        assert_eq!(item.last_broadcast("c2"), 0);
    }

    #[test]
    fn test_summary_flags_tombstone() {
        let mut item = BucketDataItem::new();
        item.dismiss(Validity::since(0), signers(&["a"]), "c1", 0);
        let summary = item.summary(10);
        assert!(summary.starts_with("TOMBSTONED"));
        assert!(summary.contains("dismiss"));
    }
}
