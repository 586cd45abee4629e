use serde::{Deserialize, Serialize};

use crate::clock::{friendly_time_since, Timestamp};

/// Send/receive counters for a channel (or a datum on a channel)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stats {
    pub num_sent: u64,
    pub num_received: u64,
    pub last_sent: Timestamp,
    pub last_received: Timestamp,
}

impl Stats {
    /// Most recent send or receive, `0` if neither happened
    pub fn last_activity(&self) -> Timestamp {
        self.last_sent.max(self.last_received)
    }

    pub fn just_received(&mut self, now: Timestamp) {
        self.num_received += 1;
        self.last_received = now;
    }

    pub fn just_sent(&mut self, now: Timestamp) {
        self.num_sent += 1;
        self.last_sent = now;
    }

    /// Fixed-width `sent | recv` rendering for the operator summary
    pub fn describe(&self, now: Timestamp) -> String {
        let sent = if self.num_sent == 0 {
            String::new()
        } else {
            format!(
                "sent {:>3}  {}",
                self.num_sent,
                friendly_time_since(self.last_sent, now)
            )
        };
        let received = if self.num_received == 0 {
            String::new()
        } else {
            format!(
                "recv {:>3}  {}",
                self.num_received,
                friendly_time_since(self.last_received, now)
            )
        };
        format!("{:<23} | {:<23}", sent, received)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_last_activity() {
        let mut stats = Stats::default();
        assert_eq!(stats.last_activity(), 0);
        stats.just_received(10);
        stats.just_sent(7);
        assert_eq!(stats.last_activity(), 10);
        assert_eq!((stats.num_sent, stats.num_received), (1, 1));
    }

    #[test]
    fn test_describe() {
        let mut stats = Stats::default();
        stats.just_sent(95);
        let line = stats.describe(100);
        assert!(line.starts_with("sent   1  5s ago"));
        assert!(line.contains(" | "));
    }
}
