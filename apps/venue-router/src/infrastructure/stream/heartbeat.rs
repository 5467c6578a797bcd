//! Heartbeat Tracking
//!
//! Tracks the outstanding keepalive ping for one connection. The connection
//! actor sends a ping every `ping_interval` and arms a pong deadline of
//! `pong_timeout`; the deadline only counts if the same ping is still
//! outstanding when it fires.

use std::time::Duration;

use tokio::time::Instant;

/// Keepalive configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeartbeatConfig {
    /// Interval between pings. Zero disables keepalive.
    pub ping_interval: Duration,
    /// Time to wait for a pong after each ping.
    pub pong_timeout: Duration,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            ping_interval: Duration::from_secs(30),
            pong_timeout: Duration::from_secs(10),
        }
    }
}

impl HeartbeatConfig {
    /// Whether keepalive is enabled.
    #[must_use]
    pub const fn is_enabled(&self) -> bool {
        !self.ping_interval.is_zero()
    }
}

#[derive(Debug, Clone, Copy)]
struct PendingPing {
    seq: u64,
    sent_at: Instant,
}

/// Outstanding-ping bookkeeping.
#[derive(Debug, Default)]
pub struct HeartbeatTracker {
    next_seq: u64,
    pending: Option<PendingPing>,
}

impl HeartbeatTracker {
    /// Create a tracker with nothing outstanding.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            next_seq: 0,
            pending: None,
        }
    }

    /// Record a sent ping and return its sequence number.
    ///
    /// A ping sent while another is outstanding keeps the older send time,
    /// so round trips are measured from the first unanswered ping.
    pub fn ping_sent(&mut self, now: Instant) -> u64 {
        self.next_seq += 1;
        let sent_at = self.pending.map_or(now, |p| p.sent_at);
        self.pending = Some(PendingPing {
            seq: self.next_seq,
            sent_at,
        });
        self.next_seq
    }

    /// Record a pong. Returns the round trip if a ping was outstanding.
    pub fn pong_received(&mut self, now: Instant) -> Option<Duration> {
        self.pending
            .take()
            .map(|p| now.saturating_duration_since(p.sent_at))
    }

    /// Whether the deadline for ping `seq` means the connection is dead.
    #[must_use]
    pub fn is_expired(&self, seq: u64) -> bool {
        self.pending.is_some_and(|p| p.seq == seq)
    }

    /// Whether a ping is awaiting its pong.
    #[must_use]
    pub const fn is_waiting(&self) -> bool {
        self.pending.is_some()
    }

    /// Forget any outstanding ping.
    pub const fn reset(&mut self) {
        self.pending = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn pong_reports_round_trip() {
        let mut tracker = HeartbeatTracker::new();
        let seq = tracker.ping_sent(Instant::now());
        tokio::time::advance(Duration::from_millis(40)).await;
        assert!(tracker.is_waiting());
        assert_eq!(tracker.pong_received(Instant::now()), Some(Duration::from_millis(40)));
        assert!(!tracker.is_expired(seq));
    }

    #[test]
    fn unsolicited_pong_is_ignored() {
        let mut tracker = HeartbeatTracker::new();
        assert_eq!(tracker.pong_received(Instant::now()), None);
    }

    #[test]
    fn only_latest_ping_deadline_counts() {
        let mut tracker = HeartbeatTracker::new();
        let now = Instant::now();
        let first = tracker.ping_sent(now);
        let second = tracker.ping_sent(now);
        assert!(!tracker.is_expired(first));
        assert!(tracker.is_expired(second));
        tracker.reset();
        assert!(!tracker.is_expired(second));
    }

    #[test]
    fn zero_interval_disables_keepalive() {
        let config = HeartbeatConfig {
            ping_interval: Duration::ZERO,
            ..HeartbeatConfig::default()
        };
        assert!(!config.is_enabled());
        assert!(HeartbeatConfig::default().is_enabled());
    }
}
