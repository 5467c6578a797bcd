//! Router Settings
//!
//! Every threshold the router and evaluator use, with the defaults tuned for
//! a KRX-style session (UTC+9, volatile first and last half hour).

use std::time::Duration;

use chrono::{DateTime, FixedOffset, NaiveTime, Offset, Utc};
use rust_decimal::Decimal;

/// A local-time window `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionWindow {
    /// Window start.
    pub start: NaiveTime,
    /// Window end (exclusive).
    pub end: NaiveTime,
}

impl SessionWindow {
    /// Window from hour/minute pairs. Invalid times collapse to midnight.
    #[must_use]
    pub fn hm(start: (u32, u32), end: (u32, u32)) -> Self {
        Self {
            start: NaiveTime::from_hms_opt(start.0, start.1, 0).unwrap_or(NaiveTime::MIN),
            end: NaiveTime::from_hms_opt(end.0, end.1, 0).unwrap_or(NaiveTime::MIN),
        }
    }

    /// Whether `time` falls inside the window.
    #[must_use]
    pub fn contains(&self, time: NaiveTime) -> bool {
        self.start <= time && time < self.end
    }
}

/// Opening and closing windows where latency is penalized.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionSchedule {
    /// Offset of exchange local time from UTC, in seconds.
    pub utc_offset_secs: i32,
    /// Opening auction window.
    pub opening: SessionWindow,
    /// Closing auction window.
    pub closing: SessionWindow,
}

impl Default for SessionSchedule {
    fn default() -> Self {
        Self {
            utc_offset_secs: 9 * 3600,
            opening: SessionWindow::hm((9, 0), (9, 30)),
            closing: SessionWindow::hm((15, 0), (15, 30)),
        }
    }
}

impl SessionSchedule {
    /// Whether `now` falls in the opening or closing window.
    #[must_use]
    pub fn is_volatile(&self, now: DateTime<Utc>) -> bool {
        let offset = FixedOffset::east_opt(self.utc_offset_secs).unwrap_or(Utc.fix());
        let local = now.with_timezone(&offset).time();
        self.opening.contains(local) || self.closing.contains(local)
    }
}

/// Router and evaluator configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct RouterSettings {
    /// Allow splitting orders across providers.
    pub enable_split_orders: bool,
    /// Maximum providers in a split.
    pub max_split_providers: usize,
    /// Notional above which a split is considered.
    pub min_order_size: Decimal,
    /// Top-two score gap below which a split is considered.
    pub split_score_gap: f64,
    /// Relative price drift that triggers a re-route.
    pub rebalance_threshold: f64,
    /// Minimum time between metric refreshes.
    pub metrics_refresh_interval: Duration,
    /// Notional above which the large-order latency penalty applies.
    pub large_order_notional: Decimal,
    /// Latency multiplier inside the session windows.
    pub session_latency_penalty: f64,
    /// Latency multiplier for large orders.
    pub large_order_latency_penalty: f64,
    /// Timeout for each order leg.
    pub leg_timeout: Duration,
    /// Maximum alternatives in a single-provider plan.
    pub max_alternatives: usize,
    /// Session windows.
    pub session: SessionSchedule,
}

impl Default for RouterSettings {
    fn default() -> Self {
        Self {
            enable_split_orders: true,
            max_split_providers: 3,
            min_order_size: Decimal::new(100_000, 0),
            split_score_gap: 10.0,
            rebalance_threshold: 0.005,
            metrics_refresh_interval: Duration::from_secs(5),
            large_order_notional: Decimal::new(50_000_000, 0),
            session_latency_penalty: 1.5,
            large_order_latency_penalty: 1.3,
            leg_timeout: Duration::from_secs(10),
            max_alternatives: 3,
            session: SessionSchedule::default(),
        }
    }
}
