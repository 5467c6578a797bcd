//! Connection Settings

use std::time::Duration;

use crate::resilience::CircuitBreakerConfig;

use super::heartbeat::HeartbeatConfig;
use super::reconnect::ReconnectConfig;

/// Settings for one provider connection.
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectionSettings {
    /// Handshake timeout per connect attempt.
    pub connect_timeout: Duration,
    /// Interval between keepalive pings. Zero disables keepalive.
    pub ping_interval: Duration,
    /// Time to wait for a pong after each ping.
    pub pong_timeout: Duration,
    /// Delay before the first reconnect attempt.
    pub reconnect_base_delay: Duration,
    /// Cap on reconnect delays.
    pub reconnect_max_delay: Duration,
    /// Backoff growth factor.
    pub reconnect_multiplier: f64,
    /// Backoff jitter fraction.
    pub reconnect_jitter: f64,
    /// Reconnect attempts before giving up (0 = never reconnect).
    pub max_reconnect_attempts: u32,
    /// Messages held by `send_or_queue` while offline.
    pub queue_capacity: usize,
    /// Buffered connection events per subscriber.
    pub event_capacity: usize,
    /// Circuit breaker guarding connect attempts.
    pub circuit_breaker: CircuitBreakerConfig,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            ping_interval: Duration::from_secs(30),
            pong_timeout: Duration::from_secs(10),
            reconnect_base_delay: Duration::from_secs(1),
            reconnect_max_delay: Duration::from_secs(30),
            reconnect_multiplier: 2.0,
            reconnect_jitter: 0.0,
            max_reconnect_attempts: 10,
            queue_capacity: 1000,
            event_capacity: 256,
            circuit_breaker: CircuitBreakerConfig::default(),
        }
    }
}

impl ConnectionSettings {
    /// Keepalive configuration.
    #[must_use]
    pub const fn heartbeat(&self) -> HeartbeatConfig {
        HeartbeatConfig {
            ping_interval: self.ping_interval,
            pong_timeout: self.pong_timeout,
        }
    }

    /// Backoff configuration.
    #[must_use]
    pub const fn reconnect(&self) -> ReconnectConfig {
        ReconnectConfig {
            base_delay: self.reconnect_base_delay,
            max_delay: self.reconnect_max_delay,
            multiplier: self.reconnect_multiplier,
            jitter_factor: self.reconnect_jitter,
            max_attempts: self.max_reconnect_attempts,
        }
    }
}
