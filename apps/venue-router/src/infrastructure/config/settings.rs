//! Application Configuration
//!
//! Loaded from `VENUE_ROUTER_*` environment variables. Every value except
//! the provider list has a default.
//!
//! # Environment Variables
//!
//! ## Required
//! - `VENUE_ROUTER_PROVIDERS`: `id=url` pairs, comma separated
//!
//! ## Routing
//! - `VENUE_ROUTER_ENABLE_SPLIT_ORDERS` (default: true)
//! - `VENUE_ROUTER_MAX_SPLIT_PROVIDERS` (default: 3)
//! - `VENUE_ROUTER_MIN_ORDER_SIZE` (default: 100000)
//! - `VENUE_ROUTER_SPLIT_SCORE_GAP` (default: 10)
//! - `VENUE_ROUTER_REBALANCE_THRESHOLD` (default: 0.005)
//! - `VENUE_ROUTER_METRICS_REFRESH_MS` (default: 5000)
//! - `VENUE_ROUTER_LEG_TIMEOUT_MS` (default: 10000)
//!
//! ## Connections
//! - `VENUE_ROUTER_CONNECT_TIMEOUT_MS` (default: 10000)
//! - `VENUE_ROUTER_PING_INTERVAL_SECS` (default: 30)
//! - `VENUE_ROUTER_PONG_TIMEOUT_SECS` (default: 10)
//! - `VENUE_ROUTER_RECONNECT_BASE_DELAY_MS` (default: 1000)
//! - `VENUE_ROUTER_RECONNECT_MAX_DELAY_SECS` (default: 30)
//! - `VENUE_ROUTER_RECONNECT_MULTIPLIER` (default: 2)
//! - `VENUE_ROUTER_RECONNECT_JITTER` (default: 0)
//! - `VENUE_ROUTER_MAX_RECONNECT_ATTEMPTS` (default: 10, 0 disables reconnect)
//! - `VENUE_ROUTER_QUEUE_CAPACITY` (default: 1000)
//!
//! ## Binary
//! - `VENUE_ROUTER_SYMBOLS`: symbols to stream quotes for (default: none)
//! - `VENUE_ROUTER_SIMULATE_ORDERS`: attach simulated order adapters (default: true)

use std::time::Duration;

use rust_decimal::Decimal;

use crate::application::services::RouterSettings;
use crate::domain::provider::ProviderId;
use crate::infrastructure::stream::ConnectionSettings;

const PROVIDERS_KEY: &str = "VENUE_ROUTER_PROVIDERS";

/// One provider stream endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderEndpoint {
    /// Provider id.
    pub id: ProviderId,
    /// Stream URL.
    pub url: String,
}

/// Complete application configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct AppConfig {
    /// Provider endpoints, in configured order.
    pub providers: Vec<ProviderEndpoint>,
    /// Symbols to stream quotes for.
    pub symbols: Vec<String>,
    /// Attach simulated order adapters.
    pub simulate_orders: bool,
    /// Router settings.
    pub router: RouterSettings,
    /// Connection settings, shared by every provider.
    pub connection: ConnectionSettings,
}

impl AppConfig {
    /// Create configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if the provider list is missing or malformed.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Create configuration from a variable lookup.
    ///
    /// # Errors
    ///
    /// Returns an error if the provider list is missing or malformed.
    pub fn from_lookup(env: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let raw = env(PROVIDERS_KEY).ok_or_else(|| ConfigError::MissingEnvVar(PROVIDERS_KEY.to_string()))?;
        let providers = parse_providers(&raw)?;

        let symbols = env("VENUE_ROUTER_SYMBOLS")
            .map(|v| {
                v.split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(str::to_uppercase)
                    .collect()
            })
            .unwrap_or_default();

        let router_defaults = RouterSettings::default();
        let router = RouterSettings {
            enable_split_orders: parse_env_bool(
                &env,
                "VENUE_ROUTER_ENABLE_SPLIT_ORDERS",
                router_defaults.enable_split_orders,
            ),
            max_split_providers: parse_env_usize(
                &env,
                "VENUE_ROUTER_MAX_SPLIT_PROVIDERS",
                router_defaults.max_split_providers,
            ),
            min_order_size: parse_env_decimal(
                &env,
                "VENUE_ROUTER_MIN_ORDER_SIZE",
                router_defaults.min_order_size,
            ),
            split_score_gap: parse_env_f64(
                &env,
                "VENUE_ROUTER_SPLIT_SCORE_GAP",
                router_defaults.split_score_gap,
            ),
            rebalance_threshold: parse_env_f64(
                &env,
                "VENUE_ROUTER_REBALANCE_THRESHOLD",
                router_defaults.rebalance_threshold,
            ),
            metrics_refresh_interval: parse_env_duration_millis(
                &env,
                "VENUE_ROUTER_METRICS_REFRESH_MS",
                router_defaults.metrics_refresh_interval,
            ),
            leg_timeout: parse_env_duration_millis(
                &env,
                "VENUE_ROUTER_LEG_TIMEOUT_MS",
                router_defaults.leg_timeout,
            ),
            ..router_defaults
        };

        let connection_defaults = ConnectionSettings::default();
        let connection = ConnectionSettings {
            connect_timeout: parse_env_duration_millis(
                &env,
                "VENUE_ROUTER_CONNECT_TIMEOUT_MS",
                connection_defaults.connect_timeout,
            ),
            ping_interval: parse_env_duration_secs(
                &env,
                "VENUE_ROUTER_PING_INTERVAL_SECS",
                connection_defaults.ping_interval,
            ),
            pong_timeout: parse_env_duration_secs(
                &env,
                "VENUE_ROUTER_PONG_TIMEOUT_SECS",
                connection_defaults.pong_timeout,
            ),
            reconnect_base_delay: parse_env_duration_millis(
                &env,
                "VENUE_ROUTER_RECONNECT_BASE_DELAY_MS",
                connection_defaults.reconnect_base_delay,
            ),
            reconnect_max_delay: parse_env_duration_secs(
                &env,
                "VENUE_ROUTER_RECONNECT_MAX_DELAY_SECS",
                connection_defaults.reconnect_max_delay,
            ),
            reconnect_multiplier: parse_env_f64(
                &env,
                "VENUE_ROUTER_RECONNECT_MULTIPLIER",
                connection_defaults.reconnect_multiplier,
            ),
            reconnect_jitter: parse_env_f64(
                &env,
                "VENUE_ROUTER_RECONNECT_JITTER",
                connection_defaults.reconnect_jitter,
            ),
            max_reconnect_attempts: parse_env_u32(
                &env,
                "VENUE_ROUTER_MAX_RECONNECT_ATTEMPTS",
                connection_defaults.max_reconnect_attempts,
            ),
            queue_capacity: parse_env_usize(
                &env,
                "VENUE_ROUTER_QUEUE_CAPACITY",
                connection_defaults.queue_capacity,
            ),
            ..connection_defaults
        };

        Ok(Self {
            providers,
            symbols,
            simulate_orders: parse_env_bool(&env, "VENUE_ROUTER_SIMULATE_ORDERS", true),
            router,
            connection,
        })
    }
}

fn parse_providers(raw: &str) -> Result<Vec<ProviderEndpoint>, ConfigError> {
    let mut providers: Vec<ProviderEndpoint> = Vec::new();
    for item in raw.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        let (id, url) = item
            .split_once('=')
            .map(|(id, url)| (id.trim(), url.trim()))
            .filter(|(id, url)| !id.is_empty() && !url.is_empty())
            .ok_or_else(|| ConfigError::InvalidValue {
                key: PROVIDERS_KEY.to_string(),
                reason: format!("expected id=url, got '{item}'"),
            })?;
        if providers.iter().any(|p| p.id == id) {
            return Err(ConfigError::InvalidValue {
                key: PROVIDERS_KEY.to_string(),
                reason: format!("duplicate provider '{id}'"),
            });
        }
        providers.push(ProviderEndpoint {
            id: id.to_string(),
            url: url.to_string(),
        });
    }
    if providers.is_empty() {
        return Err(ConfigError::EmptyValue(PROVIDERS_KEY.to_string()));
    }
    Ok(providers)
}

/// Configuration error.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    /// Required environment variable is missing.
    #[error("missing required environment variable: {0}")]
    MissingEnvVar(String),
    /// Environment variable has empty value.
    #[error("environment variable {0} cannot be empty")]
    EmptyValue(String),
    /// Environment variable could not be parsed.
    #[error("invalid value for {key}: {reason}")]
    InvalidValue {
        /// Variable name.
        key: String,
        /// What was wrong.
        reason: String,
    },
}

fn parse_env<T: std::str::FromStr>(env: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    env(key).and_then(|v| v.trim().parse().ok())
}

fn parse_env_bool(env: &impl Fn(&str) -> Option<String>, key: &str, default: bool) -> bool {
    env(key).map_or(default, |v| match v.trim().to_lowercase().as_str() {
        "true" | "1" | "yes" => true,
        "false" | "0" | "no" => false,
        _ => default,
    })
}

fn parse_env_u32(env: &impl Fn(&str) -> Option<String>, key: &str, default: u32) -> u32 {
    parse_env(env, key).unwrap_or(default)
}

fn parse_env_usize(env: &impl Fn(&str) -> Option<String>, key: &str, default: usize) -> usize {
    parse_env(env, key).unwrap_or(default)
}

fn parse_env_f64(env: &impl Fn(&str) -> Option<String>, key: &str, default: f64) -> f64 {
    parse_env::<f64>(env, key)
        .filter(|v| v.is_finite())
        .unwrap_or(default)
}

fn parse_env_decimal(env: &impl Fn(&str) -> Option<String>, key: &str, default: Decimal) -> Decimal {
    parse_env(env, key).unwrap_or(default)
}

fn parse_env_duration_secs(
    env: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: Duration,
) -> Duration {
    parse_env::<u64>(env, key).map_or(default, Duration::from_secs)
}

fn parse_env_duration_millis(
    env: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: Duration,
) -> Duration {
    parse_env::<u64>(env, key).map_or(default, Duration::from_millis)
}
