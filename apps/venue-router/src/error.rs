//! Error types for the venue router.
//!
//! Each subsystem has its own `thiserror` enum. [`ErrorCode`] gives every
//! variant a stable reason string for logs and metrics labels, and says
//! whether the failure is worth retrying.
//!
//! | Code | Retryable | Raised by |
//! |------|-----------|-----------|
//! | `INVALID_ORDER` | no | `OrderRouter::route_order` |
//! | `NO_ELIGIBLE_PROVIDERS` | no | `OrderRouter::route_order` |
//! | `UNKNOWN_PROVIDER` | no | `OrderRouter::update_quote` |
//! | `NETWORK_ERROR` | yes | `ConnectionManager::send` |
//! | `CONNECTION_TIMEOUT` | yes | connect attempts |
//! | `CONNECTION_FAILED` | yes | connect attempts |
//! | `CIRCUIT_OPEN` | yes | connect attempts, order legs |
//! | `MAX_RECONNECT_ATTEMPTS_REACHED` | no | reconnect loop |
//! | `MANAGER_CLOSED` | no | any call after shutdown |
//! | `LEG_EXECUTION_FAILED` | no | `OrderRouter::execute_split_order` |

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Stable error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // Validation errors
    /// Order failed validation.
    InvalidOrder,
    /// No provider passed the eligibility filter.
    NoEligibleProviders,
    /// Provider id is not registered.
    UnknownProvider,

    // Connection errors
    /// Send attempted while disconnected.
    NetworkError,
    /// Handshake exceeded the connect timeout.
    ConnectionTimeout,
    /// Transport could not be opened.
    ConnectionFailed,
    /// Circuit breaker rejected the call.
    CircuitOpen,
    /// Reconnect attempts exhausted.
    MaxReconnectAttemptsReached,
    /// The connection actor is gone.
    ManagerClosed,

    // Dispatch errors
    /// A split order leg failed.
    LegExecutionFailed,
}

impl ErrorCode {
    /// Get the error reason string.
    #[must_use]
    pub const fn reason(&self) -> &'static str {
        match self {
            Self::InvalidOrder => "INVALID_ORDER",
            Self::NoEligibleProviders => "NO_ELIGIBLE_PROVIDERS",
            Self::UnknownProvider => "UNKNOWN_PROVIDER",
            Self::NetworkError => "NETWORK_ERROR",
            Self::ConnectionTimeout => "CONNECTION_TIMEOUT",
            Self::ConnectionFailed => "CONNECTION_FAILED",
            Self::CircuitOpen => "CIRCUIT_OPEN",
            Self::MaxReconnectAttemptsReached => "MAX_RECONNECT_ATTEMPTS_REACHED",
            Self::ManagerClosed => "MANAGER_CLOSED",
            Self::LegExecutionFailed => "LEG_EXECUTION_FAILED",
        }
    }

    /// Whether the automatic retry machinery may try again.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::NetworkError | Self::ConnectionTimeout | Self::ConnectionFailed | Self::CircuitOpen
        )
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.reason())
    }
}

// =============================================================================
// Routing
// =============================================================================

/// Errors from routing an order.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RoutingError {
    /// Order failed validation.
    #[error("Invalid order: {reason}")]
    InvalidOrder {
        /// Human-readable reason.
        reason: String,
    },

    /// No provider can take the order.
    #[error("No eligible providers for {symbol}: {reason}")]
    NoEligibleProviders {
        /// Order symbol.
        symbol: String,
        /// Why every provider was filtered out.
        reason: String,
    },

    /// Provider id is not registered.
    #[error("Unknown provider: {0}")]
    UnknownProvider(String),
}

impl RoutingError {
    /// Build an [`RoutingError::InvalidOrder`].
    #[must_use]
    pub fn invalid_order(reason: impl Into<String>) -> Self {
        Self::InvalidOrder {
            reason: reason.into(),
        }
    }

    /// Get the error code.
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::InvalidOrder { .. } => ErrorCode::InvalidOrder,
            Self::NoEligibleProviders { .. } => ErrorCode::NoEligibleProviders,
            Self::UnknownProvider(_) => ErrorCode::UnknownProvider,
        }
    }
}

// =============================================================================
// Connection
// =============================================================================

/// Errors from a provider connection.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConnectionError {
    /// Send attempted while the transport is down.
    #[error("Network error: not connected to {provider}")]
    NetworkError {
        /// Provider id.
        provider: String,
    },

    /// Handshake did not finish in time.
    #[error("Connection to {provider} timed out after {timeout:?}")]
    ConnectionTimeout {
        /// Provider id.
        provider: String,
        /// Configured connect timeout.
        timeout: Duration,
    },

    /// Transport could not be opened.
    #[error("Connection to {provider} failed: {reason}")]
    ConnectionFailed {
        /// Provider id.
        provider: String,
        /// Underlying failure.
        reason: String,
    },

    /// Circuit breaker rejected the attempt.
    #[error("Circuit breaker open for {0}")]
    CircuitOpen(String),

    /// Reconnect attempts exhausted.
    #[error("Max reconnect attempts ({attempts}) reached for {provider}")]
    MaxReconnectAttemptsReached {
        /// Provider id.
        provider: String,
        /// Attempts made.
        attempts: u32,
    },

    /// The connection actor has stopped.
    #[error("Connection manager closed")]
    ManagerClosed,
}

impl ConnectionError {
    /// Get the error code.
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::NetworkError { .. } => ErrorCode::NetworkError,
            Self::ConnectionTimeout { .. } => ErrorCode::ConnectionTimeout,
            Self::ConnectionFailed { .. } => ErrorCode::ConnectionFailed,
            Self::CircuitOpen(_) => ErrorCode::CircuitOpen,
            Self::MaxReconnectAttemptsReached { .. } => ErrorCode::MaxReconnectAttemptsReached,
            Self::ManagerClosed => ErrorCode::ManagerClosed,
        }
    }
}

// =============================================================================
// Order Dispatch
// =============================================================================

/// Failure of one leg of a split order.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LegExecutionError {
    /// No adapter is registered for the provider.
    #[error("No adapter registered for {0}")]
    NoAdapter(String),

    /// Allocated quantity is zero or negative.
    #[error("Invalid allocation for {provider}: {reason}")]
    InvalidAllocation {
        /// Provider id.
        provider: String,
        /// Why the allocation was rejected.
        reason: String,
    },

    /// Provider circuit breaker is open.
    #[error("Circuit breaker open for {0}")]
    CircuitOpen(String),

    /// Adapter did not answer within the leg timeout.
    #[error("Order placement on {provider} timed out after {timeout:?}")]
    Timeout {
        /// Provider id.
        provider: String,
        /// Configured leg timeout.
        timeout: Duration,
    },

    /// Adapter rejected the order.
    #[error("Order rejected by {provider}: {reason}")]
    Rejected {
        /// Provider id.
        provider: String,
        /// Rejection reason from the adapter.
        reason: String,
    },
}

impl LegExecutionError {
    /// Get the error code.
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::CircuitOpen(_) => ErrorCode::CircuitOpen,
            _ => ErrorCode::LegExecutionFailed,
        }
    }
}
