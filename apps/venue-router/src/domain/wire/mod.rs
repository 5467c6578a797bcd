//! Wire Envelope
//!
//! Every frame in either direction is one JSON object:
//!
//! ```json
//! {"type":"market-data","data":{...},"timestamp":1700000000000,"provider":"kis","subscriptionId":"..."}
//! ```
//!
//! Inbound frames are decoded once into [`InboundMessage`] so dispatch can
//! match on the tag exhaustively.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::subscription::SubscriptionType;

/// Recognized `type` values.
pub mod kind {
    /// Subscribe request.
    pub const SUBSCRIBE: &str = "subscribe";
    /// Unsubscribe request.
    pub const UNSUBSCRIBE: &str = "unsubscribe";
    /// Subscription acknowledgement.
    pub const SUBSCRIPTION_ACK: &str = "subscription-ack";
    /// Market data.
    pub const MARKET_DATA: &str = "market-data";
    /// Order update.
    pub const ORDER_UPDATE: &str = "order-update";
    /// Balance update.
    pub const BALANCE_UPDATE: &str = "balance-update";
    /// Position update.
    pub const POSITION_UPDATE: &str = "position-update";
    /// Keepalive ping.
    pub const PING: &str = "ping";
    /// Keepalive pong.
    pub const PONG: &str = "pong";
    /// Provider error.
    pub const ERROR: &str = "error";
}

/// Codec errors.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// JSON encoding/decoding failed.
    #[error("JSON codec error: {0}")]
    Json(#[from] serde_json::Error),

    /// Unknown message type.
    #[error("unknown message type: {0}")]
    UnknownMessageType(String),

    /// Required field missing.
    #[error("{kind} message missing {field}")]
    MissingField {
        /// Message type.
        kind: String,
        /// Missing field.
        field: &'static str,
    },
}

/// The JSON envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireMessage {
    /// Type discriminator.
    #[serde(rename = "type")]
    pub kind: String,
    /// Payload.
    #[serde(default)]
    pub data: Value,
    /// Epoch milliseconds.
    #[serde(default)]
    pub timestamp: i64,
    /// Provider id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    /// Subscription id the message belongs to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subscription_id: Option<String>,
}

impl WireMessage {
    /// Create an envelope.
    #[must_use]
    pub fn new(kind: impl Into<String>, data: Value, timestamp: i64) -> Self {
        Self {
            kind: kind.into(),
            data,
            timestamp,
            provider: None,
            subscription_id: None,
        }
    }

    /// Set the provider id.
    #[must_use]
    pub fn with_provider(mut self, provider: impl Into<String>) -> Self {
        self.provider = Some(provider.into());
        self
    }

    /// Set the subscription id.
    #[must_use]
    pub fn with_subscription(mut self, subscription_id: impl Into<String>) -> Self {
        self.subscription_id = Some(subscription_id.into());
        self
    }

    /// Keepalive ping.
    #[must_use]
    pub fn ping(timestamp: i64) -> Self {
        Self::new(kind::PING, Value::Null, timestamp)
    }

    /// Keepalive pong.
    #[must_use]
    pub fn pong(timestamp: i64) -> Self {
        Self::new(kind::PONG, Value::Null, timestamp)
    }

    /// Encode to a JSON text frame.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn encode(&self) -> Result<String, CodecError> {
        Ok(serde_json::to_string(self)?)
    }

    /// Decode a JSON text frame.
    ///
    /// # Errors
    ///
    /// Returns an error if the frame is not a valid envelope.
    pub fn decode(text: &str) -> Result<Self, CodecError> {
        Ok(serde_json::from_str(text)?)
    }
}

/// Data message categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DataKind {
    /// Quotes, trades, order book.
    MarketData,
    /// Order status change.
    OrderUpdate,
    /// Account balance change.
    BalanceUpdate,
    /// Position change.
    PositionUpdate,
}

impl DataKind {
    /// Subscription type that receives broadcasts of this kind.
    #[must_use]
    pub const fn subscription_type(self) -> SubscriptionType {
        match self {
            Self::MarketData => SubscriptionType::MarketData,
            Self::OrderUpdate => SubscriptionType::Order,
            Self::BalanceUpdate => SubscriptionType::Balance,
            Self::PositionUpdate => SubscriptionType::Position,
        }
    }

    /// Wire `type` value.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::MarketData => kind::MARKET_DATA,
            Self::OrderUpdate => kind::ORDER_UPDATE,
            Self::BalanceUpdate => kind::BALANCE_UPDATE,
            Self::PositionUpdate => kind::POSITION_UPDATE,
        }
    }
}

/// A data message delivered to subscription callbacks.
#[derive(Debug, Clone, PartialEq)]
pub struct DataMessage {
    /// Category.
    pub kind: DataKind,
    /// `data.symbol`, when present.
    pub symbol: Option<String>,
    /// Raw payload.
    pub data: Value,
    /// Epoch milliseconds.
    pub timestamp: i64,
    /// Provider id.
    pub provider: Option<String>,
    /// Target subscription, when addressed.
    pub subscription_id: Option<String>,
}

impl DataMessage {
    /// `data.price` as a decimal, given as a JSON number or string.
    #[must_use]
    pub fn price(&self) -> Option<Decimal> {
        match self.data.get("price")? {
            Value::String(s) => s.trim().parse().ok(),
            Value::Number(n) => n.to_string().parse().ok(),
            _ => None,
        }
    }
}

/// Decoded inbound frame.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundMessage {
    /// Provider confirmed a subscription.
    SubscriptionAck {
        /// Subscription id.
        subscription_id: String,
    },
    /// Market, order, balance or position data.
    Data(DataMessage),
    /// Provider ping.
    Ping {
        /// Epoch milliseconds.
        timestamp: i64,
    },
    /// Provider pong.
    Pong {
        /// Epoch milliseconds echoed from our ping.
        timestamp: i64,
    },
    /// Provider-reported error.
    Error {
        /// Error code, if given.
        code: Option<String>,
        /// Error message.
        message: String,
        /// Subscription it relates to.
        subscription_id: Option<String>,
    },
    /// Subscribe echoed by the provider.
    Subscribe {
        /// Subscription id.
        subscription_id: Option<String>,
    },
    /// Unsubscribe echoed by the provider.
    Unsubscribe {
        /// Subscription id.
        subscription_id: Option<String>,
    },
}

impl InboundMessage {
    /// Decode a text frame.
    ///
    /// # Errors
    ///
    /// Returns an error for invalid JSON, an unknown `type`, or a missing
    /// required field.
    pub fn decode(text: &str) -> Result<Self, CodecError> {
        WireMessage::decode(text)?.try_into()
    }

    /// Wire `type` value.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::SubscriptionAck { .. } => kind::SUBSCRIPTION_ACK,
            Self::Data(data) => data.kind.as_str(),
            Self::Ping { .. } => kind::PING,
            Self::Pong { .. } => kind::PONG,
            Self::Error { .. } => kind::ERROR,
            Self::Subscribe { .. } => kind::SUBSCRIBE,
            Self::Unsubscribe { .. } => kind::UNSUBSCRIBE,
        }
    }
}

impl TryFrom<WireMessage> for InboundMessage {
    type Error = CodecError;

    fn try_from(msg: WireMessage) -> Result<Self, CodecError> {
        let data_kind = match msg.kind.as_str() {
            kind::MARKET_DATA => Some(DataKind::MarketData),
            kind::ORDER_UPDATE => Some(DataKind::OrderUpdate),
            kind::BALANCE_UPDATE => Some(DataKind::BalanceUpdate),
            kind::POSITION_UPDATE => Some(DataKind::PositionUpdate),
            _ => None,
        };
        if let Some(data_kind) = data_kind {
            let symbol = msg
                .data
                .get("symbol")
                .and_then(Value::as_str)
                .map(str::to_string);
            return Ok(Self::Data(DataMessage {
                kind: data_kind,
                symbol,
                data: msg.data,
                timestamp: msg.timestamp,
                provider: msg.provider,
                subscription_id: msg.subscription_id,
            }));
        }

        match msg.kind.as_str() {
            kind::SUBSCRIPTION_ACK => {
                let subscription_id = msg
                    .subscription_id
                    .or_else(|| {
                        msg.data
                            .get("subscriptionId")
                            .and_then(Value::as_str)
                            .map(str::to_string)
                    })
                    .ok_or_else(|| CodecError::MissingField {
                        kind: msg.kind.clone(),
                        field: "subscriptionId",
                    })?;
                Ok(Self::SubscriptionAck { subscription_id })
            }
            kind::PING => Ok(Self::Ping {
                timestamp: msg.timestamp,
            }),
            kind::PONG => Ok(Self::Pong {
                timestamp: msg.timestamp,
            }),
            kind::ERROR => {
                let message = msg
                    .data
                    .get("message")
                    .and_then(Value::as_str)
                    .map_or_else(|| msg.data.to_string(), str::to_string);
                let code = msg.data.get("code").map(|c| match c {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                });
                Ok(Self::Error {
                    code,
                    message,
                    subscription_id: msg.subscription_id,
                })
            }
            kind::SUBSCRIBE => Ok(Self::Subscribe {
                subscription_id: msg.subscription_id,
            }),
            kind::UNSUBSCRIBE => Ok(Self::Unsubscribe {
                subscription_id: msg.subscription_id,
            }),
            other => Err(CodecError::UnknownMessageType(other.to_string())),
        }
    }
}
