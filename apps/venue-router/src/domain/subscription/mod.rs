//! Subscription Management Types
//!
//! Logical subscriptions multiplexed over one provider connection.
//!
//! # Lifecycle
//!
//! A subscription starts inactive. It becomes active when the provider
//! acknowledges it, goes inactive again when the transport drops, and is
//! replayed on every successful reconnect under the same local id and
//! callback. It is removed on `unsubscribe` or manager teardown.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::domain::wire::{DataMessage, WireMessage, kind};

// =============================================================================
// Types
// =============================================================================

/// Subscription identifier.
pub type SubscriptionId = String;

/// A symbol string.
pub type Symbol = String;

/// Callback invoked for each data message routed to a subscription.
pub type SubscriptionCallback = Arc<dyn Fn(&DataMessage) -> anyhow::Result<()> + Send + Sync>;

/// What a subscription listens to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SubscriptionType {
    /// Quotes, trades, order book.
    MarketData,
    /// Order status.
    Order,
    /// Account balances.
    Balance,
    /// Positions.
    Position,
    /// Provider-specific stream, only reached by subscription id.
    Custom,
}

impl fmt::Display for SubscriptionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MarketData => write!(f, "market-data"),
            Self::Order => write!(f, "order"),
            Self::Balance => write!(f, "balance"),
            Self::Position => write!(f, "position"),
            Self::Custom => write!(f, "custom"),
        }
    }
}

/// Snapshot of one subscription.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Subscription {
    /// Local id.
    pub id: SubscriptionId,
    /// Stream type.
    pub subscription_type: SubscriptionType,
    /// Symbols; empty means all.
    pub symbols: Vec<Symbol>,
    /// Extra filters sent to the provider and matched against payload keys.
    pub filters: HashMap<String, Value>,
    /// Set once the provider acknowledged.
    pub is_active: bool,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last message delivered.
    pub last_message_at: Option<DateTime<Utc>>,
}

impl Subscription {
    /// Create an inactive subscription.
    #[must_use]
    pub fn new(
        id: impl Into<SubscriptionId>,
        subscription_type: SubscriptionType,
        symbols: Vec<Symbol>,
        filters: HashMap<String, Value>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: id.into(),
            subscription_type,
            symbols,
            filters,
            is_active: false,
            created_at,
            last_message_at: None,
        }
    }

    /// Subscribe request for this subscription.
    #[must_use]
    pub fn subscribe_message(&self, timestamp: i64) -> WireMessage {
        WireMessage::new(
            kind::SUBSCRIBE,
            json!({
                "subscriptionType": self.subscription_type,
                "symbols": self.symbols,
                "filters": self.filters,
            }),
            timestamp,
        )
        .with_subscription(self.id.clone())
    }

    /// Unsubscribe request for this subscription.
    #[must_use]
    pub fn unsubscribe_message(&self, timestamp: i64) -> WireMessage {
        WireMessage::new(
            kind::UNSUBSCRIBE,
            json!({ "subscriptionType": self.subscription_type }),
            timestamp,
        )
        .with_subscription(self.id.clone())
    }

    /// Whether a broadcast data message should reach this subscription.
    #[must_use]
    pub fn accepts(&self, message: &DataMessage) -> bool {
        if message.kind.subscription_type() != self.subscription_type {
            return false;
        }
        if let Some(symbol) = &message.symbol
            && !self.symbols.is_empty()
            && !self.symbols.iter().any(|s| s == symbol)
        {
            return false;
        }
        self.filters
            .iter()
            .all(|(key, expected)| message.data.get(key).is_none_or(|v| v == expected))
    }
}

// =============================================================================
// Registry
// =============================================================================

/// A subscription plus its callback.
#[derive(Clone)]
pub struct SubscriptionEntry {
    /// Subscription state.
    pub subscription: Subscription,
    /// Callback.
    pub callback: SubscriptionCallback,
}

impl fmt::Debug for SubscriptionEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriptionEntry")
            .field("subscription", &self.subscription)
            .finish_non_exhaustive()
    }
}

/// Subscriptions owned by one connection, in creation order.
#[derive(Debug, Default)]
pub struct SubscriptionRegistry {
    entries: Vec<SubscriptionEntry>,
}

impl SubscriptionRegistry {
    /// Create an empty registry.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// Add a subscription.
    pub fn insert(&mut self, subscription: Subscription, callback: SubscriptionCallback) {
        self.entries.push(SubscriptionEntry {
            subscription,
            callback,
        });
    }

    /// Remove a subscription.
    pub fn remove(&mut self, id: &str) -> Option<Subscription> {
        let index = self.entries.iter().position(|e| e.subscription.id == id)?;
        Some(self.entries.remove(index).subscription)
    }

    /// Look up a subscription.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<&SubscriptionEntry> {
        self.entries.iter().find(|e| e.subscription.id == id)
    }

    /// Mark a subscription active. Returns false for unknown ids.
    pub fn mark_active(&mut self, id: &str) -> bool {
        match self.entries.iter_mut().find(|e| e.subscription.id == id) {
            Some(entry) => {
                entry.subscription.is_active = true;
                true
            }
            None => false,
        }
    }

    /// Mark every subscription inactive (transport dropped).
    pub fn mark_all_inactive(&mut self) {
        for entry in &mut self.entries {
            entry.subscription.is_active = false;
        }
    }

    /// Record a delivery.
    pub fn touch(&mut self, id: &str, at: DateTime<Utc>) {
        if let Some(entry) = self.entries.iter_mut().find(|e| e.subscription.id == id) {
            entry.subscription.last_message_at = Some(at);
        }
    }

    /// Entries a data message should be delivered to.
    ///
    /// An addressed message goes to that one subscription whatever its type;
    /// a broadcast goes to every active subscription that accepts it.
    #[must_use]
    pub fn recipients(&self, message: &DataMessage) -> Vec<SubscriptionEntry> {
        if let Some(id) = &message.subscription_id {
            return self.get(id).cloned().into_iter().collect();
        }
        self.entries
            .iter()
            .filter(|e| e.subscription.is_active && e.subscription.accepts(message))
            .cloned()
            .collect()
    }

    /// Subscriptions in creation order.
    pub fn iter(&self) -> impl Iterator<Item = &Subscription> {
        self.entries.iter().map(|e| &e.subscription)
    }

    /// Snapshot of every subscription.
    #[must_use]
    pub fn snapshot(&self) -> Vec<Subscription> {
        self.iter().cloned().collect()
    }

    /// Number of subscriptions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the registry is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of active subscriptions.
    #[must_use]
    pub fn active_len(&self) -> usize {
        self.entries
            .iter()
            .filter(|e| e.subscription.is_active)
            .count()
    }

    /// Remove everything.
    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::wire::DataKind;

    fn noop() -> SubscriptionCallback {
        Arc::new(|_| Ok(()))
    }

    fn sub(id: &str, ty: SubscriptionType, symbols: &[&str]) -> Subscription {
        Subscription::new(
            id,
            ty,
            symbols.iter().map(|s| (*s).to_string()).collect(),
            HashMap::new(),
            Utc::now(),
        )
    }

    fn market(symbol: Option<&str>, id: Option<&str>) -> DataMessage {
        DataMessage {
            kind: DataKind::MarketData,
            symbol: symbol.map(str::to_string),
            data: json!({"symbol": symbol, "venue": "krx"}),
            timestamp: 0,
            provider: None,
            subscription_id: id.map(str::to_string),
        }
    }

    #[test]
    fn new_subscriptions_start_inactive() {
        let mut registry = SubscriptionRegistry::new();
        registry.insert(sub("a", SubscriptionType::MarketData, &[]), noop());
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.active_len(), 0);
        assert!(registry.mark_active("a"));
        assert!(!registry.mark_active("missing"));
        assert_eq!(registry.active_len(), 1);
    }

    #[test]
    fn broadcast_reaches_active_matching_subscriptions_only() {
        let mut registry = SubscriptionRegistry::new();
        registry.insert(sub("all", SubscriptionType::MarketData, &[]), noop());
        registry.insert(sub("aapl", SubscriptionType::MarketData, &["AAPL"]), noop());
        registry.insert(sub("msft", SubscriptionType::MarketData, &["MSFT"]), noop());
        registry.insert(sub("orders", SubscriptionType::Order, &[]), noop());
        registry.insert(sub("pending", SubscriptionType::MarketData, &[]), noop());
        for id in ["all", "aapl", "msft", "orders"] {
            registry.mark_active(id);
        }

        let ids: Vec<_> = registry
            .recipients(&market(Some("AAPL"), None))
            .into_iter()
            .map(|e| e.subscription.id)
            .collect();
        assert_eq!(ids, ["all", "aapl"]);
    }

    #[test]
    fn addressed_message_reaches_one_subscription() {
        let mut registry = SubscriptionRegistry::new();
        registry.insert(sub("a", SubscriptionType::Custom, &[]), noop());
        registry.insert(sub("b", SubscriptionType::MarketData, &[]), noop());
        registry.mark_active("b");
        let recipients = registry.recipients(&market(None, Some("a")));
        assert_eq!(recipients.len(), 1);
        assert_eq!(recipients[0].subscription.id, "a");
    }

    #[test]
    fn filters_match_payload_keys() {
        let mut s = sub("a", SubscriptionType::MarketData, &[]);
        s.filters.insert("venue".into(), json!("krx"));
        assert!(s.accepts(&market(Some("AAPL"), None)));
        s.filters.insert("venue".into(), json!("nxt"));
        assert!(!s.accepts(&market(Some("AAPL"), None)));
    }

    #[test]
    fn mark_all_inactive_and_remove() {
        let mut registry = SubscriptionRegistry::new();
        registry.insert(sub("a", SubscriptionType::Balance, &[]), noop());
        registry.insert(sub("b", SubscriptionType::Position, &[]), noop());
        registry.mark_active("a");
        registry.mark_active("b");
        registry.mark_all_inactive();
        assert_eq!(registry.active_len(), 0);
        assert_eq!(registry.remove("a").map(|s| s.id), Some("a".to_string()));
        assert!(registry.remove("a").is_none());
        assert_eq!(registry.len(), 1);
        registry.clear();
        assert!(registry.is_empty());
    }

    #[test]
    fn subscribe_message_carries_id_and_symbols() {
        let s = sub("s-1", SubscriptionType::MarketData, &["AAPL"]);
        let msg = s.subscribe_message(3);
        assert_eq!(msg.kind, kind::SUBSCRIBE);
        assert_eq!(msg.subscription_id.as_deref(), Some("s-1"));
        assert_eq!(msg.data["symbols"], json!(["AAPL"]));
        assert_eq!(msg.data["subscriptionType"], json!("market-data"));
        assert_eq!(s.unsubscribe_message(4).kind, kind::UNSUBSCRIBE);
    }
}
