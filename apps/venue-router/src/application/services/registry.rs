//! Provider Registry
//!
//! Holds every provider's capabilities and live metrics as one immutable
//! snapshot. Readers clone the `Arc`; writers build a new snapshot under the
//! write lock and swap it in, so a reader never sees a half-updated record.

use std::sync::Arc;

use chrono::Utc;
use parking_lot::RwLock;
use rust_decimal::Decimal;

use crate::application::ports::HealthSink;
use crate::domain::provider::{HealthSample, ProviderCapabilities, ProviderId, RoutingMetrics};
use crate::error::RoutingError;

/// One registered provider.
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderEntry {
    /// Provider id.
    pub id: ProviderId,
    /// Declared capabilities.
    pub capabilities: ProviderCapabilities,
    /// Live metrics.
    pub metrics: RoutingMetrics,
}

/// Immutable view of all providers, in registration order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RegistrySnapshot {
    entries: Vec<ProviderEntry>,
}

impl RegistrySnapshot {
    /// Look up a provider.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<&ProviderEntry> {
        self.entries.iter().find(|e| e.id == id)
    }

    fn get_mut(&mut self, id: &str) -> Option<&mut ProviderEntry> {
        self.entries.iter_mut().find(|e| e.id == id)
    }

    /// Providers in registration order.
    pub fn iter(&self) -> impl Iterator<Item = &ProviderEntry> {
        self.entries.iter()
    }

    /// Mutable access, for building the next snapshot.
    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut ProviderEntry> {
        self.entries.iter_mut()
    }

    /// Number of providers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no provider is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Registry of providers and their metrics.
#[derive(Debug, Default)]
pub struct ProviderRegistry {
    current: RwLock<Arc<RegistrySnapshot>>,
}

impl ProviderRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Current snapshot.
    #[must_use]
    pub fn snapshot(&self) -> Arc<RegistrySnapshot> {
        Arc::clone(&self.current.read())
    }

    /// Build and publish a new snapshot from the current one.
    pub fn update<R>(&self, f: impl FnOnce(&mut RegistrySnapshot) -> R) -> R {
        let mut guard = self.current.write();
        let mut next = RegistrySnapshot::clone(&guard);
        let result = f(&mut next);
        *guard = Arc::new(next);
        result
    }

    /// Register or replace a provider.
    ///
    /// Metrics are re-seeded from the capability hints; a live quote is
    /// kept. A re-registered provider keeps its registration position.
    pub fn register(&self, id: impl Into<ProviderId>, capabilities: ProviderCapabilities) {
        let id = id.into();
        let now = Utc::now().timestamp_millis();
        self.update(|snapshot| {
            let mut metrics = RoutingMetrics::seeded(&capabilities, now);
            if let Some(existing) = snapshot.get_mut(&id) {
                metrics.price = existing.metrics.price;
                existing.capabilities = capabilities;
                existing.metrics = metrics;
            } else {
                snapshot.entries.push(ProviderEntry {
                    id: id.clone(),
                    capabilities,
                    metrics,
                });
            }
        });
        tracing::info!(provider = %id, "Provider registered");
    }

    /// Remove a provider. Returns false if it was not registered.
    pub fn unregister(&self, id: &str) -> bool {
        let removed = self.update(|snapshot| {
            let before = snapshot.entries.len();
            snapshot.entries.retain(|e| e.id != id);
            snapshot.entries.len() != before
        });
        if removed {
            tracing::info!(provider = %id, "Provider unregistered");
        }
        removed
    }

    /// Record a quoted price.
    ///
    /// # Errors
    ///
    /// Returns [`RoutingError::UnknownProvider`] if the provider is not
    /// registered.
    pub fn update_quote(&self, id: &str, price: Decimal) -> Result<(), RoutingError> {
        let now = Utc::now().timestamp_millis();
        self.update(|snapshot| {
            let entry = snapshot
                .get_mut(id)
                .ok_or_else(|| RoutingError::UnknownProvider(id.to_string()))?;
            entry.metrics.price = Some(price);
            entry.metrics.last_updated = now;
            Ok(())
        })
    }

    /// Apply a health sample. Unknown providers are ignored.
    pub fn apply_health(&self, sample: &HealthSample) -> bool {
        let now = Utc::now().timestamp_millis();
        let applied = self.update(|snapshot| {
            let Some(entry) = snapshot.get_mut(&sample.provider_id) else {
                return false;
            };
            if sample.latency_ms.is_finite() && sample.latency_ms >= 0.0 {
                entry.metrics.base_latency_ms = sample.latency_ms;
                entry.metrics.latency_ms = sample.latency_ms;
            }
            if let Some(reliability) = sample.reliability_pct.filter(|r| r.is_finite()) {
                entry.metrics.reliability = reliability.clamp(0.0, 100.0);
            }
            entry.metrics.last_updated = now;
            true
        });
        if !applied {
            tracing::debug!(provider = %sample.provider_id, "Health sample for unknown provider");
        }
        applied
    }
}

impl HealthSink for ProviderRegistry {
    fn record_health(&self, sample: HealthSample) {
        self.apply_health(&sample);
    }
}
