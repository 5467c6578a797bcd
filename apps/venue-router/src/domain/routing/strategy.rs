//! Routing strategies and scoring weights.

use std::fmt;

use serde::{Deserialize, Serialize};

/// What the caller wants to optimize for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RoutingStrategy {
    /// Favor the best quoted price.
    BestPrice,
    /// Favor the lowest latency.
    FastestExecution,
    /// Favor the lowest fees.
    LowestCost,
    /// Favor reliability and liquidity.
    HighestReliability,
    /// Equal weights.
    #[default]
    Balanced,
}

impl RoutingStrategy {
    /// Weight table row for this strategy.
    #[must_use]
    pub const fn weights(&self) -> ScoringWeights {
        match self {
            Self::BestPrice => ScoringWeights::new(0.50, 0.10, 0.10, 0.30),
            Self::FastestExecution => ScoringWeights::new(0.10, 0.60, 0.10, 0.20),
            Self::LowestCost => ScoringWeights::new(0.20, 0.10, 0.60, 0.10),
            Self::HighestReliability => ScoringWeights::new(0.20, 0.10, 0.10, 0.60),
            Self::Balanced => ScoringWeights::new(0.25, 0.25, 0.25, 0.25),
        }
    }
}

impl fmt::Display for RoutingStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BestPrice => write!(f, "best-price"),
            Self::FastestExecution => write!(f, "fastest-execution"),
            Self::LowestCost => write!(f, "lowest-cost"),
            Self::HighestReliability => write!(f, "highest-reliability"),
            Self::Balanced => write!(f, "balanced"),
        }
    }
}

/// Weights applied to the normalized metrics.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoringWeights {
    /// Price weight.
    pub price: f64,
    /// Speed (latency) weight.
    pub speed: f64,
    /// Cost (fee) weight.
    pub cost: f64,
    /// Reliability and liquidity weight.
    pub reliability: f64,
}

impl ScoringWeights {
    /// Create a weight set.
    #[must_use]
    pub const fn new(price: f64, speed: f64, cost: f64, reliability: f64) -> Self {
        Self {
            price,
            speed,
            cost,
            reliability,
        }
    }

    /// Scale the weights so they sum to 1.
    ///
    /// Returns `None` when any weight is negative or non-finite, or the sum
    /// is not positive.
    #[must_use]
    pub fn normalized(&self) -> Option<Self> {
        let parts = [self.price, self.speed, self.cost, self.reliability];
        if parts.iter().any(|w| !w.is_finite() || *w < 0.0) {
            return None;
        }
        let sum: f64 = parts.iter().sum();
        if sum <= 0.0 {
            return None;
        }
        Some(Self::new(
            self.price / sum,
            self.speed / sum,
            self.cost / sum,
            self.reliability / sum,
        ))
    }
}

/// Strategy plus optional custom weights for one routing call.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoutingPriority {
    /// Strategy used when no custom weights are given.
    pub strategy: RoutingStrategy,
    /// Custom weights; they replace the strategy's table row entirely.
    pub custom_weights: Option<ScoringWeights>,
}

impl RoutingPriority {
    /// Priority for a named strategy.
    #[must_use]
    pub const fn strategy(strategy: RoutingStrategy) -> Self {
        Self {
            strategy,
            custom_weights: None,
        }
    }

    /// Priority with custom weights.
    #[must_use]
    pub const fn custom(strategy: RoutingStrategy, weights: ScoringWeights) -> Self {
        Self {
            strategy,
            custom_weights: Some(weights),
        }
    }

    /// Weights to score with.
    ///
    /// Unusable custom weights fall back to [`RoutingStrategy::Balanced`].
    #[must_use]
    pub fn effective_weights(&self) -> ScoringWeights {
        match self.custom_weights {
            Some(custom) => custom
                .normalized()
                .unwrap_or_else(|| RoutingStrategy::Balanced.weights()),
            None => self.strategy.weights(),
        }
    }
}
