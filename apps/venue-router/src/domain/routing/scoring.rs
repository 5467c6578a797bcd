//! Multi-factor provider scoring.
//!
//! Each raw metric is normalized to `[0, 1]` relative to the best candidate
//! in the set, then combined with the strategy weights into a 0-100 score:
//!
//! | Factor | Normalization |
//! |--------|---------------|
//! | price | `best / price` (1.0 when unquoted) |
//! | speed | `best_latency / latency` |
//! | cost | `(best + 1bp) / (cost + 1bp)` |
//! | reliability | `0.5 * reliability/100 + 0.5 * min(liquidity/notional, 1)` |

use crate::domain::provider::{ProviderId, RoutingMetrics};

use super::strategy::ScoringWeights;

/// Added to fee rates so zero-fee providers do not divide by zero.
const COST_EPSILON: f64 = 0.0001;

/// Highest possible score.
pub const MAX_SCORE: f64 = 100.0;

/// A provider with its computed score.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredProvider {
    /// Provider id.
    pub provider_id: ProviderId,
    /// Score in `[0, 100]`.
    pub score: f64,
    /// Metrics the score was computed from.
    pub metrics: RoutingMetrics,
}

/// Best (minimum) values across the candidate set.
#[derive(Debug, Clone, Copy)]
struct Baseline {
    price: Option<f64>,
    latency: Option<f64>,
    cost: f64,
}

impl Baseline {
    fn of<'a>(metrics: impl Iterator<Item = &'a RoutingMetrics>) -> Self {
        let mut baseline = Self {
            price: None,
            latency: None,
            cost: f64::INFINITY,
        };
        for m in metrics {
            if let Some(price) = m.price_f64() {
                baseline.price = Some(baseline.price.map_or(price, |b: f64| b.min(price)));
            }
            if m.latency_ms.is_finite() && m.latency_ms > 0.0 {
                let latency = m.latency_ms;
                baseline.latency = Some(baseline.latency.map_or(latency, |b: f64| b.min(latency)));
            }
            baseline.cost = baseline.cost.min(m.cost_f64());
        }
        if !baseline.cost.is_finite() {
            baseline.cost = 0.0;
        }
        baseline
    }
}

fn ratio(best: f64, value: f64) -> f64 {
    if value <= 0.0 || !value.is_finite() {
        return 1.0;
    }
    (best / value).clamp(0.0, 1.0)
}

fn score_one(metrics: &RoutingMetrics, baseline: Baseline, weights: &ScoringWeights, notional: f64) -> f64 {
    let price = match (baseline.price, metrics.price_f64()) {
        (Some(best), Some(price)) => ratio(best, price),
        _ => 1.0,
    };
    let speed = baseline
        .latency
        .map_or(1.0, |best| ratio(best, metrics.latency_ms));
    let cost = ratio(baseline.cost + COST_EPSILON, metrics.cost_f64() + COST_EPSILON);
    let liquidity = if notional > 0.0 {
        (metrics.liquidity_f64() / notional).min(1.0)
    } else {
        1.0
    };
    let reliability = 0.5 * (metrics.reliability / 100.0).clamp(0.0, 1.0) + 0.5 * liquidity;

    let raw = MAX_SCORE
        * (weights.price * price
            + weights.speed * speed
            + weights.cost * cost
            + weights.reliability * reliability);
    if raw.is_nan() {
        0.0
    } else {
        raw.clamp(0.0, MAX_SCORE)
    }
}

/// Score candidates and sort them by descending score.
///
/// Candidates must be given in registration order; the sort is stable so ties
/// keep that order.
#[must_use]
pub fn score_providers(
    candidates: Vec<(ProviderId, RoutingMetrics)>,
    weights: &ScoringWeights,
    notional: f64,
) -> Vec<ScoredProvider> {
    let baseline = Baseline::of(candidates.iter().map(|(_, m)| m));
    let mut scored: Vec<ScoredProvider> = candidates
        .into_iter()
        .map(|(provider_id, mut metrics)| {
            let score = score_one(&metrics, baseline, weights, notional);
            metrics.score = score;
            ScoredProvider {
                provider_id,
                score,
                metrics,
            }
        })
        .collect();
    scored.sort_by(|a, b| b.score.total_cmp(&a.score));
    scored
}

/// Confidence from the scores of the selected providers.
///
/// Mean score scaled to `[0, 1]`, reduced by the population variance.
#[must_use]
pub fn confidence(scores: &[f64]) -> f64 {
    if scores.is_empty() {
        return 0.0;
    }
    let n = scores.len() as f64;
    let mean = scores.iter().sum::<f64>() / n;
    let variance = scores.iter().map(|s| (s - mean).powi(2)).sum::<f64>() / n;
    let value = (mean / MAX_SCORE) / (1.0 + variance / MAX_SCORE);
    if value.is_nan() { 0.0 } else { value.clamp(0.0, 1.0) }
}
