//! Proportional quantity allocation across providers.

use rust_decimal::Decimal;
use rust_decimal::prelude::FromPrimitive;

use crate::domain::provider::ProviderId;

/// Split `total` across providers in proportion to their scores.
///
/// Every leg except the last is floored to a whole unit; the last leg takes
/// the remainder, so the allocations always sum to `total` exactly. Legs that
/// end up with nothing are dropped. With no positive score the shares are
/// equal.
#[must_use]
pub fn allocate_proportional(total: Decimal, scores: &[(ProviderId, f64)]) -> Vec<(ProviderId, Decimal)> {
    if scores.is_empty() || total <= Decimal::ZERO {
        return Vec::new();
    }

    let positive: f64 = scores
        .iter()
        .map(|(_, s)| if s.is_finite() { s.max(0.0) } else { 0.0 })
        .sum();
    let equal_share = 1.0 / scores.len() as f64;

    let mut remaining = total;
    let mut legs = Vec::with_capacity(scores.len());
    let last = scores.len() - 1;
    for (i, (provider_id, score)) in scores.iter().enumerate() {
        let quantity = if i == last {
            remaining
        } else {
            let share = if positive > 0.0 && score.is_finite() {
                score.max(0.0) / positive
            } else {
                equal_share
            };
            let share = Decimal::from_f64(share).unwrap_or(Decimal::ZERO);
            (total * share).floor().clamp(Decimal::ZERO, remaining)
        };
        remaining -= quantity;
        if quantity > Decimal::ZERO {
            legs.push((provider_id.clone(), quantity));
        }
    }
    legs
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rust_decimal_macros::dec;

    fn ids(scores: &[f64]) -> Vec<(ProviderId, f64)> {
        scores
            .iter()
            .enumerate()
            .map(|(i, s)| (format!("p{i}"), *s))
            .collect()
    }

    #[test]
    fn last_leg_absorbs_remainder() {
        let legs = allocate_proportional(dec!(1000), &ids(&[80.0, 79.0, 78.0]));
        assert_eq!(legs.len(), 3);
        assert_eq!(legs[0].1, dec!(337));
        assert_eq!(legs[1].1, dec!(333));
        assert_eq!(legs[2].1, dec!(330));
    }

    #[test]
    fn zero_scores_split_equally() {
        let legs = allocate_proportional(dec!(10), &ids(&[0.0, 0.0]));
        assert_eq!(legs, vec![("p0".to_string(), dec!(5)), ("p1".to_string(), dec!(5))]);
    }

    #[test]
    fn tiny_orders_drop_empty_legs() {
        let legs = allocate_proportional(dec!(1), &ids(&[50.0, 50.0, 50.0]));
        assert_eq!(legs, vec![("p2".to_string(), dec!(1))]);
    }

    #[test]
    fn fractional_totals_keep_exact_sum() {
        let legs = allocate_proportional(dec!(10.75), &ids(&[60.0, 40.0]));
        let sum: Decimal = legs.iter().map(|(_, q)| *q).sum();
        assert_eq!(sum, dec!(10.75));
        assert_eq!(legs[0].1, dec!(6));
    }

    #[test]
    fn empty_input_allocates_nothing() {
        assert!(allocate_proportional(dec!(10), &[]).is_empty());
        assert!(allocate_proportional(Decimal::ZERO, &ids(&[1.0])).is_empty());
    }

    proptest! {
        #[test]
        fn allocations_sum_to_total(
            quantity in 1u64..10_000_000,
            scale in 0u32..4,
            scores in proptest::collection::vec(0.0f64..=100.0, 1..8),
        ) {
            let total = Decimal::new(i64::try_from(quantity).unwrap_or(i64::MAX), scale);
            let legs = allocate_proportional(total, &ids(&scores));
            let sum: Decimal = legs.iter().map(|(_, q)| *q).sum();
            prop_assert_eq!(sum, total);
            prop_assert!(legs.iter().all(|(_, q)| *q > Decimal::ZERO));
        }
    }
}
