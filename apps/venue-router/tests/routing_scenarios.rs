//! Order Routing Integration Tests
//!
//! Routes orders through the public router API and dispatches the resulting
//! plans to simulated provider adapters.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::float_cmp)]

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use venue_router::infrastructure::broker::SimulatedProviderAdapter;
use venue_router::{
    LegExecutionError, OrderRequest, OrderRouter, OrderSide, OrderType, ProviderCapabilities,
    RouterSettings, RoutingError, RoutingMetrics, RoutingPriority, RoutingStrategy,
};
use venue_router::domain::routing::ScoringWeights;

fn caps(latency_ms: f64, fee_rate: Decimal) -> ProviderCapabilities {
    ProviderCapabilities {
        average_latency_ms: latency_ms,
        uptime_pct: 99.0,
        fee_rate,
        ..ProviderCapabilities::default()
    }
}

fn live_metrics(router: &OrderRouter, id: &str, price: Decimal) -> RoutingMetrics {
    let snapshot = router.registry().snapshot();
    let mut metrics = snapshot.get(id).unwrap().metrics.clone();
    metrics.price = Some(price);
    metrics
}

#[test]
fn large_order_splits_across_similar_providers() {
    let router = OrderRouter::new(RouterSettings::default());
    router.register_provider("kis", caps(50.0, dec!(0.00015)));
    router.register_provider("ls", caps(51.0, dec!(0.00015)));
    router.register_provider("kiwoom", caps(52.0, dec!(0.00015)));

    let order = OrderRequest::limit("005930", OrderSide::Buy, dec!(1000), dec!(85_000));
    let result = router.route_order(&order, None).unwrap();

    assert!(result.is_split);
    assert!(result.selected_providers.len() >= 2);
    assert_eq!(result.selected_providers[0], "kis");
    assert_eq!(result.allocated_total(), dec!(1000));
    assert_eq!(result.total_quantity, dec!(1000));
    assert_eq!(result.strategy, RoutingStrategy::Balanced);
    assert_eq!(result.expected_price, Some(dec!(85_000)));
    assert!(result.confidence > 0.0 && result.confidence <= 1.0);
    assert!(result.reasoning.contains("split across"));

    let stats = router.routing_statistics();
    assert_eq!(stats.orders_routed, 1);
    assert_eq!(stats.split_orders, 1);
}

#[test]
fn dominant_provider_takes_small_order_alone() {
    let settings = RouterSettings {
        session_latency_penalty: 1.0,
        ..RouterSettings::default()
    };
    let router = OrderRouter::new(settings);
    router.register_provider("fast", caps(10.0, dec!(0.0001)));
    router.register_provider(
        "slow",
        ProviderCapabilities {
            uptime_pct: 10.0,
            typical_liquidity: Decimal::ZERO,
            ..caps(100.0, dec!(0.001))
        },
    );

    let order = OrderRequest::limit("AAPL", OrderSide::Sell, dec!(10), dec!(1000));
    let result = router.route_order(&order, None).unwrap();

    // A single-provider plan's confidence is its score over 100.
    assert!(result.confidence >= 0.9);
    assert!(result.alternatives[0].score <= 45.0);
    assert!(!result.is_split);
    assert_eq!(result.selected_providers, ["fast"]);
    assert_eq!(result.allocation("fast"), dec!(10));
    assert_eq!(result.estimated_cost, dec!(1));
    assert_eq!(result.estimated_latency_ms, 10.0);
    assert_eq!(result.alternatives.len(), 1);
    assert_eq!(result.alternatives[0].provider_id, "slow");
}

#[test]
fn every_provider_filtered_reports_each_reason() {
    let router = OrderRouter::new(RouterSettings::default());
    router.register_provider(
        "market-only",
        ProviderCapabilities {
            supported_order_types: vec![OrderType::Market],
            ..ProviderCapabilities::default()
        },
    );
    router.register_provider(
        "whale",
        ProviderCapabilities {
            min_order_size: dec!(1_000_000),
            ..ProviderCapabilities::default()
        },
    );

    let order = OrderRequest::limit("AAPL", OrderSide::Buy, dec!(10), dec!(1000));
    let Err(RoutingError::NoEligibleProviders { symbol, reason }) = router.route_order(&order, None)
    else {
        panic!("expected no eligible providers");
    };
    assert_eq!(symbol, "AAPL");
    assert!(reason.contains("market-only: "));
    assert!(reason.contains("whale: notional"));
    assert_eq!(router.routing_statistics().orders_routed, 0);
}

#[test]
fn market_order_is_priced_from_best_quote() {
    let settings = RouterSettings {
        enable_split_orders: false,
        ..RouterSettings::default()
    };
    let router = OrderRouter::new(settings);
    router.register_provider("a", caps(20.0, dec!(0.00015)));
    router.register_provider("b", caps(20.0, dec!(0.00015)));
    router.update_quote("a", dec!(101)).unwrap();
    router.update_quote("b", dec!(100)).unwrap();
    assert!(matches!(
        router.update_quote("ghost", dec!(1)),
        Err(RoutingError::UnknownProvider(_))
    ));

    let order = OrderRequest::new("AAPL", OrderSide::Buy, OrderType::Market, dec!(5));
    let result = router
        .route_order(&order, Some(RoutingPriority::strategy(RoutingStrategy::BestPrice)))
        .unwrap();
    assert_eq!(result.selected_providers, ["b"]);
    assert_eq!(result.expected_price, Some(dec!(100)));
    assert_eq!(result.alternatives[0].expected_price, Some(dec!(101)));
}

#[test]
fn price_drift_triggers_reroute() {
    let settings = RouterSettings {
        enable_split_orders: false,
        ..RouterSettings::default()
    };
    let router = OrderRouter::new(settings);
    router.register_provider("a", caps(10.0, dec!(0.00015)));
    router.register_provider("b", caps(10.5, dec!(0.00015)));
    router.update_quote("a", dec!(100)).unwrap();
    router.update_quote("b", dec!(100)).unwrap();

    let order = OrderRequest::limit("AAPL", OrderSide::Buy, dec!(10), dec!(100));
    let original = router.route_order(&order, None).unwrap();
    assert_eq!(original.selected_providers, ["a"]);

    let calm = HashMap::from([("a".to_string(), live_metrics(&router, "a", dec!(100.2)))]);
    let kept = router.rebalance_order(&original, &calm).unwrap();
    assert_eq!(kept, original);

    let drifted = HashMap::from([
        ("a".to_string(), live_metrics(&router, "a", dec!(110))),
        ("b".to_string(), live_metrics(&router, "b", dec!(100))),
    ]);
    let rerouted = router.rebalance_order(&original, &drifted).unwrap();
    assert_eq!(rerouted.selected_providers, ["b"]);
    assert_eq!(rerouted.expected_price, Some(dec!(100)));

    let stored = router.registry().snapshot();
    assert_eq!(stored.get("a").unwrap().metrics.price, Some(dec!(100)));
}

#[test]
fn rebalance_keeps_custom_weights() {
    let settings = RouterSettings {
        enable_split_orders: false,
        ..RouterSettings::default()
    };
    let router = OrderRouter::new(settings);
    router.register_provider("fast", caps(10.0, dec!(0.001)));
    router.register_provider("cheap", caps(50.0, dec!(0.0001)));
    router.update_quote("fast", dec!(110)).unwrap();
    router.update_quote("cheap", dec!(100)).unwrap();

    let speed_only = RoutingPriority::custom(
        RoutingStrategy::LowestCost,
        ScoringWeights::new(0.0, 1.0, 0.0, 0.0),
    );
    let order = OrderRequest::new("AAPL", OrderSide::Buy, OrderType::Market, dec!(10));
    let original = router.route_order(&order, Some(speed_only)).unwrap();
    assert_eq!(original.selected_providers, ["fast"]);
    assert_eq!(original.expected_price, Some(dec!(110)));
    assert_eq!(original.priority, speed_only);

    let drifted = HashMap::from([
        ("fast".to_string(), live_metrics(&router, "fast", dec!(112))),
        ("cheap".to_string(), live_metrics(&router, "cheap", dec!(100))),
    ]);
    let rerouted = router.rebalance_order(&original, &drifted).unwrap();
    assert_eq!(rerouted.selected_providers, ["fast"]);
    assert_eq!(rerouted.expected_price, Some(dec!(112)));
    assert_eq!(rerouted.priority, speed_only);
    assert_eq!(rerouted.strategy, RoutingStrategy::LowestCost);
}

#[tokio::test]
async fn split_execution_isolates_rejected_leg() {
    let router = OrderRouter::new(RouterSettings::default());
    router
        .register_adapter(Arc::new(SimulatedProviderAdapter::new(
            "ok",
            ProviderCapabilities::default(),
        )))
        .await;
    router
        .register_adapter(Arc::new(
            SimulatedProviderAdapter::new("bad", ProviderCapabilities::default())
                .rejecting("insufficient balance"),
        ))
        .await;

    let order = OrderRequest::limit("005930", OrderSide::Buy, dec!(1000), dec!(85_000));
    let plan = router.route_order(&order, None).unwrap();
    assert_eq!(plan.selected_providers, ["ok", "bad"]);

    let legs = router.execute(&plan).await;
    assert_eq!(legs.len(), 2);

    let ok = &legs[0];
    assert!(ok.is_success());
    let placed = ok.outcome.as_ref().unwrap();
    assert_eq!(placed.provider_order_id, "ok-1");
    assert_eq!(placed.quantity, plan.allocation("ok"));

    let bad = &legs[1];
    let Some(LegExecutionError::Rejected { provider, reason }) = bad.error() else {
        panic!("expected rejected leg, got {:?}", bad.outcome);
    };
    assert_eq!(provider, "bad");
    assert!(reason.contains("insufficient balance"));
}

#[tokio::test(start_paused = true)]
async fn slow_leg_times_out_without_blocking_others() {
    let settings = RouterSettings {
        leg_timeout: Duration::from_millis(500),
        ..RouterSettings::default()
    };
    let router = OrderRouter::new(settings);
    router
        .register_adapter(Arc::new(SimulatedProviderAdapter::new(
            "quick",
            ProviderCapabilities::default(),
        )))
        .await;
    router
        .register_adapter(Arc::new(
            SimulatedProviderAdapter::new("stuck", ProviderCapabilities::default())
                .with_latency(Duration::from_secs(5)),
        ))
        .await;

    let order = OrderRequest::limit("AAPL", OrderSide::Buy, dec!(10), dec!(100));
    let allocations = HashMap::from([
        ("quick".to_string(), dec!(4)),
        ("stuck".to_string(), dec!(6)),
    ]);
    let legs = router
        .execute_split_order(
            &order,
            &["quick".to_string(), "stuck".to_string()],
            &allocations,
        )
        .await;

    assert!(legs[0].is_success());
    assert!(matches!(
        legs[1].error(),
        Some(LegExecutionError::Timeout { .. })
    ));
}
