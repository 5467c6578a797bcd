//! Venue Router Binary
//!
//! Connects to every configured provider stream, feeds quotes and ping
//! round trips into the router's provider registry, and logs connection
//! events until shutdown.
//!
//! # Usage
//!
//! ```bash
//! VENUE_ROUTER_PROVIDERS="kis=wss://kis.example/ws,ls=wss://ls.example/ws" \
//!     cargo run --bin venue-router
//! ```
//!
//! See [`venue_router::AppConfig`] for every `VENUE_ROUTER_*` variable.
//! Telemetry reads `OTEL_ENABLED`, `OTEL_EXPORTER_OTLP_ENDPOINT`,
//! `OTEL_SERVICE_NAME` and `RUST_LOG`.

use std::sync::Arc;
use std::time::Duration;

use tokio::signal;
use tokio_util::sync::CancellationToken;
use venue_router::application::ports::HealthSink;
use venue_router::infrastructure::broker::SimulatedProviderAdapter;
use venue_router::infrastructure::stream::WebSocketConnector;
use venue_router::infrastructure::telemetry;
use venue_router::{
    AppConfig, ConnectionEvent, ConnectionManager, OrderRouter, ProviderCapabilities,
    ProviderRegistry, SubscriptionType, init_metrics,
};

/// Graceful shutdown timeout.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    rustls::crypto::ring::default_provider()
        .install_default()
        .expect("Failed to install rustls crypto provider");

    load_dotenv();

    let _telemetry_guard = telemetry::init();

    tracing::info!("Starting Venue Router");

    let _metrics_handle = init_metrics()?;

    let config = AppConfig::from_env()?;
    log_config(&config);

    let shutdown_token = CancellationToken::new();

    let registry = Arc::new(ProviderRegistry::new());
    let router = Arc::new(OrderRouter::with_registry(
        config.router.clone(),
        Arc::clone(&registry),
    ));

    for endpoint in &config.providers {
        if config.simulate_orders {
            let adapter =
                SimulatedProviderAdapter::new(endpoint.id.clone(), ProviderCapabilities::default());
            router.register_adapter(Arc::new(adapter)).await;
        } else {
            router.register_provider(endpoint.id.clone(), ProviderCapabilities::default());
        }
    }

    let health: Arc<dyn HealthSink> = registry;
    let mut managers = Vec::with_capacity(config.providers.len());

    for endpoint in &config.providers {
        let manager = ConnectionManager::spawn(
            endpoint.id.clone(),
            config.connection.clone(),
            Arc::new(WebSocketConnector::new(endpoint.url.clone())),
            Arc::clone(&health),
        );

        tokio::spawn(log_events(manager.clone(), shutdown_token.clone()));

        if !config.symbols.is_empty() {
            let quote_router = Arc::clone(&router);
            let provider = endpoint.id.clone();
            manager
                .create_subscription(
                    SubscriptionType::MarketData,
                    config.symbols.clone(),
                    move |message| {
                        if let Some(price) = message.price() {
                            quote_router.update_quote(&provider, price)?;
                        }
                        Ok(())
                    },
                    None,
                )
                .await?;
        }

        if let Err(e) = manager.connect().await {
            tracing::error!(
                provider = %endpoint.id,
                code = e.code().reason(),
                error = %e,
                "Initial connect failed"
            );
        }
        managers.push(manager);
    }

    tracing::info!(providers = managers.len(), "Venue router ready");

    await_shutdown(shutdown_token).await;

    let shutdown = futures::future::join_all(managers.iter().map(|m| m.shutdown()));
    if tokio::time::timeout(SHUTDOWN_TIMEOUT, shutdown).await.is_err() {
        tracing::warn!("Connection shutdown timed out");
    }

    let stats = router.routing_statistics();
    tracing::info!(
        orders_routed = stats.orders_routed,
        split_orders = stats.split_orders,
        "Venue router stopped"
    );
    Ok(())
}

/// Log connection events for one provider until shutdown.
async fn log_events(manager: ConnectionManager, shutdown: CancellationToken) {
    let mut events = manager.events();
    let provider = manager.provider().to_string();
    loop {
        let event = tokio::select! {
            () = shutdown.cancelled() => return,
            event = events.recv() => event,
        };
        match event {
            Ok(ConnectionEvent::Connected) => {
                tracing::info!(provider = %provider, "Provider stream connected");
            }
            Ok(ConnectionEvent::Disconnected { code, reason }) => {
                tracing::warn!(provider = %provider, ?code, reason = %reason, "Provider stream disconnected");
            }
            Ok(ConnectionEvent::Reconnecting { attempt, delay }) => {
                tracing::info!(
                    provider = %provider,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    "Provider stream reconnecting"
                );
            }
            Ok(ConnectionEvent::MaxReconnectAttemptsReached { attempts }) => {
                tracing::error!(provider = %provider, attempts, "Provider stream gave up reconnecting");
            }
            Ok(ConnectionEvent::ProviderError { code, message, .. }) => {
                tracing::warn!(provider = %provider, ?code, message = %message, "Provider reported error");
            }
            Ok(event) => tracing::debug!(provider = %provider, ?event, "Connection event"),
            Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                tracing::warn!(provider = %provider, skipped, "Connection event log lagged");
            }
            Err(tokio::sync::broadcast::error::RecvError::Closed) => return,
        }
    }
}

/// Load .env file from current or ancestor directories.
fn load_dotenv() {
    if dotenvy::dotenv().is_err() {
        load_dotenv_from_ancestors();
    }
}

/// Load .env file from any ancestor directory.
fn load_dotenv_from_ancestors() {
    if let Ok(cwd) = std::env::current_dir() {
        let mut dir = cwd.as_path();
        while let Some(parent) = dir.parent() {
            let env_path = parent.join(".env");
            if env_path.exists() {
                let _ = dotenvy::from_path(&env_path);
                return;
            }
            dir = parent;
        }
    }
}

/// Log the parsed configuration.
fn log_config(config: &AppConfig) {
    tracing::info!(
        providers = config.providers.len(),
        symbols = config.symbols.len(),
        simulate_orders = config.simulate_orders,
        split_orders = config.router.enable_split_orders,
        max_split_providers = config.router.max_split_providers,
        "Configuration loaded"
    );
    for endpoint in &config.providers {
        tracing::debug!(provider = %endpoint.id, url = %endpoint.url, "Provider endpoint");
    }
}

/// Wait for shutdown signal (SIGTERM or SIGINT).
#[allow(clippy::expect_used)]
async fn await_shutdown(shutdown_token: CancellationToken) {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("signal handler installation is critical for graceful shutdown");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("SIGTERM handler installation is critical for graceful shutdown")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, initiating shutdown");
        }
    }

    shutdown_token.cancel();

    tracing::info!(
        timeout_secs = SHUTDOWN_TIMEOUT.as_secs(),
        "Graceful shutdown started"
    );
}
