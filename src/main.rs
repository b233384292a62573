//! Smart Home Hub
//!
//! Room-based smart home control over MCP, with MQTT notifications and ADB
//! television remote.

use smart_home_hub::{adapters, api, bus, config, mcp, registry, router, store};

use anyhow::Result;
use axum::{routing::get, Router};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal;
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "smart_home_hub=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!(
        "Starting Smart Home Hub v{} ({})",
        env!("HUB_VERSION"),
        env!("HUB_GIT_SHA")
    );

    let config = config::load_config()?;
    tracing::info!(
        "Configuration loaded, port: {}, state dir: {}",
        config.port,
        config.state_dir.display()
    );

    let bus = bus::create_bus();

    let mqtt = Arc::new(adapters::mqtt::MqttAdapter::new(bus.clone()));
    if let Some(ref mqtt_config) = config.mqtt {
        mqtt.configure(
            mqtt_config.host.clone(),
            Some(mqtt_config.port),
            mqtt_config.username.clone(),
            mqtt_config.password.clone(),
            mqtt_config.topic_prefix.clone(),
        )
        .await;

        if let Err(e) = mqtt.start().await {
            tracing::warn!("Failed to start MQTT adapter: {}", e);
        } else {
            tracing::info!("MQTT adapter started for {}", mqtt_config.host);
        }
    } else {
        tracing::info!("MQTT not configured, notifications disabled");
    }

    let channels = Arc::new(adapters::adb::AdbChannelFactory::new(
        config.adb.host.clone(),
        config.adb.port,
    ));
    let store = Arc::new(store::StateStore::new(config.state_dir.clone()));
    let registry = Arc::new(registry::Registry::bootstrap(&store, channels.as_ref()).await);
    tracing::info!(
        "Registry ready with {} device(s)",
        registry.list_all().await.len()
    );

    let router = Arc::new(router::CommandRouter::new(
        registry,
        store,
        channels,
        bus.clone(),
    ));
    let state = api::AppState::new(router, mqtt.clone(), bus);

    let mcp_service = mcp::create_mcp_service(state.clone());

    let app = Router::new()
        .route("/status", get(api::status_handler))
        .route("/devices", get(api::devices_handler))
        .route("/devices/{room}/{name}", get(api::device_handler))
        .nest_service("/mcp", mcp_service)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive()),
        )
        .with_state(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    tracing::info!("Listening on http://{} (MCP at /mcp)", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Shutting down adapters...");
    mqtt.stop().await;
    tracing::info!("Shutdown complete");

    Ok(())
}

/// Wait for Ctrl+C or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("Received Ctrl+C, shutting down..."),
        _ = terminate => tracing::info!("Received SIGTERM, shutting down..."),
    }
}
