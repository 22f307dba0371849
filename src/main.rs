//! ride-dispatch server entry point.
//!
//! Starts the Axum HTTP server with REST and WebSocket endpoints, the
//! deadline timer loop and, when enabled, the Postgres event-log writer.

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::routing::get;
use sqlx::postgres::PgPoolOptions;
use tower_http::cors::CorsLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use ride_dispatch::api;
use ride_dispatch::app_state::AppState;
use ride_dispatch::config::DispatchConfig;
use ride_dispatch::domain::{EventBus, SharedClock, SystemClock};
use ride_dispatch::persistence::{PostgresPersistence, spawn_event_log_writer};
use ride_dispatch::service::DispatchService;
use ride_dispatch::ws::handler::ws_handler;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // Load configuration
    let config = DispatchConfig::from_env().map_err(|e| anyhow::anyhow!("configuration: {e}"))?;
    tracing::info!(addr = %config.listen_addr, "starting ride-dispatch");

    // Build domain and service layer
    let event_bus = EventBus::new(config.event_bus_capacity);
    let clock: SharedClock = Arc::new(SystemClock);
    let dispatch = Arc::new(DispatchService::new(
        config.dispatch.clone(),
        event_bus.clone(),
        clock,
    ));
    tokio::spawn(Arc::clone(&dispatch).run_timer_loop());

    // Durable event log
    let persistence = if config.persistence_enabled {
        let pool = PgPoolOptions::new()
            .max_connections(config.database_max_connections)
            .min_connections(config.database_min_connections)
            .acquire_timeout(Duration::from_secs(config.database_connect_timeout_secs))
            .connect(&config.database_url)
            .await?;
        let persistence = PostgresPersistence::new(pool);
        persistence.ensure_schema().await?;
        spawn_event_log_writer(&event_bus, persistence.clone());
        tracing::info!("event log persistence enabled");
        Some(persistence)
    } else {
        tracing::info!("event log persistence disabled");
        None
    };

    // Build application state
    let app_state = AppState::new(dispatch, persistence);

    // Build router
    let app = Router::new()
        .merge(api::build_router())
        .route("/ws", get(ws_handler));
    #[cfg(feature = "swagger-ui")]
    let app = {
        use utoipa::OpenApi;
        use utoipa_swagger_ui::SwaggerUi;
        app.merge(
            SwaggerUi::new("/swagger-ui")
                .url("/api-docs/openapi.json", api::openapi::ApiDoc::openapi()),
        )
    };
    let app = app
        .layer(TimeoutLayer::new(REQUEST_TIMEOUT))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(app_state);

    // Start server
    let listener = tokio::net::TcpListener::bind(config.listen_addr).await?;
    tracing::info!(addr = %config.listen_addr, "server listening");

    axum::serve(listener, app).await?;

    Ok(())
}
