//! Emitterscope - Filtered views over wireless emitter observations.
//!
//! # API Endpoints
//!
//! - `GET /api/v2/networks/filtered` - One page of matching emitters
//! - `GET /api/v2/networks/filtered/count` - Number of matching emitters
//! - `GET /api/v2/networks/filtered/geospatial` - Located observations as GeoJSON
//! - `GET /api/v2/networks/filtered/observations` - Raw sightings of selected emitters
//! - `GET /api/v2/networks/filtered/analytics` - Analytics bundle
//! - `GET /api/v2/threats/severity-counts` - Emitters per threat level
//! - `GET /api/dashboard-metrics` - Dashboard tiles
//! - `GET /health` - Health check

use std::net::SocketAddr;

use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use emitterscope::api::{AppState, create_router};
use emitterscope::config::Config;
use emitterscope::storage::Storage;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing with environment filter
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env().add_directive("emitterscope=info".parse()?))
        .init();

    let config = Config::from_env();

    info!(
        port = config.port,
        db_url = %config.database_url,
        max_connections = config.max_connections,
        analytics_timeout_ms = config.analytics_timeout.as_millis() as u64,
        render_budget = config.render_budget,
        "Starting emitterscope server"
    );

    let storage = Storage::connect(
        &config.database_url,
        config.max_connections,
        config.analytics_timeout,
    )
    .await?;
    info!("Database initialized");

    let state = AppState {
        storage,
        render_budget: config.render_budget,
    };
    let app = create_router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let listener = TcpListener::bind(addr).await?;

    info!(%addr, "Emitterscope is listening");

    axum::serve(listener, app).await?;

    Ok(())
}
