//! Main entry point for the Unified Image Generation Gateway

use image_unigate::{api, config::Settings, AppState};
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    // Initialize logging
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().json())
        .init();

    info!("Starting Unified Image Generation Gateway");

    // Load and validate configuration
    let settings = Settings::load()?;
    settings.validate()?;
    info!(
        "Loaded configuration: server={}:{} providers={}",
        settings.server.host,
        settings.server.port,
        settings.providers.len()
    );

    let addr = format!("{}:{}", settings.server.host, settings.server.port);

    // Build application state: registry, credential pool, orchestrator
    let app_state = AppState::from_settings(settings)?;

    for adapter in app_state.registry.all() {
        let (total, _, _) = app_state.pool.health_summary(adapter.name());
        info!(
            provider = %adapter.name(),
            asynchronous = adapter.descriptor().asynchronous,
            pooled_credentials = total,
            "Registered provider"
        );
    }

    // Build the router
    let app = api::routes::create_router(app_state);

    info!("Server listening on {}", addr);

    // Start the server
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
