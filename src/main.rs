use std::sync::Arc;

use bakery_tracker::api;
use bakery_tracker::config::Config;
use bakery_tracker::error::AppError;
use bakery_tracker::providers::Providers;
use bakery_tracker::state::AppState;
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), AppError> {
    let config = Config::from_env()?;

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(config.log_level.clone()))
        .with_target(false)
        .compact()
        .init();

    let providers = Providers::from_settings(&config.providers)
        .map_err(|err| AppError::Internal(format!("failed to build http client: {err}")))?;

    let app_state = AppState::new(config.tracking, config.event_buffer_size, providers);
    let shared_state = Arc::new(app_state);

    let app = api::rest::router(shared_state.clone())
        .fallback_service(ServeDir::new(&config.static_dir))
        .layer(CorsLayer::permissive());

    let bind_addr = format!("0.0.0.0:{}", config.http_port);
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .map_err(|err| AppError::Internal(format!("failed to bind {bind_addr}: {err}")))?;

    tracing::info!(
        http_port = config.http_port,
        geocoder = %config.providers.geocoder_url,
        router = %config.providers.router_url,
        refresh_secs = config.tracking.route_refresh.as_secs(),
        "http server started"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|err| AppError::Internal(format!("server error: {err}")))?;

    shared_state.tracker.shutdown().await;
    tracing::info!("route refresh stopped");

    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "failed to listen for shutdown signal");
    }
}
