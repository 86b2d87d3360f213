use std::sync::Arc;

use axum::http::HeaderValue;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use newswire_core::broadcast::Broadcaster;
use newswire_db::{DatabaseConfig, PgStore};
use newswire_mq::{RedisBus, RedisConfig, RedisQueue};
use newswire_server::routes;
use newswire_server::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("newswire=info".parse()?))
        .with_target(false)
        .init();

    let port = std::env::var("API_PORT").unwrap_or_else(|_| "8000".to_string());
    let addr = format!("0.0.0.0:{port}");

    let store = PgStore::connect(&DatabaseConfig::from_env()?).await?;
    store.migrate().await?;

    let redis = RedisConfig::from_env()?;
    let queue = RedisQueue::new(&redis.url)?;
    let bus = RedisBus::new(&redis.url)?;
    let broadcaster = Broadcaster::new();

    // Bridge the bus into the per-connection registries: one Redis
    // subscription per process, fanned out locally.
    let cancel = CancellationToken::new();
    let listener_task = tokio::spawn(bus.clone().listen(cancel.clone()));
    tokio::spawn(broadcaster.clone().forward(bus.subscribe()));

    let state = Arc::new(AppState::new(store, queue, bus, broadcaster));

    let cors = match std::env::var("CORS_ORIGIN") {
        Ok(origin) if origin == "*" => CorsLayer::permissive(),
        Ok(origin) => {
            let origins: Vec<HeaderValue> = origin
                .split(',')
                .filter_map(|o| o.trim().parse().ok())
                .collect();
            CorsLayer::new().allow_origin(AllowOrigin::list(origins))
        }
        Err(_) => CorsLayer::new(),
    };

    let app = routes::router(state)
        .layer(TraceLayer::new_for_http())
        .layer(cors);

    tracing::info!("Starting server on {addr}");
    let listener = TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    cancel.cancel();
    match listener_task.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => tracing::warn!(error = %e, "Bus listener exited with an error"),
        Err(e) => tracing::warn!(error = %e, "Bus listener did not shut down cleanly"),
    }

    Ok(())
}

async fn shutdown_signal() {
    tokio::signal::ctrl_c()
        .await
        .expect("Failed to install CTRL+C handler");
    tracing::info!("Shutdown signal received");
}
