use axum::routing::get;
use axum::Router;
use log::info;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use fiskalserver::billing::stripe::StripeClient;
use fiskalserver::config::AppConfig;
use fiskalserver::shared::state::AppState;
use fiskalserver::shared::utils::create_pool;
use fiskalserver::{billing, clients, devices, tenancy, tickets};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init_from_env(env_logger::Env::default().default_filter_or("info"));

    let config = AppConfig::load()?;
    let pool = create_pool(&config.database.url, config.database.max_connections)?;
    let stripe = StripeClient::new(
        config.stripe.secret_key.clone(),
        config.stripe.webhook_secret.clone(),
    );

    let state = Arc::new(AppState {
        conn: pool,
        config: config.clone(),
        stripe,
    });

    let app = Router::new()
        .merge(tickets::configure_tickets_routes())
        .merge(devices::configure_devices_routes())
        .merge(clients::configure_clients_routes())
        .merge(billing::configure_billing_routes())
        .merge(tenancy::configure_tenancy_routes())
        .route("/health", get(health_check))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state);

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;
    info!("listening on {addr}");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn health_check() -> &'static str {
    "ok"
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    info!("shutdown signal received, stopping server");
}
