//! Cloud Coordinator entry point.

use std::sync::Arc;

use bess_bus::local::LocalBus;
use bess_cloud::config::CloudConfig;
use bess_cloud::ingest::TelemetryIngester;
use bess_cloud::middleware::rate_limit::{RateLimitConfig, RateLimiter};
use bess_cloud::provisioning::ProvisioningHandler;
use bess_cloud::store::MemStore;
use bess_cloud::telemetry_store::MemTelemetryStore;
use bess_cloud::{build_router, ApiState};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into())))
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("bess-cloud v{}", env!("CARGO_PKG_VERSION"));

    let config_path = std::env::var("CONFIG_PATH").unwrap_or_else(|_| "/etc/bess/cloud.json".into());
    let config = CloudConfig::load(&config_path).unwrap_or_else(|_| {
        tracing::warn!("config not found at {}, using defaults", config_path);
        CloudConfig::default()
    });

    // The real deployment target runs `PgStore`/`PgTelemetryStore`
    // against `config.database_url`; the in-memory stores stand in here
    // so the binary runs end to end without a live Postgres instance
    // present, matching `bess-edge`'s habit of defaulting to `LocalBus`
    // over a real broker.
    let store = Arc::new(MemStore::new());
    let telemetry = Arc::new(MemTelemetryStore::new());
    let bus = Arc::new(LocalBus::new());

    let provisioning = ProvisioningHandler::new(store.clone(), bus.clone(), bus.clone());
    let ingester = TelemetryIngester::new(store.clone(), telemetry.clone(), bus.clone());

    let provisioning_handle = tokio::spawn(async move {
        if let Err(e) = provisioning.run().await {
            tracing::error!(error = %e, "provisioning handler exited");
        }
    });
    let ingest_handle = tokio::spawn(async move {
        if let Err(e) = ingester.run().await {
            tracing::error!(error = %e, "telemetry ingester exited");
        }
    });

    let state = ApiState {
        store,
        telemetry,
        bus,
        jwt_secret: config.jwt_secret.clone(),
        operator_username: std::env::var("BESS_OPERATOR_USERNAME").unwrap_or_else(|_| "operator".into()),
        operator_password: std::env::var("BESS_OPERATOR_PASSWORD").unwrap_or_else(|_| "change-me".into()),
        rate_limiter: RateLimiter::new(RateLimitConfig { requests_per_second: config.rate_limit_per_second, burst: config.rate_limit_burst }),
    };
    let router = build_router(state);

    let listener = tokio::net::TcpListener::bind(&config.http_addr).await?;
    tracing::info!(addr = %config.http_addr, "cloud coordinator listening");
    let server_handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, router.into_make_service_with_connect_info::<std::net::SocketAddr>()).await {
            tracing::error!(error = %e, "http server exited");
        }
    });

    tokio::select! {
        _ = provisioning_handle => {},
        _ = ingest_handle => {},
        _ = server_handle => {},
    }

    Ok(())
}
