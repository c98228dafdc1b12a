//! Edge Controller entry point.

use std::sync::Arc;

use bess_bus::local::LocalBus;
use bess_buffer::DurableBuffer;
use bess_edge::bms::SimulatedBmsAdapter;
use bess_edge::{EdgeConfig, EdgeController};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("bess-edge v{}", env!("CARGO_PKG_VERSION"));

    let config_path = std::env::var("CONFIG_PATH").unwrap_or_else(|_| "/etc/bess/edge.json".into());
    let config = EdgeConfig::load(&config_path).unwrap_or_else(|_| {
        tracing::warn!("config not found at {}, using defaults", config_path);
        EdgeConfig::default()
    });

    let buffer = Arc::new(DurableBuffer::open(
        std::path::Path::new(&config.runtime.buffer_path),
        bess_buffer::DEFAULT_CAPACITY,
    )?);

    // The real deployment target is `bess_bus::mqtt::MqttBus`; a
    // `LocalBus` stands in here so the binary runs end to end without a
    // broker present, matching how the teacher's edge exercised its
    // local API server against an in-process config.
    let bus = Arc::new(LocalBus::new());
    let bms = Arc::new(SimulatedBmsAdapter::new(config.system_id, 50.0));

    let controller = Arc::new(EdgeController::new(config.clone(), bms, bus.clone(), buffer));

    let api_controller = controller.clone();
    let api_addr = config.local_api_addr.clone();
    let api_handle = tokio::spawn(async move {
        if let Err(e) = bess_edge::api::start_server(&api_addr, api_controller).await {
            tracing::error!(error = %e, "local api server exited");
        }
    });

    let run_handle = tokio::spawn(async move {
        if let Err(e) = controller.run(bus).await {
            tracing::error!(error = %e, "control loop exited");
        }
    });

    tokio::select! {
        _ = api_handle => {},
        _ = run_handle => {},
    }

    Ok(())
}
