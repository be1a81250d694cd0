use anyhow::Result;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

mod backend;
mod config;
mod dbus_interface;
mod engine;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    tracing::info!("facegated starting");

    let config = config::Config::from_env();
    tracing::info!(
        camera = %config.camera_device,
        backend = %config.backend_url,
        target = config.hysteresis.target,
        "configuration loaded"
    );

    let backend = Arc::new(backend::HttpBackend::new(
        &config.backend_url,
        config.request_timeout(),
    )?);
    let engine = engine::spawn_engine(&config, Arc::clone(&backend))?;

    let service = dbus_interface::CaptureService::new(engine, backend);
    let _conn = zbus::connection::Builder::session()?
        .name(dbus_interface::BUS_NAME)?
        .serve_at(dbus_interface::OBJECT_PATH, service)?
        .build()
        .await?;

    tracing::info!(name = dbus_interface::BUS_NAME, "facegated ready");

    tokio::signal::ctrl_c().await?;
    tracing::info!("facegated shutting down");

    Ok(())
}
