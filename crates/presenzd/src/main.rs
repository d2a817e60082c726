use anyhow::Result;
use presenz_core::types::RecognitionParams;
use presenz_core::OnnxFaceEncoder;
use presenz_store::{SealingKey, Store};
use tracing_subscriber::EnvFilter;

mod config;
mod dbus_interface;
mod engine;
mod gate;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    tracing::info!("presenzd starting");
    let cfg = config::Config::from_env();

    let key = SealingKey::load_or_generate(&cfg.key_path)?;
    tracing::info!(fingerprint = %key.fingerprint(), "sealing key loaded");

    let store = Store::open(&cfg.db_path, key).await?;
    tracing::info!(path = %cfg.db_path.display(), "attendance database opened");

    // Fail fast if either model file is missing.
    let encoder = OnnxFaceEncoder::load(
        &cfg.detector_model_path(),
        &cfg.embedder_model_path(),
        cfg.liveness_enabled,
    )?;
    let engine = engine::spawn_engine(Box::new(encoder));

    let service = dbus_interface::AttendanceService::new(
        engine,
        store,
        RecognitionParams {
            tolerance: cfg.tolerance,
        },
        chrono::Duration::seconds(cfg.min_gap_secs as i64),
        std::time::Duration::from_secs(cfg.recognize_timeout_secs),
    );

    let _conn = zbus::connection::Builder::system()?
        .name("org.presenz.Attendance1")?
        .serve_at("/org/presenz/Attendance1", service)?
        .build()
        .await?;

    tracing::info!("presenzd ready");

    tokio::signal::ctrl_c().await?;
    tracing::info!("presenzd shutting down");

    Ok(())
}
