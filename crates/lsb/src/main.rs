use std::sync::Arc;

use lsb_core::config::Config;

#[tokio::main]
async fn main() -> Result<(), lsb_core::Error> {
    lsb_core::logging::init("lsb")?;

    let cfg = Arc::new(Config::load()?);
    tracing::info!(
        uploads = %cfg.uploads_dir.display(),
        throttle = cfg.throttle_enabled,
        "configuration loaded"
    );

    lsb_telegram::router::run(cfg)
        .await
        .map_err(|e| lsb_core::Error::External(format!("telegram bot failed: {e:#}")))?;

    Ok(())
}
