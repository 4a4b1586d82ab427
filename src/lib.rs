//! AVCapturingAndPlayer - capture photos and videos, browse and play them back.
//!
//! This is the main library crate. It provides the capture session
//! controller, the capture backends it drives, local media storage and the
//! playback queue used by the video player.

pub mod capture;
pub mod config;
pub mod playback;
pub mod session;
pub mod storage;
pub mod utils;

use anyhow::Context;
use config::AppConfig;
use session::CaptureSessionController;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use utils::AppResult;

/// Install the global tracing subscriber.
///
/// `RUST_LOG` wins over `default_filter` when set.
pub fn init_logging(default_filter: &str) {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Controller wired to the configured backend and media directory
pub fn build_controller(config: &AppConfig) -> AppResult<CaptureSessionController> {
    config.validate()?;
    let backend = config.backend()?;
    tracing::debug!("Using {} capture backend", backend.name());
    Ok(CaptureSessionController::new(
        backend,
        config.media_store(),
        config.capture_options(),
    ))
}

/// Initialize the application, prepare the camera and report stored media
pub async fn run() -> anyhow::Result<()> {
    let config = AppConfig::load().context("failed to load configuration")?;
    init_logging(&config.log_filter);

    tracing::info!("Starting AVCapturingAndPlayer v{}", env!("CARGO_PKG_VERSION"));

    let controller = build_controller(&config)?;
    controller
        .prepare()
        .await
        .context("failed to prepare capture session")?;

    if let Some(snapshot) = controller.snapshot() {
        tracing::info!(
            "Session {} running with {} inputs, camera {:?}",
            snapshot.id,
            snapshot.inputs.len(),
            snapshot.camera_position
        );
    }

    let store = controller.store();
    let files = store.list_all()?;
    tracing::info!("{} stored files in {:?}", files.len(), store.root());
    for path in &files {
        tracing::info!("  {:?} ({:?})", path.file_name().unwrap_or_default(), store.kind_of(path));
    }

    controller.shutdown();
    Ok(())
}
