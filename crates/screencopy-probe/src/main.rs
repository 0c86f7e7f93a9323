//! screencopy-probe: capture one Wayland output without a renderer.
//!
//! Lists the compositor's outputs, captures the configured one (or the first)
//! at the configured rate through the zero-copy engine, and logs live
//! statistics until Ctrl-C or `SCREENCOPY_DURATION_SECS`.
//!
//! # Configuration
//!
//! | Variable | Meaning | Default |
//! |----------|---------|---------|
//! | `SCREENCOPY_CONFIG` | JSON file with the keys below | unset |
//! | `SCREENCOPY_OUTPUT` | Output name, e.g. `DP-1` | first output |
//! | `SCREENCOPY_GBM_DEVICE` | DRM render node | `/dev/dri/renderD128` |
//! | `SCREENCOPY_WL_DISPLAY` | Socket name or absolute path | `$WAYLAND_DISPLAY` |
//! | `SCREENCOPY_FPS` | Capture rate | 60 |
//! | `SCREENCOPY_DURATION_SECS` | Stop after N seconds | unlimited |

#[cfg(target_os = "linux")]
mod headless;
#[cfg(target_os = "linux")]
mod monitor;

use anyhow::Result;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(true)
        .init();

    info!("screencopy-probe v{}", env!("CARGO_PKG_VERSION"));

    run().await
}

#[cfg(target_os = "linux")]
impl monitor::StatsSource for screencopy_capture::wayland::WaylandEngine<headless::HeadlessTexture> {
    fn stats(&self) -> screencopy_core::CaptureStats {
        screencopy_capture::ScreencopyEngine::stats(self)
    }

    fn is_running(&self) -> bool {
        screencopy_capture::ScreencopyEngine::is_running(self)
    }

    fn frame_size(&self) -> (u32, u32) {
        screencopy_capture::ScreencopyEngine::frame_size(self)
    }
}

#[cfg(target_os = "linux")]
async fn run() -> Result<()> {
    use std::sync::Arc;
    use std::time::Duration;

    use anyhow::Context;
    use screencopy_capture::wayland;
    use screencopy_core::CaptureConfig;
    use tracing::warn;

    use crate::headless::HeadlessContext;

    let config = CaptureConfig::load().context("Failed to load SCREENCOPY_CONFIG")?;
    info!("Capturing at {} fps (interval {:?})", config.fps, config.frame_interval());

    let graphics = Arc::new(HeadlessContext::default());
    let engine = wayland::create(&config.settings, config.frame_interval(), graphics.clone())
        .context("Failed to start capture engine")?;

    let outputs = engine.list_outputs();
    for output in &outputs {
        info!("  {}", output.label());
    }
    if engine.target().is_none() {
        let first = outputs.first().context("Compositor advertised no outputs")?;
        if config.settings.output_name().is_some() {
            warn!("Configured output not found, falling back to {}", first.name);
        }
        engine.update_target(&first.name)?;
    }

    let reason = monitor::run(&engine, config.duration_secs.map(Duration::from_secs)).await;
    info!("Stopping ({:?})", reason);

    if let Some(desc) = engine.with_current_frame(|f| f.descriptor) {
        info!("Last frame: {}", desc);
    }
    let stats = engine.stats();
    tokio::task::spawn_blocking(move || engine.destroy())
        .await
        .context("Capture engine shutdown panicked")?;

    info!("Final stats: {}", serde_json::to_string(&stats)?);
    if graphics.live_textures() != 0 {
        warn!("{} textures still imported after shutdown", graphics.live_textures());
    }
    Ok(())
}

#[cfg(not(target_os = "linux"))]
async fn run() -> Result<()> {
    anyhow::bail!("screencopy-probe requires Linux with a wlroots-based compositor")
}
