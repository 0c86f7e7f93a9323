//! Wayland + GBM backend.
//!
//! | Seam | Implementation |
//! |------|----------------|
//! | [`FrameProtocol`](crate::FrameProtocol) | `zwlr_screencopy_manager_v1` |
//! | [`BufferSharing`](crate::BufferSharing) | `zwp_linux_dmabuf_v1` |
//! | [`BufferDevice`](crate::BufferDevice) | GBM on a DRM render node |

mod connection;
mod gbm;
mod screencopy;

use std::sync::Arc;
use std::time::Duration;

use screencopy_core::{CaptureError, SourceSettings};
use tracing::warn;
pub use wayland_client::protocol::wl_output::WlOutput;

pub use self::connection::{SessionState, WaylandCapabilities, WaylandConnection};
pub use self::gbm::{GbmAllocator, GbmBackingStore};
pub use self::screencopy::{ScreencopyFrame, ScreencopySession, WireBuffer};
use crate::engine::ScreencopyEngine;
use crate::protocol::GraphicsContext;

/// Engine type produced by [`create`].
pub type WaylandEngine<T> = ScreencopyEngine<WlOutput, T>;

/// Open the GPU device, connect, discover, and start capturing.
///
/// Fails outright on connection or capability errors. An unknown target
/// output is only logged: the engine starts idle and can be retargeted.
pub fn create<G>(
    settings: &SourceSettings,
    frame_interval: Duration,
    graphics: Arc<G>,
) -> Result<WaylandEngine<G::Texture>, CaptureError>
where
    G: GraphicsContext,
{
    let device = GbmAllocator::open(settings.gbm_device_path())?;

    let mut connection = WaylandConnection::connect(settings.wl_display())?;
    let (caps, outputs) = connection.discover()?;
    let session = ScreencopySession::new(connection, caps)?;

    let engine = ScreencopyEngine::start(session, device, graphics, outputs, frame_interval)?;
    if let Some(name) = settings.output_name() {
        if let Err(e) = engine.update_target(name) {
            warn!("Output[{}] not selected: {}", name, e);
        }
    }
    Ok(engine)
}
