//! screencopy-capture: zero-copy capture of one Wayland output.
//!
//! # Components
//!
//! | Module | Role |
//! |--------|------|
//! | [`outputs`] | Output discovery results, lookup by name |
//! | [`capabilities`] | Frame-copy / buffer-sharing presence check |
//! | [`buffer`] | GPU backing store + wire buffer, recreated together |
//! | [`exchange`] | One capture/copy transaction as request/response |
//! | `capture_loop` | Paced background thread |
//! | [`engine`] | Public handle: retarget, current frame, teardown |
//! | `wayland` | wlr-screencopy + linux-dmabuf + GBM backend (Linux) |
//!
//! # Usage
//!
//! ```rust,ignore
//! use screencopy_capture::wayland;
//! use screencopy_core::SourceSettings;
//!
//! let settings = SourceSettings::from_env();
//! let engine = wayland::create(&settings, Duration::from_nanos(16_666_667), graphics)?;
//! for out in engine.list_outputs() {
//!     println!("{}", out.label());
//! }
//! // inside the renderer's graphics context:
//! if let Some(frame) = engine.current_frame() {
//!     // draw frame.texture at frame.width × frame.height in frame.color_space
//! }
//! engine.destroy();
//! ```
//!
//! # Architecture
//!
//! ```text
//! controlling thread                      capture thread
//! ──────────────────                      ──────────────
//! wayland::create ── connect + discover ──► CaptureLoop::run
//!                                              │
//! update_target ──► pause ─┐                   ├─ FrameExchange::request ──► roundtrip
//!                          │ Mutex<State>      ├─ GpuBufferAllocator::ensure (GBM → wl_buffer)
//! current_frame ◄──────────┤ + Condvar         │     └─ texture import (graphics scope)
//!                          │                   ├─ FrameExchange::copy_into ──► roundtrip, poll(fd)
//! list_outputs ◄───────────┤                   ├─ publish rebuilt OutputRegistry
//! destroy ──► stop + join ─┘                   └─ FramePacer: sleep 90% of remainder
//! ```

pub mod buffer;
pub mod capabilities;
mod capture_loop;
pub mod engine;
pub mod exchange;
pub mod outputs;
pub mod pacing;
pub mod protocol;
mod state;

#[cfg(all(target_os = "linux", feature = "wayland"))]
pub mod wayland;

#[cfg(test)]
mod mock;

pub use buffer::{BufferChange, GpuBuffer, GpuBufferAllocator};
pub use capabilities::Capabilities;
pub use capture_loop::IDLE_POLL;
pub use engine::ScreencopyEngine;
pub use exchange::{CompletedFrame, ExchangeState, FrameExchange};
pub use outputs::{AdvertisedOutput, OutputDescriptor, OutputRegistry};
pub use pacing::{FramePacer, Pacing};
pub use protocol::{
    BufferDevice, BufferSharing, DmabufSource, FrameProtocol, FrameReport, FrameStatus, GraphicsContext,
    GraphicsScope,
};
pub use state::{CurrentFrame, RenderFrame};
