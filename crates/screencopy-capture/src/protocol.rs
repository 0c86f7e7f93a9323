//! Seams between the capture engine and its external collaborators.
//!
//! The engine only talks to the compositor, the GPU allocator and the
//! renderer through these traits. The Wayland/GBM backend implements the
//! first three; the host's renderer implements [`GraphicsContext`].

use std::time::Duration;

use screencopy_core::{CaptureError, ColorFormat, DmabufLayout, FrameDescriptor};

use crate::outputs::OutputRegistry;

// ── Frame-copy protocol ───────────────────────────────────────────────────────

/// Terminal status of the per-cycle protocol object, as far as it is known.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FrameStatus {
    #[default]
    Pending,
    /// Copy complete; `timestamp` is the compositor's presentation time.
    Ready { timestamp: Duration },
    Failed,
}

/// Events the compositor has delivered for the current frame so far.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FrameReport {
    /// Last reported DMA-BUF format; earlier reports are superseded.
    pub descriptor: Option<FrameDescriptor>,
    pub status: FrameStatus,
}

/// Compositor frame-copy capability bound to one connection.
///
/// Events are only delivered inside [`roundtrip`](Self::roundtrip) and
/// [`dispatch_blocking`](Self::dispatch_blocking); the frame handle is
/// released when it is dropped.
pub trait FrameProtocol {
    /// Compositor output handle.
    type Output;
    /// Per-cycle frame object. Dropping it releases it on the wire.
    type Frame;
    /// Protocol-visible buffer the compositor copies into.
    type Buffer;

    /// Ask the compositor to capture `output`.
    fn capture_output(&mut self, output: &Self::Output) -> Result<Self::Frame, CaptureError>;

    /// Submit `buffer` as the copy destination for `frame`.
    fn copy(&mut self, frame: &Self::Frame, buffer: &Self::Buffer);

    /// Flush requests and dispatch every event they produced.
    ///
    /// An error means the connection is gone and is fatal to the loop.
    fn roundtrip(&mut self) -> Result<(), CaptureError>;

    /// Block until the compositor sends something or `timeout` passes, then
    /// dispatch whatever arrived. Returning without new events is not an error.
    fn dispatch_blocking(&mut self, timeout: Duration) -> Result<(), CaptureError>;

    /// Events received for `frame` up to the last dispatch.
    fn report(&self, frame: &Self::Frame) -> FrameReport;

    /// The output listing, rebuilt, if the compositor added or removed
    /// outputs since the last call.
    fn take_outputs(&mut self) -> Option<OutputRegistry<Self::Output>>;
}

/// Compositor buffer-sharing capability: wraps a DMA-BUF as a wire buffer.
pub trait BufferSharing: FrameProtocol {
    fn import_dmabuf(&mut self, layout: &DmabufLayout<'_>) -> Result<Self::Buffer, CaptureError>;
}

// ── GPU allocation ────────────────────────────────────────────────────────────

/// Backing store that can be exported as a single-plane DMA-BUF.
pub trait DmabufSource {
    fn layout(&self) -> DmabufLayout<'_>;
}

/// GPU buffer allocator (GBM device in production).
pub trait BufferDevice {
    type Allocation: DmabufSource;

    fn allocate(&mut self, descriptor: &FrameDescriptor) -> Result<Self::Allocation, CaptureError>;
}

// ── Renderer ──────────────────────────────────────────────────────────────────

/// The rendering consumer's graphics context.
///
/// Textures may only be created or destroyed while a [`Scope`] is alive;
/// dropping the scope leaves the context.
///
/// [`Scope`]: GraphicsContext::Scope
pub trait GraphicsContext: Send + Sync + 'static {
    type Texture: Send + 'static;
    type Scope<'a>: GraphicsScope<Texture = Self::Texture>
    where
        Self: 'a;

    /// Acquire exclusive access to the context.
    fn enter(&self) -> Self::Scope<'_>;
}

/// Texture operations available inside an entered graphics context.
pub trait GraphicsScope {
    type Texture;

    fn import_dmabuf(
        &mut self,
        layout: &DmabufLayout<'_>,
        format: ColorFormat,
    ) -> Result<Self::Texture, CaptureError>;

    fn destroy_texture(&mut self, texture: Self::Texture);
}
