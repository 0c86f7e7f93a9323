//! wlr-screencopy frames into linux-dmabuf wire buffers.

use std::time::Duration;

use screencopy_core::{Capability, CaptureError, DmabufLayout};
use tracing::debug;
use wayland_client::protocol::{wl_buffer::WlBuffer, wl_output::WlOutput};
use wayland_client::Proxy;
use wayland_protocols::wp::linux_dmabuf::zv1::client::zwp_linux_buffer_params_v1;
use wayland_protocols::wp::linux_dmabuf::zv1::client::zwp_linux_dmabuf_v1::ZwpLinuxDmabufV1;
use wayland_protocols_wlr::screencopy::v1::client::zwlr_screencopy_frame_v1::ZwlrScreencopyFrameV1;
use wayland_protocols_wlr::screencopy::v1::client::zwlr_screencopy_manager_v1::ZwlrScreencopyManagerV1;

use super::connection::{WaylandCapabilities, WaylandConnection};
use crate::outputs::OutputRegistry;
use crate::protocol::{BufferSharing, FrameProtocol, FrameReport};

/// Per-cycle screencopy frame; destroyed when dropped.
pub struct ScreencopyFrame(ZwlrScreencopyFrameV1);

impl Drop for ScreencopyFrame {
    fn drop(&mut self) {
        self.0.destroy();
    }
}

/// DMA-BUF backed `wl_buffer`; destroyed when dropped.
pub struct WireBuffer(WlBuffer);

impl Drop for WireBuffer {
    fn drop(&mut self) {
        self.0.destroy();
    }
}

/// Bound screencopy + dmabuf managers on one connection.
pub struct ScreencopySession {
    screencopy: ZwlrScreencopyManagerV1,
    dmabuf: ZwpLinuxDmabufV1,
    connection: WaylandConnection,
}

impl ScreencopySession {
    pub fn new(connection: WaylandConnection, caps: WaylandCapabilities) -> Result<Self, CaptureError> {
        caps.require(true)?;
        let screencopy = caps.frame_copy.ok_or(CaptureError::MissingCapability(Capability::FrameCopy))?;
        let dmabuf = caps.buffer_sharing.ok_or(CaptureError::MissingCapability(Capability::BufferSharing))?;
        Ok(Self { screencopy, dmabuf, connection })
    }
}

impl Drop for ScreencopySession {
    fn drop(&mut self) {
        self.screencopy.destroy();
        self.dmabuf.destroy();
    }
}

impl FrameProtocol for ScreencopySession {
    type Output = WlOutput;
    type Frame = ScreencopyFrame;
    type Buffer = WireBuffer;

    fn capture_output(&mut self, output: &WlOutput) -> Result<ScreencopyFrame, CaptureError> {
        if !output.is_alive() {
            return Err(CaptureError::capture_failed("output was removed by the compositor"));
        }
        // One frame at a time; anything older is already destroyed.
        self.connection.state.frames.clear();
        let frame = self.screencopy.capture_output(0, output, self.connection.handle(), ());
        self.connection.state.frames.insert(frame.id(), FrameReport::default());
        Ok(ScreencopyFrame(frame))
    }

    fn copy(&mut self, frame: &ScreencopyFrame, buffer: &WireBuffer) {
        frame.0.copy(&buffer.0);
    }

    fn roundtrip(&mut self) -> Result<(), CaptureError> {
        self.connection.roundtrip()
    }

    fn dispatch_blocking(&mut self, timeout: Duration) -> Result<(), CaptureError> {
        self.connection.dispatch_blocking(timeout)
    }

    fn report(&self, frame: &ScreencopyFrame) -> FrameReport {
        self.connection.state.frames.get(&frame.0.id()).copied().unwrap_or_default()
    }

    fn take_outputs(&mut self) -> Option<OutputRegistry<WlOutput>> {
        self.connection.take_outputs()
    }
}

impl BufferSharing for ScreencopySession {
    fn import_dmabuf(&mut self, layout: &DmabufLayout<'_>) -> Result<WireBuffer, CaptureError> {
        let descriptor = layout.descriptor;
        let width = i32::try_from(descriptor.width)
            .map_err(|_| CaptureError::allocation_failed(format!("width {} out of range", descriptor.width)))?;
        let height = i32::try_from(descriptor.height)
            .map_err(|_| CaptureError::allocation_failed(format!("height {} out of range", descriptor.height)))?;

        let qh = self.connection.handle();
        let params = self.dmabuf.create_params(qh, ());
        params.add(layout.fd, 0, layout.offset, layout.stride, layout.modifier_hi(), layout.modifier_lo());
        let buffer = params.create_immed(
            width,
            height,
            descriptor.format.code(),
            zwp_linux_buffer_params_v1::Flags::empty(),
            qh,
            (),
        );
        params.destroy();
        debug!("Created wl_buffer for {} (stride {}, modifier {:#x})", descriptor, layout.stride, layout.modifier);
        Ok(WireBuffer(buffer))
    }
}
