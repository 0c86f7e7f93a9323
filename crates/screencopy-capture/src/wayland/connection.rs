//! Compositor connection, registry binding and event dispatch.

use std::collections::HashMap;
use std::io::ErrorKind;
use std::os::fd::{AsFd, AsRawFd};
use std::os::unix::net::UnixStream;
use std::path::{Path, PathBuf};
use std::time::Duration;

use screencopy_core::{CaptureError, FourCc, FrameDescriptor};
use tracing::{debug, info, trace, warn};
use wayland_client::backend::{ObjectId, WaylandError};
use wayland_client::protocol::{wl_buffer, wl_output, wl_registry};
use wayland_client::{delegate_noop, Connection, Dispatch, EventQueue, Proxy, QueueHandle};
use wayland_protocols::wp::linux_dmabuf::zv1::client::{zwp_linux_buffer_params_v1, zwp_linux_dmabuf_v1};
use wayland_protocols_wlr::screencopy::v1::client::{zwlr_screencopy_frame_v1, zwlr_screencopy_manager_v1};

use crate::capabilities::Capabilities;
use crate::outputs::{AdvertisedOutput, OutputRegistry};
use crate::protocol::{FrameReport, FrameStatus};

use zwlr_screencopy_frame_v1::ZwlrScreencopyFrameV1;
use zwlr_screencopy_manager_v1::ZwlrScreencopyManagerV1;
use zwp_linux_dmabuf_v1::ZwpLinuxDmabufV1;

pub type WaylandCapabilities = Capabilities<ZwlrScreencopyManagerV1, ZwpLinuxDmabufV1>;

/// Event sink for the capture queue.
#[derive(Default)]
pub struct SessionState {
    outputs: Vec<AdvertisedOutput<wl_output::WlOutput>>,
    /// An output was added, removed or finished describing itself.
    outputs_changed: bool,
    screencopy: Option<ZwlrScreencopyManagerV1>,
    dmabuf: Option<ZwpLinuxDmabufV1>,
    /// Events received per live screencopy frame.
    pub(super) frames: HashMap<ObjectId, FrameReport>,
}

/// One compositor connection and its event queue.
pub struct WaylandConnection {
    conn: Connection,
    queue: EventQueue<SessionState>,
    qh: QueueHandle<SessionState>,
    pub(super) state: SessionState,
}

impl WaylandConnection {
    /// Connect to `display` (socket name or absolute path), or to
    /// `WAYLAND_DISPLAY` when `None`.
    pub fn connect(display: Option<&str>) -> Result<Self, CaptureError> {
        let conn = match display {
            None => Connection::connect_to_env().map_err(|e| CaptureError::connect_failed(e.to_string()))?,
            Some(display) => {
                let path = socket_path(display)?;
                let stream = UnixStream::connect(&path)
                    .map_err(|e| CaptureError::connect_failed(format!("{}: {e}", path.display())))?;
                Connection::from_socket(stream).map_err(|e| CaptureError::connect_failed(e.to_string()))?
            }
        };
        let queue = conn.new_event_queue();
        let qh = queue.handle();
        let display_name = display.unwrap_or("$WAYLAND_DISPLAY");
        info!("Connected to Wayland display {}", display_name);
        Ok(Self { conn, queue, qh, state: SessionState::default() })
    }

    pub fn handle(&self) -> &QueueHandle<SessionState> {
        &self.qh
    }

    /// Flush and dispatch until the compositor has answered every request.
    pub fn roundtrip(&mut self) -> Result<(), CaptureError> {
        self.queue
            .roundtrip(&mut self.state)
            .map(|_| ())
            .map_err(|e| CaptureError::connection_lost(e.to_string()))
    }

    /// Flush, wait up to `timeout` for the socket to become readable, and
    /// dispatch whatever was read.
    pub fn dispatch_blocking(&mut self, timeout: Duration) -> Result<(), CaptureError> {
        self.conn.flush().map_err(|e| CaptureError::connection_lost(e.to_string()))?;

        // Another reader may already hold the socket; then only dispatch.
        if let Some(guard) = self.queue.prepare_read() {
            let mut pollfd = libc::pollfd { fd: self.conn.as_fd().as_raw_fd(), events: libc::POLLIN, revents: 0 };
            let millis = libc::c_int::try_from(timeout.as_micros().div_ceil(1000)).unwrap_or(libc::c_int::MAX);
            // SAFETY: one initialised pollfd that outlives the call.
            let polled = unsafe { libc::poll(&mut pollfd, 1, millis) };
            if polled > 0 {
                match guard.read() {
                    Ok(_) => {}
                    Err(WaylandError::Io(e)) if e.kind() == ErrorKind::WouldBlock => {}
                    Err(e) => return Err(CaptureError::connection_lost(e.to_string())),
                }
            } else if polled < 0 {
                let err = std::io::Error::last_os_error();
                if err.kind() != ErrorKind::Interrupted {
                    return Err(CaptureError::connection_lost(format!("poll: {err}")));
                }
            }
        }

        self.queue
            .dispatch_pending(&mut self.state)
            .map(|_| ())
            .map_err(|e| CaptureError::connection_lost(e.to_string()))
    }

    /// Rebuilt output listing if outputs changed since the last call.
    pub fn take_outputs(&mut self) -> Option<OutputRegistry<wl_output::WlOutput>> {
        if !std::mem::take(&mut self.state.outputs_changed) {
            return None;
        }
        Some(OutputRegistry::from_advertised(self.state.outputs.iter().cloned()))
    }

    /// Bind globals, then wait for output names.
    ///
    /// The first round-trip delivers the globals and binds them; only the
    /// second delivers the `name`/`description` events of the bound outputs.
    pub fn discover(&mut self) -> Result<(WaylandCapabilities, OutputRegistry<wl_output::WlOutput>), CaptureError> {
        let _registry = self.conn.display().get_registry(&self.qh, ());
        self.roundtrip()?;
        self.roundtrip()?;

        self.state.outputs_changed = false;
        let outputs = OutputRegistry::from_advertised(self.state.outputs.iter().cloned());
        for output in outputs.iter() {
            debug!("Output[{}] global {}: {}", output.name(), output.global(), output.summary().label());
        }
        info!("Discovered {} outputs", outputs.len());

        let caps = Capabilities { frame_copy: self.state.screencopy.clone(), buffer_sharing: self.state.dmabuf.clone() };
        Ok((caps, outputs))
    }
}

impl Drop for WaylandConnection {
    fn drop(&mut self) {
        for output in self.state.outputs.drain(..) {
            if output.handle.version() >= 3 {
                output.handle.release();
            }
        }
        if let Err(e) = self.conn.flush() {
            debug!("Flush on disconnect failed: {}", e);
        }
        info!("Disconnected from Wayland display");
    }
}

fn socket_path(display: &str) -> Result<PathBuf, CaptureError> {
    let path = Path::new(display);
    if path.is_absolute() {
        return Ok(path.to_path_buf());
    }
    let runtime_dir = std::env::var_os("XDG_RUNTIME_DIR")
        .ok_or_else(|| CaptureError::connect_failed("XDG_RUNTIME_DIR is not set"))?;
    Ok(PathBuf::from(runtime_dir).join(display))
}

// ── Dispatch ──────────────────────────────────────────────────────────────────

impl Dispatch<wl_registry::WlRegistry, ()> for SessionState {
    fn event(
        state: &mut Self,
        registry: &wl_registry::WlRegistry,
        event: wl_registry::Event,
        _: &(),
        _conn: &Connection,
        qh: &QueueHandle<Self>,
    ) {
        match event {
            wl_registry::Event::Global { name, interface, version } => match interface.as_str() {
                "wl_output" => {
                    let handle: wl_output::WlOutput = registry.bind(name, version.min(4), qh, name);
                    state.outputs.push(AdvertisedOutput { global: name, handle, name: None, description: None });
                    // v1 outputs never send `done`
                    if version < 2 {
                        state.outputs_changed = true;
                    }
                }
                "zwlr_screencopy_manager_v1" => {
                    debug!("Found {} v{}", interface, version);
                    state.screencopy = Some(registry.bind(name, version.min(3), qh, ()));
                }
                "zwp_linux_dmabuf_v1" => {
                    debug!("Found {} v{}", interface, version);
                    state.dmabuf = Some(registry.bind(name, version.min(3), qh, ()));
                }
                _ => {}
            },
            wl_registry::Event::GlobalRemove { name } => {
                let Some(index) = state.outputs.iter().position(|o| o.global == name) else {
                    return;
                };
                let output = state.outputs.remove(index);
                warn!("Output[{}] removed by compositor", output.name.as_deref().unwrap_or("unnamed"));
                if output.handle.version() >= 3 {
                    output.handle.release();
                }
                state.outputs_changed = true;
            }
            _ => {}
        }
    }
}

impl Dispatch<wl_output::WlOutput, u32> for SessionState {
    fn event(
        state: &mut Self,
        _output: &wl_output::WlOutput,
        event: wl_output::Event,
        global: &u32,
        _conn: &Connection,
        _qh: &QueueHandle<Self>,
    ) {
        let Some(adv) = state.outputs.iter_mut().find(|o| o.global == *global) else {
            return;
        };
        match event {
            wl_output::Event::Name { name } => adv.name = Some(name),
            wl_output::Event::Description { description } => adv.description = Some(description),
            wl_output::Event::Done => state.outputs_changed = true,
            _ => {}
        }
    }
}

impl Dispatch<ZwlrScreencopyFrameV1, ()> for SessionState {
    fn event(
        state: &mut Self,
        frame: &ZwlrScreencopyFrameV1,
        event: zwlr_screencopy_frame_v1::Event,
        _: &(),
        _conn: &Connection,
        _qh: &QueueHandle<Self>,
    ) {
        let Some(report) = state.frames.get_mut(&frame.id()) else {
            return;
        };
        match event {
            zwlr_screencopy_frame_v1::Event::LinuxDmabuf { format, width, height } => {
                let descriptor = FrameDescriptor::new(FourCc(format), width, height);
                trace!("Frame offers dmabuf {}", descriptor);
                report.descriptor = Some(descriptor);
            }
            zwlr_screencopy_frame_v1::Event::Ready { tv_sec_hi, tv_sec_lo, tv_nsec } => {
                let secs = (u64::from(tv_sec_hi) << 32) | u64::from(tv_sec_lo);
                report.status = FrameStatus::Ready { timestamp: Duration::new(secs, tv_nsec) };
            }
            zwlr_screencopy_frame_v1::Event::Failed => report.status = FrameStatus::Failed,
            _ => {}
        }
    }
}

delegate_noop!(SessionState: ZwlrScreencopyManagerV1);
delegate_noop!(SessionState: ignore ZwpLinuxDmabufV1);
delegate_noop!(SessionState: ignore zwp_linux_buffer_params_v1::ZwpLinuxBufferParamsV1);
delegate_noop!(SessionState: ignore wl_buffer::WlBuffer);
