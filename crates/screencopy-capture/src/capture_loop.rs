//! The capture thread.
//!
//! One [`CaptureLoop`] runs per engine and is the only user of the compositor
//! connection. Each cycle negotiates a frame, makes sure the GPU buffer
//! matches it, and has the compositor copy into that buffer:
//!
//! ```text
//!   ┌────────── begin ──────────┐   pause / no target ──► idle 1 ms
//!   │ FrameExchange::request    │
//!   │ ensure GpuBuffer + texture│   (graphics scope → state lock)
//!   │ FrameExchange::copy_into  │
//!   └────────── finish ─────────┘──► FramePacer ──► sleep 90% of remainder
//! ```
//!
//! Per-cycle failures keep the previous texture visible. A lost connection
//! ends the loop. Output hot-plug events arrive during these dispatches; the
//! rebuilt listing is published into the shared state after each step.

use std::sync::Arc;
use std::time::{Duration, Instant};

use screencopy_core::{color_mapping, CaptureError, FrameDescriptor};
use tracing::{debug, error, info, trace, warn};

use crate::buffer::{GpuBuffer, GpuBufferAllocator};
use crate::exchange::{CompletedFrame, FrameExchange};
use crate::outputs::OutputDescriptor;
use crate::pacing::{FramePacer, Pacing};
use crate::protocol::{BufferDevice, BufferSharing, GraphicsContext, GraphicsScope};
use crate::state::{RenderFrame, Shared};

/// Poll period while paused or without a target.
pub const IDLE_POLL: Duration = Duration::from_millis(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Step {
    Stop,
    Idle,
    Cycled { elapsed: Duration, interval: Duration },
}

pub(crate) struct CaptureLoop<P, D, G>
where
    P: BufferSharing,
    D: BufferDevice,
    G: GraphicsContext,
{
    buffer: Option<GpuBuffer<D::Allocation, P::Buffer>>,
    protocol: P,
    allocator: GpuBufferAllocator<D>,
    graphics: Arc<G>,
    shared: Arc<Shared<P::Output, G::Texture>>,
}

impl<P, D, G> CaptureLoop<P, D, G>
where
    P: BufferSharing,
    D: BufferDevice,
    G: GraphicsContext,
{
    pub fn new(protocol: P, device: D, graphics: Arc<G>, shared: Arc<Shared<P::Output, G::Texture>>) -> Self {
        Self { buffer: None, protocol, allocator: GpuBufferAllocator::new(device), graphics, shared }
    }

    /// Run until stopped, then release every resource the loop owns.
    pub fn run(mut self) {
        info!("Capture thread started");
        loop {
            let stop = match self.step() {
                Step::Stop => true,
                Step::Idle => self.shared.sleep_unless_stopped(IDLE_POLL),
                Step::Cycled { elapsed, interval } => match FramePacer::new(interval).pace(elapsed) {
                    Pacing::Sleep(duration) => self.shared.sleep_unless_stopped(duration),
                    Pacing::Overrun(elapsed) => {
                        warn!("Capture overrun: cycle took {:?} (interval {:?})", elapsed, interval);
                        self.shared.lock().stats.overruns += 1;
                        false
                    }
                },
            };
            if stop {
                break;
            }
        }
        self.release();
    }

    /// One loop iteration without pacing.
    pub fn step(&mut self) -> Step {
        let begin = {
            let mut state = self.shared.lock();
            if state.stop_requested {
                return Step::Stop;
            }
            if state.pause_requested {
                return Step::Idle;
            }
            match state.target.clone() {
                Some(target) => {
                    state.cycle_in_flight = true;
                    Some((target, state.frame_interval))
                }
                None => None,
            }
        };
        let Some((target, interval)) = begin else {
            return self.poll_idle();
        };

        let started = Instant::now();
        let result = self.cycle(&target);
        self.publish_outputs();
        self.finish_cycle(result, &target, started.elapsed(), interval)
    }

    /// Without a target no cycle dispatches events, so drain them here to
    /// keep the output listing current.
    fn poll_idle(&mut self) -> Step {
        match self.protocol.dispatch_blocking(Duration::ZERO) {
            Ok(()) => {
                self.publish_outputs();
                Step::Idle
            }
            Err(e) => {
                error!("Compositor connection failed while idle: {}", e);
                Step::Stop
            }
        }
    }

    fn publish_outputs(&mut self) {
        if let Some(outputs) = self.protocol.take_outputs() {
            info!("Output list changed: {:?}", outputs.summaries().iter().map(|o| o.label()).collect::<Vec<_>>());
            self.shared.lock().outputs = Arc::new(outputs);
        }
    }

    fn cycle(&mut self, target: &OutputDescriptor<P::Output>) -> Result<CompletedFrame, CaptureError> {
        let mut exchange = FrameExchange::request(&mut self.protocol, target.handle())?;
        let wanted = exchange
            .descriptor()
            .ok_or_else(|| CaptureError::capture_failed("no format negotiated"))?;
        if GpuBufferAllocator::<D>::needs_recreate(self.buffer.as_ref(), &wanted) {
            self.recreate_surface(&wanted)?;
        }
        let buffer = self
            .buffer
            .as_ref()
            .ok_or_else(|| CaptureError::allocation_failed("no GPU buffer after recreation"))?;
        exchange.copy_into(&mut self.protocol, buffer.wire())
    }

    /// Replace texture, wire buffer and backing store for `wanted`.
    ///
    /// Runs inside the graphics scope with the state locked, so the renderer
    /// never sees a texture whose buffer is being torn down. On error nothing
    /// is left behind: no buffer, no texture.
    fn recreate_surface(&mut self, wanted: &FrameDescriptor) -> Result<(), CaptureError> {
        let mut scope = self.graphics.enter();
        let mut state = self.shared.lock();

        if let Some(old) = state.frame.take() {
            debug!("Destroying texture for {}", old.descriptor);
            scope.destroy_texture(old.texture);
        }

        let (color_format, color_space) = color_mapping(wanted.format);
        let imported = match self.allocator.ensure(&mut self.buffer, wanted, &mut self.protocol) {
            Ok(_) => match self.buffer.as_ref() {
                Some(buffer) => scope.import_dmabuf(&buffer.layout(), color_format).map_err(|e| match e {
                    CaptureError::AllocationFailed { .. } => e,
                    other => CaptureError::allocation_failed(format!("texture import: {other}")),
                }),
                None => Err(CaptureError::allocation_failed("GPU buffer missing after allocation")),
            },
            Err(e) => Err(e),
        };

        match imported {
            Ok(texture) => {
                state.frame = Some(RenderFrame { texture, descriptor: *wanted, color_format, color_space, copies: 0 });
                state.stats.buffer_recreations += 1;
                info!("Render surface ready: {} as {:?}/{:?}", wanted, color_format, color_space);
                Ok(())
            }
            Err(e) => {
                self.buffer = None;
                Err(e)
            }
        }
    }

    fn finish_cycle(
        &mut self,
        result: Result<CompletedFrame, CaptureError>,
        target: &OutputDescriptor<P::Output>,
        elapsed: Duration,
        interval: Duration,
    ) -> Step {
        let mut state = self.shared.lock();
        state.cycle_in_flight = false;
        let step = match result {
            Ok(done) => {
                if state.last_frame_failed {
                    info!("Output[{}] capturing again", target.name());
                }
                state.last_frame_failed = false;
                state.stats.frames_captured += 1;
                if let Some(frame) = state.frame.as_mut() {
                    frame.copies += 1;
                }
                trace!("Output[{}] frame {} at {:?}", target.name(), done.descriptor, done.timestamp);
                Step::Cycled { elapsed, interval }
            }
            Err(e) if e.is_transient() => {
                if state.last_frame_failed {
                    debug!("Output[{}] cycle failed again: {}", target.name(), e);
                } else {
                    warn!("Output[{}] cycle failed: {}", target.name(), e);
                }
                state.last_frame_failed = true;
                state.stats.cycles_failed += 1;
                Step::Cycled { elapsed, interval }
            }
            Err(e) => {
                error!("Output[{}] capture stopped: {}", target.name(), e);
                Step::Stop
            }
        };
        drop(state);
        self.shared.cond.notify_all();
        step
    }

    /// Texture first, under the graphics scope, then wire buffer and backing store.
    fn release(&mut self) {
        {
            let mut scope = self.graphics.enter();
            let mut state = self.shared.lock();
            if let Some(frame) = state.frame.take() {
                scope.destroy_texture(frame.texture);
            }
            self.buffer = None;
            state.running = false;
            state.cycle_in_flight = false;
        }
        self.shared.cond.notify_all();
        info!("Capture thread stopped");
    }
}
