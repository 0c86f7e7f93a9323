//! Public engine handle.
//!
//! [`ScreencopyEngine`] owns the capture thread and is the only API a host
//! shim needs: pick a target, read the current frame, tear down.

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use screencopy_core::{CaptureError, CaptureStats, ColorSpace, OutputSummary, SourceSettings};
use tracing::{debug, error, info};

use crate::capture_loop::CaptureLoop;
use crate::outputs::OutputRegistry;
use crate::protocol::{BufferDevice, BufferSharing, GraphicsContext};
use crate::state::{CurrentFrame, RenderFrame, Shared};

pub struct ScreencopyEngine<O, T> {
    shared: Arc<Shared<O, T>>,
    thread: Option<JoinHandle<()>>,
}

impl<O, T> ScreencopyEngine<O, T>
where
    O: Send + Sync + 'static,
    T: Send + 'static,
{
    /// Spawn the capture thread. It idles until a target is selected.
    pub fn start<P, D, G>(
        protocol: P,
        device: D,
        graphics: Arc<G>,
        outputs: OutputRegistry<O>,
        frame_interval: Duration,
    ) -> Result<Self, CaptureError>
    where
        P: BufferSharing<Output = O> + Send + 'static,
        P::Buffer: Send,
        D: BufferDevice + Send + 'static,
        D::Allocation: Send,
        G: GraphicsContext<Texture = T>,
    {
        let count = outputs.len();
        let shared = Arc::new(Shared::new(frame_interval, outputs));
        shared.lock().running = true;

        let capture = CaptureLoop::new(protocol, device, graphics, shared.clone());
        let thread = thread::Builder::new().name("screencopy-capture".into()).spawn(move || capture.run());
        let thread = match thread {
            Ok(thread) => thread,
            Err(e) => {
                shared.lock().running = false;
                return Err(e.into());
            }
        };

        info!("Capture engine started ({} outputs, interval {:?})", count, frame_interval);
        Ok(Self { shared, thread: Some(thread) })
    }
}

impl<O, T> ScreencopyEngine<O, T> {
    /// Switch capture to the output called `name`.
    ///
    /// Waits for any in-flight cycle to finish before swapping. An unknown
    /// name returns `OutputNotFound` and keeps the current target. Must not be
    /// called from inside the renderer's graphics scope.
    pub fn update_target(&self, name: &str) -> Result<(), CaptureError> {
        let mut state = self.shared.lock();
        let target = state.outputs.find(name)?;
        if state.target.as_ref().is_some_and(|t| t.global() == target.global()) {
            debug!("Output[{}] already selected", name);
            return Ok(());
        }
        state.pause_requested = true;
        let mut state = self
            .shared
            .cond
            .wait_while(state, |s| s.cycle_in_flight)
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        state.target = Some(target);
        state.last_frame_failed = false;
        state.pause_requested = false;
        drop(state);
        self.shared.cond.notify_all();

        info!("Output[{}] selected", name);
        Ok(())
    }

    pub fn set_frame_interval(&self, interval: Duration) {
        self.shared.lock().frame_interval = interval;
    }

    /// Re-read host settings: frame interval always, target when one is set.
    pub fn update(&self, settings: &SourceSettings, frame_interval: Duration) -> Result<(), CaptureError> {
        self.set_frame_interval(frame_interval);
        match settings.output_name() {
            Some(name) => self.update_target(name),
            None => Ok(()),
        }
    }

    /// Name of the selected output.
    pub fn target(&self) -> Option<String> {
        self.shared.lock().target.as_ref().map(|t| t.name().to_owned())
    }

    /// Outputs as of the capture thread's most recent dispatch.
    pub fn list_outputs(&self) -> Vec<OutputSummary> {
        let outputs = self.shared.lock().outputs.clone();
        outputs.summaries()
    }

    /// Borrow the current frame while the state lock is held.
    ///
    /// Call from inside the renderer's graphics scope; the capture thread
    /// cannot replace the texture until `f` returns.
    pub fn with_current_frame<R>(&self, f: impl FnOnce(&RenderFrame<T>) -> R) -> Option<R> {
        self.shared.with_frame(f)
    }

    pub fn current_frame(&self) -> Option<CurrentFrame<T>>
    where
        T: Clone,
    {
        self.with_current_frame(|frame| CurrentFrame {
            texture: frame.texture.clone(),
            width: frame.descriptor.width,
            height: frame.descriptor.height,
            color_space: frame.color_space,
        })
    }

    /// `(0, 0)` until the first frame.
    pub fn frame_size(&self) -> (u32, u32) {
        self.with_current_frame(|f| (f.descriptor.width, f.descriptor.height)).unwrap_or((0, 0))
    }

    pub fn color_space(&self) -> ColorSpace {
        self.with_current_frame(|f| f.color_space).unwrap_or_default()
    }

    pub fn stats(&self) -> CaptureStats {
        self.shared.lock().stats
    }

    /// False once the capture thread has exited, including after a lost connection.
    pub fn is_running(&self) -> bool {
        self.shared.lock().running
    }

    /// Stop and join the capture thread; every engine resource is released
    /// when this returns.
    pub fn destroy(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        let Some(thread) = self.thread.take() else {
            return;
        };
        self.shared.lock().stop_requested = true;
        self.shared.cond.notify_all();
        if thread.join().is_err() {
            error!("Capture thread panicked");
        }
        info!("Capture engine stopped");
    }
}

impl<O, T> Drop for ScreencopyEngine<O, T> {
    fn drop(&mut self) {
        self.shutdown();
    }
}
