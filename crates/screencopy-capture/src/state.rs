//! State shared between the controlling thread and the capture thread.
//!
//! Everything lives in one block behind one mutex; the condition variable
//! carries the pause handshake and stop wake-ups.

use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use screencopy_core::{CaptureStats, ColorFormat, ColorSpace, FrameDescriptor};

use crate::outputs::{OutputDescriptor, OutputRegistry};

/// Renderer texture over the current GPU buffer, with its geometry.
#[derive(Debug)]
pub struct RenderFrame<T> {
    pub texture: T,
    pub descriptor: FrameDescriptor,
    pub color_format: ColorFormat,
    pub color_space: ColorSpace,
    /// Successful copies into this texture's buffer.
    pub(crate) copies: u64,
}

/// Snapshot handed to the renderer by
/// [`ScreencopyEngine::current_frame`](crate::ScreencopyEngine::current_frame).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CurrentFrame<T> {
    pub texture: T,
    pub width: u32,
    pub height: u32,
    pub color_space: ColorSpace,
}

pub(crate) struct CaptureState<O, T> {
    pub running: bool,
    pub stop_requested: bool,
    /// Set by a reconfiguring caller; the loop starts no new cycle while set.
    pub pause_requested: bool,
    /// True between `Requested` and `Complete`/`Failed`.
    pub cycle_in_flight: bool,
    pub target: Option<Arc<OutputDescriptor<O>>>,
    /// Latest listing published by the capture thread.
    pub outputs: Arc<OutputRegistry<O>>,
    pub frame_interval: Duration,
    pub last_frame_failed: bool,
    pub frame: Option<RenderFrame<T>>,
    pub stats: CaptureStats,
}

pub(crate) struct Shared<O, T> {
    state: Mutex<CaptureState<O, T>>,
    pub cond: Condvar,
}

impl<O, T> Shared<O, T> {
    pub fn new(frame_interval: Duration, outputs: OutputRegistry<O>) -> Self {
        Self {
            state: Mutex::new(CaptureState {
                running: false,
                stop_requested: false,
                pause_requested: false,
                cycle_in_flight: false,
                target: None,
                outputs: Arc::new(outputs),
                frame_interval,
                last_frame_failed: false,
                frame: None,
                stats: CaptureStats::default(),
            }),
            cond: Condvar::new(),
        }
    }

    /// The state stays consistent across a panicking holder, so poison is ignored.
    pub fn lock(&self) -> MutexGuard<'_, CaptureState<O, T>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Sleep up to `duration`, waking early on stop. Returns whether stop was requested.
    pub fn sleep_unless_stopped(&self, duration: Duration) -> bool {
        let guard = self.lock();
        let (guard, _) = self
            .cond
            .wait_timeout_while(guard, duration, |s| !s.stop_requested)
            .unwrap_or_else(PoisonError::into_inner);
        guard.stop_requested
    }

    /// Run `f` on the visible frame. A texture is only visible once a copy
    /// into its buffer has completed.
    pub fn with_frame<R>(&self, f: impl FnOnce(&RenderFrame<T>) -> R) -> Option<R> {
        let state = self.lock();
        state.frame.as_ref().filter(|frame| frame.copies > 0).map(f)
    }
}
