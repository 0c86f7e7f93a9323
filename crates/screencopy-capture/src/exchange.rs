//! One capture/copy transaction against the compositor.
//!
//! ```text
//! capture_output ─► Requested ─roundtrip─► FormatReported
//!                       │                        │ copy + roundtrip
//!                       ▼                        ▼
//!                     Failed ◄──────────── Copying ──► Complete
//! ```
//!
//! The compositor answers through events; each step forces a round-trip so
//! callers see a plain request/response. `ready` only follows the output's
//! next commit, so after the copy the exchange blocks on the connection
//! instead of issuing more round-trips. The frame object is released on
//! `Complete` and `Failed`, and otherwise when the exchange is dropped.

use std::time::{Duration, Instant};

use screencopy_core::{CaptureError, FrameDescriptor};
use tracing::trace;

use crate::protocol::{FrameProtocol, FrameStatus};

/// Upper bound on waiting for `ready`/`failed` after a copy request.
pub const COMPLETION_TIMEOUT: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExchangeState {
    Requested,
    FormatReported,
    Copying,
    Complete,
    Failed,
}

/// A frame whose pixels now live in the destination buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompletedFrame {
    pub descriptor: FrameDescriptor,
    /// Compositor presentation timestamp.
    pub timestamp: Duration,
}

/// One capture cycle's protocol object and what is known about it.
pub struct FrameExchange<F> {
    frame: Option<F>,
    state: ExchangeState,
    descriptor: Option<FrameDescriptor>,
}

impl<F> FrameExchange<F> {
    /// `Requested → FormatReported`.
    ///
    /// Fails with `CaptureFailed` when the compositor reports failure or no
    /// DMA-BUF format; `ConnectionLost` when the round-trip breaks.
    pub fn request<P>(protocol: &mut P, output: &P::Output) -> Result<Self, CaptureError>
    where
        P: FrameProtocol<Frame = F>,
    {
        let frame = protocol.capture_output(output)?;
        let mut exchange = Self { frame: Some(frame), state: ExchangeState::Requested, descriptor: None };
        trace!("frame exchange: Requested");
        protocol.roundtrip()?;

        let report = exchange.frame.as_ref().map(|frame| protocol.report(frame)).unwrap_or_default();
        if report.status == FrameStatus::Failed {
            exchange.finish(ExchangeState::Failed);
            return Err(CaptureError::capture_failed("compositor refused to capture output"));
        }
        let Some(descriptor) = report.descriptor else {
            exchange.finish(ExchangeState::Failed);
            return Err(CaptureError::capture_failed("compositor offered no DMA-BUF format"));
        };

        exchange.descriptor = Some(descriptor);
        exchange.state = ExchangeState::FormatReported;
        trace!("frame exchange: Requested → FormatReported ({})", descriptor);
        Ok(exchange)
    }

    /// Authoritative frame geometry, known from `FormatReported` on.
    pub fn descriptor(&self) -> Option<FrameDescriptor> {
        self.descriptor
    }

    pub fn state(&self) -> ExchangeState {
        self.state
    }

    /// `FormatReported → Copying → Complete | Failed`.
    ///
    /// The frame object is released before this returns, whatever the outcome.
    pub fn copy_into<P>(&mut self, protocol: &mut P, buffer: &P::Buffer) -> Result<CompletedFrame, CaptureError>
    where
        P: FrameProtocol<Frame = F>,
    {
        let result = self.await_copy(protocol, buffer);
        self.finish(if result.is_ok() { ExchangeState::Complete } else { ExchangeState::Failed });
        result
    }

    fn await_copy<P>(&mut self, protocol: &mut P, buffer: &P::Buffer) -> Result<CompletedFrame, CaptureError>
    where
        P: FrameProtocol<Frame = F>,
    {
        let (Some(frame), Some(descriptor), ExchangeState::FormatReported) = (&self.frame, self.descriptor, self.state)
        else {
            return Err(CaptureError::copy_failed(format!("copy requested in state {:?}", self.state)));
        };

        protocol.copy(frame, buffer);
        self.state = ExchangeState::Copying;
        trace!("frame exchange: FormatReported → Copying");
        protocol.roundtrip()?;

        let started = Instant::now();
        loop {
            match protocol.report(frame).status {
                FrameStatus::Ready { timestamp } => return Ok(CompletedFrame { descriptor, timestamp }),
                FrameStatus::Failed => return Err(CaptureError::copy_failed("compositor failed to copy frame")),
                FrameStatus::Pending => {
                    let remaining = COMPLETION_TIMEOUT.saturating_sub(started.elapsed());
                    if remaining.is_zero() {
                        return Err(CaptureError::copy_failed(format!(
                            "no completion within {:?}",
                            COMPLETION_TIMEOUT
                        )));
                    }
                    protocol.dispatch_blocking(remaining)?;
                }
            }
        }
    }

    /// Enter a terminal state and release the frame object.
    fn finish(&mut self, state: ExchangeState) {
        trace!("frame exchange: {:?} → {:?}", self.state, state);
        self.state = state;
        self.frame = None;
    }
}
