use std::fmt;

use thiserror::Error;

// MARK: - Capability

/// Compositor globals the engine binds at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Capability {
    /// Frame-copy protocol (`zwlr_screencopy_manager_v1`).
    FrameCopy,
    /// Buffer-sharing protocol (`zwp_linux_dmabuf_v1`).
    BufferSharing,
}

impl Capability {
    /// Wire interface name advertised by the compositor.
    pub fn interface(&self) -> &'static str {
        match self {
            Self::FrameCopy => "zwlr_screencopy_manager_v1",
            Self::BufferSharing => "zwp_linux_dmabuf_v1",
        }
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.interface())
    }
}

// MARK: - CaptureError

#[derive(Error, Debug)]
pub enum CaptureError {
    #[error("Failed to connect to compositor: {reason}")]
    ConnectFailed { reason: String },

    #[error("Compositor does not advertise {0}")]
    MissingCapability(Capability),

    #[error("Output not found: {name}")]
    OutputNotFound { name: String },

    #[error("Buffer allocation failed: {reason}")]
    AllocationFailed { reason: String },

    #[error("Capture failed: {reason}")]
    CaptureFailed { reason: String },

    #[error("Copy failed: {reason}")]
    CopyFailed { reason: String },

    #[error("Connection to compositor lost: {reason}")]
    ConnectionLost { reason: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl CaptureError {
    pub fn connect_failed(reason: impl Into<String>) -> Self {
        Self::ConnectFailed { reason: reason.into() }
    }

    pub fn allocation_failed(reason: impl Into<String>) -> Self {
        Self::AllocationFailed { reason: reason.into() }
    }

    pub fn capture_failed(reason: impl Into<String>) -> Self {
        Self::CaptureFailed { reason: reason.into() }
    }

    pub fn copy_failed(reason: impl Into<String>) -> Self {
        Self::CopyFailed { reason: reason.into() }
    }

    pub fn connection_lost(reason: impl Into<String>) -> Self {
        Self::ConnectionLost { reason: reason.into() }
    }

    /// Per-cycle failures: the cycle is abandoned and the loop keeps running.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::AllocationFailed { .. } | Self::CaptureFailed { .. } | Self::CopyFailed { .. }
        )
    }

    /// Failures that abort engine creation outright.
    pub fn is_fatal_at_init(&self) -> bool {
        matches!(self, Self::ConnectFailed { .. } | Self::MissingCapability(_))
    }
}
