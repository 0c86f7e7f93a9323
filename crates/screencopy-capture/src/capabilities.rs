//! Required compositor capabilities.

use screencopy_core::{Capability, CaptureError};
use tracing::{info, warn};

/// Capabilities found while binding registry globals.
#[derive(Debug, Clone)]
pub struct Capabilities<F, B> {
    pub frame_copy: Option<F>,
    pub buffer_sharing: Option<B>,
}

impl<F, B> Default for Capabilities<F, B> {
    fn default() -> Self {
        Self { frame_copy: None, buffer_sharing: None }
    }
}

impl<F, B> Capabilities<F, B> {
    /// Capabilities that were not advertised, frame copy first.
    pub fn missing(&self) -> Vec<Capability> {
        let mut missing = Vec::new();
        if self.frame_copy.is_none() {
            missing.push(Capability::FrameCopy);
        }
        if self.buffer_sharing.is_none() {
            missing.push(Capability::BufferSharing);
        }
        missing
    }

    /// Frame copy is mandatory; buffer sharing only for the zero-copy path.
    pub fn require(&self, zero_copy: bool) -> Result<(), CaptureError> {
        for cap in self.missing() {
            match cap {
                Capability::FrameCopy => return Err(CaptureError::MissingCapability(cap)),
                Capability::BufferSharing if zero_copy => {
                    return Err(CaptureError::MissingCapability(cap))
                }
                Capability::BufferSharing => {
                    warn!("{} not advertised, GPU import unavailable", cap);
                }
            }
        }
        info!(
            "Bound {}{}",
            Capability::FrameCopy,
            if self.buffer_sharing.is_some() { format!(" + {}", Capability::BufferSharing) } else { String::new() }
        );
        Ok(())
    }
}
