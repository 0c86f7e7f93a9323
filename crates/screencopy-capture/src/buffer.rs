//! GPU buffer allocation.
//!
//! A [`GpuBuffer`] couples the GPU backing store with the wire buffer the
//! compositor writes into. The wire buffer describes the backing store's
//! memory layout, so the two are created and destroyed together.

use screencopy_core::{CaptureError, DmabufLayout, FrameDescriptor};
use tracing::{debug, info};

use crate::protocol::{BufferDevice, BufferSharing, DmabufSource};

/// Backing store + wire buffer for one frame geometry.
///
/// Field order is drop order: the wire buffer goes before the memory it
/// points into.
pub struct GpuBuffer<B, W> {
    wire: W,
    backing: B,
    descriptor: FrameDescriptor,
}

impl<B: DmabufSource, W> GpuBuffer<B, W> {
    pub fn descriptor(&self) -> &FrameDescriptor {
        &self.descriptor
    }

    pub fn wire(&self) -> &W {
        &self.wire
    }

    pub fn layout(&self) -> DmabufLayout<'_> {
        self.backing.layout()
    }

    pub fn matches(&self, wanted: &FrameDescriptor) -> bool {
        self.descriptor == *wanted
    }
}

/// Result of [`GpuBufferAllocator::ensure`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferChange {
    Reused,
    Recreated,
}

pub struct GpuBufferAllocator<D> {
    device: D,
    allocations: u64,
}

impl<D: BufferDevice> GpuBufferAllocator<D> {
    pub fn new(device: D) -> Self {
        Self { device, allocations: 0 }
    }

    /// Total successful allocations over the allocator's lifetime.
    pub fn allocations(&self) -> u64 {
        self.allocations
    }

    /// Whether `current` must be replaced to hold a `wanted` frame.
    pub fn needs_recreate<W>(
        current: Option<&GpuBuffer<D::Allocation, W>>,
        wanted: &FrameDescriptor,
    ) -> bool {
        !current.is_some_and(|buf| buf.matches(wanted))
    }

    /// Make `current` hold a buffer matching `wanted`.
    ///
    /// A mismatching buffer is destroyed in full before the new allocation.
    /// On error `current` is left empty.
    pub fn ensure<S>(
        &mut self,
        current: &mut Option<GpuBuffer<D::Allocation, S::Buffer>>,
        wanted: &FrameDescriptor,
        sharing: &mut S,
    ) -> Result<BufferChange, CaptureError>
    where
        S: BufferSharing,
    {
        if !Self::needs_recreate(current.as_ref(), wanted) {
            return Ok(BufferChange::Reused);
        }

        if let Some(old) = current.take() {
            debug!("Releasing GPU buffer {}", old.descriptor);
            drop(old);
        }

        let backing = self.device.allocate(wanted)?;
        let wire = sharing.import_dmabuf(&backing.layout())?;
        self.allocations += 1;
        info!("GPU buffer allocated: {}", wanted);

        *current = Some(GpuBuffer { wire, backing, descriptor: *wanted });
        Ok(BufferChange::Recreated)
    }
}
