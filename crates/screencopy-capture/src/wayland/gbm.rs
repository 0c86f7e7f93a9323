//! GBM buffer objects as DMA-BUF backing stores.

use std::fs::{File, OpenOptions};
use std::os::fd::{AsFd, OwnedFd};
use std::path::Path;

use ::gbm::{BufferObject, BufferObjectFlags, Device, Format};
use screencopy_core::{CaptureError, DmabufLayout, FrameDescriptor};
use tracing::{debug, info};

use crate::protocol::{BufferDevice, DmabufSource};

/// GBM device on a DRM render node.
pub struct GbmAllocator {
    device: Device<File>,
}

// SAFETY: the device is only used from the capture thread after being moved
// there; libgbm does not tie a device to the thread that opened it.
unsafe impl Send for GbmAllocator {}

impl GbmAllocator {
    pub fn open(path: &Path) -> Result<Self, CaptureError> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .map_err(|e| CaptureError::allocation_failed(format!("open {}: {e}", path.display())))?;
        let device = Device::new(file)
            .map_err(|e| CaptureError::allocation_failed(format!("GBM device on {}: {e}", path.display())))?;
        info!("GBM device opened: {}", path.display());
        Ok(Self { device })
    }
}

impl BufferDevice for GbmAllocator {
    type Allocation = GbmBackingStore;

    fn allocate(&mut self, descriptor: &FrameDescriptor) -> Result<GbmBackingStore, CaptureError> {
        let format = Format::try_from(descriptor.format.code())
            .map_err(|_| CaptureError::allocation_failed(format!("unsupported format {}", descriptor.format)))?;
        let bo = self
            .device
            .create_buffer_object::<()>(descriptor.width, descriptor.height, format, BufferObjectFlags::RENDERING)
            .map_err(|e| CaptureError::allocation_failed(format!("buffer object {descriptor}: {e}")))?;
        let fd = bo
            .fd_for_plane(0)
            .map_err(|e| CaptureError::allocation_failed(format!("export plane 0: {e}")))?;

        let store = GbmBackingStore {
            offset: bo.offset(0),
            stride: bo.stride_for_plane(0),
            modifier: bo.modifier().into(),
            descriptor: *descriptor,
            fd,
            _bo: bo,
        };
        debug!("GBM buffer {} stride {} modifier {:#x}", descriptor, store.stride, store.modifier);
        Ok(store)
    }
}

/// A buffer object and its exported plane.
///
/// The fd is closed before the buffer object is destroyed.
pub struct GbmBackingStore {
    fd: OwnedFd,
    _bo: BufferObject<()>,
    offset: u32,
    stride: u32,
    modifier: u64,
    descriptor: FrameDescriptor,
}

// SAFETY: see `GbmAllocator`; the buffer object never leaves the capture thread.
unsafe impl Send for GbmBackingStore {}

impl DmabufSource for GbmBackingStore {
    fn layout(&self) -> DmabufLayout<'_> {
        DmabufLayout {
            fd: self.fd.as_fd(),
            offset: self.offset,
            stride: self.stride,
            modifier: self.modifier,
            descriptor: self.descriptor,
        }
    }
}
