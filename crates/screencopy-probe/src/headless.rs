//! Graphics context without a renderer.
//!
//! "Importing" a DMA-BUF duplicates its fd so the probe holds a real
//! reference to the GPU buffer, which is what a renderer import does too.

use std::os::fd::OwnedFd;
use std::sync::{Mutex, MutexGuard, PoisonError};

use screencopy_capture::{GraphicsContext, GraphicsScope};
use screencopy_core::{CaptureError, ColorFormat, DmabufLayout, FrameDescriptor};
use tracing::debug;

pub struct HeadlessTexture {
    _fd: OwnedFd,
    pub descriptor: FrameDescriptor,
    pub format: ColorFormat,
}

#[derive(Default)]
pub struct Imports {
    live: usize,
}

#[derive(Default)]
pub struct HeadlessContext {
    imports: Mutex<Imports>,
}

impl HeadlessContext {
    /// Textures imported and not yet destroyed.
    pub fn live_textures(&self) -> usize {
        self.imports.lock().unwrap_or_else(PoisonError::into_inner).live
    }
}

pub struct HeadlessScope<'a>(MutexGuard<'a, Imports>);

impl GraphicsContext for HeadlessContext {
    type Texture = HeadlessTexture;
    type Scope<'a> = HeadlessScope<'a>;

    fn enter(&self) -> HeadlessScope<'_> {
        HeadlessScope(self.imports.lock().unwrap_or_else(PoisonError::into_inner))
    }
}

impl GraphicsScope for HeadlessScope<'_> {
    type Texture = HeadlessTexture;

    fn import_dmabuf(&mut self, layout: &DmabufLayout<'_>, format: ColorFormat) -> Result<HeadlessTexture, CaptureError> {
        let fd = layout.fd.try_clone_to_owned()?;
        self.0.live += 1;
        debug!("Imported {} as {:?}", layout.descriptor, format);
        Ok(HeadlessTexture { _fd: fd, descriptor: layout.descriptor, format })
    }

    fn destroy_texture(&mut self, texture: HeadlessTexture) {
        self.0.live = self.0.live.saturating_sub(1);
        debug!("Released {}", texture.descriptor);
    }
}
