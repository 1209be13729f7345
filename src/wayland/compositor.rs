//! Compositor side transport
//!
//! A compositor renders into the buffer objects of its scanout surfaces and publishes them by
//! making them the surface's front buffer. The scanout code locks the front buffer while it is
//! displayed; a buffer that is neither front nor locked may be rendered into again.

use std::os::unix::io::OwnedFd;

use super::{NativeHandle, SharedBuffer, TransportError};
use crate::{
    backend::allocator::{BoHandle, ExportedBo, Fourcc},
    utils::{Buffer, Size},
};

/// A scanout surface of the compositor
///
/// Surfaces are handles shared with the scanout code.
pub trait ScanoutSurface {
    /// Dimensions in pixels
    fn size(&self) -> Size<i32, Buffer>;
    /// Pixel format, windows are created on ARGB8888 and XRGB8888 surfaces only
    fn format(&self) -> Fourcc;
    /// Export the buffer object at `index`, `None` if the surface has none there
    fn buffer(&self, index: usize) -> Result<Option<ExportedBo>, TransportError>;
    /// Allocate a buffer object at `index` and export it
    fn allocate_buffer(&self, index: usize) -> Result<ExportedBo, TransportError>;
    /// Free a buffer object created with [`ScanoutSurface::allocate_buffer`]
    fn free_buffer(&self, index: usize);
    /// Make the buffer at `index` the front buffer
    fn set_front(&self, index: usize);
    /// Index of the front buffer
    fn front(&self) -> Option<usize>;
    /// Whether the scanout code holds the buffer at `index`
    fn is_locked(&self, index: usize) -> bool;
}

/// Buffer-management device of a compositor
pub trait CompositorTransport: NativeHandle {
    /// Export the buffer object behind a shared buffer that does not carry a dma-buf yet
    fn export_shared(&mut self, handle: BoHandle) -> Result<OwnedFd, TransportError>;
    /// Ask to be notified through the display once the buffer is destroyed
    fn watch_destroy(&mut self, buffer: &dyn SharedBuffer);
}
