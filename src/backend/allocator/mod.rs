//! Buffer objects and back-buffer management
//!
//! Buffer objects themselves are allocated by the platform (see the transports in
//! [`crate::wayland`]); this module only describes how they are handed over and provides the
//! [`BackBufferRing`] every window keeps its buffers in.

use std::os::unix::io::OwnedFd;

mod ring;
pub use ring::{BackBufferRing, Slot, SlotId, SLOT_CAP};

pub use drm_fourcc::{DrmFourcc as Fourcc, DrmModifier as Modifier};

/// Handle of a platform buffer object
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BoHandle(pub u32);

/// A buffer object exported as a dma-buf
#[derive(Debug)]
pub struct ExportedBo {
    /// Platform handle of the buffer object
    pub handle: BoHandle,
    /// Dma-buf file descriptor, closed when dropped
    pub fd: OwnedFd,
    /// Row length in bytes
    pub pitch: u32,
}
