//! Protocol transports consumed by the window system
//!
//! The window system never talks to a socket itself. Everything protocol related goes through
//! one of two transports:
//!
//! - [`client::ClientTransport`] for applications connected to a display server, which present
//!   their windows by attaching buffers to surfaces;
//! - [`compositor::CompositorTransport`] for the display server itself, whose windows are scanout
//!   surfaces.
//!
//! Native displays handed in by the application are inspected through [`NativeHandle`] to decide
//! which of the two applies.

use std::os::unix::io::BorrowedFd;

use crate::{
    backend::allocator::{BoHandle, Fourcc},
    utils::{Buffer, Size},
};

pub mod client;
pub mod compositor;

/// Type marker found at the head of a native display object
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DisplayIdentity(pub u64);

impl DisplayIdentity {
    /// Connection of a client to a display server
    pub const CLIENT_DISPLAY: DisplayIdentity = DisplayIdentity(u64::from_be_bytes(*b"wl_displ"));
    /// Buffer-management device of a display server
    pub const SCANOUT_DEVICE: DisplayIdentity = DisplayIdentity(u64::from_be_bytes(*b"gbm_dev\0"));
}

/// A native object whose type can be inspected
pub trait NativeHandle {
    /// Type marker of the object
    fn identity(&self) -> DisplayIdentity;
}

/// Errors reported by a transport
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The connection to the display server is broken
    #[error("The connection to the display server is broken")]
    ConnectionLost,
    /// Dispatching the event queue failed
    #[error("Dispatching the event queue failed")]
    Dispatch,
    /// A required global is not advertised
    #[error("The global `{0}` is not advertised")]
    MissingGlobal(&'static str),
    /// The server refused to create a buffer
    #[error("The server refused to create a buffer")]
    BufferRejected,
    /// A buffer object could not be allocated
    #[error("A buffer object could not be allocated")]
    Allocation,
    /// An os call failed
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Identity of a shared protocol buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BufferKey(pub u64);

/// A buffer shared between processes through the display server
pub trait SharedBuffer {
    /// Identity of the buffer, stable for its lifetime
    fn key(&self) -> BufferKey;
    /// Dimensions in pixels
    fn size(&self) -> Size<i32, Buffer>;
    /// Row length in bytes
    fn stride(&self) -> u32;
    /// Pixel format
    fn format(&self) -> Fourcc;
    /// Platform handle of the backing buffer object
    fn handle(&self) -> BoHandle;
    /// Dma-buf of the buffer, if one was exported already
    fn fd(&self) -> Option<BorrowedFd<'_>>;
}
