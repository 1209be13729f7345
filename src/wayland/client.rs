//! Client side transport
//!
//! Events are not delivered through callbacks. Dispatching the queue appends every event the
//! window system cares about to a caller-provided buffer, which is then routed by the display.

use std::{os::unix::io::BorrowedFd, ptr::NonNull};

use super::{NativeHandle, SharedBuffer, TransportError};
use crate::{
    backend::allocator::{BoHandle, ExportedBo, Fourcc, Modifier},
    utils::{Buffer, Logical, Point, Rectangle, Size},
};

/// Protocol id of a surface
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SurfaceId(pub u32);

/// Protocol id of a presentable buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BufferId(pub u32);

/// Protocol id of a one-shot callback
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CallbackId(pub u32);

/// Identity of a native window, stable across drawables created for it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WindowId(pub u64);

/// First surface version supporting damage in buffer coordinates
pub const DAMAGE_BUFFER_SINCE: u32 = 4;

/// Events relevant to the buffer path
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientEvent {
    /// The server no longer reads from the buffer
    BufferReleased(BufferId),
    /// A frame or sync callback fired
    CallbackDone(CallbackId),
}

/// Dma-buf support advertised by the server
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DmabufSupport {
    /// Formats usable for windows
    pub formats: Vec<Fourcc>,
    /// Modifier to create buffers with
    pub modifier: Modifier,
}

/// Globals bound at display initialisation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientGlobals {
    /// Dma-buf parameter negotiation, preferred when available
    pub dmabuf: Option<DmabufSupport>,
    /// Whether the shared-memory kms global is bound
    pub kms: bool,
}

/// Description of a buffer object to wrap into a presentable buffer
#[derive(Debug)]
pub struct BufferParams<'a> {
    /// Dma-buf of the buffer object
    pub fd: BorrowedFd<'a>,
    /// Platform handle of the buffer object
    pub handle: BoHandle,
    /// Dimensions in pixels
    pub size: Size<i32, Buffer>,
    /// Row length in bytes
    pub pitch: u32,
    /// Pixel format
    pub format: Fourcc,
    /// Layout modifier
    pub modifier: Modifier,
}

/// Cpu mapping of a shared buffer
#[derive(Debug, PartialEq, Eq)]
pub struct CpuMapping {
    /// First byte of the mapping
    pub ptr: NonNull<u8>,
    /// Length in bytes
    pub len: usize,
}

/// A native window of the client
///
/// Windows are handles: the application keeps its own copy and may resize the window at any
/// time, which the window system notices on the next parameter query.
pub trait ClientWindow {
    /// Identity of the window
    fn id(&self) -> WindowId;
    /// Surface the window presents to
    fn surface(&self) -> SurfaceId;
    /// Current dimensions in pixels
    fn size(&self) -> Size<i32, Buffer>;
    /// Take the pending attach offset, resetting it to zero
    fn take_offset(&self) -> Point<i32, Logical>;
    /// Record the size of the buffer last attached
    fn set_attached_size(&self, size: Size<i32, Buffer>);
}

/// Connection of a client to a display server
pub trait ClientTransport: NativeHandle {
    /// Create the private event queue all requests of the window system are assigned to
    fn create_event_queue(&mut self) -> Result<(), TransportError>;
    /// Bind the buffer-sharing globals and set up access to the rendering device
    fn bind_globals(&mut self) -> Result<ClientGlobals, TransportError>;

    /// Dispatch already queued events without blocking
    fn dispatch_pending(&mut self, events: &mut Vec<ClientEvent>) -> Result<usize, TransportError>;
    /// Block until at least one event was dispatched
    fn dispatch(&mut self, events: &mut Vec<ClientEvent>) -> Result<usize, TransportError>;
    /// Send all buffered requests
    fn flush(&mut self) -> Result<(), TransportError>;

    /// Allocate a buffer object and export it
    fn allocate_bo(&mut self, width: u32, height: u32, format: Fourcc) -> Result<ExportedBo, TransportError>;
    /// Destroy a buffer object
    fn destroy_bo(&mut self, handle: BoHandle);

    /// Create a presentable buffer through dma-buf parameter negotiation
    fn create_dmabuf_buffer(&mut self, params: &BufferParams<'_>) -> Result<BufferId, TransportError>;
    /// Create a presentable buffer through the kms global
    fn create_kms_buffer(&mut self, params: &BufferParams<'_>) -> Result<BufferId, TransportError>;
    /// Destroy a presentable buffer
    fn destroy_buffer(&mut self, buffer: BufferId);

    /// Protocol version of a surface
    fn surface_version(&self, surface: SurfaceId) -> u32;
    /// Attach a buffer to a surface
    fn attach(&mut self, surface: SurfaceId, buffer: BufferId, offset: Point<i32, Logical>);
    /// Damage a region in surface coordinates
    fn damage(&mut self, surface: SurfaceId, damage: Rectangle<i32, Logical>);
    /// Damage a region in buffer coordinates
    fn damage_buffer(&mut self, surface: SurfaceId, damage: Rectangle<i32, Buffer>);
    /// Commit the pending state of a surface
    fn commit(&mut self, surface: SurfaceId);
    /// Request a callback for the next frame of a surface
    fn frame(&mut self, surface: SurfaceId) -> CallbackId;
    /// Request a callback once the server processed all prior requests
    fn sync(&mut self) -> CallbackId;
    /// Destroy a callback, whether it fired or not
    fn destroy_callback(&mut self, callback: CallbackId);

    /// Map a shared buffer for cpu access
    fn map_shared(&mut self, buffer: &dyn SharedBuffer) -> Result<CpuMapping, TransportError>;
    /// Unmap a shared buffer
    fn unmap_shared(&mut self, mapping: CpuMapping);
    /// Ask to be notified through the display once the buffer is destroyed
    fn watch_destroy(&mut self, buffer: &dyn SharedBuffer);
}
