//! Device driver collaborator and the shared device context
//!
//! The GPU driver is consumed through the [`DeviceDriver`] trait. A [`DeviceSession`] is the
//! explicit replacement for a process-wide connection: every display calls
//! [`DeviceSession::connect`] and receives a [`DeviceContext`] handle. The first handle sets up the
//! connection, the memory context, the heap and the event object; dropping the last handle
//! tears them down again.
//!
//! A failure while setting up the connection is sticky. Once a session has failed, every further
//! call to [`DeviceSession::connect`] reports [`WsError::CannotInitialise`] without touching the
//! driver again.

use std::{cell::RefCell, collections::HashMap, fmt, os::unix::io::BorrowedFd, ptr::NonNull, rc::Rc};

use tracing::{debug, error, trace};

use crate::error::WsError;

mod binder;
mod params;

pub use self::binder::{BindError, Mapping};
pub use self::params::{BufferLayout, DrawableFlags, DrawableParams, ImageParams};

/// Generates an opaque, copyable driver handle
macro_rules! driver_handle {
    ($(#[$attr:meta])* $name:ident) => {
        $(#[$attr])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub struct $name(pub u64);
    };
}

driver_handle!(
    /// Connection to the device services
    Connection
);
driver_handle!(
    /// Device memory context of a connection
    MemoryContext
);
driver_handle!(
    /// Heap device mappings are placed in
    Heap
);
driver_handle!(
    /// Event object used by the driver to signal completion
    EventObject
);
driver_handle!(
    /// Descriptor of a device memory allocation
    MemDesc
);
driver_handle!(
    /// Address in the device virtual address space
    DeviceAddress
);

impl DeviceAddress {
    /// Address `bytes` past this one
    pub fn offset(self, bytes: u64) -> DeviceAddress {
        DeviceAddress(self.0 + bytes)
    }
}

/// Synchronization token of a prior GPU operation
///
/// A fence is owned and has to be handed back to the driver exactly once, see
/// [`DeviceContext::destroy_fence`].
#[derive(Debug, PartialEq, Eq, Hash)]
pub struct Fence(pub u64);

/// Errors reported by the device driver
#[derive(Debug, thiserror::Error)]
pub enum DeviceError {
    /// The device services could not be reached
    #[error("The device services could not be reached")]
    ConnectionFailed,
    /// The device ran out of memory
    #[error("The device ran out of memory")]
    OutOfMemory,
    /// The driver rejected the parameters of a call
    #[error("The driver rejected the parameters of the call")]
    InvalidParams,
    /// A foreign buffer could not be imported
    #[error("The buffer could not be imported")]
    ImportFailed,
    /// The driver failed with its own error code
    #[error("The driver failed with code {0}")]
    Driver(i32),
}

/// Device driver services consumed by the window system
///
/// All calls are made from the thread that owns the display.
pub trait DeviceDriver {
    /// Open a connection to the device services
    fn connect(&self) -> Result<Connection, DeviceError>;
    /// Close a connection
    fn disconnect(&self, connection: Connection);
    /// Create the device memory context of a connection
    fn create_memory_context(&self, connection: Connection) -> Result<MemoryContext, DeviceError>;
    /// Destroy a device memory context
    fn destroy_memory_context(&self, context: MemoryContext);
    /// Find the heap general purpose mappings are placed in
    fn find_heap(&self, context: MemoryContext) -> Result<Heap, DeviceError>;
    /// Acquire the event object of a connection
    fn acquire_event_object(&self, connection: Connection) -> Result<EventObject, DeviceError>;
    /// Release the event object of a connection
    fn release_event_object(&self, connection: Connection, event: EventObject);

    /// Wrap a cpu memory region, `address` and `size` are multiples of `alignment`
    fn wrap_external_memory(
        &self,
        context: MemoryContext,
        address: usize,
        size: usize,
        alignment: usize,
        name: &str,
    ) -> Result<MemDesc, DeviceError>;
    /// Import a dma-buf, returning the allocation and its size in bytes
    fn import_dmabuf(
        &self,
        connection: Connection,
        fd: BorrowedFd<'_>,
        name: &str,
    ) -> Result<(MemDesc, u64), DeviceError>;
    /// Map an allocation into the device address space
    fn map_to_device(&self, memdesc: MemDesc, heap: Heap) -> Result<DeviceAddress, DeviceError>;
    /// Remove the device mapping of an allocation
    fn release_device_mapping(&self, memdesc: MemDesc);
    /// Free an allocation
    fn free_memory(&self, memdesc: MemDesc);

    /// Map an allocation for cpu access
    fn acquire_cpu_mapping(&self, memdesc: MemDesc) -> Result<NonNull<u8>, DeviceError>;
    /// Release a cpu mapping acquired with [`DeviceDriver::acquire_cpu_mapping`]
    fn release_cpu_mapping(&self, memdesc: MemDesc);

    /// Destroy a fence
    fn destroy_fence(&self, connection: Connection, fence: Fence);

    /// Look up a driver configuration hint
    fn hint(&self, _key: &str) -> Option<u32> {
        None
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct DeviceHandles {
    connection: Connection,
    memory_context: MemoryContext,
    heap: Heap,
    event: EventObject,
}

#[derive(Debug)]
enum Status {
    NotReady,
    Ready(DeviceHandles),
    Failed,
}

#[derive(Debug)]
struct SessionState {
    status: Status,
    users: usize,
    cpu_mappings: HashMap<MemDesc, usize>,
}

struct SessionInner<D> {
    driver: D,
    state: RefCell<SessionState>,
}

impl<D> fmt::Debug for SessionInner<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionInner")
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

/// Shared slot for the device connection
///
/// Cloning the session yields another reference to the same slot.
#[derive(Debug)]
pub struct DeviceSession<D: DeviceDriver> {
    inner: Rc<SessionInner<D>>,
}

impl<D: DeviceDriver> Clone for DeviceSession<D> {
    fn clone(&self) -> Self {
        DeviceSession {
            inner: self.inner.clone(),
        }
    }
}

impl<D: DeviceDriver> DeviceSession<D> {
    /// Create a new, not yet connected session
    pub fn new(driver: D) -> DeviceSession<D> {
        DeviceSession {
            inner: Rc::new(SessionInner {
                driver,
                state: RefCell::new(SessionState {
                    status: Status::NotReady,
                    users: 0,
                    cpu_mappings: HashMap::new(),
                }),
            }),
        }
    }

    /// Acquire a handle to the device context, setting it up on first use
    pub fn connect(&self) -> Result<DeviceContext<D>, WsError> {
        let mut state = self.inner.state.borrow_mut();
        let handles = match state.status {
            Status::Ready(handles) => handles,
            Status::Failed => {
                debug!("Device context previously failed, not retrying");
                return Err(WsError::CannotInitialise);
            }
            Status::NotReady => match setup(&self.inner.driver) {
                Ok(handles) => {
                    debug!(connection = handles.connection.0, "Device context ready");
                    state.status = Status::Ready(handles);
                    handles
                }
                Err(err) => {
                    error!(?err, "Failed to set up the device context");
                    state.status = Status::Failed;
                    return Err(WsError::CannotInitialise);
                }
            },
        };
        state.users += 1;
        trace!(users = state.users, "Device context acquired");

        Ok(DeviceContext {
            inner: self.inner.clone(),
            handles,
        })
    }

    /// Number of live [`DeviceContext`] handles
    pub fn users(&self) -> usize {
        self.inner.state.borrow().users
    }

    /// Whether the connection is currently established
    pub fn is_ready(&self) -> bool {
        matches!(self.inner.state.borrow().status, Status::Ready(_))
    }

    /// The driver backing this session
    pub fn driver(&self) -> &D {
        &self.inner.driver
    }
}

fn setup<D: DeviceDriver>(driver: &D) -> Result<DeviceHandles, DeviceError> {
    let connection = scopeguard::guard(driver.connect()?, |connection| driver.disconnect(connection));
    let memory_context = scopeguard::guard(driver.create_memory_context(*connection)?, |context| {
        driver.destroy_memory_context(context)
    });
    let heap = driver.find_heap(*memory_context)?;
    let event = driver.acquire_event_object(*connection)?;

    Ok(DeviceHandles {
        heap,
        event,
        memory_context: scopeguard::ScopeGuard::into_inner(memory_context),
        connection: scopeguard::ScopeGuard::into_inner(connection),
    })
}

/// Counted handle to an established device context
///
/// Cloning a handle counts as another user of the context.
#[derive(Debug)]
pub struct DeviceContext<D: DeviceDriver> {
    inner: Rc<SessionInner<D>>,
    handles: DeviceHandles,
}

impl<D: DeviceDriver> DeviceContext<D> {
    /// The driver backing this context
    pub fn driver(&self) -> &D {
        &self.inner.driver
    }

    /// Connection of this context
    pub fn connection(&self) -> Connection {
        self.handles.connection
    }

    /// Hand a fence back to the driver
    pub fn destroy_fence(&self, fence: Fence) {
        trace!(fence = fence.0, "Destroying fence");
        self.inner.driver.destroy_fence(self.handles.connection, fence);
    }

    /// Look up a driver configuration hint
    pub fn hint(&self, key: &str) -> Option<u32> {
        self.inner.driver.hint(key)
    }
}

impl<D: DeviceDriver> Clone for DeviceContext<D> {
    fn clone(&self) -> Self {
        self.inner.state.borrow_mut().users += 1;
        DeviceContext {
            inner: self.inner.clone(),
            handles: self.handles,
        }
    }
}

impl<D: DeviceDriver> Drop for DeviceContext<D> {
    fn drop(&mut self) {
        let mut state = self.inner.state.borrow_mut();
        state.users = state.users.saturating_sub(1);
        trace!(users = state.users, "Device context released");
        if state.users > 0 {
            return;
        }

        let driver = &self.inner.driver;
        let handles = self.handles;
        driver.release_event_object(handles.connection, handles.event);
        driver.destroy_memory_context(handles.memory_context);
        driver.disconnect(handles.connection);
        state.status = Status::NotReady;
        state.cpu_mappings.clear();
        debug!(connection = handles.connection.0, "Device context torn down");
    }
}
