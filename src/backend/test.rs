//! Recording collaborators for tests
//!
//! Every dummy keeps its state behind a shared cell, so a test can hand a clone to the window
//! system and inspect what happened through the one it kept.

use std::{
    cell::{Cell, Ref, RefCell, RefMut},
    collections::{HashMap, HashSet, VecDeque},
    fs::File,
    os::unix::io::{AsFd, BorrowedFd, OwnedFd},
    ptr::NonNull,
    rc::Rc,
};

use crate::{
    backend::{
        allocator::{BoHandle, ExportedBo, Fourcc, Modifier},
        device::{
            Connection, DeviceAddress, DeviceDriver, DeviceError, EventObject, Fence, Heap, MemDesc, MemoryContext,
        },
    },
    utils::{Buffer, Logical, Point, Rectangle, Size},
    wayland::{
        client::{
            BufferId, BufferParams, CallbackId, ClientEvent, ClientGlobals, ClientTransport, ClientWindow, CpuMapping,
            DmabufSupport, SurfaceId, WindowId,
        },
        compositor::{CompositorTransport, ScanoutSurface},
        BufferKey, DisplayIdentity, NativeHandle, SharedBuffer, TransportError,
    },
    ws::Platform,
};

fn dev_null() -> std::io::Result<OwnedFd> {
    File::open("/dev/null").map(OwnedFd::from)
}

/// Calls recorded by [`DummyDriver`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub enum DriverCall {
    Connect,
    Disconnect,
    CreateMemoryContext,
    DestroyMemoryContext,
    FindHeap,
    AcquireEventObject,
    ReleaseEventObject,
    WrapExternalMemory,
    ImportDmabuf,
    MapToDevice,
    ReleaseDeviceMapping,
    FreeMemory,
    AcquireCpuMapping,
    ReleaseCpuMapping,
    DestroyFence,
}

#[derive(Debug, Default)]
struct DriverState {
    calls: HashMap<DriverCall, usize>,
    fail: HashSet<DriverCall>,
    next_handle: u64,
    allocations: HashMap<MemDesc, Option<DeviceAddress>>,
    last_wrap: Option<(usize, usize)>,
    fences: Vec<u64>,
}

/// A device driver handing out fake handles and addresses
#[derive(Debug, Default)]
pub struct DummyDriver {
    state: RefCell<DriverState>,
    hints: HashMap<String, u32>,
}

impl DummyDriver {
    /// Size reported for every imported buffer
    pub const IMPORT_SIZE: u64 = 1 << 20;

    /// Answer `key` from the hint store with `value`
    pub fn with_hint(mut self, key: &str, value: u32) -> DummyDriver {
        self.hints.insert(key.to_owned(), value);
        self
    }

    /// Number of calls of the given kind
    pub fn count(&self, call: DriverCall) -> usize {
        self.state.borrow().calls.get(&call).copied().unwrap_or(0)
    }

    /// Make the next call of the given kind fail
    pub fn fail_next(&self, call: DriverCall) {
        self.state.borrow_mut().fail.insert(call);
    }

    /// Address and size of the last wrapped cpu region
    pub fn last_wrap(&self) -> Option<(usize, usize)> {
        self.state.borrow().last_wrap
    }

    /// Device address a memory descriptor is mapped at
    pub fn device_base(&self, memdesc: MemDesc) -> Option<DeviceAddress> {
        self.state.borrow().allocations.get(&memdesc).copied().flatten()
    }

    /// Allocations not freed yet
    pub fn live_allocations(&self) -> usize {
        self.state.borrow().allocations.len()
    }

    /// Fences handed back, in order
    pub fn destroyed_fences(&self) -> Vec<u64> {
        self.state.borrow().fences.clone()
    }

    fn record(&self, call: DriverCall) -> Result<(), DeviceError> {
        let mut state = self.state.borrow_mut();
        *state.calls.entry(call).or_insert(0) += 1;
        if state.fail.remove(&call) {
            return Err(DeviceError::Driver(-1));
        }
        Ok(())
    }

    fn next_handle(&self) -> u64 {
        let mut state = self.state.borrow_mut();
        state.next_handle += 1;
        state.next_handle
    }

    fn allocate(&self) -> MemDesc {
        let memdesc = MemDesc(self.next_handle());
        self.state.borrow_mut().allocations.insert(memdesc, None);
        memdesc
    }
}

impl DeviceDriver for DummyDriver {
    fn connect(&self) -> Result<Connection, DeviceError> {
        self.record(DriverCall::Connect)
            .map_err(|_| DeviceError::ConnectionFailed)?;
        Ok(Connection(self.next_handle()))
    }

    fn disconnect(&self, _connection: Connection) {
        let _ = self.record(DriverCall::Disconnect);
    }

    fn create_memory_context(&self, _connection: Connection) -> Result<MemoryContext, DeviceError> {
        self.record(DriverCall::CreateMemoryContext)?;
        Ok(MemoryContext(self.next_handle()))
    }

    fn destroy_memory_context(&self, _context: MemoryContext) {
        let _ = self.record(DriverCall::DestroyMemoryContext);
    }

    fn find_heap(&self, _context: MemoryContext) -> Result<Heap, DeviceError> {
        self.record(DriverCall::FindHeap)?;
        Ok(Heap(self.next_handle()))
    }

    fn acquire_event_object(&self, _connection: Connection) -> Result<EventObject, DeviceError> {
        self.record(DriverCall::AcquireEventObject)?;
        Ok(EventObject(self.next_handle()))
    }

    fn release_event_object(&self, _connection: Connection, _event: EventObject) {
        let _ = self.record(DriverCall::ReleaseEventObject);
    }

    fn wrap_external_memory(
        &self,
        _context: MemoryContext,
        address: usize,
        size: usize,
        alignment: usize,
        _name: &str,
    ) -> Result<MemDesc, DeviceError> {
        self.record(DriverCall::WrapExternalMemory)
            .map_err(|_| DeviceError::OutOfMemory)?;
        if address % alignment != 0 || size % alignment != 0 {
            return Err(DeviceError::InvalidParams);
        }
        self.state.borrow_mut().last_wrap = Some((address, size));
        Ok(self.allocate())
    }

    fn import_dmabuf(
        &self,
        _connection: Connection,
        _fd: BorrowedFd<'_>,
        _name: &str,
    ) -> Result<(MemDesc, u64), DeviceError> {
        self.record(DriverCall::ImportDmabuf)
            .map_err(|_| DeviceError::ImportFailed)?;
        Ok((self.allocate(), Self::IMPORT_SIZE))
    }

    fn map_to_device(&self, memdesc: MemDesc, _heap: Heap) -> Result<DeviceAddress, DeviceError> {
        self.record(DriverCall::MapToDevice)?;
        let address = DeviceAddress(0x1_0000_0000 + (memdesc.0 << 24));
        let mut state = self.state.borrow_mut();
        let slot = state
            .allocations
            .get_mut(&memdesc)
            .ok_or(DeviceError::InvalidParams)?;
        *slot = Some(address);
        Ok(address)
    }

    fn release_device_mapping(&self, memdesc: MemDesc) {
        let _ = self.record(DriverCall::ReleaseDeviceMapping);
        if let Some(slot) = self.state.borrow_mut().allocations.get_mut(&memdesc) {
            *slot = None;
        }
    }

    fn free_memory(&self, memdesc: MemDesc) {
        let _ = self.record(DriverCall::FreeMemory);
        self.state.borrow_mut().allocations.remove(&memdesc);
    }

    fn acquire_cpu_mapping(&self, _memdesc: MemDesc) -> Result<NonNull<u8>, DeviceError> {
        self.record(DriverCall::AcquireCpuMapping)?;
        Ok(NonNull::dangling())
    }

    fn release_cpu_mapping(&self, _memdesc: MemDesc) {
        let _ = self.record(DriverCall::ReleaseCpuMapping);
    }

    fn destroy_fence(&self, _connection: Connection, fence: Fence) {
        let _ = self.record(DriverCall::DestroyFence);
        self.state.borrow_mut().fences.push(fence.0);
    }

    fn hint(&self, key: &str) -> Option<u32> {
        self.hints.get(key).copied()
    }
}

/// Everything a [`DummyClient`] was asked to do
#[derive(Debug)]
pub struct ClientState {
    /// Globals advertised by the server
    pub globals: ClientGlobals,
    /// Version of the surface protocol
    pub surface_version: u32,
    /// Whether a blocking dispatch fires every outstanding callback
    pub answer_callbacks: bool,
    /// Fail the creation of the event queue
    pub fail_event_queue: bool,
    /// Fail every presentable buffer creation
    pub fail_buffer_creation: bool,
    /// Number of buffer objects that can be allocated before allocation fails
    pub allocation_limit: Option<usize>,

    /// Events delivered by any dispatch
    pub pending: VecDeque<ClientEvent>,
    /// Events delivered by blocking dispatches only
    pub deferred: VecDeque<ClientEvent>,
    /// Buffer objects allocated so far
    pub allocations: usize,
    /// Buffer objects not freed yet
    pub live_bos: HashSet<BoHandle>,
    /// Presentable buffers created through dmabuf params
    pub dmabuf_buffers: Vec<(BufferId, Modifier)>,
    /// Presentable buffers created through the kms global
    pub kms_buffers: Vec<BufferId>,
    /// Presentable buffers destroyed
    pub destroyed_buffers: Vec<BufferId>,
    /// Attach requests with their offset
    pub attached: Vec<(SurfaceId, BufferId, Point<i32, Logical>)>,
    /// Surface-local damage
    pub damage: Vec<Rectangle<i32, Logical>>,
    /// Buffer damage
    pub buffer_damage: Vec<Rectangle<i32, Buffer>>,
    /// Surface commits
    pub commits: usize,
    /// Frame callbacks requested
    pub frames: Vec<CallbackId>,
    /// Display sync callbacks requested
    pub syncs: Vec<CallbackId>,
    /// Callbacks neither fired nor destroyed
    pub outstanding: Vec<CallbackId>,
    /// Callbacks destroyed before they fired
    pub destroyed_callbacks: Vec<CallbackId>,
    /// Dispatches that were allowed to block
    pub blocking_dispatches: usize,
    /// Flushes of the connection
    pub flushes: usize,
    /// Shared buffers mapped for cpu access
    pub mapped: usize,
    /// Cpu mappings of shared buffers dropped
    pub unmapped: usize,
    /// Shared buffers with a destroy watch
    pub watched: Vec<BufferKey>,
    next_id: u32,
}

impl Default for ClientState {
    fn default() -> Self {
        ClientState {
            globals: ClientGlobals {
                dmabuf: Some(DmabufSupport {
                    formats: vec![Fourcc::Argb8888, Fourcc::Xrgb8888],
                    modifier: Modifier::Linear,
                }),
                kms: true,
            },
            surface_version: 4,
            answer_callbacks: true,
            fail_event_queue: false,
            fail_buffer_creation: false,
            allocation_limit: None,
            pending: VecDeque::new(),
            deferred: VecDeque::new(),
            allocations: 0,
            live_bos: HashSet::new(),
            dmabuf_buffers: Vec::new(),
            kms_buffers: Vec::new(),
            destroyed_buffers: Vec::new(),
            attached: Vec::new(),
            damage: Vec::new(),
            buffer_damage: Vec::new(),
            commits: 0,
            frames: Vec::new(),
            syncs: Vec::new(),
            outstanding: Vec::new(),
            destroyed_callbacks: Vec::new(),
            blocking_dispatches: 0,
            flushes: 0,
            mapped: 0,
            unmapped: 0,
            watched: Vec::new(),
            next_id: 0,
        }
    }
}

impl ClientState {
    fn next_id(&mut self) -> u32 {
        self.next_id += 1;
        self.next_id
    }

    fn callback(&mut self) -> CallbackId {
        let callback = CallbackId(self.next_id());
        self.outstanding.push(callback);
        callback
    }
}

/// A client transport talking to a scripted display server
#[derive(Debug, Clone, Default)]
pub struct DummyClient {
    state: Rc<RefCell<ClientState>>,
}

impl DummyClient {
    /// Recorded state
    pub fn state(&self) -> Ref<'_, ClientState> {
        self.state.borrow()
    }

    /// Recorded state, for scripting the server
    pub fn state_mut(&self) -> RefMut<'_, ClientState> {
        self.state.borrow_mut()
    }

    /// Queue a release of `buffer`, delivered on the next dispatch
    pub fn release(&self, buffer: BufferId) {
        self.state
            .borrow_mut()
            .pending
            .push_back(ClientEvent::BufferReleased(buffer));
    }

    /// Queue a release of `buffer`, delivered once the client blocks
    pub fn release_later(&self, buffer: BufferId) {
        self.state
            .borrow_mut()
            .deferred
            .push_back(ClientEvent::BufferReleased(buffer));
    }

    /// Buffers in the order they were attached
    pub fn attached_buffers(&self) -> Vec<BufferId> {
        self.state.borrow().attached.iter().map(|(_, buffer, _)| *buffer).collect()
    }
}

impl NativeHandle for DummyClient {
    fn identity(&self) -> DisplayIdentity {
        DisplayIdentity::CLIENT_DISPLAY
    }
}

impl ClientTransport for DummyClient {
    fn create_event_queue(&mut self) -> Result<(), TransportError> {
        if self.state.borrow().fail_event_queue {
            return Err(TransportError::ConnectionLost);
        }
        Ok(())
    }

    fn bind_globals(&mut self) -> Result<ClientGlobals, TransportError> {
        Ok(self.state.borrow().globals.clone())
    }

    fn dispatch_pending(&mut self, events: &mut Vec<ClientEvent>) -> Result<usize, TransportError> {
        let mut state = self.state.borrow_mut();
        let count = state.pending.len();
        events.extend(state.pending.drain(..));
        Ok(count)
    }

    fn dispatch(&mut self, events: &mut Vec<ClientEvent>) -> Result<usize, TransportError> {
        let mut state = self.state.borrow_mut();
        state.blocking_dispatches += 1;
        let mut count = state.pending.len() + state.deferred.len();
        events.extend(state.pending.drain(..));
        events.extend(state.deferred.drain(..));
        if state.answer_callbacks {
            count += state.outstanding.len();
            events.extend(state.outstanding.drain(..).map(ClientEvent::CallbackDone));
        }
        if count == 0 {
            // the server would never answer, fail instead of hanging the test
            return Err(TransportError::Dispatch);
        }
        Ok(count)
    }

    fn flush(&mut self) -> Result<(), TransportError> {
        self.state.borrow_mut().flushes += 1;
        Ok(())
    }

    fn allocate_bo(&mut self, width: u32, _height: u32, _format: Fourcc) -> Result<ExportedBo, TransportError> {
        let mut state = self.state.borrow_mut();
        if state.allocation_limit.map_or(false, |limit| state.allocations >= limit) {
            return Err(TransportError::Allocation);
        }
        state.allocations += 1;
        let handle = BoHandle(state.next_id());
        let fd = dev_null()?;
        state.live_bos.insert(handle);
        Ok(ExportedBo {
            handle,
            fd,
            pitch: width * 4,
        })
    }

    fn destroy_bo(&mut self, handle: BoHandle) {
        self.state.borrow_mut().live_bos.remove(&handle);
    }

    fn create_dmabuf_buffer(&mut self, params: &BufferParams<'_>) -> Result<BufferId, TransportError> {
        let mut state = self.state.borrow_mut();
        if state.fail_buffer_creation {
            return Err(TransportError::BufferRejected);
        }
        let buffer = BufferId(state.next_id());
        state.dmabuf_buffers.push((buffer, params.modifier));
        Ok(buffer)
    }

    fn create_kms_buffer(&mut self, _params: &BufferParams<'_>) -> Result<BufferId, TransportError> {
        let mut state = self.state.borrow_mut();
        if state.fail_buffer_creation {
            return Err(TransportError::BufferRejected);
        }
        let buffer = BufferId(state.next_id());
        state.kms_buffers.push(buffer);
        Ok(buffer)
    }

    fn destroy_buffer(&mut self, buffer: BufferId) {
        self.state.borrow_mut().destroyed_buffers.push(buffer);
    }

    fn surface_version(&self, _surface: SurfaceId) -> u32 {
        self.state.borrow().surface_version
    }

    fn attach(&mut self, surface: SurfaceId, buffer: BufferId, offset: Point<i32, Logical>) {
        self.state.borrow_mut().attached.push((surface, buffer, offset));
    }

    fn damage(&mut self, _surface: SurfaceId, damage: Rectangle<i32, Logical>) {
        self.state.borrow_mut().damage.push(damage);
    }

    fn damage_buffer(&mut self, _surface: SurfaceId, damage: Rectangle<i32, Buffer>) {
        self.state.borrow_mut().buffer_damage.push(damage);
    }

    fn commit(&mut self, _surface: SurfaceId) {
        self.state.borrow_mut().commits += 1;
    }

    fn frame(&mut self, _surface: SurfaceId) -> CallbackId {
        let mut state = self.state.borrow_mut();
        let callback = state.callback();
        state.frames.push(callback);
        callback
    }

    fn sync(&mut self) -> CallbackId {
        let mut state = self.state.borrow_mut();
        let callback = state.callback();
        state.syncs.push(callback);
        callback
    }

    fn destroy_callback(&mut self, callback: CallbackId) {
        let mut state = self.state.borrow_mut();
        state.outstanding.retain(|c| *c != callback);
        state.destroyed_callbacks.push(callback);
    }

    fn map_shared(&mut self, buffer: &dyn SharedBuffer) -> Result<CpuMapping, TransportError> {
        self.state.borrow_mut().mapped += 1;
        let len = buffer.stride() as usize * buffer.size().h as usize;
        let ptr = NonNull::new((0x4000_0000 + (buffer.key().0 as usize) * 0x100_0000) as *mut u8)
            .unwrap_or(NonNull::dangling());
        Ok(CpuMapping { ptr, len })
    }

    fn unmap_shared(&mut self, _mapping: CpuMapping) {
        self.state.borrow_mut().unmapped += 1;
    }

    fn watch_destroy(&mut self, buffer: &dyn SharedBuffer) {
        self.state.borrow_mut().watched.push(buffer.key());
    }
}

/// Everything a [`DummyCompositor`] was asked to do
#[derive(Debug, Default)]
pub struct CompositorState {
    /// Buffer objects exported as dma-bufs
    pub exported: Vec<BoHandle>,
    /// Fail every export
    pub fail_export: bool,
    /// Shared buffers with a destroy watch
    pub watched: Vec<BufferKey>,
}

/// A buffer-management device exporting every buffer as `/dev/null`
#[derive(Debug, Clone, Default)]
pub struct DummyCompositor {
    state: Rc<RefCell<CompositorState>>,
}

impl DummyCompositor {
    /// Recorded state
    pub fn state(&self) -> Ref<'_, CompositorState> {
        self.state.borrow()
    }

    /// Recorded state, for injecting failures
    pub fn state_mut(&self) -> RefMut<'_, CompositorState> {
        self.state.borrow_mut()
    }
}

impl NativeHandle for DummyCompositor {
    fn identity(&self) -> DisplayIdentity {
        DisplayIdentity::SCANOUT_DEVICE
    }
}

impl CompositorTransport for DummyCompositor {
    fn export_shared(&mut self, handle: BoHandle) -> Result<OwnedFd, TransportError> {
        let mut state = self.state.borrow_mut();
        if state.fail_export {
            return Err(TransportError::Allocation);
        }
        state.exported.push(handle);
        Ok(dev_null()?)
    }

    fn watch_destroy(&mut self, buffer: &dyn SharedBuffer) {
        self.state.borrow_mut().watched.push(buffer.key());
    }
}

#[derive(Debug)]
struct WindowState {
    size: Size<i32, Buffer>,
    offset: Point<i32, Logical>,
    attached: Option<Size<i32, Buffer>>,
}

/// A native client window that can be resized by the test
#[derive(Debug, Clone)]
pub struct DummyWindow {
    id: WindowId,
    state: Rc<RefCell<WindowState>>,
}

impl DummyWindow {
    /// A window of the given size without a pending offset
    pub fn new(id: u64, width: i32, height: i32) -> DummyWindow {
        DummyWindow {
            id: WindowId(id),
            state: Rc::new(RefCell::new(WindowState {
                size: (width, height).into(),
                offset: Point::default(),
                attached: None,
            })),
        }
    }

    /// Change the size reported to the window system
    pub fn resize(&self, width: i32, height: i32) {
        self.state.borrow_mut().size = (width, height).into();
    }

    /// Queue an offset for the next attach
    pub fn set_offset(&self, x: i32, y: i32) {
        self.state.borrow_mut().offset = (x, y).into();
    }

    /// Size recorded at the last attach
    pub fn attached_size(&self) -> Option<Size<i32, Buffer>> {
        self.state.borrow().attached
    }
}

impl ClientWindow for DummyWindow {
    fn id(&self) -> WindowId {
        self.id
    }

    fn surface(&self) -> SurfaceId {
        SurfaceId(self.id.0 as u32)
    }

    fn size(&self) -> Size<i32, Buffer> {
        self.state.borrow().size
    }

    fn take_offset(&self) -> Point<i32, Logical> {
        std::mem::take(&mut self.state.borrow_mut().offset)
    }

    fn set_attached_size(&self, size: Size<i32, Buffer>) {
        self.state.borrow_mut().attached = Some(size);
    }
}

/// Everything a [`DummySurface`] was asked to do
#[derive(Debug)]
pub struct SurfaceState {
    /// Dimensions in pixels
    pub size: Size<i32, Buffer>,
    /// Pixel format
    pub format: Fourcc,
    /// Which buffer objects exist
    pub present: [bool; 2],
    /// Fail every allocation
    pub fail_allocation: bool,
    /// Buffer objects allocated through the surface
    pub allocated: Vec<usize>,
    /// Buffer objects freed
    pub freed: Vec<usize>,
    /// Current front buffer
    pub front: Option<usize>,
    /// Every buffer made front, in order
    pub fronts: Vec<usize>,
    /// Buffers held by the scanout code
    pub locked: HashSet<usize>,
}

/// A scanout surface with two buffer slots
#[derive(Debug, Clone)]
pub struct DummySurface {
    state: Rc<RefCell<SurfaceState>>,
}

impl DummySurface {
    /// A surface whose buffers already exist
    pub fn new(width: i32, height: i32) -> DummySurface {
        DummySurface {
            state: Rc::new(RefCell::new(SurfaceState {
                size: (width, height).into(),
                format: Fourcc::Argb8888,
                present: [true, true],
                fail_allocation: false,
                allocated: Vec::new(),
                freed: Vec::new(),
                front: None,
                fronts: Vec::new(),
                locked: HashSet::new(),
            })),
        }
    }

    /// A surface whose buffers have to be allocated
    pub fn empty(width: i32, height: i32) -> DummySurface {
        let surface = DummySurface::new(width, height);
        surface.state.borrow_mut().present = [false, false];
        surface
    }

    /// Recorded state
    pub fn state(&self) -> Ref<'_, SurfaceState> {
        self.state.borrow()
    }

    /// Recorded state, for scripting the scanout code
    pub fn state_mut(&self) -> RefMut<'_, SurfaceState> {
        self.state.borrow_mut()
    }

    /// Simulate the scanout code holding or dropping a buffer
    pub fn set_locked(&self, index: usize, locked: bool) {
        let mut state = self.state.borrow_mut();
        if locked {
            state.locked.insert(index);
        } else {
            state.locked.remove(&index);
        }
    }

    fn export(&self, index: usize) -> Result<ExportedBo, TransportError> {
        Ok(ExportedBo {
            handle: BoHandle(100 + index as u32),
            fd: dev_null()?,
            pitch: self.state.borrow().size.w as u32 * 4,
        })
    }
}

impl ScanoutSurface for DummySurface {
    fn size(&self) -> Size<i32, Buffer> {
        self.state.borrow().size
    }

    fn format(&self) -> Fourcc {
        self.state.borrow().format
    }

    fn buffer(&self, index: usize) -> Result<Option<ExportedBo>, TransportError> {
        if !self.state.borrow().present.get(index).copied().unwrap_or(false) {
            return Ok(None);
        }
        self.export(index).map(Some)
    }

    fn allocate_buffer(&self, index: usize) -> Result<ExportedBo, TransportError> {
        {
            let mut state = self.state.borrow_mut();
            if state.fail_allocation || index >= state.present.len() {
                return Err(TransportError::Allocation);
            }
            state.present[index] = true;
            state.allocated.push(index);
        }
        self.export(index)
    }

    fn free_buffer(&self, index: usize) {
        let mut state = self.state.borrow_mut();
        if let Some(present) = state.present.get_mut(index) {
            *present = false;
        }
        state.freed.push(index);
    }

    fn set_front(&self, index: usize) {
        let mut state = self.state.borrow_mut();
        state.front = Some(index);
        state.fronts.push(index);
    }

    fn front(&self) -> Option<usize> {
        self.state.borrow().front
    }

    fn is_locked(&self, index: usize) -> bool {
        self.state.borrow().locked.contains(&index)
    }
}

/// A shared protocol buffer
#[derive(Debug)]
pub struct DummyBuffer {
    key: BufferKey,
    size: Size<i32, Buffer>,
    stride: u32,
    format: Fourcc,
    fd: Option<OwnedFd>,
}

impl DummyBuffer {
    /// A buffer without an exported dma-buf, `stride` in bytes
    pub fn new(key: u64, width: i32, height: i32, stride: u32, format: Fourcc) -> DummyBuffer {
        DummyBuffer {
            key: BufferKey(key),
            size: (width, height).into(),
            stride,
            format,
            fd: None,
        }
    }

    /// Attach an exported dma-buf to the buffer
    pub fn with_fd(mut self) -> DummyBuffer {
        self.fd = dev_null().ok();
        self
    }
}

impl SharedBuffer for DummyBuffer {
    fn key(&self) -> BufferKey {
        self.key
    }

    fn size(&self) -> Size<i32, Buffer> {
        self.size
    }

    fn stride(&self) -> u32 {
        self.stride
    }

    fn format(&self) -> Fourcc {
        self.format
    }

    fn handle(&self) -> BoHandle {
        BoHandle(self.key.0 as u32)
    }

    fn fd(&self) -> Option<BorrowedFd<'_>> {
        self.fd.as_ref().map(|fd| fd.as_fd())
    }
}

/// A native display object carrying an arbitrary type marker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DummyNative(pub DisplayIdentity);

impl NativeHandle for DummyNative {
    fn identity(&self) -> DisplayIdentity {
        self.0
    }
}

/// Platform handing out clones of its dummy transports
#[derive(Debug, Default)]
pub struct DummyPlatform {
    /// Transport handed out for client displays
    pub client: DummyClient,
    /// Transport handed out for compositor displays
    pub compositor: DummyCompositor,
    /// Fail connecting the default display
    pub fail_connect: Cell<bool>,
    connections: Cell<usize>,
}

impl DummyPlatform {
    /// Transports handed out so far
    pub fn connections(&self) -> usize {
        self.connections.get()
    }
}

impl Platform for DummyPlatform {
    type Driver = DummyDriver;
    type Native = DummyNative;
    type Client = DummyClient;
    type Compositor = DummyCompositor;
    type Window = DummyWindow;
    type Surface = DummySurface;
    type Pixmap = DummyBuffer;

    fn connect_default(&self) -> Result<DummyClient, TransportError> {
        if self.fail_connect.get() {
            return Err(TransportError::ConnectionLost);
        }
        self.connections.set(self.connections.get() + 1);
        Ok(self.client.clone())
    }

    fn client_from_native(&self, _native: DummyNative) -> Result<DummyClient, TransportError> {
        self.connections.set(self.connections.get() + 1);
        Ok(self.client.clone())
    }

    fn compositor_from_native(&self, _native: DummyNative) -> Result<DummyCompositor, TransportError> {
        self.connections.set(self.connections.get() + 1);
        Ok(self.compositor.clone())
    }
}
