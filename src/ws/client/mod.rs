//! Client side of the window system
//!
//! Windows own a ring of buffer objects allocated through the transport. A slot goes back into
//! the ring only when the display server releases its buffer, so waiting for a free slot means
//! dispatching the private event queue until a release arrives.

use std::{
    collections::HashMap,
    fmt,
    os::unix::io::AsFd,
    ptr::NonNull,
};

use tracing::{debug, error, instrument, trace, warn};

use super::{
    drawable::{Drawable, DrawableKind, DrawableTable},
    DrawableId, DrawableState, Implementation, MemoryPixmap, NativeEngine, NativePixmap, NativeWindow,
    Platform, WindowSystem,
};
use crate::{
    backend::{
        allocator::{BackBufferRing, ExportedBo, Fourcc, SlotId},
        device::{
            BufferLayout, DeviceContext, DeviceDriver, DeviceSession, DrawableParams, Fence, ImageParams, Mapping,
        },
    },
    config::Tunables,
    error::{Result, WsError},
    format::{Capability, Config, DrawableTypes, PixelFormat, YuvInfo, CLIENT_CAPS},
    utils::{Gl, Rectangle},
    wayland::{
        client::{BufferId, CallbackId, ClientEvent, ClientGlobals, ClientTransport, ClientWindow, CpuMapping, WindowId},
        BufferKey, SharedBuffer, TransportError,
    },
};

mod present;

const WINDOW_BUFFER_NAME: &str = "wsglue_client";

/// Smallest and largest side of a memory pixmap
const MEMORY_PIXMAP_SIDES: std::ops::RangeInclusive<i32> = 16..=8192;

#[derive(Debug)]
pub(crate) struct ClientSlot {
    bo: ExportedBo,
    mapping: Option<Mapping>,
    buffer: Option<BufferId>,
}

#[derive(Debug)]
pub(crate) struct WindowBody<W> {
    window: W,
    ring: BackBufferRing<ClientSlot>,
}

#[derive(Debug)]
enum PixmapMemory {
    Shared(CpuMapping),
    Memory(NonNull<u8>),
}

#[derive(Debug)]
pub(crate) struct PixmapBody {
    mapping: Option<Mapping>,
    memory: PixmapMemory,
}

#[derive(Debug)]
pub(crate) enum ClientBody<W> {
    Window(WindowBody<W>),
    Pixmap(PixmapBody),
}

/// State owned by the native window rather than by one of its drawables
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct WindowBinding {
    owner: DrawableId,
    interval: u32,
    frame: Option<CallbackId>,
}

impl WindowBinding {
    fn new(owner: DrawableId) -> WindowBinding {
        WindowBinding {
            owner,
            interval: 1,
            frame: None,
        }
    }
}

/// Display of a client connected to a display server
pub struct ClientDisplay<P: Platform> {
    transport: P::Client,
    context: DeviceContext<P::Driver>,
    tunables: Tunables,
    globals: ClientGlobals,
    drawables: DrawableTable<ClientBody<P::Window>>,
    buffers: HashMap<BufferId, (DrawableId, SlotId)>,
    windows: HashMap<WindowId, WindowBinding>,
    sync_callback: Option<CallbackId>,
    events: Vec<ClientEvent>,
}

impl<P: Platform> fmt::Debug for ClientDisplay<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientDisplay")
            .field("tunables", &self.tunables)
            .field("globals", &self.globals)
            .field("drawables", &self.drawables.len())
            .field("sync_callback", &self.sync_callback)
            .finish_non_exhaustive()
    }
}

impl<P: Platform> ClientDisplay<P> {
    /// Initialise a display on top of a client transport
    ///
    /// Creates the private event queue, binds the buffer-sharing globals and acquires the device
    /// context. Everything acquired is released again on failure.
    pub fn new(mut transport: P::Client, session: &DeviceSession<P::Driver>) -> Result<ClientDisplay<P>> {
        transport.create_event_queue().map_err(|err| {
            error!(?err, "Failed to create the event queue");
            WsError::BadNativeDisplay
        })?;
        let globals = transport.bind_globals().map_err(|err| {
            error!(?err, "Failed to bind the display globals");
            WsError::BadNativeDisplay
        })?;

        match &globals.dmabuf {
            Some(dmabuf) => {
                if !dmabuf
                    .formats
                    .iter()
                    .any(|format| matches!(format, Fourcc::Argb8888 | Fourcc::Xrgb8888))
                {
                    error!(formats = ?dmabuf.formats, "No usable dma-buf format advertised");
                    return Err(WsError::BadNativeDisplay);
                }
            }
            None if !globals.kms => {
                error!("Neither dma-buf nor kms buffer sharing is available");
                return Err(WsError::BadNativeDisplay);
            }
            None => debug!("Dma-buf unavailable, falling back to kms buffers"),
        }

        let context = session.connect()?;
        let tunables = Tunables::load(&|key: &str| context.hint(key));
        debug!(?tunables, dmabuf = globals.dmabuf.is_some(), "Client display ready");

        Ok(ClientDisplay {
            transport,
            context,
            tunables,
            globals,
            drawables: DrawableTable::default(),
            buffers: HashMap::new(),
            windows: HashMap::new(),
            sync_callback: None,
            events: Vec::new(),
        })
    }

    /// Tunables the display was initialised with
    pub fn tunables(&self) -> Tunables {
        self.tunables
    }

    /// Dispatch the event queue and route the events
    fn pump(&mut self, blocking: bool) -> Result<(), TransportError> {
        let mut events = std::mem::take(&mut self.events);
        let result = if blocking {
            self.transport.dispatch(&mut events)
        } else {
            self.transport.dispatch_pending(&mut events)
        };
        for event in events.drain(..) {
            self.route(event);
        }
        self.events = events;
        result.map(|_| ())
    }

    fn route(&mut self, event: ClientEvent) {
        match event {
            ClientEvent::BufferReleased(buffer) => {
                let Some(&(id, slot)) = self.buffers.get(&buffer) else {
                    warn!(?buffer, "Release of an unknown buffer");
                    self.transport.destroy_buffer(buffer);
                    return;
                };
                if let Ok(Drawable {
                    body: ClientBody::Window(window),
                    ..
                }) = self.drawables.get_mut(id)
                {
                    if window.ring.release_slot(slot) {
                        trace!(?id, ?slot, "Buffer released");
                    }
                }
            }
            ClientEvent::CallbackDone(callback) => {
                if self.sync_callback == Some(callback) {
                    self.sync_callback = None;
                }
                for binding in self.windows.values_mut() {
                    if binding.frame == Some(callback) {
                        binding.frame = None;
                    }
                }
                trace!(?callback, "Callback done");
                self.transport.destroy_callback(callback);
            }
        }
    }

    fn frame_pending(&self, window: WindowId) -> bool {
        self.windows.get(&window).map_or(false, |binding| binding.frame.is_some())
    }

    fn interval(&self, window: WindowId) -> u32 {
        self.windows.get(&window).map(|binding| binding.interval).unwrap_or(1)
    }

    /// Wait until the window has a current slot that may be rendered into
    fn wait_for_slot(&mut self, id: DrawableId) -> Result<SlotId> {
        let slot = loop {
            self.pump(false).map_err(|err| {
                error!(?err, "Dispatching pending events failed");
                WsError::BadDrawable
            })?;

            let Drawable {
                body: ClientBody::Window(window),
                ..
            } = self.drawables.get_mut(id)?
            else {
                return Err(WsError::BadDrawable);
            };
            if let Some(slot) = window.ring.ensure_current() {
                if window.ring.slot(slot).is_locked() {
                    // the last swap of this slot failed and its buffer is still held
                    debug!(?id, ?slot, "Current buffer is still locked");
                    return Err(WsError::BadDrawable);
                }
                break slot;
            }

            trace!(?id, "No free buffer, waiting for a release");
            if self.tunables.aggressive_sync && self.sync_callback.is_none() {
                self.sync_callback = Some(self.transport.sync());
                if let Err(err) = self.transport.flush() {
                    warn!(?err, "Failed to flush the sync request");
                }
            }
            self.pump(true).map_err(|err| {
                error!(?err, "Dispatch failed while waiting for a free buffer");
                WsError::BadDrawable
            })?;
        };

        // the server sometimes drops the answer, never keep a stale sync around
        if let Some(callback) = self.sync_callback.take() {
            trace!(?callback, "Dropping leftover display sync");
            self.transport.destroy_callback(callback);
        }
        Ok(slot)
    }

    fn create_shared_pixmap(&mut self, buffer: P::Pixmap) -> Result<DrawableId> {
        let key = buffer.key();
        if let Some(id) = self.drawables.retain_shared(key) {
            return Ok(id);
        }

        let format = match buffer.format() {
            Fourcc::Argb8888 => PixelFormat::Argb8888,
            Fourcc::Xrgb8888 => PixelFormat::Xrgb8888,
            format => {
                debug!(%format, "Unsupported shared pixmap format");
                return Err(WsError::BadNativePixmap);
            }
        };
        let size = buffer.size();
        if size.is_empty() {
            return Err(WsError::BadNativePixmap);
        }

        let cpu = self.transport.map_shared(&buffer).map_err(|err| {
            error!(?err, ?key, "Failed to map the shared buffer");
            WsError::BadNativePixmap
        })?;
        let mapping = match self.context.bind_external_memory(cpu.ptr.as_ptr(), cpu.len) {
            Ok(mapping) => mapping,
            Err(err) => {
                error!(?err, ?key, "Failed to bind the shared buffer");
                self.transport.unmap_shared(cpu);
                return Err(WsError::BadNativePixmap);
            }
        };
        self.transport.watch_destroy(&buffer);

        let pitch = buffer.stride();
        let layout = BufferLayout {
            width: size.w,
            height: size.h,
            stride: pitch / 4,
            pitch,
            size: u64::from(pitch) * size.h as u64,
            format,
            yuv: YuvInfo::default(),
        };
        let body = ClientBody::Pixmap(PixmapBody {
            mapping: Some(mapping),
            memory: PixmapMemory::Shared(cpu),
        });
        Ok(self.drawables.insert(DrawableKind::Pixmap, layout, Some(key), body))
    }

    fn create_memory_pixmap(&mut self, pixmap: MemoryPixmap) -> Result<DrawableId> {
        let layout = memory_pixmap_layout(&pixmap)?;
        let pixels = NonNull::new(pixmap.pixels as *mut u8).ok_or(WsError::BadNativePixmap)?;
        let mapping = self
            .context
            .bind_external_memory(pixmap.pixels, layout.size as usize)
            .map_err(|err| {
                error!(?err, "Failed to bind the pixmap memory");
                WsError::BadNativePixmap
            })?;

        let body = ClientBody::Pixmap(PixmapBody {
            mapping: Some(mapping),
            memory: PixmapMemory::Memory(pixels),
        });
        Ok(self.drawables.insert(DrawableKind::Pixmap, layout, None, body))
    }

    /// Release everything a finalized drawable holds
    fn destroy(&mut self, id: DrawableId, drawable: Drawable<ClientBody<P::Window>>) {
        match drawable.body {
            ClientBody::Window(window) => {
                let window_id = window.window.id();
                for slot in window.ring.into_buffers() {
                    release_slot(&mut self.transport, &self.context, &mut self.buffers, slot);
                }
                // a superseded generation leaves the window's callbacks to its successor
                if self.windows.get(&window_id).map(|binding| binding.owner) == Some(id) {
                    if let Some(frame) = self.windows.remove(&window_id).and_then(|binding| binding.frame) {
                        self.transport.destroy_callback(frame);
                    }
                    if let Some(callback) = self.sync_callback.take() {
                        self.transport.destroy_callback(callback);
                    }
                }
            }
            ClientBody::Pixmap(pixmap) => {
                self.context.unbind(pixmap.mapping);
                if let PixmapMemory::Shared(cpu) = pixmap.memory {
                    self.transport.unmap_shared(cpu);
                }
            }
        }
        debug!(?id, kind = ?drawable.kind, "Drawable destroyed");
    }
}

fn release_slot<T: ClientTransport, D: DeviceDriver>(
    transport: &mut T,
    context: &DeviceContext<D>,
    buffers: &mut HashMap<BufferId, (DrawableId, SlotId)>,
    mut slot: ClientSlot,
) {
    context.unbind(slot.mapping.take());
    if let Some(buffer) = slot.buffer.take() {
        buffers.remove(&buffer);
        transport.destroy_buffer(buffer);
    }
    transport.destroy_bo(slot.bo.handle);
}

/// Validate a memory pixmap and compute its layout
fn memory_pixmap_layout(pixmap: &MemoryPixmap) -> Result<BufferLayout> {
    let format = pixmap.format.pixel_format().ok_or(WsError::BadNativePixmap)?;
    if !MEMORY_PIXMAP_SIDES.contains(&pixmap.width)
        || pixmap.width % 2 != 0
        || !MEMORY_PIXMAP_SIDES.contains(&pixmap.height)
        || pixmap.stride % 2 != 0
        || pixmap.stride < pixmap.width as u32
        || pixmap.pixels.is_null()
        || pixmap.pixels as usize % 16 != 0
    {
        debug!(?pixmap, "Invalid memory pixmap");
        return Err(WsError::BadNativePixmap);
    }

    let bpp = format.bits_per_pixel();
    let pitch = if format.is_420() {
        pixmap.stride
    } else {
        pixmap.stride * bpp / 8
    };
    Ok(BufferLayout {
        width: pixmap.width,
        height: pixmap.height,
        stride: pixmap.stride,
        pitch,
        size: u64::from(pixmap.stride) * pixmap.height as u64 * u64::from(bpp) / 8,
        format,
        yuv: pixmap.format.yuv_info(),
    })
}

impl<P: Platform> WindowSystem<P> for ClientDisplay<P> {
    fn implementation(&self) -> Implementation {
        Implementation::Client
    }

    fn capabilities(&self) -> &'static [(Capability, u32)] {
        &CLIENT_CAPS
    }

    #[instrument(level = "debug", skip_all, fields(format = ?config.format))]
    fn create_window(&mut self, config: &Config, window: NativeWindow<P>) -> Result<DrawableId> {
        let NativeWindow::Client(window) = window else {
            return Err(WsError::BadNativeWindow);
        };
        if !config.drawable_types.contains(DrawableTypes::WINDOW) {
            return Err(WsError::BadMatch);
        }
        let size = window.size();
        if size.is_empty() {
            return Err(WsError::BadNativeWindow);
        }

        let stride = (size.w as u32 + 31) & !31;
        let format = config.format;
        let fourcc = format.fourcc();
        let context = &self.context;
        let buffers = &mut self.buffers;
        let mut pending = scopeguard::guard(
            (&mut self.transport, Vec::with_capacity(self.tunables.back_buffers)),
            |(transport, slots)| {
                for slot in slots {
                    release_slot(transport, context, buffers, slot);
                }
            },
        );
        for _ in 0..self.tunables.back_buffers {
            let (transport, slots) = &mut *pending;
            let bo = transport
                .allocate_bo(stride, size.h as u32, fourcc)
                .map_err(|err| {
                    error!(?err, "Failed to allocate a window buffer");
                    WsError::OutOfMemory
                })?;
            let mapping = match context.bind_imported_buffer(bo.fd.as_fd(), WINDOW_BUFFER_NAME) {
                Ok((mapping, _)) => mapping,
                Err(err) => {
                    error!(?err, "Failed to bind a window buffer");
                    transport.destroy_bo(bo.handle);
                    return Err(err.into());
                }
            };
            slots.push(ClientSlot {
                bo,
                mapping: Some(mapping),
                buffer: None,
            });
        }
        let (_, slots) = scopeguard::ScopeGuard::into_inner(pending);

        let pitch = slots[0].bo.pitch;
        let layout = BufferLayout {
            width: size.w,
            height: size.h,
            stride,
            pitch,
            size: u64::from(pitch) * size.h as u64,
            format,
            yuv: YuvInfo::default(),
        };
        let window_id = window.id();
        let body = ClientBody::Window(WindowBody {
            window,
            ring: BackBufferRing::new(slots),
        });
        let id = self.drawables.insert(DrawableKind::Window, layout, None, body);

        // swap interval and frame callback belong to the native window and survive its drawables
        self.windows
            .entry(window_id)
            .and_modify(|binding| binding.owner = id)
            .or_insert_with(|| WindowBinding::new(id));
        debug!(?id, ?window_id, buffers = self.tunables.back_buffers, "Window created");
        Ok(id)
    }

    fn create_pixmap(&mut self, config: &Config, pixmap: NativePixmap<P>) -> Result<DrawableId> {
        if !config.drawable_types.contains(DrawableTypes::PIXMAP) {
            return Err(WsError::BadMatch);
        }
        match pixmap {
            NativePixmap::Shared(buffer) => self.create_shared_pixmap(buffer),
            NativePixmap::Memory(pixmap) => self.create_memory_pixmap(pixmap),
        }
    }

    fn delete_drawable(&mut self, id: DrawableId) -> Result<()> {
        if let Some(drawable) = self.drawables.release(id)? {
            self.destroy(id, drawable);
        }
        Ok(())
    }

    fn buffer_destroyed(&mut self, key: BufferKey) {
        if let Some((id, drawable)) = self.drawables.notify_destroyed(key) {
            trace!(?key, ?id, "Finalizing pixmap from destroy notification");
            self.destroy(id, drawable);
        }
    }

    #[instrument(level = "trace", skip(self, damage, fence), fields(rects = damage.len()))]
    fn swap_drawable(&mut self, id: DrawableId, damage: &[Rectangle<i32, Gl>], fence: Option<Fence>) -> Result<()> {
        if let Some(fence) = fence {
            self.context.destroy_fence(fence);
        }

        let drawable = self.drawables.get(id)?;
        let ClientBody::Window(window) = &drawable.body else {
            return Ok(());
        };
        if window.ring.current().is_none() {
            return Ok(());
        }
        let window_id = window.window.id();
        let interval = self.interval(window_id);

        // pace the renderer to the frame callback of the previous swap
        while self.frame_pending(window_id) {
            self.pump(true).map_err(|err| {
                error!(?err, "Dispatch failed while waiting for the frame callback");
                WsError::BadNativeWindow
            })?;
        }

        let ClientDisplay {
            transport,
            drawables,
            buffers,
            globals,
            windows,
            sync_callback,
            ..
        } = self;
        let drawable = drawables.get_mut(id)?;
        let layout = drawable.layout;
        let ClientBody::Window(window) = &mut drawable.body else {
            return Ok(());
        };
        let Some(current) = window.ring.current() else {
            return Ok(());
        };

        window.ring.mark_current_locked(current);
        let binding = windows.entry(window_id).or_insert_with(|| WindowBinding::new(id));
        let target = present::PresentTarget {
            window: &window.window,
            slot: window.ring.slot_mut(current).data_mut(),
            frame: &mut binding.frame,
            layout: &layout,
        };
        match present::present(transport, globals, target, interval, damage, sync_callback) {
            Ok(Some(buffer)) => {
                buffers.insert(buffer, (id, current));
            }
            Ok(None) => {}
            Err(err) => {
                error!(?err, ?id, slot = ?current, "Failed to present the buffer");
                return Err(WsError::BadNativeWindow);
            }
        }
        window.ring.advance();
        trace!(?id, presented = ?current, next = ?window.ring.current(), "Swapped");
        Ok(())
    }

    fn set_swap_interval(&mut self, id: DrawableId, interval: i32) -> Result<()> {
        let drawable = self.drawables.get(id)?;
        let ClientBody::Window(window) = &drawable.body else {
            return Ok(());
        };
        let interval = interval.clamp(0, 1) as u32;
        let window_id = window.window.id();
        self.windows
            .entry(window_id)
            .or_insert_with(|| WindowBinding::new(id))
            .interval = interval;
        debug!(?id, interval, "Swap interval set");
        Ok(())
    }

    fn wait_native(&mut self, id: DrawableId, engine: NativeEngine) -> Result<()> {
        self.drawables.get(id)?;
        if engine != NativeEngine::DEFAULT {
            return Err(WsError::BadNativeEngine);
        }
        Ok(())
    }

    #[instrument(level = "trace", skip(self))]
    fn get_drawable_params(&mut self, id: DrawableId) -> Result<(DrawableParams, DrawableParams)> {
        let drawable = self.drawables.get_mut(id)?;
        let layout = drawable.layout;
        match &drawable.body {
            ClientBody::Pixmap(pixmap) => {
                let mapping = pixmap.mapping.as_ref().ok_or(WsError::BadDrawable)?;
                let params = mapping.drawable_params(&layout, false, 0);
                return Ok((params, params));
            }
            ClientBody::Window(window) => {
                let size = window.window.size();
                if drawable.resized || (size.w, size.h) != (layout.width, layout.height) {
                    if !drawable.resized {
                        debug!(?id, ?size, "Native window resized");
                        drawable.resized = true;
                    }
                    return Err(WsError::BadDrawable);
                }
            }
        }

        let current = self.wait_for_slot(id)?;
        let drawable = self.drawables.get(id)?;
        let ClientBody::Window(window) = &drawable.body else {
            return Err(WsError::BadDrawable);
        };
        let slot = window.ring.slot(current);
        let render = slot
            .data()
            .mapping
            .as_ref()
            .ok_or(WsError::BadDrawable)?
            .drawable_params(&layout, true, slot.age());
        let source = match window.ring.source() {
            Some(source) => {
                let slot = window.ring.slot(source);
                slot.data()
                    .mapping
                    .as_ref()
                    .ok_or(WsError::BadDrawable)?
                    .drawable_params(&layout, true, slot.age())
            }
            None => render,
        };
        Ok((source, render))
    }

    fn get_image_params(&mut self, id: DrawableId) -> Result<ImageParams> {
        let drawable = self.drawables.get(id)?;
        match &drawable.body {
            ClientBody::Pixmap(pixmap) => pixmap
                .mapping
                .as_ref()
                .ok_or(WsError::BadDrawable)?
                .image_params(&drawable.layout),
            ClientBody::Window(_) => Err(WsError::BadMatch),
        }
    }

    fn acquire_cpu_mapping(&mut self, id: DrawableId) -> Result<NonNull<u8>> {
        let drawable = self.drawables.get(id)?;
        match &drawable.body {
            ClientBody::Pixmap(pixmap) => Ok(match &pixmap.memory {
                PixmapMemory::Shared(cpu) => cpu.ptr,
                PixmapMemory::Memory(pixels) => *pixels,
            }),
            ClientBody::Window(window) => {
                let mapping = window
                    .ring
                    .current()
                    .and_then(|current| window.ring.slot(current).data().mapping.as_ref())
                    .ok_or(WsError::BadDrawable)?;
                self.context.cpu_address(mapping.memdesc())
            }
        }
    }

    fn release_cpu_mapping(&mut self, id: DrawableId) -> Result<()> {
        let drawable = self.drawables.get(id)?;
        if let ClientBody::Window(window) = &drawable.body {
            if let Some(mapping) = window
                .ring
                .current()
                .and_then(|current| window.ring.slot(current).data().mapping.as_ref())
            {
                self.context.release_cpu_address(mapping.memdesc());
            }
        }
        Ok(())
    }

    fn drawable_state(&self, id: DrawableId) -> Option<DrawableState> {
        self.drawables.lookup(id).map(Drawable::state)
    }

    fn ref_count(&self, id: DrawableId) -> Option<u32> {
        self.drawables.refs(id)
    }
}

impl<P: Platform> Drop for ClientDisplay<P> {
    fn drop(&mut self) {
        let remaining: Vec<_> = self.drawables.drain().collect();
        if !remaining.is_empty() {
            error!(count = remaining.len(), "Display closed with live drawables");
        }
        for (id, drawable) in remaining {
            self.destroy(id, drawable);
        }
        for frame in self.windows.drain().filter_map(|(_, binding)| binding.frame) {
            self.transport.destroy_callback(frame);
        }
        if let Some(callback) = self.sync_callback.take() {
            self.transport.destroy_callback(callback);
        }
        debug!("Client display closed");
    }
}
