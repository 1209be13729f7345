//! Compositor side of the window system
//!
//! Windows are scanout surfaces with exactly two buffer objects. Presenting makes a buffer the
//! surface's front buffer; the scanout code releases it implicitly by no longer locking it once
//! another buffer became front. The compositor never blocks on a release: when no buffer is
//! free the one presented longest ago is rendered into again.

use std::{fmt, os::unix::io::AsFd, ptr::NonNull};

use smallvec::SmallVec;
use tracing::{debug, error, instrument, trace, warn};

use super::{
    drawable::{Drawable, DrawableKind, DrawableTable},
    DrawableId, DrawableState, Implementation, NativeEngine, NativePixmap, NativeWindow, Platform, WindowSystem,
};
use crate::{
    backend::{
        allocator::{BackBufferRing, ExportedBo, Fourcc, SlotId, SLOT_CAP},
        device::{
            BufferLayout, DeviceContext, DeviceDriver, DeviceSession, DrawableParams, Fence, ImageParams, Mapping,
            MemDesc,
        },
    },
    error::{Result, WsError},
    format::{Capability, Config, DrawableTypes, PixelFormat, YuvInfo, COMPOSITOR_CAPS},
    utils::{Gl, Rectangle},
    wayland::{
        compositor::{CompositorTransport, ScanoutSurface},
        BufferKey, SharedBuffer,
    },
};

const SCANOUT_BUFFERS: usize = 2;
const BUFFER_NAME: &str = "wsglue_compositor";

#[derive(Debug)]
pub(crate) struct ScanoutSlot {
    index: usize,
    bo: ExportedBo,
    allocated: bool,
    mapping: Option<Mapping>,
}

#[derive(Debug)]
pub(crate) struct ScanoutWindow<S> {
    surface: S,
    ring: BackBufferRing<ScanoutSlot>,
}

#[derive(Debug)]
pub(crate) enum ScanoutBody<S> {
    Window(ScanoutWindow<S>),
    Pixmap(Option<Mapping>),
}

/// Display of the display server itself
pub struct CompositorDisplay<P: Platform> {
    transport: P::Compositor,
    context: DeviceContext<P::Driver>,
    drawables: DrawableTable<ScanoutBody<P::Surface>>,
}

impl<P: Platform> fmt::Debug for CompositorDisplay<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompositorDisplay")
            .field("drawables", &self.drawables.len())
            .finish_non_exhaustive()
    }
}

impl<P: Platform> CompositorDisplay<P> {
    /// Initialise a display on top of a buffer-management device
    pub fn new(transport: P::Compositor, session: &DeviceSession<P::Driver>) -> Result<CompositorDisplay<P>> {
        let context = session.connect()?;
        debug!("Compositor display ready");
        Ok(CompositorDisplay {
            transport,
            context,
            drawables: DrawableTable::default(),
        })
    }

    fn window_mut(&mut self, id: DrawableId) -> Result<(BufferLayout, &mut ScanoutWindow<P::Surface>)> {
        match self.drawables.get_mut(id)? {
            Drawable {
                layout,
                body: ScanoutBody::Window(window),
                ..
            } => Ok((*layout, window)),
            _ => Err(WsError::BadDrawable),
        }
    }

    fn create_shared_pixmap(&mut self, buffer: P::Pixmap) -> Result<DrawableId> {
        let key = buffer.key();
        if let Some(id) = self.drawables.retain_shared(key) {
            return Ok(id);
        }

        let size = buffer.size();
        if size.is_empty() {
            return Err(WsError::BadNativePixmap);
        }
        let (width, height) = (size.w, size.h as u64);
        let stride = buffer.stride();
        let (format, stride_px, pitch, bytes) = match buffer.format() {
            Fourcc::Argb8888 => (PixelFormat::Argb8888, stride / 4, stride, u64::from(stride) * height),
            Fourcc::Xrgb8888 => (PixelFormat::Xrgb8888, stride / 4, stride, u64::from(stride) * height),
            Fourcc::Nv12 => (PixelFormat::Nv12, stride, stride, u64::from(stride) * height * 3 / 2),
            Fourcc::Nv16 => (PixelFormat::Nv16, stride, stride * 2, u64::from(stride) * height * 2),
            format => {
                debug!(%format, "Unsupported shared pixmap format");
                return Err(WsError::BadNativePixmap);
            }
        };

        let exported;
        let fd = match buffer.fd() {
            Some(fd) => fd,
            None => {
                let handle = buffer.handle();
                exported = self.transport.export_shared(handle).map_err(|err| {
                    error!(?err, ?key, ?handle, "Failed to export the shared buffer");
                    WsError::BadNativePixmap
                })?;
                exported.as_fd()
            }
        };
        let (mapping, _) = self.context.bind_imported_buffer(fd, BUFFER_NAME).map_err(|err| {
            error!(?err, ?key, "Failed to import the shared buffer");
            WsError::BadNativePixmap
        })?;
        self.transport.watch_destroy(&buffer);

        let layout = BufferLayout {
            width,
            height: size.h,
            stride: stride_px,
            pitch,
            size: bytes,
            format,
            yuv: YuvInfo::default(),
        };
        Ok(self
            .drawables
            .insert(DrawableKind::Pixmap, layout, Some(key), ScanoutBody::Pixmap(Some(mapping))))
    }

    /// Hand back slots the scanout code no longer holds
    fn poll_releases(window: &mut ScanoutWindow<P::Surface>) {
        let front = window.surface.front();
        let released: SmallVec<[SlotId; SLOT_CAP]> = window
            .ring
            .slots()
            .filter(|(_, slot)| {
                let index = slot.data().index;
                slot.is_locked() && Some(index) != front && !window.surface.is_locked(index)
            })
            .map(|(id, _)| id)
            .collect();
        for id in released {
            window.ring.release_slot(id);
        }
    }

    fn current_slot(id: DrawableId, window: &mut ScanoutWindow<P::Surface>) -> Result<SlotId> {
        if let Some(current) = window.ring.ensure_current() {
            return Ok(current);
        }
        let reclaimed = window.ring.reclaim_oldest().ok_or(WsError::BadDrawable)?;
        warn!(?id, slot = ?reclaimed, "No free scanout buffer, reusing the oldest one");
        Ok(reclaimed)
    }

    fn destroy(&mut self, id: DrawableId, drawable: Drawable<ScanoutBody<P::Surface>>) {
        match drawable.body {
            ScanoutBody::Window(window) => {
                let surface = window.surface;
                for slot in window.ring.into_buffers() {
                    release_slot(&surface, &self.context, slot);
                }
            }
            ScanoutBody::Pixmap(mapping) => self.context.unbind(mapping),
        }
        debug!(?id, kind = ?drawable.kind, "Drawable destroyed");
    }
}

fn release_slot<S: ScanoutSurface, D: DeviceDriver>(
    surface: &S,
    context: &DeviceContext<D>,
    mut slot: ScanoutSlot,
) {
    context.unbind(slot.mapping.take());
    if slot.allocated {
        surface.free_buffer(slot.index);
    }
}

impl<P: Platform> WindowSystem<P> for CompositorDisplay<P> {
    fn implementation(&self) -> Implementation {
        Implementation::Compositor
    }

    fn capabilities(&self) -> &'static [(Capability, u32)] {
        &COMPOSITOR_CAPS
    }

    #[instrument(level = "debug", skip_all)]
    fn create_window(&mut self, config: &Config, window: NativeWindow<P>) -> Result<DrawableId> {
        let NativeWindow::Scanout(surface) = window else {
            return Err(WsError::BadNativeWindow);
        };
        if !config.drawable_types.contains(DrawableTypes::WINDOW) {
            return Err(WsError::BadMatch);
        }
        let size = surface.size();
        if size.is_empty() {
            return Err(WsError::BadNativeWindow);
        }
        let format = match surface.format() {
            Fourcc::Argb8888 => PixelFormat::Argb8888,
            Fourcc::Xrgb8888 => PixelFormat::Xrgb8888,
            format => {
                debug!(%format, "Unsupported scanout surface format");
                return Err(WsError::BadNativeWindow);
            }
        };

        let context = &self.context;
        let mut pending = scopeguard::guard(
            (&surface, Vec::with_capacity(SCANOUT_BUFFERS)),
            |(surface, slots)| {
                for slot in slots {
                    release_slot(surface, context, slot);
                }
            },
        );
        for index in 0..SCANOUT_BUFFERS {
            let (surface, slots) = &mut *pending;
            let (bo, allocated) = match surface.buffer(index) {
                Ok(Some(bo)) => (bo, false),
                Ok(None) => match surface.allocate_buffer(index) {
                    Ok(bo) => (bo, true),
                    Err(err) => {
                        error!(?err, index, "Failed to allocate a scanout buffer");
                        return Err(WsError::CannotInitialise);
                    }
                },
                Err(err) => {
                    error!(?err, index, "Failed to export a scanout buffer");
                    return Err(WsError::CannotInitialise);
                }
            };
            let mapping = match context.bind_imported_buffer(bo.fd.as_fd(), BUFFER_NAME) {
                Ok((mapping, _)) => mapping,
                Err(err) => {
                    error!(?err, index, "Failed to bind a scanout buffer");
                    if allocated {
                        surface.free_buffer(index);
                    }
                    return Err(WsError::CannotInitialise);
                }
            };
            slots.push(ScanoutSlot {
                index,
                bo,
                allocated,
                mapping: Some(mapping),
            });
        }
        let (_, slots) = scopeguard::ScopeGuard::into_inner(pending);

        let pitch = slots[0].bo.pitch;
        let layout = BufferLayout {
            width: size.w,
            height: size.h,
            stride: pitch / 4,
            pitch,
            size: u64::from(pitch) * size.h as u64,
            format,
            yuv: YuvInfo::default(),
        };
        let body = ScanoutBody::Window(ScanoutWindow {
            surface,
            ring: BackBufferRing::new(slots),
        });
        let id = self.drawables.insert(DrawableKind::Window, layout, None, body);
        debug!(?id, "Scanout window created");
        Ok(id)
    }

    fn create_pixmap(&mut self, config: &Config, pixmap: NativePixmap<P>) -> Result<DrawableId> {
        if !config.drawable_types.contains(DrawableTypes::PIXMAP) {
            return Err(WsError::BadMatch);
        }
        match pixmap {
            NativePixmap::Shared(buffer) => self.create_shared_pixmap(buffer),
            NativePixmap::Memory(_) => Err(WsError::BadNativePixmap),
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

    #[instrument(level = "trace", skip(self, _damage, fence))]
    fn swap_drawable(&mut self, id: DrawableId, _damage: &[Rectangle<i32, Gl>], fence: Option<Fence>) -> Result<()> {
        if let Some(fence) = fence {
            self.context.destroy_fence(fence);
        }

        let Drawable {
            body: ScanoutBody::Window(window),
            ..
        } = self.drawables.get_mut(id)?
        else {
            return Ok(());
        };
        let Some(current) = window.ring.current() else {
            return Ok(());
        };
        window.ring.mark_current_locked(current);
        window.surface.set_front(window.ring.slot(current).data().index);
        window.ring.advance();
        trace!(?id, presented = ?current, next = ?window.ring.current(), "Swapped");
        Ok(())
    }

    fn set_swap_interval(&mut self, id: DrawableId, interval: i32) -> Result<()> {
        self.drawables.get(id)?;
        trace!(?id, interval, "Swap interval ignored on scanout surfaces");
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
        if let Drawable {
            layout,
            body: ScanoutBody::Pixmap(mapping),
            ..
        } = self.drawables.get(id)?
        {
            let params = mapping
                .as_ref()
                .ok_or(WsError::BadDrawable)?
                .drawable_params(layout, false, 0);
            return Ok((params, params));
        }

        let (layout, window) = self.window_mut(id)?;
        Self::poll_releases(window);
        let mut current = Self::current_slot(id, window)?;
        // someone else (e.g. a video renderer) may have put our buffer on screen
        if window.surface.front() == Some(window.ring.slot(current).data().index) {
            trace!(?id, slot = ?current, "Current buffer is the scanout front buffer, skipping it");
            window.ring.skip_current();
            current = Self::current_slot(id, window)?;
        }

        let params = |slot: SlotId| -> Result<DrawableParams> {
            let slot = window.ring.slot(slot);
            Ok(slot
                .data()
                .mapping
                .as_ref()
                .ok_or(WsError::BadDrawable)?
                .drawable_params(&layout, true, slot.age()))
        };
        let render = params(current)?;
        let source = match window.ring.source() {
            Some(source) => params(source)?,
            None => render,
        };
        Ok((source, render))
    }

    fn get_image_params(&mut self, id: DrawableId) -> Result<ImageParams> {
        match self.drawables.get(id)? {
            Drawable {
                layout,
                body: ScanoutBody::Pixmap(mapping),
                ..
            } => mapping.as_ref().ok_or(WsError::BadDrawable)?.image_params(layout),
            _ => Err(WsError::BadMatch),
        }
    }

    fn acquire_cpu_mapping(&mut self, id: DrawableId) -> Result<NonNull<u8>> {
        let memdesc = cpu_target(self.drawables.get(id)?).ok_or(WsError::BadDrawable)?;
        self.context.cpu_address(memdesc)
    }

    fn release_cpu_mapping(&mut self, id: DrawableId) -> Result<()> {
        if let Some(memdesc) = cpu_target(self.drawables.get(id)?) {
            self.context.release_cpu_address(memdesc);
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

fn cpu_target<S>(drawable: &Drawable<ScanoutBody<S>>) -> Option<MemDesc> {
    let mapping = match &drawable.body {
        ScanoutBody::Window(window) => {
            let current = window.ring.current()?;
            window.ring.slot(current).data().mapping.as_ref()
        }
        ScanoutBody::Pixmap(mapping) => mapping.as_ref(),
    };
    mapping.map(Mapping::memdesc)
}

impl<P: Platform> Drop for CompositorDisplay<P> {
    fn drop(&mut self) {
        let remaining: Vec<_> = self.drawables.drain().collect();
        if !remaining.is_empty() {
            error!(count = remaining.len(), "Display closed with live drawables");
        }
        for (id, drawable) in remaining {
            self.destroy(id, drawable);
        }
        debug!("Compositor display closed");
    }
}
