//! Hand-off of a rendered buffer to the display server
//!
//! The presentable buffer of a slot is created on its first presentation and cached for every
//! later one. Frame callbacks pace the renderer when the swap interval is positive; otherwise a
//! display sync callback is requested after the commit so buffer turnover keeps being observed
//! when the server holds back releases.

use std::os::unix::io::AsFd;

use tracing::{trace, warn};

use super::ClientSlot;
use crate::{
    backend::{allocator::Modifier, device::BufferLayout},
    utils::{Gl, Logical, Rectangle, Size},
    wayland::{
        client::{BufferId, BufferParams, CallbackId, ClientGlobals, ClientTransport, ClientWindow, DAMAGE_BUFFER_SINCE},
        TransportError,
    },
};

/// Everything of a window a presentation touches
pub(super) struct PresentTarget<'a, W> {
    pub window: &'a W,
    pub slot: &'a mut ClientSlot,
    pub frame: &'a mut Option<CallbackId>,
    pub layout: &'a BufferLayout,
}

/// Attach and commit the buffer of a slot
///
/// Returns the presentable buffer if it had to be created, so the caller can route its
/// releases. Nothing is attached if the buffer cannot be created.
pub(super) fn present<T, W>(
    transport: &mut T,
    globals: &ClientGlobals,
    target: PresentTarget<'_, W>,
    interval: u32,
    damage: &[Rectangle<i32, Gl>],
    sync_callback: &mut Option<CallbackId>,
) -> Result<Option<BufferId>, TransportError>
where
    T: ClientTransport,
    W: ClientWindow,
{
    let PresentTarget {
        window,
        slot,
        frame,
        layout,
    } = target;

    let (buffer, created) = match slot.buffer {
        Some(buffer) => (buffer, false),
        None => {
            let buffer = create_buffer(transport, globals, slot, layout)?;
            slot.buffer = Some(buffer);
            (buffer, true)
        }
    };

    let surface = window.surface();
    if interval > 0 && frame.is_none() {
        *frame = Some(transport.frame(surface));
    }

    transport.attach(surface, buffer, window.take_offset());
    window.set_attached_size(Size::from((layout.width, layout.height)));

    if damage.is_empty() || transport.surface_version(surface) < DAMAGE_BUFFER_SINCE {
        transport.damage(
            surface,
            Rectangle::<i32, Logical>::from_loc_and_size((0, 0), (layout.width, layout.height)),
        );
    } else {
        for rect in damage {
            transport.damage_buffer(surface, rect.to_buffer(layout.height));
        }
    }
    transport.commit(surface);

    if frame.is_none() && sync_callback.is_none() {
        *sync_callback = Some(transport.sync());
    }
    if let Err(err) = transport.flush() {
        warn!(?err, "Failed to flush the display connection");
    }

    trace!(?buffer, created, "Buffer committed");
    Ok(created.then_some(buffer))
}

fn create_buffer<T: ClientTransport>(
    transport: &mut T,
    globals: &ClientGlobals,
    slot: &ClientSlot,
    layout: &BufferLayout,
) -> Result<BufferId, TransportError> {
    let mut params = BufferParams {
        fd: slot.bo.fd.as_fd(),
        handle: slot.bo.handle,
        size: (layout.width, layout.height).into(),
        pitch: slot.bo.pitch,
        format: layout.format.fourcc(),
        modifier: Modifier::Linear,
    };
    match &globals.dmabuf {
        Some(dmabuf) => {
            params.modifier = dmabuf.modifier;
            transport.create_dmabuf_buffer(&params)
        }
        None => transport.create_kms_buffer(&params),
    }
}
