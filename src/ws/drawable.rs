//! Drawable records and their lifecycle
//!
//! Both window-system implementations keep their drawables in a [`DrawableTable`]. The table
//! owns the reference counting of shared pixmaps and decides when a record is torn down. The
//! caller only releases the resources of the records the table hands back.
//!
//! A pixmap imported from a shared buffer has two owners: the renderer, which deletes it, and
//! the buffer's creator, whose destroy notification may arrive before or after that. The record
//! is finalized by whichever of the two comes second.

use std::collections::HashMap;

use indexmap::IndexMap;
use tracing::{debug, trace};

use crate::{backend::device::BufferLayout, error::WsError, wayland::BufferKey};

/// Handle of a drawable, valid for the display that created it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DrawableId(u32);

/// Kind of a drawable
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DrawableKind {
    /// Ring-buffered window
    Window,
    /// Single imported buffer
    Pixmap,
}

/// Observable state of a drawable
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DrawableState {
    /// Usable
    Active,
    /// The native window changed size, the drawable has to be recreated
    Resized,
    /// Deleted by the renderer, kept until the buffer's destroy notification arrives
    DeletePending,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Teardown {
    refs: u32,
    deleted: bool,
    destroy_notified: bool,
}

impl Teardown {
    /// Lifecycle of a drawable without an external owner
    pub(crate) fn owned() -> Teardown {
        Teardown {
            refs: 1,
            deleted: false,
            destroy_notified: true,
        }
    }

    /// Lifecycle of a drawable whose buffer is also owned by its creator
    pub(crate) fn shared() -> Teardown {
        Teardown {
            refs: 1,
            deleted: false,
            destroy_notified: false,
        }
    }

    fn retain(&mut self) {
        self.refs += 1;
        self.deleted = false;
    }

    fn release(&mut self) -> bool {
        self.refs = self.refs.saturating_sub(1);
        if self.refs == 0 {
            self.deleted = true;
        }
        self.finalize_ready()
    }

    fn notify_destroyed(&mut self) -> bool {
        self.destroy_notified = true;
        self.finalize_ready()
    }

    fn finalize_ready(&self) -> bool {
        self.deleted && self.destroy_notified
    }
}

/// A drawable record
#[derive(Debug)]
pub(crate) struct Drawable<B> {
    pub kind: DrawableKind,
    pub layout: BufferLayout,
    pub resized: bool,
    pub key: Option<BufferKey>,
    teardown: Teardown,
    pub body: B,
}

impl<B> Drawable<B> {
    pub(crate) fn state(&self) -> DrawableState {
        if self.teardown.deleted {
            DrawableState::DeletePending
        } else if self.resized {
            DrawableState::Resized
        } else {
            DrawableState::Active
        }
    }
}

/// Drawables of a display
#[derive(Debug)]
pub(crate) struct DrawableTable<B> {
    drawables: IndexMap<DrawableId, Drawable<B>>,
    shared: HashMap<BufferKey, DrawableId>,
    next_id: u32,
}

impl<B> Default for DrawableTable<B> {
    fn default() -> Self {
        DrawableTable {
            drawables: IndexMap::new(),
            shared: HashMap::new(),
            next_id: 1,
        }
    }
}

impl<B> DrawableTable<B> {
    /// Add a drawable, registering it under `key` if its buffer has an external owner
    pub fn insert(&mut self, kind: DrawableKind, layout: BufferLayout, key: Option<BufferKey>, body: B) -> DrawableId {
        let id = DrawableId(self.next_id);
        self.next_id = self.next_id.wrapping_add(1).max(1);

        let teardown = match key {
            Some(key) => {
                self.shared.insert(key, id);
                Teardown::shared()
            }
            None => Teardown::owned(),
        };
        self.drawables.insert(
            id,
            Drawable {
                kind,
                layout,
                resized: false,
                key,
                teardown,
                body,
            },
        );
        debug!(?id, ?kind, ?key, "Drawable created");
        id
    }

    /// Take another reference on the drawable imported from `key`, if there is one
    pub fn retain_shared(&mut self, key: BufferKey) -> Option<DrawableId> {
        let id = *self.shared.get(&key)?;
        let drawable = self.drawables.get_mut(&id)?;
        drawable.teardown.retain();
        trace!(?id, refs = drawable.teardown.refs, "Shared drawable retained");
        Some(id)
    }

    /// A live drawable
    pub fn get(&self, id: DrawableId) -> Result<&Drawable<B>, WsError> {
        self.drawables
            .get(&id)
            .filter(|d| !d.teardown.deleted)
            .ok_or(WsError::BadDrawable)
    }

    /// A live drawable, mutably
    pub fn get_mut(&mut self, id: DrawableId) -> Result<&mut Drawable<B>, WsError> {
        self.drawables
            .get_mut(&id)
            .filter(|d| !d.teardown.deleted)
            .ok_or(WsError::BadDrawable)
    }

    /// Any drawable still held by the table, including pending deletions
    pub fn lookup(&self, id: DrawableId) -> Option<&Drawable<B>> {
        self.drawables.get(&id)
    }

    /// Reference count of a drawable
    pub fn refs(&self, id: DrawableId) -> Option<u32> {
        self.drawables.get(&id).map(|d| d.teardown.refs)
    }

    /// Drop one reference, returning the record if it has to be torn down now
    pub fn release(&mut self, id: DrawableId) -> Result<Option<Drawable<B>>, WsError> {
        let drawable = self.get_mut(id)?;
        if !drawable.teardown.release() {
            if drawable.teardown.deleted {
                debug!(?id, "Drawable deleted, waiting for the destroy notification");
            } else {
                trace!(?id, refs = drawable.teardown.refs, "Drawable reference dropped");
            }
            return Ok(None);
        }
        Ok(self.remove(id))
    }

    /// Record the destroy notification of a shared buffer, returning the record if it has to be
    /// torn down now
    pub fn notify_destroyed(&mut self, key: BufferKey) -> Option<(DrawableId, Drawable<B>)> {
        let id = self.shared.remove(&key)?;
        let drawable = self.drawables.get_mut(&id)?;
        drawable.key = None;
        if !drawable.teardown.notify_destroyed() {
            debug!(?id, "Buffer destroyed while the drawable is in use");
            return None;
        }
        self.remove(id).map(|drawable| (id, drawable))
    }

    /// Iterate over live drawables
    pub fn iter_mut(&mut self) -> impl Iterator<Item = (DrawableId, &mut Drawable<B>)> {
        self.drawables
            .iter_mut()
            .filter(|(_, d)| !d.teardown.deleted)
            .map(|(id, d)| (*id, d))
    }

    /// Number of records, including pending deletions
    pub fn len(&self) -> usize {
        self.drawables.len()
    }

    /// Remove every record
    pub fn drain(&mut self) -> impl Iterator<Item = (DrawableId, Drawable<B>)> + '_ {
        self.shared.clear();
        self.drawables.drain(..)
    }

    fn remove(&mut self, id: DrawableId) -> Option<Drawable<B>> {
        let drawable = self.drawables.shift_remove(&id)?;
        if let Some(key) = drawable.key {
            self.shared.remove(&key);
        }
        debug!(?id, kind = ?drawable.kind, "Drawable finalized");
        Some(drawable)
    }
}
