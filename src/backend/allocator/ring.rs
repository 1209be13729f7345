use smallvec::SmallVec;
use tracing::trace;

/// Maximum number of slots a ring can hold
pub const SLOT_CAP: usize = 4;

/// Index of a slot inside its [`BackBufferRing`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SlotId(u8);

impl SlotId {
    /// Position of the slot in the ring
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// A buffer of a ring together with its bookkeeping
#[derive(Debug)]
pub struct Slot<T> {
    locked: bool,
    age: u32,
    data: T,
}

impl<T> Slot<T> {
    /// Whether the buffer is held by the presentation side
    pub fn is_locked(&self) -> bool {
        self.locked
    }

    /// Swaps since the buffer was last presented, 0 if it never was
    pub fn age(&self) -> u32 {
        self.age
    }

    /// Backend data of the slot
    pub fn data(&self) -> &T {
        &self.data
    }

    /// Mutable backend data of the slot
    pub fn data_mut(&mut self) -> &mut T {
        &mut self.data
    }
}

#[derive(Debug, Clone, Copy)]
struct Node {
    slot: SlotId,
    next: Option<u8>,
}

/// FIFO of free slots living in a fixed node array
///
/// Nodes are either linked into the free list or parked on the spare list while the slot they
/// referenced is checked out. Moving a node between the lists never allocates.
#[derive(Debug)]
struct FreeQueue {
    nodes: [Node; SLOT_CAP],
    head: Option<u8>,
    tail: Option<u8>,
    spare: Option<u8>,
}

impl FreeQueue {
    fn new() -> FreeQueue {
        let mut nodes = [Node {
            slot: SlotId(0),
            next: None,
        }; SLOT_CAP];
        for (i, node) in nodes.iter_mut().enumerate().take(SLOT_CAP - 1) {
            node.next = Some(i as u8 + 1);
        }
        FreeQueue {
            nodes,
            head: None,
            tail: None,
            spare: Some(0),
        }
    }

    fn pop_front(&mut self) -> Option<SlotId> {
        let idx = self.head?;
        let node = &mut self.nodes[idx as usize];
        self.head = node.next;
        if self.head.is_none() {
            self.tail = None;
        }
        node.next = self.spare;
        self.spare = Some(idx);
        Some(node.slot)
    }

    fn push_back(&mut self, slot: SlotId) -> bool {
        let Some(idx) = self.spare else {
            return false;
        };
        self.spare = self.nodes[idx as usize].next;
        self.nodes[idx as usize] = Node { slot, next: None };
        match self.tail {
            Some(tail) => self.nodes[tail as usize].next = Some(idx),
            None => self.head = Some(idx),
        }
        self.tail = Some(idx);
        true
    }

    fn iter(&self) -> impl Iterator<Item = SlotId> + '_ {
        std::iter::successors(self.head, move |idx| self.nodes[*idx as usize].next)
            .map(move |idx| self.nodes[idx as usize].slot)
    }
}

/// Fixed set of back buffers of a window
///
/// All buffers are handed to the ring once at creation and taken back once at teardown, the
/// ring itself never allocates. One slot at a time may be *current* (rendered into) and one may
/// be the *source* (presented last). A slot becomes free again only through
/// [`BackBufferRing::release_slot`].
#[derive(Debug)]
pub struct BackBufferRing<T> {
    slots: SmallVec<[Slot<T>; SLOT_CAP]>,
    queue: FreeQueue,
    current: Option<SlotId>,
    source: Option<SlotId>,
}

impl<T> BackBufferRing<T> {
    /// Create a ring over the given buffers, queued as free in index order
    ///
    /// # Panics
    ///
    /// Panics if no buffer or more than [`SLOT_CAP`] buffers are supplied.
    pub fn new(buffers: impl IntoIterator<Item = T>) -> BackBufferRing<T> {
        let slots: SmallVec<[Slot<T>; SLOT_CAP]> = buffers
            .into_iter()
            .map(|data| Slot {
                locked: false,
                age: 0,
                data,
            })
            .collect();
        assert!(
            !slots.is_empty() && slots.len() <= SLOT_CAP,
            "A ring holds between 1 and {} buffers, got {}",
            SLOT_CAP,
            slots.len()
        );

        let mut queue = FreeQueue::new();
        for i in 0..slots.len() {
            queue.push_back(SlotId(i as u8));
        }

        BackBufferRing {
            slots,
            queue,
            current: None,
            source: None,
        }
    }

    /// Number of slots
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Rings are never empty
    pub fn is_empty(&self) -> bool {
        false
    }

    /// Access a slot
    pub fn slot(&self, id: SlotId) -> &Slot<T> {
        &self.slots[id.index()]
    }

    /// Access a slot mutably
    pub fn slot_mut(&mut self, id: SlotId) -> &mut Slot<T> {
        &mut self.slots[id.index()]
    }

    /// Iterate over all slots
    pub fn slots(&self) -> impl Iterator<Item = (SlotId, &Slot<T>)> {
        self.slots.iter().enumerate().map(|(i, slot)| (SlotId(i as u8), slot))
    }

    /// Slot currently rendered into
    pub fn current(&self) -> Option<SlotId> {
        self.current
    }

    /// Slot presented last
    pub fn source(&self) -> Option<SlotId> {
        self.source
    }

    /// Number of slots held by the presentation side
    pub fn locked_count(&self) -> usize {
        self.slots.iter().filter(|slot| slot.locked).count()
    }

    /// Slots waiting in the free queue, in the order they will be handed out
    pub fn free_slots(&self) -> impl Iterator<Item = SlotId> + '_ {
        self.queue.iter()
    }

    /// Take the next free slot off the queue
    pub fn acquire_free_slot(&mut self) -> Option<SlotId> {
        let slot = self.queue.pop_front();
        trace!(?slot, "Acquired free slot");
        slot
    }

    /// Designate a free slot as current, unless there already is one
    pub fn ensure_current(&mut self) -> Option<SlotId> {
        if self.current.is_none() {
            self.current = self.acquire_free_slot();
        }
        self.current
    }

    /// Hand a slot back after the presentation side released it
    ///
    /// Returns `false` without touching the ring if the slot was not locked.
    pub fn release_slot(&mut self, id: SlotId) -> bool {
        let slot = &mut self.slots[id.index()];
        if !slot.locked {
            trace!(?id, "Ignoring release of an unlocked slot");
            return false;
        }
        slot.locked = false;

        // a reclaimed slot is already checked out as current
        if self.current != Some(id) {
            let queued = self.queue.push_back(id);
            debug_assert!(queued, "free queue overflow");
        }
        trace!(?id, "Released slot");
        true
    }

    /// Lock a slot for presentation and update the buffer ages
    pub fn mark_current_locked(&mut self, id: SlotId) {
        for slot in self.slots.iter_mut().filter(|slot| slot.age > 0) {
            slot.age += 1;
        }
        let slot = &mut self.slots[id.index()];
        slot.age = 1;
        slot.locked = true;
    }

    /// Make the current slot the source and pick the next free slot as current
    pub fn advance(&mut self) {
        self.source = self.current;
        self.current = self.acquire_free_slot();
    }

    /// Lock the current slot because someone else holds it and move on to the next free slot
    ///
    /// The skipped slot becomes the source. Ages are left alone, nothing was presented.
    pub fn skip_current(&mut self) {
        if let Some(current) = self.current {
            self.slots[current.index()].locked = true;
            self.advance();
        }
    }

    /// Designate the locked slot presented longest ago as current without releasing it
    ///
    /// Used by presentation sides that cannot wait for a release. The slot stays locked until its
    /// release arrives.
    pub fn reclaim_oldest(&mut self) -> Option<SlotId> {
        let oldest = self
            .slots()
            .filter(|(id, slot)| slot.locked && Some(*id) != self.source)
            .max_by_key(|(_, slot)| slot.age)
            .map(|(id, _)| id);
        if oldest.is_some() {
            self.current = oldest;
        }
        oldest
    }

    /// Tear the ring down, returning the buffers in index order
    pub fn into_buffers(self) -> impl Iterator<Item = T> {
        self.slots.into_iter().map(|slot| slot.data)
    }
}
