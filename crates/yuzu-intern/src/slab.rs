//! Fixed-slot arena for vector payloads.
//!
//! All vectors of one index share a dimension, so their serialized payloads
//! share a length. Packing them into fixed-size slots inside large blocks
//! gives linear scans good locality and avoids per-vector allocator
//! round-trips. Blocks are boxed slices: growing the block list never moves
//! slot storage, so raw slot pointers stay valid for the arena's lifetime.

use crate::{InternError, Result};
use parking_lot::Mutex;
use std::ptr::NonNull;
use std::sync::Arc;

/// Arena of fixed-size slots, grown one block at a time.
pub struct SlabArena {
    slot_len: usize,
    slots_per_block: usize,
    inner: Mutex<ArenaInner>,
}

struct ArenaInner {
    blocks: Vec<Box<[u8]>>,
    /// Freed slot indices, reused before new slots are carved.
    free: Vec<usize>,
    /// Next never-used slot index.
    next: usize,
}

impl SlabArena {
    /// Create an arena for `slot_len`-byte payloads, `slots_per_block` slots
    /// per allocation block.
    pub fn new(slot_len: usize, slots_per_block: usize) -> Arc<Self> {
        assert!(slot_len > 0, "slot_len must be non-zero");
        assert!(slots_per_block > 0, "slots_per_block must be non-zero");
        Arc::new(Self {
            slot_len,
            slots_per_block,
            inner: Mutex::new(ArenaInner {
                blocks: Vec::new(),
                free: Vec::new(),
                next: 0,
            }),
        })
    }

    /// Slot payload length in bytes.
    pub fn slot_len(&self) -> usize {
        self.slot_len
    }

    /// Number of live slots.
    pub fn live_slots(&self) -> usize {
        let inner = self.inner.lock();
        inner.next - inner.free.len()
    }

    /// Copy `bytes` into a slot and return a handle that frees the slot on
    /// drop.
    pub fn alloc(self: &Arc<Self>, bytes: &[u8]) -> Result<SlabSlot> {
        if bytes.len() != self.slot_len {
            return Err(InternError::SlotSize {
                expected: self.slot_len,
                actual: bytes.len(),
            });
        }
        let mut inner = self.inner.lock();
        let slot = match inner.free.pop() {
            Some(slot) => slot,
            None => {
                let slot = inner.next;
                if slot / self.slots_per_block >= inner.blocks.len() {
                    inner
                        .blocks
                        .push(vec![0u8; self.slot_len * self.slots_per_block].into_boxed_slice());
                }
                inner.next += 1;
                slot
            }
        };
        let block = slot / self.slots_per_block;
        let offset = (slot % self.slots_per_block) * self.slot_len;
        let dst = &mut inner.blocks[block][offset..offset + self.slot_len];
        dst.copy_from_slice(bytes);
        let ptr = NonNull::new(dst.as_mut_ptr()).expect("block storage is non-null");
        Ok(SlabSlot {
            arena: Arc::clone(self),
            slot,
            ptr,
        })
    }

    fn release(&self, slot: usize) {
        self.inner.lock().free.push(slot);
    }
}

/// Handle to one arena slot. The payload is immutable after `alloc` copies
/// it in; the slot returns to the free list when the handle drops.
pub struct SlabSlot {
    arena: Arc<SlabArena>,
    slot: usize,
    ptr: NonNull<u8>,
}

// SAFETY: the pointed-to slot is written once under the arena lock in
// `alloc` and never mutated again until this handle drops and the slot is
// recycled; block storage never moves.
unsafe impl Send for SlabSlot {}
unsafe impl Sync for SlabSlot {}

impl SlabSlot {
    /// Borrow the slot payload.
    pub fn as_bytes(&self) -> &[u8] {
        // SAFETY: `ptr` points at `slot_len` initialized bytes inside a
        // block owned (via Arc) by `self.arena`; see the Send/Sync note.
        unsafe { std::slice::from_raw_parts(self.ptr.as_ptr(), self.arena.slot_len) }
    }
}

impl Drop for SlabSlot {
    fn drop(&mut self) {
        self.arena.release(self.slot);
    }
}
