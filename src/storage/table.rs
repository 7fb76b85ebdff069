//! Slab table: per-kind arena of fixed-layout records
//!
//! Allocation either extends the arena or pops the free list; slot 0 does
//! not exist, so a handle of 0 is always null. Freed slots keep only the
//! free-list link; the record payload is reset so a cloned table never
//! carries dangling data.

use super::handle::Oid;
use crate::error::{Error, Result};
use tracing::debug;

/// Marker trait for types stored in a [`SlabTable`].
pub trait TableRecord: Default + Clone {
    /// Table kind name used in diagnostics and error reports.
    const KIND: &'static str;
}

const NO_SLOT: u32 = u32::MAX;

#[derive(Debug, Clone)]
struct Slot<T> {
    record: T,
    live: bool,
    /// Next slot number on the free list, `NO_SLOT` at the tail.
    next_free: u32,
}

/// Append/recycle arena for one object kind.
///
/// Invariants: a live handle resolves to exactly one record; a destroyed
/// handle fails every later `get`; `slot count == live count + free count`.
#[derive(Debug)]
pub struct SlabTable<T: TableRecord> {
    slots: Vec<Slot<T>>,
    free_head: u32,
    live: u32,
}

impl<T: TableRecord> SlabTable<T> {
    /// Create an empty table.
    pub fn new() -> Self {
        Self {
            slots: Vec::new(),
            free_head: NO_SLOT,
            live: 0,
        }
    }

    /// Allocate a record, reusing a freed slot when one exists.
    ///
    /// Never returns the null handle.
    pub fn create(&mut self) -> Oid<T> {
        let id = if self.free_head != NO_SLOT {
            let slot_idx = self.free_head as usize;
            self.free_head = self.slots[slot_idx].next_free;
            let slot = &mut self.slots[slot_idx];
            slot.live = true;
            slot.next_free = NO_SLOT;
            slot_idx as u32 + 1
        } else {
            self.slots.push(Slot {
                record: T::default(),
                live: true,
                next_free: NO_SLOT,
            });
            self.slots.len() as u32
        };
        self.live += 1;
        debug!(kind = T::KIND, id, "created record");
        Oid::from_raw(id)
    }

    /// Destroy a record and recycle its slot.
    ///
    /// The caller (the owning collection) must have unlinked the record
    /// from every list referencing it first. Any later `get` on this
    /// handle fails with `InvalidHandle` until the slot is reused.
    pub fn destroy(&mut self, id: Oid<T>) -> Result<()> {
        let slot_idx = self.check(id)?;
        let slot = &mut self.slots[slot_idx];
        slot.live = false;
        slot.record = T::default();
        slot.next_free = self.free_head;
        self.free_head = slot_idx as u32;
        self.live -= 1;
        debug!(kind = T::KIND, id = id.raw(), "destroyed record");
        Ok(())
    }

    /// Resolve a handle to its record.
    pub fn get(&self, id: Oid<T>) -> Result<&T> {
        let slot_idx = self.check(id)?;
        Ok(&self.slots[slot_idx].record)
    }

    /// Resolve a handle to its record, mutably.
    pub fn get_mut(&mut self, id: Oid<T>) -> Result<&mut T> {
        let slot_idx = self.check(id)?;
        Ok(&mut self.slots[slot_idx].record)
    }

    /// True if the handle currently resolves to a live record.
    pub fn is_live(&self, id: Oid<T>) -> bool {
        !id.is_null()
            && (id.raw() as usize) <= self.slots.len()
            && self.slots[id.raw() as usize - 1].live
    }

    /// Number of live records.
    pub fn len(&self) -> usize {
        self.live as usize
    }

    /// True when no record is live.
    pub fn is_empty(&self) -> bool {
        self.live == 0
    }

    /// Total slot count, live plus recycled.
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Length of the free list.
    pub fn free_len(&self) -> usize {
        self.slots.len() - self.live as usize
    }

    /// Iterate over `(handle, record)` for every live slot, ascending.
    pub fn iter_live(&self) -> impl Iterator<Item = (Oid<T>, &T)> {
        self.slots.iter().enumerate().filter_map(|(i, slot)| {
            slot.live
                .then(|| (Oid::from_raw(i as u32 + 1), &slot.record))
        })
    }

    /// Re-create a record at a specific slot number, growing the arena as
    /// needed. Used by the stream codec when repopulating a table.
    pub fn insert_at(&mut self, id: Oid<T>, record: T) -> Result<()> {
        if id.is_null() {
            return Err(Error::InvalidHandle {
                kind: T::KIND,
                id: 0,
            });
        }
        let slot_idx = id.raw() as usize - 1;
        while self.slots.len() <= slot_idx {
            self.slots.push(Slot {
                record: T::default(),
                live: false,
                next_free: NO_SLOT,
            });
        }
        let slot = &mut self.slots[slot_idx];
        if slot.live {
            return Err(Error::Storage(format!(
                "slot {} of {} table already populated",
                id.raw(),
                T::KIND
            )));
        }
        slot.record = record;
        slot.live = true;
        slot.next_free = NO_SLOT;
        self.live += 1;
        Ok(())
    }

    /// Grow the arena to `slots` total slots with free trailing slots.
    ///
    /// Lets the codec restore a table's full handle space, including
    /// recycled slots past the last live record.
    pub fn pad_to(&mut self, slots: usize) {
        while self.slots.len() < slots {
            self.slots.push(Slot {
                record: T::default(),
                live: false,
                next_free: NO_SLOT,
            });
        }
    }

    /// Rebuild the free list over all non-live slots, ascending.
    ///
    /// Called once after a table has been repopulated via `insert_at`.
    pub fn rebuild_free_list(&mut self) {
        self.free_head = NO_SLOT;
        for i in (0..self.slots.len()).rev() {
            if !self.slots[i].live {
                self.slots[i].next_free = self.free_head;
                self.free_head = i as u32;
            }
        }
    }

    fn check(&self, id: Oid<T>) -> Result<usize> {
        if id.is_null() || (id.raw() as usize) > self.slots.len() {
            return Err(Error::InvalidHandle {
                kind: T::KIND,
                id: id.raw(),
            });
        }
        let slot_idx = id.raw() as usize - 1;
        if !self.slots[slot_idx].live {
            return Err(Error::InvalidHandle {
                kind: T::KIND,
                id: id.raw(),
            });
        }
        Ok(slot_idx)
    }
}

impl<T: TableRecord> Default for SlabTable<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: TableRecord> Clone for SlabTable<T> {
    /// Duplicate every live record into a table with the same handle
    /// space. Freed slots carry no payload in the copy, only their place
    /// on the free list, so dangling data is never duplicated.
    fn clone(&self) -> Self {
        let slots = self
            .slots
            .iter()
            .map(|slot| Slot {
                record: if slot.live {
                    slot.record.clone()
                } else {
                    T::default()
                },
                live: slot.live,
                next_free: slot.next_free,
            })
            .collect();
        Self {
            slots,
            free_head: self.free_head,
            live: self.live,
        }
    }
}
