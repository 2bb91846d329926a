//! EntryTable: the dense, growable slot array with an index-threaded free list.
//!
//! Slot 0 never holds an entry; its free-list link doubles as the list
//! head, so "no free slot" and "end of list" are both index 0. Freed
//! slots keep their generation, and the counter advances on every
//! free-to-allocated transition, which is what keeps stale names from
//! resolving to a slot's next occupant.
//!
//! Growth is split in two so the structural lock need not cover the
//! allocation: `StagedTable::stage` reserves storage up front, and
//! `grow_into` later moves the live slots across and splices the fresh
//! slots into the free list in one step.

use crate::entry::Entry;
use crate::name::{Generation, Name};
use crate::right::RightType;
use std::collections::TryReserveError;

#[derive(Debug)]
enum SlotState<O> {
    /// On the free list; `next` is the index of the following free slot
    /// (0 terminates the list).
    Free { next: u32 },
    Live(Entry<O>),
}

#[derive(Debug)]
struct Slot<O> {
    generation: Generation,
    state: SlotState<O>,
}

/// Dense entry storage. Exposed for internal benchmarking; the public
/// API of the crate is `Space`.
#[derive(Debug)]
pub struct EntryTable<O> {
    slots: Vec<Slot<O>>,
}

impl<O> EntryTable<O> {
    /// Build a table of `size` slots (at least one, for the reserved
    /// slot 0). Storage is reserved fallibly.
    pub fn with_size(size: u32) -> Result<Self, TryReserveError> {
        let size = size.max(1);
        let mut slots = Vec::new();
        slots.try_reserve_exact(size as usize)?;
        for i in 0..size {
            let next = if i + 1 < size { i + 1 } else { 0 };
            slots.push(Slot {
                generation: Generation::ZERO,
                state: SlotState::Free { next },
            });
        }
        Ok(EntryTable { slots })
    }

    /// A zero-slot table. Nothing can be allocated or looked up in it.
    pub(crate) fn empty() -> Self {
        EntryTable { slots: Vec::new() }
    }

    pub fn size(&self) -> u32 {
        self.slots.len() as u32
    }

    pub fn has_free(&self) -> bool {
        self.free_head() != 0
    }

    fn free_head(&self) -> u32 {
        match self.slots.first() {
            Some(slot) => match slot.state {
                SlotState::Free { next } => next,
                SlotState::Live(_) => panic!("slot 0 holds the free-list head"),
            },
            None => 0,
        }
    }

    fn set_free_head(&mut self, head: u32) {
        match &mut self.slots[0].state {
            SlotState::Free { next } => *next = head,
            SlotState::Live(_) => panic!("slot 0 holds the free-list head"),
        }
    }

    fn free_next(&self, idx: u32) -> u32 {
        match self.slots[idx as usize].state {
            SlotState::Free { next } => next,
            SlotState::Live(_) => panic!("slot {idx} on the free list is live"),
        }
    }

    /// Pop the first free slot, advance its generation, and install a
    /// fresh entry carrying `right`. Returns the new name, or `None`
    /// when the free list is empty.
    pub fn allocate(&mut self, right: RightType) -> Option<Name> {
        let idx = self.free_head();
        if idx == 0 {
            return None;
        }
        let next = self.free_next(idx);
        let slot = &mut self.slots[idx as usize];
        slot.generation = slot.generation.advanced();
        slot.state = SlotState::Live(Entry::fresh(right));
        let gen = slot.generation.value();
        self.set_free_head(next);
        Some(Name::from_parts(idx, gen))
    }

    /// Claim the free slot `name.index()`, adopting the name's generation.
    /// Returns false when the slot is occupied. The index must be nonzero
    /// and in range; callers route other names elsewhere.
    pub fn allocate_name(&mut self, name: Name) -> bool {
        let idx = name.index();
        assert!(idx != 0 && (idx as usize) < self.slots.len());
        if matches!(self.slots[idx as usize].state, SlotState::Live(_)) {
            return false;
        }
        // Unlink idx from the singly-linked free list.
        let mut prev = 0u32;
        loop {
            let next = self.free_next(prev);
            assert!(next != 0, "free slot {idx} missing from the free list");
            if next == idx {
                break;
            }
            prev = next;
        }
        let after = self.free_next(idx);
        match &mut self.slots[prev as usize].state {
            SlotState::Free { next } => *next = after,
            SlotState::Live(_) => unreachable!(),
        }
        let slot = &mut self.slots[idx as usize];
        slot.generation = Generation::from_value(name.generation());
        slot.state = SlotState::Live(Entry::fresh(RightType::None));
        true
    }

    /// Resolve a name: in range, live, and generation match.
    pub fn lookup(&self, name: Name) -> Option<&Entry<O>> {
        let idx = name.index() as usize;
        if idx == 0 || idx >= self.slots.len() {
            return None;
        }
        let slot = &self.slots[idx];
        let gen_ok = slot.generation.value() == name.generation();
        match &slot.state {
            SlotState::Live(e) if gen_ok => Some(e),
            _ => None,
        }
    }

    pub(crate) fn lookup_mut(&mut self, name: Name) -> Option<&mut Entry<O>> {
        let idx = name.index() as usize;
        if idx == 0 || idx >= self.slots.len() {
            return None;
        }
        let slot = &mut self.slots[idx];
        let gen_ok = slot.generation.value() == name.generation();
        match &mut slot.state {
            SlotState::Live(e) if gen_ok => Some(e),
            _ => None,
        }
    }

    /// Free a live slot and return its entry. The generation field
    /// survives, so the next occupant's name differs from this one.
    /// Panics on slot 0 or a slot that is already free.
    pub fn release(&mut self, index: u32) -> Entry<O> {
        assert!(index != 0, "slot 0 is reserved");
        assert!(
            matches!(self.slots[index as usize].state, SlotState::Live(_)),
            "release of a free slot"
        );
        let head = self.free_head();
        let slot = &mut self.slots[index as usize];
        let state = core::mem::replace(&mut slot.state, SlotState::Free { next: head });
        self.set_free_head(index);
        match state {
            SlotState::Live(e) => e,
            SlotState::Free { .. } => unreachable!(),
        }
    }

    pub(crate) fn entry_at(&self, index: u32) -> &Entry<O> {
        match &self.slots[index as usize].state {
            SlotState::Live(e) => e,
            SlotState::Free { .. } => panic!("slot {index} is free"),
        }
    }

    pub(crate) fn entry_at_mut(&mut self, index: u32) -> &mut Entry<O> {
        match &mut self.slots[index as usize].state {
            SlotState::Live(e) => e,
            SlotState::Free { .. } => panic!("slot {index} is free"),
        }
    }

    pub(crate) fn live_iter(&self) -> impl Iterator<Item = (Name, &Entry<O>)> {
        self.slots.iter().enumerate().filter_map(|(i, slot)| match &slot.state {
            SlotState::Live(e) => Some((Name::from_parts(i as u32, slot.generation.value()), e)),
            SlotState::Free { .. } => None,
        })
    }

    pub(crate) fn into_live(self) -> impl Iterator<Item = (Name, Entry<O>)> {
        self.slots.into_iter().enumerate().filter_map(|(i, slot)| match slot.state {
            SlotState::Live(e) => Some((Name::from_parts(i as u32, slot.generation.value()), e)),
            SlotState::Free { .. } => None,
        })
    }

    pub(crate) fn free_count(&self) -> u32 {
        let mut n = 0;
        let mut idx = self.free_head();
        while idx != 0 {
            n += 1;
            idx = self.free_next(idx);
        }
        n
    }

    /// Publish a staged grow: move the existing slots across, append
    /// fresh free slots, and splice those ahead of whatever free list the
    /// old table accumulated while the staging allocation ran.
    pub(crate) fn grow_into(&mut self, staged: StagedTable<O>) {
        let old_size = self.size();
        assert!(old_size >= 1, "cannot grow an empty table");
        let StagedTable {
            mut slots,
            size: new_size,
        } = staged;
        assert!(new_size > old_size, "staged table must be larger");
        let old_head = self.free_head();
        slots.extend(core::mem::take(&mut self.slots));
        for i in old_size..new_size {
            let next = if i + 1 < new_size { i + 1 } else { old_head };
            slots.push(Slot {
                generation: Generation::ZERO,
                state: SlotState::Free { next },
            });
        }
        self.slots = slots;
        self.set_free_head(old_size);
    }
}

/// Storage for a grown table, reserved ahead of the publish step so the
/// structural lock is not held across the allocation.
pub(crate) struct StagedTable<O> {
    slots: Vec<Slot<O>>,
    size: u32,
}

impl<O> StagedTable<O> {
    pub(crate) fn stage(size: u32) -> Result<Self, TryReserveError> {
        let mut slots = Vec::new();
        slots.try_reserve_exact(size as usize)?;
        Ok(StagedTable { slots, size })
    }
}
