//! Index based pools and queues over fixed slot arenas.
//!
//! Slots are identified by their index into an arena owned elsewhere. A
//! collection only records membership, so moving a slot between two of them
//! is a pop followed by a push.

use heapless::{Deque, Vec};

pub(crate) type Slot = u8;

/// Unordered set of slots.
pub(crate) struct SlotPool<const N: usize> {
    slots: Vec<Slot, N>,
}

impl<const N: usize> SlotPool<N> {
    pub fn empty() -> Self {
        Self { slots: Vec::new() }
    }

    /// A pool holding every slot of the arena.
    pub fn full() -> Self {
        let mut pool = Self::empty();
        pool.fill();
        pool
    }

    pub fn fill(&mut self) {
        self.slots.clear();
        for slot in 0..N {
            self.put(slot as Slot);
        }
    }

    pub fn take(&mut self) -> Option<Slot> {
        self.slots.pop()
    }

    pub fn put(&mut self, slot: Slot) {
        debug_assert!(!self.contains(slot), "slot {slot} pooled twice");
        let pushed = self.slots.push(slot);
        debug_assert!(pushed.is_ok(), "pool overflow");
    }

    /// Remove a specific slot, returning whether it was a member.
    pub fn remove(&mut self, slot: Slot) -> bool {
        match self.slots.iter().position(|&s| s == slot) {
            Some(index) => {
                self.slots.swap_remove(index);
                true
            }
            None => false,
        }
    }

    pub fn contains(&self, slot: Slot) -> bool {
        self.slots.contains(&slot)
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.slots.len() == N
    }

    pub fn iter(&self) -> impl Iterator<Item = Slot> + '_ {
        self.slots.iter().copied()
    }

    pub fn clear(&mut self) {
        self.slots.clear();
    }
}

/// FIFO of slots.
pub(crate) struct SlotQueue<const N: usize> {
    slots: Deque<Slot, N>,
}

impl<const N: usize> SlotQueue<N> {
    pub fn new() -> Self {
        Self { slots: Deque::new() }
    }

    pub fn push_back(&mut self, slot: Slot) {
        let pushed = self.slots.push_back(slot);
        debug_assert!(pushed.is_ok(), "queue overflow");
    }

    pub fn pop_front(&mut self) -> Option<Slot> {
        self.slots.pop_front()
    }

    pub fn front(&self) -> Option<Slot> {
        self.slots.front().copied()
    }

    pub fn contains(&self, slot: Slot) -> bool {
        self.slots.iter().any(|&s| s == slot)
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn clear(&mut self) {
        self.slots.clear();
    }
}
