//! Fixed-capacity commit history for one partition.
//!
//! A flat slot vector with an explicit write cursor: the slot before the
//! cursor is the most recently written entry, the slot at the cursor is
//! either empty (ring still filling) or the oldest entry (ring full). A
//! write always lands at the cursor and advances it.

use super::types::ConsumerOffset;

#[derive(Debug, Clone)]
pub(crate) struct OffsetRing {
    slots: Box<[Option<ConsumerOffset>]>,
    cursor: usize,
}

impl OffsetRing {
    pub(crate) fn new(capacity: usize) -> Self {
        debug_assert!(capacity >= 2);
        Self {
            slots: vec![None; capacity].into_boxed_slice(),
            cursor: 0,
        }
    }

    pub(crate) fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// The most recently written entry, if any.
    pub(crate) fn last(&self) -> Option<&ConsumerOffset> {
        let n = self.slots.len();
        self.slots[(self.cursor + n - 1) % n].as_ref()
    }

    /// Write at the cursor (overwriting the oldest entry once full) and
    /// advance.
    pub(crate) fn push(&mut self, entry: ConsumerOffset) {
        self.slots[self.cursor] = Some(entry);
        self.cursor = (self.cursor + 1) % self.slots.len();
    }

    pub(crate) fn len(&self) -> usize {
        self.slots.iter().filter(|slot| slot.is_some()).count()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.slots.iter().all(|slot| slot.is_none())
    }

    /// Entries oldest to newest. Iteration starts at the cursor; unwritten
    /// slots are skipped.
    pub(crate) fn snapshot(&self) -> Vec<ConsumerOffset> {
        let n = self.slots.len();
        (0..n)
            .filter_map(|i| self.slots[(self.cursor + i) % n].clone())
            .collect()
    }
}
