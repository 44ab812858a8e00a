//! Operation table — fixed pool of in-flight operations.
//!
//! Every submitted descriptor owns one slot from submission until its
//! completion is reaped. The slot's [`Tag`] travels through the kernel in
//! `user_data` and is resolved back here when the completion arrives.
//!
//! Idle slots are tracked in a bitmap and allocated first-fit (lowest
//! free index). Each slot carries a generation that is bumped on release,
//! so a tag for an earlier tenant of the slot never resolves.

use std::fmt;

/// Number of bits per block
const BITS_PER_BLOCK: usize = 64;

/// Correlation tag stored in the SQE `user_data` field.
///
/// Layout: `generation << 32 | index`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct Tag(u64);

impl Tag {
    #[inline]
    pub fn new(index: u32, generation: u32) -> Self {
        Self(((generation as u64) << 32) | index as u64)
    }

    #[inline]
    pub fn from_u64(raw: u64) -> Self {
        Self(raw)
    }

    #[inline]
    pub fn as_u64(self) -> u64 {
        self.0
    }

    #[inline]
    pub fn index(self) -> u32 {
        self.0 as u32
    }

    #[inline]
    pub fn generation(self) -> u32 {
        (self.0 >> 32) as u32
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/g{}", self.index(), self.generation())
    }
}

/// What an in-flight operation does.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OpKind {
    Recv,
    Send,
    Accept,
}

enum SlotState<C> {
    Idle,
    /// Allocated, descriptor not yet published.
    Reserved,
    Active { kind: OpKind, context: C },
}

struct Slot<C> {
    state: SlotState<C>,
    generation: u32,
}

pub struct OperationTable<C> {
    slots: Box<[Slot<C>]>,
    /// One bit per slot, set = idle.
    idle: Box<[u64]>,
    in_flight: usize,
}

impl<C> OperationTable<C> {
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0 && capacity <= u32::MAX as usize, "table capacity out of range");

        let num_blocks = (capacity + BITS_PER_BLOCK - 1) / BITS_PER_BLOCK;
        let mut idle = vec![u64::MAX; num_blocks].into_boxed_slice();
        let tail_bits = capacity % BITS_PER_BLOCK;
        if tail_bits != 0 {
            idle[num_blocks - 1] = (1u64 << tail_bits) - 1;
        }

        let slots = (0..capacity)
            .map(|_| Slot { state: SlotState::Idle, generation: 0 })
            .collect();

        Self { slots, idle, in_flight: 0 }
    }

    /// Reserve the lowest idle slot. `None` when every slot is taken.
    pub fn allocate(&mut self) -> Option<Tag> {
        let (block_idx, block) = self.idle.iter().enumerate().find(|(_, b)| **b != 0)?;
        let bit_idx = block.trailing_zeros() as usize;
        let index = block_idx * BITS_PER_BLOCK + bit_idx;

        self.idle[block_idx] &= !(1u64 << bit_idx);
        let slot = &mut self.slots[index];
        slot.state = SlotState::Reserved;
        self.in_flight += 1;
        Some(Tag::new(index as u32, slot.generation))
    }

    /// Record what a reserved slot is doing, once its descriptor is published.
    pub fn commit(&mut self, tag: Tag, kind: OpKind, context: C) {
        let slot = &mut self.slots[tag.index() as usize];
        debug_assert!(matches!(slot.state, SlotState::Reserved));
        debug_assert_eq!(slot.generation, tag.generation());
        slot.state = SlotState::Active { kind, context };
    }

    /// Return a reserved slot whose descriptor never reached the ring.
    ///
    /// The generation is left alone: no tag for this tenancy escaped.
    pub fn unreserve(&mut self, tag: Tag) {
        let index = tag.index() as usize;
        let slot = &mut self.slots[index];
        debug_assert!(matches!(slot.state, SlotState::Reserved));
        slot.state = SlotState::Idle;
        self.set_idle(index);
    }

    /// Free the active slot addressed by `tag`, returning its kind and context.
    ///
    /// Returns `None`, changing nothing, if the tag is out of range, the slot
    /// is not active, or the generation does not match.
    pub fn release(&mut self, tag: Tag) -> Option<(OpKind, C)> {
        let index = tag.index() as usize;
        let slot = self.slots.get_mut(index)?;
        if slot.generation != tag.generation() || !matches!(slot.state, SlotState::Active { .. }) {
            return None;
        }

        let SlotState::Active { kind, context } = std::mem::replace(&mut slot.state, SlotState::Idle) else {
            return None;
        };
        slot.generation = slot.generation.wrapping_add(1);
        self.set_idle(index);
        Some((kind, context))
    }

    /// Kind and context of a live operation.
    pub fn lookup(&self, tag: Tag) -> Option<(OpKind, &C)> {
        let slot = self.slots.get(tag.index() as usize)?;
        match &slot.state {
            SlotState::Active { kind, context } if slot.generation == tag.generation() => Some((*kind, context)),
            _ => None,
        }
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Slots not idle (reserved or active).
    #[inline]
    pub fn in_flight(&self) -> usize {
        self.in_flight
    }

    #[inline]
    pub fn is_full(&self) -> bool {
        self.in_flight == self.slots.len()
    }

    fn set_idle(&mut self, index: usize) {
        self.idle[index / BITS_PER_BLOCK] |= 1u64 << (index % BITS_PER_BLOCK);
        self.in_flight -= 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn active(table: &mut OperationTable<&'static str>, kind: OpKind, ctx: &'static str) -> Tag {
        let tag = table.allocate().unwrap();
        table.commit(tag, kind, ctx);
        tag
    }

    #[test]
    fn test_first_fit() {
        let mut table = OperationTable::new(4);
        let a = active(&mut table, OpKind::Recv, "a");
        let b = active(&mut table, OpKind::Recv, "b");
        let c = active(&mut table, OpKind::Recv, "c");
        assert_eq!((a.index(), b.index(), c.index()), (0, 1, 2));

        table.release(b).unwrap();
        let d = table.allocate().unwrap();
        assert_eq!(d.index(), 1);
    }

    #[test]
    fn test_full_then_release() {
        let mut table = OperationTable::new(2);
        let a = active(&mut table, OpKind::Send, "a");
        active(&mut table, OpKind::Send, "b");
        assert!(table.is_full());
        assert!(table.allocate().is_none());
        assert_eq!(table.in_flight(), 2);

        assert_eq!(table.release(a), Some((OpKind::Send, "a")));
        assert_eq!(table.in_flight(), 1);
        assert!(table.allocate().is_some());
    }

    #[test]
    fn test_generation_rejects_stale_tag() {
        let mut table = OperationTable::new(1);
        let first = active(&mut table, OpKind::Recv, "first");
        table.release(first).unwrap();

        let second = active(&mut table, OpKind::Accept, "second");
        assert_eq!(first.index(), second.index());
        assert_ne!(first.generation(), second.generation());

        assert!(table.release(first).is_none());
        assert_eq!(table.lookup(second), Some((OpKind::Accept, &"second")));
        assert_eq!(table.release(second), Some((OpKind::Accept, "second")));
    }

    #[test]
    fn test_release_rejects_out_of_range_and_idle() {
        let mut table: OperationTable<()> = OperationTable::new(3);
        assert!(table.release(Tag::new(17, 0)).is_none());
        assert!(table.release(Tag::new(0, 0)).is_none());
        assert_eq!(table.in_flight(), 0);
    }

    #[test]
    fn test_release_rejects_reserved() {
        let mut table: OperationTable<()> = OperationTable::new(2);
        let tag = table.allocate().unwrap();
        assert!(table.release(tag).is_none());
        table.unreserve(tag);
        assert_eq!(table.in_flight(), 0);
        // Unreserve keeps the generation: the tag never reached the kernel.
        assert_eq!(table.allocate(), Some(tag));
    }

    #[test]
    fn test_capacity_across_blocks() {
        let mut table: OperationTable<usize> = OperationTable::new(130);
        for i in 0..130 {
            let tag = table.allocate().unwrap();
            assert_eq!(tag.index() as usize, i);
            table.commit(tag, OpKind::Recv, i);
        }
        assert!(table.allocate().is_none());

        table.release(Tag::new(100, 0)).unwrap();
        assert_eq!(table.allocate().unwrap().index(), 100);
    }

    #[test]
    fn test_tag_roundtrip() {
        let tag = Tag::new(0xDEAD, 0xBEEF);
        assert_eq!(Tag::from_u64(tag.as_u64()), tag);
        assert_eq!(tag.index(), 0xDEAD);
        assert_eq!(tag.generation(), 0xBEEF);
        assert_eq!(tag.to_string(), "57005/g48879");
    }
}
