//! `SubmissionQueue` — producer side of the SQ ring.
//!
//! # Memory layout
//!
//! ```text
//! SQ ring region:   { head, tail, ring_mask, ring_entries, ..., array[entries] }
//! SQE region:       sqe[entries]
//! ```
//!
//! `array` holds indices into the SQE region, which decouples submission
//! order from storage slot. This engine always stores `array[i] = i`.
//!
//! Ring is full when `tail - head == entries`.

use std::mem::size_of;
use std::sync::atomic::{AtomicU32, Ordering};

use super::{check_span, read_geometry};
use crate::error::Result;
use crate::mmap::Mmap;
use crate::sys::{Sqe, SqRingOffsets};

pub struct SubmissionQueue {
    /// Consumer position, advanced by the kernel.
    head: *const AtomicU32,
    /// Producer position, advanced by us.
    tail: *const AtomicU32,
    array: *mut u32,
    sqes: *mut Sqe,
    mask: u32,
    entries: u32,
}

// Safety: the pointers target mappings owned by the same backend; the
// queue has exactly one producer, so it may move between threads but is
// never shared (no Sync).
unsafe impl Send for SubmissionQueue {}

impl SubmissionQueue {
    /// Build the view from the SQ ring region, the SQE region and the
    /// kernel-reported offsets.
    ///
    /// # Safety
    /// - `ring` and `sqes` must be the SQ ring and SQE array of one io_uring
    ///   instance (or a faithful stand-in with the same layout).
    /// - The returned view must not outlive either mapping.
    pub(crate) unsafe fn new(ring: &Mmap, sqes: &Mmap, off: &SqRingOffsets) -> Result<Self> {
        let word = size_of::<u32>();
        check_span(ring, off.head as usize, word, word, "sq head")?;
        check_span(ring, off.tail as usize, word, word, "sq tail")?;
        check_span(ring, off.ring_mask as usize, word, word, "sq ring_mask")?;
        check_span(ring, off.ring_entries as usize, word, word, "sq ring_entries")?;

        let (mask, entries) = read_geometry(ring, off.ring_mask as usize, off.ring_entries as usize)?;

        check_span(ring, off.array as usize, entries as usize * word, word, "sq array")?;
        check_span(sqes, 0, entries as usize * size_of::<Sqe>(), size_of::<u64>(), "sqe array")?;

        let base = ring.as_ptr();
        Ok(Self {
            head: base.add(off.head as usize) as *const AtomicU32,
            tail: base.add(off.tail as usize) as *const AtomicU32,
            array: base.add(off.array as usize) as *mut u32,
            sqes: sqes.as_ptr() as *mut Sqe,
            mask,
            entries,
        })
    }

    /// Publish one descriptor.
    ///
    /// Returns `false` without touching the ring when it is full; that is
    /// backpressure, not an error.
    pub fn push(&self, sqe: &Sqe) -> bool {
        let tail = self.tail().load(Ordering::Acquire);
        let head = self.head().load(Ordering::Acquire);
        if tail.wrapping_sub(head) >= self.entries {
            return false;
        }

        let idx = tail & self.mask;
        // Safety: idx < entries, and the slot at tail is not visible to
        // the kernel until the Release store below.
        unsafe {
            std::ptr::write_volatile(self.sqes.add(idx as usize), *sqe);
            std::ptr::write_volatile(self.array.add(idx as usize), idx);
        }

        self.tail().store(tail.wrapping_add(1), Ordering::Release);
        true
    }

    /// Published descriptors the kernel has not consumed yet.
    #[inline]
    pub fn pending(&self) -> u32 {
        let tail = self.tail().load(Ordering::Acquire);
        let head = self.head().load(Ordering::Acquire);
        tail.wrapping_sub(head)
    }

    #[inline]
    pub fn is_full(&self) -> bool {
        self.pending() >= self.entries
    }

    #[inline]
    pub fn capacity(&self) -> u32 {
        self.entries
    }

    /// Kernel side: consume the descriptor at head, if any.
    pub(crate) fn consume(&self) -> Option<Sqe> {
        let head = self.head().load(Ordering::Relaxed);
        let tail = self.tail().load(Ordering::Acquire);
        if head == tail {
            return None;
        }
        // Safety: head != tail, so the producer published this slot, and
        // the array entry it wrote is always < entries.
        let sqe = unsafe {
            let idx = std::ptr::read_volatile(self.array.add((head & self.mask) as usize));
            std::ptr::read_volatile(self.sqes.add((idx & self.mask) as usize))
        };
        self.head().store(head.wrapping_add(1), Ordering::Release);
        Some(sqe)
    }

    #[inline(always)]
    fn head(&self) -> &AtomicU32 {
        unsafe { &*self.head }
    }

    #[inline(always)]
    fn tail(&self) -> &AtomicU32 {
        unsafe { &*self.tail }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::EngineError;

    const HEAD: u32 = 0;
    const TAIL: u32 = 64;
    const MASK: u32 = 128;
    const ENTRIES: u32 = 132;
    const ARRAY: u32 = 192;

    fn offsets() -> SqRingOffsets {
        SqRingOffsets {
            head: HEAD,
            tail: TAIL,
            ring_mask: MASK,
            ring_entries: ENTRIES,
            array: ARRAY,
            ..Default::default()
        }
    }

    /// Lay out a fake SQ ring in anonymous memory (no kernel needed).
    fn alloc_test_ring(entries: u32) -> (Mmap, Mmap) {
        let ring = Mmap::anonymous(4096).unwrap();
        let sqes = Mmap::anonymous(entries as usize * size_of::<Sqe>()).unwrap();
        unsafe {
            *(ring.as_ptr().add(MASK as usize) as *mut u32) = entries - 1;
            *(ring.as_ptr().add(ENTRIES as usize) as *mut u32) = entries;
        }
        (ring, sqes)
    }

    fn sqe(user_data: u64) -> Sqe {
        Sqe { user_data, ..Default::default() }
    }

    #[test]
    fn test_push_consume_in_order() {
        let (ring, sqes) = alloc_test_ring(8);
        let sq = unsafe { SubmissionQueue::new(&ring, &sqes, &offsets()).unwrap() };

        for i in 0..3 {
            assert!(sq.push(&sqe(100 + i)));
        }
        assert_eq!(sq.pending(), 3);

        assert_eq!(sq.consume().unwrap().user_data, 100);
        assert_eq!(sq.consume().unwrap().user_data, 101);
        assert_eq!(sq.consume().unwrap().user_data, 102);
        assert!(sq.consume().is_none());
        assert_eq!(sq.pending(), 0);
    }

    #[test]
    fn test_ring_full_refuses_without_mutation() {
        let (ring, sqes) = alloc_test_ring(4);
        let sq = unsafe { SubmissionQueue::new(&ring, &sqes, &offsets()).unwrap() };

        for i in 0..4 {
            assert!(sq.push(&sqe(i)));
        }
        assert!(sq.is_full());
        assert!(!sq.push(&sqe(99)));
        assert_eq!(sq.pending(), 4);

        // The refused descriptor did not overwrite slot 0.
        assert_eq!(sq.consume().unwrap().user_data, 0);
        assert!(sq.push(&sqe(4)));
    }

    #[test]
    fn test_wrap_around() {
        let (ring, sqes) = alloc_test_ring(4);
        let sq = unsafe { SubmissionQueue::new(&ring, &sqes, &offsets()).unwrap() };

        for round in 0..5u64 {
            for i in 0..4 {
                assert!(sq.push(&sqe(round * 10 + i)));
            }
            for i in 0..4 {
                assert_eq!(sq.consume().unwrap().user_data, round * 10 + i);
            }
        }
    }

    #[test]
    fn test_index_array_points_at_slot() {
        let (ring, sqes) = alloc_test_ring(4);
        let sq = unsafe { SubmissionQueue::new(&ring, &sqes, &offsets()).unwrap() };
        sq.push(&sqe(1));
        sq.push(&sqe(2));
        let array = unsafe { ring.as_ptr().add(ARRAY as usize) as *const u32 };
        unsafe {
            assert_eq!(*array, 0);
            assert_eq!(*array.add(1), 1);
        }
    }

    #[test]
    fn test_rejects_bad_layout() {
        let (ring, sqes) = alloc_test_ring(8);

        let mut off = offsets();
        off.array = 4090;
        let err = unsafe { SubmissionQueue::new(&ring, &sqes, &off) }.err().unwrap();
        assert!(matches!(err, EngineError::Layout("sq array")));

        let mut off = offsets();
        off.tail = 66;
        let err = unsafe { SubmissionQueue::new(&ring, &sqes, &off) }.err().unwrap();
        assert!(matches!(err, EngineError::Layout("sq tail")));

        unsafe { *(ring.as_ptr().add(MASK as usize) as *mut u32) = 3 };
        let err = unsafe { SubmissionQueue::new(&ring, &sqes, &offsets()) }.err().unwrap();
        assert!(matches!(err, EngineError::Layout("ring mask/entries")));
    }
}
