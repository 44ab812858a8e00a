//! `CompletionQueue` — consumer side of the CQ ring.
//!
//! ```text
//! CQ ring region:   { head, tail, ring_mask, ring_entries, overflow, ..., cqes[entries] }
//! ```
//!
//! Reading is split in two steps, `peek()` then `advance()`, so the
//! caller can finish with the entry before the kernel may reuse it.

use std::mem::size_of;
use std::sync::atomic::{AtomicU32, Ordering};

use super::{check_span, read_geometry};
use crate::error::Result;
use crate::mmap::Mmap;
use crate::sys::{Cqe, CqRingOffsets};

pub struct CompletionQueue {
    /// Consumer position, advanced by us.
    head: *const AtomicU32,
    /// Producer position, advanced by the kernel.
    tail: *const AtomicU32,
    cqes: *mut Cqe,
    mask: u32,
    entries: u32,
}

// Safety: see SubmissionQueue; one consumer, never shared.
unsafe impl Send for CompletionQueue {}

impl CompletionQueue {
    /// # Safety
    /// - `ring` must be the CQ ring region of one io_uring instance (or a
    ///   faithful stand-in with the same layout).
    /// - The returned view must not outlive the mapping.
    pub(crate) unsafe fn new(ring: &Mmap, off: &CqRingOffsets) -> Result<Self> {
        let word = size_of::<u32>();
        check_span(ring, off.head as usize, word, word, "cq head")?;
        check_span(ring, off.tail as usize, word, word, "cq tail")?;
        check_span(ring, off.ring_mask as usize, word, word, "cq ring_mask")?;
        check_span(ring, off.ring_entries as usize, word, word, "cq ring_entries")?;

        let (mask, entries) = read_geometry(ring, off.ring_mask as usize, off.ring_entries as usize)?;

        check_span(ring, off.cqes as usize, entries as usize * size_of::<Cqe>(), size_of::<u64>(), "cqe array")?;

        let base = ring.as_ptr();
        Ok(Self {
            head: base.add(off.head as usize) as *const AtomicU32,
            tail: base.add(off.tail as usize) as *const AtomicU32,
            cqes: base.add(off.cqes as usize) as *mut Cqe,
            mask,
            entries,
        })
    }

    /// Copy out the entry at head without consuming it.
    pub fn peek(&self) -> Option<Cqe> {
        let head = self.head().load(Ordering::Acquire);
        let tail = self.tail().load(Ordering::Acquire);
        if head == tail {
            return None;
        }
        // Safety: head != tail, so the kernel published this slot before
        // its Release store of tail, which our Acquire load observed.
        Some(unsafe { std::ptr::read_volatile(self.cqes.add((head & self.mask) as usize)) })
    }

    /// Hand the entry at head back to the kernel.
    ///
    /// Must only follow a successful `peek()`.
    pub fn advance(&self) {
        let head = self.head().load(Ordering::Relaxed);
        self.head().store(head.wrapping_add(1), Ordering::Release);
    }

    /// Completions ready to be read.
    #[inline]
    pub fn len(&self) -> u32 {
        let head = self.head().load(Ordering::Acquire);
        let tail = self.tail().load(Ordering::Acquire);
        tail.wrapping_sub(head)
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[inline]
    pub fn capacity(&self) -> u32 {
        self.entries
    }

    /// Current consumer position.
    #[inline]
    pub fn head_index(&self) -> u32 {
        self.head().load(Ordering::Acquire)
    }

    /// Kernel side: publish one completion. Returns `false` if full.
    pub(crate) fn post(&self, cqe: Cqe) -> bool {
        let tail = self.tail().load(Ordering::Relaxed);
        let head = self.head().load(Ordering::Acquire);
        if tail.wrapping_sub(head) >= self.entries {
            return false;
        }
        unsafe {
            std::ptr::write_volatile(self.cqes.add((tail & self.mask) as usize), cqe);
        }
        self.tail().store(tail.wrapping_add(1), Ordering::Release);
        true
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
