//! `SimKernel` — in-process stand-in for the kernel side of a ring.
//!
//! Lays out SQ/CQ rings in anonymous memory exactly as the kernel would
//! (control words, index array, entry arrays at reported offsets) and
//! builds the same queue views as `RingHandle`. The engine cannot tell
//! the difference.
//!
//! Behaviour of `enter()`:
//! - `to_submit > 0`: consumes up to that many SQEs into an in-flight
//!   list. Nothing executes; the test decides when and in which order
//!   operations complete via [`SimKernel::complete`].
//! - `IORING_ENTER_GETEVENTS` with an empty CQ: a real kernel would block.
//!   The sim fails with `EINTR` instead, as an interrupted wait would.
//!
//! Failures can be injected for the next notify or the next wait.

use std::cell::{Cell, RefCell};
use std::mem::size_of;

use nix::errno::Errno;

use crate::error::{EngineError, Result};
use crate::mmap::Mmap;
use crate::ring::{CompletionQueue, RingBackend, SubmissionQueue};
use crate::sys::{self, Cqe, CqRingOffsets, Sqe, SqRingOffsets};

// Control block layout: head and tail on separate cache lines.
const OFF_HEAD: u32 = 0;
const OFF_TAIL: u32 = 64;
const OFF_MASK: u32 = 128;
const OFF_ENTRIES: u32 = 132;
const OFF_EXTRA: u32 = 136;
const OFF_ARRAY: u32 = 192;

pub struct SimKernel {
    sq: SubmissionQueue,
    cq: CompletionQueue,
    /// Consumed SQEs whose completion has not been posted yet.
    inflight: RefCell<Vec<Sqe>>,
    enter_calls: Cell<usize>,
    fail_notify: Cell<Option<Errno>>,
    fail_wait: Cell<Option<Errno>>,
    _sqes: Mmap,
    _cq_ring: Mmap,
    _sq_ring: Mmap,
}

impl SimKernel {
    /// A ring with `entries` SQEs (rounded up to a power of two) and twice
    /// as many CQEs, matching the kernel's default sizing.
    pub fn new(entries: u32) -> Result<Self> {
        if entries == 0 {
            return Err(EngineError::InvalidConfig("ring_entries must be > 0"));
        }
        let sq_entries = entries.next_power_of_two();
        let cq_entries = sq_entries * 2;

        let map = |len: usize, region: &'static str| {
            Mmap::anonymous(len).map_err(|source| EngineError::Map { region, source })
        };
        let sq_ring = map(OFF_ARRAY as usize + sq_entries as usize * size_of::<u32>(), "sq ring")?;
        let cq_ring = map(OFF_ARRAY as usize + cq_entries as usize * size_of::<Cqe>(), "cq ring")?;
        let sqes = map(sq_entries as usize * size_of::<Sqe>(), "sqes")?;

        // Safety: fresh mappings, offsets are inside them and 4-byte aligned.
        unsafe {
            write_u32(&sq_ring, OFF_MASK, sq_entries - 1);
            write_u32(&sq_ring, OFF_ENTRIES, sq_entries);
            write_u32(&cq_ring, OFF_MASK, cq_entries - 1);
            write_u32(&cq_ring, OFF_ENTRIES, cq_entries);
        }

        let sq_off = SqRingOffsets {
            head: OFF_HEAD,
            tail: OFF_TAIL,
            ring_mask: OFF_MASK,
            ring_entries: OFF_ENTRIES,
            flags: OFF_EXTRA,
            dropped: OFF_EXTRA + 4,
            array: OFF_ARRAY,
            ..Default::default()
        };
        let cq_off = CqRingOffsets {
            head: OFF_HEAD,
            tail: OFF_TAIL,
            ring_mask: OFF_MASK,
            ring_entries: OFF_ENTRIES,
            overflow: OFF_EXTRA,
            cqes: OFF_ARRAY,
            ..Default::default()
        };

        // Safety: the views live in the same struct as the mappings.
        let sq = unsafe { SubmissionQueue::new(&sq_ring, &sqes, &sq_off)? };
        let cq = unsafe { CompletionQueue::new(&cq_ring, &cq_off)? };

        Ok(Self {
            sq,
            cq,
            inflight: RefCell::new(Vec::new()),
            enter_calls: Cell::new(0),
            fail_notify: Cell::new(None),
            fail_wait: Cell::new(None),
            _sqes: sqes,
            _cq_ring: cq_ring,
            _sq_ring: sq_ring,
        })
    }

    /// Post the completion of the in-flight operation carrying `user_data`.
    ///
    /// Returns `false` if no such operation was consumed or the CQ is full.
    pub fn complete(&self, user_data: u64, res: i32) -> bool {
        let mut inflight = self.inflight.borrow_mut();
        let Some(pos) = inflight.iter().position(|sqe| sqe.user_data == user_data) else {
            return false;
        };
        if !self.cq.post(Cqe { user_data, res, flags: 0 }) {
            return false;
        }
        inflight.remove(pos);
        true
    }

    /// Post an arbitrary completion, bypassing the in-flight list.
    pub fn post_raw(&self, user_data: u64, res: i32) -> bool {
        self.cq.post(Cqe { user_data, res, flags: 0 })
    }

    /// SQEs consumed but not yet completed, in submission order.
    pub fn inflight(&self) -> Vec<Sqe> {
        self.inflight.borrow().clone()
    }

    /// Number of `enter()` calls so far.
    pub fn enter_calls(&self) -> usize {
        self.enter_calls.get()
    }

    /// Make the next submitting `enter()` fail with `errno`.
    pub fn fail_next_notify(&self, errno: Errno) {
        self.fail_notify.set(Some(errno));
    }

    /// Make the next waiting `enter()` fail with `errno`.
    pub fn fail_next_wait(&self, errno: Errno) {
        self.fail_wait.set(Some(errno));
    }
}

impl RingBackend for SimKernel {
    fn submission(&self) -> &SubmissionQueue {
        &self.sq
    }

    fn completion(&self) -> &CompletionQueue {
        &self.cq
    }

    fn enter(&self, to_submit: u32, min_complete: u32, flags: u32) -> nix::Result<u32> {
        self.enter_calls.set(self.enter_calls.get() + 1);

        let mut submitted = 0;
        if to_submit > 0 {
            if let Some(errno) = self.fail_notify.take() {
                return Err(errno);
            }
            let mut inflight = self.inflight.borrow_mut();
            while submitted < to_submit {
                let Some(sqe) = self.sq.consume() else { break };
                inflight.push(sqe);
                submitted += 1;
            }
        }

        if flags & sys::IORING_ENTER_GETEVENTS != 0 && min_complete > 0 {
            if let Some(errno) = self.fail_wait.take() {
                return Err(errno);
            }
            if self.cq.len() < min_complete {
                return Err(Errno::EINTR);
            }
        }

        Ok(submitted)
    }
}

unsafe fn write_u32(region: &Mmap, offset: u32, value: u32) {
    std::ptr::write_volatile(region.as_ptr().add(offset as usize) as *mut u32, value);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_geometry_rounds_up() {
        let sim = SimKernel::new(5).unwrap();
        assert_eq!(sim.submission().capacity(), 8);
        assert_eq!(sim.completion().capacity(), 16);
    }

    #[test]
    fn test_enter_consumes_and_complete_posts() {
        let sim = SimKernel::new(4).unwrap();
        assert!(sim.submission().push(&Sqe { user_data: 5, ..Default::default() }));
        assert_eq!(sim.enter(1, 0, 0), Ok(1));
        assert_eq!(sim.submission().pending(), 0);
        assert_eq!(sim.inflight().len(), 1);

        assert!(!sim.complete(6, 0));
        assert!(sim.complete(5, 3));
        assert!(sim.inflight().is_empty());
        assert_eq!(sim.completion().peek(), Some(Cqe { user_data: 5, res: 3, flags: 0 }));
    }

    #[test]
    fn test_wait_on_empty_cq_is_interrupted() {
        let sim = SimKernel::new(4).unwrap();
        assert_eq!(sim.enter(0, 1, sys::IORING_ENTER_GETEVENTS), Err(Errno::EINTR));
        sim.fail_next_wait(Errno::EBADF);
        assert_eq!(sim.enter(0, 1, sys::IORING_ENTER_GETEVENTS), Err(Errno::EBADF));
        assert_eq!(sim.enter_calls(), 2);
    }
}
