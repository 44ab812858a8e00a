//! `RingHandle` — a real io_uring instance.
//!
//! Setup:
//! 1. `io_uring_setup(entries)`; the kernel fills in the granted geometry
//! 2. map the SQ ring (and the CQ ring with it when `FEAT_SINGLE_MMAP`)
//! 3. map the CQ ring separately on older kernels
//! 4. map the SQE array
//! 5. build the queue views from the kernel-reported offsets
//!
//! Every acquired resource is an owned guard, so a failure at any step
//! releases all earlier ones.

use std::mem::size_of;
use std::os::fd::{AsFd, AsRawFd, FromRawFd, OwnedFd, RawFd};

use tracing::debug;

use crate::error::{EngineError, Result};
use crate::mmap::Mmap;
use crate::ring::{CompletionQueue, RingBackend, SubmissionQueue};
use crate::sys::{self, Cqe, IoUringParams, Sqe};

/// Ring geometry the kernel actually granted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RingParams {
    pub sq_entries: u32,
    pub cq_entries: u32,
    pub features: u32,
}

impl RingParams {
    #[inline]
    pub fn single_mmap(&self) -> bool {
        self.features & sys::IORING_FEAT_SINGLE_MMAP != 0
    }
}

pub struct RingHandle {
    sq: SubmissionQueue,
    cq: CompletionQueue,
    params: RingParams,
    // The views above point into these mappings.
    _sqes: Mmap,
    _cq_ring: Option<Mmap>,
    _sq_ring: Mmap,
    fd: OwnedFd,
}

impl RingHandle {
    /// Create a ring with room for at least `entries` submissions.
    pub fn new(entries: u32) -> Result<Self> {
        if entries == 0 {
            return Err(EngineError::InvalidConfig("ring_entries must be > 0"));
        }

        let mut p = IoUringParams::default();
        let raw = sys::io_uring_setup(entries, &mut p).map_err(EngineError::Setup)?;
        // Safety: io_uring_setup returned a fresh fd that nothing else owns.
        let fd = unsafe { OwnedFd::from_raw_fd(raw) };

        let params = RingParams {
            sq_entries: p.sq_entries,
            cq_entries: p.cq_entries,
            features: p.features,
        };

        // Sizes come from the granted entry counts, not the hint.
        let mut sq_len = p.sq_off.array as usize + p.sq_entries as usize * size_of::<u32>();
        let mut cq_len = p.cq_off.cqes as usize + p.cq_entries as usize * size_of::<Cqe>();
        if params.single_mmap() {
            sq_len = sq_len.max(cq_len);
            cq_len = sq_len;
        }

        let sq_ring = Mmap::shared(fd.as_fd(), sq_len, sys::IORING_OFF_SQ_RING)
            .map_err(|source| EngineError::Map { region: "sq ring", source })?;

        let cq_ring = if params.single_mmap() {
            None
        } else {
            let map = Mmap::shared(fd.as_fd(), cq_len, sys::IORING_OFF_CQ_RING)
                .map_err(|source| EngineError::Map { region: "cq ring", source })?;
            Some(map)
        };

        let sqes = Mmap::shared(
            fd.as_fd(),
            p.sq_entries as usize * size_of::<Sqe>(),
            sys::IORING_OFF_SQES,
        )
        .map_err(|source| EngineError::Map { region: "sqes", source })?;

        // Safety: the regions were mapped from this ring fd with the
        // kernel's own sizes and are stored in the same struct as the views.
        let sq = unsafe { SubmissionQueue::new(&sq_ring, &sqes, &p.sq_off)? };
        let cq = unsafe { CompletionQueue::new(cq_ring.as_ref().unwrap_or(&sq_ring), &p.cq_off)? };

        debug!(
            fd = fd.as_raw_fd(),
            requested = entries,
            sq_entries = params.sq_entries,
            cq_entries = params.cq_entries,
            single_mmap = params.single_mmap(),
            "io_uring ring ready"
        );

        Ok(Self {
            sq,
            cq,
            params,
            _sqes: sqes,
            _cq_ring: cq_ring,
            _sq_ring: sq_ring,
            fd,
        })
    }

    #[inline]
    pub fn params(&self) -> RingParams {
        self.params
    }

    /// The ring fd, for diagnostics. Closing it is the handle's job.
    #[inline]
    pub fn fd(&self) -> RawFd {
        self.fd.as_raw_fd()
    }
}

impl RingBackend for RingHandle {
    #[inline]
    fn submission(&self) -> &SubmissionQueue {
        &self.sq
    }

    #[inline]
    fn completion(&self) -> &CompletionQueue {
        &self.cq
    }

    fn enter(&self, to_submit: u32, min_complete: u32, flags: u32) -> nix::Result<u32> {
        sys::io_uring_enter(self.fd.as_raw_fd(), to_submit, min_complete, flags)
    }
}

// No manual Drop: fields drop in declaration order, so the mappings are
// released before the fd is closed.
