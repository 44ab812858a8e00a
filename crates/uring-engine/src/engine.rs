//! `Engine` — the submit/wait surface collaborators use.
//!
//! ```text
//! submit_*:  allocate slot → build SQE (user_data = tag) → push to SQ
//!            → commit slot → io_uring_enter(pending, 0, 0)
//! wait:      CQ empty? io_uring_enter(pending, 1, GETEVENTS)
//!            → peek CQE → release slot by tag → advance CQ head → Event
//! ```
//!
//! One engine is driven from one thread. Operations take `&mut self`;
//! there is no internal locking. The kernel is the only concurrent actor,
//! synchronised through the ring indices.

use std::os::fd::RawFd;

use tracing::{debug, trace, warn};

use crate::config::EngineConfig;
use crate::error::{EngineError, Result};
use crate::event::Event;
use crate::handle::RingHandle;
use crate::ring::RingBackend;
use crate::sys::{self, Sqe};
use crate::table::{OpKind, OperationTable, Tag};

/// Completion engine over a ring backend `B`, carrying caller context `C`
/// for every in-flight operation.
pub struct Engine<B: RingBackend, C> {
    // Dropped before the backend: no slot outlives the ring.
    table: OperationTable<C>,
    backend: B,
}

impl<C> Engine<RingHandle, C> {
    /// Set up a kernel ring and an operation table per `config`.
    pub fn new(config: &EngineConfig) -> Result<Self> {
        config.validate()?;
        let ring = RingHandle::new(config.ring_entries)?;
        Self::with_backend(ring, config.max_ops)
    }
}

impl<B: RingBackend, C> Engine<B, C> {
    /// Drive an existing backend with a table of `max_ops` slots.
    pub fn with_backend(backend: B, max_ops: usize) -> Result<Self> {
        if max_ops == 0 || max_ops > u32::MAX as usize {
            return Err(EngineError::InvalidConfig("max_ops must be in 1..=u32::MAX"));
        }
        Ok(Self {
            table: OperationTable::new(max_ops),
            backend,
        })
    }

    #[inline]
    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Operations submitted and not yet reaped.
    #[inline]
    pub fn in_flight(&self) -> usize {
        self.table.in_flight()
    }

    /// Operation table size.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.table.capacity()
    }

    /// Queue a read of up to `len` bytes from `fd` into `buf`.
    ///
    /// # Safety
    /// `buf` must be valid for writes of `len` bytes and must stay valid and
    /// unmoved until the matching event has been returned.
    pub unsafe fn submit_recv(&mut self, fd: RawFd, buf: *mut u8, len: u32, context: C) -> Result<Tag> {
        let sqe = Sqe {
            opcode: sys::op::READ,
            fd,
            off: u64::MAX, // -1 = current position; required for streams
            addr: buf as u64,
            len,
            ..Default::default()
        };
        self.submit(OpKind::Recv, sqe, context)
    }

    /// Queue a write of `len` bytes from `buf` to `fd`.
    ///
    /// # Safety
    /// `buf` must be valid for reads of `len` bytes and must stay valid and
    /// unmoved until the matching event has been returned.
    pub unsafe fn submit_send(&mut self, fd: RawFd, buf: *const u8, len: u32, context: C) -> Result<Tag> {
        let sqe = Sqe {
            opcode: sys::op::WRITE,
            fd,
            off: u64::MAX,
            addr: buf as u64,
            len,
            ..Default::default()
        };
        self.submit(OpKind::Send, sqe, context)
    }

    /// Queue an accept on listening socket `fd`. The peer address is not
    /// collected; the new descriptor is created close-on-exec.
    pub fn submit_accept(&mut self, fd: RawFd, context: C) -> Result<Tag> {
        let sqe = Sqe {
            opcode: sys::op::ACCEPT,
            fd,
            op_flags: libc::SOCK_CLOEXEC as u32,
            ..Default::default()
        };
        self.submit(OpKind::Accept, sqe, context)
    }

    fn submit(&mut self, kind: OpKind, mut sqe: Sqe, context: C) -> Result<Tag> {
        let Some(tag) = self.table.allocate() else {
            trace!(?kind, "submit refused: table full");
            return Err(EngineError::TableFull);
        };
        sqe.user_data = tag.as_u64();

        if !self.backend.submission().push(&sqe) {
            self.table.unreserve(tag);
            trace!(?kind, "submit refused: ring full");
            return Err(EngineError::RingFull);
        }

        // The descriptor is published: from here on the kernel owns it.
        self.table.commit(tag, kind, context);
        trace!(%tag, ?kind, fd = sqe.fd, "submitted");
        self.notify();
        Ok(tag)
    }

    /// Tell the kernel about every published descriptor it has not consumed.
    ///
    /// A failure leaves them queued; the next notify or wait retries.
    fn notify(&self) {
        let pending = self.backend.submission().pending();
        if let Err(errno) = self.backend.enter(pending, 0, 0) {
            warn!(%errno, pending, "io_uring_enter submit failed; descriptors stay queued");
        }
    }

    /// Block until one completion is available and return it as an event.
    ///
    /// Exactly one completion is consumed per successful call. If the
    /// blocking call fails, `Err(Wait)` is returned and nothing is consumed,
    /// so retrying is safe.
    pub fn wait(&mut self) -> Result<Event<C>> {
        loop {
            if let Some(event) = self.try_wait()? {
                return Ok(event);
            }
            let pending = self.backend.submission().pending();
            self.backend
                .enter(pending, 1, sys::IORING_ENTER_GETEVENTS)
                .map_err(|errno| {
                    debug!(%errno, "io_uring_enter wait failed");
                    EngineError::Wait(errno)
                })?;
        }
    }

    /// Reap one completion if one is ready, without blocking.
    pub fn try_wait(&mut self) -> Result<Option<Event<C>>> {
        let cq = self.backend.completion();
        let Some(cqe) = cq.peek() else {
            return Ok(None);
        };

        let tag = Tag::from_u64(cqe.user_data);
        let released = self.table.release(tag);
        // Slot data is copied out; only now may the kernel reuse the entry.
        cq.advance();

        match released {
            Some((kind, context)) => {
                trace!(%tag, ?kind, res = cqe.res, "completed");
                Ok(Some(Event::from_result(kind, context, cqe.res)))
            }
            None => {
                warn!(%tag, res = cqe.res, "completion for unknown operation dropped");
                Err(EngineError::StaleCompletion(tag))
            }
        }
    }

    /// Drain the completions that are already in the ring, oldest first.
    ///
    /// The iterator never blocks and ends when the ring is empty; calling
    /// `completions()` again picks up anything that arrived since.
    pub fn completions(&mut self) -> Completions<'_, B, C> {
        Completions { engine: self }
    }
}

impl<B: RingBackend, C> Drop for Engine<B, C> {
    fn drop(&mut self) {
        let in_flight = self.table.in_flight();
        if in_flight > 0 {
            warn!(in_flight, "engine dropped with operations in flight");
        }
    }
}

/// Iterator returned by [`Engine::completions`].
pub struct Completions<'a, B: RingBackend, C> {
    engine: &'a mut Engine<B, C>,
}

impl<B: RingBackend, C> Iterator for Completions<'_, B, C> {
    type Item = Result<Event<C>>;

    fn next(&mut self) -> Option<Self::Item> {
        self.engine.try_wait().transpose()
    }
}
