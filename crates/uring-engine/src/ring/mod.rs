//! Typed views over the shared SQ/CQ ring memory.
//!
//! Both rings are single-producer/single-consumer queues between this
//! process and the kernel. All cross-boundary visibility rests on the
//! four ring indices:
//!
//! | Index   | Written by | Engine access              |
//! |---------|------------|----------------------------|
//! | SQ head | kernel     | Acquire load               |
//! | SQ tail | engine     | Release store after write  |
//! | CQ head | engine     | Release store after read   |
//! | CQ tail | kernel     | Acquire load               |
//!
//! Indices are free-running `u32` counters; the slot is `index & mask`.
//!
//! The views are built from a mapped region plus the offsets the kernel
//! reported, and check every offset against the region length once at
//! construction. After that, accessors use raw pointers.

mod complete;
mod submit;

pub use complete::CompletionQueue;
pub use submit::SubmissionQueue;

use crate::error::{EngineError, Result};
use crate::mmap::Mmap;

/// The engine's view of a ring instance: its two queues plus the
/// notify call (`io_uring_enter`).
///
/// # Implementors
///
/// - `RingHandle`: a real kernel ring.
/// - `SimKernel`: in-process stand-in for tests and benches.
pub trait RingBackend {
    fn submission(&self) -> &SubmissionQueue;

    fn completion(&self) -> &CompletionQueue;

    /// Submit up to `to_submit` published SQEs and, with
    /// `IORING_ENTER_GETEVENTS`, block until `min_complete` CQEs are ready.
    fn enter(&self, to_submit: u32, min_complete: u32, flags: u32) -> nix::Result<u32>;
}

/// Check that `[offset, offset + len)` lies inside `region` and that
/// `offset` is aligned for `align`.
fn check_span(region: &Mmap, offset: usize, len: usize, align: usize, what: &'static str) -> Result<()> {
    let end = offset.checked_add(len).ok_or(EngineError::Layout(what))?;
    if end > region.len() || offset % align != 0 {
        return Err(EngineError::Layout(what));
    }
    Ok(())
}

/// Read and validate the `ring_mask`/`ring_entries` pair of a ring.
///
/// # Safety
/// Both offsets must already have passed `check_span`.
unsafe fn read_geometry(region: &Mmap, mask_off: usize, entries_off: usize) -> Result<(u32, u32)> {
    let mask = std::ptr::read_volatile(region.as_ptr().add(mask_off) as *const u32);
    let entries = std::ptr::read_volatile(region.as_ptr().add(entries_off) as *const u32);
    if entries == 0 || !entries.is_power_of_two() || mask != entries - 1 {
        return Err(EngineError::Layout("ring mask/entries"));
    }
    Ok((mask, entries))
}
