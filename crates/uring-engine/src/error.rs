//! Engine error types.

use nix::errno::Errno;
use thiserror::Error;

use crate::table::Tag;

/// Errors returned by the engine.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Configuration rejected before any kernel call.
    #[error("invalid config: {0}")]
    InvalidConfig(&'static str),
    /// `io_uring_setup(2)` failed.
    #[error("io_uring setup: {0}")]
    Setup(#[source] Errno),
    /// Mapping one of the ring regions failed.
    #[error("mmap {region}: {source}")]
    Map {
        region: &'static str,
        #[source]
        source: Errno,
    },
    /// The kernel reported a ring layout that does not fit its mapping.
    #[error("ring layout: bad {0}")]
    Layout(&'static str),
    /// Every operation slot is in flight.
    #[error("operation table full")]
    TableFull,
    /// The submission ring has no free entry.
    #[error("submission ring full")]
    RingFull,
    /// Blocking for completions failed; nothing was consumed.
    #[error("io_uring wait: {0}")]
    Wait(#[source] Errno),
    /// A completion carried a tag that does not address a live operation.
    /// The entry was consumed.
    #[error("stale completion tag {0}")]
    StaleCompletion(Tag),
}

impl EngineError {
    /// Admission refusals: nothing changed, retry after reaping completions.
    pub fn is_backpressure(&self) -> bool {
        matches!(self, Self::TableFull | Self::RingFull)
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;
