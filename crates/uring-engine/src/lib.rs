//! # uring-engine — minimal io_uring completion engine
//!
//! Issues non-blocking reads, writes and accepts on caller-owned
//! descriptors through one io_uring instance, and hands results back as
//! typed events from a single polling call. No thread pool, no callbacks.
//!
//! The crate speaks the ring protocol directly: it maps the SQ/CQ rings
//! itself, publishes descriptors with release stores on the SQ tail, and
//! consumes completions with release stores on the CQ head.
//!
//! ## Layers
//!
//! | Module    | Role                                                   |
//! |-----------|--------------------------------------------------------|
//! | `sys`     | kernel ABI structs, setup/enter syscalls               |
//! | `ring`    | typed SQ/CQ views over mapped memory, `RingBackend`    |
//! | `handle`  | `RingHandle`: setup, layout negotiation, mappings      |
//! | `table`   | fixed operation table, correlation tags                |
//! | `engine`  | `Engine`: submit_recv / submit_send / submit_accept, wait |
//! | `sim`     | `SimKernel`: in-process kernel stand-in for tests      |
//!
//! ## Example
//!
//! ```rust,ignore
//! use uring_engine::{Engine, EngineConfig};
//!
//! let mut engine: Engine<_, u64> = Engine::new(&EngineConfig::from_env())?;
//! engine.submit_accept(listener_fd, 0)?;
//! let event = engine.wait()?;
//! if let Some(fd) = event.handle() {
//!     // new connection
//! }
//! ```

pub mod config;
pub mod error;
pub mod event;
pub mod table;

cfg_if::cfg_if! {
    if #[cfg(target_os = "linux")] {
        mod mmap;
        pub mod sys;
        pub mod ring;
        pub mod handle;
        pub mod engine;
        pub mod sim;

        pub use engine::{Completions, Engine};
        pub use handle::{RingHandle, RingParams};
        pub use ring::RingBackend;
    }
}

pub use config::EngineConfig;
pub use error::{EngineError, Result};
pub use event::{Event, Outcome};
pub use table::{OpKind, Tag};
