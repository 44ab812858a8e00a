//! Engine configuration.
//!
//! Library defaults with runtime environment overrides.
//!
//! ```rust,ignore
//! use uring_engine::EngineConfig;
//!
//! // Defaults with env overrides
//! let config = EngineConfig::from_env();
//!
//! // Or customize programmatically
//! let config = EngineConfig::default().ring_entries(256).max_ops(1024);
//! ```

use std::str::FromStr;

use crate::error::{EngineError, Result};

pub mod defaults {
    /// Queue depth requested from the kernel.
    pub const RING_ENTRIES: u32 = 32;
    /// Operation table size; bounds true concurrency.
    pub const MAX_OPS: usize = 64;
}

/// Engine configuration with builder pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// Queue depth hint for `io_uring_setup`. The kernel may round it up.
    pub ring_entries: u32,
    /// Maximum operations in flight.
    pub max_ops: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            ring_entries: defaults::RING_ENTRIES,
            max_ops: defaults::MAX_OPS,
        }
    }
}

impl EngineConfig {
    /// Defaults with environment overrides.
    ///
    /// Environment variables (all optional):
    /// - `URING_RING_ENTRIES` - Queue depth hint
    /// - `URING_MAX_OPS` - Operation table size
    pub fn from_env() -> Self {
        Self {
            ring_entries: env_get("URING_RING_ENTRIES", defaults::RING_ENTRIES),
            max_ops: env_get("URING_MAX_OPS", defaults::MAX_OPS),
        }
    }

    pub fn ring_entries(mut self, n: u32) -> Self {
        self.ring_entries = n;
        self
    }

    pub fn max_ops(mut self, n: usize) -> Self {
        self.max_ops = n;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.ring_entries == 0 {
            return Err(EngineError::InvalidConfig("ring_entries must be > 0"));
        }
        if self.max_ops == 0 || self.max_ops > u32::MAX as usize {
            return Err(EngineError::InvalidConfig("max_ops must be in 1..=u32::MAX"));
        }
        Ok(())
    }
}

/// Get environment variable parsed as type T, or return default
#[inline]
fn env_get<T>(key: &str, default: T) -> T
where
    T: FromStr,
{
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_env_get_default() {
        let val: usize = env_get("__URING_TEST_UNSET_VAR__", 42);
        assert_eq!(val, 42);
    }

    #[test]
    fn test_env_get_invalid_parse() {
        std::env::set_var("__URING_TEST_INVALID__", "not_a_number");
        let val: u32 = env_get("__URING_TEST_INVALID__", 99);
        assert_eq!(val, 99);
        std::env::remove_var("__URING_TEST_INVALID__");
    }

    #[test]
    fn test_from_env_overrides() {
        std::env::set_var("URING_MAX_OPS", "7");
        let config = EngineConfig::from_env();
        std::env::remove_var("URING_MAX_OPS");
        assert_eq!(config.max_ops, 7);
    }

    #[test]
    fn test_builder_and_validate() {
        let config = EngineConfig::default().ring_entries(8).max_ops(4);
        assert_eq!(config, EngineConfig { ring_entries: 8, max_ops: 4 });
        assert!(config.validate().is_ok());

        assert!(EngineConfig::default().ring_entries(0).validate().is_err());
        assert!(EngineConfig::default().max_ops(0).validate().is_err());
    }
}
