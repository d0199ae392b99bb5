use crate::error::{Error, Result};
use crate::policy::FailurePolicy;
use core::time::Duration;
use std::net::Ipv4Addr;

/// Default first address of the managed range.
pub const DEFAULT_START_RANGE: Ipv4Addr = Ipv4Addr::new(169, 254, 51, 0);

/// Default last block start of the managed range.
pub const DEFAULT_END_RANGE: Ipv4Addr = Ipv4Addr::new(169, 254, 255, 244);

/// Default number of addresses per block.
pub const DEFAULT_BLOCK_SIZE: u32 = 4;

/// How long [`ReleaseMode::Deferred`] holds the pool lock by default.
pub const DEFAULT_DEFERRED_RELEASE_DELAY: Duration = Duration::from_secs(15);

/// Settings for a [`PoolManager`](super::PoolManager).
///
/// The range is only used when the store holds no cursor yet. Once a cursor
/// exists, its persisted range wins over whatever is configured here.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// First address handed out by a fresh pool.
    pub start_range: Ipv4Addr,
    /// Last address a block may start at.
    pub end_range: Ipv4Addr,
    /// Addresses per block.
    pub block_size: u32,
    /// What store and decode failures do to the caller.
    pub failure_policy: FailurePolicy,
    /// Lock hold time for [`ReleaseMode::Deferred`].
    pub deferred_release_delay: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            start_range: DEFAULT_START_RANGE,
            end_range: DEFAULT_END_RANGE,
            block_size: DEFAULT_BLOCK_SIZE,
            failure_policy: FailurePolicy::default(),
            deferred_release_delay: DEFAULT_DEFERRED_RELEASE_DELAY,
        }
    }
}

impl PoolConfig {
    pub fn validate(&self) -> Result<()> {
        if self.block_size == 0 {
            return Err(Error::InvalidConfig(
                "block size must be greater than 0".to_string(),
            ));
        }
        if self.start_range > self.end_range {
            return Err(Error::InvalidConfig(format!(
                "start of range ({}) is after end of range ({})",
                self.start_range, self.end_range
            )));
        }
        Ok(())
    }
}

/// When [`PoolManager::allocate`](super::PoolManager::allocate) gives the
/// pool lock back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReleaseMode {
    /// Release as soon as the operation completes.
    #[default]
    Immediate,

    /// Keep holding the lock for
    /// [`PoolConfig::deferred_release_delay`] after the operation completes.
    ///
    /// This exists only to demonstrate lock contention: every other
    /// allocate or free on the pool queues behind the held lock. It is not a
    /// throttle and has no other functional effect.
    Deferred,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = PoolConfig::default();
        config.validate().unwrap();
        assert_eq!(config.failure_policy, FailurePolicy::Abort);
        assert_eq!(config.block_size, 4);
    }

    #[test]
    fn zero_block_size_is_rejected() {
        let config = PoolConfig {
            block_size: 0,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn inverted_range_is_rejected() {
        let config = PoolConfig {
            start_range: Ipv4Addr::new(10, 0, 1, 0),
            end_range: Ipv4Addr::new(10, 0, 0, 0),
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(Error::InvalidConfig(_))));
    }
}
