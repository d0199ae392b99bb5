//! Pool allocation engine.
//!
//! ## Structure
//!
//! - [`manager`] - [`PoolManager`], the lock-guarded allocate/lookup/free API.
//! - [`config`] - [`PoolConfig`] and the [`ReleaseMode`] switch.
//!
//! ## Store layout
//!
//! | Key                              | Contents            |
//! |----------------------------------|---------------------|
//! | [`POOL_INFO_KEY`]                | [`PoolInfo`] cursor |
//! | [`POOL_LOCK_KEY`]                | pool-wide lock      |
//! | [`POOL_BLOCKS_PREFIX`]`<start>`  | [`BlockInfo`]       |
//!
//! [`PoolInfo`]: crate::codec::PoolInfo
//! [`BlockInfo`]: crate::codec::BlockInfo

pub mod config;
pub mod manager;

pub use config::{PoolConfig, ReleaseMode};
pub use manager::PoolManager;

use std::net::Ipv4Addr;

/// Store key of the pool cursor.
pub const POOL_INFO_KEY: &str = "ipblock/pool/info";

/// Name of the pool-wide exclusive lock shared by every manager.
pub const POOL_LOCK_KEY: &str = "ipblock/pool/.lock";

/// Key prefix of block records; the block's start address is appended.
pub const POOL_BLOCKS_PREFIX: &str = "ipblock/pool/blocks/";

/// Store key of the block record starting at `start`.
pub fn block_key(start: Ipv4Addr) -> String {
    format!("{POOL_BLOCKS_PREFIX}{start}")
}

/// Advances `addr` by `step` addresses over its 32-bit integer form.
///
/// Returns `None` if the result does not fit in IPv4 space.
pub fn advance(addr: Ipv4Addr, step: u32) -> Option<Ipv4Addr> {
    u32::from(addr).checked_add(step).map(Ipv4Addr::from)
}

#[cfg(test)]
mod layout_tests {
    use super::*;

    #[test]
    fn block_keys_share_the_prefix() {
        let key = block_key(Ipv4Addr::new(169, 254, 51, 4));
        assert_eq!(key, "ipblock/pool/blocks/169.254.51.4");
        assert!(key.starts_with(POOL_BLOCKS_PREFIX));
        assert!(!POOL_INFO_KEY.starts_with(POOL_BLOCKS_PREFIX));
        assert!(!POOL_LOCK_KEY.starts_with(POOL_BLOCKS_PREFIX));
    }

    #[test]
    fn advance_carries_across_octets() {
        assert_eq!(
            advance(Ipv4Addr::new(10, 0, 0, 252), 4),
            Some(Ipv4Addr::new(10, 0, 1, 0))
        );
        assert_eq!(
            advance(Ipv4Addr::new(10, 255, 255, 255), 1),
            Some(Ipv4Addr::new(11, 0, 0, 0))
        );
    }

    #[test]
    fn advance_refuses_to_wrap() {
        assert_eq!(advance(Ipv4Addr::new(255, 255, 255, 252), 4), None);
        assert_eq!(
            advance(Ipv4Addr::new(255, 255, 255, 251), 4),
            Some(Ipv4Addr::BROADCAST)
        );
    }
}
