//! Error types for the IP block pool.
//!
//! This module defines the central [`Error`] enum returned by every
//! [`PoolManager`](crate::PoolManager) operation. Store and decode failures
//! only reach the caller when the configured
//! [`FailurePolicy`](crate::FailurePolicy) does not abort the process.
//!
//! ## Error Cases
//! - `BlockNotFound`: No live block matched the requested address or key.
//! - `PoolExhausted`: The cursor has run past the end of the managed range.
//! - `InvalidConfig`: The pool configuration is inconsistent.
//! - `InvalidAddress`: A caller supplied an unparsable IPv4 address.
//! - `Store`: The coordination store failed an I/O or lock operation.
//! - `Codec`: A persisted record could not be decoded.

use crate::codec::CodecError;
use crate::store::StoreError;
use std::net::Ipv4Addr;

pub type Result<T> = core::result::Result<T, Error>;

/// Unified error type for pool operations.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// No live block record matched the lookup.
    #[error("Block not found")]
    BlockNotFound,

    /// The next block would start outside the managed range.
    #[error("Pool exhausted: next block {next} is beyond the end of the range ({end})")]
    PoolExhausted { next: Ipv4Addr, end: Ipv4Addr },

    /// The pool configuration is invalid.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// A block address supplied by a caller is not a valid IPv4 address.
    #[error("Invalid block address: {0}")]
    InvalidAddress(String),

    /// The coordination store failed while performing `op`.
    #[error("Store error during {op}: {source}")]
    Store {
        op: &'static str,
        #[source]
        source: StoreError,
    },

    /// A persisted record could not be decoded.
    #[error(transparent)]
    Codec(#[from] CodecError),
}

impl Error {
    /// Returns `true` for errors caused by caller input or pool state rather
    /// than by the backing store.
    pub const fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::BlockNotFound
                | Self::PoolExhausted { .. }
                | Self::InvalidConfig(_)
                | Self::InvalidAddress(_)
        )
    }
}

/// Parses an optional caller-supplied block address.
///
/// Empty strings are treated as absent, matching how front ends pass through
/// unset query parameters and flags.
pub fn parse_block_address(raw: Option<&str>) -> Result<Option<Ipv4Addr>> {
    match raw.map(str::trim) {
        None | Some("") => Ok(None),
        Some(s) => s
            .parse()
            .map(Some)
            .map_err(|_| Error::InvalidAddress(s.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_address_is_absent() {
        assert_eq!(parse_block_address(None).unwrap(), None);
        assert_eq!(parse_block_address(Some("")).unwrap(), None);
        assert_eq!(parse_block_address(Some("  ")).unwrap(), None);
    }

    #[test]
    fn parses_dotted_quad() {
        assert_eq!(
            parse_block_address(Some("10.0.0.4")).unwrap(),
            Some(Ipv4Addr::new(10, 0, 0, 4))
        );
    }

    #[test]
    fn rejects_garbage() {
        let err = parse_block_address(Some("10.0.0.256")).unwrap_err();
        assert!(matches!(err, Error::InvalidAddress(ref s) if s == "10.0.0.256"));
        assert!(err.is_recoverable());
    }
}
