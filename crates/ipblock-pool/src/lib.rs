#![doc = include_str!("../README.md")]

#[cfg(feature = "clap")]
pub mod args;
pub mod codec;
mod error;
mod policy;
pub mod pool;
pub mod store;

#[cfg(feature = "clap")]
pub use crate::args::{PolicyKind, PoolArgs, StoreBackend};
pub use crate::codec::{BlockInfo, CodecError, PoolInfo};
pub use crate::error::*;
pub use crate::policy::FailurePolicy;
pub use crate::pool::{PoolConfig, PoolManager, ReleaseMode};
pub use crate::store::{
    ConsulConfig, ConsulStore, CoordinationStore, LockHandle, MemoryStore, StoreError,
};
