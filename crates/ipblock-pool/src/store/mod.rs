//! Coordination store abstraction.
//!
//! The pool persists its cursor and block records in a durable key-value
//! namespace and serializes mutations with a single named exclusive lock.
//! [`CoordinationStore`] is the narrow capability interface covering both;
//! it carries no pool semantics.
//!
//! ## Implementations
//!
//! - [`MemoryStore`] - in-process map and lock table, for tests and demos.
//! - [`ConsulStore`] - Consul KV and session-based locks over HTTP.

mod consul;
mod memory;

pub use consul::{ConsulConfig, ConsulStore};
pub use memory::MemoryStore;

use async_trait::async_trait;
use bytes::Bytes;

/// Failure talking to the coordination store.
#[derive(thiserror::Error, Debug)]
pub enum StoreError {
    /// The request could not be sent or the response could not be read.
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// The backend answered with a status the store does not expect.
    #[error("unexpected response to {op} ({status}): {body}")]
    UnexpectedResponse {
        op: &'static str,
        status: u16,
        body: String,
    },

    /// The backend answered with a payload the store could not interpret.
    #[error("malformed response to {op}: {reason}")]
    MalformedResponse { op: &'static str, reason: String },

    /// The lock handle does not own the named lock.
    #[error("lock `{name}` is not held by this handle")]
    LockNotHeld { name: String },
}

/// Proof of exclusive ownership of a named lock.
///
/// The handle is plain data so it can be moved into a deferred release task.
/// `token` identifies the owner to the backend (a Consul session ID, or an
/// in-memory owner token).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockHandle {
    name: String,
    token: String,
}

impl LockHandle {
    pub fn new(name: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            token: token.into(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn token(&self) -> &str {
        &self.token
    }
}

/// Durable key-value namespace plus a named distributed exclusive lock.
///
/// Every method returns the raw backend outcome; deciding whether a failure
/// is fatal is left to the caller's [`FailurePolicy`](crate::FailurePolicy).
#[async_trait]
pub trait CoordinationStore: Send + Sync {
    /// Blocks until the named lock is exclusively held by the returned handle.
    async fn acquire_lock(&self, name: &str) -> Result<LockHandle, StoreError>;

    /// Releases a lock previously returned by
    /// [`acquire_lock`](Self::acquire_lock).
    ///
    /// May be called again with the same handle after a failure; a repeat
    /// only finishes whatever the failed call left undone.
    async fn release(&self, lock: &LockHandle) -> Result<(), StoreError>;

    /// Reads a key; `None` if it does not exist.
    async fn get(&self, key: &str) -> Result<Option<Bytes>, StoreError>;

    /// Creates or overwrites a key.
    async fn put(&self, key: &str, value: Bytes) -> Result<(), StoreError>;

    /// Deletes a key. Deleting a missing key is not an error.
    async fn delete(&self, key: &str) -> Result<(), StoreError>;

    /// Lists every key starting with `prefix`, ordered by key.
    async fn list_by_prefix(&self, prefix: &str) -> Result<Vec<(String, Bytes)>, StoreError>;
}
