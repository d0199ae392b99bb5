use super::{CoordinationStore, LockHandle, StoreError};
use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::Notify;

/// In-process [`CoordinationStore`].
///
/// Keys live in an ordered map so prefix listings come back sorted, matching
/// the Consul backend. Locks are tracked in a holder table; waiters park on a
/// [`Notify`] and re-check after every release.
///
/// Clones share state, so several managers built on clones of one store
/// behave like independent processes pointed at the same backend.
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Inner>,
}

#[derive(Default)]
struct Inner {
    kv: Mutex<BTreeMap<String, Bytes>>,
    locks: Mutex<HashMap<String, String>>,
    released: Notify,
    next_token: AtomicU64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` if the named lock currently has a holder.
    pub fn is_locked(&self, name: &str) -> bool {
        self.inner.locks.lock().contains_key(name)
    }

    /// Number of keys currently stored.
    pub fn len(&self) -> usize {
        self.inner.kv.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl CoordinationStore for MemoryStore {
    async fn acquire_lock(&self, name: &str) -> Result<LockHandle, StoreError> {
        let token = format!(
            "mem-{}",
            self.inner.next_token.fetch_add(1, Ordering::Relaxed)
        );

        loop {
            // Register interest before checking so a release between the
            // check and the await is not missed.
            let released = self.inner.released.notified();
            {
                let mut locks = self.inner.locks.lock();
                if !locks.contains_key(name) {
                    locks.insert(name.to_string(), token.clone());
                    return Ok(LockHandle::new(name, token));
                }
            }
            released.await;
        }
    }

    async fn release(&self, lock: &LockHandle) -> Result<(), StoreError> {
        {
            let mut locks = self.inner.locks.lock();
            match locks.get(lock.name()) {
                Some(holder) if holder == lock.token() => {
                    locks.remove(lock.name());
                }
                _ => {
                    return Err(StoreError::LockNotHeld {
                        name: lock.name().to_string(),
                    });
                }
            }
        }
        self.inner.released.notify_waiters();
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<Bytes>, StoreError> {
        Ok(self.inner.kv.lock().get(key).cloned())
    }

    async fn put(&self, key: &str, value: Bytes) -> Result<(), StoreError> {
        self.inner.kv.lock().insert(key.to_string(), value);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.inner.kv.lock().remove(key);
        Ok(())
    }

    async fn list_by_prefix(&self, prefix: &str) -> Result<Vec<(String, Bytes)>, StoreError> {
        let kv = self.inner.kv.lock();
        Ok(kv
            .range(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn get_put_delete() {
        let store = MemoryStore::new();
        assert_eq!(store.get("a").await.unwrap(), None);

        store.put("a", Bytes::from_static(b"1")).await.unwrap();
        assert_eq!(store.get("a").await.unwrap(), Some(Bytes::from_static(b"1")));

        store.put("a", Bytes::from_static(b"2")).await.unwrap();
        assert_eq!(store.get("a").await.unwrap(), Some(Bytes::from_static(b"2")));

        store.delete("a").await.unwrap();
        assert_eq!(store.get("a").await.unwrap(), None);
        // Deleting again is fine.
        store.delete("a").await.unwrap();
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn list_by_prefix_is_ordered_and_bounded() {
        let store = MemoryStore::new();
        for key in ["p/b", "p/a", "q/a", "p", "p/c"] {
            store.put(key, Bytes::from(key.to_string())).await.unwrap();
        }

        let keys: Vec<_> = store
            .list_by_prefix("p/")
            .await
            .unwrap()
            .into_iter()
            .map(|(k, _)| k)
            .collect();
        assert_eq!(keys, ["p/a", "p/b", "p/c"]);
        assert!(store.list_by_prefix("z/").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn lock_is_exclusive_until_released() {
        let store = MemoryStore::new();
        let first = store.acquire_lock("pool").await.unwrap();
        assert!(store.is_locked("pool"));

        let contender = {
            let store = store.clone();
            tokio::spawn(async move { store.acquire_lock("pool").await.unwrap() })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!contender.is_finished());

        store.release(&first).await.unwrap();
        let second = tokio::time::timeout(Duration::from_secs(1), contender)
            .await
            .unwrap()
            .unwrap();
        assert_ne!(first.token(), second.token());

        store.release(&second).await.unwrap();
        assert!(!store.is_locked("pool"));
    }

    #[tokio::test]
    async fn distinct_names_do_not_contend() {
        let store = MemoryStore::new();
        let a = store.acquire_lock("a").await.unwrap();
        let b = tokio::time::timeout(Duration::from_secs(1), store.acquire_lock("b"))
            .await
            .unwrap()
            .unwrap();
        store.release(&a).await.unwrap();
        store.release(&b).await.unwrap();
    }

    #[tokio::test]
    async fn stale_handle_cannot_release() {
        let store = MemoryStore::new();
        let first = store.acquire_lock("pool").await.unwrap();
        store.release(&first).await.unwrap();

        let second = store.acquire_lock("pool").await.unwrap();
        let err = store.release(&first).await.unwrap_err();
        assert!(matches!(err, StoreError::LockNotHeld { .. }));
        assert!(store.is_locked("pool"));
        store.release(&second).await.unwrap();
    }
}
