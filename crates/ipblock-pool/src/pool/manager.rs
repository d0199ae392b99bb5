//! Lock-guarded block allocation.
//!
//! [`PoolManager`] owns every allocation decision. Mutations (`allocate`,
//! `free`) run as read-under-lock, compute, write-under-lock, release, using
//! the single pool-wide lock in the coordination store. Lookups take no lock
//! and return a point-in-time snapshot.

use super::config::{PoolConfig, ReleaseMode};
use super::{POOL_BLOCKS_PREFIX, POOL_INFO_KEY, POOL_LOCK_KEY, advance, block_key};
use crate::codec::{BlockInfo, PoolInfo, Record};
use crate::error::{Error, Result};
use crate::policy::FailurePolicy;
use crate::store::{CoordinationStore, LockHandle};
use core::time::Duration;
use parking_lot::Mutex;
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::task::TaskTracker;

/// Allocates, looks up and frees fixed-size IPv4 blocks from a shared range.
///
/// Any number of managers, in one process or many, may share a store. They
/// coordinate exclusively through the store's lock; the manager holds no
/// in-process lock around pool state. The cursor kept here is a mirror of the
/// persisted one and is refreshed from the store on every allocation.
pub struct PoolManager {
    store: Arc<dyn CoordinationStore>,
    policy: FailurePolicy,
    block_size: u32,
    deferred_release_delay: Duration,
    cursor: Mutex<PoolInfo>,
    deferred: TaskTracker,
}

impl PoolManager {
    /// Creates a manager and binds it to the pool cursor in `store`.
    ///
    /// Under the pool lock, adopts the persisted cursor if one exists
    /// (ignoring the configured range) or persists a new cursor at the start
    /// of the configured range.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] for an invalid configuration, and
    /// store or decode errors as dictated by the configured
    /// [`FailurePolicy`].
    pub async fn new(config: PoolConfig, store: Arc<dyn CoordinationStore>) -> Result<Self> {
        config.validate()?;

        let manager = Self {
            store,
            policy: config.failure_policy,
            block_size: config.block_size,
            deferred_release_delay: config.deferred_release_delay,
            cursor: Mutex::new(PoolInfo::new(config.start_range, config.end_range)),
            deferred: TaskTracker::new(),
        };
        manager.init().await?;
        Ok(manager)
    }

    /// Snapshot of the last cursor this manager read or wrote.
    pub fn cursor(&self) -> PoolInfo {
        *self.cursor.lock()
    }

    pub fn start(&self) -> Ipv4Addr {
        self.cursor.lock().start
    }

    pub fn end(&self) -> Ipv4Addr {
        self.cursor.lock().end
    }

    pub const fn block_size(&self) -> u32 {
        self.block_size
    }

    pub const fn failure_policy(&self) -> FailurePolicy {
        self.policy
    }

    /// Waits until every lock held by [`ReleaseMode::Deferred`] has been
    /// released.
    pub async fn flush_deferred_releases(&self) {
        if self.deferred.is_empty() {
            return;
        }
        tracing::info!(
            pending = self.deferred.len(),
            "Waiting for deferred lock releases"
        );
        self.deferred.close();
        self.deferred.wait().await;
        self.deferred.reopen();
    }

    async fn init(&self) -> Result<()> {
        tracing::debug!("Acquiring pool lock for initialization");
        let lock = self.acquire_lock().await?;
        let result = self.restore_cursor().await;
        self.finish(lock, ReleaseMode::Immediate, result).await
    }

    async fn restore_cursor(&self) -> Result<()> {
        let configured = self.cursor();
        match self.read_cursor().await? {
            Some(persisted) => {
                if persisted.start != configured.start || persisted.end != configured.end {
                    tracing::warn!(
                        configured_start = %configured.start,
                        configured_end = %configured.end,
                        persisted_start = %persisted.start,
                        persisted_end = %persisted.end,
                        "Configured range differs from the persisted pool; continuing the persisted pool"
                    );
                }
                tracing::info!(
                    start = %persisted.start,
                    end = %persisted.end,
                    next = %persisted.next,
                    "Restored pool cursor"
                );
                *self.cursor.lock() = persisted;
            }
            None => {
                self.write_cursor(&configured).await?;
                tracing::info!(
                    start = %configured.start,
                    end = %configured.end,
                    "Initialized new pool cursor"
                );
            }
        }
        Ok(())
    }

    /// Finds a live block by start address, or failing that by key.
    ///
    /// Takes no lock. The address takes precedence when both are given; with
    /// neither, nothing is found. Lookup by key scans every block record.
    #[tracing::instrument(skip(self))]
    pub async fn lookup(
        &self,
        block: Option<Ipv4Addr>,
        key: Option<&str>,
    ) -> Result<Option<BlockInfo>> {
        match (block, non_empty(key)) {
            (Some(start), _) => self.get_block(start).await,
            (None, Some(key)) => self.find_block(key).await,
            (None, None) => Ok(None),
        }
    }

    /// Allocates the next block from the pool.
    ///
    /// If `key` is given and a live block already carries it, that block is
    /// returned unchanged and the cursor does not move. Otherwise the cursor
    /// is advanced and persisted before the new block record is written, so
    /// a crash in between leaks the address rather than handing it out twice.
    ///
    /// `release` applies on every exit path, including errors.
    ///
    /// # Errors
    ///
    /// [`Error::PoolExhausted`] once the cursor has passed the end of the
    /// range, plus store and decode errors per the [`FailurePolicy`].
    #[tracing::instrument(skip(self))]
    pub async fn allocate(&self, key: Option<&str>, release: ReleaseMode) -> Result<BlockInfo> {
        let key = non_empty(key);
        let lock = self.acquire_lock().await?;
        let result = self.allocate_locked(key).await;
        self.finish(lock, release, result).await
    }

    async fn allocate_locked(&self, key: Option<&str>) -> Result<BlockInfo> {
        if let Some(key) = key
            && let Some(existing) = self.find_block(key).await?
        {
            tracing::info!(
                start = %existing.start,
                key,
                "Block already allocated for key, returning existing record"
            );
            return Ok(existing);
        }

        let start = self.reserve_next_block().await?;
        let block = BlockInfo::new(start, key.map(str::to_string));
        self.write_block(start, &block).await?;

        tracing::info!(start = %block.start, id = %block.id, key = ?block.key, "Allocated block");
        Ok(block)
    }

    async fn reserve_next_block(&self) -> Result<Ipv4Addr> {
        // Another manager may have advanced the cursor since we last saw it.
        let mut info = match self.read_cursor().await? {
            Some(info) => info,
            None => {
                let info = self.cursor();
                tracing::warn!(
                    next = %info.next,
                    "Pool cursor missing from store, continuing from local state"
                );
                info
            }
        };

        let reserved = info.next;
        let exhausted = Error::PoolExhausted {
            next: reserved,
            end: info.end,
        };
        if reserved > info.end {
            *self.cursor.lock() = info;
            return Err(exhausted);
        }
        info.next = advance(reserved, self.block_size).ok_or(exhausted)?;

        self.write_cursor(&info).await?;
        *self.cursor.lock() = info;
        tracing::debug!(reserved = %reserved, next = %info.next, "Advanced pool cursor");
        Ok(reserved)
    }

    /// Frees a live block by start address, or failing that by key.
    ///
    /// The cursor is never rewound: freed addresses are not handed out again.
    ///
    /// # Errors
    ///
    /// [`Error::BlockNotFound`] if nothing matches, plus store and decode
    /// errors per the [`FailurePolicy`].
    #[tracing::instrument(skip(self))]
    pub async fn free(&self, block: Option<Ipv4Addr>, key: Option<&str>) -> Result<BlockInfo> {
        let key = non_empty(key);
        let lock = self.acquire_lock().await?;
        let result = self.free_locked(block, key).await;
        self.finish(lock, ReleaseMode::Immediate, result).await
    }

    async fn free_locked(&self, block: Option<Ipv4Addr>, key: Option<&str>) -> Result<BlockInfo> {
        let found = match (block, key) {
            (Some(start), _) => self.get_block(start).await?.map(|b| (start, b)),
            (None, Some(key)) => self.find_block(key).await?.map(|b| (b.start, b)),
            (None, None) => None,
        };
        let (start, block) = found.ok_or(Error::BlockNotFound)?;

        let key = block_key(start);
        self.policy
            .run("delete block", || self.store.delete(&key))
            .await?;
        tracing::info!(start = %start, key = ?block.key, "Freed block");
        Ok(block)
    }

    async fn acquire_lock(&self) -> Result<LockHandle> {
        let started = Instant::now();
        let lock = self
            .policy
            .run("acquire lock", || self.store.acquire_lock(POOL_LOCK_KEY))
            .await?;
        tracing::debug!(
            waited_ms = started.elapsed().as_millis() as u64,
            "Acquired pool lock"
        );
        Ok(lock)
    }

    /// Releases `lock` per `mode`, then yields `result`.
    ///
    /// A failure of the operation itself takes precedence over a release
    /// failure.
    async fn finish<T>(&self, lock: LockHandle, mode: ReleaseMode, result: Result<T>) -> Result<T> {
        let released = self.release_lock(lock, mode).await;
        let value = result?;
        released?;
        Ok(value)
    }

    async fn release_lock(&self, lock: LockHandle, mode: ReleaseMode) -> Result<()> {
        match mode {
            ReleaseMode::Immediate => {
                self.policy
                    .run("release lock", || self.store.release(&lock))
                    .await?;
                tracing::debug!("Released pool lock");
            }
            ReleaseMode::Deferred => {
                let store = Arc::clone(&self.store);
                let policy = self.policy;
                let delay = self.deferred_release_delay;
                tracing::info!(
                    delay_secs = delay.as_secs(),
                    "Holding pool lock to demonstrate concurrent allocation"
                );
                self.deferred.spawn(async move {
                    tokio::time::sleep(delay).await;
                    match policy.run("release lock", || store.release(&lock)).await {
                        Ok(()) => tracing::info!("Deferred pool lock release complete"),
                        Err(e) => tracing::error!("Deferred pool lock release failed: {e}"),
                    }
                });
            }
        }
        Ok(())
    }

    async fn read_cursor(&self) -> Result<Option<PoolInfo>> {
        let raw = self
            .policy
            .run("get pool info", || self.store.get(POOL_INFO_KEY))
            .await?;
        raw.map(|raw| self.decode(POOL_INFO_KEY, &raw)).transpose()
    }

    async fn write_cursor(&self, info: &PoolInfo) -> Result<()> {
        let raw = info.encode().map_err(|e| self.policy.fail(e.into()))?;
        self.policy
            .run("save pool info", || self.store.put(POOL_INFO_KEY, raw.clone()))
            .await
    }

    async fn get_block(&self, start: Ipv4Addr) -> Result<Option<BlockInfo>> {
        let key = block_key(start);
        let raw = self
            .policy
            .run("get block", || self.store.get(&key))
            .await?;
        raw.map(|raw| self.decode(&key, &raw)).transpose()
    }

    /// Linear scan over every block record for the first one tagged `key`.
    async fn find_block(&self, key: &str) -> Result<Option<BlockInfo>> {
        let records = self
            .policy
            .run("list blocks", || self.store.list_by_prefix(POOL_BLOCKS_PREFIX))
            .await?;

        for (record_key, raw) in records {
            let block: BlockInfo = self.decode(&record_key, &raw)?;
            if block.has_key(key) {
                return Ok(Some(block));
            }
        }
        Ok(None)
    }

    async fn write_block(&self, start: Ipv4Addr, block: &BlockInfo) -> Result<()> {
        let key = block_key(start);
        let raw = block.encode().map_err(|e| self.policy.fail(e.into()))?;
        self.policy
            .run("save block", || self.store.put(&key, raw.clone()))
            .await
    }

    fn decode<R: Record>(&self, key: &str, raw: &[u8]) -> Result<R> {
        R::decode(key, raw).map_err(|e| self.policy.fail(e.into()))
    }
}

fn non_empty(key: Option<&str>) -> Option<&str> {
    key.filter(|k| !k.is_empty())
}
