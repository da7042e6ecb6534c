//! In-flight computation registry for coalescing concurrent calls
//!
//! One registry belongs to one [`AsyncMemoizer`](crate::AsyncMemoizer). The
//! first call for a key installs a shared handle under the lock; calls
//! arriving while it runs clone that handle instead of starting their own.
//!
//! The registry holds only a weak reference. The computation lives as long
//! as some caller awaits it, and carries a [`ClaimGuard`] that removes the
//! entry when the computation is dropped, whether it completed, failed or
//! lost its last waiter.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures_util::FutureExt;
use futures_util::future::{BoxFuture, Shared, WeakShared};
use rustc_hash::FxHashMap;
use stagecache_core::{MemoError, Table};
use stagecache_store::CacheKey;

pub type MemoResult = Result<Table, MemoError>;

/// Future returned to every caller of one computation.
pub type SharedCall = Shared<BoxFuture<'static, MemoResult>>;

/// Whether a call started a computation or joined one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Claim {
    Leader,
    Joined,
}

struct InFlight {
    id: u64,
    handle: WeakShared<BoxFuture<'static, MemoResult>>,
}

#[derive(Default)]
pub struct InFlightRegistry {
    entries: Mutex<FxHashMap<CacheKey, InFlight>>,
    next_id: AtomicU64,
}

impl std::fmt::Debug for InFlightRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InFlightRegistry")
            .field("in_flight", &self.len())
            .finish()
    }
}

impl InFlightRegistry {
    /// An empty registry, ready to hand to stages.
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Join the computation running for `key`, or start one with `start`.
    ///
    /// Check and install happen under one lock, so at most one computation
    /// per key is ever live. `start` receives the guard that must travel
    /// inside the returned future. The candidate future is built before
    /// locking and is never polled if the call joins instead.
    pub fn claim_or_join<F>(self: &Arc<Self>, key: &CacheKey, start: F) -> (SharedCall, Claim)
    where
        F: FnOnce(ClaimGuard) -> BoxFuture<'static, MemoResult>,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let guard = ClaimGuard {
            registry: Arc::clone(self),
            key: key.clone(),
            id,
        };
        let candidate = start(guard).shared();

        let mut entries = self.lock();
        if let Some(running) = entries.get(key).and_then(|e| e.handle.upgrade()) {
            // The candidate's guard releases through the lock.
            drop(entries);
            drop(candidate);
            return (running, Claim::Joined);
        }
        if let Some(handle) = candidate.downgrade() {
            // Replaces a stale entry whose computation already went away.
            entries.insert(key.clone(), InFlight { id, handle });
        }
        (candidate, Claim::Leader)
    }

    /// Number of keys with a live computation.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn is_in_flight(&self, key: &CacheKey) -> bool {
        self.lock().contains_key(key)
    }

    fn release(&self, key: &CacheKey, id: u64) {
        let mut entries = self.lock();
        if entries.get(key).is_some_and(|e| e.id == id) {
            entries.remove(key);
        }
    }

    fn lock(&self) -> MutexGuard<'_, FxHashMap<CacheKey, InFlight>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Removes its registry entry when dropped.
///
/// Only the entry it installed is removed; a newer claim for the same key
/// is left alone.
pub struct ClaimGuard {
    registry: Arc<InFlightRegistry>,
    key: CacheKey,
    id: u64,
}

impl ClaimGuard {
    pub fn key(&self) -> &CacheKey {
        &self.key
    }
}

impl Drop for ClaimGuard {
    fn drop(&mut self) {
        self.registry.release(&self.key, self.id);
    }
}
