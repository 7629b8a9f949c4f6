//! Keyed async locks with a bounded wait.
//!
//! [`KeyedLocks`] hands out one [`tokio::sync::Mutex`] per key. Holders of
//! different keys never contend; holders of the same key are served in
//! arrival order (tokio's mutex is fair). A caller that cannot acquire the
//! key within the configured timeout gets [`LockTimeout`] instead of waiting
//! forever.
//!
//! # Example
//!
//! ```rust
//! use clinic_runtime::locks::KeyedLocks;
//! use std::time::Duration;
//!
//! # async fn example() -> Result<(), clinic_runtime::LockTimeout> {
//! let locks = KeyedLocks::new(Duration::from_millis(500));
//! let guard = locks.acquire(&"schedule-1".to_string()).await?;
//! assert_eq!(guard.key(), "schedule-1");
//! # Ok(())
//! # }
//! ```

use crate::metrics::LockMetrics;
use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

/// Number of tracked keys above which idle entries are dropped
const PRUNE_THRESHOLD: usize = 1024;

/// The key could not be acquired within the timeout.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Timed out after {waited:?} waiting for lock on {key}")]
pub struct LockTimeout {
    /// Key that was contended
    pub key: String,
    /// How long the caller waited
    pub waited: Duration,
}

/// A set of async mutexes addressed by key.
pub struct KeyedLocks<K> {
    slots: Mutex<HashMap<K, Arc<AsyncMutex<()>>>>,
    timeout: Duration,
}

impl<K> KeyedLocks<K>
where
    K: Eq + Hash + Clone + fmt::Display,
{
    /// Creates an empty lock set with the given acquisition timeout.
    #[must_use]
    pub fn new(timeout: Duration) -> Self {
        Self {
            slots: Mutex::new(HashMap::new()),
            timeout,
        }
    }

    /// Acquisition timeout
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Waits for exclusive access to `key`.
    ///
    /// The returned guard releases the key when dropped, including when the
    /// holding task panics or is cancelled.
    ///
    /// # Errors
    ///
    /// Returns [`LockTimeout`] if the key is still held by someone else after
    /// the configured timeout.
    pub async fn acquire(&self, key: &K) -> Result<KeyGuard<K>, LockTimeout> {
        let slot = self.slot(key);
        let started = Instant::now();

        match tokio::time::timeout(self.timeout, slot.lock_owned()).await {
            Ok(guard) => {
                LockMetrics::record_wait(started.elapsed());
                Ok(KeyGuard {
                    key: key.clone(),
                    _guard: guard,
                })
            }
            Err(_) => {
                let waited = started.elapsed();
                LockMetrics::record_timeout();
                tracing::warn!(
                    key = %key,
                    waited_ms = waited.as_millis(),
                    "Lock acquisition timed out"
                );
                Err(LockTimeout {
                    key: key.to_string(),
                    waited,
                })
            }
        }
    }

    /// Number of keys currently tracked (held, awaited, or not yet pruned)
    #[must_use]
    pub fn tracked(&self) -> usize {
        self.slots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    fn slot(&self, key: &K) -> Arc<AsyncMutex<()>> {
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);

        // Only the map references an idle slot; holders and waiters keep a clone
        if slots.len() >= PRUNE_THRESHOLD {
            slots.retain(|_, slot| Arc::strong_count(slot) > 1);
        }

        Arc::clone(
            slots
                .entry(key.clone())
                .or_insert_with(|| Arc::new(AsyncMutex::new(()))),
        )
    }
}

impl<K> fmt::Debug for KeyedLocks<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyedLocks")
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

/// Exclusive access to one key. Dropping it releases the key.
#[derive(Debug)]
pub struct KeyGuard<K> {
    key: K,
    _guard: OwnedMutexGuard<()>,
}

impl<K> KeyGuard<K> {
    /// Key this guard protects
    #[must_use]
    pub const fn key(&self) -> &K {
        &self.key
    }
}
