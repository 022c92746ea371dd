//! Row-scoped exclusive locks with bounded waiting.
//!
//! Each key maps to its own async mutex. Holding the returned guard is holding
//! the row lock; dropping it releases the row. Acquisition waits at most the
//! configured duration and then fails with [`StoreError::LockTimeout`], so a
//! stuck writer never blocks a request indefinitely.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

use crate::store::StoreError;

/// Entries are pruned once the table grows past this many idle keys.
const PRUNE_THRESHOLD: usize = 1024;

pub type RowGuard = OwnedMutexGuard<()>;

#[derive(Debug)]
pub struct RowLocks<K> {
    rows: Mutex<HashMap<K, Arc<AsyncMutex<()>>>>,
    wait: Duration,
}

impl<K> RowLocks<K>
where
    K: Eq + Hash + Clone + core::fmt::Debug,
{
    pub fn new(wait: Duration) -> Self {
        Self {
            rows: Mutex::new(HashMap::new()),
            wait,
        }
    }

    fn slot(&self, key: &K) -> Arc<AsyncMutex<()>> {
        let mut rows = match self.rows.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        };
        if rows.len() > PRUNE_THRESHOLD {
            // Only the table holds an idle entry.
            rows.retain(|_, m| Arc::strong_count(m) > 1);
        }
        rows.entry(key.clone())
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone()
    }

    /// Acquire the lock for `key`, waiting at most the configured duration.
    pub async fn acquire(&self, key: &K) -> Result<RowGuard, StoreError> {
        let slot = self.slot(key);
        match tokio::time::timeout(self.wait, slot.lock_owned()).await {
            Ok(guard) => Ok(guard),
            Err(_) => Err(StoreError::LockTimeout(format!(
                "{key:?} still locked after {}ms",
                self.wait.as_millis()
            ))),
        }
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.rows.lock().map(|r| r.len()).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn second_acquire_waits_then_times_out() {
        let locks = RowLocks::new(Duration::from_millis(30));
        let held = locks.acquire(&1_i64).await.unwrap();

        let err = locks.acquire(&1_i64).await.unwrap_err();
        assert!(matches!(err, StoreError::LockTimeout(_)));
        assert!(err.is_retryable());

        drop(held);
        assert!(locks.acquire(&1_i64).await.is_ok());
    }

    #[tokio::test]
    async fn different_keys_do_not_contend() {
        let locks = RowLocks::new(Duration::from_millis(30));
        let _a = locks.acquire(&1_i64).await.unwrap();
        assert!(locks.acquire(&2_i64).await.is_ok());
    }

    #[tokio::test]
    async fn waiter_proceeds_when_holder_releases() {
        let locks = Arc::new(RowLocks::new(Duration::from_secs(2)));
        let held = locks.acquire(&7_i64).await.unwrap();

        let waiter = {
            let locks = locks.clone();
            tokio::spawn(async move { locks.acquire(&7_i64).await.map(|_| ()) })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        drop(held);

        assert!(waiter.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn idle_entries_are_pruned() {
        let locks = RowLocks::new(Duration::from_millis(30));
        for k in 0..(PRUNE_THRESHOLD as i64 + 10) {
            let _g = locks.acquire(&k).await.unwrap();
        }
        let _g = locks.acquire(&-1_i64).await.unwrap();
        assert!(locks.len() < PRUNE_THRESHOLD);
    }
}
