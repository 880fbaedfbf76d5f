use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tokio::time::timeout;

use crate::error::ServiceError;

/// Concurrent mapping from a numeric id to a long-lived server entity,
/// guarded by a per-id asynchronous lock.
///
/// Tokio's mutex queues waiters in FIFO order, so forward progress is
/// guaranteed under bounded contention. Acquisition is capped by
/// `lock_timeout`; hitting the cap is treated by callers as a fatal
/// server-side condition for that operation.
pub struct EntityStore<T> {
    entities: Arc<DashMap<i64, Arc<Mutex<EntitySlot<T>>>>>,
    lock_timeout: Duration,
}

#[derive(Debug)]
struct EntitySlot<T> {
    value: Option<T>,
    destroyed: bool,
}

impl<T> Default for EntitySlot<T> {
    fn default() -> Self {
        Self {
            value: None,
            destroyed: false,
        }
    }
}

/// Scoped handle over one tracked entity. The per-id lock is held for the
/// lifetime of the usage; dropping it releases the lock.
#[derive(Debug)]
pub struct EntityUsage<T> {
    entities: Arc<DashMap<i64, Arc<Mutex<EntitySlot<T>>>>>,
    id: i64,
    guard: OwnedMutexGuard<EntitySlot<T>>,
}

impl<T> EntityStore<T> {
    pub fn new(lock_timeout: Duration) -> Self {
        Self {
            entities: Arc::new(DashMap::new()),
            lock_timeout,
        }
    }

    /// Acquire the lock for `id`, optionally creating an empty entry.
    ///
    /// A waiter that was blocked while the entry got destroyed observes
    /// `NotTracked` (or, when `create_if_missing` is set, retries against a
    /// fresh entry) rather than a stale slot: the destroyed flag is
    /// re-checked after the mutex is won.
    pub async fn acquire(
        &self,
        id: i64,
        create_if_missing: bool,
    ) -> Result<EntityUsage<T>, ServiceError> {
        loop {
            let entry = match self.entities.get(&id) {
                Some(entry) => Arc::clone(entry.value()),
                None if create_if_missing => Arc::clone(
                    self.entities
                        .entry(id)
                        .or_insert_with(|| Arc::new(Mutex::new(EntitySlot::default())))
                        .value(),
                ),
                None => return Err(ServiceError::NotTracked),
            };

            let guard = timeout(self.lock_timeout, entry.lock_owned())
                .await
                .map_err(|_| ServiceError::LockTimeout)?;

            if guard.destroyed {
                if create_if_missing {
                    // The entry died while we waited; the map no longer holds
                    // it, so looping creates a fresh slot.
                    continue;
                }
                return Err(ServiceError::NotTracked);
            }

            return Ok(EntityUsage {
                entities: Arc::clone(&self.entities),
                id,
                guard,
            });
        }
    }

    /// Destroy the entry for `id`, releasing its resources.
    ///
    /// Subsequent `acquire` calls observe `NotTracked`.
    pub async fn destroy(&self, id: i64) -> Result<(), ServiceError> {
        let Some(entry) = self.entities.get(&id).map(|entry| Arc::clone(entry.value())) else {
            return Err(ServiceError::NotTracked);
        };

        let mut guard = timeout(self.lock_timeout, entry.lock_owned())
            .await
            .map_err(|_| ServiceError::LockTimeout)?;

        if guard.destroyed {
            return Err(ServiceError::NotTracked);
        }

        guard.destroyed = true;
        guard.value = None;
        self.entities.remove(&id);
        Ok(())
    }

    /// Number of currently tracked entries.
    pub fn tracked_count(&self) -> usize {
        self.entities.len()
    }
}

impl<T: Clone> EntityStore<T> {
    /// Point-in-time copy of all (id, value) pairs for read-only inspection.
    ///
    /// Entries locked by an in-flight operation are skipped, so callers must
    /// tolerate stale or partial views.
    pub fn snapshot(&self) -> Vec<(i64, T)> {
        self.entities
            .iter()
            .filter_map(|entry| {
                let slot = entry.value().try_lock().ok()?;
                if slot.destroyed {
                    return None;
                }
                slot.value.clone().map(|value| (*entry.key(), value))
            })
            .collect()
    }
}

impl<T> EntityUsage<T> {
    pub fn id(&self) -> i64 {
        self.id
    }

    pub fn get(&self) -> Option<&T> {
        self.guard.value.as_ref()
    }

    pub fn get_mut(&mut self) -> Option<&mut T> {
        self.guard.value.as_mut()
    }

    /// Install a value, returning any previous one.
    pub fn set(&mut self, value: T) -> Option<T> {
        self.guard.value.replace(value)
    }

    pub fn take(&mut self) -> Option<T> {
        self.guard.value.take()
    }

    /// Destroy the underlying entry while already holding its lock.
    pub fn destroy(mut self) {
        self.guard.destroyed = true;
        self.guard.value = None;
        self.entities.remove(&self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> EntityStore<String> {
        EntityStore::new(Duration::from_secs(5))
    }

    #[tokio::test]
    async fn acquire_without_create_fails_when_untracked() {
        let store = store();
        let err = store.acquire(1, false).await.unwrap_err();
        assert!(matches!(err, ServiceError::NotTracked));
    }

    #[tokio::test]
    async fn create_on_miss_starts_empty() {
        let store = store();
        let mut usage = store.acquire(1, true).await.unwrap();
        assert!(usage.get().is_none());
        usage.set("hello".into());
        assert_eq!(usage.get().map(String::as_str), Some("hello"));
        drop(usage);

        let usage = store.acquire(1, false).await.unwrap();
        assert_eq!(usage.get().map(String::as_str), Some("hello"));
    }

    #[tokio::test]
    async fn destroy_makes_entry_untracked() {
        let store = store();
        let mut usage = store.acquire(7, true).await.unwrap();
        usage.set("value".into());
        drop(usage);

        store.destroy(7).await.unwrap();
        assert!(matches!(
            store.acquire(7, false).await.unwrap_err(),
            ServiceError::NotTracked
        ));
        assert_eq!(store.tracked_count(), 0);
    }

    #[tokio::test]
    async fn usage_destroy_releases_entry() {
        let store = store();
        let mut usage = store.acquire(3, true).await.unwrap();
        usage.set("value".into());
        usage.destroy();

        assert!(matches!(
            store.acquire(3, false).await.unwrap_err(),
            ServiceError::NotTracked
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn acquire_times_out_under_contention() {
        let store = Arc::new(EntityStore::<String>::new(Duration::from_secs(5)));
        let mut held = store.acquire(1, true).await.unwrap();
        held.set("held".into());

        let contender = Arc::clone(&store);
        let result = tokio::spawn(async move { contender.acquire(1, false).await }).await;
        assert!(matches!(
            result.unwrap().unwrap_err(),
            ServiceError::LockTimeout
        ));
        drop(held);
    }

    #[tokio::test]
    async fn waiter_blocked_across_destroy_observes_not_tracked() {
        let store = Arc::new(EntityStore::<String>::new(Duration::from_secs(5)));
        let mut usage = store.acquire(1, true).await.unwrap();
        usage.set("doomed".into());

        let waiter_store = Arc::clone(&store);
        let waiter = tokio::spawn(async move { waiter_store.acquire(1, false).await });
        // Let the waiter queue on the entry lock before it is destroyed.
        tokio::task::yield_now().await;

        usage.destroy();
        assert!(matches!(
            waiter.await.unwrap().unwrap_err(),
            ServiceError::NotTracked
        ));
    }

    #[tokio::test]
    async fn snapshot_skips_locked_entries() {
        let store = store();
        {
            let mut usage = store.acquire(1, true).await.unwrap();
            usage.set("one".into());
        }
        let mut held = store.acquire(2, true).await.unwrap();
        held.set("two".into());

        let snapshot = store.snapshot();
        assert_eq!(snapshot, vec![(1, "one".to_string())]);
        drop(held);
    }
}
