//! Keyed entity store with per-key exclusive access.
//!
//! [`EntityStore`] maps keys to individually locked entities. The outer
//! map is protected by a single coarse [`std::sync::Mutex`] that is only
//! held for map operations; exclusive access to a value is granted by a
//! one-permit [`tokio::sync::Semaphore`] owned by each entity. Acquiring
//! different keys therefore never contends.
//!
//! Access is scoped: [`EntityStore::get`] returns an [`EntityGuard`] that
//! releases the entity when dropped. Releasing a guard while the entity
//! holds no value evicts the entity from the store.

use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::time::Duration;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// Default time to wait for exclusive access to an entity.
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(10);

/// Number of attempts made by [`EntityStore::get`] when the entity is
/// disposed while the caller is waiting for it.
pub const MAX_ATTEMPTS: usize = 5;

/// Failure kinds of [`EntityStore`] and [`EntityGuard`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    /// The key is unknown and creation was not allowed.
    #[error("entity {key} does not exist")]
    NotFound {
        /// Debug rendering of the key.
        key: String,
    },

    /// The entity could not be acquired within the lock timeout or the
    /// retry budget was exhausted.
    #[error("could not acquire entity {key} in time")]
    Timeout {
        /// Debug rendering of the key.
        key: String,
    },

    /// The entity was disposed (removed) while the guard was alive.
    #[error("entity {key} has been disposed")]
    Disposed {
        /// Debug rendering of the key.
        key: String,
    },

    /// The guard no longer holds the entity lock.
    #[error("entity {key} is not locked by this guard")]
    IllegalState {
        /// Debug rendering of the key.
        key: String,
    },
}

fn render<K: fmt::Debug>(key: &K) -> String {
    format!("{key:?}")
}

/// A single lock-guarded value.
struct Entity<V> {
    permit: Arc<Semaphore>,
    value: RwLock<Option<V>>,
    disposed: AtomicBool,
}

impl<V> Entity<V> {
    fn new(value: Option<V>) -> Self {
        Self {
            permit: Arc::new(Semaphore::new(1)),
            value: RwLock::new(value),
            disposed: AtomicBool::new(false),
        }
    }

    fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }

    fn is_empty(&self) -> bool {
        self.value
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_none()
    }

    /// Marks the entity disposed, wakes every waiter with an error and
    /// drops the value. Idempotent.
    fn dispose(&self) {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.permit.close();
        *self.value.write().unwrap_or_else(PoisonError::into_inner) = None;
    }
}

struct Shared<K, V> {
    entities: Mutex<HashMap<K, Arc<Entity<V>>>>,
    lock_timeout: Duration,
}

impl<K: Eq + Hash, V> Shared<K, V> {
    fn entities(&self) -> MutexGuard<'_, HashMap<K, Arc<Entity<V>>>> {
        self.entities.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Disposes `entity` and evicts it, unless the key already maps to a
    /// newer entity.
    fn dispose(&self, key: &K, entity: &Arc<Entity<V>>) {
        {
            let mut entities = self.entities();
            if entities
                .get(key)
                .is_some_and(|current| Arc::ptr_eq(current, entity))
            {
                entities.remove(key);
            }
        }
        entity.dispose();
    }
}

/// Concurrency-safe keyed store granting at most one holder of mutable
/// access per key.
///
/// Cloning the store is cheap; all clones share the same entities.
///
/// # Concurrency
///
/// - Acquisitions of the same key are serialized.
/// - Acquisitions of different keys are concurrent.
/// - Waiting is bounded by the lock timeout.
pub struct EntityStore<K, V> {
    shared: Arc<Shared<K, V>>,
}

impl<K, V> EntityStore<K, V>
where
    K: Eq + Hash + Clone + fmt::Debug,
{
    /// Creates an empty store with the [`DEFAULT_LOCK_TIMEOUT`].
    #[must_use]
    pub fn new() -> Self {
        Self::with_lock_timeout(DEFAULT_LOCK_TIMEOUT)
    }

    /// Creates an empty store with a custom lock timeout.
    #[must_use]
    pub fn with_lock_timeout(lock_timeout: Duration) -> Self {
        Self {
            shared: Arc::new(Shared {
                entities: Mutex::new(HashMap::new()),
                lock_timeout,
            }),
        }
    }

    /// Returns the configured lock timeout.
    #[must_use]
    pub fn lock_timeout(&self) -> Duration {
        self.shared.lock_timeout
    }

    /// Reads the current value without acquiring exclusive access.
    ///
    /// The result may be stale by the time it is returned. Use it for
    /// monitoring only, never for logic that needs consistency.
    #[must_use]
    pub fn get_unsafe(&self, key: &K) -> Option<V>
    where
        V: Clone,
    {
        let entity = self.shared.entities().get(key).map(Arc::clone)?;
        entity
            .value
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Acquires exclusive access to `key`, creating the entity when it
    /// does not exist and retrying if it is disposed while waiting.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Timeout`] if the entity is not released
    /// within the lock timeout or the retry budget runs out.
    pub async fn get(&self, key: K) -> Result<EntityGuard<K, V>, StoreError> {
        self.get_with(key, true, true).await
    }

    /// Acquires exclusive access to `key`.
    ///
    /// - Unknown key and `create_if_missing == false`: fails with
    ///   [`StoreError::NotFound`].
    /// - Unknown key and `create_if_missing == true`: the entity is created
    ///   empty, then acquired.
    /// - If the entity is disposed while waiting, the whole operation is
    ///   retried up to [`MAX_ATTEMPTS`] times when both flags are set;
    ///   without `create_if_missing` it fails with
    ///   [`StoreError::NotFound`] immediately.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] or [`StoreError::Timeout`] as
    /// described above.
    pub async fn get_with(
        &self,
        key: K,
        create_if_missing: bool,
        retry_on_race: bool,
    ) -> Result<EntityGuard<K, V>, StoreError> {
        let attempts = if retry_on_race { MAX_ATTEMPTS } else { 1 };

        for attempt in 1..=attempts {
            let entity = {
                let mut entities = self.shared.entities();
                match entities.get(&key) {
                    Some(entity) => Arc::clone(entity),
                    None if create_if_missing => {
                        let entity = Arc::new(Entity::new(None));
                        entities.insert(key.clone(), Arc::clone(&entity));
                        entity
                    }
                    None => return Err(StoreError::NotFound { key: render(&key) }),
                }
            };

            let acquire = Arc::clone(&entity.permit).acquire_owned();
            match tokio::time::timeout(self.shared.lock_timeout, acquire).await {
                Err(_) => return Err(StoreError::Timeout { key: render(&key) }),
                Ok(Ok(permit)) if !entity.is_disposed() => {
                    return Ok(EntityGuard {
                        key,
                        entity,
                        permit: Some(permit),
                        shared: Arc::clone(&self.shared),
                    });
                }
                Ok(_) if !create_if_missing => {
                    return Err(StoreError::NotFound { key: render(&key) });
                }
                Ok(_) => {
                    tracing::debug!(?key, attempt, "entity disposed while waiting, retrying");
                }
            }
        }

        Err(StoreError::Timeout { key: render(&key) })
    }

    /// Ensures an entity exists for `key`, seeding it with `initial`.
    ///
    /// Does nothing when the key already exists and never locks on behalf
    /// of the caller. Returns `true` if a new entity was created.
    pub fn create(&self, key: K, initial: Option<V>) -> bool {
        let mut entities = self.shared.entities();
        if entities.contains_key(&key) {
            return false;
        }
        entities.insert(key, Arc::new(Entity::new(initial)));
        true
    }

    /// Disposes and evicts the entity for `key` regardless of its lock
    /// state. Guards still holding it fail with [`StoreError::Disposed`].
    ///
    /// Returns `true` if an entity was removed.
    pub fn remove(&self, key: &K) -> bool {
        let removed = self.shared.entities().remove(key);
        match removed {
            Some(entity) => {
                entity.dispose();
                true
            }
            None => false,
        }
    }

    /// Returns `true` if an entity exists for `key`.
    #[must_use]
    pub fn contains_key(&self, key: &K) -> bool {
        self.shared.entities().contains_key(key)
    }

    /// Returns a snapshot of all keys currently in the store.
    #[must_use]
    pub fn keys(&self) -> Vec<K> {
        self.shared.entities().keys().cloned().collect()
    }

    /// Returns the number of entities in the store.
    #[must_use]
    pub fn len(&self) -> usize {
        self.shared.entities().len()
    }

    /// Returns `true` if the store holds no entities.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.shared.entities().is_empty()
    }
}

impl<K, V> Default for EntityStore<K, V>
where
    K: Eq + Hash + Clone + fmt::Debug,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> Clone for EntityStore<K, V> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<K, V> fmt::Debug for EntityStore<K, V>
where
    K: Eq + Hash,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntityStore")
            .field("entities", &self.shared.entities().len())
            .field("lock_timeout", &self.shared.lock_timeout)
            .finish()
    }
}

/// Exclusive, scoped access to one entity of an [`EntityStore`].
///
/// The lock is released when the guard is dropped or
/// [`released`](EntityGuard::release) explicitly. Every accessor checks
/// that the entity is still alive and still held by this guard.
pub struct EntityGuard<K, V>
where
    K: Eq + Hash,
{
    key: K,
    entity: Arc<Entity<V>>,
    permit: Option<OwnedSemaphorePermit>,
    shared: Arc<Shared<K, V>>,
}

impl<K, V> EntityGuard<K, V>
where
    K: Eq + Hash + fmt::Debug,
{
    /// Returns the key of the guarded entity.
    #[must_use]
    pub fn key(&self) -> &K {
        &self.key
    }

    /// Returns `true` while the guard holds the entity lock.
    #[must_use]
    pub fn is_held(&self) -> bool {
        self.permit.is_some() && !self.entity.is_disposed()
    }

    fn check(&self) -> Result<(), StoreError> {
        if self.entity.is_disposed() {
            return Err(StoreError::Disposed {
                key: render(&self.key),
            });
        }
        if self.permit.is_none() {
            return Err(StoreError::IllegalState {
                key: render(&self.key),
            });
        }
        Ok(())
    }

    /// Returns a clone of the current value.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Disposed`] or [`StoreError::IllegalState`]
    /// when the guard no longer grants access.
    pub fn get(&self) -> Result<Option<V>, StoreError>
    where
        V: Clone,
    {
        self.with(|value| value.cloned())
    }

    /// Runs `f` with a shared view of the value.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Disposed`] or [`StoreError::IllegalState`]
    /// when the guard no longer grants access.
    pub fn with<R>(&self, f: impl FnOnce(Option<&V>) -> R) -> Result<R, StoreError> {
        self.check()?;
        let value = self
            .entity
            .value
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        Ok(f(value.as_ref()))
    }

    /// Runs `f` with mutable access to the value slot.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Disposed`] or [`StoreError::IllegalState`]
    /// when the guard no longer grants access.
    pub fn with_mut<R>(&mut self, f: impl FnOnce(&mut Option<V>) -> R) -> Result<R, StoreError> {
        self.check()?;
        let mut value = self
            .entity
            .value
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        Ok(f(&mut value))
    }

    /// Replaces the value.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Disposed`] or [`StoreError::IllegalState`]
    /// when the guard no longer grants access.
    pub fn set(&mut self, value: V) -> Result<(), StoreError> {
        self.with_mut(|slot| *slot = Some(value))
    }

    /// Takes the value out, leaving the slot empty. The entity is evicted
    /// on release unless a new value is set before then.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Disposed`] or [`StoreError::IllegalState`]
    /// when the guard no longer grants access.
    pub fn take(&mut self) -> Result<Option<V>, StoreError> {
        self.with_mut(Option::take)
    }

    /// Clears the value and evicts the entity immediately.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Disposed`] or [`StoreError::IllegalState`]
    /// when the guard no longer grants access.
    pub fn evict(&mut self) -> Result<(), StoreError> {
        self.check()?;
        self.shared.dispose(&self.key, &self.entity);
        self.permit = None;
        Ok(())
    }

    /// Releases the lock. An entity left without a value is evicted.
    /// Calling this more than once has no effect.
    pub fn release(&mut self) {
        self.return_permit();
    }
}

impl<K, V> EntityGuard<K, V>
where
    K: Eq + Hash,
{
    fn return_permit(&mut self) {
        let Some(permit) = self.permit.take() else {
            return;
        };
        if !self.entity.is_disposed() && self.entity.is_empty() {
            self.shared.dispose(&self.key, &self.entity);
        }
        drop(permit);
    }
}

impl<K, V> Drop for EntityGuard<K, V>
where
    K: Eq + Hash,
{
    fn drop(&mut self) {
        self.return_permit();
    }
}

impl<K, V> fmt::Debug for EntityGuard<K, V>
where
    K: Eq + Hash + fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntityGuard")
            .field("key", &self.key)
            .field("held", &self.permit.is_some())
            .field("disposed", &self.entity.is_disposed())
            .finish()
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn store() -> EntityStore<u32, String> {
        EntityStore::with_lock_timeout(Duration::from_millis(200))
    }

    #[tokio::test]
    async fn unknown_key_is_absent_and_not_found() {
        let store = store();
        assert!(store.get_unsafe(&1).is_none());

        let result = store.get_with(1, false, true).await;
        let Err(err) = result else {
            panic!("expected NotFound");
        };
        assert!(matches!(err, StoreError::NotFound { .. }));
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn value_is_visible_after_release() {
        let store = store();
        {
            let Ok(mut guard) = store.get(1).await else {
                panic!("acquire failed");
            };
            assert!(guard.set("test".to_string()).is_ok());
            assert_eq!(guard.get().ok().flatten().as_deref(), Some("test"));
        }
        assert_eq!(store.get_unsafe(&1).as_deref(), Some("test"));
    }

    #[tokio::test]
    async fn access_after_release_is_illegal_state() {
        let store = store();
        let Ok(mut guard) = store.get(1).await else {
            panic!("acquire failed");
        };
        assert!(guard.set("test".to_string()).is_ok());
        guard.release();

        assert!(!guard.is_held());
        assert!(matches!(guard.get(), Err(StoreError::IllegalState { .. })));
        assert!(matches!(
            guard.set("other".to_string()),
            Err(StoreError::IllegalState { .. })
        ));
        assert_eq!(store.get_unsafe(&1).as_deref(), Some("test"));
    }

    #[tokio::test]
    async fn second_acquire_waits_for_release() {
        let store = store();
        let Ok(mut first) = store.get(7).await else {
            panic!("acquire failed");
        };
        assert!(first.set("held".to_string()).is_ok());

        let (tx, mut rx) = tokio::sync::oneshot::channel();
        let contender = store.clone();
        let handle = tokio::spawn(async move {
            let guard = contender.get(7).await;
            let _ = tx.send(());
            guard.map(|g| g.get().ok().flatten())
        });

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(rx.try_recv().is_err(), "second holder must still be waiting");

        drop(first);
        let Ok(Ok(value)) = handle.await else {
            panic!("contender failed");
        };
        assert_eq!(value.as_deref(), Some("held"));
    }

    #[tokio::test]
    async fn concurrent_holders_never_overlap() {
        let store = EntityStore::<u32, u32>::with_lock_timeout(Duration::from_secs(5));
        let inside = Arc::new(AtomicUsize::new(0));
        let mut handles = Vec::new();

        for _ in 0..8 {
            let store = store.clone();
            let inside = Arc::clone(&inside);
            handles.push(tokio::spawn(async move {
                let Ok(mut guard) = store.get(1).await else {
                    return false;
                };
                let overlapping = inside.fetch_add(1, Ordering::SeqCst) != 0;
                tokio::time::sleep(Duration::from_millis(5)).await;
                let _ = guard.with_mut(|v| *v = Some(v.unwrap_or(0) + 1));
                inside.fetch_sub(1, Ordering::SeqCst);
                !overlapping
            }));
        }

        for handle in handles {
            assert!(matches!(handle.await, Ok(true)));
        }
        assert_eq!(store.get_unsafe(&1), Some(8));
    }

    #[tokio::test]
    async fn acquire_times_out_while_held() {
        let store = EntityStore::<u32, String>::with_lock_timeout(Duration::from_millis(30));
        let Ok(mut guard) = store.get(3).await else {
            panic!("acquire failed");
        };
        assert!(guard.set("busy".to_string()).is_ok());

        let result = store.get(3).await;
        assert!(matches!(result, Err(StoreError::Timeout { .. })));
        assert!(guard.is_held());
    }

    #[tokio::test]
    async fn remove_disposes_stale_guard() {
        let store = store();
        let Ok(mut guard) = store.get(1).await else {
            panic!("acquire failed");
        };
        assert!(guard.set("test".to_string()).is_ok());

        assert!(store.remove(&1));
        assert!(matches!(guard.get(), Err(StoreError::Disposed { .. })));
        assert!(matches!(
            guard.set("again".to_string()),
            Err(StoreError::Disposed { .. })
        ));
        assert!(!store.contains_key(&1));
        assert!(store.get_unsafe(&1).is_none());
    }

    #[tokio::test]
    async fn releasing_empty_entity_evicts_it() {
        let store = store();
        {
            let Ok(guard) = store.get(1).await else {
                panic!("acquire failed");
            };
            assert!(guard.is_held());
            assert!(store.contains_key(&1));
        }
        assert!(!store.contains_key(&1));

        {
            let Ok(mut guard) = store.get(2).await else {
                panic!("acquire failed");
            };
            assert!(guard.set("kept".to_string()).is_ok());
            assert_eq!(guard.take().ok().flatten().as_deref(), Some("kept"));
        }
        assert!(!store.contains_key(&2));
    }

    #[tokio::test]
    async fn explicit_release_then_drop_evicts_once() {
        let store = store();
        let Ok(mut stale) = store.get(3).await else {
            panic!("acquire failed");
        };
        stale.release();
        assert!(!store.contains_key(&3));

        let Ok(mut fresh) = store.get(3).await else {
            panic!("acquire failed");
        };
        assert!(fresh.set("fresh".to_string()).is_ok());
        fresh.release();

        drop(stale);
        assert_eq!(store.get_unsafe(&3).as_deref(), Some("fresh"));
    }

    #[tokio::test]
    async fn create_is_idempotent() {
        let store = store();
        assert!(store.create(1, Some("first".to_string())));
        assert!(!store.create(1, Some("second".to_string())));
        assert_eq!(store.get_unsafe(&1).as_deref(), Some("first"));

        let Ok(guard) = store.get_with(1, false, false).await else {
            panic!("existing entity must be acquirable without creation");
        };
        assert_eq!(guard.get().ok().flatten().as_deref(), Some("first"));
    }

    #[tokio::test]
    async fn explicit_evict_removes_entity() {
        let store = store();
        let Ok(mut guard) = store.get(5).await else {
            panic!("acquire failed");
        };
        assert!(guard.set("value".to_string()).is_ok());
        assert!(guard.evict().is_ok());
        assert!(!store.contains_key(&5));
        assert!(matches!(guard.get(), Err(StoreError::Disposed { .. })));
    }

    #[tokio::test]
    async fn waiter_without_creation_fails_when_removed() {
        let store = EntityStore::<u32, String>::with_lock_timeout(Duration::from_secs(5));
        let Ok(mut holder) = store.get(9).await else {
            panic!("acquire failed");
        };
        assert!(holder.set("x".to_string()).is_ok());

        let waiter = store.clone();
        let handle = tokio::spawn(async move { waiter.get_with(9, false, true).await.map(|_| ()) });
        tokio::time::sleep(Duration::from_millis(30)).await;

        assert!(store.remove(&9));
        let Ok(result) = handle.await else {
            panic!("waiter panicked");
        };
        assert!(matches!(result, Err(StoreError::NotFound { .. })));
    }

    #[tokio::test]
    async fn waiter_with_creation_retries_on_fresh_entity() {
        let store = EntityStore::<u32, String>::with_lock_timeout(Duration::from_secs(5));
        let Ok(mut holder) = store.get(9).await else {
            panic!("acquire failed");
        };
        assert!(holder.set("old".to_string()).is_ok());

        let waiter = store.clone();
        let handle = tokio::spawn(async move {
            let guard = waiter.get(9).await?;
            guard.get()
        });
        tokio::time::sleep(Duration::from_millis(30)).await;

        assert!(store.remove(&9));
        let Ok(Ok(value)) = handle.await else {
            panic!("waiter should acquire a fresh entity");
        };
        assert!(value.is_none());
    }

    #[test]
    fn keys_and_len_track_entities() {
        let store = store();
        assert!(store.is_empty());
        store.create(1, Some("a".to_string()));
        store.create(2, None);
        assert_eq!(store.len(), 2);
        let mut keys = store.keys();
        keys.sort_unstable();
        assert_eq!(keys, vec![1, 2]);
        assert!(store.remove(&2));
        assert!(!store.remove(&2));
        assert_eq!(store.len(), 1);
    }
}
