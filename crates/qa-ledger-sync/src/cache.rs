use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

type Slot<V> = Arc<Mutex<Option<V>>>;

/// In-memory identity map with single-flight resolution.
///
/// Concurrent `resolve` calls for different keys proceed in parallel; calls
/// for the same key serialize on that key's slot so the loader runs at most
/// once. Failed loads leave the slot empty and the next caller retries.
/// Entries are never evicted; `invalidate` is the only way to drop one.
pub struct IdentityCache<K, V> {
    slots: Mutex<HashMap<K, Slot<V>>>,
}

impl<K, V> Default for IdentityCache<K, V> {
    fn default() -> Self {
        Self { slots: Mutex::new(HashMap::new()) }
    }
}

impl<K, V> IdentityCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the cached value for `key`, running `load` on a miss.
    ///
    /// # Errors
    /// Propagates the loader's error; nothing is cached in that case.
    pub fn resolve<E>(&self, key: &K, load: impl FnOnce() -> Result<V, E>) -> Result<V, E> {
        let slot = self.slot(key);
        let mut value = lock(&slot);
        if let Some(cached) = value.as_ref() {
            return Ok(cached.clone());
        }

        let loaded = load()?;
        *value = Some(loaded.clone());
        Ok(loaded)
    }

    /// Replace the cached value, e.g. after a merge refreshed the row.
    pub fn insert(&self, key: &K, value: V) {
        *lock(&self.slot(key)) = Some(value);
    }

    #[must_use]
    pub fn get(&self, key: &K) -> Option<V> {
        let slot = lock(&self.slots).get(key).cloned()?;
        let value = lock(&slot);
        value.clone()
    }

    /// Drop the entry for `key`. Returns whether a resolved value was removed.
    pub fn invalidate(&self, key: &K) -> bool {
        let removed = lock(&self.slots).remove(key);
        removed.is_some_and(|slot| lock(&slot).is_some())
    }

    #[must_use]
    pub fn len(&self) -> usize {
        let slots = lock(&self.slots).values().cloned().collect::<Vec<_>>();
        slots.iter().filter(|slot| lock(slot).is_some()).count()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn slot(&self, key: &K) -> Slot<V> {
        Arc::clone(lock(&self.slots).entry(key.clone()).or_default())
    }
}

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Barrier;
    use std::thread;
    use std::time::Duration;

    use super::*;

    #[test]
    fn second_resolve_hits_the_map() -> Result<(), String> {
        let cache = IdentityCache::<String, i64>::new();
        let loads = AtomicUsize::new(0);
        let load = || {
            loads.fetch_add(1, Ordering::SeqCst);
            Ok::<_, String>(42)
        };

        assert_eq!(cache.resolve(&"QA-1".to_string(), load)?, 42);
        assert_eq!(cache.resolve(&"QA-1".to_string(), load)?, 42);
        assert_eq!(loads.load(Ordering::SeqCst), 1);
        assert_eq!(cache.get(&"QA-1".to_string()), Some(42));
        Ok(())
    }

    #[test]
    fn failed_loads_are_not_cached() {
        let cache = IdentityCache::<&str, i64>::new();
        assert_eq!(cache.resolve(&"QA-1", || Err("unreachable")), Err("unreachable"));
        assert!(cache.is_empty());
        assert_eq!(cache.resolve(&"QA-1", || Ok::<_, &str>(7)), Ok(7));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn invalidate_forces_a_reload() -> Result<(), String> {
        let cache = IdentityCache::<&str, Option<i64>>::new();
        assert_eq!(cache.resolve(&"QA-9", || Ok::<_, String>(None))?, None);
        assert!(cache.invalidate(&"QA-9"));
        assert!(!cache.invalidate(&"QA-9"));
        assert_eq!(cache.resolve(&"QA-9", || Ok::<_, String>(Some(9)))?, Some(9));
        Ok(())
    }

    #[test]
    fn concurrent_resolves_of_one_key_load_once() {
        let cache = IdentityCache::<&str, usize>::new();
        let loads = AtomicUsize::new(0);
        let barrier = Barrier::new(8);

        let values = thread::scope(|scope| {
            let handles = (0..8)
                .map(|_| {
                    scope.spawn(|| {
                        barrier.wait();
                        cache.resolve(&"user:UNSET", || {
                            thread::sleep(Duration::from_millis(20));
                            Ok::<_, String>(loads.fetch_add(1, Ordering::SeqCst) + 100)
                        })
                    })
                })
                .collect::<Vec<_>>();
            handles.into_iter().map(|handle| handle.join()).collect::<Vec<_>>()
        });

        assert_eq!(loads.load(Ordering::SeqCst), 1);
        for value in values {
            assert!(matches!(value, Ok(Ok(100))));
        }
    }
}
