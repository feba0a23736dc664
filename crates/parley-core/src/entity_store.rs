//! In-memory cache of live entities, mirrored to the database.

use std::borrow::Borrow;
use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Mutex, MutexGuard, PoisonError};

/// A mutex-guarded map with atomic read-modify-write helpers.
///
/// Callbacks passed to [`EntityStore::update`] run with the lock held and
/// must not touch the same store. [`EntityStore::range`] iterates over a
/// snapshot, so its callback may.
pub struct EntityStore<K, V> {
    inner: Mutex<HashMap<K, V>>,
}

impl<K, V> Default for EntityStore<K, V> {
    fn default() -> Self {
        Self {
            inner: Mutex::new(HashMap::new()),
        }
    }
}

impl<K, V> EntityStore<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<K, V>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn get<Q>(&self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.lock().get(key).cloned()
    }

    pub fn contains<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.lock().contains_key(key)
    }

    /// Insert or replace, returning the previous value.
    pub fn insert(&self, key: K, value: V) -> Option<V> {
        self.lock().insert(key, value)
    }

    pub fn remove<Q>(&self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.lock().remove(key)
    }

    /// Mutate an existing entry in place. Returns `None` if absent.
    pub fn update<Q, R>(&self, key: &Q, f: impl FnOnce(&mut V) -> R) -> Option<R>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.lock().get_mut(key).map(f)
    }

    /// Mutate an entry, creating it with `default` first if absent.
    pub fn upsert<R>(&self, key: K, default: impl FnOnce() -> V, f: impl FnOnce(&mut V) -> R) -> R {
        let mut map = self.lock();
        let value = map.entry(key).or_insert_with(default);
        f(value)
    }

    /// Replace the entry only if it still equals `expected` (`None` meaning
    /// absent). On mismatch the current value is returned.
    pub fn compare_and_swap(&self, key: K, expected: Option<&V>, new: V) -> Result<(), Option<V>>
    where
        V: PartialEq,
    {
        let mut map = self.lock();
        let current = map.get(&key);
        if current != expected {
            return Err(current.cloned());
        }
        map.insert(key, new);
        Ok(())
    }

    /// Visit a snapshot of every entry until `f` returns `false`.
    pub fn range(&self, mut f: impl FnMut(&K, &V) -> bool) {
        let snapshot: Vec<(K, V)> = self
            .lock()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        for (k, v) in &snapshot {
            if !f(k, v) {
                break;
            }
        }
    }

    pub fn values(&self) -> Vec<V> {
        self.lock().values().cloned().collect()
    }

    pub fn filter(&self, mut pred: impl FnMut(&V) -> bool) -> Vec<V> {
        self.lock().values().filter(|v| pred(v)).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

impl<K, V> FromIterator<(K, V)> for EntityStore<K, V>
where
    K: Eq + Hash,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            inner: Mutex::new(iter.into_iter().collect()),
        }
    }
}
