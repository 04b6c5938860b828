use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::hash::{BuildHasher, Hash};

/// Terminal outcome memoized for one key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheEntry<V> {
    Loaded(V),
    /// The batch function confirmed the key does not exist.
    Missing,
}

impl<V> CacheEntry<V> {
    pub fn is_loaded(&self) -> bool {
        matches!(self, CacheEntry::Loaded(_))
    }
}

/// Memoization surface owned by a single loader worker.
///
/// Fetch errors never make it into the cache, only terminal outcomes do.
pub trait Cache {
    type K;
    type V;

    fn get(&self, key: &Self::K) -> Option<&Self::V>;

    fn insert(&mut self, key: Self::K, value: Self::V);

    /// Inserts the value unless the key already holds one. Returns whether it was inserted.
    fn insert_if_absent(&mut self, key: Self::K, value: Self::V) -> bool;

    fn insert_many<I: IntoIterator<Item = (Self::K, Self::V)>>(&mut self, key_vals: I) {
        for (key, value) in key_vals {
            self.insert(key, value);
        }
    }

    fn remove(&mut self, keys: &[Self::K]);
    fn flush(&mut self);
}

impl<K, V, S: BuildHasher> Cache for HashMap<K, V, S>
where
    K: Eq + Hash,
{
    type K = K;
    type V = V;

    fn get(&self, key: &Self::K) -> Option<&Self::V> {
        HashMap::get(self, key)
    }

    fn insert(&mut self, key: Self::K, value: Self::V) {
        HashMap::insert(self, key, value);
    }

    fn insert_if_absent(&mut self, key: Self::K, value: Self::V) -> bool {
        match self.entry(key) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                slot.insert(value);
                true
            }
        }
    }

    fn remove(&mut self, keys: &[Self::K]) {
        for key in keys.iter() {
            HashMap::remove(self, key);
        }
    }

    fn flush(&mut self) {
        self.clear();
    }
}
