use dashmap::DashMap;
use std::borrow::Borrow;
use std::hash::Hash;

/// `DashMap` access that hands back owned values.
///
/// The lock registry and the static oracle are read from async code; no
/// shard guard may outlive the call.
pub trait DashMapExt<K, V> {
    /// Clone the value for `key`.
    fn get_cloned<Q>(&self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
        V: Clone;

    /// Clone the value for `key`, inserting `make()` first if absent.
    fn get_or_insert_cloned(&self, key: &K, make: impl FnOnce() -> V) -> V
    where
        K: Clone,
        V: Clone;

    /// `retain`, reporting how many entries were dropped.
    fn retain_counted(&self, keep: impl FnMut(&K, &mut V) -> bool) -> usize;
}

impl<K, V> DashMapExt<K, V> for DashMap<K, V>
where
    K: Eq + Hash,
{
    fn get_cloned<Q>(&self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
        V: Clone,
    {
        self.get(key).map(|r| r.value().clone())
    }

    fn get_or_insert_cloned(&self, key: &K, make: impl FnOnce() -> V) -> V
    where
        K: Clone,
        V: Clone,
    {
        if let Some(v) = self.get_cloned(key) {
            return v;
        }
        self.entry(key.clone()).or_insert_with(make).value().clone()
    }

    fn retain_counted(&self, keep: impl FnMut(&K, &mut V) -> bool) -> usize {
        let before = self.len();
        self.retain(keep);
        before.saturating_sub(self.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_once_then_reuse() {
        let map: DashMap<&str, u32> = DashMap::new();
        assert_eq!(map.get_or_insert_cloned(&"a", || 1), 1);
        assert_eq!(map.get_or_insert_cloned(&"a", || 2), 1);
        // Would deadlock if a guard from the calls above were still alive.
        map.insert("a", 3);
        assert_eq!(map.get_cloned("a"), Some(3));
    }

    #[test]
    fn retain_counts_removed_entries() {
        let map: DashMap<u32, u32> = (0..10).map(|i| (i, i)).collect();
        assert_eq!(map.retain_counted(|_, v| *v % 2 == 0), 5);
        assert_eq!(map.len(), 5);
    }
}
