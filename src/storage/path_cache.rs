use std::collections::HashMap;
use std::sync::RwLock;

use tracing::error;

use crate::storage::item::now_millis;
use crate::util::item_path;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry<V> {
    pub value: V,
    pub last_check_millis: u64,
}

/// Per-repository cache keyed by normalized item path. Concurrent writers to the same key are
///  resolved last-writer-wins; there are no multi-key transactions. Eviction is by age, driven
///  from the outside, there is no capacity bound.
#[derive(Debug)]
pub struct PathCache<V> {
    entries: RwLock<HashMap<String, CacheEntry<V>>>,
}

impl<V> Default for PathCache<V> {
    fn default() -> Self {
        PathCache { entries: RwLock::new(HashMap::new()) }
    }
}

impl<V: Clone> PathCache<V> {
    pub fn new() -> PathCache<V> {
        Default::default()
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, HashMap<String, CacheEntry<V>>> {
        self.entries.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<String, CacheEntry<V>>> {
        self.entries.write().unwrap_or_else(|e| {
            error!("path cache lock was poisoned");
            e.into_inner()
        })
    }

    pub fn get(&self, path: &str) -> Option<CacheEntry<V>> {
        self.read().get(&item_path::normalize(path)).cloned()
    }

    pub fn contains(&self, path: &str) -> bool {
        self.read().contains_key(&item_path::normalize(path))
    }

    pub fn put(&self, path: &str, value: V) {
        self.put_at(path, value, now_millis());
    }

    pub fn put_at(&self, path: &str, value: V, last_check_millis: u64) {
        self.write().insert(item_path::normalize(path), CacheEntry { value, last_check_millis });
    }

    /// resets `last_check_millis` to now; false if there is no entry
    pub fn touch(&self, path: &str) -> bool {
        match self.write().get_mut(&item_path::normalize(path)) {
            Some(entry) => {
                entry.last_check_millis = now_millis();
                true
            }
            None => false,
        }
    }

    pub fn remove(&self, path: &str) -> Option<CacheEntry<V>> {
        self.write().remove(&item_path::normalize(path))
    }

    /// removes `path` and all its ancestors, returning the number of removed entries
    pub fn remove_with_parents(&self, path: &str) -> usize {
        let mut entries = self.write();
        let mut current = Some(item_path::normalize(path));
        let mut removed = 0;
        while let Some(p) = current {
            if entries.remove(&p).is_some() {
                removed += 1;
            }
            current = item_path::parent(&p);
        }
        removed
    }

    /// removes `path` and everything below it, returning the number of removed entries
    pub fn remove_with_children(&self, path: &str) -> usize {
        let path = item_path::normalize(path);
        let mut entries = self.write();
        let before = entries.len();
        entries.retain(|p, _| !item_path::is_below(p, &path));
        before - entries.len()
    }

    pub fn purge(&self) {
        self.write().clear();
    }

    /// paths whose `last_check_millis` is strictly below `cutoff_millis`, sorted
    pub fn entries_older_than(&self, cutoff_millis: u64) -> Vec<String> {
        let mut result: Vec<String> = self.read().iter()
            .filter(|(_, e)| e.last_check_millis < cutoff_millis)
            .map(|(p, _)| p.clone())
            .collect();
        result.sort();
        result
    }

    pub fn paths(&self) -> Vec<String> {
        let mut result: Vec<String> = self.read().keys().cloned().collect();
        result.sort();
        result
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }
}

/// what a proxy remembers about an item it fetched
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedItem {
    pub length: u64,
    pub remote_url: Option<String>,
}

#[cfg(test)]
mod test {
    use std::sync::Arc;

    use super::*;

    #[test]
    fn test_put_get_normalizes() {
        let cache = PathCache::new();
        cache.put_at("org/x/", 1, 100);
        assert_eq!(cache.get("/org/x"), Some(CacheEntry { value: 1, last_check_millis: 100 }));
        assert!(cache.get("/org").is_none());
    }

    #[test]
    fn test_entries_older_than() {
        let cache = PathCache::new();
        cache.put_at("/old", (), 10);
        cache.put_at("/edge", (), 20);
        cache.put_at("/new", (), 30);
        assert_eq!(cache.entries_older_than(20), vec!["/old"]);
    }

    #[test]
    fn test_remove_with_parents_and_children() {
        let cache = PathCache::new();
        for p in ["/a", "/a/b", "/a/b/c", "/a/bc", "/d"] {
            cache.put(p, ());
        }
        assert_eq!(cache.remove_with_children("/a/b"), 2);
        assert_eq!(cache.paths(), vec!["/a", "/a/bc", "/d"]);
        assert_eq!(cache.remove_with_parents("/a/bc/x"), 2);
        assert_eq!(cache.paths(), vec!["/d"]);
    }

    #[test]
    fn test_touch() {
        let cache = PathCache::new();
        cache.put_at("/a", (), 0);
        assert!(cache.touch("/a"));
        assert!(cache.get("/a").unwrap().last_check_millis > 0);
        assert!(!cache.touch("/b"));
    }

    #[test]
    fn test_concurrent_puts_last_writer_wins() {
        let cache = Arc::new(PathCache::new());
        let handles: Vec<_> = (0..8).map(|i| {
            let cache = cache.clone();
            std::thread::spawn(move || {
                for j in 0..100 {
                    cache.put_at("/shared", i * 1000 + j, j as u64);
                    cache.put(&format!("/own/{}/{}", i, j), i);
                }
            })
        }).collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(cache.len(), 801);
        let shared = cache.get("/shared").unwrap();
        assert_eq!(shared.value % 1000, shared.last_check_millis as i32);
    }
}
