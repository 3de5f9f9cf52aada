//! C1: interval container keyed by `(start, len)`.
//!
//! Grounded in `extent-cache.c`'s `cache_tree`/`cache_extent` rbtree: the
//! overlap rule during insertion (`offset + size <= entry.start` goes
//! left, `offset >= entry.start + entry.size` goes right, otherwise it's
//! a collision) is preserved exactly, just expressed over a `BTreeMap`
//! ordered by `start` instead of a hand-rolled rbtree.

use std::collections::BTreeMap;

use crate::error::FsckError;

struct Entry<T> {
    size: u64,
    payload: T,
}

/// Non-overlapping `(start, size)` intervals, each carrying a payload of
/// type `T` (an `extent_record`, `chunk_record`, `shared_node`,
/// `corrupt_block`, ...).
pub struct ExtentCache<T> {
    entries: BTreeMap<u64, Entry<T>>,
}

impl<T> Default for ExtentCache<T> {
    fn default() -> Self {
        ExtentCache { entries: BTreeMap::new() }
    }
}

impl<T> ExtentCache<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Returns the entry whose interval overlaps any byte of
    /// `[start, start+size)`. Ambiguity is impossible: entries never
    /// overlap after insertion.
    pub fn lookup(&self, start: u64, size: u64) -> Option<(u64, u64, &T)> {
        let end = start.saturating_add(size.max(1));

        // A predecessor entry (start_k <= start) overlaps iff its own
        // end reaches past `start`.
        if let Some((&k, e)) = self.entries.range(..=start).next_back() {
            if k.saturating_add(e.size) > start {
                return Some((k, e.size, &e.payload));
            }
        }
        // Otherwise the only candidate is the first entry strictly
        // inside the query range (guaranteed to start before `end`).
        if let Some((&k, e)) = self.entries.range(start..end).next() {
            return Some((k, e.size, &e.payload));
        }
        None
    }

    pub fn lookup_mut(&mut self, start: u64, size: u64) -> Option<(u64, u64, &mut T)> {
        let key = self.lookup(start, size).map(|(k, _, _)| k)?;
        self.entries.get_mut(&key).map(|e| (key, e.size, &mut e.payload))
    }

    /// Returns the first entry with `start_of_entry >= start`.
    pub fn search(&self, start: u64) -> Option<(u64, u64, &T)> {
        self.entries.range(start..).next().map(|(&k, e)| (k, e.size, &e.payload))
    }

    /// Insert a new interval. Fails with [`FsckError::AlreadyPresent`] if
    /// it overlaps any existing entry.
    pub fn insert(&mut self, start: u64, size: u64, payload: T) -> Result<(), FsckError> {
        if self.lookup(start, size).is_some() {
            return Err(FsckError::AlreadyPresent);
        }
        self.entries.insert(start, Entry { size, payload });
        Ok(())
    }

    pub fn remove(&mut self, start: u64) -> Option<T> {
        self.entries.remove(&start).map(|e| e.payload)
    }

    pub fn next(&self, start: u64) -> Option<(u64, u64, &T)> {
        self.entries.range(start.saturating_add(1)..).next().map(|(&k, e)| (k, e.size, &e.payload))
    }

    pub fn prev(&self, start: u64) -> Option<(u64, u64, &T)> {
        self.entries.range(..start).next_back().map(|(&k, e)| (k, e.size, &e.payload))
    }

    pub fn iter(&self) -> impl Iterator<Item = (u64, u64, &T)> {
        self.entries.iter().map(|(&k, e)| (k, e.size, &e.payload))
    }

    pub fn values_mut(&mut self) -> impl Iterator<Item = &mut T> {
        self.entries.values_mut().map(|e| &mut e.payload)
    }
}

/// Companion cache for `device_extent_record`: keyed by `(devid, start,
/// size)` so that distinct devices may legitimately share the same
/// `(start, size)` pair (§4.1: "duplicate handling ... requires a
/// companion alternate cache").
pub struct DeviceExtentCache<T> {
    entries: BTreeMap<(u64, u64), (u64, T)>,
}

impl<T> Default for DeviceExtentCache<T> {
    fn default() -> Self {
        DeviceExtentCache { entries: BTreeMap::new() }
    }
}

impl<T> DeviceExtentCache<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lookup(&self, devid: u64, start: u64, size: u64) -> Option<(u64, &T)> {
        let end = start.saturating_add(size.max(1));
        if let Some((&(_, k), (sz, payload))) =
            self.entries.range((devid, 0)..(devid, start.saturating_add(1))).next_back()
        {
            if k.saturating_add(*sz) > start {
                return Some((k, payload));
            }
        }
        if let Some((&(_, k), (sz, payload))) =
            self.entries.range((devid, start)..(devid, end)).next()
        {
            return Some((k, payload));
        }
        None
    }

    pub fn insert(
        &mut self,
        devid: u64,
        start: u64,
        size: u64,
        payload: T,
    ) -> Result<(), FsckError> {
        if self.lookup(devid, start, size).is_some() {
            return Err(FsckError::AlreadyPresent);
        }
        self.entries.insert((devid, start), (size, payload));
        Ok(())
    }

    pub fn remove(&mut self, devid: u64, start: u64) -> Option<T> {
        self.entries.remove(&(devid, start)).map(|(_, p)| p)
    }

    pub fn iter(&self) -> impl Iterator<Item = (u64, u64, u64, &T)> {
        self.entries.iter().map(|(&(devid, start), (size, payload))| (devid, start, *size, payload))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_and_lookup_exact() {
        let mut cache = ExtentCache::new();
        cache.insert(100, 50, "a").unwrap();
        let (start, size, payload) = cache.lookup(100, 50).unwrap();
        assert_eq!((start, size, *payload), (100, 50, "a"));
    }

    #[test]
    fn overlapping_insert_fails() {
        let mut cache = ExtentCache::new();
        cache.insert(100, 50, "a").unwrap();
        assert!(matches!(cache.insert(120, 10, "b"), Err(FsckError::AlreadyPresent)));
        assert!(matches!(cache.insert(90, 20, "b"), Err(FsckError::AlreadyPresent)));
        // Adjacent, non-overlapping intervals are fine.
        cache.insert(150, 10, "c").unwrap();
        cache.insert(50, 50, "d").unwrap();
    }

    #[test]
    fn lookup_covers_any_overlapping_byte() {
        let mut cache = ExtentCache::new();
        cache.insert(1000, 100, "x").unwrap();
        assert!(cache.lookup(999, 2).is_some());
        assert!(cache.lookup(1099, 2).is_some());
        assert!(cache.lookup(0, 500).is_some());
        assert!(cache.lookup(2000, 10).is_none());
    }

    #[test]
    fn search_returns_first_at_or_after() {
        let mut cache = ExtentCache::new();
        cache.insert(100, 10, "a").unwrap();
        cache.insert(300, 10, "b").unwrap();
        let (start, _, payload) = cache.search(150).unwrap();
        assert_eq!((start, *payload), (300, "b"));
        let (start, _, payload) = cache.search(100).unwrap();
        assert_eq!((start, *payload), (100, "a"));
        assert!(cache.search(1000).is_none());
    }

    #[test]
    fn next_and_prev_walk_in_order() {
        let mut cache = ExtentCache::new();
        cache.insert(10, 1, "a").unwrap();
        cache.insert(20, 1, "b").unwrap();
        cache.insert(30, 1, "c").unwrap();
        assert_eq!(cache.next(10).unwrap().2, &"b");
        assert_eq!(cache.next(20).unwrap().2, &"c");
        assert!(cache.next(30).is_none());
        assert_eq!(cache.prev(30).unwrap().2, &"b");
        assert!(cache.prev(10).is_none());
    }

    #[test]
    fn device_extent_cache_allows_same_range_on_different_devices() {
        let mut cache = DeviceExtentCache::new();
        cache.insert(1, 1000, 100, "dev1-chunk").unwrap();
        cache.insert(2, 1000, 100, "dev2-chunk").unwrap();
        assert!(cache.lookup(1, 1000, 100).is_some());
        assert!(cache.lookup(2, 1000, 100).is_some());
        assert!(matches!(
            cache.insert(1, 1050, 10, "collides"),
            Err(FsckError::AlreadyPresent)
        ));
    }
}
