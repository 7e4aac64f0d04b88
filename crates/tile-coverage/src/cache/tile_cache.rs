//! Weak-value cache of decoded tiles, shared by every view of one resource.
//!
//! Entries do not keep tiles alive by themselves: a tile stays cached while a
//! surface still references it or while it sits in the bounded retention set
//! of recently cached tiles. Once both are gone the entry silently turns into
//! a miss, so callers must always be ready to decode.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use lru::LruCache;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};

use crate::config::CoverageConfig;
use crate::types::{CacheStats, Rectangle, SampleLayout, TileBuffer, WeakTileBuffer};

/// Identity of a decoded tile.
///
/// The content of a tile depends on where it is in the resource, on which
/// bands and subsampling produced it and on which part of it was read, so all
/// of these take part in equality.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TileKey {
    /// Row-major index in the resource tile directory.
    pub tile_index: i64,
    /// Strictly increasing band numbers, or `None` for all bands.
    pub included_bands: Option<Vec<u32>>,
    pub subsampling: Vec<i64>,
    pub subsampling_offsets: Vec<i64>,
    /// Part of the tile holding data, in resource pixels from the tile corner.
    /// Views whose domains end inside a tile read only part of it.
    pub region: Rectangle,
}

/// Strong references to the most recently cached tiles, bounded in bytes.
struct Retention {
    tiles: LruCache<TileKey, TileBuffer>,
    bytes: usize,
    limit: usize,
}

impl Retention {
    fn keep(&mut self, key: TileKey, tile: TileBuffer) {
        let size = tile.size_in_bytes();
        if size > self.limit {
            return;
        }
        if let Some(old) = self.tiles.put(key, tile) {
            self.bytes = self.bytes.saturating_sub(old.size_in_bytes());
        }
        self.bytes += size;
        while self.bytes > self.limit {
            match self.tiles.pop_lru() {
                Some((_, evicted)) => {
                    self.bytes = self.bytes.saturating_sub(evicted.size_in_bytes());
                }
                None => break,
            }
        }
    }

    fn touch(&mut self, key: &TileKey) {
        self.tiles.get(key);
    }
}

/// Concurrent tile cache with identity-preserving replacement.
pub struct TileCache {
    entries: DashMap<TileKey, WeakTileBuffer>,
    retention: Mutex<Retention>,
    hits: AtomicU64,
    misses: AtomicU64,
    replacements: AtomicU64,
}

impl TileCache {
    /// Create a cache keeping up to `retained_bytes` of recent tiles alive.
    pub fn new(retained_bytes: usize) -> Self {
        Self {
            entries: DashMap::new(),
            retention: Mutex::new(Retention {
                tiles: LruCache::unbounded(),
                bytes: 0,
                limit: retained_bytes,
            }),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            replacements: AtomicU64::new(0),
        }
    }

    /// Create a cache sized from the configuration.
    pub fn from_config(config: &CoverageConfig) -> Self {
        Self::new(config.tile_cache_retained_bytes())
    }

    /// Look up a tile and position it at `origin`.
    ///
    /// A cached tile with exactly the expected layout is returned translated.
    /// A tile of the same size storing the expected bands in another order or
    /// as a superset is returned as a band-reindexed view over the same
    /// samples. Anything else is a miss.
    pub fn get(
        &self,
        key: &TileKey,
        expected: &SampleLayout,
        origin: (i64, i64),
    ) -> Option<TileBuffer> {
        let weak = self.entries.get(key).map(|entry| entry.value().clone());
        let cached = match weak {
            Some(weak) => match weak.upgrade(origin) {
                Some(tile) => Some(tile),
                None => {
                    self.entries.remove_if(key, |_, w| !w.is_alive());
                    None
                }
            },
            None => None,
        };

        let found = cached.and_then(|tile| Self::compatible(tile, expected));
        match found {
            Some(tile) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                self.lock_retention().touch(key);
                tracing::trace!(tile = key.tile_index, "tile cache hit");
                Some(tile)
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                tracing::trace!(tile = key.tile_index, "tile cache miss");
                None
            }
        }
    }

    /// Cache a decoded tile and return the buffer to use from now on.
    ///
    /// If a live tile of the same size is already cached under this key and
    /// can serve the new tile's layout, the existing samples win and the new
    /// buffer is dropped, so racing decoders converge on one object. The
    /// returned buffer is always positioned at `tile.origin()`.
    pub fn put(&self, key: TileKey, tile: TileBuffer) -> TileBuffer {
        let layout = tile.layout();
        let canonical = match self.entries.entry(key.clone()) {
            Entry::Occupied(mut occupied) => {
                let existing = occupied
                    .get()
                    .upgrade(tile.origin())
                    .and_then(|cached| Self::compatible(cached, &layout));
                match existing {
                    Some(cached) => {
                        self.replacements.fetch_add(1, Ordering::Relaxed);
                        tracing::trace!(tile = key.tile_index, "keeping previously cached tile");
                        cached
                    }
                    None => {
                        occupied.insert(tile.downgrade());
                        tile
                    }
                }
            }
            Entry::Vacant(vacant) => {
                vacant.insert(tile.downgrade());
                tile
            }
        };
        self.lock_retention().keep(key, canonical.clone());
        canonical
    }

    /// Remove entries whose tiles are no longer alive. Returns how many.
    pub fn purge_expired(&self) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, weak| weak.is_alive());
        before.saturating_sub(self.entries.len())
    }

    /// Drop every entry and every retained tile.
    pub fn clear(&self) {
        self.entries.clear();
        let mut retention = self.lock_retention();
        retention.tiles.clear();
        retention.bytes = 0;
    }

    /// Get cache statistics.
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            replacements: self.replacements.load(Ordering::Relaxed),
            entries: self.entries.len(),
            retained_bytes: self.lock_retention().bytes as u64,
        }
    }

    /// Number of entries, including ones whose tile may have expired.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn compatible(tile: TileBuffer, expected: &SampleLayout) -> Option<TileBuffer> {
        let layout = tile.layout();
        if layout == *expected {
            Some(tile)
        } else if layout.same_size(expected) {
            tile.reindexed(&expected.bands)
        } else {
            None
        }
    }

    fn lock_retention(&self) -> std::sync::MutexGuard<'_, Retention> {
        self.retention.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for TileCache {
    fn default() -> Self {
        Self::from_config(&CoverageConfig::default())
    }
}

impl std::fmt::Debug for TileCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TileCache")
            .field("entries", &self.entries.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(index: i64) -> TileKey {
        TileKey {
            tile_index: index,
            included_bands: None,
            subsampling: vec![1, 1],
            subsampling_offsets: vec![0, 0],
            region: Rectangle::new(0, 0, 4, 4),
        }
    }

    fn tile(bands: Vec<u32>, value: f32) -> TileBuffer {
        let layout = SampleLayout::new(4, 4, bands);
        let fill = vec![value; layout.bands.len()];
        TileBuffer::filled((0, 0), &layout, &fill)
    }

    #[test]
    fn test_cache_put_and_get() {
        let cache = TileCache::new(1024 * 1024);
        let layout = SampleLayout::new(4, 4, vec![0]);

        assert!(cache.get(&key(1), &layout, (0, 0)).is_none());
        let stored = cache.put(key(1), tile(vec![0], 7.0));

        let hit = cache.get(&key(1), &layout, (12, 8)).expect("hit");
        assert_eq!(hit.origin(), (12, 8));
        assert!(hit.shares_storage_with(&stored));
        assert_eq!(hit.sample(3, 3, 0), Some(7.0));

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.entries, 1);
    }

    #[test]
    fn test_second_put_keeps_first_tile() {
        let cache = TileCache::new(1024 * 1024);
        let first = cache.put(key(3), tile(vec![0], 1.0));
        let second = cache.put(key(3), tile(vec![0], 2.0).translated((4, 0)));

        assert!(second.shares_storage_with(&first));
        assert_eq!(second.origin(), (4, 0));
        assert_eq!(second.sample(0, 0, 0), Some(1.0));
        assert_eq!(cache.stats().replacements, 1);
    }

    #[test]
    fn test_band_permutation_is_reindexed_view() {
        let cache = TileCache::new(1024 * 1024);
        let layout = SampleLayout::new(4, 4, vec![0, 2]);
        let mut first = TileBuffer::filled((0, 0), &layout, &[10.0, 20.0]);
        first.set(0, 0, 1, 25.0);
        let stored = cache.put(key(0), first);

        let swapped = SampleLayout::new(4, 4, vec![2, 0]);
        let view = cache.get(&key(0), &swapped, (0, 0)).expect("reindexed hit");
        assert!(view.shares_storage_with(&stored));
        assert_eq!(view.layout(), swapped);
        assert_eq!(view.sample(0, 0, 0), Some(25.0));
        assert_eq!(view.sample(0, 0, 1), Some(10.0));
    }

    #[test]
    fn test_incompatible_layout_is_miss() {
        let cache = TileCache::new(1024 * 1024);
        cache.put(key(0), tile(vec![0], 1.0));

        let other_size = SampleLayout::new(2, 2, vec![0]);
        assert!(cache.get(&key(0), &other_size, (0, 0)).is_none());
        let missing_band = SampleLayout::new(4, 4, vec![1]);
        assert!(cache.get(&key(0), &missing_band, (0, 0)).is_none());
    }

    #[test]
    fn test_incompatible_put_replaces_entry() {
        let cache = TileCache::new(1024 * 1024);
        cache.put(key(0), tile(vec![0], 1.0));
        let replacement = cache.put(key(0), tile(vec![1], 2.0));

        let layout = SampleLayout::new(4, 4, vec![1]);
        let hit = cache.get(&key(0), &layout, (0, 0)).expect("hit");
        assert!(hit.shares_storage_with(&replacement));
        assert_eq!(cache.stats().replacements, 0);
    }

    #[test]
    fn test_keys_differ_by_subsampling_bands_and_region() {
        let cache = TileCache::new(1024 * 1024);
        cache.put(key(0), tile(vec![0], 1.0));

        let layout = SampleLayout::new(4, 4, vec![0]);
        let mut subsampled = key(0);
        subsampled.subsampling = vec![2, 2];
        assert!(cache.get(&subsampled, &layout, (0, 0)).is_none());

        let mut banded = key(0);
        banded.included_bands = Some(vec![0]);
        assert!(cache.get(&banded, &layout, (0, 0)).is_none());

        let mut clipped = key(0);
        clipped.region = Rectangle::new(1, 0, 3, 4);
        assert!(cache.get(&clipped, &layout, (0, 0)).is_none());
    }

    #[test]
    fn test_unretained_tile_expires() {
        // Nothing fits in the retention set: tiles live only while referenced.
        let cache = TileCache::new(0);
        let layout = SampleLayout::new(4, 4, vec![0]);

        let held = cache.put(key(0), tile(vec![0], 1.0));
        assert!(cache.get(&key(0), &layout, (0, 0)).is_some());

        drop(held);
        assert!(cache.get(&key(0), &layout, (0, 0)).is_none());
        assert_eq!(cache.purge_expired(), 0);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_retention_keeps_recent_tiles_alive() {
        // Each 4x4 single-band tile is 64 bytes: room for two.
        let cache = TileCache::new(128);
        let layout = SampleLayout::new(4, 4, vec![0]);
        for i in 0..3 {
            cache.put(key(i), tile(vec![0], i as f32));
        }

        assert!(cache.get(&key(0), &layout, (0, 0)).is_none());
        assert!(cache.get(&key(1), &layout, (0, 0)).is_some());
        assert!(cache.get(&key(2), &layout, (0, 0)).is_some());
        assert_eq!(cache.stats().retained_bytes, 128);
    }

    #[test]
    fn test_purge_and_clear() {
        let cache = TileCache::new(0);
        let _held = cache.put(key(0), tile(vec![0], 1.0));
        drop(cache.put(key(1), tile(vec![0], 1.0)));

        assert_eq!(cache.len(), 2);
        assert_eq!(cache.purge_expired(), 1);
        assert_eq!(cache.len(), 1);

        cache.clear();
        assert!(cache.is_empty());
        assert_eq!(cache.stats().retained_bytes, 0);
    }
}
