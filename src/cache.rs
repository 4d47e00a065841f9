//! Bounded LRU cache of image tiles at a fixed (channel, stokes) plane

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use parking_lot::Mutex;
use rayon::prelude::*;

use crate::error::{Error, Result};
use crate::loader::{FileLoader, PlaneSlice};
use crate::types::{Frame, TileKey, TILE_SIZE};

/// A resident tile, shared with any number of in-flight readers.
///
/// Holds `TILE_SIZE` × `TILE_SIZE` single-precision values; positions
/// beyond the image extent are NaN.
pub type CachedTile = Arc<Vec<f32>>;

/// The map and the recency order always reference the same key set and
/// are only mutated together, under one lock.
struct CacheState {
    map: HashMap<TileKey, CachedTile>,
    /// Most recently used at the front
    recency: VecDeque<TileKey>,
    plane: Frame,
}

/// Per-image LRU tile cache.
///
/// A single mutex guards the map and the recency order. Loader I/O on a
/// miss is additionally serialized under the caller's image mutex, which
/// guards the shared file handle.
pub struct TileCache {
    state: Mutex<CacheState>,
    capacity: usize,
}

impl TileCache {
    /// Creates a cache bound to channel 0, stokes 0. Capacity must be
    /// nonzero.
    pub fn new(capacity: usize) -> Result<Self> {
        if capacity == 0 {
            return Err(Error::InvalidParameter(
                "tile cache capacity must be nonzero".to_string(),
            ));
        }
        Ok(Self {
            state: Mutex::new(CacheState {
                map: HashMap::with_capacity(capacity),
                recency: VecDeque::with_capacity(capacity),
                plane: Frame::default(),
            }),
            capacity,
        })
    }

    /// Returns the tile iff it is already resident. Never loads and never
    /// changes recency.
    pub fn peek(&self, key: TileKey) -> Option<CachedTile> {
        self.state.lock().map.get(&key).cloned()
    }

    /// Returns the tile, loading it from `loader` on a miss.
    ///
    /// On a miss with a full cache the least recently used entry is
    /// evicted first. The returned tile becomes the most recently used.
    pub fn get(
        &self,
        key: TileKey,
        loader: &dyn FileLoader,
        image_mutex: &Mutex<()>,
    ) -> Result<CachedTile> {
        let mut state = self.state.lock();
        self.get_locked(&mut state, key, loader, image_mutex)
    }

    /// Fetches a batch of tiles into `tiles`, one entry per requested key.
    ///
    /// Keys already resident are touched (serialized) and then read in
    /// parallel; the remainder are loaded one at a time under the image
    /// mutex.
    pub fn get_multiple(
        &self,
        keys: &[TileKey],
        loader: &dyn FileLoader,
        image_mutex: &Mutex<()>,
        tiles: &mut HashMap<TileKey, CachedTile>,
    ) -> Result<()> {
        let mut state = self.state.lock();

        let mut found = Vec::new();
        let mut not_found = Vec::new();
        for &key in keys {
            if state.map.contains_key(&key) {
                found.push(key);
            } else {
                not_found.push(key);
            }
        }

        for &key in &found {
            Self::touch(&mut state, key);
        }

        // Reads are safe to do in parallel while this thread holds the
        // cache lock: no writer can interleave.
        let map = &state.map;
        let hits: Option<Vec<(TileKey, CachedTile)>> = found
            .par_iter()
            .map(|key| map.get(key).cloned().map(|tile| (*key, tile)))
            .collect();
        let hits = hits.ok_or_else(|| {
            Error::Invariant("tile map out of step with recency order".to_string())
        })?;
        tiles.extend(hits);

        for &key in &not_found {
            let tile = self.get_locked(&mut state, key, loader, image_mutex)?;
            tiles.insert(key, tile);
        }

        Ok(())
    }

    /// Atomically empties the cache and binds it to a new plane.
    ///
    /// Tiles shared via earlier returns stay readable until their last
    /// reader drops them.
    pub fn reset(&self, channel: i32, stokes: i32) {
        let mut state = self.state.lock();
        state.map.clear();
        state.recency.clear();
        state.plane = Frame::new(channel, stokes);
    }

    /// The (channel, stokes) plane the cache is currently bound to
    pub fn plane(&self) -> Frame {
        self.state.lock().plane
    }

    pub fn len(&self) -> usize {
        self.state.lock().map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock().map.is_empty()
    }

    /// Keys currently resident, in no particular order
    pub fn resident_keys(&self) -> Vec<TileKey> {
        self.state.lock().map.keys().copied().collect()
    }

    fn get_locked(
        &self,
        state: &mut CacheState,
        key: TileKey,
        loader: &dyn FileLoader,
        image_mutex: &Mutex<()>,
    ) -> Result<CachedTile> {
        if let Some(tile) = state.map.get(&key) {
            let tile = Arc::clone(tile);
            Self::touch(state, key);
            return Ok(tile);
        }

        if state.map.len() == self.capacity {
            let victim = state.recency.pop_back().ok_or_else(|| {
                Error::Invariant("tile map out of step with recency order".to_string())
            })?;
            state.map.remove(&victim);
        }

        let tile = Self::load(state.plane, key, loader, image_mutex)?;
        state.map.insert(key, Arc::clone(&tile));
        state.recency.push_front(key);
        Ok(tile)
    }

    /// Moves a resident key to the front of the recency order
    fn touch(state: &mut CacheState, key: TileKey) {
        if let Some(position) = state.recency.iter().position(|&k| k == key) {
            state.recency.remove(position);
        }
        state.recency.push_front(key);
    }

    /// Loads one tile from the image, NaN-padding pixels beyond the extent
    fn load(
        plane: Frame,
        key: TileKey,
        loader: &dyn FileLoader,
        image_mutex: &Mutex<()>,
    ) -> Result<CachedTile> {
        let mut buffer = vec![f32::NAN; TILE_SIZE * TILE_SIZE];
        let slice = PlaneSlice {
            x: key.x as u64,
            y: key.y as u64,
            width: TILE_SIZE as u64,
            height: TILE_SIZE as u64,
            channel: plane.channel,
            stokes: plane.stokes,
        };

        {
            let _image_lock = image_mutex.lock();
            loader.get_slice(&slice, &mut buffer)?;
        }

        Ok(Arc::new(buffer))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loader::MemoryLoader;
    use crate::types::Dimensions;

    const T: i64 = TILE_SIZE as i64;

    fn plane_loader(tiles_x: u64, tiles_y: u64, channels: i32) -> MemoryLoader {
        let dims = Dimensions::new(tiles_x * TILE_SIZE as u64, tiles_y * TILE_SIZE as u64);
        let plane = dims.pixel_count() as usize;
        let mut data = Vec::with_capacity(plane * channels as usize);
        for c in 0..channels {
            data.extend((0..plane).map(|i| (c as usize * plane + i) as f32));
        }
        MemoryLoader::new(data, dims, channels, 1).unwrap()
    }

    #[test]
    fn test_zero_capacity_rejected() {
        assert!(TileCache::new(0).is_err());
    }

    #[test]
    fn test_lru_eviction_order() {
        let loader = plane_loader(1, 4, 1);
        let image_mutex = Mutex::new(());
        let cache = TileCache::new(3).unwrap();

        // S1: get (0,0), (0,1), (0,2), (0,0), (0,3) with capacity 3
        for y in [0, 1, 2, 0, 3] {
            cache
                .get(TileKey::new(0, y * T), &loader, &image_mutex)
                .unwrap();
        }

        let mut resident = cache.resident_keys();
        resident.sort_by_key(|k| k.y);
        assert_eq!(
            resident,
            vec![
                TileKey::new(0, 0),
                TileKey::new(0, 2 * T),
                TileKey::new(0, 3 * T)
            ]
        );
    }

    #[test]
    fn test_size_never_exceeds_capacity() {
        let loader = plane_loader(1, 8, 1);
        let image_mutex = Mutex::new(());
        let cache = TileCache::new(4).unwrap();

        for y in 0..8 {
            cache
                .get(TileKey::new(0, y * T), &loader, &image_mutex)
                .unwrap();
            assert!(cache.len() <= 4);
        }
        assert_eq!(cache.len(), 4);
    }

    #[test]
    fn test_peek_does_not_load_or_touch() {
        let loader = plane_loader(1, 4, 1);
        let image_mutex = Mutex::new(());
        let cache = TileCache::new(2).unwrap();

        assert!(cache.peek(TileKey::new(0, 0)).is_none());
        assert!(cache.is_empty());

        cache.get(TileKey::new(0, 0), &loader, &image_mutex).unwrap();
        cache.get(TileKey::new(0, T), &loader, &image_mutex).unwrap();

        // Peeking (0,0) must not rescue it from eviction
        assert!(cache.peek(TileKey::new(0, 0)).is_some());
        cache
            .get(TileKey::new(0, 2 * T), &loader, &image_mutex)
            .unwrap();
        assert!(cache.peek(TileKey::new(0, 0)).is_none());
        assert!(cache.peek(TileKey::new(0, T)).is_some());
    }

    #[test]
    fn test_get_returns_plane_data() {
        let loader = plane_loader(1, 2, 2);
        let image_mutex = Mutex::new(());
        let cache = TileCache::new(4).unwrap();

        let tile = cache.get(TileKey::new(0, 0), &loader, &image_mutex).unwrap();
        assert_eq!(tile[0], 0.0);

        cache.reset(1, 0);
        let tile = cache.get(TileKey::new(0, 0), &loader, &image_mutex).unwrap();
        let plane = TILE_SIZE * TILE_SIZE * 2;
        assert_eq!(tile[0], plane as f32);
    }

    #[test]
    fn test_edge_tile_nan_padded() {
        // 1.5 tiles wide: the second tile column is half outside
        let dims = Dimensions::new(TILE_SIZE as u64 + 128, TILE_SIZE as u64);
        let data = vec![1.0; dims.pixel_count() as usize];
        let loader = MemoryLoader::new(data, dims, 1, 1).unwrap();
        let image_mutex = Mutex::new(());
        let cache = TileCache::new(2).unwrap();

        let tile = cache.get(TileKey::new(T, 0), &loader, &image_mutex).unwrap();
        assert_eq!(tile.len(), TILE_SIZE * TILE_SIZE);
        assert_eq!(tile[0], 1.0);
        assert_eq!(tile[127], 1.0);
        assert!(tile[128].is_nan());
        assert!(tile[TILE_SIZE * TILE_SIZE - 1].is_nan());
    }

    #[test]
    fn test_reset_clears_but_shared_tiles_survive() {
        let loader = plane_loader(1, 2, 1);
        let image_mutex = Mutex::new(());
        let cache = TileCache::new(2).unwrap();

        let held = cache.get(TileKey::new(0, 0), &loader, &image_mutex).unwrap();
        cache.reset(0, 0);

        assert!(cache.is_empty());
        assert!(cache.peek(TileKey::new(0, 0)).is_none());
        assert_eq!(held[0], 0.0);
    }

    #[test]
    fn test_get_multiple_covers_all_keys() {
        let loader = plane_loader(1, 6, 1);
        let image_mutex = Mutex::new(());
        let cache = TileCache::new(6).unwrap();

        // Warm two of the four keys
        cache.get(TileKey::new(0, 0), &loader, &image_mutex).unwrap();
        cache.get(TileKey::new(0, 2 * T), &loader, &image_mutex).unwrap();

        let keys = vec![
            TileKey::new(0, 0),
            TileKey::new(0, T),
            TileKey::new(0, 2 * T),
            TileKey::new(0, 3 * T),
        ];
        let mut tiles = HashMap::new();
        cache
            .get_multiple(&keys, &loader, &image_mutex, &mut tiles)
            .unwrap();

        assert_eq!(tiles.len(), 4);
        for key in &keys {
            assert!(tiles.contains_key(key));
        }
        assert_eq!(cache.len(), 4);
    }

    #[test]
    fn test_get_hit_returns_shared_pointer() {
        let loader = plane_loader(1, 1, 1);
        let image_mutex = Mutex::new(());
        let cache = TileCache::new(2).unwrap();

        let first = cache.get(TileKey::new(0, 0), &loader, &image_mutex).unwrap();
        let second = cache.get(TileKey::new(0, 0), &loader, &image_mutex).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn test_concurrent_gets_stay_bounded() {
        use std::thread;

        let loader = Arc::new(plane_loader(1, 8, 1));
        let image_mutex = Arc::new(Mutex::new(()));
        let cache = Arc::new(TileCache::new(3).unwrap());

        let handles: Vec<_> = (0..4)
            .map(|t| {
                let loader = Arc::clone(&loader);
                let image_mutex = Arc::clone(&image_mutex);
                let cache = Arc::clone(&cache);
                thread::spawn(move || {
                    for i in 0..32 {
                        let y = ((t + i) % 8) as i64 * T;
                        cache.get(TileKey::new(0, y), loader.as_ref(), &image_mutex).unwrap();
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }
        assert!(cache.len() <= 3);
    }
}
