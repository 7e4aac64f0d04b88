//! Core types for tiled coverage reads.

use std::fmt;
use std::sync::{Arc, Weak};

use serde::{Deserialize, Serialize};

use crate::error::{CoverageError, Result};

/// An n-dimensional half-open integer box `[low, high)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct GridExtent {
    low: Vec<i64>,
    high: Vec<i64>,
}

impl GridExtent {
    /// Create a new extent. Fails with InvalidArgument if the bounds have
    /// different lengths, are empty, or if `low[d] > high[d]`.
    pub fn new(low: Vec<i64>, high: Vec<i64>) -> Result<Self> {
        if low.len() != high.len() || low.is_empty() {
            return Err(CoverageError::invalid_argument(format!(
                "extent bounds must have the same non-zero dimension, got {} and {}",
                low.len(),
                high.len()
            )));
        }
        for d in 0..low.len() {
            if low[d] > high[d] {
                return Err(CoverageError::invalid_argument(format!(
                    "low ({}) > high ({}) in dimension {}",
                    low[d], high[d], d
                )));
            }
            if high[d].checked_sub(low[d]).is_none() {
                return Err(CoverageError::Overflow("extent size"));
            }
        }
        Ok(Self { low, high })
    }

    /// Extent `[0, size)` in every dimension.
    pub fn from_size(size: &[i64]) -> Result<Self> {
        Self::new(vec![0; size.len()], size.to_vec())
    }

    pub fn dimension(&self) -> usize {
        self.low.len()
    }

    pub fn low(&self, dim: usize) -> i64 {
        self.low[dim]
    }

    pub fn high(&self, dim: usize) -> i64 {
        self.high[dim]
    }

    pub fn lows(&self) -> &[i64] {
        &self.low
    }

    pub fn highs(&self) -> &[i64] {
        &self.high
    }

    /// Number of cells along a dimension.
    pub fn size(&self, dim: usize) -> i64 {
        self.high[dim] - self.low[dim]
    }

    /// Whether any dimension has zero size.
    pub fn is_empty(&self) -> bool {
        (0..self.dimension()).any(|d| self.size(d) == 0)
    }

    /// Intersection with another extent of the same dimension, or `None` when
    /// they do not overlap.
    pub fn intersection(&self, other: &GridExtent) -> Option<GridExtent> {
        if self.dimension() != other.dimension() {
            return None;
        }
        let mut low = Vec::with_capacity(self.dimension());
        let mut high = Vec::with_capacity(self.dimension());
        for d in 0..self.dimension() {
            let l = self.low[d].max(other.low[d]);
            let h = self.high[d].min(other.high[d]);
            if l >= h {
                return None;
            }
            low.push(l);
            high.push(h);
        }
        Some(GridExtent { low, high })
    }
}

impl fmt::Display for GridExtent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?} .. {:?}", self.low, self.high)
    }
}

/// A 2-D rectangle in pixel units.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Rectangle {
    pub x: i64,
    pub y: i64,
    pub width: i64,
    pub height: i64,
}

impl Rectangle {
    pub fn new(x: i64, y: i64, width: i64, height: i64) -> Self {
        Self { x, y, width, height }
    }

    pub fn max_x(&self) -> i64 {
        self.x + self.width
    }

    pub fn max_y(&self) -> i64 {
        self.y + self.height
    }

    pub fn contains(&self, x: i64, y: i64) -> bool {
        x >= self.x && x < self.max_x() && y >= self.y && y < self.max_y()
    }
}

/// Color interpretation of the samples, consumed from the resource.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub enum ColorModel {
    #[default]
    Grayscale,
    Rgb,
    Rgba,
    /// Palette lookup, one RGBA entry per integer sample value.
    Indexed(Vec<[u8; 4]>),
}

/// Size and band order of a tile buffer.
///
/// Bands are listed as resource band numbers in the order the buffer exposes
/// them.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SampleLayout {
    pub width: usize,
    pub height: usize,
    pub bands: Vec<u32>,
}

impl SampleLayout {
    pub fn new(width: usize, height: usize, bands: Vec<u32>) -> Self {
        Self { width, height, bands }
    }

    pub fn same_size(&self, other: &SampleLayout) -> bool {
        self.width == other.width && self.height == other.height
    }
}

/// Band-planar sample storage shared between buffers.
#[derive(Debug, Clone)]
struct TileStorage {
    width: usize,
    height: usize,
    /// Resource band number of each plane.
    bands: Vec<u32>,
    /// Plane-major samples: plane `p` occupies `p * width * height ..`.
    data: Vec<f32>,
}

/// A decoded (or being decoded) tile positioned in rendered coordinates.
///
/// Cloning is cheap: samples are shared, and copied on first write only when
/// another buffer still references them.
#[derive(Debug, Clone)]
pub struct TileBuffer {
    origin: (i64, i64),
    /// Storage plane for each band of this buffer.
    band_map: Vec<usize>,
    storage: Arc<TileStorage>,
}

impl TileBuffer {
    /// Create a buffer with every band initialized to its fill value.
    /// Missing fill values default to NaN.
    pub fn filled(origin: (i64, i64), layout: &SampleLayout, fill_values: &[f32]) -> Self {
        let plane = layout.width * layout.height;
        let mut data = Vec::with_capacity(plane * layout.bands.len());
        for i in 0..layout.bands.len() {
            let fill = fill_values.get(i).copied().unwrap_or(f32::NAN);
            data.extend(std::iter::repeat(fill).take(plane));
        }
        Self {
            origin,
            band_map: (0..layout.bands.len()).collect(),
            storage: Arc::new(TileStorage {
                width: layout.width,
                height: layout.height,
                bands: layout.bands.clone(),
                data,
            }),
        }
    }

    /// Create a buffer from plane-major samples.
    pub fn from_planes(origin: (i64, i64), layout: &SampleLayout, data: Vec<f32>) -> Result<Self> {
        let expected = layout.width * layout.height * layout.bands.len();
        if data.len() != expected {
            return Err(CoverageError::invalid_argument(format!(
                "expected {} samples for a {}x{}x{} tile, got {}",
                expected,
                layout.width,
                layout.height,
                layout.bands.len(),
                data.len()
            )));
        }
        Ok(Self {
            origin,
            band_map: (0..layout.bands.len()).collect(),
            storage: Arc::new(TileStorage {
                width: layout.width,
                height: layout.height,
                bands: layout.bands.clone(),
                data,
            }),
        })
    }

    /// Upper-left corner in rendered coordinates.
    pub fn origin(&self) -> (i64, i64) {
        self.origin
    }

    pub fn width(&self) -> usize {
        self.storage.width
    }

    pub fn height(&self) -> usize {
        self.storage.height
    }

    pub fn band_count(&self) -> usize {
        self.band_map.len()
    }

    pub fn layout(&self) -> SampleLayout {
        SampleLayout {
            width: self.storage.width,
            height: self.storage.height,
            bands: self.band_map.iter().map(|&p| self.storage.bands[p]).collect(),
        }
    }

    /// Same samples at another origin. No copy.
    pub fn translated(&self, origin: (i64, i64)) -> Self {
        Self {
            origin,
            band_map: self.band_map.clone(),
            storage: Arc::clone(&self.storage),
        }
    }

    /// View exposing the given resource bands, in that order, over the same
    /// samples. Returns `None` if a band is not stored in this buffer.
    pub fn reindexed(&self, bands: &[u32]) -> Option<Self> {
        let band_map = bands
            .iter()
            .map(|b| self.storage.bands.iter().position(|s| s == b))
            .collect::<Option<Vec<_>>>()?;
        Some(Self {
            origin: self.origin,
            band_map,
            storage: Arc::clone(&self.storage),
        })
    }

    /// Whether both buffers read the same sample storage.
    pub fn shares_storage_with(&self, other: &TileBuffer) -> bool {
        Arc::ptr_eq(&self.storage, &other.storage)
    }

    /// Sample at buffer-local `(x, y)`, or `None` outside the buffer.
    pub fn sample(&self, x: usize, y: usize, band: usize) -> Option<f32> {
        let plane = *self.band_map.get(band)?;
        if x >= self.storage.width || y >= self.storage.height {
            return None;
        }
        let size = self.storage.width * self.storage.height;
        self.storage
            .data
            .get(plane * size + y * self.storage.width + x)
            .copied()
    }

    /// Write a sample at buffer-local `(x, y)`. Returns false outside the buffer.
    pub fn set(&mut self, x: usize, y: usize, band: usize, value: f32) -> bool {
        let Some(&plane) = self.band_map.get(band) else {
            return false;
        };
        if x >= self.storage.width || y >= self.storage.height {
            return false;
        }
        let storage = Arc::make_mut(&mut self.storage);
        let size = storage.width * storage.height;
        storage.data[plane * size + y * storage.width + x] = value;
        true
    }

    /// Samples of one band in row-major order.
    pub fn band_plane(&self, band: usize) -> Option<&[f32]> {
        let plane = *self.band_map.get(band)?;
        let size = self.storage.width * self.storage.height;
        self.storage.data.get(plane * size..(plane + 1) * size)
    }

    /// Bytes held by the underlying storage.
    pub fn size_in_bytes(&self) -> usize {
        self.storage.data.len() * std::mem::size_of::<f32>()
    }

    pub(crate) fn downgrade(&self) -> WeakTileBuffer {
        WeakTileBuffer {
            band_map: self.band_map.clone(),
            storage: Arc::downgrade(&self.storage),
        }
    }
}

/// A tile buffer that does not keep its samples alive.
#[derive(Debug, Clone)]
pub(crate) struct WeakTileBuffer {
    band_map: Vec<usize>,
    storage: Weak<TileStorage>,
}

impl WeakTileBuffer {
    /// The buffer at the given origin, if its samples are still alive.
    pub(crate) fn upgrade(&self, origin: (i64, i64)) -> Option<TileBuffer> {
        Some(TileBuffer {
            origin,
            band_map: self.band_map.clone(),
            storage: self.storage.upgrade()?,
        })
    }

    pub(crate) fn is_alive(&self) -> bool {
        self.storage.strong_count() > 0
    }
}

/// Statistics about the tile cache.
#[derive(Debug, Clone, Default)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    /// Puts that kept an already cached buffer instead of the new one.
    pub replacements: u64,
    pub entries: usize,
    pub retained_bytes: u64,
}

impl CacheStats {
    /// Calculate the cache hit rate (0.0 - 1.0).
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extent_rejects_inverted_bounds() {
        let err = GridExtent::new(vec![5, 0], vec![4, 10]).unwrap_err();
        assert!(matches!(err, CoverageError::InvalidArgument(_)));
        assert!(GridExtent::new(vec![0], vec![1, 2]).is_err());
        assert!(GridExtent::new(vec![i64::MIN], vec![i64::MAX]).is_err());
    }

    #[test]
    fn test_extent_intersection() {
        let a = GridExtent::new(vec![0, 0], vec![10, 10]).unwrap();
        let b = GridExtent::new(vec![5, -3], vec![20, 4]).unwrap();
        let c = GridExtent::new(vec![10, 0], vec![12, 10]).unwrap();

        let i = a.intersection(&b).unwrap();
        assert_eq!(i.lows(), &[5, 0]);
        assert_eq!(i.highs(), &[10, 4]);
        assert!(a.intersection(&c).is_none());
    }

    #[test]
    fn test_buffer_translate_and_reindex_share_storage() {
        let layout = SampleLayout::new(2, 2, vec![0, 3]);
        let data = vec![1.0, 2.0, 3.0, 4.0, 10.0, 20.0, 30.0, 40.0];
        let buffer = TileBuffer::from_planes((0, 0), &layout, data).unwrap();

        let moved = buffer.translated((8, 4));
        assert_eq!(moved.origin(), (8, 4));
        assert!(moved.shares_storage_with(&buffer));

        let swapped = buffer.reindexed(&[3, 0]).unwrap();
        assert!(swapped.shares_storage_with(&buffer));
        assert_eq!(swapped.layout().bands, vec![3, 0]);
        assert_eq!(swapped.sample(1, 1, 0), Some(40.0));
        assert_eq!(swapped.sample(1, 1, 1), Some(4.0));
        assert!(buffer.reindexed(&[1]).is_none());
    }

    #[test]
    fn test_write_on_shared_buffer_copies() {
        let layout = SampleLayout::new(2, 1, vec![0]);
        let mut a = TileBuffer::filled((0, 0), &layout, &[-1.0]);
        let b = a.clone();

        assert!(a.set(1, 0, 0, 5.0));
        assert_eq!(a.sample(1, 0, 0), Some(5.0));
        assert_eq!(b.sample(1, 0, 0), Some(-1.0));
        assert!(!a.shares_storage_with(&b));
        assert!(!a.set(2, 0, 0, 1.0));
    }

    #[test]
    fn test_cache_stats_hit_rate() {
        let mut stats = CacheStats::default();
        assert!((stats.hit_rate() - 0.0).abs() < f64::EPSILON);

        stats.hits = 80;
        stats.misses = 20;
        assert!((stats.hit_rate() - 0.8).abs() < f64::EPSILON);
    }
}
