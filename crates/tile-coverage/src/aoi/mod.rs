//! Positions over the tiles of a render request.
//!
//! An AOI ("area of interest") identifies one tile of a [`CoverageView`]:
//! its coordinates relative to the view, its slot in the render result and
//! its index in the resource tile directory. [`TileIterator`] walks a tile
//! range in place; [`Snapshot`] freezes one position so decoders can collect
//! positions first and read them later in a different order.

mod iterator;
mod snapshot;

pub use iterator::TileIterator;
pub use snapshot::Snapshot;

use crate::cache::TileKey;
use crate::coverage::CoverageView;
use crate::error::Result;
use crate::mapper::{ceil_div, checked_add, checked_mul, checked_sub, floor_div, floor_mod};
use crate::types::{Rectangle, TileBuffer};

/// Shared contract of tile positions.
///
/// Implementors only say where they are; everything derived from the
/// position is provided here.
pub trait Aoi {
    /// The view this position belongs to.
    fn view(&self) -> &CoverageView;

    /// Tile coordinates relative to the first tile of the view.
    fn tmc_in_subset(&self) -> &[i64];

    /// Slot of this tile in the array returned by a decoder.
    fn index_in_result_array(&self) -> usize;

    /// Row-major index of this tile in the resource tile directory.
    fn index_in_tile_vector(&self) -> i64;

    /// Upper-left corner of this tile in rendered coordinates.
    fn tile_origin(&self) -> (i64, i64);

    /// Tile matrix coordinates of this tile in the resource.
    fn tile_coordinates_in_resource(&self) -> Result<Vec<i64>> {
        let view = self.view();
        view.tmc_of_first_tile()
            .iter()
            .zip(self.tmc_in_subset())
            .map(|(&first, &tmc)| checked_add(first, tmc, "tile coordinates in resource"))
            .collect()
    }

    fn tile_index_in_resource(&self) -> i64 {
        self.index_in_tile_vector()
    }

    /// Cache identity of this tile, or `None` when no selected pixel falls
    /// in it.
    fn cache_key(&self) -> Result<Option<TileKey>> {
        let region = self.region_inside_tile(false)?;
        Ok(region.map(|region| self.view().tile_key(self.index_in_tile_vector(), region)))
    }

    /// The cached tile at this position, if still available in a layout the
    /// view can use.
    fn cached_tile(&self) -> Result<Option<TileBuffer>> {
        let Some(key) = self.cache_key()? else {
            return Ok(None);
        };
        let view = self.view();
        Ok(view.cache().get(&key, view.sample_layout(), self.tile_origin()))
    }

    /// Cache a freshly decoded tile; use the returned buffer afterwards.
    fn cache(&self, tile: TileBuffer) -> Result<TileBuffer> {
        Ok(match self.cache_key()? {
            Some(key) => self.view().cache().put(key, tile),
            None => tile,
        })
    }

    /// A fill-valued buffer with the view's layout at this tile's origin.
    fn create_buffer(&self) -> TileBuffer {
        let view = self.view();
        TileBuffer::filled(self.tile_origin(), view.sample_layout(), view.fill_values())
    }

    /// Part of this tile that holds requested data, in tile-local units.
    ///
    /// With `subsampled`, the rectangle is in buffer pixels; otherwise in
    /// resource pixels relative to the tile corner. Returns `None` when no
    /// selected pixel falls in this tile, which happens on boundary tiles
    /// narrower than the subsampling.
    fn region_inside_tile(&self, subsampled: bool) -> Result<Option<Rectangle>> {
        let view = self.view();
        let tmc = self.tile_coordinates_in_resource()?;
        let read = view.read_extent();
        let mut lower = [0i64; 2];
        let mut upper = [0i64; 2];
        for d in 0..2 {
            let tile_size = view.tile_size(d);
            let s = view.subsampling(d);
            let tile_base = checked_mul(tmc[d], tile_size, "tile base")?;
            let mut offset = checked_sub(read.low(d), tile_base, "offset in tile")?;
            let mut limit = checked_add(offset, read.size(d), "limit in tile")?.min(tile_size);
            if offset < 0 {
                // First pixel of the subsampling grid inside this tile.
                offset = floor_mod(offset, s);
            }
            if offset >= limit {
                return Ok(None);
            }
            if d == 0 && view.force_tile_size() {
                limit = tile_size;
            }
            if subsampled {
                let low = floor_div(offset, s);
                limit = low + ceil_div(limit - offset, s);
                offset = low;
            }
            lower[d] = offset;
            upper[d] = limit;
        }
        Ok(Some(Rectangle::new(
            lower[0],
            lower[1],
            upper[0] - lower[0],
            upper[1] - lower[1],
        )))
    }
}
