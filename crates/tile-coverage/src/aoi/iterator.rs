//! Odometer traversal over a range of tiles.

use crate::coverage::CoverageView;
use crate::error::{CoverageError, Result};
use crate::mapper::{ceil_div, checked_add, checked_mul, checked_product, checked_sub, to_usize};
use crate::types::GridExtent;

use super::{Aoi, Snapshot};

/// Mutable position walking the tiles of a render request.
///
/// The iterator starts on the first tile of its range (unless the range is
/// empty) and [`next`](Self::next) advances it, dimension 0 first, carrying
/// into the following dimensions like an odometer.
#[derive(Debug, Clone)]
pub struct TileIterator<'a> {
    view: &'a CoverageView,
    /// Range of tiles to visit, relative to the view's first tile. Half-open.
    tile_lower: Vec<i64>,
    tile_upper: Vec<i64>,
    /// Pixel offset of the rendered result relative to the requested window.
    offset_aoi: Vec<i64>,
    tile_count_in_query: usize,
    tmc_in_subset: Vec<i64>,
    /// Resource-space start of the current tile minus the subsampling offset.
    tile_offset_full: Vec<i64>,
    index_in_result_array: usize,
    index_in_tile_vector: i64,
    exhausted: bool,
}

impl<'a> TileIterator<'a> {
    /// Create an iterator over `[tile_lower, tile_upper)`.
    ///
    /// Every index and offset the traversal can reach is computed once here
    /// with overflow checks, so that stepping never overflows.
    pub fn new(
        view: &'a CoverageView,
        tile_lower: &[i64],
        tile_upper: &[i64],
        offset_aoi: &[i64],
    ) -> Result<Self> {
        let n = view.dimension();
        if tile_lower.len() != n || tile_upper.len() != n || offset_aoi.len() != n {
            return Err(CoverageError::invalid_argument(format!(
                "tile range must have {} dimensions",
                n
            )));
        }

        let mut counts = Vec::with_capacity(n);
        for d in 0..n {
            counts.push(checked_sub(tile_upper[d], tile_lower[d], "tile count")?.max(0));
        }
        let tile_count_in_query = to_usize(
            checked_product(counts.iter().copied(), "tile count in query")?,
            "tile count in query",
        )?;

        let mut tile_offset_full = Vec::with_capacity(n);
        let mut index_in_tile_vector = view.index_of_first_tile();
        for d in 0..n {
            let first = checked_add(view.tmc_of_first_tile()[d], tile_lower[d], "tile coordinate")?;
            let start = checked_mul(first, view.tile_size(d), "tile offset")?;
            tile_offset_full.push(checked_sub(start, view.subsampling_offset(d), "tile offset")?);
            let step = checked_mul(tile_lower[d], view.tile_strides()[d], "tile index")?;
            index_in_tile_vector = checked_add(index_in_tile_vector, step, "tile index")?;
        }

        if tile_count_in_query > 0 {
            // Reachability of the last tile bounds everything in between.
            let mut last_index = index_in_tile_vector;
            for d in 0..n {
                let span = counts[d] - 1;
                let end = checked_mul(span, view.tile_size(d), "tile offset")?;
                checked_add(tile_offset_full[d], end, "tile offset")?;
                let step = checked_mul(span, view.tile_strides()[d], "tile index")?;
                last_index = checked_add(last_index, step, "tile index")?;
            }
        }

        Ok(Self {
            view,
            tile_lower: tile_lower.to_vec(),
            tile_upper: tile_upper.to_vec(),
            offset_aoi: offset_aoi.to_vec(),
            tile_count_in_query,
            tmc_in_subset: tile_lower.to_vec(),
            tile_offset_full,
            index_in_result_array: 0,
            index_in_tile_vector,
            exhausted: tile_count_in_query == 0,
        })
    }

    /// Move to the next tile. Returns `false` once every tile was visited.
    pub fn next(&mut self) -> bool {
        if self.exhausted || self.index_in_result_array + 1 >= self.tile_count_in_query {
            self.exhausted = true;
            return false;
        }
        let view = self.view;
        for d in 0..self.tmc_in_subset.len() {
            let tmc = self.tmc_in_subset[d] + 1;
            if tmc < self.tile_upper[d] {
                self.tmc_in_subset[d] = tmc;
                self.tile_offset_full[d] += view.tile_size(d);
                self.index_in_tile_vector += view.tile_strides()[d];
                self.index_in_result_array += 1;
                return true;
            }
            let span = self.tmc_in_subset[d] - self.tile_lower[d];
            self.tile_offset_full[d] -= span * view.tile_size(d);
            self.index_in_tile_vector -= span * view.tile_strides()[d];
            self.tmc_in_subset[d] = self.tile_lower[d];
        }
        self.exhausted = true;
        false
    }

    /// Number of tiles this iterator visits.
    pub fn tile_count_in_query(&self) -> usize {
        self.tile_count_in_query
    }

    pub fn is_empty(&self) -> bool {
        self.tile_count_in_query == 0
    }

    pub fn tile_lower(&self) -> &[i64] {
        &self.tile_lower
    }

    pub fn tile_upper(&self) -> &[i64] {
        &self.tile_upper
    }

    pub fn offset_aoi(&self) -> &[i64] {
        &self.offset_aoi
    }

    /// Origin of the current tile along one dimension, in rendered
    /// coordinates.
    ///
    /// Rounds up: the first rendered pixel whose resource coordinate falls in
    /// the tile. When the subsampling is larger than the tile, a tile may
    /// contain no such pixel; `region_inside_tile` reports those as empty.
    pub fn tile_origin_at(&self, dim: usize) -> i64 {
        ceil_div(self.tile_offset_full[dim], self.view.subsampling(dim))
    }

    /// New iterator over the intersection of this iterator's original range
    /// with `[lower, upper)`, starting from its first tile.
    pub fn subset(&self, lower: &[i64], upper: &[i64]) -> Result<TileIterator<'a>> {
        let n = self.tile_lower.len();
        if lower.len() != n || upper.len() != n {
            return Err(CoverageError::invalid_argument(format!(
                "tile range must have {} dimensions",
                n
            )));
        }
        let mut sub_lower = Vec::with_capacity(n);
        let mut sub_upper = Vec::with_capacity(n);
        for d in 0..n {
            let low = lower[d].max(self.tile_lower[d]);
            let high = upper[d].min(self.tile_upper[d]).max(low);
            sub_lower.push(low);
            sub_upper.push(high);
        }
        TileIterator::new(self.view, &sub_lower, &sub_upper, &self.offset_aoi)
    }

    /// Resource-space box covered by the current tile, clipped to the
    /// resource.
    pub fn tile_extent_in_resource(&self) -> Result<GridExtent> {
        let tmc = self.tile_coordinates_in_resource()?;
        let size = self.view.resource_size();
        let mut low = Vec::with_capacity(tmc.len());
        let mut high = Vec::with_capacity(tmc.len());
        for d in 0..tmc.len() {
            let tile_size = self.view.tile_size(d);
            let start = checked_mul(tmc[d], tile_size, "tile extent")?;
            let end = checked_add(start, tile_size, "tile extent")?;
            let l = start.clamp(0, size[d]);
            low.push(l);
            high.push(end.clamp(l, size[d]));
        }
        GridExtent::new(low, high)
    }

    /// Immutable copy of the current position.
    pub fn snapshot(&self) -> Snapshot<'a> {
        Snapshot::new(
            self.view,
            self.tmc_in_subset.clone(),
            self.index_in_result_array,
            self.index_in_tile_vector,
            self.tile_origin(),
        )
    }

    /// Snapshots of every remaining position, leaving the iterator
    /// exhausted.
    pub fn collect_snapshots(&mut self) -> Vec<Snapshot<'a>> {
        let mut snapshots = Vec::with_capacity(self.tile_count_in_query);
        if self.is_empty() {
            return snapshots;
        }
        loop {
            snapshots.push(self.snapshot());
            if !self.next() {
                break;
            }
        }
        snapshots
    }
}

impl Aoi for TileIterator<'_> {
    fn view(&self) -> &CoverageView {
        self.view
    }

    fn tmc_in_subset(&self) -> &[i64] {
        &self.tmc_in_subset
    }

    fn index_in_result_array(&self) -> usize {
        self.index_in_result_array
    }

    fn index_in_tile_vector(&self) -> i64 {
        self.index_in_tile_vector
    }

    fn tile_origin(&self) -> (i64, i64) {
        (self.tile_origin_at(0), self.tile_origin_at(1))
    }
}
