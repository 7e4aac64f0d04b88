//! Frozen tile positions.

use crate::coverage::CoverageView;

use super::Aoi;

/// Immutable copy of a [`TileIterator`](super::TileIterator) position.
///
/// Snapshots can be stored, sorted (e.g. by file offset of the tile) and
/// processed later; the tile origin is resolved when the snapshot is taken.
#[derive(Debug, Clone)]
pub struct Snapshot<'a> {
    view: &'a CoverageView,
    tmc_in_subset: Vec<i64>,
    index_in_result_array: usize,
    index_in_tile_vector: i64,
    tile_origin: (i64, i64),
}

impl<'a> Snapshot<'a> {
    pub(crate) fn new(
        view: &'a CoverageView,
        tmc_in_subset: Vec<i64>,
        index_in_result_array: usize,
        index_in_tile_vector: i64,
        tile_origin: (i64, i64),
    ) -> Self {
        Self {
            view,
            tmc_in_subset,
            index_in_result_array,
            index_in_tile_vector,
            tile_origin,
        }
    }
}

impl Aoi for Snapshot<'_> {
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
        self.tile_origin
    }
}
