//! Rendered results of a coverage view.
//!
//! A surface covers the clipped render request in rendered coordinates and
//! is backed by the tiles of the request, laid out on a grid. Tiles may start
//! before the request. `offset_aoi` counts the pixels between the first pixel
//! read in the first tile and the request; that pixel is the tile origin, or
//! the start of the view's domain when the domain begins inside the tile.

use std::sync::{Arc, OnceLock};

use crate::aoi::TileIterator;
use crate::coverage::{CoverageView, RenderPlan};
use crate::error::{CoverageError, Result};
use crate::mapper::{ceil_div, floor_div};
use crate::types::{ColorModel, Rectangle, TileBuffer};

/// Placement of the tiles of a render request, along x and y.
#[derive(Debug, Clone)]
pub struct SurfaceGeometry {
    pub(crate) bounds: Rectangle,
    /// First tile, relative to the view's first tile.
    pub(crate) tile_lower: [i64; 2],
    pub(crate) tile_count: [i64; 2],
    pub(crate) tmc_of_first_tile: [i64; 2],
    pub(crate) tile_size: [i64; 2],
    pub(crate) subsampling: [i64; 2],
    pub(crate) subsampling_offsets: [i64; 2],
    pub(crate) offset_aoi: [i64; 2],
    pub(crate) fill_values: Vec<f32>,
    pub(crate) color_model: ColorModel,
}

impl SurfaceGeometry {
    fn tile_index(&self, tx: usize, ty: usize) -> Option<usize> {
        let (nx, ny) = self.grid_size();
        (tx < nx && ty < ny).then(|| ty * nx + tx)
    }

    fn grid_size(&self) -> (usize, usize) {
        (
            usize::try_from(self.tile_count[0]).unwrap_or(0),
            usize::try_from(self.tile_count[1]).unwrap_or(0),
        )
    }

    fn tile_origin(&self, tx: usize, ty: usize) -> Option<(i64, i64)> {
        self.tile_index(tx, ty)?;
        let axis = |d: usize, t: usize| {
            let tmc = self.tmc_of_first_tile[d] + self.tile_lower[d] + t as i64;
            ceil_div(tmc * self.tile_size[d] - self.subsampling_offsets[d], self.subsampling[d])
        };
        Some((axis(0, tx), axis(1, ty)))
    }

    fn tile_containing(&self, x: i64, y: i64) -> Option<(usize, usize)> {
        let axis = |d: usize, c: i64| {
            let resource = c * self.subsampling[d] + self.subsampling_offsets[d];
            let t = floor_div(resource, self.tile_size[d])
                - self.tmc_of_first_tile[d]
                - self.tile_lower[d];
            usize::try_from(t).ok()
        };
        let (tx, ty) = (axis(0, x)?, axis(1, y)?);
        self.tile_index(tx, ty).map(|_| (tx, ty))
    }
}

/// Tiles decoded during `render`.
#[derive(Debug, Clone)]
pub struct EagerSurface {
    geometry: SurfaceGeometry,
    /// Row-major, x fastest.
    tiles: Vec<Option<TileBuffer>>,
}

impl EagerSurface {
    pub(crate) fn new(geometry: SurfaceGeometry, tiles: Vec<Option<TileBuffer>>) -> Self {
        Self { geometry, tiles }
    }

    pub fn tile(&self, tx: usize, ty: usize) -> Option<&TileBuffer> {
        let index = self.geometry.tile_index(tx, ty)?;
        self.tiles.get(index)?.as_ref()
    }

    /// All tiles in result order; `None` for tiles without data.
    pub fn tiles(&self) -> &[Option<TileBuffer>] {
        &self.tiles
    }
}

/// Tiles decoded on first access.
///
/// Each tile is read through a one-tile subset of the render request and
/// kept once read. Concurrent first accesses may decode a tile twice; the
/// tile cache makes both end up with the same samples.
#[derive(Debug)]
pub struct DeferredSurface {
    view: Arc<CoverageView>,
    geometry: SurfaceGeometry,
    plan: RenderPlan,
    tiles: Vec<OnceLock<Option<TileBuffer>>>,
}

impl DeferredSurface {
    pub(crate) fn new(
        view: Arc<CoverageView>,
        geometry: SurfaceGeometry,
        plan: RenderPlan,
    ) -> Self {
        let (nx, ny) = geometry.grid_size();
        let tiles = (0..nx * ny).map(|_| OnceLock::new()).collect();
        Self {
            view,
            geometry,
            plan,
            tiles,
        }
    }

    /// The tile at `(tx, ty)`, decoding it if this is the first access.
    pub fn tile(&self, tx: usize, ty: usize) -> Result<Option<TileBuffer>> {
        let index = self.geometry.tile_index(tx, ty).ok_or_else(|| {
            CoverageError::invalid_argument(format!("no tile ({}, {}) in this surface", tx, ty))
        })?;
        if let Some(tile) = self.tiles[index].get() {
            return Ok(tile.clone());
        }
        let decoded = self
            .decode(tx, ty)
            .map_err(|e| CoverageError::render_failure(self.view.identifier(), e))?;
        Ok(self.tiles[index].get_or_init(|| decoded).clone())
    }

    /// Number of tiles read so far.
    pub fn resolved_count(&self) -> usize {
        self.tiles.iter().filter(|t| t.get().is_some()).count()
    }

    fn decode(&self, tx: usize, ty: usize) -> anyhow::Result<Option<TileBuffer>> {
        let whole = TileIterator::new(
            &self.view,
            &self.plan.tile_lower,
            &self.plan.tile_upper,
            &self.plan.offset_aoi,
        )?;
        let mut lower = self.plan.tile_lower.clone();
        lower[0] += tx as i64;
        lower[1] += ty as i64;
        let mut upper = self.plan.tile_upper.clone();
        upper[0] = lower[0] + 1;
        upper[1] = lower[1] + 1;

        let mut single = whole.subset(&lower, &upper)?;
        let mut tiles = self.view.decoder().read_tiles(&mut single)?;
        if tiles.len() != 1 {
            anyhow::bail!("decoder returned {} tiles for a request of 1", tiles.len());
        }
        Ok(tiles.pop().flatten())
    }
}

/// Result of [`CoverageView::render`].
#[derive(Debug)]
pub enum Surface {
    Eager(EagerSurface),
    Deferred(DeferredSurface),
}

impl Surface {
    fn geometry(&self) -> &SurfaceGeometry {
        match self {
            Self::Eager(surface) => &surface.geometry,
            Self::Deferred(surface) => &surface.geometry,
        }
    }

    /// Area covered, in rendered coordinates.
    pub fn bounds(&self) -> Rectangle {
        self.geometry().bounds
    }

    pub fn min_x(&self) -> i64 {
        self.geometry().bounds.x
    }

    pub fn min_y(&self) -> i64 {
        self.geometry().bounds.y
    }

    pub fn width(&self) -> i64 {
        self.geometry().bounds.width
    }

    pub fn height(&self) -> i64 {
        self.geometry().bounds.height
    }

    /// Number of tiles along x and y.
    pub fn tile_grid_size(&self) -> (usize, usize) {
        self.geometry().grid_size()
    }

    /// How far, in rendered pixels, the request starts after the first pixel
    /// read in the first tile. Use [`tile_origin`](Self::tile_origin) for
    /// where that tile begins.
    pub fn offset_aoi(&self) -> (i64, i64) {
        let offset = self.geometry().offset_aoi;
        (offset[0], offset[1])
    }

    /// Rendered coordinates of the upper-left corner of a tile.
    pub fn tile_origin(&self, tx: usize, ty: usize) -> Option<(i64, i64)> {
        self.geometry().tile_origin(tx, ty)
    }

    pub fn fill_values(&self) -> &[f32] {
        &self.geometry().fill_values
    }

    pub fn color_model(&self) -> &ColorModel {
        &self.geometry().color_model
    }

    pub fn is_deferred(&self) -> bool {
        matches!(self, Self::Deferred(_))
    }

    /// The tile at `(tx, ty)`; `None` for a tile without data.
    pub fn tile(&self, tx: usize, ty: usize) -> Result<Option<TileBuffer>> {
        match self {
            Self::Eager(surface) => {
                surface.geometry.tile_index(tx, ty).ok_or_else(|| {
                    CoverageError::invalid_argument(format!(
                        "no tile ({}, {}) in this surface",
                        tx, ty
                    ))
                })?;
                Ok(surface.tile(tx, ty).cloned())
            }
            Self::Deferred(surface) => surface.tile(tx, ty),
        }
    }

    /// Sample at rendered `(x, y)`, or `None` outside the surface or for an
    /// unknown band. Tiles without data yield the band's fill value.
    pub fn sample(&self, x: i64, y: i64, band: usize) -> Result<Option<f32>> {
        let geometry = self.geometry();
        if !geometry.bounds.contains(x, y) {
            return Ok(None);
        }
        let Some((tx, ty)) = geometry.tile_containing(x, y) else {
            return Ok(None);
        };
        match self.tile(tx, ty)? {
            None => Ok(geometry.fill_values.get(band).copied()),
            Some(tile) => {
                let (ox, oy) = tile.origin();
                let local = usize::try_from(x - ox).ok().zip(usize::try_from(y - oy).ok());
                Ok(local.and_then(|(lx, ly)| tile.sample(lx, ly, band)))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// 3 x 2 tiles of 32 pixels at subsampling 3, reading from resource x = 10.
    fn geometry() -> SurfaceGeometry {
        SurfaceGeometry {
            bounds: Rectangle::new(3, 0, 29, 20),
            tile_lower: [0, 0],
            tile_count: [3, 2],
            tmc_of_first_tile: [0, 0],
            tile_size: [32, 32],
            subsampling: [3, 1],
            subsampling_offsets: [1, 0],
            offset_aoi: [0, 0],
            fill_values: vec![0.5],
            color_model: ColorModel::default(),
        }
    }

    #[test]
    fn test_tile_origin() {
        let g = geometry();
        assert_eq!(g.tile_origin(0, 0), Some((0, 0)));
        // Resource 32 - 1 = 31, rounded up to pixel 11 (resource 34).
        assert_eq!(g.tile_origin(1, 1), Some((11, 32)));
        assert_eq!(g.tile_origin(2, 0), Some((21, 0)));
        assert_eq!(g.tile_origin(3, 0), None);
    }

    #[test]
    fn test_tile_containing() {
        let g = geometry();
        assert_eq!(g.tile_containing(10, 0), Some((0, 0)));
        assert_eq!(g.tile_containing(11, 31), Some((1, 0)));
        assert_eq!(g.tile_containing(21, 32), Some((2, 1)));
        assert_eq!(g.tile_containing(32, 0), None);
        assert_eq!(g.tile_containing(0, 64), None);
    }

    #[test]
    fn test_eager_surface_fill_and_bounds() {
        let layout = crate::types::SampleLayout::new(11, 32, vec![0]);
        let mut tiles = vec![None; 6];
        tiles[1] = Some(TileBuffer::filled((11, 0), &layout, &[7.0]));
        let surface = Surface::Eager(EagerSurface::new(geometry(), tiles));

        assert_eq!(surface.sample(5, 5, 0).unwrap(), Some(0.5));
        assert_eq!(surface.sample(12, 5, 0).unwrap(), Some(7.0));
        assert_eq!(surface.sample(2, 5, 0).unwrap(), None);
        assert_eq!(surface.sample(12, 5, 1).unwrap(), None);
        assert!(surface.tile(0, 2).is_err());
        assert_eq!((surface.width(), surface.height()), (29, 20));
    }
}
