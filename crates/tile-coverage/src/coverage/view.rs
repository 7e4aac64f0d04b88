//! Coverage view implementation.

use std::fmt;
use std::sync::Arc;

use crate::aoi::TileIterator;
use crate::cache::{TileCache, TileKey};
use crate::config::CoverageConfig;
use crate::error::{CoverageError, Result};
use crate::mapper::{
    ceil_div, checked_add, checked_mul, checked_sub, floor_div, floor_mod, to_usize,
    CoordinateMapper,
};
use crate::surface::{DeferredSurface, EagerSurface, Surface, SurfaceGeometry};
use crate::types::{ColorModel, GridExtent, Rectangle, SampleLayout};

use super::TileDecoder;

/// Resource-level geometry and sample description, shared by all views of
/// one tiled resource.
#[derive(Debug, Clone)]
pub struct TiledResource {
    /// Name used in error messages and logs.
    pub identifier: String,
    /// Resource size in pixels; the resource domain is `[0, size)`.
    pub size: Vec<i64>,
    /// Tile size used for reading, possibly several physical tiles.
    pub virtual_tile_size: Vec<i64>,
    pub band_count: u32,
    /// Fill value of each resource band.
    pub fill_values: Vec<f32>,
    pub color_model: ColorModel,
    /// Tile cache shared by every view of this resource.
    pub cache: Arc<TileCache>,
}

impl TiledResource {
    /// Describe a resource with NaN fill values, grayscale colors and a
    /// private default-sized cache.
    pub fn new(
        identifier: impl Into<String>,
        size: Vec<i64>,
        virtual_tile_size: Vec<i64>,
        band_count: u32,
    ) -> Self {
        Self {
            identifier: identifier.into(),
            size,
            virtual_tile_size,
            band_count,
            fill_values: vec![f32::NAN; band_count as usize],
            color_model: ColorModel::default(),
            cache: Arc::new(TileCache::default()),
        }
    }

    pub fn with_fill_values(mut self, fill_values: Vec<f32>) -> Self {
        self.fill_values = fill_values;
        self
    }

    pub fn with_color_model(mut self, color_model: ColorModel) -> Self {
        self.color_model = color_model;
        self
    }

    pub fn with_cache(mut self, cache: Arc<TileCache>) -> Self {
        self.cache = cache;
        self
    }
}

/// What a view reads from its resource.
#[derive(Debug, Clone, Default)]
pub struct ViewParameters {
    /// Resource-space domain to read; the whole resource if `None`.
    pub domain: Option<GridExtent>,
    /// Subsampling per dimension; no subsampling if `None`.
    pub subsampling: Option<Vec<i64>>,
    /// Bands in the order they should appear; all bands if `None`.
    pub bands: Option<Vec<u32>>,
}

impl ViewParameters {
    pub fn with_domain(mut self, domain: GridExtent) -> Self {
        self.domain = Some(domain);
        self
    }

    pub fn with_subsampling(mut self, subsampling: Vec<i64>) -> Self {
        self.subsampling = Some(subsampling);
        self
    }

    pub fn with_bands(mut self, bands: Vec<u32>) -> Self {
        self.bands = Some(bands);
        self
    }
}

/// Tile range computed for one render request.
#[derive(Debug, Clone)]
pub(crate) struct RenderPlan {
    pub tile_lower: Vec<i64>,
    pub tile_upper: Vec<i64>,
    pub offset_aoi: Vec<i64>,
}

/// One subsampled, band-selected projection of a tiled resource.
///
/// All geometry is derived once, at construction. Each call to
/// [`render`](Self::render) then computes the tiles covering the request and
/// reads them eagerly or on demand.
#[derive(Clone)]
pub struct CoverageView {
    identifier: String,
    resource_size: Vec<i64>,
    /// Resource-space box read by this view.
    read_extent: GridExtent,
    /// `read_extent` in rendered coordinates.
    available: GridExtent,
    mapper: CoordinateMapper,
    tile_strides: Vec<i64>,
    index_of_first_tile: i64,
    tmc_of_first_tile: Vec<i64>,
    included_bands: Option<Vec<u32>>,
    layout: SampleLayout,
    force_tile_size: bool,
    fill_values: Vec<f32>,
    color_model: ColorModel,
    deferred: bool,
    cache: Arc<TileCache>,
    decoder: Arc<dyn TileDecoder>,
}

impl CoverageView {
    /// Create a view of `resource`.
    ///
    /// Fails with InvalidArgument on inconsistent dimensions, subsampling
    /// below 1 or bad band selections, and with Disjoint when the requested
    /// domain does not intersect the resource.
    pub fn new(
        resource: &TiledResource,
        parameters: ViewParameters,
        decoder: Arc<dyn TileDecoder>,
        config: &CoverageConfig,
    ) -> Result<Self> {
        let n = resource.size.len();
        if n < 2 {
            return Err(CoverageError::invalid_argument(format!(
                "coverage \"{}\" needs at least 2 dimensions, got {}",
                resource.identifier, n
            )));
        }
        if resource.virtual_tile_size.len() != n {
            return Err(CoverageError::invalid_argument(format!(
                "tile size has {} dimensions but the resource has {}",
                resource.virtual_tile_size.len(),
                n
            )));
        }

        let resource_extent = GridExtent::from_size(&resource.size)?;
        let read_extent = match &parameters.domain {
            Some(domain) => {
                if domain.dimension() != n {
                    return Err(CoverageError::invalid_argument(format!(
                        "domain has {} dimensions but the resource has {}",
                        domain.dimension(),
                        n
                    )));
                }
                domain.intersection(&resource_extent).ok_or_else(|| {
                    CoverageError::disjoint(domain.to_string(), resource_extent.to_string())
                })?
            }
            None if resource_extent.is_empty() => {
                return Err(CoverageError::disjoint(
                    resource_extent.to_string(),
                    resource_extent.to_string(),
                ));
            }
            None => resource_extent,
        };

        let subsampling = parameters.subsampling.unwrap_or_else(|| vec![1; n]);
        if subsampling.len() != n || subsampling.iter().any(|&s| s < 1) {
            return Err(CoverageError::invalid_argument(format!(
                "subsampling {:?} must have {} values >= 1",
                subsampling, n
            )));
        }
        let offsets = (0..n)
            .map(|d| floor_mod(read_extent.low(d), subsampling[d]))
            .collect();
        let tile_size = resource.virtual_tile_size.clone();
        let mapper = CoordinateMapper::new(subsampling, offsets, tile_size)?;

        let mut low = Vec::with_capacity(n);
        let mut high = Vec::with_capacity(n);
        for d in 0..n {
            low.push(mapper.resource_to_pixel(read_extent.low(d), d)?);
            let last = mapper.resource_to_pixel(read_extent.high(d) - 1, d)?;
            high.push(checked_add(last, 1, "available extent")?);
        }
        let available = GridExtent::new(low, high)?;

        let mut tile_strides = Vec::with_capacity(n);
        let mut stride = 1i64;
        for d in 0..n {
            tile_strides.push(stride);
            let count = ceil_div(resource.size[d], mapper.tile_size()[d]).max(1);
            stride = checked_mul(stride, count, "tile strides")?;
        }
        let tmc_of_first_tile: Vec<i64> = (0..n)
            .map(|d| floor_div(read_extent.low(d), mapper.tile_size()[d]))
            .collect();
        let mut index_of_first_tile = 0i64;
        for d in 0..n {
            let step = checked_mul(tmc_of_first_tile[d], tile_strides[d], "index of first tile")?;
            index_of_first_tile = checked_add(index_of_first_tile, step, "index of first tile")?;
        }

        let (included_bands, band_order) =
            select_bands(resource.band_count, parameters.bands.as_deref())?;
        let fill_values = band_order
            .iter()
            .map(|&b| resource.fill_values.get(b as usize).copied().unwrap_or(f32::NAN))
            .collect();

        let (tx, sx) = (mapper.tile_size()[0], mapper.subsampling()[0]);
        let (ty, sy) = (mapper.tile_size()[1], mapper.subsampling()[1]);
        let layout = SampleLayout::new(
            to_usize(ceil_div(tx, sx), "tile width")?,
            to_usize(ceil_div(ty, sy), "tile height")?,
            band_order,
        );
        let force_tile_size = (tx / sx) * sx == tx;

        tracing::debug!(
            coverage = %resource.identifier,
            read_extent = %read_extent,
            available = %available,
            subsampling = ?mapper.subsampling(),
            force_tile_size,
            "created coverage view"
        );

        Ok(Self {
            identifier: resource.identifier.clone(),
            resource_size: resource.size.clone(),
            read_extent,
            available,
            mapper,
            tile_strides,
            index_of_first_tile,
            tmc_of_first_tile,
            included_bands,
            layout,
            force_tile_size,
            fill_values,
            color_model: resource.color_model.clone(),
            deferred: config.deferred_tile_reading,
            cache: Arc::clone(&resource.cache),
            decoder,
        })
    }

    /// Read the tiles covering `slice_extent` (rendered coordinates, the
    /// whole view if `None`) and expose them as a surface.
    ///
    /// Only slices whose extent is larger than one cell in dimensions 0 and 1
    /// alone can be rendered. Returns InvalidArgument on a dimension
    /// mismatch, Unsupported for other slices, Disjoint when the slice misses
    /// the view, and RenderFailure when tile arithmetic overflows or the
    /// decoder fails.
    pub fn render(&self, slice_extent: Option<&GridExtent>) -> Result<Surface> {
        let requested = slice_extent.unwrap_or(&self.available);
        let n = self.dimension();
        if requested.dimension() != n {
            return Err(CoverageError::invalid_argument(format!(
                "slice extent has {} dimensions but coverage \"{}\" has {}",
                requested.dimension(),
                self.identifier,
                n
            )));
        }
        if let Some(d) = (2..n).find(|&d| requested.size(d) > 1) {
            return Err(CoverageError::unsupported(format!(
                "only 2-D slices can be rendered, but dimension {} spans {} cells",
                d,
                requested.size(d)
            )));
        }
        let clipped = requested.intersection(&self.available).ok_or_else(|| {
            CoverageError::disjoint(requested.to_string(), self.available.to_string())
        })?;

        let failure = |e: CoverageError| CoverageError::render_failure(self.identifier.clone(), e);
        let plan = self.plan(&clipped).map_err(failure)?;
        let mut iterator =
            TileIterator::new(self, &plan.tile_lower, &plan.tile_upper, &plan.offset_aoi)
                .map_err(failure)?;
        let geometry = self.surface_geometry(&clipped, &plan);

        tracing::debug!(
            coverage = %self.identifier,
            extent = %clipped,
            tile_lower = ?plan.tile_lower,
            tile_upper = ?plan.tile_upper,
            tiles = iterator.tile_count_in_query(),
            deferred = self.deferred,
            "rendering coverage"
        );

        if self.deferred {
            return Ok(Surface::Deferred(DeferredSurface::new(
                Arc::new(self.clone()),
                geometry,
                plan,
            )));
        }

        let expected = iterator.tile_count_in_query();
        let tiles = self
            .decoder
            .read_tiles(&mut iterator)
            .map_err(|e| CoverageError::render_failure(self.identifier.clone(), e))?;
        if tiles.len() != expected {
            tracing::warn!(
                coverage = %self.identifier,
                expected,
                returned = tiles.len(),
                "tile decoder returned a malformed result"
            );
            return Err(CoverageError::render_failure(
                self.identifier.clone(),
                anyhow::anyhow!(
                    "decoder returned {} tiles for a request of {}",
                    tiles.len(),
                    expected
                ),
            ));
        }
        Ok(Surface::Eager(EagerSurface::new(geometry, tiles)))
    }

    /// Tile range covering `clipped` and the offset of the request inside
    /// the tile-aligned result.
    fn plan(&self, clipped: &GridExtent) -> Result<RenderPlan> {
        let n = self.dimension();
        let mut tile_lower = Vec::with_capacity(n);
        let mut tile_upper = Vec::with_capacity(n);
        let mut offset_aoi = Vec::with_capacity(n);
        for d in 0..n {
            let min = clipped.low(d);
            let max = clipped.high(d) - 1;
            let tmc_low = self.mapper.tile_matrix_coordinate(min, d)?;
            let tmc_high = self.mapper.tile_matrix_coordinate(max, d)?;
            let first = self.tmc_of_first_tile[d];
            tile_lower.push(checked_sub(tmc_low, first, "tile lower bound")?);
            let upper = checked_sub(tmc_high, first, "tile upper bound")?;
            tile_upper.push(checked_add(upper, 1, "tile upper bound")?);

            // Start of the first tile, in pixels, without going before the data.
            let tile_start = checked_mul(tmc_low, self.tile_size(d), "tile start")?
                .max(self.read_extent.low(d));
            let shifted = checked_sub(tile_start, self.subsampling_offset(d), "tile start")?;
            let aligned = ceil_div(shifted, self.subsampling(d));
            offset_aoi.push(checked_sub(min, aligned, "offset of request")?);
        }
        Ok(RenderPlan {
            tile_lower,
            tile_upper,
            offset_aoi,
        })
    }

    fn surface_geometry(&self, clipped: &GridExtent, plan: &RenderPlan) -> SurfaceGeometry {
        fn pair(v: &[i64]) -> [i64; 2] {
            [v[0], v[1]]
        }
        SurfaceGeometry {
            bounds: Rectangle::new(
                clipped.low(0),
                clipped.low(1),
                clipped.size(0),
                clipped.size(1),
            ),
            tile_lower: pair(&plan.tile_lower),
            tile_count: [
                plan.tile_upper[0] - plan.tile_lower[0],
                plan.tile_upper[1] - plan.tile_lower[1],
            ],
            tmc_of_first_tile: pair(&self.tmc_of_first_tile),
            tile_size: pair(self.mapper.tile_size()),
            subsampling: pair(self.mapper.subsampling()),
            subsampling_offsets: pair(self.mapper.subsampling_offsets()),
            offset_aoi: pair(&plan.offset_aoi),
            fill_values: self.fill_values.clone(),
            color_model: self.color_model.clone(),
        }
    }

    /// Cache identity of the tile at `tile_index` as read by this view, with
    /// `region` the part of it holding data (see `Aoi::region_inside_tile`).
    pub fn tile_key(&self, tile_index: i64, region: Rectangle) -> TileKey {
        TileKey {
            tile_index,
            included_bands: self.included_bands.clone(),
            subsampling: self.mapper.subsampling().to_vec(),
            subsampling_offsets: self.mapper.subsampling_offsets().to_vec(),
            region,
        }
    }

    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    pub fn dimension(&self) -> usize {
        self.resource_size.len()
    }

    pub fn resource_size(&self) -> &[i64] {
        &self.resource_size
    }

    /// Resource-space box read by this view.
    pub fn read_extent(&self) -> &GridExtent {
        &self.read_extent
    }

    /// Extent of the view in rendered coordinates.
    pub fn available_extent(&self) -> &GridExtent {
        &self.available
    }

    pub fn mapper(&self) -> &CoordinateMapper {
        &self.mapper
    }

    pub fn tile_size(&self, dim: usize) -> i64 {
        self.mapper.tile_size()[dim]
    }

    pub fn subsampling(&self, dim: usize) -> i64 {
        self.mapper.subsampling()[dim]
    }

    pub fn subsampling_offset(&self, dim: usize) -> i64 {
        self.mapper.subsampling_offsets()[dim]
    }

    pub fn tile_strides(&self) -> &[i64] {
        &self.tile_strides
    }

    pub fn index_of_first_tile(&self) -> i64 {
        self.index_of_first_tile
    }

    pub fn tmc_of_first_tile(&self) -> &[i64] {
        &self.tmc_of_first_tile
    }

    /// Selected bands in increasing order, or `None` when all bands are read.
    pub fn included_bands(&self) -> Option<&[u32]> {
        self.included_bands.as_deref()
    }

    /// Layout of the tile buffers of this view.
    pub fn sample_layout(&self) -> &SampleLayout {
        &self.layout
    }

    /// Whether tiles are read in full along x even where the request ends
    /// inside them, so that every cached tile has the same width.
    pub fn force_tile_size(&self) -> bool {
        self.force_tile_size
    }

    /// Fill value of each band of the layout.
    pub fn fill_values(&self) -> &[f32] {
        &self.fill_values
    }

    pub fn color_model(&self) -> &ColorModel {
        &self.color_model
    }

    pub fn is_deferred(&self) -> bool {
        self.deferred
    }

    pub fn cache(&self) -> &TileCache {
        &self.cache
    }

    pub(crate) fn decoder(&self) -> &dyn TileDecoder {
        self.decoder.as_ref()
    }
}

impl fmt::Debug for CoverageView {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CoverageView")
            .field("identifier", &self.identifier)
            .field("read_extent", &self.read_extent)
            .field("available", &self.available)
            .field("mapper", &self.mapper)
            .field("included_bands", &self.included_bands)
            .field("force_tile_size", &self.force_tile_size)
            .field("deferred", &self.deferred)
            .finish_non_exhaustive()
    }
}

/// Validate a band selection. Returns the sorted selection (`None` when it
/// covers every band) and the band order of the tile buffers.
fn select_bands(
    band_count: u32,
    requested: Option<&[u32]>,
) -> Result<(Option<Vec<u32>>, Vec<u32>)> {
    let Some(requested) = requested else {
        return Ok((None, (0..band_count).collect()));
    };
    if requested.is_empty() {
        return Err(CoverageError::invalid_argument("band selection is empty"));
    }
    let mut sorted = requested.to_vec();
    sorted.sort_unstable();
    if let Some(&band) = sorted.last().filter(|&&b| b >= band_count) {
        return Err(CoverageError::invalid_argument(format!(
            "band {} is out of range, the resource has {} bands",
            band, band_count
        )));
    }
    if let Some(pair) = sorted.windows(2).find(|w| w[0] == w[1]) {
        return Err(CoverageError::invalid_argument(format!(
            "band {} is selected twice",
            pair[0]
        )));
    }
    let included = if sorted.len() == band_count as usize {
        None
    } else {
        Some(sorted)
    };
    Ok((included, requested.to_vec()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testdata::PatternDecoder;

    fn resource() -> TiledResource {
        TiledResource::new("test", vec![1000, 600], vec![256, 256], 3)
    }

    fn view(parameters: ViewParameters) -> Result<CoverageView> {
        CoverageView::new(
            &resource(),
            parameters,
            Arc::new(PatternDecoder::new()),
            &CoverageConfig::default(),
        )
    }

    fn extent(low: [i64; 2], high: [i64; 2]) -> GridExtent {
        GridExtent::new(low.to_vec(), high.to_vec()).unwrap()
    }

    #[test]
    fn test_full_view_geometry() {
        let view = view(ViewParameters::default()).unwrap();
        assert_eq!(view.available_extent(), &extent([0, 0], [1000, 600]));
        assert_eq!(view.tile_strides(), &[1, 4]);
        assert_eq!(view.index_of_first_tile(), 0);
        assert_eq!(view.tmc_of_first_tile(), &[0, 0]);
        assert_eq!(view.sample_layout(), &SampleLayout::new(256, 256, vec![0, 1, 2]));
        assert!(view.force_tile_size());
        assert!(view.included_bands().is_none());
    }

    #[test]
    fn test_subsampled_domain_geometry() {
        let params = ViewParameters::default()
            .with_domain(extent([301, 520], [2000, 590]))
            .with_subsampling(vec![3, 2]);
        let view = view(params).unwrap();

        assert_eq!(view.read_extent(), &extent([301, 520], [1000, 590]));
        // 301 = 3 * 100 + 1, 520 = 2 * 260 + 0
        assert_eq!(view.mapper().subsampling_offsets(), &[1, 0]);
        // last x pixel: resource 999 -> (999 - 1) / 3 = 332
        assert_eq!(view.available_extent(), &extent([100, 260], [333, 295]));
        assert_eq!(view.tmc_of_first_tile(), &[1, 2]);
        assert_eq!(view.index_of_first_tile(), 1 + 2 * 4);
        assert_eq!(view.sample_layout().width, 86);
        assert_eq!(view.sample_layout().height, 128);
        assert!(!view.force_tile_size());
    }

    #[test]
    fn test_band_selection() {
        let view1 = view(ViewParameters::default().with_bands(vec![2, 0])).unwrap();
        assert_eq!(view1.included_bands(), Some(&[0, 2][..]));
        assert_eq!(view1.sample_layout().bands, vec![2, 0]);

        let permuted = view(ViewParameters::default().with_bands(vec![1, 2, 0])).unwrap();
        assert!(permuted.included_bands().is_none());

        assert!(view(ViewParameters::default().with_bands(vec![3])).is_err());
        assert!(view(ViewParameters::default().with_bands(vec![1, 1])).is_err());
        assert!(view(ViewParameters::default().with_bands(vec![])).is_err());
    }

    #[test]
    fn test_invalid_construction() {
        let err = view(ViewParameters::default().with_subsampling(vec![0, 1])).unwrap_err();
        assert!(matches!(err, CoverageError::InvalidArgument(_)));

        let err = view(ViewParameters::default().with_domain(extent([2000, 0], [3000, 10])))
            .unwrap_err();
        assert!(err.is_disjoint());

        let flat = TiledResource::new("flat", vec![10], vec![4], 1);
        let err = CoverageView::new(
            &flat,
            ViewParameters::default(),
            Arc::new(PatternDecoder::new()),
            &CoverageConfig::default(),
        )
        .unwrap_err();
        assert!(matches!(err, CoverageError::InvalidArgument(_)));
    }

    #[test]
    fn test_plan_aligns_on_tiles() {
        let view = view(ViewParameters::default().with_subsampling(vec![2, 2])).unwrap();
        // Rendered [50, 150) is resource [100, 300): tiles 0 and 1.
        let plan = view.plan(&extent([50, 50], [150, 150])).unwrap();
        assert_eq!(plan.tile_lower, vec![0, 0]);
        assert_eq!(plan.tile_upper, vec![2, 2]);
        assert_eq!(plan.offset_aoi, vec![50, 50]);

        // Rendered [200, 201) is resource 400: second tile starts at 256 -> pixel 128.
        let plan = view.plan(&extent([200, 200], [201, 201])).unwrap();
        assert_eq!(plan.tile_lower, vec![1, 1]);
        assert_eq!(plan.tile_upper, vec![2, 2]);
        assert_eq!(plan.offset_aoi, vec![72, 72]);
    }

    #[test]
    fn test_render_rejects_bad_slices() {
        let view = view(ViewParameters::default()).unwrap();

        let err = view.render(Some(&extent([2000, 0], [2100, 10]))).unwrap_err();
        assert!(err.is_disjoint());

        let err = view.render(Some(&extent([10, 10], [10, 20]))).unwrap_err();
        assert!(err.is_disjoint());

        let three_d = GridExtent::new(vec![0, 0, 0], vec![1, 1, 1]).unwrap();
        let err = view.render(Some(&three_d)).unwrap_err();
        assert!(matches!(err, CoverageError::InvalidArgument(_)));
    }

    #[test]
    fn test_render_rejects_non_planar_slice() {
        let cube = TiledResource::new("cube", vec![64, 64, 8], vec![16, 16, 1], 1);
        let view = CoverageView::new(
            &cube,
            ViewParameters::default(),
            Arc::new(PatternDecoder::new()),
            &CoverageConfig::default(),
        )
        .unwrap();

        let err = view.render(None).unwrap_err();
        assert!(matches!(err, CoverageError::Unsupported(_)));

        let slice = GridExtent::new(vec![0, 0, 3], vec![64, 64, 4]).unwrap();
        let surface = view.render(Some(&slice)).unwrap();
        assert_eq!((surface.width(), surface.height()), (64, 64));
        assert_eq!(surface.tile_grid_size(), (4, 4));
    }
}
