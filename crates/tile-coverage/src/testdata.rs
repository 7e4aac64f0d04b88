//! Test decoders and resources.
//!
//! [`PatternDecoder`] synthesizes tiles where the sample of band `b` at
//! resource pixel `(x, y)` is `b * 1_000_000 + x * 1000 + y`, so any read can
//! be checked against [`pattern_value`] without real storage.

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::aoi::{Aoi, TileIterator};
use crate::coverage::{decode_tiles, TileDecoder, TiledResource};
use crate::types::TileBuffer;

/// Fill value of the resources built by [`pattern_resource`].
pub const PATTERN_FILL: f32 = -1.0;

/// Expected sample of `band` at resource pixel `(x, y)`.
pub fn pattern_value(x: i64, y: i64, band: u32) -> f32 {
    (i64::from(band) * 1_000_000 + x * 1000 + y) as f32
}

/// A resource suitable for [`PatternDecoder`], with [`PATTERN_FILL`] as fill
/// value of every band.
pub fn pattern_resource(
    identifier: &str,
    size: Vec<i64>,
    tile_size: Vec<i64>,
    band_count: u32,
) -> TiledResource {
    TiledResource::new(identifier, size, tile_size, band_count)
        .with_fill_values(vec![PATTERN_FILL; band_count as usize])
}

/// Decoder generating the test pattern, counting the tiles it decodes.
#[derive(Debug, Default)]
pub struct PatternDecoder {
    decoded: AtomicUsize,
    missing: HashSet<i64>,
}

impl PatternDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Report the tiles at these resource tile indices as holding no data.
    pub fn with_missing_tiles(mut self, indices: impl IntoIterator<Item = i64>) -> Self {
        self.missing.extend(indices);
        self
    }

    /// Number of tiles decoded so far (cache hits excluded).
    pub fn decoded(&self) -> usize {
        self.decoded.load(Ordering::Relaxed)
    }

    fn decode(&self, aoi: &TileIterator<'_>) -> anyhow::Result<Option<TileBuffer>> {
        if self.missing.contains(&aoi.tile_index_in_resource()) {
            return Ok(None);
        }
        let Some(region) = aoi.region_inside_tile(true)? else {
            return Ok(None);
        };

        let view = aoi.view();
        let size = view.resource_size();
        let bands = view.sample_layout().bands.clone();
        let mut tile = aoi.create_buffer();
        let (ox, oy) = tile.origin();
        for y in region.y..region.max_y() {
            let ry = (oy + y) * view.subsampling(1) + view.subsampling_offset(1);
            if ry >= size[1] {
                break;
            }
            for x in region.x..region.max_x() {
                let rx = (ox + x) * view.subsampling(0) + view.subsampling_offset(0);
                if rx >= size[0] {
                    break;
                }
                for (slot, &band) in bands.iter().enumerate() {
                    tile.set(x as usize, y as usize, slot, pattern_value(rx, ry, band));
                }
            }
        }
        self.decoded.fetch_add(1, Ordering::Relaxed);
        Ok(Some(tile))
    }
}

impl TileDecoder for PatternDecoder {
    fn read_tiles(
        &self,
        tiles: &mut TileIterator<'_>,
    ) -> anyhow::Result<Vec<Option<TileBuffer>>> {
        decode_tiles(tiles, |aoi| self.decode(aoi))
    }
}

/// Decoder whose storage is always unavailable.
#[derive(Debug)]
pub struct FailingDecoder {
    message: String,
}

impl FailingDecoder {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl TileDecoder for FailingDecoder {
    fn read_tiles(
        &self,
        tiles: &mut TileIterator<'_>,
    ) -> anyhow::Result<Vec<Option<TileBuffer>>> {
        anyhow::bail!(
            "{} (tile {})",
            self.message,
            tiles.tile_index_in_resource()
        )
    }
}

/// Decoder that ignores the request and returns no tiles.
#[derive(Debug, Default)]
pub struct EmptyResultDecoder;

impl TileDecoder for EmptyResultDecoder {
    fn read_tiles(
        &self,
        _tiles: &mut TileIterator<'_>,
    ) -> anyhow::Result<Vec<Option<TileBuffer>>> {
        Ok(Vec::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pattern_value() {
        assert_eq!(pattern_value(0, 0, 0), 0.0);
        assert_eq!(pattern_value(12, 34, 0), 12034.0);
        assert_eq!(pattern_value(12, 34, 2), 2_012_034.0);
    }

    #[test]
    fn test_pattern_resource_fill() {
        let resource = pattern_resource("p", vec![10, 10], vec![5, 5], 3);
        assert_eq!(resource.fill_values, vec![PATTERN_FILL; 3]);
        assert_eq!(resource.band_count, 3);
    }
}
