//! Coverage views and the tile decoder they drive.

mod view;

pub use view::{CoverageView, TiledResource, ViewParameters};
pub(crate) use view::RenderPlan;

use crate::aoi::{Aoi, TileIterator};
use crate::types::TileBuffer;

/// Reads tiles from the underlying storage.
///
/// `read_tiles` receives an iterator positioned on the first tile of the
/// request and must return one entry per tile, in the order of
/// `index_in_result_array`. `None` marks a tile without data. Errors are
/// reported to the caller of `render`, never retried.
///
/// If the storage handle is not safe to use from several threads, the
/// implementation must provide its own locking: views may call it
/// concurrently.
pub trait TileDecoder: Send + Sync {
    fn read_tiles(
        &self,
        tiles: &mut TileIterator<'_>,
    ) -> anyhow::Result<Vec<Option<TileBuffer>>>;
}

/// Walk every tile of `tiles`, reusing cached tiles and decoding the others
/// with `decode`. Decoded tiles are put in the cache.
pub fn decode_tiles<F>(
    tiles: &mut TileIterator<'_>,
    mut decode: F,
) -> anyhow::Result<Vec<Option<TileBuffer>>>
where
    F: FnMut(&TileIterator<'_>) -> anyhow::Result<Option<TileBuffer>>,
{
    let mut result = Vec::with_capacity(tiles.tile_count_in_query());
    if tiles.is_empty() {
        return Ok(result);
    }
    loop {
        let tile = match tiles.cached_tile()? {
            Some(cached) => Some(cached),
            None => match decode(tiles)? {
                Some(decoded) => Some(tiles.cache(decoded)?),
                None => None,
            },
        };
        result.push(tile);
        if !tiles.next() {
            break;
        }
    }
    Ok(result)
}
