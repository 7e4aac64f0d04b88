//! Cache implementations for tiled coverage reads.

mod tile_cache;

pub use tile_cache::{TileCache, TileKey};
