//! Tiled Grid Coverage Reader
//!
//! This crate reads subsampled, band-selected windows of a tiled N-dimensional
//! raster. It works out which tiles of the resource cover a request, where
//! each tile lands in the result, and shares decoded tiles between views
//! through a tile cache. Actual storage access is delegated to a
//! [`TileDecoder`].
//!
//! - **Exact tile arithmetic**: every index is computed with overflow checks
//! - **Shared tiles**: views of one resource reuse each other's tiles
//! - **Deferred reads**: tiles can be decoded on first access
//!
//! # Architecture
//!
//! ```text
//! CoverageView::render(slice)
//!      │
//!      ├─► Clip to the view, compute the tile range (CoordinateMapper)
//!      │
//!      ├─► TileIterator over the range
//!      │         │
//!      │         ▼
//!      │    TileDecoder::read_tiles
//!      │         │
//!      │         ├─► TileCache hit: reuse, re-positioned at the tile origin
//!      │         │
//!      │         └─► Cache miss: decode region_inside_tile, then cache
//!      │
//!      └─► Surface (eager, or deferred per tile)
//! ```
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use tile_coverage::{CoverageConfig, CoverageView, TiledResource, ViewParameters};
//!
//! let resource = TiledResource::new("elevation", vec![1000, 600], vec![256, 256], 1);
//! let params = ViewParameters::default().with_subsampling(vec![2, 2]);
//! let config = CoverageConfig::from_env();
//! let view = CoverageView::new(&resource, params, Arc::new(decoder), &config)?;
//!
//! let surface = view.render(None)?;
//! let value = surface.sample(10, 20, 0)?;
//! ```

pub mod aoi;
pub mod cache;
pub mod config;
pub mod coverage;
pub mod error;
pub mod mapper;
pub mod surface;
pub mod testdata;
pub mod types;

// Re-export commonly used types at crate root
pub use aoi::{Aoi, Snapshot, TileIterator};
pub use cache::{TileCache, TileKey};
pub use config::CoverageConfig;
pub use coverage::{decode_tiles, CoverageView, TileDecoder, TiledResource, ViewParameters};
pub use error::{CoverageError, Result};
pub use mapper::CoordinateMapper;
pub use surface::{DeferredSurface, EagerSurface, Surface};
pub use types::{CacheStats, ColorModel, GridExtent, Rectangle, SampleLayout, TileBuffer};
