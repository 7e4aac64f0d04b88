//! Concurrent access to one tile cache from many views.

use std::sync::Arc;

use rayon::prelude::*;
use tile_coverage::testdata::{pattern_resource, pattern_value, PatternDecoder};
use tile_coverage::{
    CoverageConfig, CoverageView, GridExtent, Rectangle, SampleLayout, TileBuffer, TileCache,
    TileKey, ViewParameters,
};

fn key() -> TileKey {
    TileKey {
        tile_index: 7,
        included_bands: None,
        subsampling: vec![1, 1],
        subsampling_offsets: vec![0, 0],
        region: Rectangle::new(0, 0, 8, 8),
    }
}

#[test]
fn test_racing_puts_converge_on_one_tile() {
    let cache = TileCache::new(1024 * 1024);
    let layout = SampleLayout::new(8, 8, vec![0]);

    let results: Vec<TileBuffer> = (0..64)
        .into_par_iter()
        .map(|i| cache.put(key(), TileBuffer::filled((0, 0), &layout, &[i as f32])))
        .collect();

    let canonical = cache.get(&key(), &layout, (0, 0)).expect("cached tile");
    let value = canonical.sample(0, 0, 0);
    for tile in &results {
        assert!(tile.shares_storage_with(&canonical));
        assert_eq!(tile.sample(0, 0, 0), value);
    }
    assert_eq!(cache.stats().replacements, 63);
    assert_eq!(cache.len(), 1);
}

#[test]
fn test_concurrent_renders_share_tiles() {
    let cache = Arc::new(TileCache::new(16 * 1024 * 1024));
    let resource = pattern_resource("concurrent", vec![256, 256], vec![64, 64], 2)
        .with_cache(Arc::clone(&cache));
    let decoder = Arc::new(PatternDecoder::new());

    let surfaces: Vec<_> = (0..16i64)
        .into_par_iter()
        .map(|i| {
            let view = CoverageView::new(
                &resource,
                ViewParameters::default(),
                decoder.clone(),
                &CoverageConfig::default(),
            )
            .expect("Failed to open view");
            let low = (i * 8) % 128;
            let request = GridExtent::new(vec![low, low], vec![low + 128, low + 128]).unwrap();
            let surface = view.render(Some(&request)).expect("Failed to render");
            assert_eq!(
                surface.sample(low + 5, low + 9, 1).unwrap(),
                Some(pattern_value(low + 5, low + 9, 1))
            );
            surface
        })
        .collect();

    // Racing decoders may decode a tile twice, but every surface ends up
    // with the same samples for it.
    let reference = surfaces[0].tile(0, 0).unwrap().expect("tile");
    for surface in &surfaces {
        if surface.min_x() < 64 && surface.min_y() < 64 {
            let tile = surface.tile(0, 0).unwrap().expect("tile");
            assert!(tile.shares_storage_with(&reference));
        }
    }
    assert!(decoder.decoded() >= 16);
    assert_eq!(cache.stats().entries, 16);
}

#[test]
fn test_concurrent_deferred_access() {
    let resource = pattern_resource("deferred", vec![128, 128], vec![32, 32], 1);
    let config = CoverageConfig {
        deferred_tile_reading: true,
        ..CoverageConfig::default()
    };
    let view = CoverageView::new(
        &resource,
        ViewParameters::default(),
        Arc::new(PatternDecoder::new()),
        &config,
    )
    .expect("Failed to open view");
    let surface = view.render(None).unwrap();

    (0..128i64).into_par_iter().for_each(|y| {
        for x in (0..128).step_by(7) {
            assert_eq!(surface.sample(x, y, 0).unwrap(), Some(pattern_value(x, y, 0)));
        }
    });
    assert_eq!(surface.tile_grid_size(), (4, 4));
}
