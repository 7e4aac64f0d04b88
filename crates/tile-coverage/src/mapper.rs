//! Overflow-checked conversions between rendered pixels, resource pixels and
//! tile matrix coordinates.
//!
//! A view selects every `subsampling[d]`-th resource pixel starting at
//! `subsampling_offsets[d]`:
//!
//! ```text
//! resource = pixel * subsampling + offset
//! pixel    = floor((resource - offset) / subsampling)
//! tmc      = floor(resource / tile_size)
//! ```

use crate::error::{CoverageError, Result};

/// Floor division (rounds toward negative infinity). `d` must be positive.
pub fn floor_div(n: i64, d: i64) -> i64 {
    n.div_euclid(d)
}

/// Floor modulo, always in `0..d`. `d` must be positive.
pub fn floor_mod(n: i64, d: i64) -> i64 {
    n.rem_euclid(d)
}

/// Ceiling division (rounds toward positive infinity). `d` must be positive.
pub fn ceil_div(n: i64, d: i64) -> i64 {
    let q = n.div_euclid(d);
    if n.rem_euclid(d) != 0 {
        q + 1
    } else {
        q
    }
}

/// `a * b`, or Overflow naming what was computed.
pub fn checked_mul(a: i64, b: i64, what: &'static str) -> Result<i64> {
    a.checked_mul(b).ok_or(CoverageError::Overflow(what))
}

/// `a + b`, or Overflow naming what was computed.
pub fn checked_add(a: i64, b: i64, what: &'static str) -> Result<i64> {
    a.checked_add(b).ok_or(CoverageError::Overflow(what))
}

/// `a - b`, or Overflow naming what was computed.
pub fn checked_sub(a: i64, b: i64, what: &'static str) -> Result<i64> {
    a.checked_sub(b).ok_or(CoverageError::Overflow(what))
}

/// Product of all values, checked.
pub fn checked_product(values: impl IntoIterator<Item = i64>, what: &'static str) -> Result<i64> {
    values
        .into_iter()
        .try_fold(1i64, |acc, v| checked_mul(acc, v, what))
}

/// Converts a non-negative `i64` to `usize`.
pub fn to_usize(value: i64, what: &'static str) -> Result<usize> {
    usize::try_from(value).map_err(|_| CoverageError::Overflow(what))
}

/// Stateless pixel/resource/tile arithmetic for one view.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoordinateMapper {
    subsampling: Vec<i64>,
    subsampling_offsets: Vec<i64>,
    tile_size: Vec<i64>,
}

impl CoordinateMapper {
    /// Create a mapper. All three slices must have the same length, with
    /// `subsampling` and `tile_size` strictly positive.
    pub fn new(
        subsampling: Vec<i64>,
        subsampling_offsets: Vec<i64>,
        tile_size: Vec<i64>,
    ) -> Result<Self> {
        let n = tile_size.len();
        if subsampling.len() != n || subsampling_offsets.len() != n {
            return Err(CoverageError::invalid_argument(format!(
                "expected {} subsampling values and offsets, got {} and {}",
                n,
                subsampling.len(),
                subsampling_offsets.len()
            )));
        }
        if let Some(d) = (0..n).find(|&d| subsampling[d] < 1 || tile_size[d] < 1) {
            return Err(CoverageError::invalid_argument(format!(
                "subsampling ({}) and tile size ({}) must be >= 1 in dimension {}",
                subsampling[d], tile_size[d], d
            )));
        }
        Ok(Self {
            subsampling,
            subsampling_offsets,
            tile_size,
        })
    }

    pub fn dimension(&self) -> usize {
        self.tile_size.len()
    }

    pub fn subsampling(&self) -> &[i64] {
        &self.subsampling
    }

    pub fn subsampling_offsets(&self) -> &[i64] {
        &self.subsampling_offsets
    }

    pub fn tile_size(&self) -> &[i64] {
        &self.tile_size
    }

    /// Rendered pixel coordinate to resource pixel coordinate.
    pub fn pixel_to_resource(&self, coordinate: i64, dim: usize) -> Result<i64> {
        let scaled = checked_mul(
            coordinate,
            self.subsampling[dim],
            "pixel to resource coordinate",
        )?;
        checked_add(scaled, self.subsampling_offsets[dim], "pixel to resource coordinate")
    }

    /// Resource pixel coordinate to the rendered pixel at or before it.
    pub fn resource_to_pixel(&self, coordinate: i64, dim: usize) -> Result<i64> {
        let shifted = checked_sub(
            coordinate,
            self.subsampling_offsets[dim],
            "resource to pixel coordinate",
        )?;
        Ok(floor_div(shifted, self.subsampling[dim]))
    }

    /// Resource tile matrix coordinate of the tile containing a rendered pixel.
    pub fn tile_matrix_coordinate(&self, coordinate: i64, dim: usize) -> Result<i64> {
        let resource = self.pixel_to_resource(coordinate, dim)?;
        Ok(floor_div(resource, self.tile_size[dim]))
    }
}
