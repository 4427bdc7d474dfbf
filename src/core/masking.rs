//! Per-acquisition masks and vegetation masks.
//!
//! Mask sources (vector layers, raster layers, directories of rasters) are
//! resolved by a [`MaskProvider`]; this module only applies the rasterized
//! result.

use crate::core::overlap::RegionOverlapResolver;
use crate::core::resample::OutputGrid;
use crate::core::tiling::Region;
use crate::types::{ClearCutError, ClearCutResult, GeoRaster};
use std::path::Path;

/// Turns mask sources into rasters on a known grid.
///
/// Mask pixels that are non-zero and finite are inside the mask.
pub trait MaskProvider {
    /// Mask of one acquisition from `layer`, on the grid of `reference`
    fn acquisition_mask(&mut self, layer: &Path, reference: &GeoRaster) -> ClearCutResult<GeoRaster>;

    /// Vegetation mask assembled from the mask rasters in `dir`, on `grid`
    fn vegetation_mask(&mut self, dir: &Path, grid: &OutputGrid) -> ClearCutResult<GeoRaster>;
}

#[inline]
fn is_inside(value: f32) -> bool {
    value.is_finite() && value != 0.0
}

/// Restrict `raster` to its mask.
///
/// The raster is cropped to the bounding box of the pixels inside the mask,
/// and pixels outside it take the band no-data value, or 0 when none is
/// declared. A mask that keeps nothing leaves nothing to compare.
pub fn apply_acquisition_mask(raster: &GeoRaster, mask: &GeoRaster) -> ClearCutResult<GeoRaster> {
    if (mask.rows(), mask.cols()) != (raster.rows(), raster.cols()) || mask.band_count() == 0 {
        return Err(ClearCutError::Configuration(format!(
            "Acquisition mask {}x{} does not match raster {}x{}",
            mask.rows(),
            mask.cols(),
            raster.rows(),
            raster.cols()
        )));
    }

    let mask_band = mask.band(0);
    let mut bounds: Option<(usize, usize, usize, usize)> = None;
    for ((r, c), &v) in mask_band.indexed_iter() {
        if is_inside(v) {
            bounds = Some(match bounds {
                None => (r, r, c, c),
                Some((r0, r1, c0, c1)) => (r0.min(r), r1.max(r), c0.min(c), c1.max(c)),
            });
        }
    }
    let (r0, r1, c0, c1) = bounds.ok_or_else(|| {
        ClearCutError::NoOverlap("Acquisition mask does not cover any pixel".to_string())
    })?;

    let region = Region::new(r0, c0, r1 - r0 + 1, c1 - c0 + 1);
    log::debug!("Acquisition mask keeps {:?}", region);

    let mut masked = RegionOverlapResolver::extract(raster, &region);
    for b in 0..masked.band_count() {
        let fill = masked.band_no_data(b).unwrap_or(0.0);
        for r in 0..region.rows {
            for c in 0..region.cols {
                if !is_inside(mask_band[[region.row_offset + r, region.col_offset + c]]) {
                    masked.data[[b, r, c]] = fill;
                }
            }
        }
    }
    Ok(masked)
}
