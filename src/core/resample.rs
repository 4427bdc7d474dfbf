//! Resampling of a raster onto another raster's grid.

use crate::core::interpolation::{InterpolationMethod, Interpolator, RasterInterpolator};
use crate::core::tiling::{assemble_tiles, process_regions_with, ProgressMonitor, Region, RegionPartitioner};
use crate::types::{ClearCutResult, GeoRaster, GeoTransform, MultiBandImage, Sample};
use ndarray::{s, Array2, Array3};
use std::sync::Arc;

/// Target grid of a resampling
#[derive(Debug, Clone, Copy)]
pub struct OutputGrid {
    pub geo_transform: GeoTransform,
    pub rows: usize,
    pub cols: usize,
}

impl OutputGrid {
    pub fn new(geo_transform: GeoTransform, rows: usize, cols: usize) -> Self {
        Self {
            geo_transform,
            rows,
            cols,
        }
    }

    pub fn of(raster: &GeoRaster) -> Self {
        Self::new(raster.geo_transform, raster.rows(), raster.cols())
    }
}

/// Resample every band of `source` onto `grid`.
///
/// Pixels outside the source footprint take the band no-data value, or 0
/// when none is declared.
pub fn resample_onto_grid(
    source: Arc<GeoRaster>,
    grid: &OutputGrid,
    method: InterpolationMethod,
    partitioner: &RegionPartitioner,
    monitor: &ProgressMonitor,
) -> ClearCutResult<GeoRaster> {
    let bands = source.band_count();
    log::debug!(
        "Resampling {} band(s) {}x{} onto {}x{} grid ({:?})",
        bands,
        source.rows(),
        source.cols(),
        grid.rows,
        grid.cols,
        method
    );

    let fill: Vec<Sample> = (0..bands)
        .map(|b| source.band_no_data(b).unwrap_or(0.0))
        .collect();
    let prototype = RasterInterpolator::new(Arc::clone(&source), method);
    let regions = partitioner.partition(grid.rows, grid.cols);

    let tiles = process_regions_with(
        &regions,
        monitor,
        || prototype.clone(),
        |interp, region| Ok((*region, resample_region(interp, grid, region, &fill))),
    )?;

    let mut data = MultiBandImage::zeros((bands, grid.rows, grid.cols));
    for (band, &fill_value) in fill.iter().enumerate() {
        let band_tiles = tiles
            .iter()
            .map(|(region, tile)| (*region, tile.slice(s![band, .., ..]).to_owned()))
            .collect::<Vec<(Region, Array2<Sample>)>>();
        let image = assemble_tiles(grid.rows, grid.cols, fill_value, band_tiles)?;
        data.slice_mut(s![band, .., ..]).assign(&image);
    }

    Ok(GeoRaster {
        data,
        geo_transform: grid.geo_transform,
        no_data: source.no_data.clone(),
        projection: source.projection.clone(),
    })
}

fn resample_region<I: Interpolator>(
    interp: &mut I,
    grid: &OutputGrid,
    region: &Region,
    fill: &[Sample],
) -> Array3<Sample> {
    let mut tile = Array3::zeros((fill.len(), region.rows, region.cols));
    for r in 0..region.rows {
        for c in 0..region.cols {
            let point = grid
                .geo_transform
                .pixel_center(region.row_offset + r, region.col_offset + c);
            if interp.is_inside_buffer(point) {
                let pixel = interp.evaluate(point);
                for (band, &value) in pixel.iter().enumerate() {
                    tile[[band, r, c]] = value;
                }
            } else {
                for (band, &value) in fill.iter().enumerate() {
                    tile[[band, r, c]] = value;
                }
            }
        }
    }
    tile
}
