//! Mask rasters read through GDAL

use crate::core::interpolation::InterpolationMethod;
use crate::core::masking::MaskProvider;
use crate::core::mosaic::{AggregationMode, MosaicAggregator, MosaicParams};
use crate::core::resample::{resample_onto_grid, OutputGrid};
use crate::core::tiling::{ProgressMonitor, RegionPartitioner};
use crate::io::raster::read_raster;
use crate::types::{ClearCutError, ClearCutResult, GeoRaster};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Reads mask layers as rasters and brings them onto the requested grid by
/// nearest neighbour.
///
/// A vegetation mask directory is the max mosaic of every GeoTIFF in it.
#[derive(Debug, Clone, Default)]
pub struct RasterMaskProvider {
    partitioner: RegionPartitioner,
    monitor: ProgressMonitor,
}

impl RasterMaskProvider {
    pub fn new(partitioner: RegionPartitioner) -> Self {
        Self {
            partitioner,
            monitor: ProgressMonitor::new(),
        }
    }

    /// Share cancellation with the rest of a job
    pub fn with_monitor(mut self, monitor: ProgressMonitor) -> Self {
        self.monitor = monitor;
        self
    }
}

fn is_geotiff(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map_or(false, |ext| ext.eq_ignore_ascii_case("tif") || ext.eq_ignore_ascii_case("tiff"))
}

/// GeoTIFFs directly inside `dir`, sorted by path
pub fn mask_rasters_in(dir: &Path) -> ClearCutResult<Vec<PathBuf>> {
    let mut paths = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_file() && is_geotiff(&path) {
            paths.push(path);
        }
    }
    paths.sort();
    Ok(paths)
}

impl MaskProvider for RasterMaskProvider {
    fn acquisition_mask(&mut self, layer: &Path, reference: &GeoRaster) -> ClearCutResult<GeoRaster> {
        let mask = Arc::new(read_raster(layer)?);
        resample_onto_grid(
            mask,
            &OutputGrid::of(reference),
            InterpolationMethod::NearestNeighbor,
            &self.partitioner,
            &self.monitor,
        )
    }

    fn vegetation_mask(&mut self, dir: &Path, grid: &OutputGrid) -> ClearCutResult<GeoRaster> {
        let paths = mask_rasters_in(dir)?;
        if paths.is_empty() {
            return Err(ClearCutError::Configuration(format!(
                "No mask raster found in {}",
                dir.display()
            )));
        }
        log::info!("Mosaicking {} vegetation mask(s)", paths.len());

        let inputs = paths
            .iter()
            .map(|path| read_raster(path).map(Arc::new))
            .collect::<ClearCutResult<Vec<_>>>()?;
        let params = MosaicParams {
            mode: AggregationMode::Max,
            ..MosaicParams::default()
        };
        MosaicAggregator::new(inputs, params)?.aggregate(grid, &self.partitioner, &self.monitor)
    }
}
