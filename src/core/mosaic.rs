//! Mosaicking of several single-band rasters onto one output grid.
//!
//! Every output pixel center is interpolated in each input, in input order;
//! non-empty values form the pixel stack, which the aggregation mode reduces.

use crate::core::interpolation::{InterpolationMethod, Interpolator, RasterInterpolator};
use crate::core::resample::OutputGrid;
use crate::core::tiling::{assemble_tiles, process_regions_with, ProgressMonitor, Region, RegionPartitioner};
use crate::types::{is_valid_sample, ClearCutError, ClearCutResult, DeltaImage, GeoRaster, Sample};
use ndarray::Array2;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::Arc;

/// Reduction applied to each pixel stack
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AggregationMode {
    Max,
    Mean,
}

impl AggregationMode {
    /// Reduce a pixel stack; `None` for an empty stack
    pub fn reduce(&self, stack: &[Sample]) -> Option<Sample> {
        if stack.is_empty() {
            return None;
        }
        match self {
            AggregationMode::Max => stack.iter().copied().reduce(Sample::max),
            AggregationMode::Mean => {
                let sum: f64 = stack.iter().map(|&v| v as f64).sum();
                Some((sum / stack.len() as f64) as Sample)
            }
        }
    }
}

impl FromStr for AggregationMode {
    type Err = ClearCutError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "max" => Ok(AggregationMode::Max),
            "mean" => Ok(AggregationMode::Mean),
            _ => Err(ClearCutError::Configuration(format!(
                "Unknown aggregation method: {} (expected max or mean)",
                s
            ))),
        }
    }
}

impl std::fmt::Display for AggregationMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AggregationMode::Max => write!(f, "max"),
            AggregationMode::Mean => write!(f, "mean"),
        }
    }
}

/// Whole pixels needed to cover `length`; quotients within floating error of
/// an integer are not rounded up
fn pixel_count(length: f64, spacing: f64) -> usize {
    const SNAP: f64 = 1e-6;
    let n = length / spacing;
    let n = if (n - n.round()).abs() < SNAP { n.round() } else { n.ceil() };
    n.max(1.0) as usize
}

/// Mosaic settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MosaicParams {
    pub mode: AggregationMode,
    pub interpolation: InterpolationMethod,
    /// Value written where no input contributes
    pub output_no_data: Sample,
    /// Empty-pixel value of inputs that declare no band no-data
    pub input_no_data: Sample,
}

impl Default for MosaicParams {
    fn default() -> Self {
        Self {
            mode: AggregationMode::Max,
            interpolation: InterpolationMethod::NearestNeighbor,
            output_no_data: 0.0,
            input_no_data: 0.0,
        }
    }
}

/// Combines N input rasters into one
pub struct MosaicAggregator {
    inputs: Vec<Arc<GeoRaster>>,
    params: MosaicParams,
}

impl MosaicAggregator {
    /// Fails when no input raster is given
    pub fn new(inputs: Vec<Arc<GeoRaster>>, params: MosaicParams) -> ClearCutResult<Self> {
        if inputs.is_empty() {
            return Err(ClearCutError::Configuration(
                "Aggregation needs at least one input raster".to_string(),
            ));
        }
        for (i, input) in inputs.iter().enumerate() {
            if input.band_count() == 0 || input.rows() == 0 || input.cols() == 0 {
                return Err(ClearCutError::Configuration(format!(
                    "Input raster #{} is empty ({} bands, {}x{})",
                    i,
                    input.band_count(),
                    input.rows(),
                    input.cols()
                )));
            }
        }
        log::info!("🧩 Mosaic of {} input(s), mode {}", inputs.len(), params.mode);
        Ok(Self { inputs, params })
    }

    /// Union of input footprints at the first input's pixel size
    pub fn default_output_grid(&self) -> OutputGrid {
        let reference = &self.inputs[0].geo_transform;
        let extent = self
            .inputs
            .iter()
            .map(|r| r.footprint())
            .reduce(|a, b| a.union(&b))
            .unwrap_or_else(|| self.inputs[0].footprint());

        let pixel_width = reference.pixel_width.abs();
        let pixel_height = reference.pixel_height.abs();
        let cols = pixel_count(extent.width(), pixel_width);
        let rows = pixel_count(extent.height(), pixel_height);

        let geo_transform =
            crate::types::GeoTransform::north_up(extent.min_x, extent.max_y, pixel_width, -pixel_height);
        OutputGrid::new(geo_transform, rows, cols)
    }

    /// Empty-pixel value of input `i`
    fn empty_value(&self, i: usize) -> Sample {
        self.inputs[i].band_no_data(0).unwrap_or(self.params.input_no_data)
    }

    /// Mosaic onto `grid`
    pub fn aggregate(
        &self,
        grid: &OutputGrid,
        partitioner: &RegionPartitioner,
        monitor: &ProgressMonitor,
    ) -> ClearCutResult<GeoRaster> {
        log::debug!("Mosaic output grid: {}x{}, {:?}", grid.rows, grid.cols, grid.geo_transform);

        let prototypes: Vec<RasterInterpolator> = self
            .inputs
            .iter()
            .map(|r| RasterInterpolator::new(Arc::clone(r), self.params.interpolation))
            .collect();
        let empty_values: Vec<Sample> = (0..self.inputs.len()).map(|i| self.empty_value(i)).collect();

        let regions = partitioner.partition(grid.rows, grid.cols);
        let tiles = process_regions_with(
            &regions,
            monitor,
            || prototypes.clone(),
            |interps, region| Ok((*region, self.aggregate_region(interps, &empty_values, grid, region))),
        )?;

        let image: DeltaImage = assemble_tiles(grid.rows, grid.cols, self.params.output_no_data, tiles)?;
        log::info!("✅ Mosaic completed: {}x{} pixels", grid.rows, grid.cols);

        Ok(GeoRaster::from_band(image, grid.geo_transform)
            .with_no_data(Some(self.params.output_no_data as f64))
            .with_projection(self.inputs[0].projection.clone()))
    }

    /// Mosaic onto the default grid
    pub fn aggregate_default(
        &self,
        partitioner: &RegionPartitioner,
        monitor: &ProgressMonitor,
    ) -> ClearCutResult<GeoRaster> {
        self.aggregate(&self.default_output_grid(), partitioner, monitor)
    }

    fn aggregate_region<I: Interpolator>(
        &self,
        interps: &mut [I],
        empty_values: &[Sample],
        grid: &OutputGrid,
        region: &Region,
    ) -> Array2<Sample> {
        let mut tile = Array2::from_elem((region.rows, region.cols), self.params.output_no_data);
        let mut stack: Vec<Sample> = Vec::with_capacity(interps.len());

        for r in 0..region.rows {
            for c in 0..region.cols {
                let point = grid
                    .geo_transform
                    .pixel_center(region.row_offset + r, region.col_offset + c);

                stack.clear();
                for (interp, &empty) in interps.iter_mut().zip(empty_values) {
                    if interp.is_inside_buffer(point) {
                        let value = interp.evaluate(point)[0];
                        if is_valid_sample(value, Some(empty)) {
                            stack.push(value);
                        }
                    }
                }

                if let Some(value) = self.params.mode.reduce(&stack) {
                    tile[[r, c]] = value;
                }
            }
        }
        tile
    }
}
