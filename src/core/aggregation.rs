//! File-based aggregation of several clear cut label rasters.

use crate::core::interpolation::InterpolationMethod;
use crate::core::mosaic::{AggregationMode, MosaicAggregator, MosaicParams};
use crate::core::tiling::{ProgressMonitor, RegionPartitioner};
use crate::types::{ClearCutError, ClearCutResult, GeoRaster, Sample};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;

/// Aggregation parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregationParams {
    pub mode: AggregationMode,
    pub interpolation: InterpolationMethod,
    pub output_no_data: Sample,
    pub input_no_data: Sample,
    pub ram_budget_mb: usize,
}

impl Default for AggregationParams {
    fn default() -> Self {
        Self {
            mode: AggregationMode::Max,
            interpolation: InterpolationMethod::NearestNeighbor,
            output_no_data: 0.0,
            input_no_data: 0.0,
            ram_budget_mb: 256,
        }
    }
}

impl AggregationParams {
    /// Parameters for a mode given by name, e.g. from a command line
    pub fn with_mode_name(mode: &str) -> ClearCutResult<Self> {
        Ok(Self {
            mode: mode.parse()?,
            ..Self::default()
        })
    }

    pub fn mosaic_params(&self) -> MosaicParams {
        MosaicParams {
            mode: self.mode,
            interpolation: self.interpolation,
            output_no_data: self.output_no_data,
            input_no_data: self.input_no_data,
        }
    }

    pub fn partitioner(&self, inputs: usize) -> RegionPartitioner {
        // Output pixel plus one stack slot per input
        let bytes_per_pixel = (inputs + 1) * std::mem::size_of::<Sample>();
        RegionPartitioner::from_memory_budget(self.ram_budget_mb, bytes_per_pixel)
    }
}

/// Aggregate in-memory rasters onto the union of their footprints
pub fn aggregate(
    inputs: &[Arc<GeoRaster>],
    params: &AggregationParams,
    monitor: &ProgressMonitor,
) -> ClearCutResult<GeoRaster> {
    let partitioner = params.partitioner(inputs.len());
    let aggregator = MosaicAggregator::new(inputs.to_vec(), params.mosaic_params())?;
    aggregator.aggregate_default(&partitioner, monitor)
}

/// File-based aggregation job
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregationJob {
    pub inputs: Vec<PathBuf>,
    pub output: PathBuf,
    pub params: AggregationParams,
}

impl AggregationJob {
    pub fn validate(&self) -> ClearCutResult<()> {
        if self.inputs.is_empty() {
            return Err(ClearCutError::Configuration(
                "Aggregation needs at least one input raster".to_string(),
            ));
        }
        Ok(())
    }

    /// Read every input, aggregate, and write the output raster
    #[cfg(feature = "gdal")]
    pub fn execute(&self, monitor: &ProgressMonitor) -> ClearCutResult<GeoRaster> {
        use crate::io::raster::{read_raster, write_raster};

        self.validate()?;
        log::info!("Aggregating {} raster(s) into {}", self.inputs.len(), self.output.display());

        let inputs = self
            .inputs
            .iter()
            .map(|path| read_raster(path).map(Arc::new))
            .collect::<ClearCutResult<Vec<_>>>()?;

        let mosaic = aggregate(&inputs, &self.params, monitor)?;
        write_raster(&self.output, &mosaic)?;
        Ok(mosaic)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::GeoTransform;
    use ndarray::Array2;

    #[test]
    fn test_unknown_mode_is_fatal() {
        let err = AggregationParams::with_mode_name("median").unwrap_err();
        assert!(err.to_string().contains("median"));
        assert_eq!(AggregationParams::with_mode_name("mean").unwrap().mode, AggregationMode::Mean);
    }

    #[test]
    fn test_job_without_inputs_is_fatal() {
        let job = AggregationJob {
            inputs: Vec::new(),
            output: PathBuf::from("out.tif"),
            params: AggregationParams::default(),
        };
        assert!(job.validate().is_err());
        assert!(aggregate(&[], &AggregationParams::default(), &ProgressMonitor::new()).is_err());
    }

    #[test]
    fn test_empty_stack_gives_output_no_data() {
        let gt_a = GeoTransform::north_up(0.0, 10.0, 10.0, -10.0);
        let gt_b = GeoTransform::north_up(20.0, 10.0, 10.0, -10.0);
        let a = Arc::new(GeoRaster::from_band(Array2::from_elem((1, 1), 1.0), gt_a));
        let b = Arc::new(GeoRaster::from_band(Array2::from_elem((1, 1), 1.0), gt_b));

        for mode in [AggregationMode::Max, AggregationMode::Mean] {
            let params = AggregationParams {
                mode,
                output_no_data: 255.0,
                ..AggregationParams::default()
            };
            let out = aggregate(&[a.clone(), b.clone()], &params, &ProgressMonitor::new()).unwrap();
            assert_eq!(out.band(0).iter().copied().collect::<Vec<_>>(), vec![1.0, 255.0, 1.0]);
            assert_eq!(out.band_no_data(0), Some(255.0));
        }
    }
}
