use crate::core::tiling::{assemble_tiles, process_regions, ProgressMonitor, RegionPartitioner};
use crate::types::{
    is_valid_sample, ClearCutError, ClearCutResult, DeltaImage, GeoRaster, Sample, DELTA_NDVI_NO_DATA,
};
use ndarray::Array2;
use serde::{Deserialize, Serialize};

/// Denominators at or below this magnitude give no NDVI
const MIN_NDVI_DENOMINATOR: f64 = 1e-4;

/// 1-based NIR and red band indices of one acquisition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NdviBands {
    pub nir: usize,
    pub red: usize,
}

impl Default for NdviBands {
    fn default() -> Self {
        Self { nir: 4, red: 1 }
    }
}

/// Difference of NDVI between two acquisitions: `NDVI(after) - NDVI(before)`
#[derive(Debug, Clone)]
pub struct NdviDelta {
    nir_before: usize,
    red_before: usize,
    nir_after: usize,
    red_after: usize,
    no_data: Sample,
    /// Declared no-data of (NIR, red) per date
    input_no_data_before: (Option<Sample>, Option<Sample>),
    input_no_data_after: (Option<Sample>, Option<Sample>),
}

impl NdviDelta {
    /// Build from 1-based band indices
    pub fn new(before: NdviBands, after: NdviBands) -> ClearCutResult<Self> {
        for (name, index) in [
            ("NIR band (before)", before.nir),
            ("red band (before)", before.red),
            ("NIR band (after)", after.nir),
            ("red band (after)", after.red),
        ] {
            if index == 0 {
                return Err(ClearCutError::Configuration(format!(
                    "{} index must be >= 1 (band indices are 1-based)",
                    name
                )));
            }
        }

        Ok(Self {
            nir_before: before.nir - 1,
            red_before: before.red - 1,
            nir_after: after.nir - 1,
            red_after: after.red - 1,
            no_data: DELTA_NDVI_NO_DATA,
            input_no_data_before: (None, None),
            input_no_data_after: (None, None),
        })
    }

    pub fn with_no_data(mut self, no_data: Sample) -> Self {
        self.no_data = no_data;
        self
    }

    /// Treat (NIR, red) samples equal to these values as missing in the respective date
    pub fn with_input_no_data(
        mut self,
        before: (Option<Sample>, Option<Sample>),
        after: (Option<Sample>, Option<Sample>),
    ) -> Self {
        self.input_no_data_before = before;
        self.input_no_data_after = after;
        self
    }

    /// Take each NIR and red band's declared no-data from the rasters
    pub fn with_raster_no_data(self, before: &GeoRaster, after: &GeoRaster) -> Self {
        let before_no_data = (before.band_no_data(self.nir_before), before.band_no_data(self.red_before));
        let after_no_data = (after.band_no_data(self.nir_after), after.band_no_data(self.red_after));
        self.with_input_no_data(before_no_data, after_no_data)
    }

    pub fn no_data(&self) -> Sample {
        self.no_data
    }

    /// Fail when a band index exceeds the available band counts
    pub fn validate_band_count(&self, bands_before: usize, bands_after: usize) -> ClearCutResult<()> {
        let max_before = self.nir_before.max(self.red_before);
        let max_after = self.nir_after.max(self.red_after);
        if max_before >= bands_before {
            return Err(ClearCutError::Configuration(format!(
                "Band {} requested but the before raster has {} band(s)",
                max_before + 1,
                bands_before
            )));
        }
        if max_after >= bands_after {
            return Err(ClearCutError::Configuration(format!(
                "Band {} requested but the after raster has {} band(s)",
                max_after + 1,
                bands_after
            )));
        }
        Ok(())
    }

    /// dNDVI of one pixel given both dates' band vectors.
    ///
    /// Panics if a configured band is missing from a pixel; callers validate
    /// band counts up front.
    #[inline]
    pub fn compute(&self, before: &[Sample], after: &[Sample]) -> Sample {
        let nir0 = before[self.nir_before];
        let red0 = before[self.red_before];
        let nir1 = after[self.nir_after];
        let red1 = after[self.red_after];

        let valid = is_valid_sample(nir0, self.input_no_data_before.0)
            && is_valid_sample(red0, self.input_no_data_before.1)
            && is_valid_sample(nir1, self.input_no_data_after.0)
            && is_valid_sample(red1, self.input_no_data_after.1);
        if !valid {
            return self.no_data;
        }

        let (nir0, red0, nir1, red1) = (nir0 as f64, red0 as f64, nir1 as f64, red1 as f64);
        if (nir0 + red0).abs() > MIN_NDVI_DENOMINATOR && (nir1 + red1).abs() > MIN_NDVI_DENOMINATOR {
            ((nir1 - red1) / (nir1 + red1) - (nir0 - red0) / (nir0 + red0)) as Sample
        } else {
            self.no_data
        }
    }
}

/// Apply `delta` over two co-registered rasters, region by region
pub fn compute_delta_image(
    delta: &NdviDelta,
    before: &GeoRaster,
    after: &GeoRaster,
    partitioner: &RegionPartitioner,
    monitor: &ProgressMonitor,
) -> ClearCutResult<DeltaImage> {
    let (rows, cols) = (before.rows(), before.cols());
    if (after.rows(), after.cols()) != (rows, cols) {
        return Err(ClearCutError::Processing(format!(
            "Co-registered rasters differ in size: {}x{} vs {}x{}",
            rows,
            cols,
            after.rows(),
            after.cols()
        )));
    }
    delta.validate_band_count(before.band_count(), after.band_count())?;

    log::info!("Computing dNDVI over {}x{} pixels", rows, cols);

    let regions = partitioner.partition(rows, cols);
    let tiles = process_regions(&regions, monitor, |region| {
        let mut tile = Array2::from_elem((region.rows, region.cols), delta.no_data);
        let mut px_before = vec![0.0; before.band_count()];
        let mut px_after = vec![0.0; after.band_count()];
        for r in 0..region.rows {
            for c in 0..region.cols {
                let (row, col) = (region.row_offset + r, region.col_offset + c);
                for (b, v) in px_before.iter_mut().enumerate() {
                    *v = before.data[[b, row, col]];
                }
                for (b, v) in px_after.iter_mut().enumerate() {
                    *v = after.data[[b, row, col]];
                }
                tile[[r, c]] = delta.compute(&px_before, &px_after);
            }
        }
        Ok((*region, tile))
    })?;

    assemble_tiles(rows, cols, delta.no_data, tiles)
}

/// Rewrite pixels where `mask` is zero to `no_data`
pub fn apply_vegetation_mask(delta: &mut DeltaImage, mask: &Array2<u8>, no_data: Sample) -> ClearCutResult<()> {
    if delta.dim() != mask.dim() {
        return Err(ClearCutError::Configuration(format!(
            "Vegetation mask shape {:?} does not match dNDVI shape {:?}",
            mask.dim(),
            delta.dim()
        )));
    }
    ndarray::Zip::from(delta).and(mask).for_each(|d, &m| {
        if m == 0 {
            *d = no_data;
        }
    });
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::GeoTransform;
    use approx::assert_abs_diff_eq;
    use ndarray::Array3;

    fn bands(nir: usize, red: usize) -> NdviBands {
        NdviBands { nir, red }
    }

    #[test]
    fn test_equal_ndvi_gives_zero_delta() {
        let delta = NdviDelta::new(bands(1, 2), bands(1, 2)).unwrap();
        let value = delta.compute(&[200.0, 100.0], &[100.0, 50.0]);
        assert_abs_diff_eq!(value, 0.0, epsilon = 1e-6);
    }

    #[test]
    fn test_vegetation_loss_is_negative() {
        let delta = NdviDelta::new(bands(2, 1), bands(2, 1)).unwrap();
        // NDVI 0.6 -> 0.0
        let value = delta.compute(&[20.0, 80.0], &[50.0, 50.0]);
        assert_abs_diff_eq!(value, -0.6, epsilon = 1e-6);
    }

    #[test]
    fn test_zero_denominator_gives_no_data() {
        let delta = NdviDelta::new(bands(1, 2), bands(1, 2)).unwrap();
        assert_eq!(delta.compute(&[100.0, -100.0], &[100.0, 50.0]), DELTA_NDVI_NO_DATA);
        assert_eq!(delta.compute(&[100.0, 50.0], &[30.0, -30.0]), DELTA_NDVI_NO_DATA);

        let custom = delta.with_no_data(-9.0);
        assert_eq!(custom.compute(&[0.0, 0.0], &[1.0, 1.0]), -9.0);
    }

    #[test]
    fn test_input_no_data_gives_no_data() {
        let delta = NdviDelta::new(bands(1, 2), bands(1, 2))
            .unwrap()
            .with_input_no_data((Some(-10000.0), Some(-10000.0)), (None, None));
        assert_eq!(delta.compute(&[-10000.0, 50.0], &[100.0, 50.0]), DELTA_NDVI_NO_DATA);
        assert_eq!(delta.compute(&[100.0, 50.0], &[f32::NAN, 50.0]), DELTA_NDVI_NO_DATA);
    }

    #[test]
    fn test_no_data_is_read_per_band() {
        // Red (band 1) declares 0, NIR (band 2) declares 65535
        let gt = GeoTransform::north_up(0.0, 10.0, 10.0, -10.0);
        let mut raster = GeoRaster::new(Array3::from_elem((2, 1, 1), 1.0f32), gt);
        raster.no_data = vec![Some(0.0), Some(65535.0)];
        let delta = NdviDelta::new(bands(2, 1), bands(2, 1))
            .unwrap()
            .with_raster_no_data(&raster, &raster);

        // Red at 65535 and NIR at 0 are real data
        let value = delta.compute(&[65535.0, 0.0], &[65535.0, 0.0]);
        assert_abs_diff_eq!(value, 0.0, epsilon = 1e-6);

        assert_eq!(delta.compute(&[0.0, 100.0], &[50.0, 100.0]), DELTA_NDVI_NO_DATA);
        assert_eq!(delta.compute(&[50.0, 100.0], &[50.0, 65535.0]), DELTA_NDVI_NO_DATA);
    }

    #[test]
    fn test_band_index_validation() {
        assert!(NdviDelta::new(bands(0, 1), bands(4, 1)).is_err());

        let delta = NdviDelta::new(bands(4, 1), bands(4, 1)).unwrap();
        assert!(delta.validate_band_count(4, 4).is_ok());
        assert!(delta.validate_band_count(3, 4).is_err());
        assert!(delta.validate_band_count(4, 2).is_err());
    }

    #[test]
    fn test_delta_image_and_mask() {
        let gt = GeoTransform::north_up(0.0, 30.0, 10.0, -10.0);
        let mut before = Array3::from_elem((2, 3, 3), 0.0f32);
        before.index_axis_mut(ndarray::Axis(0), 0).fill(80.0); // red
        before.index_axis_mut(ndarray::Axis(0), 1).fill(20.0); // nir
        let after = before.clone();
        let before = GeoRaster::new(before, gt);
        let after = GeoRaster::new(after, gt);

        let delta = NdviDelta::new(bands(2, 1), bands(2, 1)).unwrap();
        let mut image = compute_delta_image(
            &delta,
            &before,
            &after,
            &RegionPartitioner::with_tile_size(2),
            &ProgressMonitor::new(),
        )
        .unwrap();
        assert!(image.iter().all(|&v| v.abs() < 1e-6));

        let mut mask = Array2::<u8>::ones((3, 3));
        mask[[1, 1]] = 0;
        apply_vegetation_mask(&mut image, &mask, DELTA_NDVI_NO_DATA).unwrap();
        assert_eq!(image[[1, 1]], DELTA_NDVI_NO_DATA);
        assert_eq!(image[[0, 0]], 0.0);

        assert!(apply_vegetation_mask(&mut image, &Array2::ones((2, 2)), DELTA_NDVI_NO_DATA).is_err());
    }
}
