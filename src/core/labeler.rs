//! Quantization of dNDVI values into ordered change classes.
//!
//! With mean µ, standard deviation σ and first class start f, class
//! boundaries are `t[i] = µ - (i + f)·σ` and class values `v0 + i`:
//!
//! ```text
//! class 0      : ] t[0], +inf [
//! class i      : ] t[i], t[i-1] ]        for 0 < i < k-1
//! class k-1    : ] -inf, t[k-1] ]
//! ```

use crate::core::statistics::StatisticsSummary;
use crate::core::tiling::{assemble_tiles, process_regions, ProgressMonitor, RegionPartitioner};
use crate::types::{ClearCutError, ClearCutResult, LabelImage, Sample, DELTA_NDVI_NO_DATA, LABEL_NO_DATA};
use ndarray::{Array2, ArrayView2};
use serde::{Deserialize, Serialize};

/// Class layout of the labeler
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LabelerParams {
    /// Number of classes (k)
    pub number_of_classes: usize,
    /// Sigma multiplier of the first boundary (f)
    pub first_class_start: i32,
    /// Label of the first class (v0)
    pub first_class_value: u8,
    /// dNDVI no-data sentinel
    pub input_no_data: Sample,
    /// Label written for no-data input
    pub output_no_data: u8,
}

impl Default for LabelerParams {
    fn default() -> Self {
        Self {
            number_of_classes: 4,   // no change, low, medium-high, very high
            first_class_start: 1,   // first boundary at µ - σ
            first_class_value: 1,
            input_no_data: DELTA_NDVI_NO_DATA,
            output_no_data: LABEL_NO_DATA,
        }
    }
}

/// Thresholds and label values derived once from a finished statistics pass
#[derive(Debug, Clone, PartialEq)]
pub struct ThresholdSet {
    thresholds: Vec<Sample>,
    values: Vec<u8>,
}

impl ThresholdSet {
    pub fn new(
        mean: f64,
        sigma: f64,
        number_of_classes: usize,
        first_class_start: i32,
        first_class_value: u8,
    ) -> ClearCutResult<Self> {
        if number_of_classes == 0 {
            return Err(ClearCutError::Configuration(
                "Number of classes must be at least 1".to_string(),
            ));
        }
        if !mean.is_finite() || !sigma.is_finite() {
            return Err(ClearCutError::Statistics(format!(
                "Non-finite statistics: mean={}, sigma={}",
                mean, sigma
            )));
        }

        let mut thresholds = Vec::with_capacity(number_of_classes);
        let mut values = Vec::with_capacity(number_of_classes);
        for i in 0..number_of_classes {
            // Narrow to the raster sample type so comparisons match pixel precision
            let threshold = (mean - (i as f64 + first_class_start as f64) * sigma) as Sample;
            let value = u8::try_from(i)
                .ok()
                .and_then(|i| first_class_value.checked_add(i))
                .ok_or_else(|| {
                    ClearCutError::Configuration(format!(
                        "Label of class {} overflows u8 (first class value {})",
                        i, first_class_value
                    ))
                })?;
            thresholds.push(threshold);
            values.push(value);
        }

        Ok(Self { thresholds, values })
    }

    /// Build from a merged statistics summary
    pub fn from_statistics(summary: &StatisticsSummary, params: &LabelerParams) -> ClearCutResult<Self> {
        let (mean, sigma) = match (summary.mean(), summary.std_dev()) {
            (Some(m), Some(s)) => (m, s),
            _ => {
                return Err(ClearCutError::Statistics(
                    "No valid dNDVI pixels to derive class thresholds from".to_string(),
                ))
            }
        };
        if sigma == 0.0 {
            log::warn!("dNDVI standard deviation is zero; all class boundaries collapse to the mean");
        }
        Self::new(
            mean,
            sigma,
            params.number_of_classes,
            params.first_class_start,
            params.first_class_value,
        )
    }

    pub fn thresholds(&self) -> &[Sample] {
        &self.thresholds
    }

    pub fn values(&self) -> &[u8] {
        &self.values
    }

    /// Class value of a valid sample
    #[inline]
    pub fn classify(&self, x: Sample) -> u8 {
        let k = self.thresholds.len();
        if x > self.thresholds[0] {
            return self.values[0];
        }
        if x <= self.thresholds[k - 1] {
            return self.values[k - 1];
        }
        // Here t[k-1] < x <= t[0], so k >= 2 and exactly one interval matches
        for i in 0..k - 1 {
            if self.thresholds[i + 1] < x && x <= self.thresholds[i] {
                return self.values[i + 1];
            }
        }
        self.values[k - 1]
    }
}

/// Per-pixel labeler over a dNDVI raster
#[derive(Debug, Clone)]
pub struct DeltaLabeler {
    thresholds: ThresholdSet,
    input_no_data: Sample,
    output_no_data: u8,
}

impl DeltaLabeler {
    pub fn new(thresholds: ThresholdSet, input_no_data: Sample, output_no_data: u8) -> Self {
        Self {
            thresholds,
            input_no_data,
            output_no_data,
        }
    }

    /// Labeler for a finished statistics pass
    pub fn from_statistics(summary: &StatisticsSummary, params: &LabelerParams) -> ClearCutResult<Self> {
        let thresholds = ThresholdSet::from_statistics(summary, params)?;
        log::debug!(
            "Class thresholds {:?} -> labels {:?}",
            thresholds.thresholds(),
            thresholds.values()
        );
        Ok(Self::new(thresholds, params.input_no_data, params.output_no_data))
    }

    pub fn thresholds(&self) -> &ThresholdSet {
        &self.thresholds
    }

    pub fn output_no_data(&self) -> u8 {
        self.output_no_data
    }

    #[inline]
    pub fn label(&self, x: Sample) -> u8 {
        if x.is_nan() || x == self.input_no_data {
            self.output_no_data
        } else {
            self.thresholds.classify(x)
        }
    }

    /// Label a whole dNDVI image region by region
    pub fn label_image(
        &self,
        delta: ArrayView2<'_, Sample>,
        partitioner: &RegionPartitioner,
        monitor: &ProgressMonitor,
    ) -> ClearCutResult<LabelImage> {
        let (rows, cols) = delta.dim();
        log::info!("Labeling {}x{} dNDVI pixels into {} classes", rows, cols, self.thresholds.values.len());

        let regions = partitioner.partition(rows, cols);
        let tiles = process_regions(&regions, monitor, |region| {
            let tile = Array2::from_shape_fn((region.rows, region.cols), |(r, c)| {
                self.label(delta[[region.row_offset + r, region.col_offset + c]])
            });
            Ok((*region, tile))
        })?;
        assemble_tiles(rows, cols, self.output_no_data, tiles)
    }
}
