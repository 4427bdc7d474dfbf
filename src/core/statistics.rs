use crate::core::tiling::{process_regions, ProgressMonitor, Region, RegionPartitioner};
use crate::types::{is_valid_sample, ClearCutResult, Sample};
use ndarray::{s, ArrayView2};
use serde::{Deserialize, Serialize};

/// Streaming first and second moments over valid pixels
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct StatisticsSummary {
    pub count: u64,
    pub sum: f64,
    pub sum_of_squares: f64,
}

impl StatisticsSummary {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn push(&mut self, value: f64) {
        self.count += 1;
        self.sum += value;
        self.sum_of_squares += value * value;
    }

    /// Accumulate the valid samples of an image view
    pub fn accumulate(&mut self, view: ArrayView2<'_, Sample>, no_data: Option<Sample>) {
        for &v in view.iter() {
            if is_valid_sample(v, no_data) {
                self.push(v as f64);
            }
        }
    }

    /// Combine two partial summaries; associative and commutative
    pub fn merge(self, other: StatisticsSummary) -> StatisticsSummary {
        StatisticsSummary {
            count: self.count + other.count,
            sum: self.sum + other.sum,
            sum_of_squares: self.sum_of_squares + other.sum_of_squares,
        }
    }

    pub fn mean(&self) -> Option<f64> {
        if self.count == 0 {
            None
        } else {
            Some(self.sum / self.count as f64)
        }
    }

    /// Population variance, clamped at zero against rounding
    pub fn variance(&self) -> Option<f64> {
        let mean = self.mean()?;
        Some((self.sum_of_squares / self.count as f64 - mean * mean).max(0.0))
    }

    pub fn std_dev(&self) -> Option<f64> {
        self.variance().map(f64::sqrt)
    }
}

/// Full statistics pass over `image`, excluding no-data and NaN.
///
/// Returns only once every region has been merged.
pub fn compute_statistics(
    image: ArrayView2<'_, Sample>,
    no_data: Option<Sample>,
    partitioner: &RegionPartitioner,
    monitor: &ProgressMonitor,
) -> ClearCutResult<StatisticsSummary> {
    let (rows, cols) = image.dim();
    let regions = partitioner.partition(rows, cols);
    let partials = process_regions(&regions, monitor, |region: &Region| {
        let mut partial = StatisticsSummary::new();
        partial.accumulate(
            image.slice(s![region.row_offset..region.row_end(), region.col_offset..region.col_end()]),
            no_data,
        );
        Ok(partial)
    })?;

    let summary = partials
        .into_iter()
        .fold(StatisticsSummary::new(), StatisticsSummary::merge);

    log::info!(
        "Statistics over {} valid pixels: mean={:?}, std={:?}",
        summary.count,
        summary.mean(),
        summary.std_dev()
    );
    Ok(summary)
}
