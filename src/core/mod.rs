//! Core clear cut processing modules

pub mod tiling;
pub mod interpolation;
pub mod overlap;
pub mod resample;
pub mod delta_ndvi;
pub mod masking;
pub mod statistics;
pub mod labeler;
pub mod connectivity;
pub mod mosaic;
pub mod detection;
pub mod aggregation;

// Re-export main types
pub use tiling::{ProgressMonitor, Region, RegionPartitioner};
pub use interpolation::{InterpolationMethod, Interpolator, RasterInterpolator};
pub use overlap::{Acquisition, OverlapPlan, RegionOverlapResolver};
pub use resample::{resample_onto_grid, OutputGrid};
pub use delta_ndvi::{compute_delta_image, NdviBands, NdviDelta};
pub use masking::{apply_acquisition_mask, MaskProvider};
pub use statistics::{compute_statistics, StatisticsSummary};
pub use labeler::{DeltaLabeler, LabelerParams, ThresholdSet};
pub use connectivity::ConnectedLabelsFilter;
pub use mosaic::{AggregationMode, MosaicAggregator, MosaicParams};
pub use detection::{run_detection, DatedRaster, DetectionJob, DetectionParams, DetectionProduct, LabelVectorizer};
pub use aggregation::{aggregate, AggregationJob, AggregationParams};
