//! Clear cut detection between two dated acquisitions.
//!
//! Pipeline: optional acquisition masks → overlap → resample / extract → dNDVI
//! → optional vegetation mask → statistics (barrier) → labeling → connected
//! patch filtering.

use crate::core::connectivity::{ConnectedLabelsFilter, DEFAULT_MIN_COMPONENTS};
use crate::core::delta_ndvi::{apply_vegetation_mask, compute_delta_image, NdviBands, NdviDelta};
use crate::core::interpolation::InterpolationMethod;
use crate::core::labeler::{DeltaLabeler, LabelerParams, ThresholdSet};
use crate::core::masking::{apply_acquisition_mask, MaskProvider};
use crate::core::overlap::{Acquisition, RegionOverlapResolver};
use crate::core::resample::{resample_onto_grid, OutputGrid};
use crate::core::statistics::{compute_statistics, StatisticsSummary};
use crate::core::tiling::{ProgressMonitor, RegionPartitioner};
use crate::types::{
    ClearCutError, ClearCutResult, DeltaImage, GeoRaster, GeoTransform, LabelImage, Sample, DELTA_NDVI_NO_DATA,
    LABEL_NO_DATA,
};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Detection parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectionParams {
    /// Bands of the earlier acquisition (1-based)
    pub before_bands: NdviBands,
    /// Bands of the later acquisition (1-based)
    pub after_bands: NdviBands,
    /// Patches of at most this many pixels are removed, in [1, 100]
    pub min_number_of_components: usize,
    pub number_of_classes: usize,
    pub first_class_start: i32,
    pub first_class_value: u8,
    /// dNDVI no-data sentinel
    pub delta_no_data: Sample,
    /// Label no-data value
    pub label_no_data: u8,
    /// Memory budget used to size processing regions
    pub ram_budget_mb: usize,
}

impl Default for DetectionParams {
    fn default() -> Self {
        Self {
            before_bands: NdviBands::default(),
            after_bands: NdviBands::default(),
            min_number_of_components: DEFAULT_MIN_COMPONENTS,
            number_of_classes: 2,  // label 0: no significant change, label 1: clear cut
            first_class_start: 3,  // clear cut below µ - 3σ
            first_class_value: 0,
            delta_no_data: DELTA_NDVI_NO_DATA,
            label_no_data: LABEL_NO_DATA,
            ram_budget_mb: 256,
        }
    }
}

impl DetectionParams {
    pub fn validate(&self) -> ClearCutResult<()> {
        NdviDelta::new(self.before_bands, self.after_bands)?;
        ConnectedLabelsFilter::new(self.min_number_of_components, self.label_no_data)?;
        if self.number_of_classes == 0 {
            return Err(ClearCutError::Configuration(
                "Number of classes must be at least 1".to_string(),
            ));
        }
        if self.delta_no_data.abs() <= 2.0 {
            log::warn!(
                "dNDVI no-data value {} lies inside the valid [-2, 2] range",
                self.delta_no_data
            );
        }
        Ok(())
    }

    pub fn labeler_params(&self) -> LabelerParams {
        LabelerParams {
            number_of_classes: self.number_of_classes,
            first_class_start: self.first_class_start,
            first_class_value: self.first_class_value,
            input_no_data: self.delta_no_data,
            output_no_data: self.label_no_data,
        }
    }

    /// Partitioner sized for the widest intermediate (multi-band input pixels)
    pub fn partitioner(&self, bands: usize) -> RegionPartitioner {
        let bytes_per_pixel = (bands.max(1) * 2 + 1) * std::mem::size_of::<Sample>();
        RegionPartitioner::from_memory_budget(self.ram_budget_mb, bytes_per_pixel)
    }
}

/// Everything produced by a detection run
#[derive(Debug, Clone)]
pub struct DetectionProduct {
    /// Grid shared by every output image
    pub geo_transform: GeoTransform,
    /// WKT of the reference acquisition, if known
    pub projection: Option<String>,
    /// Which acquisition was resampled onto the other's grid
    pub resampled: Acquisition,
    pub delta: DeltaImage,
    pub statistics: StatisticsSummary,
    pub thresholds: ThresholdSet,
    /// Labels before connected patch filtering
    pub raw_labels: LabelImage,
    /// Final labels
    pub labels: LabelImage,
    pub label_no_data: u8,
}

impl DetectionProduct {
    /// Number of final pixels carrying `label`
    pub fn count_label(&self, label: u8) -> usize {
        self.labels.iter().filter(|&&l| l == label).count()
    }
}

/// Run detection on in-memory rasters.
///
/// `vegetation_mask` is resampled onto the dNDVI grid; zero or uncovered mask
/// pixels are excluded from statistics and labeling.
pub fn run_detection(
    before: Arc<GeoRaster>,
    after: Arc<GeoRaster>,
    vegetation_mask: Option<Arc<GeoRaster>>,
    params: &DetectionParams,
    monitor: &ProgressMonitor,
) -> ClearCutResult<DetectionProduct> {
    params.validate()?;
    log::info!("🌲 Starting clear cut detection");
    log::debug!("Detection parameters: {:?}", params);

    let delta_op = NdviDelta::new(params.before_bands, params.after_bands)?
        .with_no_data(params.delta_no_data)
        .with_raster_no_data(&before, &after);
    delta_op.validate_band_count(before.band_count(), after.band_count())?;

    let partitioner = params.partitioner(before.band_count().max(after.band_count()));

    let projection = before.projection.clone().or_else(|| after.projection.clone());

    // Step 1: co-register on the finer grid
    let plan = RegionOverlapResolver::resolve(&before, &after)?;
    let grid = OutputGrid::new(plan.grid_transform, plan.rows(), plan.cols());
    let (before_grid, after_grid) = match plan.resampled {
        Acquisition::Before => (
            resample_onto_grid(before, &grid, InterpolationMethod::NearestNeighbor, &partitioner, monitor)?,
            RegionOverlapResolver::extract(&after, &plan.extract_region),
        ),
        Acquisition::After => (
            RegionOverlapResolver::extract(&before, &plan.extract_region),
            resample_onto_grid(after, &grid, InterpolationMethod::NearestNeighbor, &partitioner, monitor)?,
        ),
    };

    // Step 2: dNDVI
    let mut delta = compute_delta_image(&delta_op, &before_grid, &after_grid, &partitioner, monitor)?;
    drop(before_grid);
    drop(after_grid);

    if let Some(mask) = vegetation_mask {
        log::info!("Using vegetation mask");
        let mask_grid = resample_onto_grid(mask, &grid, InterpolationMethod::NearestNeighbor, &partitioner, monitor)?;
        let mask_band = mask_grid.band(0).mapv(|v| u8::from(v.is_finite() && v != 0.0));
        apply_vegetation_mask(&mut delta, &mask_band, params.delta_no_data)?;
    }

    // Step 3: statistics over the whole raster before any labeling
    let statistics = compute_statistics(delta.view(), Some(params.delta_no_data), &partitioner, monitor)?;

    // Step 4: labels
    let labeler = DeltaLabeler::from_statistics(&statistics, &params.labeler_params())?;
    let raw_labels = labeler.label_image(delta.view(), &partitioner, monitor)?;

    // Step 5: remove small patches
    let filter = ConnectedLabelsFilter::new(params.min_number_of_components, params.label_no_data)?;
    let labels = filter.filter_image(raw_labels.view(), &partitioner, monitor)?;

    let product = DetectionProduct {
        geo_transform: plan.grid_transform,
        projection,
        resampled: plan.resampled,
        delta,
        statistics,
        thresholds: labeler.thresholds().clone(),
        raw_labels,
        labels,
        label_no_data: params.label_no_data,
    };

    let top_label = *product.thresholds.values().last().unwrap_or(&params.first_class_value);
    log::info!(
        "✅ Detection completed: {} pixel(s) in class {}",
        product.count_label(top_label),
        top_label
    );
    Ok(product)
}

/// Sink for the final label raster, typically a polygonizer provided by the caller
pub trait LabelVectorizer {
    fn vectorize(&mut self, product: &DetectionProduct, output: &Path) -> ClearCutResult<()>;
}

/// One acquisition on disk
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatedRaster {
    pub path: PathBuf,
    pub acquired: Option<NaiveDate>,
}

impl DatedRaster {
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        Self {
            path: path.into(),
            acquired: None,
        }
    }

    pub fn acquired_on(mut self, date: NaiveDate) -> Self {
        self.acquired = Some(date);
        self
    }
}

/// File-based detection job
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectionJob {
    pub before: DatedRaster,
    pub after: DatedRaster,
    /// Mask layer restricting the before acquisition
    pub before_mask: Option<PathBuf>,
    /// Mask layer restricting the after acquisition
    pub after_mask: Option<PathBuf>,
    /// Directory of vegetation mask rasters, mosaicked onto the dNDVI grid
    pub masks_dir: Option<PathBuf>,
    /// Vector output handed to the vectorizer
    pub output: PathBuf,
    pub params: DetectionParams,
}

impl DetectionJob {
    /// Job without masks and with default parameters
    pub fn new<P: Into<PathBuf>>(before: DatedRaster, after: DatedRaster, output: P) -> Self {
        Self {
            before,
            after,
            before_mask: None,
            after_mask: None,
            masks_dir: None,
            output: output.into(),
            params: DetectionParams::default(),
        }
    }

    /// Check preconditions that need no raster access
    pub fn validate(&self) -> ClearCutResult<()> {
        self.params.validate()?;
        if let (Some(before), Some(after)) = (self.before.acquired, self.after.acquired) {
            if before >= after {
                log::warn!(
                    "Before acquisition ({}) is not earlier than after acquisition ({})",
                    before,
                    after
                );
            }
        }
        Ok(())
    }

    /// Apply the job's masks to loaded acquisitions, then detect
    pub fn detect(
        &self,
        before: GeoRaster,
        after: GeoRaster,
        masks: &mut dyn MaskProvider,
        monitor: &ProgressMonitor,
    ) -> ClearCutResult<DetectionProduct> {
        self.validate()?;
        let before = masked(before, self.before_mask.as_deref(), masks)?;
        let after = masked(after, self.after_mask.as_deref(), masks)?;

        let vegetation_mask = match &self.masks_dir {
            Some(dir) => {
                log::info!("Building vegetation mask from {}", dir.display());
                let plan = RegionOverlapResolver::resolve(&before, &after)?;
                let grid = OutputGrid::new(plan.grid_transform, plan.rows(), plan.cols());
                Some(Arc::new(masks.vegetation_mask(dir, &grid)?))
            }
            None => None,
        };

        run_detection(Arc::new(before), Arc::new(after), vegetation_mask, &self.params, monitor)
    }

    /// Load rasters, detect, and hand the labels to `vectorizer`
    #[cfg(feature = "gdal")]
    pub fn execute(
        &self,
        masks: &mut dyn MaskProvider,
        vectorizer: &mut dyn LabelVectorizer,
        monitor: &ProgressMonitor,
    ) -> ClearCutResult<DetectionProduct> {
        use crate::io::raster::read_raster;

        let before = read_raster(&self.before.path)?;
        let after = read_raster(&self.after.path)?;

        let product = self.detect(before, after, masks, monitor)?;
        vectorizer.vectorize(&product, &self.output)?;
        Ok(product)
    }
}

fn masked(raster: GeoRaster, layer: Option<&Path>, masks: &mut dyn MaskProvider) -> ClearCutResult<GeoRaster> {
    match layer {
        Some(layer) => {
            log::info!("Masking acquisition with {}", layer.display());
            let mask = masks.acquisition_mask(layer, &raster)?;
            apply_acquisition_mask(&raster, &mask)
        }
        None => Ok(raster),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{Array2, Array3};

    /// Four-band rasters (red = band 1, NIR = band 4) with uniform vegetation
    fn scene(rows: usize, cols: usize) -> Array3<Sample> {
        let mut data = Array3::from_elem((4, rows, cols), 0.0);
        for r in 0..rows {
            for c in 0..cols {
                // Small deterministic texture keeps σ non-zero
                let jitter = ((r * 7 + c * 3) % 5) as f32;
                data[[0, r, c]] = 40.0 + jitter;
                data[[3, r, c]] = 200.0;
            }
        }
        data
    }

    #[test]
    fn test_detects_cut_block_and_removes_salt() {
        let gt = GeoTransform::north_up(0.0, 400.0, 10.0, -10.0);
        let before = scene(40, 40);
        let mut after = before.clone();

        // 6x6 clear cut: red up, NIR down
        for r in 10..16 {
            for c in 10..16 {
                after[[0, r, c]] = 120.0;
                after[[3, r, c]] = 60.0;
            }
        }
        // Single-pixel cut, too small to survive filtering
        after[[0, 30, 30]] = 120.0;
        after[[3, 30, 30]] = 60.0;

        let params = DetectionParams {
            min_number_of_components: 5,
            ram_budget_mb: 1,
            ..DetectionParams::default()
        };
        let product = run_detection(
            Arc::new(GeoRaster::new(before, gt)),
            Arc::new(GeoRaster::new(after, gt)),
            None,
            &params,
            &ProgressMonitor::new(),
        )
        .unwrap();

        assert_eq!(product.labels.dim(), (40, 40));
        assert_eq!(product.raw_labels[[30, 30]], 1);
        assert_eq!(product.labels[[30, 30]], 0);
        assert_eq!(product.labels[[12, 12]], 1);
        assert_eq!(product.count_label(1), 36);
    }

    #[test]
    fn test_vegetation_mask_excludes_pixels() {
        let gt = GeoTransform::north_up(0.0, 200.0, 10.0, -10.0);
        let before = scene(20, 20);
        let after = before.clone();
        let mut mask = Array2::<f32>::ones((20, 20));
        mask.row_mut(0).fill(0.0);

        let product = run_detection(
            Arc::new(GeoRaster::new(before, gt)),
            Arc::new(GeoRaster::new(after, gt)),
            Some(Arc::new(GeoRaster::from_band(mask, gt))),
            &DetectionParams::default(),
            &ProgressMonitor::new(),
        )
        .unwrap();

        assert_eq!(product.statistics.count, 19 * 20);
        assert!(product.delta.row(0).iter().all(|&v| v == DELTA_NDVI_NO_DATA));
    }

    /// Serves fixed in-memory masks and records what was asked for
    #[derive(Default)]
    struct FixedMasks {
        acquisition: Option<Array2<f32>>,
        vegetation: Option<Array2<f32>>,
        layers: Vec<PathBuf>,
        grids: Vec<(usize, usize)>,
    }

    impl MaskProvider for FixedMasks {
        fn acquisition_mask(&mut self, layer: &Path, reference: &GeoRaster) -> ClearCutResult<GeoRaster> {
            self.layers.push(layer.to_path_buf());
            let mask = self
                .acquisition
                .clone()
                .ok_or_else(|| ClearCutError::Configuration("no acquisition mask".to_string()))?;
            Ok(GeoRaster::from_band(mask, reference.geo_transform))
        }

        fn vegetation_mask(&mut self, _dir: &Path, grid: &OutputGrid) -> ClearCutResult<GeoRaster> {
            self.grids.push((grid.rows, grid.cols));
            let mask = self
                .vegetation
                .clone()
                .ok_or_else(|| ClearCutError::Configuration("no vegetation mask".to_string()))?;
            Ok(GeoRaster::from_band(mask, grid.geo_transform))
        }
    }

    fn cut_scenes(gt: GeoTransform) -> (GeoRaster, GeoRaster) {
        let before = scene(20, 20);
        let mut after = before.clone();
        for r in 10..16 {
            for c in 10..16 {
                after[[0, r, c]] = 120.0;
                after[[3, r, c]] = 60.0;
            }
        }
        (GeoRaster::new(before, gt), GeoRaster::new(after, gt))
    }

    #[test]
    fn test_acquisition_mask_excludes_pixels() {
        let gt = GeoTransform::north_up(0.0, 200.0, 10.0, -10.0);
        let (before, after) = cut_scenes(gt);

        // Upper half of the cut lies outside the after mask
        let mut mask = Array2::<f32>::ones((20, 20));
        mask.slice_mut(ndarray::s![10..13, 10..16]).fill(0.0);
        let mut masks = FixedMasks {
            acquisition: Some(mask),
            ..FixedMasks::default()
        };

        let mut job = DetectionJob::new(DatedRaster::new("before.tif"), DatedRaster::new("after.tif"), "out.tif");
        job.after_mask = Some(PathBuf::from("after_mask.shp"));
        job.params.min_number_of_components = 5;
        let product = job.detect(before, after, &mut masks, &ProgressMonitor::new()).unwrap();

        assert_eq!(masks.layers, vec![PathBuf::from("after_mask.shp")]);
        assert_eq!(product.labels.dim(), (20, 20));
        assert_eq!(product.statistics.count, 400 - 18);
        assert_eq!(product.delta[[11, 12]], DELTA_NDVI_NO_DATA);
        assert_eq!(product.labels[[11, 12]], product.label_no_data);
        assert_eq!(product.labels[[14, 12]], 1);
        assert_eq!(product.count_label(1), 18);
    }

    #[test]
    fn test_acquisition_mask_crops_to_covered_area() {
        let gt = GeoTransform::north_up(0.0, 200.0, 10.0, -10.0);
        let (before, after) = cut_scenes(gt);

        let mut mask = Array2::<f32>::zeros((20, 20));
        mask.slice_mut(ndarray::s![.., 0..12]).fill(1.0);
        let mut masks = FixedMasks {
            acquisition: Some(mask),
            ..FixedMasks::default()
        };

        let mut job = DetectionJob::new(DatedRaster::new("before.tif"), DatedRaster::new("after.tif"), "out.tif");
        job.before_mask = Some(PathBuf::from("before_mask.shp"));
        job.params.min_number_of_components = 5;
        let product = job.detect(before, after, &mut masks, &ProgressMonitor::new()).unwrap();

        assert_eq!(product.labels.dim(), (20, 12));
        assert_eq!(product.geo_transform.top_left_x, 0.0);
        assert_eq!(product.count_label(1), 12);
    }

    #[test]
    fn test_masks_dir_builds_vegetation_mask_on_detection_grid() {
        let gt = GeoTransform::north_up(0.0, 200.0, 10.0, -10.0);
        let (before, after) = cut_scenes(gt);

        let mut vegetation = Array2::<f32>::ones((20, 20));
        vegetation.row_mut(0).fill(0.0);
        let mut masks = FixedMasks {
            vegetation: Some(vegetation),
            ..FixedMasks::default()
        };

        let mut job = DetectionJob::new(DatedRaster::new("before.tif"), DatedRaster::new("after.tif"), "out.tif");
        job.masks_dir = Some(PathBuf::from("masks"));
        let product = job.detect(before, after, &mut masks, &ProgressMonitor::new()).unwrap();

        assert_eq!(masks.grids, vec![(20, 20)]);
        assert!(masks.layers.is_empty());
        assert_eq!(product.statistics.count, 19 * 20);
        assert!(product.delta.row(0).iter().all(|&v| v == DELTA_NDVI_NO_DATA));
    }

    #[test]
    fn test_no_data_is_taken_from_each_band() {
        let gt = GeoTransform::north_up(0.0, 200.0, 10.0, -10.0);
        let (mut before, after) = cut_scenes(gt);
        // Red (band 1) and NIR (band 4) declare different no-data values
        before.no_data = vec![Some(-1.0), None, None, Some(-2.0)];
        before.data[[3, 0, 0]] = -2.0;
        before.data[[0, 0, 1]] = -1.0;

        let product = run_detection(
            Arc::new(before),
            Arc::new(after),
            None,
            &DetectionParams::default(),
            &ProgressMonitor::new(),
        )
        .unwrap();

        assert_eq!(product.delta[[0, 0]], DELTA_NDVI_NO_DATA);
        assert_eq!(product.delta[[0, 1]], DELTA_NDVI_NO_DATA);
        assert_eq!(product.statistics.count, 400 - 2);
    }

    #[test]
    fn test_invalid_parameters_are_rejected() {
        let mut params = DetectionParams::default();
        params.min_number_of_components = 0;
        assert!(params.validate().is_err());

        let mut params = DetectionParams::default();
        params.before_bands.nir = 0;
        assert!(params.validate().is_err());

        let gt = GeoTransform::north_up(0.0, 20.0, 10.0, -10.0);
        let two_bands = Arc::new(GeoRaster::new(Array3::zeros((2, 2, 2)), gt));
        let err = run_detection(
            two_bands.clone(),
            two_bands,
            None,
            &DetectionParams::default(),
            &ProgressMonitor::new(),
        )
        .unwrap_err();
        assert!(matches!(err, ClearCutError::Configuration(_)));
    }
}
