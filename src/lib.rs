//! clearcut: clear cut detection and label mosaicking for multispectral rasters
//!
//! Two dated acquisitions are co-registered on the finer grid, differenced as
//! dNDVI, thresholded into change classes from the global mean and standard
//! deviation, and cleaned of small connected patches. Label rasters from
//! several runs can then be mosaicked with a max or mean reducer.

pub mod types;
pub mod core;
#[cfg(feature = "gdal")]
pub mod io;

// Re-export main types and functions for easier access
pub use types::{
    BoundingBox, ClearCutError, ClearCutResult, DeltaImage, GeoPoint, GeoRaster, GeoTransform, LabelImage,
    MultiBandImage, Sample, DELTA_NDVI_NO_DATA, LABEL_NO_DATA,
};

pub use crate::core::{
    aggregate, run_detection, AggregationJob, AggregationMode, AggregationParams, DetectionJob, DetectionParams,
    DetectionProduct, MaskProvider, ProgressMonitor,
};

#[cfg(feature = "gdal")]
pub use io::{read_raster, write_label_raster, write_raster, RasterMaskProvider};

#[cfg(feature = "python")]
mod python {
    use crate::core::connectivity::ConnectedLabelsFilter;
    use crate::core::delta_ndvi::{compute_delta_image, NdviBands, NdviDelta};
    use crate::core::labeler::{DeltaLabeler, LabelerParams};
    use crate::core::statistics::compute_statistics;
    use crate::core::tiling::{ProgressMonitor, RegionPartitioner};
    use crate::types::{ClearCutError, GeoRaster, GeoTransform};
    use numpy::{IntoPyArray, PyArray2, PyReadonlyArray2, PyReadonlyArray3};
    use pyo3::prelude::*;

    fn to_py_err(e: ClearCutError) -> PyErr {
        match e {
            ClearCutError::Configuration(_) => PyErr::new::<pyo3::exceptions::PyValueError, _>(format!("{}", e)),
            _ => PyErr::new::<pyo3::exceptions::PyRuntimeError, _>(format!("{}", e)),
        }
    }

    /// dNDVI of two co-registered (bands, rows, cols) stacks; band indices are 1-based
    #[pyfunction]
    #[pyo3(signature = (before, after, nir_before=4, red_before=1, nir_after=4, red_after=1, no_data=3.0))]
    fn delta_ndvi<'py>(
        py: Python<'py>,
        before: PyReadonlyArray3<'py, f32>,
        after: PyReadonlyArray3<'py, f32>,
        nir_before: usize,
        red_before: usize,
        nir_after: usize,
        red_after: usize,
        no_data: f32,
    ) -> PyResult<&'py PyArray2<f32>> {
        let gt = GeoTransform::north_up(0.0, 0.0, 1.0, -1.0);
        let before = GeoRaster::new(before.as_array().to_owned(), gt);
        let after = GeoRaster::new(after.as_array().to_owned(), gt);

        let delta = NdviDelta::new(
            NdviBands { nir: nir_before, red: red_before },
            NdviBands { nir: nir_after, red: red_after },
        )
        .map_err(to_py_err)?
        .with_no_data(no_data);

        let image = py
            .allow_threads(|| {
                compute_delta_image(&delta, &before, &after, &RegionPartitioner::default(), &ProgressMonitor::new())
            })
            .map_err(to_py_err)?;
        Ok(image.into_pyarray(py))
    }

    /// Label a dNDVI image; returns the labels and the class thresholds
    #[pyfunction]
    #[pyo3(signature = (delta, number_of_classes=4, first_class_start=1, first_class_value=1, input_no_data=3.0, output_no_data=0))]
    fn label_delta<'py>(
        py: Python<'py>,
        delta: PyReadonlyArray2<'py, f32>,
        number_of_classes: usize,
        first_class_start: i32,
        first_class_value: u8,
        input_no_data: f32,
        output_no_data: u8,
    ) -> PyResult<(&'py PyArray2<u8>, Vec<f32>)> {
        let params = LabelerParams {
            number_of_classes,
            first_class_start,
            first_class_value,
            input_no_data,
            output_no_data,
        };
        let delta = delta.as_array().to_owned();

        let (labels, thresholds) = py
            .allow_threads(|| {
                let partitioner = RegionPartitioner::default();
                let monitor = ProgressMonitor::new();
                let summary = compute_statistics(delta.view(), Some(input_no_data), &partitioner, &monitor)?;
                let labeler = DeltaLabeler::from_statistics(&summary, &params)?;
                let labels = labeler.label_image(delta.view(), &partitioner, &monitor)?;
                Ok::<_, ClearCutError>((labels, labeler.thresholds().thresholds().to_vec()))
            })
            .map_err(to_py_err)?;
        Ok((labels.into_pyarray(py), thresholds))
    }

    /// Remove connected label patches of at most `min_number_of_components` pixels
    #[pyfunction]
    #[pyo3(signature = (labels, min_number_of_components=10, no_data=0))]
    fn filter_connected_labels<'py>(
        py: Python<'py>,
        labels: PyReadonlyArray2<'py, u8>,
        min_number_of_components: usize,
        no_data: u8,
    ) -> PyResult<&'py PyArray2<u8>> {
        let filter = ConnectedLabelsFilter::new(min_number_of_components, no_data).map_err(to_py_err)?;
        let labels = labels.as_array().to_owned();
        let filtered = py
            .allow_threads(|| filter.filter_image(labels.view(), &RegionPartitioner::default(), &ProgressMonitor::new()))
            .map_err(to_py_err)?;
        Ok(filtered.into_pyarray(py))
    }

    /// Mosaic label rasters on disk into one output raster
    #[cfg(feature = "gdal")]
    #[pyfunction]
    #[pyo3(signature = (inputs, output, mode="max", interpolation="nn", output_no_data=0.0))]
    fn aggregate_files(
        py: Python<'_>,
        inputs: Vec<String>,
        output: String,
        mode: &str,
        interpolation: &str,
        output_no_data: f32,
    ) -> PyResult<()> {
        let mut params = crate::core::aggregation::AggregationParams::with_mode_name(mode).map_err(to_py_err)?;
        params.interpolation = interpolation.parse().map_err(to_py_err)?;
        params.output_no_data = output_no_data;

        let job = crate::core::aggregation::AggregationJob {
            inputs: inputs.into_iter().map(Into::into).collect(),
            output: output.into(),
            params,
        };
        py.allow_threads(|| job.execute(&ProgressMonitor::new()))
            .map_err(to_py_err)?;
        Ok(())
    }

    /// Detect clear cuts between two rasters on disk and write the label GeoTIFF.
    ///
    /// Returns the class thresholds and the number of labeled pixels.
    #[cfg(feature = "gdal")]
    #[pyfunction]
    #[pyo3(signature = (
        before,
        after,
        output,
        before_mask=None,
        after_mask=None,
        masks_dir=None,
        min_number_of_components=10
    ))]
    fn detect_clear_cuts(
        py: Python<'_>,
        before: String,
        after: String,
        output: String,
        before_mask: Option<String>,
        after_mask: Option<String>,
        masks_dir: Option<String>,
        min_number_of_components: usize,
    ) -> PyResult<(Vec<f32>, usize)> {
        use crate::core::detection::{DatedRaster, DetectionJob, DetectionParams};
        use crate::io::{GeoTiffLabelWriter, RasterMaskProvider};

        let job = DetectionJob {
            before: DatedRaster::new(before),
            after: DatedRaster::new(after),
            before_mask: before_mask.map(Into::into),
            after_mask: after_mask.map(Into::into),
            masks_dir: masks_dir.map(Into::into),
            output: output.into(),
            params: DetectionParams {
                min_number_of_components,
                ..DetectionParams::default()
            },
        };

        let monitor = ProgressMonitor::new();
        let mut masks = RasterMaskProvider::new(job.params.partitioner(1)).with_monitor(monitor.clone());
        let product = py
            .allow_threads(|| job.execute(&mut masks, &mut GeoTiffLabelWriter, &monitor))
            .map_err(to_py_err)?;
        let labeled = product.labels.iter().filter(|&&l| l != product.label_no_data).count();
        Ok((product.thresholds.thresholds().to_vec(), labeled))
    }

    /// Python module definition
    #[pymodule]
    fn _core(_py: Python, m: &PyModule) -> PyResult<()> {
        m.add_function(wrap_pyfunction!(delta_ndvi, m)?)?;
        m.add_function(wrap_pyfunction!(label_delta, m)?)?;
        m.add_function(wrap_pyfunction!(filter_connected_labels, m)?)?;
        #[cfg(feature = "gdal")]
        {
            m.add_function(wrap_pyfunction!(aggregate_files, m)?)?;
            m.add_function(wrap_pyfunction!(detect_clear_cuts, m)?)?;
        }
        Ok(())
    }
}
