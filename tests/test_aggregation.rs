use approx::assert_relative_eq;
use clearcut::core::interpolation::InterpolationMethod;
use clearcut::core::{aggregate, AggregationMode, AggregationParams, ProgressMonitor};
use clearcut::types::{GeoRaster, GeoTransform};
use ndarray::Array2;
use std::sync::Arc;

fn labels(x0: f64, y0: f64, spacing: f64, values: Array2<f32>) -> Arc<GeoRaster> {
    Arc::new(GeoRaster::from_band(values, GeoTransform::north_up(x0, y0, spacing, -spacing)).with_no_data(Some(0.0)))
}

#[test]
fn test_mosaic_of_overlapping_label_rasters() {
    let _ = env_logger::builder().is_test(true).try_init();

    // Three 10 m tiles, the second overlapping half of the first
    let a = labels(0.0, 100.0, 10.0, Array2::from_elem((10, 10), 1.0));
    let b = labels(50.0, 100.0, 10.0, Array2::from_elem((10, 10), 3.0));
    let c = labels(200.0, 100.0, 10.0, Array2::from_elem((10, 10), 2.0));

    let params = AggregationParams {
        ram_budget_mb: 1,
        ..AggregationParams::default()
    };
    let out = aggregate(&[a.clone(), b.clone(), c.clone()], &params, &ProgressMonitor::new()).unwrap();

    // Union grid at the first input's spacing
    assert_eq!((out.rows(), out.cols()), (10, 30));
    assert_relative_eq!(out.geo_transform.top_left_x, 0.0);
    assert_relative_eq!(out.geo_transform.top_left_y, 100.0);

    let band = out.band(0);
    assert_eq!(band[[5, 2]], 1.0);
    assert_eq!(band[[5, 7]], 3.0);
    assert_eq!(band[[5, 12]], 3.0);
    // Gap between b and c
    assert_eq!(band[[5, 17]], 0.0);
    assert_eq!(band[[5, 25]], 2.0);

    let params = AggregationParams {
        mode: AggregationMode::Mean,
        ..params
    };
    let out = aggregate(&[a, b, c], &params, &ProgressMonitor::new()).unwrap();
    assert_relative_eq!(out.band(0)[[5, 7]], 2.0);
}

#[test]
fn test_mosaic_onto_coarser_grid_with_bilinear() {
    // The first input sets a 10 m grid; the 5 m input is interpolated onto it
    let coarse = labels(0.0, 40.0, 10.0, Array2::from_elem((4, 4), 2.0));
    let fine = labels(0.0, 40.0, 5.0, Array2::from_elem((8, 8), 4.0));

    let params = AggregationParams {
        mode: AggregationMode::Mean,
        interpolation: InterpolationMethod::Bilinear,
        ..AggregationParams::default()
    };
    let out = aggregate(&[coarse, fine], &params, &ProgressMonitor::new()).unwrap();
    assert_eq!((out.rows(), out.cols()), (4, 4));
    assert!(out.band(0).iter().all(|&v| (v - 3.0).abs() < 1e-6));
}

#[test]
fn test_empty_input_pixels_do_not_contribute() {
    let mut values = Array2::from_elem((4, 4), 1.0);
    values[[0, 0]] = 0.0;
    let a = labels(0.0, 40.0, 10.0, values);

    let out = aggregate(&[a], &AggregationParams::default(), &ProgressMonitor::new()).unwrap();
    assert_eq!(out.band(0)[[0, 0]], 0.0);
    assert_eq!(out.band(0)[[1, 1]], 1.0);
    assert_eq!(out.band_no_data(0), Some(0.0));
}

#[test]
fn test_single_raster_on_degree_grid_keeps_its_shape() {
    let values = Array2::from_shape_fn((333, 333), |(r, c)| ((r + 2 * c) % 5 + 1) as f32);
    let raster = labels(-1.7, 44.3, 0.00025, values.clone());

    for mode in [AggregationMode::Max, AggregationMode::Mean] {
        let params = AggregationParams {
            mode,
            ..AggregationParams::default()
        };
        let out = aggregate(&[raster.clone()], &params, &ProgressMonitor::new()).unwrap();
        assert_eq!((out.rows(), out.cols()), (333, 333));
        assert_eq!(out.geo_transform, raster.geo_transform);
        assert_eq!(out.band(0), values.view());
    }
}
