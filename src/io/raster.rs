//! GeoTIFF reading and writing through GDAL

use crate::core::detection::{DetectionProduct, LabelVectorizer};
use crate::types::{ClearCutError, ClearCutResult, GeoRaster, GeoTransform, LabelImage, Sample};
use gdal::raster::Buffer;
use gdal::{Dataset, DriverManager};
use ndarray::{s, Array2, Array3};
use std::path::Path;

/// Read every band of a raster as `f32`, with its geotransform, band
/// no-data values and projection
pub fn read_raster<P: AsRef<Path>>(path: P) -> ClearCutResult<GeoRaster> {
    log::info!("Reading raster from: {}", path.as_ref().display());

    let dataset = Dataset::open(path.as_ref())?;
    let geo_transform = GeoTransform::from_gdal(dataset.geo_transform()?);
    let (width, height) = dataset.raster_size();
    let band_count = dataset.raster_count() as usize;

    log::debug!("Raster size: {}x{}, {} band(s)", width, height, band_count);
    log::debug!("Raster geotransform: {:?}", geo_transform);

    if band_count == 0 {
        return Err(ClearCutError::Processing(format!(
            "Raster {} has no bands",
            path.as_ref().display()
        )));
    }

    let mut data = Array3::<Sample>::zeros((band_count, height, width));
    let mut no_data = Vec::with_capacity(band_count);
    for b in 0..band_count {
        let rasterband = dataset.rasterband((b + 1) as isize)?;
        no_data.push(rasterband.no_data_value());

        let band_data = rasterband.read_as::<Sample>((0, 0), (width, height), (width, height), None)?;
        let band = Array2::from_shape_vec((height, width), band_data.data)
            .map_err(|e| ClearCutError::Processing(format!("Failed to reshape band {}: {}", b + 1, e)))?;
        data.slice_mut(s![b, .., ..]).assign(&band);
    }

    let projection = dataset.projection();
    let mut raster = GeoRaster::new(data, geo_transform);
    raster.no_data = no_data;
    Ok(raster.with_projection((!projection.is_empty()).then_some(projection)))
}

/// Write a raster as a float32 GeoTIFF
pub fn write_raster<P: AsRef<Path>>(path: P, raster: &GeoRaster) -> ClearCutResult<()> {
    log::info!("Saving raster as GeoTIFF: {}", path.as_ref().display());

    let driver = DriverManager::get_driver_by_name("GTiff")?;
    let (bands, height, width) = raster.data.dim();

    let mut dataset = driver.create_with_band_type::<Sample, _>(
        path.as_ref(),
        width as isize,
        height as isize,
        bands as isize,
    )?;
    dataset.set_geo_transform(&raster.geo_transform.to_gdal())?;
    if let Some(wkt) = &raster.projection {
        dataset.set_projection(wkt)?;
    }

    for b in 0..bands {
        let mut rasterband = dataset.rasterband((b + 1) as isize)?;
        let flat_data: Vec<Sample> = raster.band(b).iter().cloned().collect();
        let buffer = Buffer::new((width, height), flat_data);
        rasterband.write((0, 0), (width, height), &buffer)?;

        if let Some(nd) = raster.no_data.get(b).copied().flatten() {
            rasterband.set_no_data_value(Some(nd))?;
        }
    }

    log::info!("✅ GeoTIFF saved successfully");
    Ok(())
}

/// Write a label image as a single-band byte GeoTIFF
pub fn write_label_raster<P: AsRef<Path>>(
    path: P,
    labels: &LabelImage,
    geo_transform: &GeoTransform,
    projection: Option<&str>,
    no_data: u8,
) -> ClearCutResult<()> {
    log::info!("Saving labels as GeoTIFF: {}", path.as_ref().display());

    let driver = DriverManager::get_driver_by_name("GTiff")?;
    let (height, width) = labels.dim();

    let mut dataset = driver.create_with_band_type::<u8, _>(path.as_ref(), width as isize, height as isize, 1)?;
    dataset.set_geo_transform(&geo_transform.to_gdal())?;
    if let Some(wkt) = projection {
        dataset.set_projection(wkt)?;
    }

    let mut rasterband = dataset.rasterband(1)?;
    let flat_data: Vec<u8> = labels.iter().cloned().collect();
    let buffer = Buffer::new((width, height), flat_data);
    rasterband.write((0, 0), (width, height), &buffer)?;
    rasterband.set_no_data_value(Some(no_data as f64))?;

    Ok(())
}

/// Writes the final labels of a detection as a GeoTIFF instead of polygons
#[derive(Debug, Default)]
pub struct GeoTiffLabelWriter;

impl LabelVectorizer for GeoTiffLabelWriter {
    fn vectorize(&mut self, product: &DetectionProduct, output: &Path) -> ClearCutResult<()> {
        write_label_raster(
            output,
            &product.labels,
            &product.geo_transform,
            product.projection.as_deref(),
            product.label_no_data,
        )
    }
}
