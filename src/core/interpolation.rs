//! Point interpolation over georeferenced rasters.
//!
//! Interpolators keep a scratch pixel buffer, so a pass clones one set per
//! worker instead of sharing them.

use crate::types::{GeoPoint, GeoRaster, Sample};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::Arc;

/// Point interpolation over one raster
pub trait Interpolator: Clone + Send {
    /// Whether `point` lies inside the raster's valid interpolation domain
    fn is_inside_buffer(&self, point: GeoPoint) -> bool;

    /// Interpolated pixel vector (one value per band) at `point`.
    ///
    /// Callers must check [`Interpolator::is_inside_buffer`] first.
    fn evaluate(&mut self, point: GeoPoint) -> &[Sample];

    /// Raster the interpolator reads from
    fn raster(&self) -> &GeoRaster;
}

/// Interpolation kernels available to resampling and mosaicking
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InterpolationMethod {
    #[default]
    NearestNeighbor,
    Bilinear,
}

impl FromStr for InterpolationMethod {
    type Err = crate::types::ClearCutError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "nn" | "nearest" | "nearest_neighbor" => Ok(Self::NearestNeighbor),
            "linear" | "bilinear" => Ok(Self::Bilinear),
            _ => Err(crate::types::ClearCutError::Configuration(format!(
                "Unknown interpolation method: {}",
                s
            ))),
        }
    }
}

/// Either kernel behind one concrete type, so mixed pipelines stay monomorphic
#[derive(Debug, Clone)]
pub enum RasterInterpolator {
    Nearest(NearestNeighborInterpolator),
    Bilinear(BilinearInterpolator),
}

impl RasterInterpolator {
    pub fn new(raster: Arc<GeoRaster>, method: InterpolationMethod) -> Self {
        match method {
            InterpolationMethod::NearestNeighbor => Self::Nearest(NearestNeighborInterpolator::new(raster)),
            InterpolationMethod::Bilinear => Self::Bilinear(BilinearInterpolator::new(raster)),
        }
    }
}

impl Interpolator for RasterInterpolator {
    fn is_inside_buffer(&self, point: GeoPoint) -> bool {
        match self {
            Self::Nearest(i) => i.is_inside_buffer(point),
            Self::Bilinear(i) => i.is_inside_buffer(point),
        }
    }

    fn evaluate(&mut self, point: GeoPoint) -> &[Sample] {
        match self {
            Self::Nearest(i) => i.evaluate(point),
            Self::Bilinear(i) => i.evaluate(point),
        }
    }

    fn raster(&self) -> &GeoRaster {
        match self {
            Self::Nearest(i) => i.raster(),
            Self::Bilinear(i) => i.raster(),
        }
    }
}

/// Continuous (row, col) of `point` when it falls on the grid
fn grid_position(raster: &GeoRaster, point: GeoPoint) -> Option<(f64, f64)> {
    let (row, col) = raster.geo_transform.continuous_index(point)?;
    if row >= 0.0 && col >= 0.0 && row < raster.rows() as f64 && col < raster.cols() as f64 {
        Some((row, col))
    } else {
        None
    }
}

/// Nearest neighbour lookup
#[derive(Debug, Clone)]
pub struct NearestNeighborInterpolator {
    raster: Arc<GeoRaster>,
    pixel: Vec<Sample>,
}

impl NearestNeighborInterpolator {
    pub fn new(raster: Arc<GeoRaster>) -> Self {
        let bands = raster.band_count();
        Self {
            raster,
            pixel: vec![0.0; bands],
        }
    }
}

impl Interpolator for NearestNeighborInterpolator {
    fn is_inside_buffer(&self, point: GeoPoint) -> bool {
        grid_position(&self.raster, point).is_some()
    }

    fn evaluate(&mut self, point: GeoPoint) -> &[Sample] {
        if let Some((row, col)) = grid_position(&self.raster, point) {
            let (r, c) = (row.floor() as usize, col.floor() as usize);
            for (band, value) in self.pixel.iter_mut().enumerate() {
                *value = self.raster.data[[band, r, c]];
            }
        } else {
            self.pixel.iter_mut().for_each(|v| *v = Sample::NAN);
        }
        &self.pixel
    }

    fn raster(&self) -> &GeoRaster {
        &self.raster
    }
}

/// Bilinear interpolation between the four surrounding pixel centers.
///
/// Falls back to the nearest pixel when a neighbour is no-data.
#[derive(Debug, Clone)]
pub struct BilinearInterpolator {
    raster: Arc<GeoRaster>,
    pixel: Vec<Sample>,
}

impl BilinearInterpolator {
    pub fn new(raster: Arc<GeoRaster>) -> Self {
        let bands = raster.band_count();
        Self {
            raster,
            pixel: vec![0.0; bands],
        }
    }
}

impl Interpolator for BilinearInterpolator {
    fn is_inside_buffer(&self, point: GeoPoint) -> bool {
        grid_position(&self.raster, point).is_some()
    }

    fn evaluate(&mut self, point: GeoPoint) -> &[Sample] {
        let Some((row, col)) = grid_position(&self.raster, point) else {
            self.pixel.iter_mut().for_each(|v| *v = Sample::NAN);
            return &self.pixel;
        };

        let rows = self.raster.rows();
        let cols = self.raster.cols();
        // Pixel centers sit at half-integer positions
        let y = (row - 0.5).clamp(0.0, (rows - 1) as f64);
        let x = (col - 0.5).clamp(0.0, (cols - 1) as f64);
        let y1 = y.floor() as usize;
        let x1 = x.floor() as usize;
        let y2 = (y1 + 1).min(rows - 1);
        let x2 = (x1 + 1).min(cols - 1);
        let dy = y - y1 as f64;
        let dx = x - x1 as f64;

        for band in 0..self.pixel.len() {
            let no_data = self.raster.band_no_data(band);
            let v11 = self.raster.data[[band, y1, x1]];
            let v12 = self.raster.data[[band, y2, x1]];
            let v21 = self.raster.data[[band, y1, x2]];
            let v22 = self.raster.data[[band, y2, x2]];

            let all_valid = [v11, v12, v21, v22]
                .iter()
                .all(|&v| crate::types::is_valid_sample(v, no_data));

            self.pixel[band] = if all_valid {
                (v11 as f64 * (1.0 - dx) * (1.0 - dy)
                    + v21 as f64 * dx * (1.0 - dy)
                    + v12 as f64 * (1.0 - dx) * dy
                    + v22 as f64 * dx * dy) as Sample
            } else {
                self.raster.data[[band, row.floor() as usize, col.floor() as usize]]
            };
        }
        &self.pixel
    }

    fn raster(&self) -> &GeoRaster {
        &self.raster
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::GeoTransform;
    use ndarray::Array2;

    fn ramp() -> Arc<GeoRaster> {
        let band = Array2::from_shape_fn((4, 4), |(r, c)| (r * 10 + c) as f32);
        Arc::new(GeoRaster::from_band(band, GeoTransform::north_up(0.0, 40.0, 10.0, -10.0)))
    }

    #[test]
    fn test_nearest_neighbor() {
        let mut interp = NearestNeighborInterpolator::new(ramp());
        let p = GeoPoint::new(21.0, 28.0); // row 1, col 2
        assert!(interp.is_inside_buffer(p));
        assert_eq!(interp.evaluate(p), &[12.0]);

        let outside = GeoPoint::new(-1.0, 28.0);
        assert!(!interp.is_inside_buffer(outside));
    }

    #[test]
    fn test_bilinear_between_centers() {
        let mut interp = BilinearInterpolator::new(ramp());
        // Halfway between centers of (1,1) and (1,2)
        let value = interp.evaluate(GeoPoint::new(20.0, 25.0))[0];
        assert!((value - 11.5).abs() < 1e-5);

        // Exactly on a center
        let value = interp.evaluate(GeoPoint::new(15.0, 25.0))[0];
        assert!((value - 11.0).abs() < 1e-5);
    }

    #[test]
    fn test_bilinear_falls_back_on_no_data() {
        let mut band = Array2::from_elem((2, 2), 5.0f32);
        band[[0, 1]] = 0.0;
        let raster = Arc::new(
            GeoRaster::from_band(band, GeoTransform::north_up(0.0, 20.0, 10.0, -10.0)).with_no_data(Some(0.0)),
        );
        let mut interp = BilinearInterpolator::new(raster);
        assert_eq!(interp.evaluate(GeoPoint::new(9.0, 11.0))[0], 5.0);
    }

    #[test]
    fn test_method_parsing() {
        assert_eq!("nn".parse::<InterpolationMethod>().unwrap(), InterpolationMethod::NearestNeighbor);
        assert_eq!("Bilinear".parse::<InterpolationMethod>().unwrap(), InterpolationMethod::Bilinear);
        assert!("cubic".parse::<InterpolationMethod>().is_err());
    }

    #[test]
    fn test_serde_names_are_accepted_by_parser() {
        use serde::de::IntoDeserializer;
        for (name, method) in [
            ("nearest_neighbor", InterpolationMethod::NearestNeighbor),
            ("bilinear", InterpolationMethod::Bilinear),
        ] {
            let de: serde::de::value::StrDeserializer<'_, serde::de::value::Error> = name.into_deserializer();
            assert_eq!(InterpolationMethod::deserialize(de).unwrap(), method);
            assert_eq!(name.parse::<InterpolationMethod>().unwrap(), method);
        }
    }
}
