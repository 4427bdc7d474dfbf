use ndarray::{s, Array2, Array3, ArrayView2};
use num_traits::Float;
use serde::{Deserialize, Serialize};

/// Real-valued reflectance or index sample
pub type Sample = f32;

/// Multi-band raster data (band x row x col)
pub type MultiBandImage = Array3<Sample>;

/// Single-band continuous raster (dNDVI, mosaics)
pub type DeltaImage = Array2<Sample>;

/// Single-band label raster
pub type LabelImage = Array2<u8>;

/// Default no-data sentinel of the dNDVI raster, outside the valid [-2, 2] range
pub const DELTA_NDVI_NO_DATA: Sample = 3.0;

/// Default no-data value of label rasters
pub const LABEL_NO_DATA: u8 = 0;

/// Geodetic point in the rasters' common coordinate system
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub x: f64,
    pub y: f64,
}

impl GeoPoint {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

/// Axis-aligned geodetic bounding box
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub min_x: f64,
    pub max_x: f64,
    pub min_y: f64,
    pub max_y: f64,
}

impl BoundingBox {
    /// Intersection of two boxes, `None` when they share no area
    pub fn intersection(&self, other: &BoundingBox) -> Option<BoundingBox> {
        let bbox = BoundingBox {
            min_x: self.min_x.max(other.min_x),
            max_x: self.max_x.min(other.max_x),
            min_y: self.min_y.max(other.min_y),
            max_y: self.max_y.min(other.max_y),
        };
        if bbox.min_x < bbox.max_x && bbox.min_y < bbox.max_y {
            Some(bbox)
        } else {
            None
        }
    }

    pub fn union(&self, other: &BoundingBox) -> BoundingBox {
        BoundingBox {
            min_x: self.min_x.min(other.min_x),
            max_x: self.max_x.max(other.max_x),
            min_y: self.min_y.min(other.min_y),
            max_y: self.max_y.max(other.max_y),
        }
    }

    pub fn width(&self) -> f64 {
        self.max_x - self.min_x
    }

    pub fn height(&self) -> f64 {
        self.max_y - self.min_y
    }
}

/// Geospatial transformation parameters (GDAL coefficient order)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoTransform {
    pub top_left_x: f64,
    pub pixel_width: f64,
    pub rotation_x: f64,
    pub top_left_y: f64,
    pub rotation_y: f64,
    pub pixel_height: f64,
}

impl GeoTransform {
    /// North-up transform without rotation
    pub fn north_up(top_left_x: f64, top_left_y: f64, pixel_width: f64, pixel_height: f64) -> Self {
        Self {
            top_left_x,
            pixel_width,
            rotation_x: 0.0,
            top_left_y,
            rotation_y: 0.0,
            pixel_height,
        }
    }

    pub fn from_gdal(coeffs: [f64; 6]) -> Self {
        Self {
            top_left_x: coeffs[0],
            pixel_width: coeffs[1],
            rotation_x: coeffs[2],
            top_left_y: coeffs[3],
            rotation_y: coeffs[4],
            pixel_height: coeffs[5],
        }
    }

    pub fn to_gdal(&self) -> [f64; 6] {
        [
            self.top_left_x,
            self.pixel_width,
            self.rotation_x,
            self.top_left_y,
            self.rotation_y,
            self.pixel_height,
        ]
    }

    /// Geodetic position of a (possibly fractional) pixel coordinate, corner based
    pub fn apply(&self, col: f64, row: f64) -> GeoPoint {
        GeoPoint {
            x: self.top_left_x + col * self.pixel_width + row * self.rotation_x,
            y: self.top_left_y + col * self.rotation_y + row * self.pixel_height,
        }
    }

    /// Geodetic position of the center of pixel (row, col)
    pub fn pixel_center(&self, row: usize, col: usize) -> GeoPoint {
        self.apply(col as f64 + 0.5, row as f64 + 0.5)
    }

    /// Inverse transform: continuous (row, col) where integer values are pixel corners
    pub fn continuous_index(&self, point: GeoPoint) -> Option<(f64, f64)> {
        let det = self.pixel_width * self.pixel_height - self.rotation_x * self.rotation_y;
        if det.abs() < f64::EPSILON {
            return None;
        }
        let dx = point.x - self.top_left_x;
        let dy = point.y - self.top_left_y;
        let col = (dx * self.pixel_height - dy * self.rotation_x) / det;
        let row = (dy * self.pixel_width - dx * self.rotation_y) / det;
        Some((row, col))
    }

    /// Absolute pixel area in squared geodetic units
    pub fn pixel_area(&self) -> f64 {
        (self.pixel_width * self.pixel_height - self.rotation_x * self.rotation_y).abs()
    }

    /// Bounding box of a `rows` x `cols` grid
    pub fn footprint(&self, rows: usize, cols: usize) -> BoundingBox {
        let corners = [
            self.apply(0.0, 0.0),
            self.apply(cols as f64, 0.0),
            self.apply(0.0, rows as f64),
            self.apply(cols as f64, rows as f64),
        ];
        let mut bbox = BoundingBox {
            min_x: f64::INFINITY,
            max_x: f64::NEG_INFINITY,
            min_y: f64::INFINITY,
            max_y: f64::NEG_INFINITY,
        };
        for c in corners {
            bbox.min_x = bbox.min_x.min(c.x);
            bbox.max_x = bbox.max_x.max(c.x);
            bbox.min_y = bbox.min_y.min(c.y);
            bbox.max_y = bbox.max_y.max(c.y);
        }
        bbox
    }

    /// Transform of the sub-grid starting at (row_offset, col_offset)
    pub fn shifted(&self, row_offset: usize, col_offset: usize) -> Self {
        let origin = self.apply(col_offset as f64, row_offset as f64);
        Self {
            top_left_x: origin.x,
            top_left_y: origin.y,
            ..*self
        }
    }
}

/// Georeferenced multi-band raster held in memory
#[derive(Debug, Clone)]
pub struct GeoRaster {
    pub data: MultiBandImage,
    pub geo_transform: GeoTransform,
    /// Per-band no-data value, if declared
    pub no_data: Vec<Option<f64>>,
    /// Coordinate reference system as WKT, carried through unchanged
    pub projection: Option<String>,
}

impl GeoRaster {
    pub fn new(data: MultiBandImage, geo_transform: GeoTransform) -> Self {
        let bands = data.dim().0;
        Self {
            data,
            geo_transform,
            no_data: vec![None; bands],
            projection: None,
        }
    }

    /// Wrap a single-band image
    pub fn from_band(band: Array2<Sample>, geo_transform: GeoTransform) -> Self {
        let data = band.insert_axis(ndarray::Axis(0));
        Self::new(data, geo_transform)
    }

    pub fn with_no_data(mut self, no_data: Option<f64>) -> Self {
        self.no_data = vec![no_data; self.band_count()];
        self
    }

    pub fn with_projection(mut self, projection: Option<String>) -> Self {
        self.projection = projection;
        self
    }

    pub fn band_count(&self) -> usize {
        self.data.dim().0
    }

    pub fn rows(&self) -> usize {
        self.data.dim().1
    }

    pub fn cols(&self) -> usize {
        self.data.dim().2
    }

    pub fn band(&self, index: usize) -> ArrayView2<'_, Sample> {
        self.data.slice(s![index, .., ..])
    }

    pub fn band_no_data(&self, index: usize) -> Option<Sample> {
        self.no_data.get(index).copied().flatten().map(|v| v as Sample)
    }

    pub fn footprint(&self) -> BoundingBox {
        self.geo_transform.footprint(self.rows(), self.cols())
    }
}

/// True when a sample carries data: finite and different from the no-data value
pub fn is_valid_sample<T: Float>(value: T, no_data: Option<T>) -> bool {
    if value.is_nan() {
        return false;
    }
    match no_data {
        Some(nd) => value != nd,
        None => true,
    }
}

/// Error types for clear cut processing
#[derive(Debug, thiserror::Error)]
pub enum ClearCutError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[cfg(feature = "gdal")]
    #[error("GDAL error: {0}")]
    Gdal(#[from] gdal::errors::GdalError),

    #[error("Invalid configuration: {0}")]
    Configuration(String),

    #[error("Inputs do not overlap: {0}")]
    NoOverlap(String),

    #[error("Statistics error: {0}")]
    Statistics(String),

    #[error("Processing error: {0}")]
    Processing(String),

    #[error("Processing cancelled after {completed} of {total} regions")]
    Cancelled { completed: usize, total: usize },
}

/// Result type for clear cut operations
pub type ClearCutResult<T> = Result<T, ClearCutError>;
