//! I/O modules for reading and writing georeferenced rasters

pub mod mask;
pub mod raster;

pub use mask::RasterMaskProvider;
pub use raster::{read_raster, write_label_raster, write_raster, GeoTiffLabelWriter};
