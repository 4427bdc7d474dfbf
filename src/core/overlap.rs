//! Geodetic overlap between the two acquisition rasters.
//!
//! The raster with the finer pixel keeps its grid and is cropped to the
//! overlap; the coarser one is resampled onto that grid.

use crate::core::tiling::Region;
use crate::types::{BoundingBox, ClearCutError, ClearCutResult, GeoRaster, GeoTransform};
use ndarray::s;

/// Acquisition date of an input raster
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Acquisition {
    Before,
    After,
}

impl std::fmt::Display for Acquisition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Acquisition::Before => write!(f, "before"),
            Acquisition::After => write!(f, "after"),
        }
    }
}

/// Roles assigned to the two rasters
#[derive(Debug, Clone)]
pub struct OverlapPlan {
    /// Raster resampled onto the other's grid
    pub resampled: Acquisition,
    /// Raster cropped to the overlap
    pub extracted: Acquisition,
    /// Overlap expressed in the extracted raster's indices
    pub extract_region: Region,
    /// Geotransform of the cropped grid
    pub grid_transform: GeoTransform,
    /// Geodetic overlap
    pub overlap: BoundingBox,
}

impl OverlapPlan {
    pub fn rows(&self) -> usize {
        self.extract_region.rows
    }

    pub fn cols(&self) -> usize {
        self.extract_region.cols
    }
}

pub struct RegionOverlapResolver;

impl RegionOverlapResolver {
    /// Compute the overlap plan, failing when the rasters share no area
    pub fn resolve(before: &GeoRaster, after: &GeoRaster) -> ClearCutResult<OverlapPlan> {
        let fp_before = before.footprint();
        let fp_after = after.footprint();
        log::debug!("Footprint before: {:?}", fp_before);
        log::debug!("Footprint after: {:?}", fp_after);

        let overlap = fp_before.intersection(&fp_after).ok_or_else(|| {
            ClearCutError::NoOverlap(format!(
                "before footprint {:?} and after footprint {:?} are disjoint",
                fp_before, fp_after
            ))
        })?;

        // Coarser pixel gets resampled; ties resample the later date
        let (resampled, extracted, reference) =
            if before.geo_transform.pixel_area() > after.geo_transform.pixel_area() {
                (Acquisition::Before, Acquisition::After, after)
            } else {
                (Acquisition::After, Acquisition::Before, before)
            };
        log::info!("{} --> resampled", resampled);
        log::info!("{} --> extracted", extracted);

        let extract_region = Self::overlap_in_indices(reference, &overlap)?;
        let grid_transform = reference
            .geo_transform
            .shifted(extract_region.row_offset, extract_region.col_offset);

        log::debug!("Extract region: {:?}", extract_region);

        Ok(OverlapPlan {
            resampled,
            extracted,
            extract_region,
            grid_transform,
            overlap,
        })
    }

    /// Index region of `raster` covered by `overlap`
    pub fn overlap_in_indices(raster: &GeoRaster, overlap: &BoundingBox) -> ClearCutResult<Region> {
        let gt = &raster.geo_transform;
        let corners = [
            (overlap.min_x, overlap.min_y),
            (overlap.min_x, overlap.max_y),
            (overlap.max_x, overlap.min_y),
            (overlap.max_x, overlap.max_y),
        ];

        let mut row_min = f64::INFINITY;
        let mut row_max = f64::NEG_INFINITY;
        let mut col_min = f64::INFINITY;
        let mut col_max = f64::NEG_INFINITY;
        for (x, y) in corners {
            let (row, col) = gt
                .continuous_index(crate::types::GeoPoint::new(x, y))
                .ok_or_else(|| ClearCutError::Processing("Degenerate geotransform".to_string()))?;
            row_min = row_min.min(row);
            row_max = row_max.max(row);
            col_min = col_min.min(col);
            col_max = col_max.max(col);
        }

        // Snap to whole pixels; a tiny tolerance absorbs floating error at edges
        const SNAP: f64 = 1e-6;
        let row_start = ((row_min + SNAP).floor().max(0.0) as usize).min(raster.rows());
        let col_start = ((col_min + SNAP).floor().max(0.0) as usize).min(raster.cols());
        let row_end = ((row_max - SNAP).ceil().max(0.0) as usize).min(raster.rows());
        let col_end = ((col_max - SNAP).ceil().max(0.0) as usize).min(raster.cols());

        if row_end <= row_start || col_end <= col_start {
            return Err(ClearCutError::NoOverlap(format!(
                "overlap {:?} covers no whole pixel of the reference raster",
                overlap
            )));
        }

        Ok(Region::new(row_start, col_start, row_end - row_start, col_end - col_start))
    }

    /// Crop `raster` to `region`, keeping band no-data values
    pub fn extract(raster: &GeoRaster, region: &Region) -> GeoRaster {
        let data = raster
            .data
            .slice(s![.., region.row_offset..region.row_end(), region.col_offset..region.col_end()])
            .to_owned();
        GeoRaster {
            data,
            geo_transform: raster.geo_transform.shifted(region.row_offset, region.col_offset),
            no_data: raster.no_data.clone(),
            projection: raster.projection.clone(),
        }
    }
}
