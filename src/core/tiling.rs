//! Region partitioning and the tiled execution driver shared by all passes.

use crate::types::{ClearCutError, ClearCutResult};
use ndarray::{s, Array2};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

/// Smallest tile side produced by the partitioner
const MIN_TILE_SIDE: usize = 32;
/// Largest tile side produced by the partitioner
const MAX_TILE_SIDE: usize = 2048;
/// Number of regions one budget is split into, so several workers stay busy
const REGIONS_PER_BUDGET: usize = 16;

/// Axis-aligned index rectangle of a raster
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Region {
    pub row_offset: usize,
    pub col_offset: usize,
    pub rows: usize,
    pub cols: usize,
}

impl Region {
    pub fn new(row_offset: usize, col_offset: usize, rows: usize, cols: usize) -> Self {
        Self {
            row_offset,
            col_offset,
            rows,
            cols,
        }
    }

    pub fn pixel_count(&self) -> usize {
        self.rows * self.cols
    }

    pub fn row_end(&self) -> usize {
        self.row_offset + self.rows
    }

    pub fn col_end(&self) -> usize {
        self.col_offset + self.cols
    }

    /// Grow the region by `radius` on every side; offsets stop at zero
    pub fn pad(&self, radius: usize) -> Self {
        let row_start = self.row_offset.saturating_sub(radius);
        let col_start = self.col_offset.saturating_sub(radius);
        Self::new(
            row_start,
            col_start,
            self.row_end() + radius - row_start,
            self.col_end() + radius - col_start,
        )
    }

    /// Clip the region to a `rows` x `cols` raster
    pub fn crop(&self, rows: usize, cols: usize) -> Self {
        let row_start = self.row_offset.min(rows);
        let col_start = self.col_offset.min(cols);
        Self::new(
            row_start,
            col_start,
            self.row_end().min(rows) - row_start,
            self.col_end().min(cols) - col_start,
        )
    }

    /// Halo window of the region inside a `rows` x `cols` raster
    pub fn pad_and_crop(&self, radius: usize, rows: usize, cols: usize) -> Self {
        self.pad(radius).crop(rows, cols)
    }
}

/// Splits a raster into a deterministic grid of disjoint regions sized from a memory budget
#[derive(Debug, Clone)]
pub struct RegionPartitioner {
    tile_side: usize,
}

impl RegionPartitioner {
    /// Size tiles so that `REGIONS_PER_BUDGET` tiles of `bytes_per_pixel` fit in `ram_budget_mb`
    pub fn from_memory_budget(ram_budget_mb: usize, bytes_per_pixel: usize) -> Self {
        let budget_bytes = ram_budget_mb.max(1) * 1024 * 1024;
        let pixels_per_region = budget_bytes / bytes_per_pixel.max(1) / REGIONS_PER_BUDGET;
        let side = (pixels_per_region as f64).sqrt() as usize;
        let tile_side = side.clamp(MIN_TILE_SIDE, MAX_TILE_SIDE);
        log::debug!(
            "Partitioner: {} MB budget, {} B/pixel -> {}x{} tiles",
            ram_budget_mb,
            bytes_per_pixel,
            tile_side,
            tile_side
        );
        Self { tile_side }
    }

    /// Fixed tile side, mostly useful in tests
    pub fn with_tile_size(tile_side: usize) -> Self {
        Self {
            tile_side: tile_side.max(1),
        }
    }

    pub fn tile_side(&self) -> usize {
        self.tile_side
    }

    /// Row-major grid of regions covering the raster
    pub fn partition(&self, rows: usize, cols: usize) -> Vec<Region> {
        let mut regions = Vec::new();
        for row_offset in (0..rows).step_by(self.tile_side) {
            let tile_rows = self.tile_side.min(rows - row_offset);
            for col_offset in (0..cols).step_by(self.tile_side) {
                let tile_cols = self.tile_side.min(cols - col_offset);
                regions.push(Region::new(row_offset, col_offset, tile_rows, tile_cols));
            }
        }
        regions
    }
}

impl Default for RegionPartitioner {
    fn default() -> Self {
        Self::from_memory_budget(256, 16)
    }
}

/// Cooperative cancellation flag and region progress counter for a pass
#[derive(Debug, Clone, Default)]
pub struct ProgressMonitor {
    cancelled: Arc<AtomicBool>,
    completed: Arc<AtomicUsize>,
    total: Arc<AtomicUsize>,
}

impl ProgressMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation; checked between regions
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Fraction of regions completed in the current pass
    pub fn progress(&self) -> f64 {
        let total = self.total.load(Ordering::Relaxed);
        if total == 0 {
            return 0.0;
        }
        self.completed.load(Ordering::Relaxed) as f64 / total as f64
    }

    fn begin_pass(&self, total: usize) {
        self.completed.store(0, Ordering::Relaxed);
        self.total.store(total, Ordering::Relaxed);
    }

    fn check(&self) -> ClearCutResult<()> {
        if self.is_cancelled() {
            return Err(ClearCutError::Cancelled {
                completed: self.completed.load(Ordering::Relaxed),
                total: self.total.load(Ordering::Relaxed),
            });
        }
        Ok(())
    }

    fn region_done(&self) {
        self.completed.fetch_add(1, Ordering::Relaxed);
    }
}

/// Run `work` over every region and collect the results in region order.
///
/// Any region error or a cancellation fails the whole pass.
pub fn process_regions<T, F>(
    regions: &[Region],
    monitor: &ProgressMonitor,
    work: F,
) -> ClearCutResult<Vec<T>>
where
    T: Send,
    F: Fn(&Region) -> ClearCutResult<T> + Sync + Send,
{
    process_regions_with(regions, monitor, || (), |_, region| work(region))
}

/// Like [`process_regions`], with per-worker state built once by `init`
/// (interpolators and other non-shareable resources).
#[cfg(feature = "parallel")]
pub fn process_regions_with<S, T, I, F>(
    regions: &[Region],
    monitor: &ProgressMonitor,
    init: I,
    work: F,
) -> ClearCutResult<Vec<T>>
where
    T: Send,
    I: Fn() -> S + Sync + Send,
    F: Fn(&mut S, &Region) -> ClearCutResult<T> + Sync + Send,
{
    use rayon::prelude::*;

    monitor.begin_pass(regions.len());
    regions
        .par_iter()
        .map_init(init, |state, region| {
            monitor.check()?;
            let result = work(state, region)?;
            monitor.region_done();
            Ok(result)
        })
        .collect()
}

#[cfg(not(feature = "parallel"))]
pub fn process_regions_with<S, T, I, F>(
    regions: &[Region],
    monitor: &ProgressMonitor,
    init: I,
    work: F,
) -> ClearCutResult<Vec<T>>
where
    T: Send,
    I: Fn() -> S + Sync + Send,
    F: Fn(&mut S, &Region) -> ClearCutResult<T> + Sync + Send,
{
    monitor.begin_pass(regions.len());
    let mut state = init();
    regions
        .iter()
        .map(|region| {
            monitor.check()?;
            let result = work(&mut state, region)?;
            monitor.region_done();
            Ok(result)
        })
        .collect()
}

/// Stitch per-region tiles into a `rows` x `cols` image
pub fn assemble_tiles<T: Clone>(
    rows: usize,
    cols: usize,
    fill: T,
    tiles: Vec<(Region, Array2<T>)>,
) -> ClearCutResult<Array2<T>> {
    let mut output = Array2::from_elem((rows, cols), fill);
    for (region, tile) in tiles {
        if tile.dim() != (region.rows, region.cols) || region.row_end() > rows || region.col_end() > cols {
            return Err(ClearCutError::Processing(format!(
                "Tile {:?} with shape {:?} does not fit a {}x{} output",
                region,
                tile.dim(),
                rows,
                cols
            )));
        }
        output
            .slice_mut(s![region.row_offset..region.row_end(), region.col_offset..region.col_end()])
            .assign(&tile);
    }
    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partition_covers_raster_once() {
        let partitioner = RegionPartitioner::with_tile_size(4);
        let regions = partitioner.partition(10, 7);
        assert_eq!(regions.len(), 3 * 2);

        let mut hits = Array2::<u32>::zeros((10, 7));
        for r in &regions {
            for row in r.row_offset..r.row_end() {
                for col in r.col_offset..r.col_end() {
                    hits[[row, col]] += 1;
                }
            }
        }
        assert!(hits.iter().all(|&h| h == 1));
    }

    #[test]
    fn test_pad_and_crop() {
        let region = Region::new(2, 5, 4, 4);
        assert_eq!(region.pad(3), Region::new(0, 2, 9, 10));
        assert_eq!(region.pad(3).crop(8, 10), Region::new(0, 2, 8, 8));
        assert_eq!(region.pad_and_crop(3, 8, 10), Region::new(0, 2, 8, 8));
    }

    #[test]
    fn test_memory_budget_is_clamped() {
        assert_eq!(RegionPartitioner::from_memory_budget(0, 1_000_000).tile_side(), MIN_TILE_SIDE);
        assert_eq!(RegionPartitioner::from_memory_budget(1 << 20, 1).tile_side(), MAX_TILE_SIDE);
    }

    #[test]
    fn test_cancelled_pass_fails() {
        let monitor = ProgressMonitor::new();
        monitor.cancel();
        let regions = RegionPartitioner::with_tile_size(2).partition(4, 4);
        let result = process_regions(&regions, &monitor, |r| Ok(r.pixel_count()));
        assert!(matches!(result, Err(ClearCutError::Cancelled { .. })));
    }

    #[test]
    fn test_region_error_fails_pass() {
        let monitor = ProgressMonitor::new();
        let regions = RegionPartitioner::with_tile_size(2).partition(4, 4);
        let result = process_regions(&regions, &monitor, |r| {
            if r.row_offset == 2 && r.col_offset == 2 {
                Err(ClearCutError::Processing("boom".to_string()))
            } else {
                Ok(())
            }
        });
        assert!(result.is_err());
    }

    #[test]
    fn test_assemble_tiles() {
        let monitor = ProgressMonitor::new();
        let regions = RegionPartitioner::with_tile_size(3).partition(5, 5);
        let tiles = process_regions(&regions, &monitor, |r| {
            Ok((*r, Array2::from_elem((r.rows, r.cols), r.row_offset as u8 + r.col_offset as u8)))
        })
        .unwrap();
        assert_eq!(monitor.progress(), 1.0);

        let image = assemble_tiles(5, 5, 0u8, tiles).unwrap();
        assert_eq!(image[[0, 0]], 0);
        assert_eq!(image[[4, 4]], 6);
        assert_eq!(image[[1, 3]], 3);
    }
}
