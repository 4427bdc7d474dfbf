//! Removal of small connected label patches ("salt").
//!
//! Each output region reads its input padded by `min_number_of_components`
//! pixels, cropped to the raster. Patches are measured inside that window
//! only, so a patch elongated beyond the halo can be under-counted.

use crate::core::tiling::{assemble_tiles, process_regions, ProgressMonitor, Region, RegionPartitioner};
use crate::types::{ClearCutError, ClearCutResult};
use ndarray::{s, Array2, ArrayView2};

/// Allowed range of the minimum patch size
pub const MIN_COMPONENTS_RANGE: std::ops::RangeInclusive<usize> = 1..=100;

/// Default minimum patch size
pub const DEFAULT_MIN_COMPONENTS: usize = 10;

const UNVISITED: u32 = 0;

/// Rewrites 4-connected same-valued patches of at most `min_number_of_components`
/// pixels to the no-data value
#[derive(Debug, Clone)]
pub struct ConnectedLabelsFilter<T> {
    min_number_of_components: usize,
    no_data: T,
}

impl<T> ConnectedLabelsFilter<T>
where
    T: Copy + PartialEq + Send + Sync,
{
    pub fn new(min_number_of_components: usize, no_data: T) -> ClearCutResult<Self> {
        if !MIN_COMPONENTS_RANGE.contains(&min_number_of_components) {
            return Err(ClearCutError::Configuration(format!(
                "Minimum number of connected pixels must be in [{}, {}], got {}",
                MIN_COMPONENTS_RANGE.start(),
                MIN_COMPONENTS_RANGE.end(),
                min_number_of_components
            )));
        }
        Ok(Self {
            min_number_of_components,
            no_data,
        })
    }

    pub fn min_number_of_components(&self) -> usize {
        self.min_number_of_components
    }

    /// Halo added around each output region
    pub fn halo(&self) -> usize {
        self.min_number_of_components
    }

    /// Filter a whole label image region by region
    pub fn filter_image(
        &self,
        labels: ArrayView2<'_, T>,
        partitioner: &RegionPartitioner,
        monitor: &ProgressMonitor,
    ) -> ClearCutResult<Array2<T>> {
        let (rows, cols) = labels.dim();
        log::info!(
            "Filtering connected patches of <= {} pixels over {}x{} labels",
            self.min_number_of_components,
            rows,
            cols
        );

        let regions = partitioner.partition(rows, cols);
        let tiles = process_regions(&regions, monitor, |region| {
            let window = region.pad_and_crop(self.halo(), rows, cols);
            let view = labels.slice(s![window.row_offset..window.row_end(), window.col_offset..window.col_end()]);
            let tile = self.filter_window(view, &window, region);
            Ok((*region, tile))
        })?;

        assemble_tiles(rows, cols, self.no_data, tiles)
    }

    /// Filter `output` given the input `window` (both in raster indices)
    pub fn filter_window(&self, input: ArrayView2<'_, T>, window: &Region, output: &Region) -> Array2<T> {
        let mut components = ComponentLabeling::new(input.dim());
        let mut tile = Array2::from_elem((output.rows, output.cols), self.no_data);

        for r in 0..output.rows {
            for c in 0..output.cols {
                let wr = output.row_offset + r - window.row_offset;
                let wc = output.col_offset + c - window.col_offset;
                let value = input[[wr, wc]];
                if value == self.no_data {
                    continue;
                }
                let size = components.size_at(&input, wr, wc);
                if size > self.min_number_of_components {
                    tile[[r, c]] = value;
                }
            }
        }
        tile
    }
}

/// Lazily computed 4-connected component ids and sizes within one window
struct ComponentLabeling {
    ids: Array2<u32>,
    sizes: Vec<usize>,
    stack: Vec<(usize, usize)>,
}

impl ComponentLabeling {
    fn new(dim: (usize, usize)) -> Self {
        Self {
            ids: Array2::from_elem(dim, UNVISITED),
            // Id 0 is reserved for unvisited pixels
            sizes: vec![0],
            stack: Vec::new(),
        }
    }

    /// Size of the component containing (row, col), labeling it on first visit
    fn size_at<T: Copy + PartialEq>(&mut self, input: &ArrayView2<'_, T>, row: usize, col: usize) -> usize {
        let id = self.ids[[row, col]];
        if id != UNVISITED {
            return self.sizes[id as usize];
        }

        let (rows, cols) = input.dim();
        let value = input[[row, col]];
        let id = self.sizes.len() as u32;
        let mut size = 0usize;

        self.ids[[row, col]] = id;
        self.stack.push((row, col));
        while let Some((r, c)) = self.stack.pop() {
            size += 1;
            let neighbors = [
                (r.wrapping_sub(1), c),
                (r + 1, c),
                (r, c.wrapping_sub(1)),
                (r, c + 1),
            ];
            for (nr, nc) in neighbors {
                if nr < rows && nc < cols && self.ids[[nr, nc]] == UNVISITED && input[[nr, nc]] == value {
                    self.ids[[nr, nc]] = id;
                    self.stack.push((nr, nc));
                }
            }
        }

        self.sizes.push(size);
        size
    }
}
