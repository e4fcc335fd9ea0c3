use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::NaiveDate;
use rayon::iter::{IntoParallelIterator, ParallelIterator};
use tracing::{debug, info, trace, warn};

use super::average::average_pixels;
use super::catalog::{Catalog, CatalogEntry, EntryId};
use super::color::distance;
use super::error::MosaicError;
use super::image::PixelSource;
use super::progress_bar;

/// Grid cells within this many columns and rows of a placed tile may not reuse its image.
pub const DEFAULT_WINDOW_RADIUS: u32 = 10;

/// Settings of a single mosaic build.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BuildConfig {
    /// Width of a grid cell in source pixels
    pub cell_width: u32,
    /// Height of a grid cell in source pixels
    pub cell_height: u32,
    /// Half size of the square no-repeat window, in cells
    pub window_radius: u32,
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            cell_width: 40,
            cell_height: 30,
            window_radius: DEFAULT_WINDOW_RADIUS,
        }
    }
}

/// How a source image is cut into cells. The last column and row may be narrower.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GridSpec {
    pub image_width: u32,
    pub image_height: u32,
    pub cell_width: u32,
    pub cell_height: u32,
    pub columns: u32,
    pub rows: u32,
}

impl GridSpec {
    pub fn new(
        image_width: u32,
        image_height: u32,
        cell_width: u32,
        cell_height: u32,
    ) -> Result<GridSpec, MosaicError> {
        if cell_width == 0 || cell_height == 0 || image_width == 0 || image_height == 0 {
            return Err(MosaicError::InvalidGrid {
                cell_width,
                cell_height,
                image_width,
                image_height,
            });
        }
        Ok(GridSpec {
            image_width,
            image_height,
            cell_width,
            cell_height,
            columns: (image_width + cell_width - 1) / cell_width,
            rows: (image_height + cell_height - 1) / cell_height,
        })
    }

    pub fn len(&self) -> usize {
        self.columns as usize * self.rows as usize
    }

    /// (column, row) of the `index`th cell in scan order.
    pub fn position(&self, index: usize) -> (u32, u32) {
        let columns = self.columns as usize;
        ((index % columns) as u32, (index / columns) as u32)
    }

    /// Pixel rectangle (left, top, width, height) of a cell, clipped to the image.
    pub fn cell_rect(&self, column: u32, row: u32) -> (u32, u32, u32, u32) {
        let left = column * self.cell_width;
        let top = row * self.cell_height;
        let width = self.cell_width.min(self.image_width - left);
        let height = self.cell_height.min(self.image_height - top);
        (left, top, width, height)
    }
}

/// The catalog image chosen for one grid cell.
#[derive(Debug, Clone, PartialEq)]
pub struct TileAssignment {
    pub column: u32,
    pub row: u32,
    pub entry_id: EntryId,
    pub source_path: PathBuf,
    pub captured_on: NaiveDate,
    /// CIE94 distance from the entry's average color to the cell's
    pub distance: f64,
}

impl TileAssignment {
    fn new(column: u32, row: u32, entry: CatalogEntry, distance: f64) -> TileAssignment {
        TileAssignment {
            column,
            row,
            entry_id: entry.id,
            source_path: entry.source_path,
            captured_on: entry.captured_on,
            distance,
        }
    }
}

/// Which image went where, indexed by cell, for the no-repeat lookup.
///
/// Cells are filled in scan order, so any cell still empty has not been
/// visited yet and contributes nothing to a window.
struct ExclusionWindow {
    columns: u32,
    rows: u32,
    radius: u32,
    placed: Vec<Option<EntryId>>,
}

impl ExclusionWindow {
    fn new(grid: &GridSpec, radius: u32) -> ExclusionWindow {
        ExclusionWindow {
            columns: grid.columns,
            rows: grid.rows,
            radius,
            placed: vec![None; grid.len()],
        }
    }

    fn place(&mut self, column: u32, row: u32, id: EntryId) {
        self.placed[row as usize * self.columns as usize + column as usize] = Some(id);
    }

    /// Ids placed at any cell with |dc| <= radius and |dr| <= radius.
    fn excluded(&self, column: u32, row: u32) -> HashSet<EntryId> {
        let first_row = row.saturating_sub(self.radius);
        let last_row = row.saturating_add(self.radius).min(self.rows - 1);
        let first_column = column.saturating_sub(self.radius);
        let last_column = column.saturating_add(self.radius).min(self.columns - 1);

        let mut ids = HashSet::new();
        for r in first_row..=last_row {
            let offset = r as usize * self.columns as usize;
            for c in first_column..=last_column {
                if let Some(id) = self.placed[offset + c as usize] {
                    ids.insert(id);
                }
            }
        }
        ids
    }

    /// Number of cells in the largest window that fits in the grid.
    fn capacity(&self) -> usize {
        let side = 2 * self.radius as usize + 1;
        side.min(self.columns as usize) * side.min(self.rows as usize)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BuildState {
    Initialized,
    Scanning { column: u32, row: u32 },
    Complete,
}

/// Assigns catalog images to the cells of a source image.
///
/// Cells are visited row by row, left to right. Each takes the catalog entry
/// nearest to its average color that is not already used within the
/// exclusion window around it. The result depends on that order: earlier
/// cells get first pick.
pub struct MosaicBuilder<'a> {
    config: BuildConfig,
    cancel: Option<&'a AtomicBool>,
}

impl<'a> MosaicBuilder<'a> {
    pub fn new(config: BuildConfig) -> MosaicBuilder<'a> {
        MosaicBuilder {
            config,
            cancel: None,
        }
    }

    /// Stops the build at the next cell once `flag` is set.
    #[cfg(test)]
    pub(crate) fn with_cancel_flag(mut self, flag: &'a AtomicBool) -> MosaicBuilder<'a> {
        self.cancel = Some(flag);
        self
    }

    pub fn grid_for<S: PixelSource + ?Sized>(&self, source: &S) -> Result<GridSpec, MosaicError> {
        let (width, height) = source.dimensions();
        GridSpec::new(width, height, self.config.cell_width, self.config.cell_height)
    }

    /// Runs one complete build.
    ///
    /// # Errors
    /// * [`MosaicError::CatalogExhausted`] when a cell has no eligible entry left
    /// * [`MosaicError::Cancelled`] when the cancel flag was raised
    /// * [`MosaicError::InvalidGrid`] for zero sized cells or images
    /// * errors from the pixel source or the catalog, unchanged
    pub fn build<S, C>(&self, source: &S, catalog: &C) -> Result<Vec<TileAssignment>, MosaicError>
    where
        S: PixelSource + ?Sized,
        C: Catalog + ?Sized,
    {
        let mut state = BuildState::Initialized;
        debug!("build state {:?}", state);

        let grid = self.grid_for(source)?;
        info!(
            "Doing {}x{} cells of {}x{} pixels against {} catalog images",
            grid.columns,
            grid.rows,
            grid.cell_width,
            grid.cell_height,
            catalog.len()
        );

        // Averages do not depend on placement, so they can all be computed up front.
        let averages = (0..grid.len())
            .into_par_iter()
            .map(|index| {
                let (column, row) = grid.position(index);
                let (left, top, width, height) = grid.cell_rect(column, row);
                let pixels = source.region(left, top, width, height).map_err(|e| {
                    warn!("Cannot read cell ({}, {}): {}", column, row, e);
                    e
                })?;
                average_pixels(&pixels)
            })
            .collect::<Result<Vec<_>, MosaicError>>()?;

        let mut window = ExclusionWindow::new(&grid, self.config.window_radius);
        if catalog.len() < window.capacity() {
            warn!(
                "Catalog has {} images but a window of radius {} spans up to {} cells; the build can run out",
                catalog.len(),
                self.config.window_radius,
                window.capacity()
            );
        }

        let pb = progress_bar(grid.len() as u64, "Matching");
        let mut assignments = Vec::with_capacity(grid.len());
        for (index, cell_color) in averages.into_iter().enumerate() {
            let (column, row) = grid.position(index);
            if self.cancel.map_or(false, |flag| flag.load(Ordering::Relaxed)) {
                pb.abandon();
                info!("Build cancelled at cell ({}, {})", column, row);
                return Err(MosaicError::Cancelled { column, row });
            }
            state = BuildState::Scanning { column, row };
            trace!("build state {:?}", state);

            let exclude = window.excluded(column, row);
            let entry = match catalog.find_nearest(cell_color, &exclude)? {
                Some(entry) => entry,
                None => {
                    pb.abandon();
                    return Err(MosaicError::CatalogExhausted {
                        column,
                        row,
                        excluded: exclude.len(),
                    });
                }
            };

            let d = distance(entry.average_color, cell_color);
            window.place(column, row, entry.id);
            assignments.push(TileAssignment::new(column, row, entry, d));
            pb.inc(1);
        }
        pb.finish_and_clear();

        state = BuildState::Complete;
        debug!("build state {:?}", state);
        Ok(assignments)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mosaic::catalog::TileCatalog;
    use ::image::{Rgb, RgbImage};
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2015, 3, 29).unwrap()
    }

    fn catalog_of(colors: &[[u8; 3]]) -> TileCatalog {
        let mut catalog = TileCatalog::new();
        for (i, color) in colors.iter().enumerate() {
            catalog.push(PathBuf::from(format!("{}.jpg", i)), Rgb(*color), day()).unwrap();
        }
        catalog
    }

    fn random_catalog(rng: &mut StdRng, len: usize) -> TileCatalog {
        let colors: Vec<[u8; 3]> = (0..len).map(|_| [rng.gen(), rng.gen(), rng.gen()]).collect();
        catalog_of(&colors)
    }

    fn config(cell_width: u32, cell_height: u32, window_radius: u32) -> BuildConfig {
        BuildConfig {
            cell_width,
            cell_height,
            window_radius,
        }
    }

    fn assert_window_respected(assignments: &[TileAssignment], radius: u32) {
        for (i, a) in assignments.iter().enumerate() {
            for b in assignments[i + 1..].iter() {
                let near = (a.column as i64 - b.column as i64).abs() <= radius as i64
                    && (a.row as i64 - b.row as i64).abs() <= radius as i64;
                if near {
                    assert_ne!(
                        a.entry_id, b.entry_id,
                        "({}, {}) and ({}, {}) share an image",
                        a.column, a.row, b.column, b.row
                    );
                }
            }
        }
    }

    #[test]
    fn test_grid_rounds_up_partial_cells() {
        let grid = GridSpec::new(95, 50, 10, 20).unwrap();
        assert_eq!((grid.columns, grid.rows), (10, 3));
        assert_eq!(grid.len(), 30);
        assert_eq!(grid.cell_rect(9, 2), (90, 40, 5, 10));
        assert_eq!(grid.cell_rect(0, 0), (0, 0, 10, 20));
        assert_eq!(grid.position(11), (1, 1));
    }

    #[test]
    fn test_grid_rejects_empty_cells() {
        assert!(matches!(
            GridSpec::new(10, 10, 0, 5),
            Err(MosaicError::InvalidGrid { .. })
        ));
        assert!(matches!(
            GridSpec::new(0, 10, 5, 5),
            Err(MosaicError::InvalidGrid { .. })
        ));
    }

    #[test]
    fn test_default_config() {
        let config = BuildConfig::default();
        assert_eq!((config.cell_width, config.cell_height), (40, 30));
        assert_eq!(config.window_radius, 10);
    }

    #[test]
    fn test_single_black_cell_picks_black_entry() {
        let catalog = catalog_of(&[[255, 0, 0], [0, 255, 0], [0, 0, 0]]);
        let source = RgbImage::from_pixel(1, 1, Rgb([0, 0, 0]));
        let assignments = MosaicBuilder::new(config(1, 1, 10))
            .build(&source, &catalog)
            .unwrap();
        assert_eq!(assignments.len(), 1);
        let tile = &assignments[0];
        assert_eq!((tile.column, tile.row), (0, 0));
        assert_eq!(tile.entry_id, 3);
        assert_eq!(tile.source_path, PathBuf::from("2.jpg"));
        assert_eq!(tile.captured_on, day());
        assert_eq!(tile.distance, 0.0);
    }

    #[test]
    fn test_second_cell_exhausts_single_entry_catalog() {
        let catalog = catalog_of(&[[0, 0, 0]]);
        let source = RgbImage::from_pixel(2, 1, Rgb([0, 0, 0]));
        let result = MosaicBuilder::new(config(1, 1, 10)).build(&source, &catalog);
        match result {
            Err(MosaicError::CatalogExhausted {
                column,
                row,
                excluded,
            }) => {
                assert_eq!((column, row), (1, 0));
                assert_eq!(excluded, 1);
            }
            other => panic!("expected CatalogExhausted, got {:?}", other),
        }
    }

    #[test]
    fn test_exhaustion_is_reported_instead_of_repeating() {
        let catalog = catalog_of(&[[0, 0, 0], [10, 10, 10], [20, 20, 20]]);
        let source = RgbImage::from_pixel(2, 2, Rgb([0, 0, 0]));
        let result = MosaicBuilder::new(config(1, 1, 10)).build(&source, &catalog);
        assert!(matches!(
            result,
            Err(MosaicError::CatalogExhausted { column: 1, row: 1, .. })
        ));
    }

    #[test]
    fn test_every_cell_assigned_once_in_scan_order() {
        let mut rng = StdRng::seed_from_u64(5);
        let catalog = random_catalog(&mut rng, 40);
        let source = RgbImage::from_fn(95, 50, |x, y| Rgb([(x * 2) as u8, (y * 5) as u8, 90]));
        let assignments = MosaicBuilder::new(config(10, 10, 2))
            .build(&source, &catalog)
            .unwrap();

        assert_eq!(assignments.len(), 10 * 5);
        let positions: Vec<_> = assignments.iter().map(|a| (a.column, a.row)).collect();
        let expected: Vec<_> = (0..5).flat_map(|r| (0..10).map(move |c| (c, r))).collect();
        assert_eq!(positions, expected);
    }

    #[test]
    fn test_partial_cells_average_present_pixels_only() {
        // 3 pixels wide, 2 pixel cells: the second cell holds one blue pixel
        let source = RgbImage::from_fn(3, 1, |x, _| {
            if x < 2 {
                Rgb([255, 0, 0])
            } else {
                Rgb([0, 0, 255])
            }
        });
        let catalog = catalog_of(&[[255, 0, 0], [0, 0, 255], [0, 0, 0]]);
        let assignments = MosaicBuilder::new(config(2, 1, 0))
            .build(&source, &catalog)
            .unwrap();
        let ids: Vec<_> = assignments.iter().map(|a| a.entry_id).collect();
        assert_eq!(ids, vec![1, 2]);
        assert_eq!(assignments[1].distance, 0.0);
    }

    #[test]
    fn test_default_window_never_repeats_nearby() {
        let mut rng = StdRng::seed_from_u64(17);
        // at most 10 * 21 + 10 cells precede a cell inside its window
        let catalog = random_catalog(&mut rng, 221);
        let source = RgbImage::from_fn(25, 25, |_, _| Rgb([rng.gen(), rng.gen(), rng.gen()]));
        let assignments = MosaicBuilder::new(config(1, 1, DEFAULT_WINDOW_RADIUS))
            .build(&source, &catalog)
            .unwrap();
        assert_eq!(assignments.len(), 625);
        assert_window_respected(&assignments, DEFAULT_WINDOW_RADIUS);
    }

    #[test]
    fn test_small_window_allows_repeats_further_away() {
        let catalog = catalog_of(&[[0, 0, 0], [5, 5, 5], [90, 90, 90], [200, 200, 200], [250, 250, 250]]);
        let source = RgbImage::from_pixel(6, 1, Rgb([0, 0, 0]));
        let assignments = MosaicBuilder::new(config(1, 1, 1))
            .build(&source, &catalog)
            .unwrap();
        let ids: Vec<_> = assignments.iter().map(|a| a.entry_id).collect();
        assert_eq!(ids, vec![1, 2, 1, 2, 1, 2]);
        assert_window_respected(&assignments, 1);
    }

    #[test]
    fn test_zero_radius_reuses_best_match() {
        let catalog = catalog_of(&[[0, 0, 0], [255, 255, 255]]);
        let source = RgbImage::from_pixel(4, 4, Rgb([3, 3, 3]));
        let assignments = MosaicBuilder::new(config(1, 1, 0))
            .build(&source, &catalog)
            .unwrap();
        assert!(assignments.iter().all(|a| a.entry_id == 1));
    }

    #[test]
    fn test_earlier_cells_pick_first() {
        let catalog = catalog_of(&[[0, 0, 0], [30, 30, 30]]);
        let source = RgbImage::from_pixel(2, 1, Rgb([0, 0, 0]));
        let assignments = MosaicBuilder::new(config(1, 1, 10))
            .build(&source, &catalog)
            .unwrap();
        assert_eq!(assignments[0].entry_id, 1);
        assert_eq!(assignments[1].entry_id, 2);
        assert!(assignments[1].distance > 0.0);
    }

    #[test]
    fn test_cancelled_build_returns_no_assignments() {
        let catalog = catalog_of(&[[0, 0, 0]]);
        let source = RgbImage::from_pixel(4, 4, Rgb([0, 0, 0]));
        let cancel = AtomicBool::new(true);
        let result = MosaicBuilder::new(config(1, 1, 0))
            .with_cancel_flag(&cancel)
            .build(&source, &catalog);
        assert!(matches!(
            result,
            Err(MosaicError::Cancelled { column: 0, row: 0 })
        ));
    }

    #[test]
    fn test_exclusion_window_only_sees_placed_cells() {
        let grid = GridSpec::new(5, 5, 1, 1).unwrap();
        let mut window = ExclusionWindow::new(&grid, 1);
        window.place(0, 0, 7);
        window.place(1, 0, 8);
        window.place(4, 0, 9);
        let excluded = window.excluded(0, 1);
        assert_eq!(excluded, [7, 8].into_iter().collect());
        assert_eq!(window.capacity(), 9);
        assert!(window.excluded(4, 4).is_empty());
    }

    #[test]
    fn test_builds_are_deterministic() {
        let mut rng = StdRng::seed_from_u64(23);
        let catalog = random_catalog(&mut rng, 60);
        let source = RgbImage::from_fn(40, 30, |_, _| Rgb([rng.gen(), rng.gen(), rng.gen()]));
        let builder = MosaicBuilder::new(config(4, 3, 3));
        let first = builder.build(&source, &catalog).unwrap();
        let second = builder.build(&source, &catalog).unwrap();
        assert_eq!(first, second);
    }
}
