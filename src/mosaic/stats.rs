use std::collections::HashMap;
use std::path::PathBuf;

use ::image::{Rgb, RgbImage};
use tracing::info;

use super::builder::{GridSpec, TileAssignment};
use super::catalog::EntryId;

/// How many images the summary lists as most used and as worst matched.
const TOP_N: usize = 10;

/// Statistics collector over the assignments of a finished build.
///
/// Tracks which image went where and how far its color was from the cell
/// it replaced.
pub struct RenderStats<'a> {
    assignments: &'a [TileAssignment],
}

/// Aggregate figures of a build.
#[derive(Debug, Clone, PartialEq)]
pub struct Summary {
    pub tiles_placed: usize,
    pub unique_images: usize,
    pub average_distance: f64,
    /// Image paths with their use count, most used first
    pub most_used: Vec<(PathBuf, usize)>,
    /// Cells with the largest distance, worst first
    pub worst_matches: Vec<TileAssignment>,
}

impl<'a> RenderStats<'a> {
    pub fn new(assignments: &'a [TileAssignment]) -> RenderStats<'a> {
        RenderStats { assignments }
    }

    pub fn tile_count(&self) -> usize {
        self.assignments.len()
    }

    /// Computes the summary, or `None` if nothing was placed.
    pub fn summary(&self) -> Option<Summary> {
        if self.assignments.is_empty() {
            return None;
        }

        let mut usage: HashMap<EntryId, (&PathBuf, usize)> = HashMap::new();
        let mut total_distance = 0.0;
        for a in self.assignments {
            total_distance += a.distance;
            usage.entry(a.entry_id).or_insert((&a.source_path, 0)).1 += 1;
        }
        let unique_images = usage.len();

        let mut most_used: Vec<_> = usage
            .into_values()
            .map(|(path, count)| (path.clone(), count))
            .collect();
        most_used.sort_by(|(pa, a), (pb, b)| b.cmp(a).then_with(|| pa.cmp(pb)));
        most_used.truncate(TOP_N);

        let mut worst_matches = self.assignments.to_vec();
        worst_matches.sort_by(|a, b| b.distance.total_cmp(&a.distance));
        worst_matches.truncate(TOP_N);

        Some(Summary {
            tiles_placed: self.assignments.len(),
            unique_images,
            average_distance: total_distance / self.assignments.len() as f64,
            most_used,
            worst_matches,
        })
    }

    /// Logs the summary at info level.
    pub fn summarise(&self) {
        let summary = match self.summary() {
            Some(summary) => summary,
            None => {
                info!("No tiles recorded in statistics");
                return;
            }
        };

        info!(
            "Mosaic statistics: {} tiles placed, {} unique images, average color distance {:.3}",
            summary.tiles_placed, summary.unique_images, summary.average_distance
        );
        for (i, (path, count)) in summary.most_used.iter().enumerate() {
            info!("  most used {}. {} ({} times)", i + 1, path.display(), count);
        }
        for (i, a) in summary.worst_matches.iter().enumerate() {
            info!(
                "  worst match {}. {} at ({}, {}) (distance: {:.3})",
                i + 1,
                a.source_path.display(),
                a.column,
                a.row,
                a.distance
            );
        }
    }

    /// Render a grayscale visualization of tile color distances.
    ///
    /// One pixel per grid cell; brighter means a worse match. Cells without
    /// an assignment stay black.
    pub fn render(&self, grid: &GridSpec) -> RgbImage {
        let max_distance = self
            .assignments
            .iter()
            .map(|a| a.distance)
            .fold(0.0_f64, f64::max);

        let mut image = RgbImage::new(grid.columns, grid.rows);
        for a in self.assignments {
            let normalized = if max_distance > 0.0 {
                a.distance / max_distance
            } else {
                0.0
            };
            let brightness = (normalized * 255.0) as u8;
            if a.column < grid.columns && a.row < grid.rows {
                image.put_pixel(a.column, a.row, Rgb([brightness, brightness, brightness]));
            }
        }
        image
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn placed(column: u32, row: u32, entry_id: EntryId, distance: f64) -> TileAssignment {
        TileAssignment {
            column,
            row,
            entry_id,
            source_path: PathBuf::from(format!("test{}.jpg", entry_id)),
            captured_on: NaiveDate::from_ymd_opt(2015, 3, 29).unwrap(),
            distance,
        }
    }

    #[test]
    fn test_summary_empty() {
        let stats = RenderStats::new(&[]);
        assert_eq!(stats.tile_count(), 0);
        assert_eq!(stats.summary(), None);
        // Should not panic
        stats.summarise();
    }

    #[test]
    fn test_summary_with_tiles() {
        let assignments = vec![
            placed(0, 0, 1, 10.0),
            placed(1, 0, 2, 20.0),
            placed(2, 0, 1, 15.0),
        ];
        let stats = RenderStats::new(&assignments);
        let summary = stats.summary().unwrap();

        assert_eq!(summary.tiles_placed, 3);
        assert_eq!(summary.unique_images, 2);
        assert!((summary.average_distance - 15.0).abs() < 1e-9);
        assert_eq!(
            summary.most_used,
            vec![(PathBuf::from("test1.jpg"), 2), (PathBuf::from("test2.jpg"), 1)]
        );
        let worst: Vec<_> = summary.worst_matches.iter().map(|a| a.distance).collect();
        assert_eq!(worst, vec![20.0, 15.0, 10.0]);
        stats.summarise();
    }

    #[test]
    fn test_summary_keeps_top_ten() {
        let assignments: Vec<_> = (0..25).map(|i| placed(i, 0, i + 1, f64::from(i))).collect();
        let summary = RenderStats::new(&assignments).summary().unwrap();
        assert_eq!(summary.unique_images, 25);
        assert_eq!(summary.most_used.len(), 10);
        assert_eq!(summary.worst_matches.len(), 10);
        assert_eq!(summary.worst_matches[0].distance, 24.0);
    }

    #[test]
    fn test_render_basic() {
        let grid = GridSpec::new(32, 32, 16, 16).unwrap();
        let assignments = vec![
            placed(0, 0, 1, 50.0),
            placed(1, 0, 2, 100.0),
            placed(0, 1, 3, 0.0),
            placed(1, 1, 4, 150.0),
        ];
        let rendered = RenderStats::new(&assignments).render(&grid);
        assert_eq!(rendered.dimensions(), (2, 2));

        // Lower distance renders darker
        assert!(rendered.get_pixel(0, 0)[0] < rendered.get_pixel(1, 1)[0]);
        assert_eq!(*rendered.get_pixel(1, 1), Rgb([255, 255, 255]));
        assert_eq!(*rendered.get_pixel(0, 1), Rgb([0, 0, 0]));
    }

    #[test]
    fn test_render_all_exact_matches() {
        let grid = GridSpec::new(3, 1, 1, 1).unwrap();
        let assignments = vec![placed(0, 0, 1, 0.0), placed(1, 0, 2, 0.0)];
        let rendered = RenderStats::new(&assignments).render(&grid);
        assert_eq!(rendered.dimensions(), (3, 1));
        assert!(rendered.pixels().all(|p| *p == Rgb([0, 0, 0])));
    }
}
