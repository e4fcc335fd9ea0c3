use std::path::Path;

use ::image::imageops::{self, FilterType};
use ::image::{DynamicImage, Rgba, RgbImage, RgbaImage};
use rayon::iter::ParallelIterator;
use rayon::slice::ParallelSlice;
use tracing::info;

use super::builder::{GridSpec, TileAssignment};
use super::error::{ImageError, MosaicError};
use super::progress_bar;

/// Lays out the tiles of a finished build.
///
/// Each cell becomes a `cell_width * scale` by `cell_height * scale` tile at
/// `(column * cell_width * scale, row * cell_height * scale)`, so the output
/// is the source image scaled by `scale`. Tiles of the last column and row
/// are cut at the image edge like the cells they replace.
///
/// `load_tile` is given the assignment and the tile size to produce. Rows
/// are rendered in parallel and merged in order.
///
/// # Errors
/// * [`MosaicError::InvalidGrid`] if `scale` is 0
/// * the first [`ImageError`] returned by `load_tile`
pub fn render<F>(
    grid: &GridSpec,
    assignments: &[TileAssignment],
    scale: u32,
    load_tile: F,
) -> Result<RgbImage, MosaicError>
where
    F: Fn(&TileAssignment, u32, u32) -> Result<RgbImage, ImageError> + Sync,
{
    if scale == 0 {
        return Err(MosaicError::InvalidGrid {
            cell_width: 0,
            cell_height: 0,
            image_width: grid.image_width,
            image_height: grid.image_height,
        });
    }
    let tile_width = grid.cell_width * scale;
    let tile_height = grid.cell_height * scale;
    let output_width = grid.image_width * scale;
    let output_height = grid.image_height * scale;
    info!(
        "Rendering {} tiles of {}x{} into a {}x{} image",
        assignments.len(),
        tile_width,
        tile_height,
        output_width,
        output_height
    );

    let pb = progress_bar(assignments.len() as u64, "Rendering");
    let segments = assignments
        .par_chunks(grid.columns as usize)
        .map(|row_tiles| -> Result<(u32, RgbImage), ImageError> {
            let mut segment = RgbImage::new(output_width, tile_height);
            for assignment in row_tiles {
                let tile = load_tile(assignment, tile_width, tile_height)?;
                let x = i64::from(assignment.column) * i64::from(tile_width);
                imageops::replace(&mut segment, &tile, x, 0);
                pb.inc(1);
            }
            let row = row_tiles.first().map_or(0, |a| a.row);
            Ok((row, segment))
        })
        .collect::<Result<Vec<_>, ImageError>>()?;
    pb.finish_and_clear();

    let mut output = RgbImage::new(output_width, output_height);
    for (row, segment) in segments {
        imageops::replace(&mut output, &segment, 0, i64::from(row) * i64::from(tile_height));
    }
    Ok(output)
}

/// Lays `source` over `output` with the given opacity in [0, 1].
///
/// The source is stretched with nearest-neighbour sampling to the output size.
/// The mosaic is opaque, so the result is too.
pub fn apply_tint(output: RgbImage, source: &RgbImage, opacity: f64) -> RgbImage {
    let alpha_value = (255.0 * opacity.clamp(0.0, 1.0)).round() as u8;
    let overlay = RgbaImage::from_fn(source.width(), source.height(), |x, y| {
        let p = source.get_pixel(x, y);
        Rgba([p[0], p[1], p[2], alpha_value])
    });
    let overlay = imageops::resize(&overlay, output.width(), output.height(), FilterType::Nearest);

    let mut tinted = DynamicImage::ImageRgb8(output).to_rgba8();
    imageops::overlay(&mut tinted, &overlay, 0, 0);
    DynamicImage::ImageRgba8(tinted).to_rgb8()
}

/// Writes an image in the format named by the extension of `path`.
pub fn save_output(image: &RgbImage, path: &Path) -> Result<(), ImageError> {
    image.save(path).map_err(|error| ImageError {
        path: path.to_owned(),
        error,
    })
}
