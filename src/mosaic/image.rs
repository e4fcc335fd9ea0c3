use std::ffi::OsStr;
use std::fs::read_dir;
use std::io;
use std::path::{Path, PathBuf};

use ::image::imageops::FilterType;
use ::image::{DynamicImage, Rgb, RgbImage};
use chrono::{DateTime, Local, NaiveDate};
use exif::{In, Tag};
use tracing::{debug, warn};

use super::error::{ImageError, MosaicError};

/// Read access to the pixels of a decoded source image.
pub trait PixelSource: Sync {
    fn dimensions(&self) -> (u32, u32);

    /// Row-major pixels of the rectangle at (`x`, `y`) of the given size.
    fn region(&self, x: u32, y: u32, width: u32, height: u32) -> Result<Vec<Rgb<u8>>, MosaicError>;
}

impl PixelSource for RgbImage {
    fn dimensions(&self) -> (u32, u32) {
        (self.width(), self.height())
    }

    fn region(&self, x: u32, y: u32, width: u32, height: u32) -> Result<Vec<Rgb<u8>>, MosaicError> {
        let in_bounds = x.checked_add(width).map_or(false, |r| r <= self.width())
            && y.checked_add(height).map_or(false, |b| b <= self.height());
        if !in_bounds {
            let reason = format!(
                "region {}x{} at ({}, {}) is outside the {}x{} image",
                width,
                height,
                x,
                y,
                self.width(),
                self.height()
            );
            return Err(MosaicError::SourceImageUnreadable(ImageError {
                path: PathBuf::new(),
                error: ::image::ImageError::Parameter(::image::error::ParameterError::from_kind(
                    ::image::error::ParameterErrorKind::Generic(reason),
                )),
            }));
        }
        let mut pixels = Vec::with_capacity(width as usize * height as usize);
        for row in y..y + height {
            for column in x..x + width {
                pixels.push(*self.get_pixel(column, row));
            }
        }
        Ok(pixels)
    }
}

/// Recursively collects files under `path` whose extension passes `extension`,
/// sorted so that catalog ids come out the same on every scan.
pub fn find_images(path: &Path, extension: impl Fn(&OsStr) -> bool) -> io::Result<Vec<PathBuf>> {
    let mut stack: Vec<PathBuf> = vec![path.to_owned()];
    let mut images_paths = vec![];
    while let Some(p) = stack.pop() {
        let entries = read_dir(p)?;
        for entry in entries {
            let entry = entry?;
            let path = entry.path();
            if path.is_dir() {
                stack.push(path);
            } else if path.extension().map_or(false, |ext| extension(ext)) {
                images_paths.push(path);
            }
        }
    }
    images_paths.sort();
    Ok(images_paths)
}

/// Case-insensitive extension filter for [`find_images`].
pub fn has_extension<'a>(extensions: &'a [String]) -> impl Fn(&OsStr) -> bool + 'a {
    move |ext: &OsStr| {
        let ext = ext.to_string_lossy();
        extensions.iter().any(|e| e.eq_ignore_ascii_case(&ext))
    }
}

/// Opens an image file and converts it to 8-bit RGB.
pub fn open_rgb(path: &Path) -> Result<RgbImage, ImageError> {
    ::image::open(path)
        .map(|img| img.to_rgb8())
        .map_err(|error| ImageError {
            path: path.to_owned(),
            error,
        })
}

/// Works out when a library image was taken.
///
/// Library images are conventionally named after their day, as in
/// `2015-03-29.jpg` or `2015-03-29_small.jpg`; otherwise the EXIF date is
/// used, and as a last resort the file modification date.
pub fn capture_date(path: &Path) -> io::Result<NaiveDate> {
    if let Some(date) = path
        .file_stem()
        .and_then(|stem| stem.to_str())
        .and_then(date_from_file_name)
    {
        return Ok(date);
    }
    if let Some(date) = get_exif_date(path) {
        return Ok(date);
    }
    let modified = std::fs::metadata(path)?.modified()?;
    Ok(DateTime::<Local>::from(modified).date_naive())
}

fn date_from_file_name(stem: &str) -> Option<NaiveDate> {
    let prefix = stem.get(..10)?;
    NaiveDate::parse_from_str(prefix, "%Y-%m-%d").ok()
}

/// Parses an EXIF date such as `2003:03:19 11:44:30`, ignoring the time.
fn parse_exif_date(value: &str) -> Option<NaiveDate> {
    let value = value.trim_end_matches('\0');
    let date = value.split(' ').next()?;
    NaiveDate::parse_from_str(date, "%Y:%m:%d").ok()
}

fn get_exif_date(file_path: &Path) -> Option<NaiveDate> {
    let file = std::fs::File::open(file_path).ok()?;
    let mut bufreader = std::io::BufReader::new(&file);
    let exif = exif::Reader::new().read_from_container(&mut bufreader).ok()?;

    for tag in [Tag::DateTimeOriginal, Tag::DateTime, Tag::DateTimeDigitized] {
        if let Some(field) = exif.get_field(tag, In::PRIMARY) {
            if let exif::Value::Ascii(values) = &field.value {
                let parsed = values
                    .first()
                    .and_then(|raw| std::str::from_utf8(raw).ok())
                    .and_then(parse_exif_date);
                if parsed.is_some() {
                    return parsed;
                }
            }
        }
    }
    None
}

fn get_jpeg_orientation(file_path: &Path) -> Option<u32> {
    let file = std::fs::File::open(file_path).ok()?;
    let mut bufreader = std::io::BufReader::new(&file);
    let exif = exif::Reader::new().read_from_container(&mut bufreader).ok()?;
    match exif.get_field(Tag::Orientation, In::PRIMARY)?.value.get_uint(0) {
        Some(v @ 1..=8) => Some(v),
        _ => None,
    }
}

fn rotate(img: DynamicImage, orientation: u32) -> DynamicImage {
    match orientation {
        2 => img.fliph(),
        3 => img.rotate180(),
        4 => img.flipv(),
        5 => img.rotate90().fliph(),
        6 => img.rotate90(),
        7 => img.rotate270().fliph(),
        8 => img.rotate270(),
        _ => img,
    }
}

/// Loads a catalog image ready to be placed in a mosaic: upright, cropped to
/// the target aspect ratio and resized to `width`x`height`.
///
/// Resized tiles are cached in the user cache directory keyed by the content
/// hash of the original file, so repeated renders skip the decode.
pub fn prepare_tile(path: &Path, width: u32, height: u32) -> Result<RgbImage, ImageError> {
    let bytes = std::fs::read(path).map_err(|e| ImageError {
        path: path.to_owned(),
        error: e.into(),
    })?;
    let cache_path = dirs::cache_dir().map(|dir| {
        dir.join("labmosaic")
            .join(format!("{:x}.{}x{}.png", md5::compute(&bytes), width, height))
    });

    if let Some(cached) = cache_path.as_deref().and_then(|p| ::image::open(p).ok()) {
        let cached = cached.to_rgb8();
        if cached.dimensions() == (width, height) {
            return Ok(cached);
        }
    }

    let img = ::image::load_from_memory(&bytes).map_err(|error| ImageError {
        path: path.to_owned(),
        error,
    })?;
    let img = rotate(img, get_jpeg_orientation(path).unwrap_or(1));
    let tile = img.resize_to_fill(width, height, FilterType::Lanczos3).to_rgb8();

    if let Some(cache_path) = cache_path {
        let saved = cache_path
            .parent()
            .map_or(Ok(()), std::fs::create_dir_all)
            .map_err(::image::ImageError::from)
            .and_then(|_| tile.save(&cache_path));
        match saved {
            Ok(()) => debug!("cached tile {} at {}", path.display(), cache_path.display()),
            Err(e) => warn!("could not cache tile {}: {}", path.display(), e),
        }
    }
    Ok(tile)
}
