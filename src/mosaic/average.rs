use std::iter::FromIterator;

use ::image::{Rgb, RgbImage};
use rayon::iter::{FromParallelIterator, IntoParallelIterator, IntoParallelRefIterator, ParallelIterator};

use super::error::MosaicError;

/// Running channel sums of a pixel sample, mergeable in any order.
///
/// `RgbAverage::default()` is the identity of `combine`, so partial sums from
/// arbitrary chunks can be folded and reduced in parallel and still agree
/// with a single sequential pass.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RgbAverage {
    r: u64,
    g: u64,
    b: u64,
    count: u64,
}

impl RgbAverage {
    pub fn accumulate(&mut self, pixel: Rgb<u8>) {
        self.r += u64::from(pixel[0]);
        self.g += u64::from(pixel[1]);
        self.b += u64::from(pixel[2]);
        self.count += 1;
    }

    pub fn combine(mut self, other: RgbAverage) -> RgbAverage {
        self.r += other.r;
        self.g += other.g;
        self.b += other.b;
        self.count += other.count;
        self
    }

    /// Truncating per-channel mean.
    ///
    /// # Errors
    /// [`MosaicError::EmptyRegion`] if nothing was accumulated.
    pub fn value(&self) -> Result<Rgb<u8>, MosaicError> {
        if self.count == 0 {
            return Err(MosaicError::EmptyRegion);
        }
        // a mean of u8 samples always fits in a u8
        Ok(Rgb([
            (self.r / self.count) as u8,
            (self.g / self.count) as u8,
            (self.b / self.count) as u8,
        ]))
    }
}

impl Extend<Rgb<u8>> for RgbAverage {
    fn extend<I: IntoIterator<Item = Rgb<u8>>>(&mut self, iter: I) {
        for pixel in iter {
            self.accumulate(pixel);
        }
    }
}

impl FromIterator<Rgb<u8>> for RgbAverage {
    fn from_iter<I: IntoIterator<Item = Rgb<u8>>>(iter: I) -> Self {
        let mut average = RgbAverage::default();
        average.extend(iter);
        average
    }
}

impl FromParallelIterator<Rgb<u8>> for RgbAverage {
    fn from_par_iter<I>(par_iter: I) -> Self
    where
        I: IntoParallelIterator<Item = Rgb<u8>>,
    {
        par_iter
            .into_par_iter()
            .fold(RgbAverage::default, |mut acc, pixel| {
                acc.accumulate(pixel);
                acc
            })
            .reduce(RgbAverage::default, RgbAverage::combine)
    }
}

/// Average color of a flat pixel sample, reduced on the rayon pool.
pub fn average_pixels(pixels: &[Rgb<u8>]) -> Result<Rgb<u8>, MosaicError> {
    pixels
        .par_iter()
        .copied()
        .collect::<RgbAverage>()
        .value()
}

/// Calculate the average color of a rectangular region in an RGB image.
///
/// # Arguments
/// * `img` - The source image
/// * `rect` - Rectangle as (left, top, width, height)
///
/// # Panics
/// Panics if the rectangle extends beyond image boundaries or if the rectangle is empty.
pub fn average_color(img: &RgbImage, rect: (u32, u32, u32, u32)) -> Rgb<u8> {
    let (left, top, width, height) = rect;

    assert!(width > 0 && height > 0, "Rectangle dimensions must be positive");
    assert!(left + width <= img.width(), "Rectangle extends beyond image width");
    assert!(top + height <= img.height(), "Rectangle extends beyond image height");

    let average: RgbAverage = (top..top + height)
        .into_par_iter()
        .flat_map_iter(|y| (left..left + width).map(move |x| *img.get_pixel(x, y)))
        .collect();
    match average.value() {
        Ok(color) => color,
        Err(_) => unreachable!("validated rectangle has pixels"),
    }
}
