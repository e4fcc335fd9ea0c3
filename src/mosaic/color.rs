//! sRGB to CIE L*a*b* conversion and the CIE94 color difference.
//!
//! Conversion follows the usual EasyRGB / Bruce Lindbloom formulation with a
//! 2° observer and the D65 reference white.

use ::image::Rgb;

use super::error::MosaicError;

/// D65 reference white, scaled to Y = 100.
const D65: [f64; 3] = [95.047, 100.0, 108.883];

/// Linear sRGB to XYZ, observer 2°, illuminant D65.
const SRGB_TO_XYZ: [[f64; 3]; 3] = [
    [0.4124, 0.3576, 0.1805],
    [0.2126, 0.7152, 0.0722],
    [0.0193, 0.1192, 0.9505],
];

// CIE94 weights for graphic arts
const K_L: f64 = 1.0;
const K_1: f64 = 0.045;
const K_2: f64 = 0.015;
const S_L: f64 = 1.0;
const K_C: f64 = 1.0;
const K_H: f64 = 1.0;

/// A color in CIE L*a*b* space.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Lab {
    pub l: f64,
    pub a: f64,
    pub b: f64,
}

impl Lab {
    fn chroma(&self) -> f64 {
        (self.a * self.a + self.b * self.b).max(0.0).sqrt()
    }
}

impl From<Rgb<u8>> for Lab {
    fn from(rgb: Rgb<u8>) -> Self {
        to_lab(rgb)
    }
}

fn linearize(channel: u8) -> f64 {
    let c = f64::from(channel) / 255.0;
    let linear = if c > 0.04045 {
        ((c + 0.055) / 1.055).powf(2.4)
    } else {
        c / 12.92
    };
    linear * 100.0
}

fn lab_f(t: f64) -> f64 {
    if t > 0.008856 {
        t.cbrt()
    } else {
        7.787 * t + 16.0 / 116.0
    }
}

/// Converts an sRGB color to CIE L*a*b*. Total over all 24-bit inputs.
pub fn to_lab(rgb: Rgb<u8>) -> Lab {
    let linear = [linearize(rgb[0]), linearize(rgb[1]), linearize(rgb[2])];

    let mut xyz = [0.0; 3];
    for (i, row) in SRGB_TO_XYZ.iter().enumerate() {
        let value = row[0] * linear[0] + row[1] * linear[1] + row[2] * linear[2];
        xyz[i] = lab_f(value / D65[i]);
    }
    let [fx, fy, fz] = xyz;

    Lab {
        l: 116.0 * fy - 16.0,
        a: 500.0 * (fx - fy),
        b: 200.0 * (fy - fz),
    }
}

/// CIE94 distance between two Lab colors.
///
/// The chroma weighting uses `reference` only, so the result is not symmetric:
/// `cie94(x, y)` and `cie94(y, x)` generally differ.
pub fn cie94(reference: &Lab, sample: &Lab) -> f64 {
    let c1 = reference.chroma();
    let delta_c = c1 - sample.chroma();
    let delta_l = reference.l - sample.l;
    let delta_a = reference.a - sample.a;
    let delta_b = reference.b - sample.b;
    let delta_h_sq = (delta_a * delta_a + delta_b * delta_b - delta_c * delta_c).max(0.0);

    let l_term = delta_l / (K_L * S_L);
    let c_term = delta_c / (K_C * (1.0 + K_1 * c1));
    let h_weight = K_H * (1.0 + K_2 * c1);

    (l_term * l_term + c_term * c_term + delta_h_sq / (h_weight * h_weight))
        .max(0.0)
        .sqrt()
}

/// CIE94 distance between two sRGB colors, `rgb1` being the reference.
pub fn distance(rgb1: Rgb<u8>, rgb2: Rgb<u8>) -> f64 {
    cie94(&to_lab(rgb1), &to_lab(rgb2))
}

/// Builds an RGB color from wide integers, rejecting channels outside 0..=255.
pub fn checked_rgb(r: i64, g: i64, b: i64) -> Result<Rgb<u8>, MosaicError> {
    let channel = |name: &'static str, value: i64| {
        u8::try_from(value).map_err(|_| MosaicError::InvalidColorInput {
            channel: name,
            value,
        })
    };
    Ok(Rgb([channel("red", r)?, channel("green", g)?, channel("blue", b)?]))
}
