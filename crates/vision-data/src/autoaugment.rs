//! TrivialAugment (wide magnitude space).
//!
//! Each call picks one operation uniformly and one magnitude bin uniformly,
//! then applies it. Signed operations flip the magnitude sign with
//! probability 0.5.

use image::{Rgb, RgbImage};
use rand::Rng;

/// Number of magnitude bins per operation
pub const NUM_MAGNITUDE_BINS: usize = 31;

/// One TrivialAugment operation with a resolved magnitude.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum AugmentOp {
    Identity,
    ShearX(f32),
    ShearY(f32),
    /// Horizontal shift in pixels
    TranslateX(f32),
    /// Vertical shift in pixels
    TranslateY(f32),
    /// Counter-clockwise rotation in degrees
    Rotate(f32),
    Brightness(f32),
    Color(f32),
    Contrast(f32),
    Sharpness(f32),
    /// Number of bits kept per channel
    Posterize(u8),
    /// Pixels at or above this threshold are inverted
    Solarize(f32),
    AutoContrast,
    Equalize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OpKind {
    Identity,
    ShearX,
    ShearY,
    TranslateX,
    TranslateY,
    Rotate,
    Brightness,
    Color,
    Contrast,
    Sharpness,
    Posterize,
    Solarize,
    AutoContrast,
    Equalize,
}

const OPS: [OpKind; 14] = [
    OpKind::Identity,
    OpKind::ShearX,
    OpKind::ShearY,
    OpKind::TranslateX,
    OpKind::TranslateY,
    OpKind::Rotate,
    OpKind::Brightness,
    OpKind::Color,
    OpKind::Contrast,
    OpKind::Sharpness,
    OpKind::Posterize,
    OpKind::Solarize,
    OpKind::AutoContrast,
    OpKind::Equalize,
];

fn linspace(start: f32, end: f32, bin: usize) -> f32 {
    start + (end - start) * bin as f32 / (NUM_MAGNITUDE_BINS - 1) as f32
}

impl OpKind {
    fn signed(self) -> bool {
        matches!(
            self,
            OpKind::ShearX
                | OpKind::ShearY
                | OpKind::TranslateX
                | OpKind::TranslateY
                | OpKind::Rotate
                | OpKind::Brightness
                | OpKind::Color
                | OpKind::Contrast
                | OpKind::Sharpness
        )
    }

    fn resolve(self, bin: usize, negate: bool) -> AugmentOp {
        let sign = if negate && self.signed() { -1.0 } else { 1.0 };
        match self {
            OpKind::Identity => AugmentOp::Identity,
            OpKind::ShearX => AugmentOp::ShearX(sign * linspace(0.0, 0.99, bin)),
            OpKind::ShearY => AugmentOp::ShearY(sign * linspace(0.0, 0.99, bin)),
            OpKind::TranslateX => AugmentOp::TranslateX(sign * linspace(0.0, 32.0, bin)),
            OpKind::TranslateY => AugmentOp::TranslateY(sign * linspace(0.0, 32.0, bin)),
            OpKind::Rotate => AugmentOp::Rotate(sign * linspace(0.0, 135.0, bin)),
            OpKind::Brightness => AugmentOp::Brightness(sign * linspace(0.0, 0.99, bin)),
            OpKind::Color => AugmentOp::Color(sign * linspace(0.0, 0.99, bin)),
            OpKind::Contrast => AugmentOp::Contrast(sign * linspace(0.0, 0.99, bin)),
            OpKind::Sharpness => AugmentOp::Sharpness(sign * linspace(0.0, 0.99, bin)),
            OpKind::Posterize => AugmentOp::Posterize(posterize_bits(bin)),
            OpKind::Solarize => AugmentOp::Solarize(linspace(255.0, 0.0, bin)),
            OpKind::AutoContrast => AugmentOp::AutoContrast,
            OpKind::Equalize => AugmentOp::Equalize,
        }
    }
}

/// Bits kept for posterize bin `bin`: 8 down to 2 across the bins.
fn posterize_bits(bin: usize) -> u8 {
    let step = (NUM_MAGNITUDE_BINS - 1) as f32 / 6.0;
    8 - (bin as f32 / step).round() as u8
}

/// Randomly applies one TrivialAugment operation per image.
#[derive(Debug, Clone, Copy, Default)]
pub struct TrivialAugmentWide;

impl TrivialAugmentWide {
    pub fn new() -> Self {
        Self
    }

    /// Draws an operation and its magnitude
    pub fn sample_op<R: Rng + ?Sized>(&self, rng: &mut R) -> AugmentOp {
        let kind = OPS[rng.gen_range(0..OPS.len())];
        let bin = rng.gen_range(0..NUM_MAGNITUDE_BINS);
        let negate = rng.gen_bool(0.5);
        kind.resolve(bin, negate)
    }

    pub fn apply<R: Rng + ?Sized>(&self, image: &RgbImage, rng: &mut R) -> RgbImage {
        apply_op(image, self.sample_op(rng))
    }
}

/// Applies a single operation, returning a new image of the same size.
pub fn apply_op(image: &RgbImage, op: AugmentOp) -> RgbImage {
    match op {
        AugmentOp::Identity => image.clone(),
        AugmentOp::ShearX(m) => affine(image, [1.0, m, 0.0, 0.0, 1.0, 0.0]),
        AugmentOp::ShearY(m) => affine(image, [1.0, 0.0, 0.0, m, 1.0, 0.0]),
        AugmentOp::TranslateX(m) => affine(image, [1.0, 0.0, -m.trunc(), 0.0, 1.0, 0.0]),
        AugmentOp::TranslateY(m) => affine(image, [1.0, 0.0, 0.0, 0.0, 1.0, -m.trunc()]),
        AugmentOp::Rotate(degrees) => rotate(image, degrees),
        AugmentOp::Brightness(m) => {
            let black = RgbImage::new(image.width(), image.height());
            blend(&black, image, 1.0 + m)
        }
        AugmentOp::Color(m) => blend(&grayscale(image), image, 1.0 + m),
        AugmentOp::Contrast(m) => {
            let gray = grayscale(image);
            let mean = gray.pixels().map(|p| p[0] as f32).sum::<f32>()
                / (gray.width() * gray.height()).max(1) as f32;
            let level = mean.round() as u8;
            let degenerate = RgbImage::from_pixel(image.width(), image.height(), Rgb([level; 3]));
            blend(&degenerate, image, 1.0 + m)
        }
        AugmentOp::Sharpness(m) => blend(&smooth(image), image, 1.0 + m),
        AugmentOp::Posterize(bits) => posterize(image, bits),
        AugmentOp::Solarize(threshold) => solarize(image, threshold),
        AugmentOp::AutoContrast => autocontrast(image),
        AugmentOp::Equalize => equalize(image),
    }
}

/// Inverse-mapped affine warp. `coeffs` maps an output pixel `(x, y)` to the
/// input location `(a*x + b*y + c, d*x + e*y + f)`; samples outside are 0.
fn affine(image: &RgbImage, coeffs: [f32; 6]) -> RgbImage {
    let [a, b, c, d, e, f] = coeffs;
    RgbImage::from_fn(image.width(), image.height(), |x, y| {
        let (xf, yf) = (x as f32, y as f32);
        bilinear(image, a * xf + b * yf + c, d * xf + e * yf + f)
    })
}

fn rotate(image: &RgbImage, degrees: f32) -> RgbImage {
    let (sin, cos) = degrees.to_radians().sin_cos();
    let cx = image.width() as f32 * 0.5;
    let cy = image.height() as f32 * 0.5;
    RgbImage::from_fn(image.width(), image.height(), |x, y| {
        let dx = x as f32 + 0.5 - cx;
        let dy = y as f32 + 0.5 - cy;
        let sx = cos * dx - sin * dy + cx - 0.5;
        let sy = sin * dx + cos * dy + cy - 0.5;
        bilinear(image, sx, sy)
    })
}

fn bilinear(image: &RgbImage, x: f32, y: f32) -> Rgb<u8> {
    let (width, height) = (image.width() as i64, image.height() as i64);
    let x0 = x.floor();
    let y0 = y.floor();
    let fx = x - x0;
    let fy = y - y0;
    let (x0, y0) = (x0 as i64, y0 as i64);

    let fetch = |px: i64, py: i64| -> [f32; 3] {
        if px < 0 || py < 0 || px >= width || py >= height {
            [0.0; 3]
        } else {
            let p = image.get_pixel(px as u32, py as u32);
            [p[0] as f32, p[1] as f32, p[2] as f32]
        }
    };

    let p00 = fetch(x0, y0);
    let p10 = fetch(x0 + 1, y0);
    let p01 = fetch(x0, y0 + 1);
    let p11 = fetch(x0 + 1, y0 + 1);

    let mut out = [0u8; 3];
    for c in 0..3 {
        let top = p00[c] * (1.0 - fx) + p10[c] * fx;
        let bottom = p01[c] * (1.0 - fx) + p11[c] * fx;
        out[c] = (top * (1.0 - fy) + bottom * fy).round().clamp(0.0, 255.0) as u8;
    }
    Rgb(out)
}

/// `degenerate + factor * (image - degenerate)`, clamped to `[0, 255]`.
fn blend(degenerate: &RgbImage, image: &RgbImage, factor: f32) -> RgbImage {
    RgbImage::from_fn(image.width(), image.height(), |x, y| {
        let base = degenerate.get_pixel(x, y);
        let pixel = image.get_pixel(x, y);
        let mut out = [0u8; 3];
        for c in 0..3 {
            let value = base[c] as f32 + factor * (pixel[c] as f32 - base[c] as f32);
            out[c] = value.round().clamp(0.0, 255.0) as u8;
        }
        Rgb(out)
    })
}

fn grayscale(image: &RgbImage) -> RgbImage {
    RgbImage::from_fn(image.width(), image.height(), |x, y| {
        let p = image.get_pixel(x, y);
        let l = 0.2989 * p[0] as f32 + 0.587 * p[1] as f32 + 0.114 * p[2] as f32;
        let l = l.round().clamp(0.0, 255.0) as u8;
        Rgb([l, l, l])
    })
}

/// 3x3 smoothing with center weight 5; border pixels are kept as is.
fn smooth(image: &RgbImage) -> RgbImage {
    let (width, height) = image.dimensions();
    let mut out = image.clone();
    if width < 3 || height < 3 {
        return out;
    }
    for y in 1..height - 1 {
        for x in 1..width - 1 {
            let mut acc = [0.0f32; 3];
            for dy in 0..3 {
                for dx in 0..3 {
                    let weight = if dx == 1 && dy == 1 { 5.0 } else { 1.0 };
                    let p = image.get_pixel(x + dx - 1, y + dy - 1);
                    for c in 0..3 {
                        acc[c] += weight * p[c] as f32;
                    }
                }
            }
            let mut px = [0u8; 3];
            for c in 0..3 {
                px[c] = (acc[c] / 13.0).round().clamp(0.0, 255.0) as u8;
            }
            out.put_pixel(x, y, Rgb(px));
        }
    }
    out
}

fn posterize(image: &RgbImage, bits: u8) -> RgbImage {
    let mask: u8 = if bits >= 8 { 0xFF } else { !(0xFFu8 >> bits) };
    let mut out = image.clone();
    for pixel in out.pixels_mut() {
        for c in 0..3 {
            pixel[c] &= mask;
        }
    }
    out
}

fn solarize(image: &RgbImage, threshold: f32) -> RgbImage {
    let mut out = image.clone();
    for pixel in out.pixels_mut() {
        for c in 0..3 {
            if pixel[c] as f32 >= threshold {
                pixel[c] = 255 - pixel[c];
            }
        }
    }
    out
}

fn autocontrast(image: &RgbImage) -> RgbImage {
    let mut lo = [255u8; 3];
    let mut hi = [0u8; 3];
    for pixel in image.pixels() {
        for c in 0..3 {
            lo[c] = lo[c].min(pixel[c]);
            hi[c] = hi[c].max(pixel[c]);
        }
    }

    let mut out = image.clone();
    for pixel in out.pixels_mut() {
        for c in 0..3 {
            if hi[c] > lo[c] {
                let scale = 255.0 / (hi[c] - lo[c]) as f32;
                pixel[c] = ((pixel[c] - lo[c]) as f32 * scale).round().clamp(0.0, 255.0) as u8;
            }
        }
    }
    out
}

fn equalize(image: &RgbImage) -> RgbImage {
    let mut luts = [[0u8; 256]; 3];

    for (c, lut) in luts.iter_mut().enumerate() {
        let mut hist = [0usize; 256];
        for pixel in image.pixels() {
            hist[pixel[c] as usize] += 1;
        }

        let last = hist.iter().rposition(|&count| count > 0).map_or(0, |i| hist[i]);
        let step = (hist.iter().sum::<usize>() - last) / 255;
        if step == 0 {
            for (i, entry) in lut.iter_mut().enumerate() {
                *entry = i as u8;
            }
            continue;
        }

        let mut n = step / 2;
        for (i, entry) in lut.iter_mut().enumerate() {
            *entry = (n / step).min(255) as u8;
            n += hist[i];
        }
    }

    let mut out = image.clone();
    for pixel in out.pixels_mut() {
        for c in 0..3 {
            pixel[c] = luts[c][pixel[c] as usize];
        }
    }
    out
}
