//! Image transform primitives shared by the train and validation pipelines.
//!
//! Geometric steps operate on `RgbImage`; everything after tensor conversion
//! operates on a flat CHW `f32` buffer.

use image::imageops::{self, FilterType};
use image::{Rgb, RgbImage};
use rand::Rng;
use rand_distr::StandardNormal;

/// Per-channel normalization constants applied after float conversion.
pub const NORMALIZE_MEAN: [f32; 3] = [0.5, 0.5, 0.5];
/// Per-channel standard deviations applied after float conversion.
pub const NORMALIZE_STD: [f32; 3] = [0.5, 0.5, 0.5];

const CROP_SCALE: (f64, f64) = (0.08, 1.0);
const CROP_RATIO: (f64, f64) = (3.0 / 4.0, 4.0 / 3.0);
const ERASE_SCALE: (f64, f64) = (0.02, 0.33);
const ERASE_RATIO: (f64, f64) = (0.3, 3.3);
const MAX_ATTEMPTS: usize = 10;

/// A crop window in pixel coordinates
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CropWindow {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

/// Samples a random area/aspect-ratio window, falling back to a center crop
/// clamped to the allowed ratio range.
pub fn sample_resized_crop<R: Rng + ?Sized>(width: u32, height: u32, rng: &mut R) -> CropWindow {
    let area = width as f64 * height as f64;
    let log_ratio = (CROP_RATIO.0.ln(), CROP_RATIO.1.ln());

    for _ in 0..MAX_ATTEMPTS {
        let target_area = area * rng.gen_range(CROP_SCALE.0..=CROP_SCALE.1);
        let aspect = rng.gen_range(log_ratio.0..=log_ratio.1).exp();

        let w = (target_area * aspect).sqrt().round() as u32;
        let h = (target_area / aspect).sqrt().round() as u32;

        if w > 0 && h > 0 && w <= width && h <= height {
            let x = rng.gen_range(0..=width - w);
            let y = rng.gen_range(0..=height - h);
            return CropWindow { x, y, width: w, height: h };
        }
    }

    let in_ratio = width as f64 / height as f64;
    let (w, h) = if in_ratio < CROP_RATIO.0 {
        (width, ((width as f64 / CROP_RATIO.0).round() as u32).min(height))
    } else if in_ratio > CROP_RATIO.1 {
        (((height as f64 * CROP_RATIO.1).round() as u32).min(width), height)
    } else {
        (width, height)
    };
    CropWindow {
        x: (width - w) / 2,
        y: (height - h) / 2,
        width: w.max(1),
        height: h.max(1),
    }
}

/// Random resized crop to a `size`×`size` output with bilinear resampling.
pub fn random_resized_crop<R: Rng + ?Sized>(image: &RgbImage, size: u32, rng: &mut R) -> RgbImage {
    let window = sample_resized_crop(image.width(), image.height(), rng);
    let cropped = imageops::crop_imm(image, window.x, window.y, window.width, window.height).to_image();
    imageops::resize(&cropped, size, size, FilterType::Triangle)
}

/// Resizes so the shorter side equals `size`, keeping the aspect ratio.
pub fn resize_shorter_side(image: &RgbImage, size: u32) -> RgbImage {
    let (width, height) = image.dimensions();
    let (new_w, new_h) = if width <= height {
        (size, ((size as u64 * height as u64) / width.max(1) as u64) as u32)
    } else {
        (((size as u64 * width as u64) / height.max(1) as u64) as u32, size)
    };
    if (new_w, new_h) == (width, height) {
        return image.clone();
    }
    imageops::resize(image, new_w.max(1), new_h.max(1), FilterType::Triangle)
}

/// Center crop to `size`×`size`, zero-padding images smaller than the crop.
pub fn center_crop(image: &RgbImage, size: u32) -> RgbImage {
    let (width, height) = image.dimensions();

    let padded = if width < size || height < size {
        let pad_w = width.max(size);
        let pad_h = height.max(size);
        let mut canvas = RgbImage::from_pixel(pad_w, pad_h, Rgb([0, 0, 0]));
        imageops::replace(
            &mut canvas,
            image,
            ((pad_w - width) / 2) as i64,
            ((pad_h - height) / 2) as i64,
        );
        canvas
    } else {
        image.clone()
    };

    let (width, height) = padded.dimensions();
    let top = ((height - size) as f64 / 2.0).round() as u32;
    let left = ((width - size) as f64 / 2.0).round() as u32;
    imageops::crop_imm(&padded, left, top, size, size).to_image()
}

/// Horizontal flip with probability `p`.
pub fn random_horizontal_flip<R: Rng + ?Sized>(image: &mut RgbImage, p: f64, rng: &mut R) {
    if rng.gen_bool(p) {
        imageops::flip_horizontal_in_place(image);
    }
}

/// Converts to a CHW float buffer scaled to `[0, 1]`.
pub fn to_chw_float(image: &RgbImage) -> Vec<f32> {
    let (width, height) = image.dimensions();
    let plane = width as usize * height as usize;
    let mut data = vec![0.0f32; 3 * plane];

    for (x, y, pixel) in image.enumerate_pixels() {
        let offset = y as usize * width as usize + x as usize;
        for c in 0..3 {
            data[c * plane + offset] = pixel[c] as f32 / 255.0;
        }
    }
    data
}

/// In-place `(x - mean) / std` over a CHW buffer.
pub fn normalize(data: &mut [f32], mean: &[f32; 3], std: &[f32; 3]) {
    let plane = data.len() / 3;
    for (c, channel) in data.chunks_mut(plane.max(1)).enumerate().take(3) {
        for value in channel.iter_mut() {
            *value = (*value - mean[c]) / std[c];
        }
    }
}

/// Random erasing over a normalized CHW buffer.
///
/// With probability `p`, a rectangle of random area and aspect ratio is
/// filled with fresh standard-normal values. Returns whether a region was
/// erased; when no sampled rectangle fits the image the buffer is untouched.
pub fn random_erasing<R: Rng + ?Sized>(
    data: &mut [f32],
    height: usize,
    width: usize,
    p: f64,
    rng: &mut R,
) -> bool {
    if p <= 0.0 || !rng.gen_bool(p.min(1.0)) {
        return false;
    }

    let channels = data.len() / (height * width).max(1);
    let area = (height * width) as f64;
    let log_ratio = (ERASE_RATIO.0.ln(), ERASE_RATIO.1.ln());

    for _ in 0..MAX_ATTEMPTS {
        let erase_area = area * rng.gen_range(ERASE_SCALE.0..=ERASE_SCALE.1);
        let aspect = rng.gen_range(log_ratio.0..=log_ratio.1).exp();

        let eh = (erase_area * aspect).sqrt().round() as usize;
        let ew = (erase_area / aspect).sqrt().round() as usize;
        if !(eh < height && ew < width) {
            continue;
        }

        let top = rng.gen_range(0..=height - eh);
        let left = rng.gen_range(0..=width - ew);
        for c in 0..channels {
            for y in top..top + eh {
                let row = c * height * width + y * width;
                for value in &mut data[row + left..row + left + ew] {
                    *value = rng.sample(StandardNormal);
                }
            }
        }
        return true;
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    fn gradient_image(width: u32, height: u32) -> RgbImage {
        RgbImage::from_fn(width, height, |x, y| {
            Rgb([(x % 256) as u8, (y % 256) as u8, ((x + y) % 256) as u8])
        })
    }

    #[test]
    fn test_resized_crop_window_stays_inside() {
        let mut rng = ChaCha8Rng::seed_from_u64(7);
        for _ in 0..200 {
            let w = sample_resized_crop(120, 80, &mut rng);
            assert!(w.width > 0 && w.height > 0);
            assert!(w.x + w.width <= 120);
            assert!(w.y + w.height <= 80);
        }
    }

    #[test]
    fn test_resized_crop_window_on_huge_dimensions() {
        let mut rng = ChaCha8Rng::seed_from_u64(11);
        let side = 70_000;
        for _ in 0..50 {
            let w = sample_resized_crop(side, side, &mut rng);
            assert!(w.width > 0 && w.height > 0);
            assert!(w.x + w.width <= side);
            assert!(w.y + w.height <= side);
            // at least the minimum scale of the full area
            assert!(w.width as f64 * w.height as f64 >= 0.07 * side as f64 * side as f64);
        }
    }

    #[test]
    fn test_random_resized_crop_output_size() {
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        let out = random_resized_crop(&gradient_image(90, 60), 32, &mut rng);
        assert_eq!(out.dimensions(), (32, 32));
    }

    #[test]
    fn test_resize_shorter_side_keeps_aspect() {
        let out = resize_shorter_side(&gradient_image(200, 100), 50);
        assert_eq!(out.dimensions(), (100, 50));

        let out = resize_shorter_side(&gradient_image(60, 120), 30);
        assert_eq!(out.dimensions(), (30, 60));
    }

    #[test]
    fn test_center_crop_takes_middle() {
        let image = gradient_image(10, 10);
        let out = center_crop(&image, 4);
        assert_eq!(out.dimensions(), (4, 4));
        assert_eq!(out.get_pixel(0, 0), image.get_pixel(3, 3));
    }

    #[test]
    fn test_center_crop_pads_small_images() {
        let image = RgbImage::from_pixel(2, 2, Rgb([200, 200, 200]));
        let out = center_crop(&image, 4);
        assert_eq!(out.dimensions(), (4, 4));
        assert_eq!(out.get_pixel(0, 0), &Rgb([0, 0, 0]));
        assert_eq!(out.get_pixel(1, 1), &Rgb([200, 200, 200]));
    }

    #[test]
    fn test_chw_layout_and_normalization() {
        let image = RgbImage::from_fn(2, 1, |x, _| if x == 0 { Rgb([255, 0, 0]) } else { Rgb([0, 255, 0]) });
        let mut data = to_chw_float(&image);
        assert_eq!(data, vec![1.0, 0.0, 0.0, 1.0, 0.0, 0.0]);

        normalize(&mut data, &NORMALIZE_MEAN, &NORMALIZE_STD);
        assert_eq!(data, vec![1.0, -1.0, -1.0, 1.0, -1.0, -1.0]);
    }

    #[test]
    fn test_random_erasing_probability_zero_is_noop() {
        let mut rng = ChaCha8Rng::seed_from_u64(3);
        let mut data = vec![0.25f32; 3 * 16 * 16];
        assert!(!random_erasing(&mut data, 16, 16, 0.0, &mut rng));
        assert!(data.iter().all(|&v| v == 0.25));
    }

    #[test]
    fn test_random_erasing_changes_a_region() {
        let mut rng = ChaCha8Rng::seed_from_u64(11);
        let mut data = vec![0.25f32; 3 * 32 * 32];
        let erased = random_erasing(&mut data, 32, 32, 1.0, &mut rng);
        if erased {
            let changed = data.iter().filter(|&&v| v != 0.25).count();
            assert!(changed > 0);
            assert!(changed < data.len());
        }
    }

    #[test]
    fn test_flip_with_probability_one() {
        let mut rng = ChaCha8Rng::seed_from_u64(0);
        let mut image = gradient_image(4, 1);
        random_horizontal_flip(&mut image, 1.0, &mut rng);
        assert_eq!(image.get_pixel(0, 0)[0], 3);
    }
}
