use image::{RgbImage, imageops};
use palette::{FromColor, Hsv, Srgb};

use super::PanelOptions;
use crate::state::Style;

const UNSHARP_SIGMA: f32 = 1.5;
const UNSHARP_THRESHOLD: i32 = 3;
const POSTERIZE_BITS: u8 = 4;
const PAINTERLY_SMOOTHING_SIGMA: f32 = 0.8;

/// Every style starts from the same tuned base: contrast and colour pushed so
/// the limited e-ink palette still reads, then a light unsharp mask.
pub fn apply(mut image: RgbImage, style: Style, panel: &PanelOptions) -> RgbImage {
    enhance_contrast(&mut image, panel.contrast);
    enhance_saturation(&mut image, panel.saturation);
    let mut image = imageops::unsharpen(&image, UNSHARP_SIGMA, UNSHARP_THRESHOLD);
    match style {
        Style::Normal => {}
        Style::Posterize => posterize(&mut image, POSTERIZE_BITS),
        Style::Painterly => {
            image = median3(&image);
            image = imageops::blur(&image, PAINTERLY_SMOOTHING_SIGMA);
        }
    }
    image
}

fn luma(px: &[u8]) -> f32 {
    0.299 * px[0] as f32 + 0.587 * px[1] as f32 + 0.114 * px[2] as f32
}

/// Scales each channel's distance from the image's mean luminance.
pub fn enhance_contrast(image: &mut RgbImage, factor: f32) {
    let count = (image.width() as f64) * (image.height() as f64);
    if count <= 0.0 {
        return;
    }
    let mean = image.pixels().map(|p| luma(&p.0) as f64).sum::<f64>() / count;
    let mean = mean as f32;
    for pixel in image.pixels_mut() {
        for channel in &mut pixel.0 {
            let v = mean + factor * (*channel as f32 - mean);
            *channel = v.round().clamp(0.0, 255.0) as u8;
        }
    }
}

/// Multiplies HSV saturation by `factor`; hue and value are kept.
pub fn enhance_saturation(image: &mut RgbImage, factor: f32) {
    if (factor - 1.0).abs() <= f32::EPSILON {
        return;
    }
    for pixel in image.pixels_mut() {
        let [r, g, b] = pixel.0;
        let rgb = Srgb::new(r as f32 / 255.0, g as f32 / 255.0, b as f32 / 255.0);
        let mut hsv = Hsv::from_color(rgb);
        hsv.saturation = (hsv.saturation * factor).clamp(0.0, 1.0);
        let srgb: Srgb = Srgb::from_color(hsv);
        pixel.0 = [srgb.red, srgb.green, srgb.blue].map(|c| (c * 255.0).round().clamp(0.0, 255.0) as u8);
    }
}

/// Keeps only the top `bits` bits of every channel.
pub fn posterize(image: &mut RgbImage, bits: u8) {
    let bits = bits.clamp(1, 8);
    let mask = !(0xFFu8.checked_shr(u32::from(bits)).unwrap_or(0));
    for pixel in image.pixels_mut() {
        for channel in &mut pixel.0 {
            *channel &= mask;
        }
    }
}

/// 3x3 per-channel median; flattens texture into patches of colour.
fn median3(image: &RgbImage) -> RgbImage {
    let (width, height) = image.dimensions();
    let mut out = RgbImage::new(width, height);
    let mut window = [0u8; 9];
    for y in 0..height {
        for x in 0..width {
            let mut px = [0u8; 3];
            for (c, slot) in px.iter_mut().enumerate() {
                let mut n = 0;
                for dy in [-1i64, 0, 1] {
                    for dx in [-1i64, 0, 1] {
                        let sx = (x as i64 + dx).clamp(0, width as i64 - 1) as u32;
                        let sy = (y as i64 + dy).clamp(0, height as i64 - 1) as u32;
                        window[n] = image.get_pixel(sx, sy).0[c];
                        n += 1;
                    }
                }
                window.sort_unstable();
                *slot = window[4];
            }
            out.put_pixel(x, y, image::Rgb(px));
        }
    }
    out
}
