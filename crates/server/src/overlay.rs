//! Saliency overlay rendering
//!
//! Presentation logic: upsample the low-resolution saliency map to the
//! original image's pixel dimensions, colorize it, and alpha-composite it
//! onto the image. The contract is a valid PNG whose overlay alpha grows
//! monotonically with saliency intensity, not bit-exact colors.

use aperture_vision::{SaliencyMap, VisionResult};
use image::imageops::FilterType;
use image::{DynamicImage, GrayImage, ImageFormat, RgbaImage};
use std::io::Cursor;

/// Red/green/blue/alpha of the heatmap at intensity `v` in [0, 1].
/// Alpha ramps from 0.2 to 0.8 so even faint regions stay visible while the
/// underlying image never disappears completely.
fn heat_rgba(v: f32) -> [f32; 4] {
    let r = v;
    let g = (v * 1.5).clamp(0.0, 1.0);
    let b = 0.0;
    let a = (v * 0.6 + 0.2).clamp(0.0, 1.0);
    [r, g, b, a]
}

/// Render the saliency map over the original image and encode the result
/// as a PNG.
pub fn render_overlay(map: &SaliencyMap, base: &DynamicImage) -> VisionResult<Vec<u8>> {
    let (width, height) = (base.width(), base.height());

    // Upsample the map to the image's exact dimensions with smooth
    // interpolation.
    let gray = GrayImage::from_fn(map.width() as u32, map.height() as u32, |x, y| {
        let v = map.get(x as usize, y as usize);
        image::Luma([(v * 255.0).round() as u8])
    });
    let upsampled = image::imageops::resize(&gray, width, height, FilterType::Triangle);

    // Colorize and alpha-composite over the original.
    let base_rgb = base.to_rgb8();
    let mut out = RgbaImage::new(width, height);
    for (x, y, pixel) in out.enumerate_pixels_mut() {
        let intensity = f32::from(upsampled.get_pixel(x, y).0[0]) / 255.0;
        let [hr, hg, hb, ha] = heat_rgba(intensity);
        let bg = base_rgb.get_pixel(x, y).0;

        let blend = |heat: f32, under: u8| -> u8 {
            let under = f32::from(under) / 255.0;
            ((heat * ha + under * (1.0 - ha)) * 255.0).round() as u8
        };
        pixel.0 = [blend(hr, bg[0]), blend(hg, bg[1]), blend(hb, bg[2]), 255];
    }

    let mut bytes = Vec::new();
    DynamicImage::ImageRgba8(out).write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)?;
    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// PNG file signature
    const PNG_MAGIC: [u8; 8] = [0x89, b'P', b'N', b'G', b'\r', b'\n', 0x1a, b'\n'];

    #[test]
    fn test_alpha_monotone_in_intensity() {
        let mut previous = 0.0;
        for step in 0..=10 {
            let v = step as f32 / 10.0;
            let [_, _, _, a] = heat_rgba(v);
            assert!(a >= previous, "alpha must not decrease with intensity");
            assert!((0.0..=1.0).contains(&a));
            previous = a;
        }
    }

    #[test]
    fn test_overlay_is_valid_png_at_image_resolution() {
        // A 2x2 map over a 64x48 image exercises the upsampling path.
        let map = SaliencyMap::new(2, 2, vec![0.0, 0.25, 0.75, 1.0]);
        let base = DynamicImage::ImageRgb8(image::RgbImage::from_pixel(
            64,
            48,
            image::Rgb([10, 20, 30]),
        ));

        let png = render_overlay(&map, &base).unwrap();
        assert_eq!(&png[..8], &PNG_MAGIC);

        let decoded = image::load_from_memory(&png).unwrap();
        assert_eq!(decoded.width(), 64);
        assert_eq!(decoded.height(), 48);
    }

    #[test]
    fn test_hot_pixels_are_brighter_than_cold_ones() {
        let map = SaliencyMap::new(2, 1, vec![0.0, 1.0]);
        let base = DynamicImage::ImageRgb8(image::RgbImage::from_pixel(
            2,
            1,
            image::Rgb([0, 0, 0]),
        ));

        let png = render_overlay(&map, &base).unwrap();
        let decoded = image::load_from_memory(&png).unwrap().to_rgba8();
        let cold = decoded.get_pixel(0, 0).0;
        let hot = decoded.get_pixel(1, 0).0;
        assert!(hot[0] > cold[0], "hot pixel must carry more heat color");
    }
}
