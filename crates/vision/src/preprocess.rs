//! Image preprocessing for the classifier
//!
//! Applies the exact resize/crop/normalize parameters the pretrained weights
//! were trained with. Any deviation here silently degrades prediction quality
//! rather than failing, so the parameters live in one place and are carried
//! by value alongside the model.

use crate::error::VisionResult;
use candle_core::{DType, Device, Tensor};
use image::imageops::FilterType;
use image::DynamicImage;

/// Per-channel normalization mean (ImageNet)
pub const IMAGENET_MEAN: [f32; 3] = [0.485, 0.456, 0.406];

/// Per-channel normalization standard deviation (ImageNet)
pub const IMAGENET_STD: [f32; 3] = [0.229, 0.224, 0.225];

/// Fixed preprocessing transform: resize, center-crop, normalize
#[derive(Debug, Clone)]
pub struct Preprocessor {
    /// Shorter-side target before cropping
    resize_to: u32,
    /// Side length of the square center crop (the network input resolution)
    crop_to: u32,
    mean: [f32; 3],
    std: [f32; 3],
}

impl Default for Preprocessor {
    fn default() -> Self {
        Self::imagenet()
    }
}

impl Preprocessor {
    /// The transform MobileNetV3 ImageNet weights were trained with:
    /// shorter side to 256, center crop 224, ImageNet normalization.
    #[must_use]
    pub const fn imagenet() -> Self {
        Self {
            resize_to: 256,
            crop_to: 224,
            mean: IMAGENET_MEAN,
            std: IMAGENET_STD,
        }
    }

    /// Network input resolution (square)
    #[must_use]
    pub const fn input_size(&self) -> usize {
        self.crop_to as usize
    }

    /// Turn a decoded image into a normalized (1, 3, crop, crop) f32 tensor
    /// on the given device.
    pub fn tensor_from_image(&self, img: &DynamicImage, device: &Device) -> VisionResult<Tensor> {
        let crop = self.crop_to;

        // Scale the shorter side to `resize_to`, preserving aspect ratio.
        let (width, height) = (img.width().max(1), img.height().max(1));
        let scale = f64::from(self.resize_to) / f64::from(width.min(height));
        let scaled_w = (f64::from(width) * scale).round().max(f64::from(crop)) as u32;
        let scaled_h = (f64::from(height) * scale).round().max(f64::from(crop)) as u32;
        let resized = img.resize_exact(scaled_w, scaled_h, FilterType::Triangle);

        // Center crop to the network input resolution.
        let left = (scaled_w - crop) / 2;
        let top = (scaled_h - crop) / 2;
        let cropped = resized.crop_imm(left, top, crop, crop).to_rgb8();

        let side = crop as usize;
        let data = Tensor::from_vec(cropped.into_raw(), (side, side, 3), device)?
            .permute((2, 0, 1))?
            .to_dtype(DType::F32)?;
        let data = (data / 255.)?;

        let mean = Tensor::new(&self.mean, device)?.reshape((3, 1, 1))?;
        let std = Tensor::new(&self.std, device)?.reshape((3, 1, 1))?;
        let normalized = data.broadcast_sub(&mean)?.broadcast_div(&std)?;

        Ok(normalized.unsqueeze(0)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::IndexOp;
    use image::RgbImage;

    fn solid_gray(width: u32, height: u32) -> DynamicImage {
        DynamicImage::ImageRgb8(RgbImage::from_pixel(
            width,
            height,
            image::Rgb([128, 128, 128]),
        ))
    }

    #[test]
    fn test_output_shape_from_small_image() {
        let img = solid_gray(64, 64);
        let tensor = Preprocessor::imagenet()
            .tensor_from_image(&img, &Device::Cpu)
            .unwrap();
        assert_eq!(tensor.dims(), &[1, 3, 224, 224]);
    }

    #[test]
    fn test_output_shape_from_wide_image() {
        let img = solid_gray(640, 100);
        let tensor = Preprocessor::imagenet()
            .tensor_from_image(&img, &Device::Cpu)
            .unwrap();
        assert_eq!(tensor.dims(), &[1, 3, 224, 224]);
    }

    #[test]
    fn test_normalization_values() {
        let img = solid_gray(64, 64);
        let tensor = Preprocessor::imagenet()
            .tensor_from_image(&img, &Device::Cpu)
            .unwrap();

        // A solid 128-gray pixel normalizes to (128/255 - mean) / std per channel.
        let values = tensor.i((0, .., 0, 0)).unwrap().to_vec1::<f32>().unwrap();
        for (channel, value) in values.iter().enumerate() {
            let expected =
                (128.0 / 255.0 - IMAGENET_MEAN[channel]) / IMAGENET_STD[channel];
            assert!(
                (value - expected).abs() < 1e-5,
                "channel {channel}: got {value}, expected {expected}"
            );
        }
    }

    #[test]
    fn test_determinism() {
        let img = solid_gray(100, 80);
        let pre = Preprocessor::imagenet();
        let a = pre.tensor_from_image(&img, &Device::Cpu).unwrap();
        let b = pre.tensor_from_image(&img, &Device::Cpu).unwrap();
        let a = a.flatten_all().unwrap().to_vec1::<f32>().unwrap();
        let b = b.flatten_all().unwrap().to_vec1::<f32>().unwrap();
        assert_eq!(a, b);
    }
}
