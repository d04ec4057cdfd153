//! # MobileNet-v3
//!
//! MobileNet-v3 inference implementation, timm weight layout.
//!
//! ## Paper
//!
//! ["Searching for MobileNetV3"](https://arxiv.org/abs/1905.02244)
//!
//! ## References
//!
//! - [PyTorch Implementation](https://github.com/huggingface/pytorch-image-models/blob/main/timm/models/mobilenetv3.py)
//!
//! The forward pass is split into a feature extractor (through the final
//! convolutional stage) and a classification head (pool, projection,
//! classifier) so the Grad-CAM explainer can instrument the boundary.

use crate::error::{VisionError, VisionResult};
use crate::model::VisionModel;
use candle_core::{DType, Device, Result, Tensor, D};
use candle_nn::{
    batch_norm, conv2d, conv2d_no_bias, linear, ops::hard_sigmoid, Conv2dConfig, Func, VarBuilder,
};
use std::path::Path;

#[derive(Clone, Debug)]
enum BlockType {
    DepthwiseSeparable {
        out_channels: usize,
        kernel: usize,
        stride: usize,
        squeeze_excite: bool,
        relu: bool,
    },
    InvertedResidual {
        out_channels: usize,
        mid_channels: usize,
        kernel: usize,
        stride: usize,
        squeeze_excite: bool,
        relu: bool,
    },
    Convolutional {
        out_channels: usize,
        kernel: usize,
        stride: usize,
    },
}

/// Network architecture description
#[derive(Clone, Debug)]
pub struct Config {
    stem_dim: usize,
    feature_dim: usize,
    head_dim: usize,
    stages: Vec<Vec<BlockType>>,
}

#[rustfmt::skip]
impl Config {
    /// mobilenetv3_small_100
    pub fn small() -> Self {
        Self {
            stem_dim: 16,
            feature_dim: 576,
            head_dim: 1024,
            stages: vec![
                vec![
                    BlockType::DepthwiseSeparable { out_channels: 16, kernel: 3, stride: 2, squeeze_excite: true, relu: true },
                ],
                vec![
                    BlockType::InvertedResidual { out_channels: 24, mid_channels: 72, kernel: 3, stride: 2, squeeze_excite: false, relu: true },
                    BlockType::InvertedResidual { out_channels: 24, mid_channels: 88, kernel: 3, stride: 1, squeeze_excite: false, relu: true },
                ],
                vec![
                    BlockType::InvertedResidual { out_channels: 40, mid_channels: 96, kernel: 5, stride: 2, squeeze_excite: true, relu: false },
                    BlockType::InvertedResidual { out_channels: 40, mid_channels: 240, kernel: 5, stride: 1, squeeze_excite: true, relu: false },
                    BlockType::InvertedResidual { out_channels: 40, mid_channels: 240, kernel: 5, stride: 1, squeeze_excite: true, relu: false },
                ],
                vec![
                    BlockType::InvertedResidual { out_channels: 48, mid_channels: 120, kernel: 5, stride: 1, squeeze_excite: true, relu: false },
                    BlockType::InvertedResidual { out_channels: 48, mid_channels: 144, kernel: 5, stride: 1, squeeze_excite: true, relu: false },
                ],
                vec![
                    BlockType::InvertedResidual { out_channels: 96, mid_channels: 288, kernel: 5, stride: 2, squeeze_excite: true, relu: false },
                    BlockType::InvertedResidual { out_channels: 96, mid_channels: 576, kernel: 5, stride: 1, squeeze_excite: true, relu: false },
                    BlockType::InvertedResidual { out_channels: 96, mid_channels: 576, kernel: 5, stride: 1, squeeze_excite: true, relu: false },
                ],
                vec![
                    BlockType::Convolutional { out_channels: 576, kernel: 1, stride: 1 },
                ],
            ],
        }
    }

    /// mobilenetv3_large_100
    pub fn large() -> Self {
        Self {
            stem_dim: 16,
            feature_dim: 960,
            head_dim: 1280,
            stages: vec![
                vec![
                    BlockType::DepthwiseSeparable { out_channels: 16, kernel: 3, stride: 1, squeeze_excite: false, relu: true },
                ],
                vec![
                    BlockType::InvertedResidual { out_channels: 24, mid_channels: 64, kernel: 3, stride: 2, squeeze_excite: false, relu: true },
                    BlockType::InvertedResidual { out_channels: 24, mid_channels: 72, kernel: 3, stride: 1, squeeze_excite: false, relu: true },
                ],
                vec![
                    BlockType::InvertedResidual { out_channels: 40, mid_channels: 72, kernel: 5, stride: 2, squeeze_excite: true, relu: true },
                    BlockType::InvertedResidual { out_channels: 40, mid_channels: 120, kernel: 5, stride: 1, squeeze_excite: true, relu: true },
                    BlockType::InvertedResidual { out_channels: 40, mid_channels: 120, kernel: 5, stride: 1, squeeze_excite: true, relu: true },
                ],
                vec![
                    BlockType::InvertedResidual { out_channels: 80, mid_channels: 240, kernel: 3, stride: 2, squeeze_excite: false, relu: false },
                    BlockType::InvertedResidual { out_channels: 80, mid_channels: 200, kernel: 3, stride: 1, squeeze_excite: false, relu: false },
                    BlockType::InvertedResidual { out_channels: 80, mid_channels: 184, kernel: 3, stride: 1, squeeze_excite: false, relu: false },
                    BlockType::InvertedResidual { out_channels: 80, mid_channels: 184, kernel: 3, stride: 1, squeeze_excite: false, relu: false },
                ],
                vec![
                    BlockType::InvertedResidual { out_channels: 112, mid_channels: 480, kernel: 3, stride: 1, squeeze_excite: true, relu: false },
                    BlockType::InvertedResidual { out_channels: 112, mid_channels: 672, kernel: 3, stride: 1, squeeze_excite: true, relu: false },
                ],
                vec![
                    BlockType::InvertedResidual { out_channels: 160, mid_channels: 672, kernel: 5, stride: 2, squeeze_excite: true, relu: false },
                    BlockType::InvertedResidual { out_channels: 160, mid_channels: 960, kernel: 5, stride: 1, squeeze_excite: true, relu: false },
                    BlockType::InvertedResidual { out_channels: 160, mid_channels: 960, kernel: 5, stride: 1, squeeze_excite: true, relu: false },
                ],
                vec![
                    BlockType::Convolutional { out_channels: 960, kernel: 1, stride: 1 },
                ],
            ],
        }
    }

    /// Channel count of the instrumented feature layer
    pub fn feature_dim(&self) -> usize {
        self.feature_dim
    }
}

// Round channel counts the way timm does when deriving squeeze-excite widths.
fn make_divisible(v: f64, divisor: usize) -> usize {
    let d = divisor as f64;
    let mut new_v = d.max(((v + d / 2.0) / d).floor() * d);
    if new_v < 0.9 * v {
        new_v += d;
    }
    new_v as usize
}

fn hard_swish(xs: &Tensor) -> Result<Tensor> {
    xs.mul(&hard_sigmoid(xs)?)
}

fn apply_act(xs: &Tensor, relu: bool) -> Result<Tensor> {
    if relu {
        xs.relu()
    } else {
        hard_swish(xs)
    }
}

// Squeeze-excite gate with hard-sigmoid gating.
fn squeeze_excite(channels: usize, vb: VarBuilder) -> Result<Func<'static>> {
    let reduced = make_divisible(channels as f64 / 4.0, 8);
    let conv2d_cfg = Conv2dConfig {
        ..Default::default()
    };
    let conv_reduce = conv2d(channels, reduced, 1, conv2d_cfg, vb.pp("conv_reduce"))?;
    let conv_expand = conv2d(reduced, channels, 1, conv2d_cfg, vb.pp("conv_expand"))?;

    Ok(Func::new(move |xs| {
        let scale = xs.mean_keepdim(D::Minus1)?.mean_keepdim(D::Minus2)?;
        let scale = scale.apply(&conv_reduce)?.relu()?.apply(&conv_expand)?;
        let scale = hard_sigmoid(&scale)?;
        xs.broadcast_mul(&scale)
    }))
}

// Depthwise convolution followed by a pointwise projection.
fn depthwise_separable_block(
    in_channels: usize,
    out_channels: usize,
    kernel: usize,
    stride: usize,
    with_se: bool,
    relu: bool,
    vb: VarBuilder,
) -> Result<Func<'static>> {
    let dw_cfg = Conv2dConfig {
        stride,
        padding: kernel / 2,
        groups: in_channels,
        ..Default::default()
    };
    let pw_cfg = Conv2dConfig {
        ..Default::default()
    };

    let conv_dw = conv2d_no_bias(in_channels, in_channels, kernel, dw_cfg, vb.pp("conv_dw"))?;
    let bn1 = batch_norm(in_channels, 1e-5, vb.pp("bn1"))?;
    let se = if with_se {
        Some(squeeze_excite(in_channels, vb.pp("se"))?)
    } else {
        None
    };
    let conv_pw = conv2d_no_bias(in_channels, out_channels, 1, pw_cfg, vb.pp("conv_pw"))?;
    let bn2 = batch_norm(out_channels, 1e-5, vb.pp("bn2"))?;

    let skip_connection = in_channels == out_channels && stride == 1;

    Ok(Func::new(move |xs| {
        let residual = xs.clone();
        let ys = xs.apply(&conv_dw)?.apply_t(&bn1, false)?;
        let mut ys = apply_act(&ys, relu)?;
        if let Some(se) = &se {
            ys = ys.apply(se)?;
        }
        let ys = ys.apply(&conv_pw)?.apply_t(&bn2, false)?;
        if skip_connection {
            ys + residual
        } else {
            Ok(ys)
        }
    }))
}

// Pointwise expansion, depthwise convolution, optional squeeze-excite,
// pointwise linear projection.
fn inverted_residual_block(
    in_channels: usize,
    out_channels: usize,
    mid_channels: usize,
    kernel: usize,
    stride: usize,
    with_se: bool,
    relu: bool,
    vb: VarBuilder,
) -> Result<Func<'static>> {
    let pw_cfg = Conv2dConfig {
        ..Default::default()
    };
    let dw_cfg = Conv2dConfig {
        stride,
        padding: kernel / 2,
        groups: mid_channels,
        ..Default::default()
    };

    let conv_pw = conv2d_no_bias(in_channels, mid_channels, 1, pw_cfg, vb.pp("conv_pw"))?;
    let bn1 = batch_norm(mid_channels, 1e-5, vb.pp("bn1"))?;
    let conv_dw = conv2d_no_bias(mid_channels, mid_channels, kernel, dw_cfg, vb.pp("conv_dw"))?;
    let bn2 = batch_norm(mid_channels, 1e-5, vb.pp("bn2"))?;
    let se = if with_se {
        Some(squeeze_excite(mid_channels, vb.pp("se"))?)
    } else {
        None
    };
    let conv_pwl = conv2d_no_bias(mid_channels, out_channels, 1, pw_cfg, vb.pp("conv_pwl"))?;
    let bn3 = batch_norm(out_channels, 1e-5, vb.pp("bn3"))?;

    let skip_connection = in_channels == out_channels && stride == 1;

    Ok(Func::new(move |xs| {
        let residual = xs.clone();
        let ys = xs.apply(&conv_pw)?.apply_t(&bn1, false)?;
        let ys = apply_act(&ys, relu)?;
        let ys = ys.apply(&conv_dw)?.apply_t(&bn2, false)?;
        let mut ys = apply_act(&ys, relu)?;
        if let Some(se) = &se {
            ys = ys.apply(se)?;
        }
        let ys = ys.apply(&conv_pwl)?.apply_t(&bn3, false)?;
        if skip_connection {
            ys + residual
        } else {
            Ok(ys)
        }
    }))
}

// Plain convolution with norm and hard-swish, used for the final stage.
fn conv_block(
    in_channels: usize,
    out_channels: usize,
    kernel: usize,
    stride: usize,
    vb: VarBuilder,
) -> Result<Func<'static>> {
    let conv2d_cfg = Conv2dConfig {
        stride,
        padding: kernel / 2,
        ..Default::default()
    };
    let conv = conv2d_no_bias(in_channels, out_channels, kernel, conv2d_cfg, vb.pp("conv"))?;
    let bn = batch_norm(out_channels, 1e-5, vb.pp("bn1"))?;

    Ok(Func::new(move |xs| {
        let ys = xs.apply(&conv)?.apply_t(&bn, false)?;
        hard_swish(&ys)
    }))
}

// Stem convolution plus all block stages.
fn mobilenetv3_features(cfg: &Config, vb: VarBuilder) -> Result<Func<'static>> {
    let stem_cfg = Conv2dConfig {
        stride: 2,
        padding: 1,
        ..Default::default()
    };
    let conv_stem = conv2d_no_bias(3, cfg.stem_dim, 3, stem_cfg, vb.pp("conv_stem"))?;
    let bn1 = batch_norm(cfg.stem_dim, 1e-5, vb.pp("bn1"))?;

    let mut in_channels = cfg.stem_dim;
    let mut blocks = Vec::new();

    for (stage, stage_blocks) in cfg.stages.iter().enumerate() {
        for (block, block_type) in stage_blocks.iter().enumerate() {
            let vb = vb.pp("blocks").pp(format!("{stage}.{block}"));
            match *block_type {
                BlockType::DepthwiseSeparable {
                    out_channels,
                    kernel,
                    stride,
                    squeeze_excite,
                    relu,
                } => {
                    blocks.push(depthwise_separable_block(
                        in_channels,
                        out_channels,
                        kernel,
                        stride,
                        squeeze_excite,
                        relu,
                        vb,
                    )?);
                    in_channels = out_channels;
                }
                BlockType::InvertedResidual {
                    out_channels,
                    mid_channels,
                    kernel,
                    stride,
                    squeeze_excite,
                    relu,
                } => {
                    blocks.push(inverted_residual_block(
                        in_channels,
                        out_channels,
                        mid_channels,
                        kernel,
                        stride,
                        squeeze_excite,
                        relu,
                        vb,
                    )?);
                    in_channels = out_channels;
                }
                BlockType::Convolutional {
                    out_channels,
                    kernel,
                    stride,
                } => {
                    blocks.push(conv_block(in_channels, out_channels, kernel, stride, vb)?);
                    in_channels = out_channels;
                }
            }
        }
    }

    Ok(Func::new(move |xs| {
        let ys = xs.apply(&conv_stem)?.apply_t(&bn1, false)?;
        let mut ys = hard_swish(&ys)?;
        for block in blocks.iter() {
            ys = ys.apply(block)?;
        }
        Ok(ys)
    }))
}

// Classification head: global pool, pointwise projection, classifier.
fn mobilenetv3_head(cfg: &Config, nclasses: usize, vb: VarBuilder) -> Result<Func<'static>> {
    let conv2d_cfg = Conv2dConfig {
        ..Default::default()
    };
    let conv_head = conv2d(cfg.feature_dim, cfg.head_dim, 1, conv2d_cfg, vb.pp("conv_head"))?;
    let classifier = linear(cfg.head_dim, nclasses, vb.pp("classifier"))?;

    Ok(Func::new(move |xs| {
        let ys = xs.mean_keepdim(D::Minus1)?.mean_keepdim(D::Minus2)?;
        let ys = ys.apply(&conv_head)?;
        let ys = hard_swish(&ys)?;
        let ys = ys.flatten_from(1)?;
        ys.apply(&classifier)
    }))
}

/// MobileNet-v3 classifier split at the final convolutional feature stage
pub struct MobileNetV3 {
    features: Func<'static>,
    head: Func<'static>,
    num_classes: usize,
}

impl MobileNetV3 {
    /// Build the network from a variable store
    pub fn new(cfg: &Config, num_classes: usize, vb: VarBuilder) -> Result<Self> {
        let features = mobilenetv3_features(cfg, vb.clone())?;
        let head = mobilenetv3_head(cfg, num_classes, vb)?;
        Ok(Self {
            features,
            head,
            num_classes,
        })
    }

    /// Load pretrained weights from a safetensors file
    pub fn from_safetensors(
        path: &Path,
        cfg: &Config,
        num_classes: usize,
        device: &Device,
    ) -> VisionResult<Self> {
        let vb = unsafe {
            VarBuilder::from_mmaped_safetensors(&[path], DType::F32, device).map_err(|e| {
                VisionError::ModelLoad(format!("cannot mmap {}: {e}", path.display()))
            })?
        };
        Self::new(cfg, num_classes, vb)
            .map_err(|e| VisionError::ModelLoad(format!("cannot build network: {e}")))
    }
}

impl VisionModel for MobileNetV3 {
    fn forward_features(&self, xs: &Tensor) -> Result<Tensor> {
        xs.apply(&self.features)
    }

    fn forward_head(&self, features: &Tensor) -> Result<Tensor> {
        features.apply(&self.head)
    }

    fn num_classes(&self) -> usize {
        self.num_classes
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_make_divisible() {
        assert_eq!(make_divisible(4.0, 8), 8);
        assert_eq!(make_divisible(18.0, 8), 24);
        assert_eq!(make_divisible(24.0, 8), 24);
        assert_eq!(make_divisible(60.0, 8), 64);
        assert_eq!(make_divisible(144.0, 8), 144);
    }

    #[test]
    fn test_small_forward_shapes() {
        let device = Device::Cpu;
        let vb = VarBuilder::zeros(DType::F32, &device);
        let model = MobileNetV3::new(&Config::small(), 1000, vb).unwrap();

        let input = Tensor::zeros((1, 3, 224, 224), DType::F32, &device).unwrap();
        let features = model.forward_features(&input).unwrap();
        assert_eq!(features.dims(), &[1, 576, 7, 7]);

        let logits = model.forward_head(&features).unwrap();
        assert_eq!(logits.dims(), &[1, 1000]);
    }

    #[test]
    fn test_large_forward_shapes() {
        let device = Device::Cpu;
        let vb = VarBuilder::zeros(DType::F32, &device);
        let model = MobileNetV3::new(&Config::large(), 1000, vb).unwrap();

        let input = Tensor::zeros((1, 3, 224, 224), DType::F32, &device).unwrap();
        let features = model.forward_features(&input).unwrap();
        assert_eq!(features.dims(), &[1, 960, 7, 7]);

        let logits = model.forward_head(&features).unwrap();
        assert_eq!(logits.dims(), &[1, 1000]);
    }
}
