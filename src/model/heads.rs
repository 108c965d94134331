use candle_core::{Device, Module, Result, Tensor};
use candle_nn::{Linear, VarBuilder, linear};

use super::encoder::l2_normalize;

/// Scores patch embeddings against query embeddings.
#[derive(Debug, Clone)]
pub struct ClassHead {
    dense0: Linear,
    logit_shift: Linear,
    logit_scale: Linear,
}

impl ClassHead {
    /// Load from `class_head.*`.
    pub fn load(vb: VarBuilder, vision_size: usize, query_size: usize) -> Result<Self> {
        Ok(Self {
            dense0: linear(vision_size, query_size, vb.pp("dense0"))?,
            logit_shift: linear(vision_size, 1, vb.pp("logit_shift"))?,
            logit_scale: linear(vision_size, 1, vb.pp("logit_scale"))?,
        })
    }

    /// Per-patch class embeddings `(batch, patches, query_size)`, not normalized.
    pub fn class_embeddings(&self, image_feats: &Tensor) -> Result<Tensor> {
        self.dense0.forward(image_feats)
    }

    /// Logits `(batch, patches, queries)` for `queries` of shape `(batch, queries, query_size)`.
    pub fn logits(&self, image_feats: &Tensor, queries: &Tensor) -> Result<Tensor> {
        let class_embeds = l2_normalize(&self.class_embeddings(image_feats)?, 1e-6)?;
        let queries = l2_normalize(queries, 1e-6)?;
        let logits = class_embeds.matmul(&queries.transpose(1, 2)?.contiguous()?)?;

        let shift = self.logit_shift.forward(image_feats)?;
        let scale = (self.logit_scale.forward(image_feats)?.elu(1.)? + 1.)?;
        logits.broadcast_add(&shift)?.broadcast_mul(&scale)
    }
}

/// Regresses one box per patch.
#[derive(Debug, Clone)]
pub struct BoxHead {
    dense0: Linear,
    dense1: Linear,
    dense2: Linear,
    bias: Tensor,
}

impl BoxHead {
    /// Load from `box_head.*` for a square grid of `patches_per_side` patches.
    pub fn load(vb: VarBuilder, vision_size: usize, patches_per_side: usize) -> Result<Self> {
        let bias = box_bias(patches_per_side, vb.device())?;
        Ok(Self {
            dense0: linear(vision_size, vision_size, vb.pp("dense0"))?,
            dense1: linear(vision_size, vision_size, vb.pp("dense1"))?,
            dense2: linear(vision_size, 4, vb.pp("dense2"))?,
            bias,
        })
    }
}

impl Module for BoxHead {
    /// Normalized `[cx, cy, w, h]` boxes `(batch, patches, 4)`.
    fn forward(&self, image_feats: &Tensor) -> Result<Tensor> {
        let xs = self.dense0.forward(image_feats)?.gelu_erf()?;
        let xs = self.dense1.forward(&xs)?.gelu_erf()?;
        let xs = self.dense2.forward(&xs)?;
        candle_nn::ops::sigmoid(&xs.broadcast_add(&self.bias)?)
    }
}

/// Prior for every patch, in logit space: the patch's lower-right grid corner
/// as center and one patch as size.
fn box_bias(patches_per_side: usize, device: &Device) -> Result<Tensor> {
    let n = patches_per_side as f32;
    let logit = |v: f32| (v + 1e-4).ln() - (-v + 1e-4).ln_1p();
    let size_bias = logit(1. / n);

    let mut data = Vec::with_capacity(patches_per_side * patches_per_side * 4);
    for row in 0..patches_per_side {
        for col in 0..patches_per_side {
            let x = ((col + 1) as f32 / n).clamp(0., 1.);
            let y = ((row + 1) as f32 / n).clamp(0., 1.);
            data.extend_from_slice(&[logit(x), logit(y), size_bias, size_bias]);
        }
    }
    Tensor::from_vec(data, (patches_per_side * patches_per_side, 4), device)
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{DType, IndexOp};

    #[test]
    fn test_box_bias() -> Result<()> {
        let bias = box_bias(4, &Device::Cpu)?;
        assert_eq!(bias.dims(), &[16, 4]);
        let boxes = candle_nn::ops::sigmoid(&bias)?.to_vec2::<f32>()?;
        // row 1, col 2
        let b = &boxes[4 + 2];
        assert!((b[0] - 0.75).abs() < 1e-3);
        assert!((b[1] - 0.5).abs() < 1e-3);
        assert!((b[2] - 0.25).abs() < 1e-3);
        Ok(())
    }

    #[test]
    fn test_class_head_logits_shape() -> Result<()> {
        let vb = VarBuilder::zeros(DType::F32, &Device::Cpu);
        let head = ClassHead::load(vb, 6, 4)?;
        let feats = Tensor::ones((1, 9, 6), DType::F32, &Device::Cpu)?;
        let queries = Tensor::ones((1, 3, 4), DType::F32, &Device::Cpu)?;
        let logits = head.logits(&feats, &queries)?;
        assert_eq!(logits.dims(), &[1, 9, 3]);
        // zero weights: no shift, unit scale, zero class embeddings
        assert_eq!(logits.i((0, 0))?.to_vec1::<f32>()?, vec![0., 0., 0.]);
        Ok(())
    }
}
