use candle_core::{Module, Result, Tensor};
use candle_nn::{
    Conv2d, Conv2dConfig, Embedding, LayerNorm, VarBuilder, conv2d_no_bias, embedding, layer_norm,
};

use super::{config::VisionConfig, encoder::Encoder};

/// Vision tower of OWL-ViT, a ViT returning every token.
#[derive(Debug, Clone)]
pub struct VisionTransformer {
    patch_embedding: Conv2d,
    class_embedding: Tensor,
    position_embedding: Embedding,
    pre_layernorm: LayerNorm,
    encoder: Encoder,
    post_layernorm: LayerNorm,
    hidden_size: usize,
}

impl VisionTransformer {
    /// Load from `vision_model.*`.
    pub fn load(vb: VarBuilder, config: &VisionConfig) -> Result<Self> {
        let embeddings = vb.pp("embeddings");
        let num_positions = config.patches_per_side().pow(2) + 1;
        let conv_config = Conv2dConfig {
            stride: config.patch_size,
            ..Default::default()
        };
        Ok(Self {
            patch_embedding: conv2d_no_bias(
                3,
                config.hidden_size,
                config.patch_size,
                conv_config,
                embeddings.pp("patch_embedding"),
            )?,
            class_embedding: embeddings.get(config.hidden_size, "class_embedding")?,
            position_embedding: embedding(
                num_positions,
                config.hidden_size,
                embeddings.pp("position_embedding"),
            )?,
            pre_layernorm: layer_norm(
                config.hidden_size,
                config.layer_norm_eps,
                vb.pp("pre_layernorm"),
            )?,
            encoder: Encoder::load(
                vb.pp("encoder"),
                config.num_hidden_layers,
                config.hidden_size,
                config.intermediate_size,
                config.num_attention_heads,
                config.layer_norm_eps,
            )?,
            post_layernorm: layer_norm(
                config.hidden_size,
                config.layer_norm_eps,
                vb.pp("post_layernorm"),
            )?,
            hidden_size: config.hidden_size,
        })
    }

    /// Encode `(batch, 3, size, size)` pixels into `(batch, 1 + patches, hidden)` tokens.
    ///
    /// The post layer norm is applied to every token, class token first.
    pub fn forward(&self, pixel_values: &Tensor) -> Result<Tensor> {
        let b = pixel_values.dim(0)?;
        let patches = self
            .patch_embedding
            .forward(pixel_values)?
            .flatten_from(2)?
            .transpose(1, 2)?;
        let class = self
            .class_embedding
            .reshape((1, 1, self.hidden_size))?
            .broadcast_as((b, 1, self.hidden_size))?;
        let xs = Tensor::cat(&[&class, &patches], 1)?;
        let xs = xs.broadcast_add(&self.position_embedding.embeddings().unsqueeze(0)?)?;

        let xs = self.pre_layernorm.forward(&xs)?;
        let xs = self.encoder.forward(&xs, None)?;
        self.post_layernorm.forward(&xs)
    }
}
