//! OWL-ViT / OWLv2 detection network in candle.
//!
//! Both checkpoints share the architecture: CLIP text and vision towers, a class
//! head scoring patch embeddings against query embeddings and a box head
//! regressing one box per patch.

mod config;
mod encoder;
mod heads;
mod text;
mod vision;

use candle_core::{D, Module, Result, Tensor};
use candle_nn::{LayerNorm, Linear, VarBuilder, layer_norm, linear_no_bias};

pub use config::OwlVitConfig;
use heads::{BoxHead, ClassHead};
use text::TextTransformer;
use vision::VisionTransformer;

/// OWL-ViT object detection model.
#[derive(Debug, Clone)]
pub struct OwlVit {
    text_model: TextTransformer,
    text_projection: Linear,
    vision_model: VisionTransformer,
    layer_norm: LayerNorm,
    class_head: ClassHead,
    box_head: BoxHead,
}

impl OwlVit {
    /// Load the detector; `backbone` is the name of the CLIP sub-module
    /// (`owlvit` or `owlv2`).
    pub fn load(vb: VarBuilder, config: &OwlVitConfig, backbone: &str) -> Result<Self> {
        let text = &config.text_config;
        let vision = &config.vision_config;
        let clip = vb.pp(backbone);
        Ok(Self {
            text_model: TextTransformer::load(clip.pp("text_model"), text)?,
            text_projection: linear_no_bias(
                text.hidden_size,
                text.hidden_size,
                clip.pp("text_projection"),
            )?,
            vision_model: VisionTransformer::load(clip.pp("vision_model"), vision)?,
            layer_norm: layer_norm(vision.hidden_size, vision.layer_norm_eps, vb.pp("layer_norm"))?,
            class_head: ClassHead::load(vb.pp("class_head"), vision.hidden_size, text.hidden_size)?,
            box_head: BoxHead::load(
                vb.pp("box_head"),
                vision.hidden_size,
                vision.patches_per_side(),
            )?,
        })
    }

    /// Patch features `(batch, patches, hidden)` of preprocessed pixels.
    ///
    /// Every patch token is modulated by the class token before the final norm.
    pub fn image_features(&self, pixel_values: &Tensor) -> Result<Tensor> {
        let tokens = self.vision_model.forward(pixel_values)?;
        let num_patches = tokens.dim(1)? - 1;
        let class_token = tokens.narrow(1, 0, 1)?;
        let patches = tokens.narrow(1, 1, num_patches)?.broadcast_mul(&class_token)?;
        self.layer_norm.forward(&patches)
    }

    /// Projected embedding `(1, hidden)` of one tokenized query.
    pub fn text_embedding(&self, input_ids: &[u32]) -> Result<Tensor> {
        self.text_projection
            .forward(&self.text_model.forward(input_ids)?)
    }

    /// Query embeddings `(1, queries, hidden)` for a batch of tokenized queries.
    pub fn text_embeddings(&self, queries: &[Vec<u32>]) -> Result<Tensor> {
        let embeds = queries
            .iter()
            .map(|ids| self.text_embedding(ids))
            .collect::<Result<Vec<_>>>()?;
        Tensor::cat(&embeds, 0)?.unsqueeze(0)
    }

    /// Raw class embeddings of every patch, used to pick an image query.
    pub fn class_embeddings(&self, image_feats: &Tensor) -> Result<Tensor> {
        self.class_head.class_embeddings(image_feats)
    }

    /// Class logits `(batch, patches, queries)`.
    pub fn class_logits(&self, image_feats: &Tensor, queries: &Tensor) -> Result<Tensor> {
        self.class_head.logits(image_feats, queries)
    }

    /// Normalized `[cx, cy, w, h]` boxes `(batch, patches, 4)`.
    pub fn boxes(&self, image_feats: &Tensor) -> Result<Tensor> {
        self.box_head.forward(image_feats)
    }

    /// Dot product of every patch class embedding with their mean, `(patches,)`.
    pub fn mean_similarity(class_embeds: &Tensor) -> Result<Tensor> {
        let mean = class_embeds.mean_keepdim(0)?;
        class_embeds
            .broadcast_mul(&mean)?
            .sum(D::Minus1)
    }
}
