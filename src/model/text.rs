use candle_core::{IndexOp, Module, Result, Tensor};
use candle_nn::{Embedding, LayerNorm, VarBuilder, embedding, layer_norm};

use super::{
    config::TextConfig,
    encoder::{Encoder, causal_mask},
};

/// Text tower of OWL-ViT, a causal CLIP text transformer.
#[derive(Debug, Clone)]
pub struct TextTransformer {
    token_embedding: Embedding,
    position_embedding: Embedding,
    encoder: Encoder,
    final_layer_norm: LayerNorm,
}

impl TextTransformer {
    /// Load from `text_model.*`.
    pub fn load(vb: VarBuilder, config: &TextConfig) -> Result<Self> {
        let embeddings = vb.pp("embeddings");
        Ok(Self {
            token_embedding: embedding(
                config.vocab_size,
                config.hidden_size,
                embeddings.pp("token_embedding"),
            )?,
            position_embedding: embedding(
                config.max_position_embeddings,
                config.hidden_size,
                embeddings.pp("position_embedding"),
            )?,
            encoder: Encoder::load(
                vb.pp("encoder"),
                config.num_hidden_layers,
                config.hidden_size,
                config.intermediate_size,
                config.num_attention_heads,
                config.layer_norm_eps,
            )?,
            final_layer_norm: layer_norm(
                config.hidden_size,
                config.layer_norm_eps,
                vb.pp("final_layer_norm"),
            )?,
        })
    }

    /// Pooled embedding `(1, hidden)` of a single unpadded token sequence.
    ///
    /// The sequence is pooled at its end token, the largest id of the vocabulary.
    /// Attention is causal, so the end token never sees anything after it.
    pub fn forward(&self, input_ids: &[u32]) -> Result<Tensor> {
        let device = self.token_embedding.embeddings().device();
        let seq = input_ids.len();
        let eos = input_ids
            .iter()
            .enumerate()
            .max_by_key(|&(_, id)| *id)
            .map_or(0, |(i, _)| i);

        let ids = Tensor::new(input_ids, device)?.unsqueeze(0)?;
        let positions = Tensor::arange(0u32, seq as u32, device)?.unsqueeze(0)?;
        let xs = self
            .token_embedding
            .forward(&ids)?
            .broadcast_add(&self.position_embedding.forward(&positions)?)?;

        let mask = causal_mask(seq, device)?;
        let xs = self.encoder.forward(&xs, Some(&mask))?;
        let xs = self.final_layer_norm.forward(&xs)?;
        xs.i((.., eos, ..))
    }
}
