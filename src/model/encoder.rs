use candle_core::{D, Module, Result, Tensor};
use candle_nn::{LayerNorm, Linear, VarBuilder, layer_norm, linear};

/// Quick GELU approximation used by the CLIP towers.
fn quick_gelu(xs: &Tensor) -> Result<Tensor> {
    xs * candle_nn::ops::sigmoid(&xs.affine(1.702, 0.)?)?
}

/// Multi-head self attention.
#[derive(Debug, Clone)]
struct Attention {
    q_proj: Linear,
    k_proj: Linear,
    v_proj: Linear,
    out_proj: Linear,
    num_heads: usize,
    head_dim: usize,
    scale: f64,
}

impl Attention {
    fn load(vb: VarBuilder, hidden_size: usize, num_heads: usize) -> Result<Self> {
        let head_dim = hidden_size / num_heads;
        Ok(Self {
            q_proj: linear(hidden_size, hidden_size, vb.pp("q_proj"))?,
            k_proj: linear(hidden_size, hidden_size, vb.pp("k_proj"))?,
            v_proj: linear(hidden_size, hidden_size, vb.pp("v_proj"))?,
            out_proj: linear(hidden_size, hidden_size, vb.pp("out_proj"))?,
            num_heads,
            head_dim,
            scale: (head_dim as f64).powf(-0.5),
        })
    }

    fn split_heads(&self, xs: &Tensor, b: usize, seq: usize) -> Result<Tensor> {
        xs.reshape((b, seq, self.num_heads, self.head_dim))?
            .transpose(1, 2)?
            .contiguous()
    }

    fn forward(&self, xs: &Tensor, mask: Option<&Tensor>) -> Result<Tensor> {
        let (b, seq, hidden) = xs.dims3()?;
        let q = self.split_heads(&self.q_proj.forward(xs)?.affine(self.scale, 0.)?, b, seq)?;
        let k = self.split_heads(&self.k_proj.forward(xs)?, b, seq)?;
        let v = self.split_heads(&self.v_proj.forward(xs)?, b, seq)?;

        let weights = q.matmul(&k.t()?)?;
        let weights = match mask {
            Some(mask) => weights.broadcast_add(mask)?,
            None => weights,
        };
        let weights = candle_nn::ops::softmax_last_dim(&weights)?;

        let out = weights
            .matmul(&v)?
            .transpose(1, 2)?
            .reshape((b, seq, hidden))?;
        self.out_proj.forward(&out)
    }
}

#[derive(Debug, Clone)]
struct Mlp {
    fc1: Linear,
    fc2: Linear,
}

impl Module for Mlp {
    fn forward(&self, xs: &Tensor) -> Result<Tensor> {
        self.fc2.forward(&quick_gelu(&self.fc1.forward(xs)?)?)
    }
}

#[derive(Debug, Clone)]
struct EncoderLayer {
    self_attn: Attention,
    layer_norm1: LayerNorm,
    mlp: Mlp,
    layer_norm2: LayerNorm,
}

impl EncoderLayer {
    fn forward(&self, xs: &Tensor, mask: Option<&Tensor>) -> Result<Tensor> {
        let residual = xs;
        let xs = self.self_attn.forward(&self.layer_norm1.forward(xs)?, mask)?;
        let xs = (residual + xs)?;
        let residual = &xs;
        let out = self.mlp.forward(&self.layer_norm2.forward(&xs)?)?;
        residual + out
    }
}

/// Stack of pre-norm transformer layers shared by the text and vision towers.
#[derive(Debug, Clone)]
pub struct Encoder {
    layers: Vec<EncoderLayer>,
}

impl Encoder {
    /// Load `num_layers` layers from `vb` (`layers.{i}.*`).
    pub fn load(
        vb: VarBuilder,
        num_layers: usize,
        hidden_size: usize,
        intermediate_size: usize,
        num_heads: usize,
        eps: f64,
    ) -> Result<Self> {
        let vb = vb.pp("layers");
        let layers = (0..num_layers)
            .map(|i| {
                let vb = vb.pp(i.to_string());
                Ok(EncoderLayer {
                    self_attn: Attention::load(vb.pp("self_attn"), hidden_size, num_heads)?,
                    layer_norm1: layer_norm(hidden_size, eps, vb.pp("layer_norm1"))?,
                    mlp: Mlp {
                        fc1: linear(hidden_size, intermediate_size, vb.pp("mlp.fc1"))?,
                        fc2: linear(intermediate_size, hidden_size, vb.pp("mlp.fc2"))?,
                    },
                    layer_norm2: layer_norm(hidden_size, eps, vb.pp("layer_norm2"))?,
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { layers })
    }

    /// Run every layer; `mask` is added to the attention logits.
    pub fn forward(&self, xs: &Tensor, mask: Option<&Tensor>) -> Result<Tensor> {
        let mut xs = xs.clone();
        for layer in &self.layers {
            xs = layer.forward(&xs, mask)?;
        }
        Ok(xs)
    }
}

/// Additive mask keeping each token from attending to later tokens.
pub fn causal_mask(seq: usize, device: &candle_core::Device) -> Result<Tensor> {
    let mask: Vec<f32> = (0..seq)
        .flat_map(|i| (0..seq).map(move |j| if j > i { f32::NEG_INFINITY } else { 0. }))
        .collect();
    Tensor::from_vec(mask, (seq, seq), device)
}

/// L2 normalize along the last dimension.
pub fn l2_normalize(xs: &Tensor, eps: f64) -> Result<Tensor> {
    let norm = xs.sqr()?.sum_keepdim(D::Minus1)?.sqrt()?.affine(1., eps)?;
    xs.broadcast_div(&norm)
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{DType, Device};

    #[test]
    fn test_causal_mask() -> Result<()> {
        let mask = causal_mask(3, &Device::Cpu)?.to_vec2::<f32>()?;
        assert_eq!(mask[0][0], 0.);
        assert_eq!(mask[0][1], f32::NEG_INFINITY);
        assert_eq!(mask[2], vec![0., 0., 0.]);
        Ok(())
    }

    #[test]
    fn test_l2_normalize() -> Result<()> {
        let xs = Tensor::new(&[[3f32, 4.], [0., 2.]], &Device::Cpu)?;
        let ys = l2_normalize(&xs, 0.)?.to_vec2::<f32>()?;
        assert_eq!(ys, vec![vec![0.6, 0.8], vec![0., 1.]]);
        Ok(())
    }

    #[test]
    fn test_encoder_shapes() -> Result<()> {
        let vb = VarBuilder::zeros(DType::F32, &Device::Cpu);
        let encoder = Encoder::load(vb, 2, 8, 16, 2, 1e-5)?;
        let xs = Tensor::ones((1, 5, 8), DType::F32, &Device::Cpu)?;
        let mask = causal_mask(5, &Device::Cpu)?;
        let ys = encoder.forward(&xs, Some(&mask))?;
        assert_eq!(ys.dims(), &[1, 5, 8]);
        Ok(())
    }
}
