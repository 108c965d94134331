use serde::Deserialize;

/// Hyper-parameters of the text transformer.
#[derive(Debug, Clone, Deserialize)]
pub struct TextConfig {
    /// Size of the token vocabulary.
    #[serde(default = "TextConfig::default_vocab_size")]
    pub vocab_size: usize,
    /// Width of the transformer.
    #[serde(default = "TextConfig::default_hidden_size")]
    pub hidden_size: usize,
    /// Width of the MLP blocks.
    #[serde(default = "TextConfig::default_intermediate_size")]
    pub intermediate_size: usize,
    /// Number of encoder layers.
    #[serde(default = "default_num_hidden_layers")]
    pub num_hidden_layers: usize,
    /// Number of attention heads.
    #[serde(default = "TextConfig::default_num_attention_heads")]
    pub num_attention_heads: usize,
    /// Maximum number of tokens per query.
    #[serde(default = "TextConfig::default_max_position_embeddings")]
    pub max_position_embeddings: usize,
    /// Epsilon of the layer norms.
    #[serde(default = "default_layer_norm_eps")]
    pub layer_norm_eps: f64,
}

impl TextConfig {
    fn default_vocab_size() -> usize {
        49408
    }
    fn default_hidden_size() -> usize {
        512
    }
    fn default_intermediate_size() -> usize {
        2048
    }
    fn default_num_attention_heads() -> usize {
        8
    }
    fn default_max_position_embeddings() -> usize {
        16
    }
}

impl Default for TextConfig {
    fn default() -> Self {
        Self {
            vocab_size: Self::default_vocab_size(),
            hidden_size: Self::default_hidden_size(),
            intermediate_size: Self::default_intermediate_size(),
            num_hidden_layers: default_num_hidden_layers(),
            num_attention_heads: Self::default_num_attention_heads(),
            max_position_embeddings: Self::default_max_position_embeddings(),
            layer_norm_eps: default_layer_norm_eps(),
        }
    }
}

/// Hyper-parameters of the vision transformer.
#[derive(Debug, Clone, Deserialize)]
pub struct VisionConfig {
    /// Width of the transformer.
    #[serde(default = "VisionConfig::default_hidden_size")]
    pub hidden_size: usize,
    /// Width of the MLP blocks.
    #[serde(default = "VisionConfig::default_intermediate_size")]
    pub intermediate_size: usize,
    /// Number of encoder layers.
    #[serde(default = "default_num_hidden_layers")]
    pub num_hidden_layers: usize,
    /// Number of attention heads.
    #[serde(default = "VisionConfig::default_num_attention_heads")]
    pub num_attention_heads: usize,
    /// Side of the square model input.
    #[serde(default = "VisionConfig::default_image_size")]
    pub image_size: usize,
    /// Side of the square patches.
    #[serde(default = "VisionConfig::default_patch_size")]
    pub patch_size: usize,
    /// Epsilon of the layer norms.
    #[serde(default = "default_layer_norm_eps")]
    pub layer_norm_eps: f64,
}

impl VisionConfig {
    fn default_hidden_size() -> usize {
        768
    }
    fn default_intermediate_size() -> usize {
        3072
    }
    fn default_num_attention_heads() -> usize {
        12
    }
    fn default_image_size() -> usize {
        768
    }
    fn default_patch_size() -> usize {
        32
    }

    /// Number of patches along one side of the input.
    pub fn patches_per_side(&self) -> usize {
        self.image_size / self.patch_size
    }
}

impl Default for VisionConfig {
    fn default() -> Self {
        Self {
            hidden_size: Self::default_hidden_size(),
            intermediate_size: Self::default_intermediate_size(),
            num_hidden_layers: default_num_hidden_layers(),
            num_attention_heads: Self::default_num_attention_heads(),
            image_size: Self::default_image_size(),
            patch_size: Self::default_patch_size(),
            layer_norm_eps: default_layer_norm_eps(),
        }
    }
}

/// Checkpoint configuration, as found in the hub's `config.json`.
///
/// Nested configs are often stored as a diff against the defaults, so every
/// field falls back to the OWL-ViT base values.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct OwlVitConfig {
    /// Text tower configuration.
    #[serde(default)]
    pub text_config: TextConfig,
    /// Vision tower configuration.
    #[serde(default)]
    pub vision_config: VisionConfig,
}

impl OwlVitConfig {
    /// Parse a `config.json` document.
    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        serde_json::from_str(json)
    }
}

#[cfg(test)]
impl OwlVitConfig {
    /// A network small enough for unit tests.
    pub(crate) fn tiny() -> Self {
        Self {
            text_config: TextConfig {
                vocab_size: 10,
                hidden_size: 4,
                intermediate_size: 8,
                num_hidden_layers: 1,
                num_attention_heads: 2,
                max_position_embeddings: 6,
                layer_norm_eps: 1e-5,
            },
            vision_config: VisionConfig {
                hidden_size: 8,
                intermediate_size: 16,
                num_hidden_layers: 1,
                num_attention_heads: 2,
                image_size: 8,
                patch_size: 4,
                layer_norm_eps: 1e-5,
            },
        }
    }
}

fn default_num_hidden_layers() -> usize {
    12
}

fn default_layer_norm_eps() -> f64 {
    1e-5
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_config() -> Result<(), Box<dyn std::error::Error>> {
        let config = OwlVitConfig::from_json(
            r#"{
                "architectures": ["Owlv2ForObjectDetection"],
                "text_config": {"hidden_size": 512, "model_type": "owlv2_text_model"},
                "vision_config": {"image_size": 960, "patch_size": 16}
            }"#,
        )?;
        assert_eq!(config.vision_config.image_size, 960);
        assert_eq!(config.vision_config.patches_per_side(), 60);
        assert_eq!(config.vision_config.hidden_size, 768);
        assert_eq!(config.text_config.max_position_embeddings, 16);
        assert_eq!(config.text_config.vocab_size, 49408);

        let config = OwlVitConfig::from_json("{}")?;
        assert_eq!(config.vision_config.patches_per_side(), 24);
        Ok(())
    }
}
