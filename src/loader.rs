use std::{fmt, path::PathBuf, str::FromStr};

use candle_core::{DType, Device};
use candle_nn::VarBuilder;
use hf_hub::api::sync::ApiRepo;
use tokenizers::Tokenizer;

use crate::{
    error::OwlError,
    model::{OwlVit, OwlVitConfig},
    processor::{Processor, ResizeMode},
};

/// Supported pretrained checkpoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelKind {
    /// OWLv2, `google/owlv2-base-patch16-ensemble`.
    OwlV2,
    /// OWL-ViT, `google/owlvit-base-patch32`.
    OwlVit,
}

/// Static description of a checkpoint.
#[derive(Debug)]
pub struct ModelSpec {
    /// The model this entry describes.
    pub kind: ModelKind,
    /// Number used by the interactive menu.
    pub choice: u32,
    /// Name shown to users.
    pub display_name: &'static str,
    /// Short name accepted on the command line.
    pub short_name: &'static str,
    /// Hugging Face hub repository.
    pub repo: &'static str,
    /// Name of the CLIP sub-module in the weights.
    pub backbone: &'static str,
    /// How images are brought to the model input.
    pub resize_mode: ResizeMode,
}

/// All supported checkpoints, in menu order.
pub static MODELS: [ModelSpec; 2] = [
    ModelSpec {
        kind: ModelKind::OwlV2,
        choice: 1,
        display_name: "OWLv2",
        short_name: "owlv2",
        repo: "google/owlv2-base-patch16-ensemble",
        backbone: "owlv2",
        resize_mode: ResizeMode::PadToSquare,
    },
    ModelSpec {
        kind: ModelKind::OwlVit,
        choice: 2,
        display_name: "OWLvit",
        short_name: "owlvit",
        repo: "google/owlvit-base-patch32",
        backbone: "owlvit",
        resize_mode: ResizeMode::Stretch,
    },
];

impl ModelKind {
    /// Table entry of this model.
    pub fn spec(&self) -> &'static ModelSpec {
        match self {
            ModelKind::OwlV2 => &MODELS[0],
            ModelKind::OwlVit => &MODELS[1],
        }
    }

    /// Resolve a menu number.
    pub fn from_choice(choice: u32) -> Option<Self> {
        MODELS.iter().find(|m| m.choice == choice).map(|m| m.kind)
    }
}

impl FromStr for ModelKind {
    type Err = OwlError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if let Ok(choice) = s.parse::<u32>() {
            return Self::from_choice(choice)
                .ok_or_else(|| OwlError::InputError(format!("Invalid model choice: {s}")));
        }
        MODELS
            .iter()
            .find(|m| {
                m.short_name.eq_ignore_ascii_case(s) || m.display_name.eq_ignore_ascii_case(s)
            })
            .map(|m| m.kind)
            .ok_or_else(|| OwlError::InputError(format!("Invalid model: {s}")))
    }
}

impl TryFrom<String> for ModelKind {
    type Error = OwlError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl fmt::Display for ModelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.spec().display_name)
    }
}

/// Pick the compute device once, for the lifetime of the loaded model.
pub fn select_device(use_cpu: bool) -> Result<Device, OwlError> {
    if use_cpu {
        Ok(Device::Cpu)
    } else {
        Device::cuda_if_available(0)
            .map_err(|_| OwlError::LoadModelError("cuda:0 error".to_string()))
    }
}

/// Download (or reuse the cached copy of) a checkpoint and build model and processor.
///
/// Failures are reported as load errors and are not retried.
pub fn load(kind: ModelKind, device: &Device) -> Result<(OwlVit, Processor), OwlError> {
    let spec = kind.spec();
    tracing::info!("loading {} from {}", spec.display_name, spec.repo);

    let repo = hf_hub::api::sync::Api::new()?.model(spec.repo.to_string());

    let config_path = repo.get("config.json")?;
    let config_json = std::fs::read_to_string(&config_path)?;
    let config = OwlVitConfig::from_json(&config_json)
        .map_err(|e| OwlError::LoadModelError(format!("invalid config.json: {e}")))?;

    let tokenizer = Tokenizer::from_file(repo.get("tokenizer.json")?)
        .map_err(|e| OwlError::TokenizerError(e.to_string()))?;

    let vb = var_builder(&repo, device)?;
    let model = OwlVit::load(vb, &config, spec.backbone)
        .map_err(|e| OwlError::LoadModelError(e.to_string()))?;

    let processor = Processor::new(
        tokenizer,
        spec.resize_mode,
        config.vision_config.image_size,
        config.text_config.max_position_embeddings,
    );

    tracing::info!(
        "{} ready: {}px input, {} patches",
        spec.display_name,
        config.vision_config.image_size,
        config.vision_config.patches_per_side().pow(2)
    );
    Ok((model, processor))
}

fn var_builder(repo: &ApiRepo, device: &Device) -> Result<VarBuilder<'static>, OwlError> {
    match repo.get("model.safetensors") {
        Ok(path) => {
            let vb = unsafe { VarBuilder::from_mmaped_safetensors(&[path], DType::F32, device) };
            vb.map_err(|e| OwlError::LoadModelError(e.to_string()))
        }
        Err(err) => {
            tracing::debug!("no safetensors weights ({err}), falling back to pytorch_model.bin");
            let path: PathBuf = repo.get("pytorch_model.bin")?;
            VarBuilder::from_pth(path, DType::F32, device)
                .map_err(|e| OwlError::LoadModelError(e.to_string()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_table() {
        for spec in MODELS.iter() {
            assert_eq!(spec.kind.spec().choice, spec.choice);
            assert_eq!(ModelKind::from_choice(spec.choice), Some(spec.kind));
        }
        assert_eq!(ModelKind::from_choice(3), None);
        assert_eq!(ModelKind::OwlV2.to_string(), "OWLv2");
    }

    #[test]
    fn test_parse_model_kind() -> Result<(), OwlError> {
        assert_eq!("owlv2".parse::<ModelKind>()?, ModelKind::OwlV2);
        assert_eq!(" OWLvit ".parse::<ModelKind>()?, ModelKind::OwlVit);
        assert_eq!(ModelKind::try_from("2".to_string())?, ModelKind::OwlVit);
        assert!(matches!("3".parse::<ModelKind>(), Err(OwlError::InputError(_))));
        assert!(matches!("yolo".parse::<ModelKind>(), Err(OwlError::InputError(_))));
        Ok(())
    }
}
