use candle_core::{Device, IndexOp, Tensor};
use kornia_image::Image;

use crate::{
    bounding_box::BoundingBox,
    detection::{DetectionSet, QuerySpec, validate_queries},
    error::OwlError,
    loader::{self, ModelKind},
    model::OwlVit,
    postprocess::{RawPredictions, postprocess_image_guided, postprocess_text, select_query_box},
    processor::{Processor, check_image_size},
};

/// OWL detector configuration struct.
#[derive(Debug, Clone)]
pub struct OwlConfig {
    /// The checkpoint to use: OWLv2 or OWL-ViT
    pub model: ModelKind,
    /// The confidence threshold for text queries
    pub text_score_threshold: f32,
    /// The confidence threshold for image queries
    pub image_score_threshold: f32,
    /// The non-maximum suppression threshold for image queries
    pub nms_threshold: f32,
    /// Optional per-query non-maximum suppression threshold for text queries
    pub text_nms_threshold: Option<f32>,
    /// Whether to use the CPU or GPU
    pub use_cpu: bool,
}

/// Default configuration for the OWL detector.
impl Default for OwlConfig {
    fn default() -> Self {
        Self {
            model: ModelKind::OwlV2,
            text_score_threshold: 0.3,
            image_score_threshold: 0.5,
            nms_threshold: 0.5,
            text_nms_threshold: None,
            use_cpu: true,
        }
    }
}

/// OWL detector high level interface.
///
/// Owns the loaded model; a failed detection call leaves it usable.
pub struct Owl {
    config: OwlConfig,
    device: Device,
    model: OwlVit,
    processor: Processor,
}

impl Owl {
    /// Create a new detector, downloading the checkpoint on first use.
    pub fn new(config: OwlConfig) -> Result<Self, OwlError> {
        let device = loader::select_device(config.use_cpu)?;
        let (model, processor) = loader::load(config.model, &device)?;
        Ok(Self::from_parts(config, device, model, processor))
    }

    /// Wrap an already initialized model and processor.
    pub(crate) fn from_parts(
        config: OwlConfig,
        device: Device,
        model: OwlVit,
        processor: Processor,
    ) -> Self {
        Self {
            config,
            device,
            model,
            processor,
        }
    }

    /// The active configuration.
    pub fn config(&self) -> &OwlConfig {
        &self.config
    }

    /// Mutable access to the thresholds; the model itself cannot be swapped.
    pub fn config_mut(&mut self) -> &mut OwlConfig {
        &mut self.config
    }

    /// Run the detection matching `query`.
    pub fn detect(
        &self,
        image: &Image<u8, 3>,
        query: &QuerySpec,
    ) -> Result<DetectionSet, OwlError> {
        match query {
            QuerySpec::Text(queries) => self.detect_by_text(image, queries),
            QuerySpec::Image(reference) => self.detect_by_image(image, reference),
        }
    }

    /// Detect the objects described by free text `queries` in an rgb8 image.
    pub fn detect_by_text(
        &self,
        image: &Image<u8, 3>,
        queries: &[String],
    ) -> Result<DetectionSet, OwlError> {
        check_image_size(image.width(), image.height())?;
        validate_queries(queries)?;

        let (pixels, scale) = self.processor.preprocess_image(image, &self.device)?;
        let tokens = self.processor.tokenize_all(queries)?;
        tracing::debug!("preprocessed {} queries", tokens.len());

        let feats = self.model.image_features(&pixels)?;
        let query_embeds = self.model.text_embeddings(&tokens)?;
        let logits = self.model.class_logits(&feats, &query_embeds)?;
        let boxes = self.model.boxes(&feats)?;
        tracing::debug!("forward pass completed");

        let raw = raw_predictions(&logits, &boxes)?;
        let detections = postprocess_text(
            &raw,
            queries,
            self.config.text_score_threshold,
            self.config.text_nms_threshold,
            &scale,
        )?;

        tracing::info!(
            "text detection: {} objects above {}",
            detections.len(),
            self.config.text_score_threshold
        );
        Ok(detections)
    }

    /// Detect objects similar to the exemplar `reference_crop` in `target`.
    pub fn detect_by_image(
        &self,
        target: &Image<u8, 3>,
        reference_crop: &Image<u8, 3>,
    ) -> Result<DetectionSet, OwlError> {
        check_image_size(target.width(), target.height())?;
        check_image_size(reference_crop.width(), reference_crop.height())?;
        let (query_pixels, _) = self.processor.preprocess_image(reference_crop, &self.device)?;
        let (target_pixels, scale) = self.processor.preprocess_image(target, &self.device)?;

        let query_embed = self.embed_image_query(&query_pixels)?;

        let feats = self.model.image_features(&target_pixels)?;
        let logits = self.model.class_logits(&feats, &query_embed)?;
        let boxes = self.model.boxes(&feats)?;
        tracing::debug!("forward pass completed");

        let raw = raw_predictions(&logits, &boxes)?;
        let detections = postprocess_image_guided(
            &raw,
            self.config.image_score_threshold,
            self.config.nms_threshold,
            &scale,
        )?;

        tracing::info!(
            "image detection: {} objects above {} after nms at {}",
            detections.len(),
            self.config.image_score_threshold,
            self.config.nms_threshold
        );
        Ok(detections)
    }

    /// Class embedding `(1, 1, hidden)` of the box that best covers the query image.
    fn embed_image_query(&self, query_pixels: &Tensor) -> Result<Tensor, OwlError> {
        let feats = self.model.image_features(query_pixels)?;
        let class_embeds = self.model.class_embeddings(&feats)?.i(0)?;
        let boxes: Vec<BoundingBox> = self
            .model
            .boxes(&feats)?
            .i(0)?
            .to_vec2::<f32>()?
            .iter()
            .map(|b| BoundingBox::from_center(b[0], b[1], b[2], b[3], 0., 0))
            .collect();
        let similarity = OwlVit::mean_similarity(&class_embeds)?.to_vec1::<f32>()?;

        let index = select_query_box(&boxes, &similarity).ok_or_else(|| {
            OwlError::InferenceError("no box found for the query image".to_string())
        })?;
        tracing::debug!("query embedding taken from patch {index}");

        let hidden = class_embeds.dim(1)?;
        Ok(class_embeds.i(index)?.reshape((1, 1, hidden))?)
    }
}

/// Copy head outputs of a single image out of the device.
fn raw_predictions(logits: &Tensor, boxes: &Tensor) -> Result<RawPredictions, OwlError> {
    let logits = logits.i(0)?.to_vec2::<f32>()?;
    let boxes = boxes
        .i(0)?
        .to_vec2::<f32>()?
        .into_iter()
        .map(|b| <[f32; 4]>::try_from(b.as_slice()))
        .collect::<Result<Vec<_>, _>>()
        .map_err(|_| OwlError::InferenceError("boxes must have 4 coordinates".to_string()))?;
    Ok(RawPredictions { logits, boxes })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::mem::ManuallyDrop;
    use std::str::FromStr;

    use candle_core::DType;
    use candle_nn::VarBuilder;
    use kornia_image::ImageSize;
    use tokenizers::Tokenizer;

    use crate::{detection::Label, model::OwlVitConfig, processor::ResizeMode};

    const TEST_IMAGE: &str = "tests/data/bike.jpg";

    const TOKENIZER_JSON: &str = r#"{
        "version": "1.0",
        "truncation": null,
        "padding": null,
        "added_tokens": [],
        "normalizer": null,
        "pre_tokenizer": {"type": "Whitespace"},
        "post_processor": null,
        "decoder": null,
        "model": {
            "type": "WordLevel",
            "vocab": {"[UNK]": 0, "cat": 1, "dog": 2},
            "unk_token": "[UNK]"
        }
    }"#;

    /// Detector with an all-zero network: every patch scores exactly 0.5.
    fn zero_owl(config: OwlConfig) -> Result<Owl, Box<dyn std::error::Error>> {
        let device = Device::Cpu;
        let vb = VarBuilder::zeros(DType::F32, &device);
        let model_config = OwlVitConfig::tiny();
        let model = OwlVit::load(vb, &model_config, "owlvit")?;
        let tokenizer = Tokenizer::from_str(TOKENIZER_JSON).map_err(|e| e.to_string())?;
        let processor = Processor::new(
            tokenizer,
            ResizeMode::PadToSquare,
            model_config.vision_config.image_size,
            model_config.text_config.max_position_embeddings,
        );
        Ok(Owl::from_parts(config, device, model, processor))
    }

    fn gray_image(width: usize, height: usize) -> Result<Image<u8, 3>, OwlError> {
        Ok(Image::new(ImageSize { width, height }, vec![90; width * height * 3])?)
    }

    #[test]
    fn test_detect_by_text_with_zero_model() -> Result<(), Box<dyn std::error::Error>> {
        let owl = zero_owl(OwlConfig::default())?;
        let image = gray_image(20, 10)?;
        let queries = vec!["cat".to_string(), "dog".to_string()];

        let detections = owl.detect_by_text(&image, &queries)?;
        assert_eq!(detections.len(), 4);
        for detection in &detections {
            assert!((detection.score() - 0.5).abs() < 1e-5);
            assert!(matches!(detection.label, Label::Text(_)));
            let b = detection.bbox;
            assert!(b.xmin <= b.xmax && b.ymin <= b.ymax);
            assert!(b.xmax <= 19.0 && b.ymax <= 9.0);
        }

        let mut strict = zero_owl(OwlConfig::default())?;
        strict.config_mut().text_score_threshold = 0.6;
        assert!(strict.detect_by_text(&image, &queries)?.is_empty());
        Ok(())
    }

    #[test]
    fn test_detect_by_text_rejects_bad_queries() -> Result<(), Box<dyn std::error::Error>> {
        let owl = zero_owl(OwlConfig::default())?;
        let image = gray_image(8, 8)?;
        assert!(matches!(
            owl.detect_by_text(&image, &[]),
            Err(OwlError::InputError(_))
        ));
        assert!(matches!(
            owl.detect_by_text(&image, &[" ".to_string()]),
            Err(OwlError::InputError(_))
        ));
        // the detector still works afterwards
        assert!(!owl.detect_by_text(&image, &["cat".to_string()])?.is_empty());
        Ok(())
    }

    #[test]
    fn test_detect_by_image_with_zero_model() -> Result<(), Box<dyn std::error::Error>> {
        let owl = zero_owl(OwlConfig::default())?;
        let target = gray_image(16, 16)?;
        let reference = gray_image(4, 6)?;

        let detections = owl.detect(&target, &QuerySpec::Image(reference))?;
        assert!(!detections.is_empty());
        assert!(detections.len() <= 4);
        assert!(detections.iter().all(|d| d.label == Label::Index(0)));

        let mut strict = zero_owl(OwlConfig::default())?;
        strict.config_mut().image_score_threshold = 0.51;
        assert!(strict.detect_by_image(&target, &gray_image(4, 4)?)?.is_empty());
        Ok(())
    }

    #[test]
    fn test_empty_images_are_rejected() -> Result<(), Box<dyn std::error::Error>> {
        let owl = zero_owl(OwlConfig::default())?;
        let image = gray_image(8, 8)?;
        let size = ImageSize {
            width: 0,
            height: 0,
        };
        // kornia-tensor 0.1.8 cannot free a zero-size buffer
        let empty = ManuallyDrop::new(Image::<u8, 3>::new(size, vec![])?);

        let queries = vec!["cat".to_string()];
        assert!(matches!(
            owl.detect_by_text(&empty, &queries),
            Err(OwlError::InputError(_))
        ));
        assert!(matches!(
            owl.detect_by_image(&empty, &image),
            Err(OwlError::InputError(_))
        ));
        assert!(matches!(
            owl.detect_by_image(&image, &empty),
            Err(OwlError::InputError(_))
        ));
        assert!(matches!(
            owl.detect(&empty, &QuerySpec::Text(queries.clone())),
            Err(OwlError::InputError(_))
        ));
        // the detector is still usable
        assert_eq!(owl.detect_by_text(&image, &queries)?.len(), 4);
        Ok(())
    }

    #[test]
    fn test_raw_predictions() -> Result<(), Box<dyn std::error::Error>> {
        let logits = Tensor::new(&[[[0.5f32, -1.], [2., 0.]]], &Device::Cpu)?;
        let boxes = Tensor::new(&[[[0.5f32, 0.5, 0.1, 0.1], [0.2, 0.2, 0.1, 0.1]]], &Device::Cpu)?;
        let raw = raw_predictions(&logits, &boxes)?;
        assert_eq!(raw.logits, vec![vec![0.5, -1.], vec![2., 0.]]);
        assert_eq!(raw.boxes[1], [0.2, 0.2, 0.1, 0.1]);

        let bad = Tensor::zeros((1, 2, 3), DType::F32, &Device::Cpu)?;
        assert!(matches!(
            raw_predictions(&logits, &bad),
            Err(OwlError::InferenceError(_))
        ));
        Ok(())
    }

    #[test]
    #[ignore = "downloads the OWLv2 checkpoint"]
    fn test_owl_inference() -> Result<(), Box<dyn std::error::Error>> {
        let owl = Owl::new(OwlConfig::default())?;
        let image = crate::output::read_image(TEST_IMAGE)?;

        let detections = owl.detect_by_text(&image, &["bike".to_string()])?;
        assert!(!detections.is_empty());

        // bad input does not poison the loaded model
        assert!(matches!(
            owl.detect_by_text(&image, &[]),
            Err(OwlError::InputError(_))
        ));
        assert!(!owl.detect_by_text(&image, &["bike".to_string()])?.is_empty());
        Ok(())
    }
}
