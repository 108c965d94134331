#![deny(missing_docs)]

//! Open-vocabulary object detection with OWL-ViT and OWLv2 in Rust
//!
//! This crate runs the pretrained OWL detectors with candle. Objects are
//! described either by free text queries or by a crop of an exemplar object.
//!
//! # Examples
//!
//! ```no_run
//! use kornia_owl::{Annotator, ModelKind, Owl, OwlConfig, read_image, save_annotated};
//!
//! let config = OwlConfig {
//!     model: ModelKind::OwlV2,
//!     text_score_threshold: 0.3,
//!     ..Default::default()
//! };
//!
//! let owl = Owl::new(config).expect("Failed to create OWL detector");
//!
//! let image = read_image("path/to/image.jpg").expect("Failed to read image");
//!
//! let queries = vec!["bike".to_string(), "person".to_string()];
//! let detections = owl
//!     .detect_by_text(&image, &queries)
//!     .expect("Failed to run detection");
//! println!("{}", detections.summary());
//!
//! let annotated = Annotator::new()
//!     .and_then(|annotator| annotator.annotate(&image, &detections))
//!     .expect("Failed to draw detections");
//! save_annotated(&annotated, "results").expect("Failed to save image");
//! ```

/// Drawing detections over images
mod annotate;

/// Bounding box module with non-maximum suppression
mod bounding_box;

/// Reference crops
mod crop;

/// Detection records
mod detection;

/// Error types
mod error;

/// Checkpoint table and hub download
mod loader;

/// OWL-ViT / OWLv2 model definition in candle
mod model;

/// Image file input and output
mod output;

/// OWL high level interface
mod owl;

/// Raw model outputs to detections
mod postprocess;

/// Image and text preprocessing
mod processor;

/// Interactive prompts
mod prompt;

/// Reference crop selection state
mod selection;

pub use annotate::{Annotator, LabelPlacement};
pub use bounding_box::{
    BoundingBox, generalized_iou, iou, non_maximum_suppression, non_maximum_suppression_fast,
};
pub use crop::{CropRect, crop, crop_from_bbox, try_crop};
pub use detection::{Detection, DetectionSet, Label, QuerySpec, parse_queries};
pub use error::{ErrorKind, OwlError};
pub use loader::{MODELS, ModelKind, ModelSpec};
pub use output::{read_image, save_annotated, timestamped_path};
pub use owl::{Owl, OwlConfig};
pub use processor::ResizeMode;
pub use prompt::{Prompt, TaskKind};
pub use selection::{MIN_SPAN, SelectionState};
