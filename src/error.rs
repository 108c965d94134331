/// Coarse classes of [`OwlError`], used by front ends to decide how to react.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Model or weights unavailable. Aborts the session.
    Load,
    /// Missing image, empty query list or malformed user input. Recoverable.
    Input,
    /// Unexpected failure during the forward pass. The loaded model stays usable.
    Inference,
    /// Out of bounds or degenerate crop request. Recoverable.
    Crop,
    /// Reading or writing image files.
    Io,
}

/// OWL detector error enum.
#[derive(thiserror::Error, Debug)]
pub enum OwlError {
    /// Failed to load the OWL model.
    #[error("Failed to load OWL model: {0}")]
    LoadModelError(String),

    /// Hugging Face API error.
    #[error(transparent)]
    ApiError(#[from] hf_hub::api::sync::ApiError),

    /// Failed to load or run the text tokenizer.
    #[error("Tokenizer error: {0}")]
    TokenizerError(String),

    /// The embedded label font could not be parsed.
    #[error("Failed to load font: {0}")]
    FontError(String),

    /// Invalid user input.
    #[error("Invalid input: {0}")]
    InputError(String),

    /// Internal candle error.
    #[error(transparent)]
    CandleError(#[from] candle_core::Error),

    /// The model produced output the pipeline cannot interpret.
    #[error("Inference failed: {0}")]
    InferenceError(String),

    /// Invalid crop request.
    #[error("Crop failed: {0}")]
    CropError(String),

    /// Kornia image error.
    #[error(transparent)]
    KorniaImageError(#[from] kornia_image::ImageError),

    /// Image codec error.
    #[error(transparent)]
    ImageError(#[from] image::ImageError),

    /// Filesystem error.
    #[error(transparent)]
    IoError(#[from] std::io::Error),
}

impl OwlError {
    /// The class of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            OwlError::LoadModelError(_)
            | OwlError::ApiError(_)
            | OwlError::TokenizerError(_)
            | OwlError::FontError(_) => ErrorKind::Load,
            OwlError::InputError(_) => ErrorKind::Input,
            OwlError::CandleError(_)
            | OwlError::InferenceError(_)
            | OwlError::KorniaImageError(_) => ErrorKind::Inference,
            OwlError::CropError(_) => ErrorKind::Crop,
            OwlError::ImageError(_) | OwlError::IoError(_) => ErrorKind::Io,
        }
    }

    /// Whether the caller can show a message and carry on with a safe fallback.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::Input | ErrorKind::Crop | ErrorKind::Io
        )
    }
}
