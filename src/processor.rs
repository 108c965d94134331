use candle_core::{Device, Tensor};
use kornia_image::{Image, ImageSize};
use tokenizers::Tokenizer;

use crate::{error::OwlError, postprocess::BoxScale};

/// CLIP normalization mean, per RGB channel.
const IMAGE_MEAN: [f32; 3] = [0.481_454_66, 0.457_827_5, 0.408_210_73];
/// CLIP normalization standard deviation, per RGB channel.
const IMAGE_STD: [f32; 3] = [0.268_629_54, 0.261_302_58, 0.275_777_11];
/// Fill value used when padding to a square, mid-gray.
const PAD_VALUE: u8 = 128;

/// How an image is brought to the square model input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResizeMode {
    /// Resize both axes independently.
    Stretch,
    /// Pad at the bottom/right to a square, then resize.
    PadToSquare,
}

/// Turns images and text queries into model inputs.
pub struct Processor {
    tokenizer: Tokenizer,
    resize_mode: ResizeMode,
    image_size: usize,
    max_tokens: usize,
}

impl Processor {
    /// Create a processor for a model taking `image_size` square inputs and at most
    /// `max_tokens` tokens per query.
    pub fn new(
        mut tokenizer: Tokenizer,
        resize_mode: ResizeMode,
        image_size: usize,
        max_tokens: usize,
    ) -> Self {
        tokenizer.with_padding(None);
        Self {
            tokenizer,
            resize_mode,
            image_size,
            max_tokens,
        }
    }

    /// Tokenize one query, keeping the end token when truncating.
    pub fn tokenize(&self, query: &str) -> Result<Vec<u32>, OwlError> {
        let encoding = self
            .tokenizer
            .encode(query, true)
            .map_err(|e| OwlError::TokenizerError(e.to_string()))?;
        Ok(truncate_tokens(encoding.get_ids(), self.max_tokens))
    }

    /// Tokenize every query.
    pub fn tokenize_all(&self, queries: &[String]) -> Result<Vec<Vec<u32>>, OwlError> {
        queries.iter().map(|q| self.tokenize(q)).collect()
    }

    /// Preprocess an rgb8 image into a `(1, 3, size, size)` tensor.
    ///
    /// Also returns the scale mapping normalized model boxes back to the image.
    pub fn preprocess_image(
        &self,
        image: &Image<u8, 3>,
        device: &Device,
    ) -> Result<(Tensor, BoxScale), OwlError> {
        let (width, height) = (image.width(), image.height());
        check_image_size(width, height)?;

        let (padded, scale) = match self.resize_mode {
            ResizeMode::Stretch => (None, BoxScale::stretched(width, height)),
            ResizeMode::PadToSquare => (
                Some(pad_to_square(image)?),
                BoxScale::padded_square(width, height),
            ),
        };
        let source = padded.as_ref().unwrap_or(image);

        let size = ImageSize {
            width: self.image_size,
            height: self.image_size,
        };
        let mut resized = Image::<u8, 3>::from_size_val(size, 0)?;
        kornia_imgproc::resize::resize_fast(
            source,
            &mut resized,
            kornia_imgproc::interpolation::InterpolationMode::Bilinear,
        )?;

        let data = normalize_chw(resized.as_slice(), self.image_size * self.image_size);
        let tensor = Tensor::from_vec(data, (1, 3, self.image_size, self.image_size), device)?;
        Ok((tensor, scale))
    }
}

/// Reject images without pixels.
pub(crate) fn check_image_size(width: usize, height: usize) -> Result<(), OwlError> {
    if width == 0 || height == 0 {
        return Err(OwlError::InputError(format!(
            "empty image ({width}x{height})"
        )));
    }
    Ok(())
}

/// Keep at most `max_tokens` ids, always ending with the original last id.
fn truncate_tokens(ids: &[u32], max_tokens: usize) -> Vec<u32> {
    if ids.len() <= max_tokens || max_tokens == 0 {
        return ids.to_vec();
    }
    let mut out = ids[..max_tokens - 1].to_vec();
    out.extend(ids.last());
    out
}

/// Pad an image at the bottom/right to a square.
fn pad_to_square(image: &Image<u8, 3>) -> Result<Image<u8, 3>, OwlError> {
    let (width, height) = (image.width(), image.height());
    let side = width.max(height);
    let mut data = vec![PAD_VALUE; side * side * 3];
    for (y, row) in image.as_slice().chunks_exact(width * 3).enumerate() {
        let start = y * side * 3;
        data[start..start + row.len()].copy_from_slice(row);
    }
    Ok(Image::new(
        ImageSize {
            width: side,
            height: side,
        },
        data,
    )?)
}

/// Interleaved rgb8 pixels to CLIP-normalized planar floats.
fn normalize_chw(pixels: &[u8], num_pixels: usize) -> Vec<f32> {
    let mut out = vec![0f32; num_pixels * 3];
    for (i, px) in pixels.chunks_exact(3).enumerate() {
        for c in 0..3 {
            out[c * num_pixels + i] = (px[c] as f32 / 255.0 - IMAGE_MEAN[c]) / IMAGE_STD[c];
        }
    }
    out
}
