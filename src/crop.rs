use std::fmt;
use std::str::FromStr;

use kornia_image::{Image, ImageSize};

use crate::error::OwlError;

/// Crop request in pixels, `x,y` being the top-left corner.
///
/// Values may lie outside the image; they are clamped when cropping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CropRect {
    /// Left edge.
    pub x: i64,
    /// Top edge.
    pub y: i64,
    /// Requested width.
    pub width: i64,
    /// Requested height.
    pub height: i64,
}

impl Default for CropRect {
    fn default() -> Self {
        Self {
            x: 0,
            y: 0,
            width: 100,
            height: 100,
        }
    }
}

impl CropRect {
    /// Parse `x,y,width,height`, falling back to the default rectangle when malformed.
    pub fn parse(s: &str) -> Self {
        s.parse().unwrap_or_else(|err| {
            tracing::warn!("{err}, using the default crop {}", Self::default());
            Self::default()
        })
    }

    /// Origin and size after clamping to a `width` x `height` image.
    ///
    /// The origin lands inside the image and the size is at least one pixel,
    /// never reaching past the right or bottom edge.
    pub fn clamp_to(&self, width: usize, height: usize) -> Option<(usize, usize, usize, usize)> {
        if width == 0 || height == 0 {
            return None;
        }
        let (w, h) = (width as i64, height as i64);
        let x = self.x.clamp(0, w - 1);
        let y = self.y.clamp(0, h - 1);
        let cw = self.width.min(w - x).max(1);
        let ch = self.height.min(h - y).max(1);
        Some((x as usize, y as usize, cw as usize, ch as usize))
    }
}

impl FromStr for CropRect {
    type Err = OwlError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let coords = s
            .split(',')
            .map(|v| v.trim().parse::<i64>())
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| OwlError::InputError(format!("Malformed box coordinates {s:?}: {e}")))?;
        match coords[..] {
            [x, y, width, height] => Ok(Self {
                x,
                y,
                width,
                height,
            }),
            _ => Err(OwlError::InputError(format!(
                "Expected 4 box coordinates, got {}",
                coords.len()
            ))),
        }
    }
}

impl fmt::Display for CropRect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{},{},{}", self.x, self.y, self.width, self.height)
    }
}

/// Copy the clamped region of `image` into a new image.
pub fn try_crop(image: &Image<u8, 3>, rect: CropRect) -> Result<Image<u8, 3>, OwlError> {
    let (x, y, width, height) = rect
        .clamp_to(image.width(), image.height())
        .ok_or_else(|| OwlError::CropError("cannot crop an empty image".to_string()))?;

    let stride = image.width() * 3;
    let mut data = Vec::with_capacity(width * height * 3);
    for row in image.as_slice().chunks_exact(stride).skip(y).take(height) {
        data.extend_from_slice(&row[x * 3..(x + width) * 3]);
    }

    Image::new(ImageSize { width, height }, data)
        .map_err(|e| OwlError::CropError(e.to_string()))
}

/// Crop `image`, returning `None` when there is no image or the crop fails.
pub fn crop(
    image: Option<&Image<u8, 3>>,
    x: i64,
    y: i64,
    width: i64,
    height: i64,
) -> Option<Image<u8, 3>> {
    let image = image?;
    let rect = CropRect {
        x,
        y,
        width,
        height,
    };
    match try_crop(image, rect) {
        Ok(cropped) => Some(cropped),
        Err(err) => {
            tracing::error!("Crop error: {err}");
            None
        }
    }
}

/// Crop `image` with a `x,y,width,height` string, used to preview a reference crop.
pub fn crop_from_bbox(image: Option<&Image<u8, 3>>, coords: &str) -> Option<Image<u8, 3>> {
    let rect = CropRect::parse(coords);
    crop(image, rect.x, rect.y, rect.width, rect.height)
}
