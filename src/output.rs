use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};
use image::RgbImage;
use kornia_image::{Image, ImageSize};

use crate::error::OwlError;

/// Convert an rgb8 kornia image into an `image` buffer.
pub fn to_rgb_image(image: &Image<u8, 3>) -> Result<RgbImage, OwlError> {
    RgbImage::from_raw(
        image.width() as u32,
        image.height() as u32,
        image.as_slice().to_vec(),
    )
    .ok_or_else(|| OwlError::InputError("image buffer does not match its size".to_string()))
}

/// Convert an `image` buffer into an rgb8 kornia image.
pub fn from_rgb_image(image: RgbImage) -> Result<Image<u8, 3>, OwlError> {
    let size = ImageSize {
        width: image.width() as usize,
        height: image.height() as usize,
    };
    Ok(Image::new(size, image.into_raw())?)
}

/// Read any supported image file as rgb8.
pub fn read_image(path: impl AsRef<Path>) -> Result<Image<u8, 3>, OwlError> {
    let path = path.as_ref();
    if !path.is_file() {
        return Err(OwlError::InputError(format!(
            "no image at {}",
            path.display()
        )));
    }
    from_rgb_image(image::open(path)?.to_rgb8())
}

/// Output file for a result produced at `now`, e.g. `detection-1542-16-10.jpg`.
pub fn timestamped_path(dir: impl AsRef<Path>, now: DateTime<Local>) -> PathBuf {
    dir.as_ref()
        .join(now.format("detection-%H%M-%d-%m.jpg").to_string())
}

/// Write an annotated image as JPEG into `dir`, creating it if needed.
///
/// Returns the path of the written file.
pub fn save_annotated(image: &Image<u8, 3>, dir: impl AsRef<Path>) -> Result<PathBuf, OwlError> {
    std::fs::create_dir_all(dir.as_ref())?;
    let path = timestamped_path(dir, Local::now());
    to_rgb_image(image)?.save(&path)?;
    tracing::info!("image saved to {}", path.display());
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_timestamped_path() {
        let now = Local
            .with_ymd_and_hms(2025, 3, 7, 9, 5, 0)
            .single()
            .expect("valid local time");
        assert_eq!(
            timestamped_path("results", now),
            PathBuf::from("results/detection-0905-07-03.jpg")
        );
    }

    #[test]
    fn test_conversions() -> Result<(), OwlError> {
        let image = Image::<u8, 3>::new(ImageSize { width: 2, height: 1 }, vec![1, 2, 3, 4, 5, 6])?;
        let rgb = to_rgb_image(&image)?;
        assert_eq!(rgb.get_pixel(1, 0).0, [4, 5, 6]);
        let back = from_rgb_image(rgb)?;
        assert_eq!(back.as_slice(), image.as_slice());
        Ok(())
    }

    #[test]
    fn test_read_missing_image() {
        assert!(matches!(
            read_image("does/not/exist.png"),
            Err(OwlError::InputError(_))
        ));
    }

    #[test]
    fn test_save_annotated() -> Result<(), OwlError> {
        let dir = std::env::temp_dir().join(format!("kornia-owl-{}", std::process::id()));
        let image = Image::<u8, 3>::new(ImageSize { width: 4, height: 4 }, vec![200; 48])?;
        let path = save_annotated(&image, &dir)?;
        assert!(path.starts_with(&dir));
        let reread = read_image(&path)?;
        assert_eq!((reread.width(), reread.height()), (4, 4));
        std::fs::remove_dir_all(&dir)?;
        Ok(())
    }
}
