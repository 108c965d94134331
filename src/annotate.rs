use ab_glyph::{Font, FontRef, PxScale, ScaleFont};
use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_hollow_rect_mut, draw_text_mut, text_size};
use imageproc::rect::Rect;
use kornia_image::Image;

use crate::bounding_box::BoundingBox;
use crate::detection::DetectionSet;
use crate::error::OwlError;
use crate::output::{from_rgb_image, to_rgb_image};

static FONT: &[u8] = include_bytes!("../assets/DejaVuSans.ttf");

const PALETTE: [[u8; 3]; 10] = [
    [255, 56, 56],
    [255, 157, 151],
    [255, 112, 31],
    [255, 178, 29],
    [207, 210, 49],
    [72, 249, 10],
    [26, 147, 52],
    [0, 212, 187],
    [52, 69, 147],
    [203, 56, 255],
];

const TEXT_COLOR: Rgb<u8> = Rgb([255, 255, 255]);
const LABEL_PADDING: u32 = 2;

/// Where a label is drawn relative to its box.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LabelPlacement {
    /// Centered inside the box.
    #[default]
    Centered,
    /// Just above the top-left corner, or inside the box when there is no room.
    Above,
}

/// Draws detections over a copy of an image.
#[derive(Debug, Clone)]
pub struct Annotator {
    font: FontRef<'static>,
    scale: PxScale,
    show_labels: bool,
    placement: LabelPlacement,
    thickness: u32,
}

impl Annotator {
    /// Create an annotator drawing 2px boxes with centered labels.
    pub fn new() -> Result<Self, OwlError> {
        let font =
            FontRef::try_from_slice(FONT).map_err(|e| OwlError::FontError(e.to_string()))?;
        Ok(Self {
            font,
            scale: PxScale::from(16.0),
            show_labels: true,
            placement: LabelPlacement::default(),
            thickness: 2,
        })
    }

    /// Draw `label: score` tags next to the boxes.
    pub fn with_labels(mut self, show_labels: bool) -> Self {
        self.show_labels = show_labels;
        self
    }

    /// Set where labels are drawn.
    pub fn with_placement(mut self, placement: LabelPlacement) -> Self {
        self.placement = placement;
        self
    }

    /// Set the box outline width in pixels, at least 1.
    pub fn with_thickness(mut self, thickness: u32) -> Self {
        self.thickness = thickness.max(1);
        self
    }

    /// Set the label text height in pixels.
    pub fn with_font_size(mut self, size: f32) -> Self {
        self.scale = PxScale::from(size);
        self
    }

    /// Return a copy of `image` with every detection drawn on it.
    ///
    /// Pixels outside the drawn outlines and label tags are left untouched.
    pub fn annotate(
        &self,
        image: &Image<u8, 3>,
        detections: &DetectionSet,
    ) -> Result<Image<u8, 3>, OwlError> {
        let mut canvas = to_rgb_image(image)?;
        let labels = detections.display_labels();

        for (i, (detection, label)) in detections.iter().zip(labels.iter()).enumerate() {
            let color = Rgb(PALETTE[i % PALETTE.len()]);
            let Some(rect) = pixel_rect(&detection.bbox, canvas.width(), canvas.height()) else {
                continue;
            };
            self.draw_outline(&mut canvas, rect, color);
            if self.show_labels {
                let text = format!("{label}: {:.2}", detection.score());
                self.draw_label(&mut canvas, rect, &text, color);
            }
        }

        from_rgb_image(canvas)
    }

    fn draw_outline(&self, canvas: &mut RgbImage, rect: Rect, color: Rgb<u8>) {
        for t in 0..self.thickness {
            let (w, h) = (rect.width(), rect.height());
            if 2 * t >= w || 2 * t >= h {
                break;
            }
            let inner = Rect::at(rect.left() + t as i32, rect.top() + t as i32)
                .of_size(w - 2 * t, h - 2 * t);
            draw_hollow_rect_mut(canvas, inner, color);
        }
    }

    /// Area covered by the tag of `text` for a box drawn at `rect`.
    fn tag_rect(&self, rect: Rect, text: &str) -> Rect {
        let (text_width, _) = text_size(self.scale, &self.font, text);
        let line_height = self.font.as_scaled(self.scale).height().ceil() as u32;
        let tag_width = text_width + 2 * LABEL_PADDING;
        let tag_height = line_height + 2 * LABEL_PADDING;

        let (x, y) = match self.placement {
            LabelPlacement::Centered => (
                rect.left() + rect.width() as i32 / 2 - tag_width as i32 / 2,
                rect.top() + rect.height() as i32 / 2 - tag_height as i32 / 2,
            ),
            LabelPlacement::Above => {
                let above = rect.top() - tag_height as i32;
                (rect.left(), if above >= 0 { above } else { rect.top() })
            }
        };
        Rect::at(x, y).of_size(tag_width, tag_height)
    }

    fn draw_label(&self, canvas: &mut RgbImage, rect: Rect, text: &str, color: Rgb<u8>) {
        let area = self.tag_rect(rect, text);

        // the tag is rendered on its own buffer so glyphs never spill over it
        let mut tag = RgbImage::from_pixel(area.width(), area.height(), color);
        draw_text_mut(
            &mut tag,
            TEXT_COLOR,
            LABEL_PADDING as i32,
            LABEL_PADDING as i32,
            self.scale,
            &self.font,
            text,
        );
        image::imageops::overlay(canvas, &tag, area.left() as i64, area.top() as i64);
    }
}

/// Integer rectangle covering a box, clipped to the image. `None` when nothing is visible.
fn pixel_rect(bbox: &BoundingBox, width: u32, height: u32) -> Option<Rect> {
    if width == 0 || height == 0 || !(bbox.xmin <= bbox.xmax && bbox.ymin <= bbox.ymax) {
        return None;
    }
    let max_x = (width - 1) as f32;
    let max_y = (height - 1) as f32;
    let x0 = bbox.xmin.round().clamp(0.0, max_x) as i32;
    let y0 = bbox.ymin.round().clamp(0.0, max_y) as i32;
    let x1 = bbox.xmax.round().clamp(0.0, max_x) as i32;
    let y1 = bbox.ymax.round().clamp(0.0, max_y) as i32;
    Some(Rect::at(x0, y0).of_size((x1 - x0 + 1) as u32, (y1 - y0 + 1) as u32))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detection::{Detection, Label};
    use kornia_image::ImageSize;

    fn gray(width: usize, height: usize) -> Image<u8, 3> {
        Image::from_size_val(ImageSize { width, height }, 40u8).expect("valid image size")
    }

    fn detection(xmin: f32, ymin: f32, xmax: f32, ymax: f32, label: Label) -> Detection {
        Detection {
            bbox: BoundingBox {
                xmin,
                ymin,
                xmax,
                ymax,
                confidence: 0.9,
                class: 0,
            },
            label,
        }
    }

    #[test]
    fn test_no_detections_is_identity() -> Result<(), OwlError> {
        let image = gray(32, 24);
        let out = Annotator::new()?.annotate(&image, &DetectionSet::default())?;
        assert_eq!(out.as_slice(), image.as_slice());
        Ok(())
    }

    #[test]
    fn test_outline_only_touches_box() -> Result<(), OwlError> {
        let image = gray(40, 30);
        let detections =
            DetectionSet::from(vec![detection(10.0, 5.0, 20.0, 15.0, Label::Index(0))]);
        let out = Annotator::new()?
            .with_labels(false)
            .with_thickness(1)
            .annotate(&image, &detections)?;

        let pixel = |img: &Image<u8, 3>, x: usize, y: usize| {
            let i = (y * img.width() + x) * 3;
            [img.as_slice()[i], img.as_slice()[i + 1], img.as_slice()[i + 2]]
        };
        assert_eq!(pixel(&out, 10, 5), PALETTE[0]);
        assert_eq!(pixel(&out, 20, 15), PALETTE[0]);
        // interior and exterior untouched
        assert_eq!(pixel(&out, 15, 10), [40, 40, 40]);
        for y in 0..30 {
            for x in 0..40 {
                let outside = x < 10 || x > 20 || y < 5 || y > 15;
                if outside {
                    assert_eq!(pixel(&out, x, y), [40, 40, 40], "pixel {x},{y} changed");
                }
            }
        }
        Ok(())
    }

    #[test]
    fn test_labels_only_touch_outline_and_tag() -> Result<(), OwlError> {
        let (width, height) = (160, 64);
        let image = gray(width, height);
        let bbox = detection(40.0, 30.0, 80.0, 50.0, Label::Index(0));
        let rect = pixel_rect(&bbox.bbox, width as u32, height as u32).expect("visible box");
        let detections = DetectionSet::from(vec![bbox]);

        for placement in [LabelPlacement::Centered, LabelPlacement::Above] {
            let annotator = Annotator::new()?.with_placement(placement);
            let out = annotator.annotate(&image, &detections)?;
            let tag = annotator.tag_rect(rect, "Object_1: 0.90");

            let contains = |r: &Rect, x: i32, y: i32| {
                x >= r.left() && x <= r.right() && y >= r.top() && y <= r.bottom()
            };
            let on_outline = |x: i32, y: i32| {
                let edge = (x - rect.left())
                    .min(rect.right() - x)
                    .min(y - rect.top())
                    .min(rect.bottom() - y);
                contains(&rect, x, y) && edge < annotator.thickness as i32
            };

            let mut tag_pixels = 0;
            for y in 0..height {
                for x in 0..width {
                    let i = (y * width + x) * 3;
                    let value = &out.as_slice()[i..i + 3];
                    let (xi, yi) = (x as i32, y as i32);
                    if contains(&tag, xi, yi) {
                        tag_pixels += 1;
                        assert_ne!(value, [40, 40, 40], "tag pixel {x},{y} not drawn");
                    } else if !on_outline(xi, yi) {
                        assert_eq!(value, [40, 40, 40], "{placement:?}: pixel {x},{y} changed");
                    }
                }
            }
            assert!(tag_pixels > 0, "{placement:?}: tag is off the image");
        }
        Ok(())
    }

    #[test]
    fn test_labels_stay_inside_image() -> Result<(), OwlError> {
        let image = gray(64, 48);
        let detections = DetectionSet::from(vec![
            detection(0.0, 0.0, 63.0, 47.0, Label::Text("a very long label".into())),
            detection(50.0, 40.0, 70.0, 60.0, Label::Index(1)),
        ]);
        let annotator = Annotator::new()?.with_placement(LabelPlacement::Above);
        let out = annotator.annotate(&image, &detections)?;
        assert_eq!((out.width(), out.height()), (64, 48));
        assert_ne!(out.as_slice(), image.as_slice());
        // input left as it was
        assert_eq!(detections.len(), 2);
        assert!(image.as_slice().iter().all(|&v| v == 40));
        Ok(())
    }

    #[test]
    fn test_pixel_rect() {
        let bbox = detection(-4.0, 2.2, 12.6, 8.0, Label::Index(0)).bbox;
        let rect = pixel_rect(&bbox, 10, 10).expect("visible box");
        assert_eq!((rect.left(), rect.top()), (0, 2));
        assert_eq!((rect.width(), rect.height()), (10, 7));

        let inverted = detection(5.0, 5.0, 1.0, 1.0, Label::Index(0)).bbox;
        assert!(pixel_rect(&inverted, 10, 10).is_none());
    }
}
