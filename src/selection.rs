use crate::crop::CropRect;

/// Smallest accepted selection span, in pixels, along each axis.
pub const MIN_SPAN: i64 = 5;

/// Rectangle selection driven by press and release events over an image.
///
/// The state is owned by the caller and handed to whatever collects the
/// pointer events, a terminal prompt or a GUI.
#[derive(Debug, Clone, PartialEq)]
pub struct SelectionState {
    width: usize,
    height: usize,
    anchor: Option<(i64, i64)>,
    rect: Option<CropRect>,
}

impl SelectionState {
    /// Empty selection over a `width` x `height` image.
    pub fn new(width: usize, height: usize) -> Self {
        Self {
            width,
            height,
            anchor: None,
            rect: None,
        }
    }

    /// Width and height of the image being selected on.
    pub fn image_size(&self) -> (usize, usize) {
        (self.width, self.height)
    }

    /// Start a selection at `(x, y)`.
    pub fn press(&mut self, x: f32, y: f32) {
        self.anchor = Some((x.round() as i64, y.round() as i64));
    }

    /// Finish the selection at `(x, y)`.
    ///
    /// Spans below [`MIN_SPAN`] are ignored and the previous selection, if any,
    /// is kept. Returns the current selection.
    pub fn release(&mut self, x: f32, y: f32) -> Option<CropRect> {
        let Some((x1, y1)) = self.anchor.take() else {
            return self.rect;
        };
        let (x2, y2) = (x.round() as i64, y.round() as i64);
        if (x2 - x1).abs() < MIN_SPAN || (y2 - y1).abs() < MIN_SPAN {
            tracing::debug!("selection too small, ignored");
            return self.rect;
        }

        let left = x1.min(x2).max(0);
        let top = y1.min(y2).max(0);
        let right = x1.max(x2).min(self.width as i64);
        let bottom = y1.max(y2).min(self.height as i64);
        if right <= left || bottom <= top {
            tracing::debug!("selection outside the image, ignored");
            return self.rect;
        }

        self.rect = Some(CropRect {
            x: left,
            y: top,
            width: right - left,
            height: bottom - top,
        });
        self.rect
    }

    /// Drop the current selection.
    pub fn reset(&mut self) {
        self.anchor = None;
        self.rect = None;
    }

    /// The last accepted selection.
    pub fn rect(&self) -> Option<CropRect> {
        self.rect
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_selection_orders_and_clamps_corners() {
        let mut state = SelectionState::new(100, 80);
        state.press(120.2, 90.0);
        let rect = state.release(40.6, 10.4);
        assert_eq!(
            rect,
            Some(CropRect {
                x: 41,
                y: 10,
                width: 59,
                height: 70
            })
        );
        assert_eq!(state.rect(), rect);
        assert_eq!(state.image_size(), (100, 80));
    }

    #[test]
    fn test_small_selection_is_ignored() {
        let mut state = SelectionState::new(100, 100);
        assert_eq!(state.release(10.0, 10.0), None);

        state.press(10.0, 10.0);
        state.release(50.0, 50.0);
        let kept = state.rect();
        assert!(kept.is_some());

        state.press(10.0, 10.0);
        assert_eq!(state.release(13.0, 60.0), kept);

        state.reset();
        assert_eq!(state.rect(), None);
    }

    #[test]
    fn test_selection_outside_image() {
        let mut state = SelectionState::new(20, 20);
        state.press(30.0, 30.0);
        assert_eq!(state.release(60.0, 60.0), None);
    }
}
