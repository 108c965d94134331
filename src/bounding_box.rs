use serde::Serialize;

/// Bounding box struct for detection results.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct BoundingBox {
    /// Minimum x coordinate of the bounding box.
    pub xmin: f32,
    /// Minimum y coordinate of the bounding box.
    pub ymin: f32,
    /// Maximum x coordinate of the bounding box.
    pub xmax: f32,
    /// Maximum y coordinate of the bounding box.
    pub ymax: f32,
    /// Confidence score of the bounding box.
    pub confidence: f32,
    /// Class index of the bounding box.
    pub class: u32,
}

impl BoundingBox {
    /// Create a bounding box from its center and size.
    pub fn from_center(cx: f32, cy: f32, w: f32, h: f32, confidence: f32, class: u32) -> Self {
        Self {
            xmin: cx - w / 2.0,
            ymin: cy - h / 2.0,
            xmax: cx + w / 2.0,
            ymax: cy + h / 2.0,
            confidence,
            class,
        }
    }

    /// Area of the bounding box, zero for degenerate boxes.
    pub fn area(&self) -> f32 {
        (self.xmax - self.xmin).max(0.) * (self.ymax - self.ymin).max(0.)
    }

    /// Scale the coordinates independently along each axis.
    pub fn scaled(&self, sx: f32, sy: f32) -> Self {
        Self {
            xmin: self.xmin * sx,
            ymin: self.ymin * sy,
            xmax: self.xmax * sx,
            ymax: self.ymax * sy,
            ..*self
        }
    }

    /// Clamp the coordinates into the pixel grid of a `width` x `height` image.
    ///
    /// Each corner is clamped independently, so an ordered box stays ordered.
    pub fn clamped(&self, width: usize, height: usize) -> Self {
        let max_x = width.saturating_sub(1) as f32;
        let max_y = height.saturating_sub(1) as f32;
        Self {
            xmin: self.xmin.clamp(0., max_x),
            ymin: self.ymin.clamp(0., max_y),
            xmax: self.xmax.clamp(0., max_x),
            ymax: self.ymax.clamp(0., max_y),
            ..*self
        }
    }
}

/// Intersection over union of two bounding boxes.
pub fn iou(b1: &BoundingBox, b2: &BoundingBox) -> f32 {
    let i_xmin = b1.xmin.max(b2.xmin);
    let i_xmax = b1.xmax.min(b2.xmax);
    let i_ymin = b1.ymin.max(b2.ymin);
    let i_ymax = b1.ymax.min(b2.ymax);
    let i_area = (i_xmax - i_xmin).max(0.) * (i_ymax - i_ymin).max(0.);
    let union = b1.area() + b2.area() - i_area;
    if union <= 0. { 0. } else { i_area / union }
}

/// Generalized intersection over union of two bounding boxes.
///
/// Unlike [`iou`] it stays informative for disjoint boxes, ranging in `[-1, 1]`.
pub fn generalized_iou(b1: &BoundingBox, b2: &BoundingBox) -> f32 {
    let iou = iou(b1, b2);
    let hull = BoundingBox {
        xmin: b1.xmin.min(b2.xmin),
        ymin: b1.ymin.min(b2.ymin),
        xmax: b1.xmax.max(b2.xmax),
        ymax: b1.ymax.max(b2.ymax),
        ..*b1
    };
    let hull_area = hull.area();
    if hull_area <= 0. {
        return iou;
    }
    let i_area = (b1.xmax.min(b2.xmax) - b1.xmin.max(b2.xmin)).max(0.)
        * (b1.ymax.min(b2.ymax) - b1.ymin.max(b2.ymin)).max(0.);
    let union = b1.area() + b2.area() - i_area;
    iou - (hull_area - union) / hull_area
}

/// Non-maximum suppression for bounding boxes.
///
/// This function performs non-maximum suppression on a list of bounding boxes.
/// It removes overlapping boxes with a IoU greater than the threshold.
///
/// # Arguments
///
/// * `bboxes` - A mutable reference to a vector of bounding boxes, one vector per class.
/// * `threshold` - The IoU threshold for suppression.
pub fn non_maximum_suppression(bboxes: &mut [Vec<BoundingBox>], threshold: f32) {
    for bboxes_for_class in bboxes.iter_mut() {
        bboxes_for_class.sort_by(|b1, b2| b2.confidence.total_cmp(&b1.confidence));
        let mut current_index = 0;
        for index in 0..bboxes_for_class.len() {
            let mut drop = false;
            for prev_index in 0..current_index {
                let iou = iou(&bboxes_for_class[prev_index], &bboxes_for_class[index]);
                if iou > threshold {
                    drop = true;
                    break;
                }
            }
            if !drop {
                bboxes_for_class.swap(current_index, index);
                current_index += 1;
            }
        }
        bboxes_for_class.truncate(current_index);
    }
}

/// Class agnostic non-maximum suppression.
///
/// Boxes are visited by descending confidence; each kept box removes every remaining
/// box whose IoU with it is strictly greater than `threshold`.
///
/// Returns the kept boxes, best first.
pub fn non_maximum_suppression_fast(boxes: &[BoundingBox], threshold: f32) -> Vec<BoundingBox> {
    if boxes.is_empty() {
        return vec![];
    }

    // sort indices by confidence (descending)
    let mut idxs: Vec<usize> = (0..boxes.len()).collect();
    idxs.sort_by(|&a, &b| boxes[b].confidence.total_cmp(&boxes[a].confidence));

    let mut result = vec![];
    let mut suppressed = vec![false; boxes.len()];

    for (pos, &best) in idxs.iter().enumerate() {
        if suppressed[best] {
            continue;
        }
        result.push(boxes[best]);

        for &other in &idxs[pos + 1..] {
            if !suppressed[other] && iou(&boxes[best], &boxes[other]) > threshold {
                suppressed[other] = true;
            }
        }
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bbox(xmin: f32, ymin: f32, xmax: f32, ymax: f32, confidence: f32) -> BoundingBox {
        BoundingBox {
            xmin,
            ymin,
            xmax,
            ymax,
            confidence,
            class: 0,
        }
    }

    #[test]
    fn test_iou() {
        let a = bbox(0.0, 0.0, 2.0, 2.0, 1.0);
        let b = bbox(1.0, 0.0, 3.0, 2.0, 1.0);
        assert!((iou(&a, &b) - 1.0 / 3.0).abs() < 1e-6);
        assert_eq!(iou(&a, &a), 1.0);

        let touching = bbox(2.0, 0.0, 4.0, 2.0, 1.0);
        assert_eq!(iou(&a, &touching), 0.0);

        let empty = bbox(1.0, 1.0, 1.0, 1.0, 1.0);
        assert_eq!(iou(&empty, &empty), 0.0);
    }

    #[test]
    fn test_generalized_iou() {
        let a = bbox(0.0, 0.0, 1.0, 1.0, 1.0);
        let far = bbox(3.0, 0.0, 4.0, 1.0, 1.0);
        let near = bbox(1.5, 0.0, 2.5, 1.0, 1.0);
        let g_far = generalized_iou(&a, &far);
        let g_near = generalized_iou(&a, &near);
        assert!(g_far < 0.0);
        assert!(g_near > g_far);
        assert!((generalized_iou(&a, &a) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_from_center_and_clamp() {
        let b = BoundingBox::from_center(0.5, 0.5, 0.5, 1.0, 0.9, 2);
        assert_eq!((b.xmin, b.ymin, b.xmax, b.ymax), (0.25, 0.0, 0.75, 1.0));

        let b = b.scaled(200.0, 100.0);
        assert_eq!((b.xmin, b.xmax, b.ymax), (50.0, 150.0, 100.0));

        let b = b.clamped(120, 80);
        assert_eq!((b.xmin, b.ymin, b.xmax, b.ymax), (50.0, 0.0, 119.0, 79.0));
        assert_eq!(b.class, 2);
    }

    #[test]
    fn test_non_maximum_suppression() {
        let mut bboxes = vec![vec![bbox(0.0, 0.0, 1.0, 1.0, 0.5), bbox(0.0, 0.0, 1.0, 1.0, 0.5)]];

        non_maximum_suppression(&mut bboxes, 0.5);

        assert_eq!(bboxes[0].len(), 1);
        assert_eq!(bboxes[0][0].confidence, 0.5);
    }

    #[test]
    fn test_non_maximum_suppression_fast() {
        let boxes = vec![bbox(0.0, 0.0, 1.0, 1.0, 0.5), bbox(0.0, 0.0, 1.0, 1.0, 0.5)];

        let picked = non_maximum_suppression_fast(&boxes, 0.5);

        assert_eq!(picked.len(), 1);
        assert_eq!(picked[0].confidence, 0.5);
    }

    #[test]
    fn test_nms_zero_threshold_keeps_best_of_overlapping_set() {
        let boxes = vec![
            bbox(0.0, 0.0, 10.0, 10.0, 0.6),
            bbox(9.0, 9.0, 20.0, 20.0, 0.7),
            bbox(5.0, 5.0, 15.0, 15.0, 0.9),
            // shares only a corner with the second box
            bbox(20.0, 0.0, 30.0, 9.0, 0.4),
        ];

        let picked = non_maximum_suppression_fast(&boxes, 0.0);

        assert_eq!(picked.len(), 2);
        assert_eq!(picked[0].confidence, 0.9);
        assert_eq!(picked[1].confidence, 0.4);
    }

    #[test]
    fn test_nms_keeps_disjoint_boxes() {
        let boxes = vec![
            bbox(0.0, 0.0, 1.0, 1.0, 0.3),
            bbox(5.0, 5.0, 6.0, 6.0, 0.8),
            bbox(10.0, 10.0, 11.0, 11.0, f32::NAN),
        ];
        let picked = non_maximum_suppression_fast(&boxes, 0.5);
        assert!(picked.iter().any(|b| b.confidence == 0.8));
        assert!(picked.iter().any(|b| b.confidence == 0.3));
        assert_eq!(picked.len(), 3);
    }
}
