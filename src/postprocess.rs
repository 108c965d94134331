use crate::{
    bounding_box::{
        BoundingBox, generalized_iou, iou, non_maximum_suppression, non_maximum_suppression_fast,
    },
    detection::{Detection, DetectionSet, Label},
    error::OwlError,
};

/// Raw per-patch outputs of the detection heads for one image.
#[derive(Debug, Clone, Default)]
pub struct RawPredictions {
    /// Class logits, one row per patch and one column per query.
    pub logits: Vec<Vec<f32>>,
    /// Predicted boxes as normalized `[cx, cy, w, h]`, one per patch.
    pub boxes: Vec<[f32; 4]>,
}

/// Maps normalized model boxes back onto the original image.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoxScale {
    /// Multiplier for normalized x coordinates.
    pub sx: f32,
    /// Multiplier for normalized y coordinates.
    pub sy: f32,
    /// Width of the original image.
    pub width: usize,
    /// Height of the original image.
    pub height: usize,
}

impl BoxScale {
    /// The model input was a plain resize of the image.
    pub fn stretched(width: usize, height: usize) -> Self {
        Self {
            sx: width as f32,
            sy: height as f32,
            width,
            height,
        }
    }

    /// The image was padded to a square at the bottom/right before resizing.
    pub fn padded_square(width: usize, height: usize) -> Self {
        let side = width.max(height) as f32;
        Self {
            sx: side,
            sy: side,
            width,
            height,
        }
    }

    /// Convert a normalized `[cx, cy, w, h]` box to clamped pixel corners.
    pub fn apply(&self, cxcywh: &[f32; 4], confidence: f32, class: u32) -> BoundingBox {
        let [cx, cy, w, h] = *cxcywh;
        BoundingBox::from_center(cx, cy, w, h, confidence, class)
            .scaled(self.sx, self.sy)
            .clamped(self.width, self.height)
    }
}

fn sigmoid(x: f32) -> f32 {
    1. / (1. + (-x).exp())
}

/// Best query and its probability for a row of logits.
fn best_query(row: &[f32]) -> Option<(usize, f32)> {
    row.iter()
        .enumerate()
        .max_by(|(_, a), (_, b)| a.total_cmp(b))
        .map(|(i, &logit)| (i, sigmoid(logit)))
}

fn check_shapes(raw: &RawPredictions, num_queries: usize) -> Result<(), OwlError> {
    if raw.logits.len() != raw.boxes.len() {
        return Err(OwlError::InferenceError(format!(
            "{} logit rows for {} boxes",
            raw.logits.len(),
            raw.boxes.len()
        )));
    }
    if let Some(row) = raw.logits.iter().find(|row| row.len() != num_queries) {
        return Err(OwlError::InferenceError(format!(
            "expected {num_queries} logits per patch, got {}",
            row.len()
        )));
    }
    Ok(())
}

/// Turn text-conditioned predictions into detections.
///
/// Each patch is scored by its best matching query; patches scoring at least
/// `score_threshold` are kept and labelled with that query. When
/// `nms_threshold` is set, overlapping boxes of the same query are suppressed.
pub fn postprocess_text(
    raw: &RawPredictions,
    queries: &[String],
    score_threshold: f32,
    nms_threshold: Option<f32>,
    scale: &BoxScale,
) -> Result<DetectionSet, OwlError> {
    check_shapes(raw, queries.len())?;

    let mut bboxes: Vec<BoundingBox> = Vec::new();
    for (row, cxcywh) in raw.logits.iter().zip(raw.boxes.iter()) {
        let Some((query, score)) = best_query(row) else {
            continue;
        };
        if score >= score_threshold {
            bboxes.push(scale.apply(cxcywh, score, query as u32));
        }
    }

    if let Some(threshold) = nms_threshold {
        let mut per_query: Vec<Vec<BoundingBox>> = vec![Vec::new(); queries.len()];
        for bbox in bboxes.drain(..) {
            per_query[bbox.class as usize].push(bbox);
        }
        non_maximum_suppression(&mut per_query, threshold);
        bboxes = per_query.into_iter().flatten().collect();
    }

    let detections = bboxes
        .into_iter()
        .map(|bbox| Detection {
            label: Label::Text(queries[bbox.class as usize].clone()),
            bbox,
        })
        .collect::<Vec<_>>();

    Ok(detections.into())
}

/// Turn image-guided predictions into detections.
///
/// Boxes scoring at least `score_threshold` go through class agnostic
/// non-maximum suppression at `nms_threshold`. Labels are the opaque query index.
pub fn postprocess_image_guided(
    raw: &RawPredictions,
    score_threshold: f32,
    nms_threshold: f32,
    scale: &BoxScale,
) -> Result<DetectionSet, OwlError> {
    let num_queries = raw.logits.first().map_or(0, Vec::len);
    check_shapes(raw, num_queries)?;

    let candidates: Vec<BoundingBox> = raw
        .logits
        .iter()
        .zip(raw.boxes.iter())
        .filter_map(|(row, cxcywh)| {
            let (query, score) = best_query(row)?;
            (score >= score_threshold).then(|| scale.apply(cxcywh, score, query as u32))
        })
        .collect();

    let detections = non_maximum_suppression_fast(&candidates, nms_threshold)
        .into_iter()
        .map(|bbox| Detection {
            label: Label::Index(bbox.class),
            bbox,
        })
        .collect::<Vec<_>>();

    Ok(detections.into())
}

/// Pick the predicted box of a query image that best represents the exemplar.
///
/// `boxes` are the normalized corner boxes predicted on the query image and
/// `mean_similarity` is, per box, the dot product between its class embedding and
/// the mean class embedding of the image. Boxes whose IoU with the whole image is
/// within 80% of the best are candidates (generalized IoU is used when nothing
/// overlaps); the candidate least similar to the mean embedding wins.
pub fn select_query_box(boxes: &[BoundingBox], mean_similarity: &[f32]) -> Option<usize> {
    if boxes.is_empty() || boxes.len() != mean_similarity.len() {
        return None;
    }

    let whole = BoundingBox {
        xmin: 0.,
        ymin: 0.,
        xmax: 1.,
        ymax: 1.,
        confidence: 1.,
        class: 0,
    };
    let mut ious: Vec<f32> = boxes.iter().map(|b| iou(&whole, b)).collect();
    if ious.iter().all(|&v| v == 0.) {
        ious = boxes.iter().map(|b| generalized_iou(&whole, b)).collect();
    }

    let best = ious.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    // generalized IoU can be negative, keep the window below the best score
    let threshold = best - 0.2 * best.abs();

    ious.iter()
        .enumerate()
        .filter(|&(_, &v)| v >= threshold)
        .min_by(|(a, _), (b, _)| mean_similarity[*a].total_cmp(&mean_similarity[*b]))
        .map(|(i, _)| i)
}
