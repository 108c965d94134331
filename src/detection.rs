use std::fmt;

use kornia_image::Image;
use serde::Serialize;

use crate::{bounding_box::BoundingBox, error::OwlError};

/// Label attached to a detection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum Label {
    /// The text query that produced the detection.
    Text(String),
    /// Opaque query index, used by image-guided detection.
    Index(u32),
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Label::Text(text) => write!(f, "{text}"),
            Label::Index(index) => write!(f, "{index}"),
        }
    }
}

/// A single detection in pixel coordinates of the original image.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Detection {
    /// Box corners and confidence.
    pub bbox: BoundingBox,
    /// What the box was matched against.
    pub label: Label,
}

impl Detection {
    /// Confidence score in `[0, 1]`.
    pub fn score(&self) -> f32 {
        self.bbox.confidence
    }
}

/// Detections produced by one inference call.
///
/// The order is the order post-processing produced; it is not guaranteed to be
/// sorted by confidence.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DetectionSet {
    detections: Vec<Detection>,
}

impl DetectionSet {
    /// Number of detections.
    pub fn len(&self) -> usize {
        self.detections.len()
    }

    /// Whether nothing was detected.
    pub fn is_empty(&self) -> bool {
        self.detections.is_empty()
    }

    /// Iterate over the detections.
    pub fn iter(&self) -> std::slice::Iter<'_, Detection> {
        self.detections.iter()
    }

    /// The detections as a slice.
    pub fn as_slice(&self) -> &[Detection] {
        &self.detections
    }

    /// Labels suitable for display.
    ///
    /// Text labels are used as is; index labels become `Object_N` with `N` the
    /// 1-based position of the detection.
    pub fn display_labels(&self) -> Vec<String> {
        self.detections
            .iter()
            .enumerate()
            .map(|(i, detection)| match &detection.label {
                Label::Text(text) => text.clone(),
                Label::Index(_) => format!("Object_{}", i + 1),
            })
            .collect()
    }

    /// Human readable listing of the detections.
    pub fn summary(&self) -> String {
        if self.is_empty() {
            return "No detections found".to_string();
        }
        let mut out = format!("Detected {} objects:\n", self.len());
        for (i, (detection, label)) in self.iter().zip(self.display_labels()).enumerate() {
            out.push_str(&format!(
                "{}. {}: {:.3} confidence\n",
                i + 1,
                label,
                detection.score()
            ));
        }
        out
    }
}

impl From<Vec<Detection>> for DetectionSet {
    fn from(detections: Vec<Detection>) -> Self {
        Self { detections }
    }
}

impl IntoIterator for DetectionSet {
    type Item = Detection;
    type IntoIter = std::vec::IntoIter<Detection>;

    fn into_iter(self) -> Self::IntoIter {
        self.detections.into_iter()
    }
}

impl<'a> IntoIterator for &'a DetectionSet {
    type Item = &'a Detection;
    type IntoIter = std::slice::Iter<'a, Detection>;

    fn into_iter(self) -> Self::IntoIter {
        self.detections.iter()
    }
}

/// What to look for: free text phrases or an exemplar crop, never both.
pub enum QuerySpec {
    /// Non-empty list of non-blank phrases.
    Text(Vec<String>),
    /// Tight crop around a single exemplar object.
    Image(Image<u8, 3>),
}

impl QuerySpec {
    /// Build a text query from a comma separated string.
    pub fn text(raw: &str) -> Result<Self, OwlError> {
        Ok(QuerySpec::Text(parse_queries(raw)?))
    }
}

/// Split a comma separated list of queries, dropping blank items.
pub fn parse_queries(raw: &str) -> Result<Vec<String>, OwlError> {
    let queries: Vec<String> = raw
        .split(',')
        .map(str::trim)
        .filter(|q| !q.is_empty())
        .map(String::from)
        .collect();

    if queries.is_empty() {
        return Err(OwlError::InputError(
            "at least one non-empty query is required".to_string(),
        ));
    }
    Ok(queries)
}

/// Check that a list of queries is non-empty and has no blank entries.
pub(crate) fn validate_queries(queries: &[String]) -> Result<(), OwlError> {
    if queries.is_empty() {
        return Err(OwlError::InputError("empty query list".to_string()));
    }
    if let Some(pos) = queries.iter().position(|q| q.trim().is_empty()) {
        return Err(OwlError::InputError(format!("query {pos} is blank")));
    }
    Ok(())
}
