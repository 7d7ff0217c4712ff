use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Bounding box for a detected face, in frame pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    /// Detector confidence in [0, 1]. Extractors that do not report one leave it at 1.
    #[serde(default = "default_confidence")]
    pub confidence: f32,
}

fn default_confidence() -> f32 {
    1.0
}

/// Face embedding vector (128-dimensional for the default extractor).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Embedding {
    pub values: Vec<f32>,
}

/// Why an embedding was rejected by shape validation.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ShapeError {
    #[error("embedding is empty")]
    Empty,
    #[error("embedding has a non-finite value at index {index}")]
    NonFinite { index: usize },
    #[error("expected {expected}-dim embedding, got {actual}")]
    Dimension { expected: usize, actual: usize },
}

impl Embedding {
    pub fn new(values: Vec<f32>) -> Self {
        Self { values }
    }

    pub fn dimension(&self) -> usize {
        self.values.len()
    }

    /// Compute Euclidean distance between two embeddings.
    ///
    /// Callers must ensure both embeddings share a dimension; extra
    /// components on the longer side are ignored.
    pub fn euclidean_distance(&self, other: &Embedding) -> f32 {
        self.values
            .iter()
            .zip(other.values.iter())
            .map(|(a, b)| (a - b).powi(2))
            .sum::<f32>()
            .sqrt()
    }

    /// Validate that the vector is non-empty, finite, and (when given) of
    /// the expected dimension.
    pub fn check_shape(&self, expected_dim: Option<usize>) -> Result<(), ShapeError> {
        if self.values.is_empty() {
            return Err(ShapeError::Empty);
        }
        if let Some(index) = self.values.iter().position(|v| !v.is_finite()) {
            return Err(ShapeError::NonFinite { index });
        }
        match expected_dim {
            Some(expected) if expected != self.values.len() => Err(ShapeError::Dimension {
                expected,
                actual: self.values.len(),
            }),
            _ => Ok(()),
        }
    }
}

impl From<Vec<f32>> for Embedding {
    fn from(values: Vec<f32>) -> Self {
        Self { values }
    }
}

/// One face as reported by the external embedding extractor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectedFace {
    pub bbox: BoundingBox,
    pub embedding: Embedding,
}

/// A registered identity: one embedding and roll number per label.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdentityRecord {
    pub label: String,
    pub roll_number: String,
    pub embedding: Embedding,
}

/// Per-face display data produced by a recognition session.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Annotation {
    pub bbox: BoundingBox,
    /// Text to draw next to the box.
    pub text: String,
    pub known: bool,
    /// Matched label, if any.
    pub label: Option<String>,
    /// Distance to the matched record, if any.
    pub distance: Option<f32>,
}

/// Text shown for faces that match no registered identity.
pub const UNKNOWN_FACE_TEXT: &str = "Unknown Face";

impl Annotation {
    /// Annotation for a recognized identity.
    ///
    /// The roll number is appended as `"<name> - <roll>"` only when
    /// `show_roll_number` is set.
    pub fn known(
        bbox: BoundingBox,
        record: &IdentityRecord,
        distance: f32,
        show_roll_number: bool,
    ) -> Self {
        let text = if show_roll_number {
            format!("{} - {}", record.label, record.roll_number)
        } else {
            record.label.clone()
        };
        Self {
            bbox,
            text,
            known: true,
            label: Some(record.label.clone()),
            distance: Some(distance),
        }
    }

    pub fn unknown(bbox: BoundingBox) -> Self {
        Self {
            bbox,
            text: UNKNOWN_FACE_TEXT.to_string(),
            known: false,
            label: None,
            distance: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bbox() -> BoundingBox {
        BoundingBox { x: 10.0, y: 20.0, width: 50.0, height: 60.0, confidence: 0.9 }
    }

    #[test]
    fn test_euclidean_distance_pythagorean() {
        let a = Embedding::new(vec![0.0, 0.0]);
        let b = Embedding::new(vec![3.0, 4.0]);
        assert_eq!(a.euclidean_distance(&b), 5.0);
        assert_eq!(b.euclidean_distance(&a), 5.0);
    }

    #[test]
    fn test_euclidean_distance_identical() {
        let a = Embedding::new(vec![0.25, -0.5, 1.0]);
        assert_eq!(a.euclidean_distance(&a.clone()), 0.0);
    }

    #[test]
    fn test_check_shape_rejects_empty() {
        assert_eq!(Embedding::new(vec![]).check_shape(None), Err(ShapeError::Empty));
    }

    #[test]
    fn test_check_shape_rejects_nan() {
        let e = Embedding::new(vec![0.1, f32::NAN, 0.2]);
        assert_eq!(e.check_shape(None), Err(ShapeError::NonFinite { index: 1 }));
    }

    #[test]
    fn test_check_shape_dimension() {
        let e = Embedding::new(vec![0.1, 0.2, 0.3]);
        assert!(e.check_shape(Some(3)).is_ok());
        assert!(e.check_shape(None).is_ok());
        assert_eq!(
            e.check_shape(Some(128)),
            Err(ShapeError::Dimension { expected: 128, actual: 3 })
        );
    }

    #[test]
    fn test_annotation_text_with_roll_number() {
        let record = IdentityRecord {
            label: "Alice".into(),
            roll_number: "R1".into(),
            embedding: Embedding::new(vec![0.0]),
        };
        let shown = Annotation::known(bbox(), &record, 0.1, true);
        assert_eq!(shown.text, "Alice - R1");
        assert!(shown.known);

        let hidden = Annotation::known(bbox(), &record, 0.1, false);
        assert_eq!(hidden.text, "Alice");
        assert_eq!(hidden.label.as_deref(), Some("Alice"));
    }

    #[test]
    fn test_annotation_unknown() {
        let a = Annotation::unknown(bbox());
        assert_eq!(a.text, UNKNOWN_FACE_TEXT);
        assert!(!a.known);
        assert!(a.label.is_none());
        assert!(a.distance.is_none());
    }

    #[test]
    fn test_detected_face_json_defaults_confidence() {
        let json = r#"{"bbox":{"x":1,"y":2,"width":3,"height":4},"embedding":[0.5,0.25]}"#;
        let face: DetectedFace = serde_json::from_str(json).unwrap();
        assert_eq!(face.bbox.confidence, 1.0);
        assert_eq!(face.embedding.values, vec![0.5, 0.25]);
    }
}
