//! Nearest-neighbor identity matching with a distance gate.

use crate::gallery::Gallery;
use crate::types::{Embedding, IdentityRecord};

/// Default acceptance threshold for 128-d face embeddings.
pub const DEFAULT_MATCH_THRESHOLD: f32 = 0.6;

/// Result of matching a probe embedding against a gallery.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchResult {
    pub matched: bool,
    /// Distance to the nearest comparable candidate, matched or not.
    pub distance: Option<f32>,
    /// Label of the matched record (if any).
    pub label: Option<String>,
}

impl MatchResult {
    fn no_match(distance: Option<f32>) -> Self {
        Self {
            matched: false,
            distance,
            label: None,
        }
    }
}

/// Strategy for comparing a probe embedding against a gallery of registered faces.
pub trait Matcher {
    fn compare(&self, probe: &Embedding, gallery: &Gallery) -> MatchResult;

    /// Label of the accepted identity, or `None` for an unknown face.
    fn identify(&self, probe: &Embedding, gallery: &Gallery) -> Option<String> {
        self.compare(probe, gallery).label
    }
}

/// Euclidean-distance matcher with an inclusive threshold.
///
/// A candidate matches when `distance <= threshold`; the nearest match wins.
///
/// Tie-break (lowest label wins): the gallery iterates in ascending label
/// order and only a strictly smaller distance displaces the current best,
/// so among equally distant candidates the smallest label is chosen.
/// Candidates whose dimension differs from the probe are never matched.
#[derive(Debug, Clone, Copy)]
pub struct EuclideanMatcher {
    pub threshold: f32,
}

impl EuclideanMatcher {
    pub fn new(threshold: f32) -> Self {
        Self { threshold }
    }
}

impl Default for EuclideanMatcher {
    fn default() -> Self {
        Self::new(DEFAULT_MATCH_THRESHOLD)
    }
}

impl Matcher for EuclideanMatcher {
    fn compare(&self, probe: &Embedding, gallery: &Gallery) -> MatchResult {
        let mut best: Option<(&IdentityRecord, f32)> = None;

        for record in gallery.iter() {
            if record.embedding.dimension() != probe.dimension() {
                continue;
            }
            let distance = probe.euclidean_distance(&record.embedding);
            match best {
                Some((_, best_distance)) if distance >= best_distance => {}
                _ => best = Some((record, distance)),
            }
        }

        match best {
            Some((record, distance)) if distance <= self.threshold => {
                tracing::debug!(label = %record.label, distance, "probe matched");
                MatchResult {
                    matched: true,
                    distance: Some(distance),
                    label: Some(record.label.clone()),
                }
            }
            Some((_, distance)) => {
                tracing::debug!(
                    distance,
                    threshold = self.threshold,
                    "nearest candidate above threshold"
                );
                MatchResult::no_match(Some(distance))
            }
            None => MatchResult::no_match(None),
        }
    }
}
