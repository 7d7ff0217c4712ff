//! In-memory identity mapping shared by the store, matcher and recognizer.

use crate::store::{unit_name, StoreError};
use crate::types::{Embedding, IdentityRecord};
use std::collections::BTreeMap;

/// Registered identities keyed by label.
///
/// Iteration is in ascending label order. The matcher relies on this order
/// for its tie-break, so it must stay a sorted map.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Gallery {
    records: BTreeMap<String, IdentityRecord>,
    /// Dimension enforced on every embedding. When `None` the first
    /// record present fixes it.
    configured_dim: Option<usize>,
}

impl Gallery {
    pub fn new() -> Self {
        Self::default()
    }

    /// Gallery that only accepts embeddings of `dim` components.
    pub fn with_dimension(dim: usize) -> Self {
        Self {
            records: BTreeMap::new(),
            configured_dim: Some(dim),
        }
    }

    /// Dimension every embedding must have, if known yet.
    pub fn dimension(&self) -> Option<usize> {
        self.configured_dim
            .or_else(|| self.records.values().next().map(|r| r.embedding.dimension()))
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn get(&self, label: &str) -> Option<&IdentityRecord> {
        self.records.get(label)
    }

    pub fn contains(&self, label: &str) -> bool {
        self.records.contains_key(label)
    }

    /// Records in ascending label order.
    pub fn iter(&self) -> impl Iterator<Item = &IdentityRecord> {
        self.records.values()
    }

    pub fn labels(&self) -> impl Iterator<Item = &str> {
        self.records.keys().map(String::as_str)
    }

    /// Insert or replace the record for `label`.
    ///
    /// Returns the replaced record. Rejects unsafe labels, labels whose unit
    /// name collides with a different registered label, empty roll numbers
    /// and badly shaped embeddings. On error the gallery is unchanged.
    pub fn upsert(
        &mut self,
        label: &str,
        embedding: Embedding,
        roll_number: &str,
    ) -> Result<Option<IdentityRecord>, StoreError> {
        let unit = unit_name(label)?;
        if let Some(other) = self.records.keys().find(|existing| {
            existing.as_str() != label
                && unit_name(existing).ok().as_deref() == Some(unit.as_str())
        }) {
            return Err(StoreError::LabelConflict {
                label: label.to_string(),
                reason: format!("unit name `{unit}` already used by `{other}`"),
            });
        }

        let roll_number = roll_number.trim();
        if roll_number.is_empty() {
            return Err(StoreError::EmptyRollNumber);
        }

        // A lone record being replaced does not pin the dimension.
        let expected = match self.configured_dim {
            Some(dim) => Some(dim),
            None if self.records.len() == 1 && self.records.contains_key(label) => None,
            None => self.dimension(),
        };
        embedding.check_shape(expected).map_err(|e| match e {
            crate::types::ShapeError::Dimension { expected, actual } => {
                StoreError::DimensionMismatch { expected, actual }
            }
            other => StoreError::InvalidEmbedding(other.to_string()),
        })?;

        let record = IdentityRecord {
            label: label.to_string(),
            roll_number: roll_number.to_string(),
            embedding,
        };
        Ok(self.records.insert(label.to_string(), record))
    }

    /// Remove the record for `label`, failing with `NotFound` if absent.
    pub fn remove(&mut self, label: &str) -> Result<IdentityRecord, StoreError> {
        self.records
            .remove(label)
            .ok_or_else(|| StoreError::NotFound(label.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn emb(values: &[f32]) -> Embedding {
        Embedding::new(values.to_vec())
    }

    #[test]
    fn test_upsert_replaces_without_duplicate() {
        let mut g = Gallery::new();
        assert!(g.upsert("Alice", emb(&[0.1, 0.2]), "R1").unwrap().is_none());
        let old = g.upsert("Alice", emb(&[0.3, 0.4]), "R9").unwrap().unwrap();
        assert_eq!(old.roll_number, "R1");
        assert_eq!(g.len(), 1);
        let rec = g.get("Alice").unwrap();
        assert_eq!(rec.roll_number, "R9");
        assert_eq!(rec.embedding, emb(&[0.3, 0.4]));
    }

    #[test]
    fn test_uniqueness_over_many_upserts() {
        let mut g = Gallery::new();
        for i in 0..20 {
            let label = ["Alice", "Bob", "Carol"][i % 3];
            g.upsert(label, emb(&[i as f32, 0.0]), &format!("R{i}")).unwrap();
        }
        assert_eq!(g.len(), 3);
        assert_eq!(g.labels().collect::<Vec<_>>(), vec!["Alice", "Bob", "Carol"]);
    }

    #[test]
    fn test_iteration_is_label_ordered() {
        let mut g = Gallery::new();
        g.upsert("zed", emb(&[1.0]), "3").unwrap();
        g.upsert("amy", emb(&[2.0]), "1").unwrap();
        g.upsert("max", emb(&[3.0]), "2").unwrap();
        let labels: Vec<_> = g.iter().map(|r| r.label.as_str()).collect();
        assert_eq!(labels, vec!["amy", "max", "zed"]);
    }

    #[test]
    fn test_unit_name_collision_is_conflict() {
        let mut g = Gallery::new();
        g.upsert("Alice Smith", emb(&[1.0]), "R1").unwrap();
        let err = g.upsert("Alice_Smith", emb(&[1.0]), "R2").unwrap_err();
        assert!(matches!(err, StoreError::LabelConflict { .. }), "got {err:?}");
        assert_eq!(g.len(), 1);
    }

    #[test]
    fn test_unsafe_label_rejected() {
        let mut g = Gallery::new();
        for label in ["", "   ", "..", ".hidden"] {
            let err = g.upsert(label, emb(&[1.0]), "R1").unwrap_err();
            assert!(matches!(err, StoreError::LabelConflict { .. }), "{label:?}: {err:?}");
        }
        assert!(g.is_empty());
    }

    #[test]
    fn test_empty_roll_number_rejected() {
        let mut g = Gallery::new();
        let err = g.upsert("Alice", emb(&[1.0]), "  ").unwrap_err();
        assert!(matches!(err, StoreError::EmptyRollNumber));
    }

    #[test]
    fn test_dimension_inferred_from_first_record() {
        let mut g = Gallery::new();
        assert_eq!(g.dimension(), None);
        g.upsert("Alice", emb(&[1.0, 2.0]), "R1").unwrap();
        assert_eq!(g.dimension(), Some(2));
        let err = g.upsert("Bob", emb(&[1.0, 2.0, 3.0]), "R2").unwrap_err();
        assert!(matches!(err, StoreError::DimensionMismatch { expected: 2, actual: 3 }));
    }

    #[test]
    fn test_sole_record_may_change_dimension() {
        let mut g = Gallery::new();
        g.upsert("Alice", emb(&[1.0, 2.0]), "R1").unwrap();
        g.upsert("Alice", emb(&[1.0, 2.0, 3.0]), "R1").unwrap();
        assert_eq!(g.dimension(), Some(3));
    }

    #[test]
    fn test_configured_dimension_enforced() {
        let mut g = Gallery::with_dimension(3);
        assert_eq!(g.dimension(), Some(3));
        let err = g.upsert("Alice", emb(&[1.0]), "R1").unwrap_err();
        assert!(matches!(err, StoreError::DimensionMismatch { expected: 3, actual: 1 }));
    }

    #[test]
    fn test_non_finite_embedding_rejected() {
        let mut g = Gallery::new();
        let err = g.upsert("Alice", emb(&[f32::INFINITY]), "R1").unwrap_err();
        assert!(matches!(err, StoreError::InvalidEmbedding(_)));
    }

    #[test]
    fn test_remove_missing_leaves_gallery_unchanged() {
        let mut g = Gallery::new();
        g.upsert("Alice", emb(&[1.0]), "R1").unwrap();
        let before = g.clone();
        let err = g.remove("Bob").unwrap_err();
        assert!(matches!(err, StoreError::NotFound(ref l) if l == "Bob"));
        assert_eq!(g, before);
    }

    #[test]
    fn test_remove_returns_record() {
        let mut g = Gallery::new();
        g.upsert("Alice", emb(&[1.0]), "R1").unwrap();
        let rec = g.remove("Alice").unwrap();
        assert_eq!(rec.label, "Alice");
        assert!(g.is_empty());
    }
}
