//! Registration of one extractor capture as an identity.

use crate::store::{EmbeddingStore, StoreError};
use crate::types::{DetectedFace, IdentityRecord};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RegistrationError {
    #[error("no face detected in the capture, try again")]
    NoFaceDetected,
    #[error("name must not be empty")]
    EmptyName,
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Register the best face of a capture under `name`.
///
/// When the capture holds several faces the one with the highest detector
/// confidence is used (first one wins on equal confidence). Any previous
/// registration for `name` is replaced and returned.
pub fn register(
    store: &mut EmbeddingStore,
    name: &str,
    roll_number: &str,
    capture: &[DetectedFace],
) -> Result<Option<IdentityRecord>, RegistrationError> {
    let name = name.trim();
    if name.is_empty() {
        return Err(RegistrationError::EmptyName);
    }
    if roll_number.trim().is_empty() {
        return Err(StoreError::EmptyRollNumber.into());
    }

    let mut best: Option<&DetectedFace> = None;
    for face in capture {
        if best.map_or(true, |b| face.bbox.confidence > b.bbox.confidence) {
            best = Some(face);
        }
    }
    let face = best.ok_or(RegistrationError::NoFaceDetected)?;

    tracing::info!(
        name,
        faces = capture.len(),
        confidence = face.bbox.confidence,
        "registration: best face selected"
    );

    Ok(store.upsert(name, face.embedding.clone(), roll_number)?)
}
