//! Recognition session: match each frame's faces and record attendance once
//! per identity per session.

use crate::gallery::Gallery;
use crate::ledger::{AttendanceLedger, Clock, LedgerError, SystemClock};
use crate::matcher::{EuclideanMatcher, Matcher};
use crate::store::EmbeddingStore;
use crate::types::{Annotation, DetectedFace, ShapeError};
use std::collections::BTreeSet;
use thiserror::Error;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum SessionError {
    #[error("a recognition session is already running")]
    AlreadyRunning,
    #[error("no recognition session is running")]
    NotRunning,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Running,
    Stopped,
}

/// Non-fatal problem encountered while processing a frame.
#[derive(Debug)]
pub enum FrameWarning {
    /// The face at `index` was rejected by shape validation and annotated as unknown.
    MalformedProbe { index: usize, error: ShapeError },
    /// Attendance for `label` could not be written; a later frame will retry.
    LedgerWrite { label: String, error: LedgerError },
}

/// Output of [`SessionRecognizer::process_frame`].
#[derive(Debug, Default)]
pub struct FrameReport {
    /// One annotation per input face, in input order.
    pub annotations: Vec<Annotation>,
    /// Labels whose attendance was written by this frame.
    pub recorded: Vec<String>,
    pub warnings: Vec<FrameWarning>,
}

/// Totals for a finished session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSummary {
    pub frames: usize,
    /// Labels recorded during the session, in label order.
    pub recorded: Vec<String>,
}

/// Drives frames through the matcher and writes the attendance ledger.
///
/// Single-threaded: the snapshot and the `seen` set are only touched by
/// the caller of [`process_frame`](Self::process_frame).
pub struct SessionRecognizer<M = EuclideanMatcher, C = SystemClock> {
    matcher: M,
    ledger: AttendanceLedger,
    clock: C,
    show_roll_number: bool,
    state: SessionState,
    snapshot: Gallery,
    seen: BTreeSet<String>,
    frames: usize,
}

impl SessionRecognizer {
    pub fn new(matcher: EuclideanMatcher, ledger: AttendanceLedger) -> Self {
        Self::with_clock(matcher, ledger, SystemClock)
    }
}

impl<M: Matcher, C: Clock> SessionRecognizer<M, C> {
    pub fn with_clock(matcher: M, ledger: AttendanceLedger, clock: C) -> Self {
        Self {
            matcher,
            ledger,
            clock,
            show_roll_number: true,
            state: SessionState::Idle,
            snapshot: Gallery::new(),
            seen: BTreeSet::new(),
            frames: 0,
        }
    }

    /// Whether annotation text includes the roll number (`"<name> - <roll>"`).
    pub fn show_roll_number(mut self, show: bool) -> Self {
        self.show_roll_number = show;
        self
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Labels already recorded in the running session.
    pub fn seen(&self) -> impl Iterator<Item = &str> {
        self.seen.iter().map(String::as_str)
    }

    /// Begin a session against a snapshot of `store`.
    ///
    /// Registrations made after this call are not visible until the next
    /// session. A stopped recognizer may be started again.
    pub fn start_session(&mut self, store: &EmbeddingStore) -> Result<(), SessionError> {
        if self.state == SessionState::Running {
            return Err(SessionError::AlreadyRunning);
        }
        self.snapshot = store.snapshot();
        self.seen.clear();
        self.frames = 0;
        self.state = SessionState::Running;
        tracing::info!(identities = self.snapshot.len(), "recognition session started");
        Ok(())
    }

    /// Match every face in one frame and record first sightings.
    pub fn process_frame(&mut self, faces: &[DetectedFace]) -> Result<FrameReport, SessionError> {
        if self.state != SessionState::Running {
            return Err(SessionError::NotRunning);
        }
        self.frames += 1;

        let mut report = FrameReport::default();
        for (index, face) in faces.iter().enumerate() {
            if let Err(error) = face.embedding.check_shape(self.snapshot.dimension()) {
                tracing::warn!(index, %error, "rejecting malformed probe");
                report.annotations.push(Annotation::unknown(face.bbox));
                report.warnings.push(FrameWarning::MalformedProbe { index, error });
                continue;
            }

            let result = self.matcher.compare(&face.embedding, &self.snapshot);
            let matched = result
                .label
                .as_deref()
                .and_then(|label| self.snapshot.get(label))
                .zip(result.distance);
            let Some((record, distance)) = matched else {
                report.annotations.push(Annotation::unknown(face.bbox));
                continue;
            };

            report
                .annotations
                .push(Annotation::known(face.bbox, record, distance, self.show_roll_number));

            if self.seen.contains(&record.label) {
                continue;
            }
            match self.ledger.append(&record.label, &record.roll_number, self.clock.now()) {
                Ok(_) => {
                    self.seen.insert(record.label.clone());
                    report.recorded.push(record.label.clone());
                }
                Err(error) => {
                    tracing::warn!(
                        label = %record.label,
                        %error,
                        "attendance write failed; continuing"
                    );
                    report.warnings.push(FrameWarning::LedgerWrite {
                        label: record.label.clone(),
                        error,
                    });
                }
            }
        }
        Ok(report)
    }

    /// End the session. Returns `None` if no session was running.
    pub fn stop_session(&mut self) -> Option<SessionSummary> {
        if self.state != SessionState::Running {
            return None;
        }
        self.state = SessionState::Stopped;
        self.snapshot = Gallery::new();
        let recorded: Vec<String> = std::mem::take(&mut self.seen).into_iter().collect();
        let summary = SessionSummary {
            frames: self.frames,
            recorded,
        };
        tracing::info!(
            frames = summary.frames,
            recorded = summary.recorded.len(),
            "recognition session stopped"
        );
        Some(summary)
    }
}
