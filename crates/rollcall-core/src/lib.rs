//! rollcall-core — Face embedding registry and attendance engine.
//!
//! Stores one embedding per registered identity, matches probe embeddings
//! by Euclidean distance against a threshold, and records attendance at
//! most once per identity per recognition session.

pub mod gallery;
pub mod ledger;
pub mod matcher;
pub mod registration;
pub mod session;
pub mod store;
pub mod types;

pub use gallery::Gallery;
pub use ledger::{AttendanceEntry, AttendanceLedger, Clock, LedgerError, SystemClock};
pub use matcher::{EuclideanMatcher, MatchResult, Matcher, DEFAULT_MATCH_THRESHOLD};
pub use registration::{register, RegistrationError};
pub use session::{
    FrameReport, FrameWarning, SessionError, SessionRecognizer, SessionState, SessionSummary,
};
pub use store::{EmbeddingStore, LoadPolicy, LoadReport, StoreError, StoreOptions};
pub use types::{Annotation, BoundingBox, DetectedFace, Embedding, IdentityRecord};
