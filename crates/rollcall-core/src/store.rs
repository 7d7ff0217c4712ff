//! Embedding store backed by one JSON unit per registered identity.
//!
//! Each label is persisted as `<unit-name>.json` inside the registry
//! directory. Units are written to a hidden temporary file and renamed into
//! place, so a crash mid-write never corrupts another label's unit.

use crate::gallery::Gallery;
use crate::types::{Embedding, IdentityRecord};
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;

const UNIT_EXTENSION: &str = "json";
const MAX_LABEL_BYTES: usize = 200;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("corrupt unit {}: {reason}", .unit.display())]
    StorageCorrupt { unit: PathBuf, reason: String },
    #[error("no registered face with label `{0}`")]
    NotFound(String),
    #[error("label `{label}` rejected: {reason}")]
    LabelConflict { label: String, reason: String },
    #[error("embedding dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
    #[error("invalid embedding: {0}")]
    InvalidEmbedding(String),
    #[error("roll number must not be empty")]
    EmptyRollNumber,
    #[error("storage I/O on {}: {source}", .path.display())]
    StorageIo {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl StoreError {
    fn io(path: &Path, source: io::Error) -> Self {
        StoreError::StorageIo {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// What `load` does with a unit that cannot be read back.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LoadPolicy {
    /// Skip the unit and list it in the [`LoadReport`].
    #[default]
    SkipCorrupt,
    /// Fail the whole load with [`StoreError::StorageCorrupt`].
    Strict,
}

#[derive(Debug, Clone, Default)]
pub struct StoreOptions {
    /// Required embedding dimension; `None` accepts whatever the first unit has.
    pub embedding_dim: Option<usize>,
    pub load_policy: LoadPolicy,
}

/// A unit skipped during load.
#[derive(Debug, Clone)]
pub struct CorruptUnit {
    pub path: PathBuf,
    pub reason: String,
}

/// Outcome of [`EmbeddingStore::load`].
#[derive(Debug, Clone, Default)]
pub struct LoadReport {
    pub loaded: usize,
    pub corrupt: Vec<CorruptUnit>,
}

/// File stem used to persist `label`.
///
/// ASCII alphanumerics, `-` and `_` are kept; every other character becomes
/// `_`. Empty labels, labels starting with `.` and overlong labels are
/// rejected as unsafe.
pub fn unit_name(label: &str) -> Result<String, StoreError> {
    let reject = |reason: &str| StoreError::LabelConflict {
        label: label.to_string(),
        reason: reason.to_string(),
    };
    if label.trim().is_empty() {
        return Err(reject("label is empty"));
    }
    if label.starts_with('.') {
        return Err(reject("label may not start with `.`"));
    }
    if label.len() > MAX_LABEL_BYTES {
        return Err(reject("label is too long"));
    }
    Ok(label
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect())
}

/// Most common non-zero embedding dimension; ties go to the unit read first.
fn majority_dimension<'a>(records: impl Iterator<Item = &'a IdentityRecord>) -> Option<usize> {
    let mut counts: Vec<(usize, usize)> = Vec::new();
    for record in records {
        let dim = record.embedding.dimension();
        if dim == 0 {
            continue;
        }
        match counts.iter_mut().find(|(d, _)| *d == dim) {
            Some((_, n)) => *n += 1,
            None => counts.push((dim, 1)),
        }
    }
    counts
        .into_iter()
        .fold(None, |best: Option<(usize, usize)>, (dim, n)| match best {
            Some((_, best_n)) if best_n >= n => best,
            _ => Some((dim, n)),
        })
        .map(|(dim, _)| dim)
}

/// Durable registry of identity records backed by a directory.
pub struct EmbeddingStore {
    root: PathBuf,
    options: StoreOptions,
    records: Gallery,
}

impl EmbeddingStore {
    /// Open (and create if absent) the registry directory.
    ///
    /// Nothing is read until [`load`](Self::load) is called.
    pub fn open(root: impl Into<PathBuf>, options: StoreOptions) -> Result<Self, StoreError> {
        let root = root.into();
        fs::create_dir_all(&root).map_err(|e| StoreError::io(&root, e))?;
        let records = Self::empty_gallery(&options);
        Ok(Self {
            root,
            options,
            records,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Current in-memory records.
    pub fn records(&self) -> &Gallery {
        &self.records
    }

    /// Owned copy of the records, for a recognition session.
    pub fn snapshot(&self) -> Gallery {
        self.records.clone()
    }

    fn empty_gallery(options: &StoreOptions) -> Gallery {
        match options.embedding_dim {
            Some(dim) => Gallery::with_dimension(dim),
            None => Gallery::new(),
        }
    }

    fn unit_path(&self, unit: &str) -> PathBuf {
        self.root.join(format!("{unit}.{UNIT_EXTENSION}"))
    }

    /// Replace the in-memory records with everything persisted on disk.
    ///
    /// Units are read in file-name order. Under [`LoadPolicy::Strict`] the
    /// first corrupt unit aborts the load and the current records are kept.
    pub fn load(&mut self) -> Result<LoadReport, StoreError> {
        fs::create_dir_all(&self.root).map_err(|e| StoreError::io(&self.root, e))?;

        let mut paths = Vec::new();
        for entry in fs::read_dir(&self.root).map_err(|e| StoreError::io(&self.root, e))? {
            let path = entry.map_err(|e| StoreError::io(&self.root, e))?.path();
            let hidden = path
                .file_name()
                .and_then(|n| n.to_str())
                .map_or(true, |n| n.starts_with('.'));
            let is_unit = path.extension().and_then(|e| e.to_str()) == Some(UNIT_EXTENSION);
            if is_unit && !hidden && path.is_file() {
                paths.push(path);
            }
        }
        paths.sort();

        let parsed: Vec<(PathBuf, Result<IdentityRecord, String>)> = paths
            .into_iter()
            .map(|path| {
                let record = Self::read_unit(&path);
                (path, record)
            })
            .collect();
        let expected_dim = self.options.embedding_dim.or_else(|| {
            majority_dimension(parsed.iter().filter_map(|(_, record)| record.as_ref().ok()))
        });

        let mut gallery = Self::empty_gallery(&self.options);
        let mut report = LoadReport::default();

        for (path, record) in parsed {
            match record.and_then(|record| Self::admit(record, expected_dim, &mut gallery)) {
                Ok(()) => report.loaded += 1,
                Err(reason) => {
                    if self.options.load_policy == LoadPolicy::Strict {
                        return Err(StoreError::StorageCorrupt { unit: path, reason });
                    }
                    tracing::warn!(unit = %path.display(), %reason, "skipping corrupt face unit");
                    report.corrupt.push(CorruptUnit { path, reason });
                }
            }
        }

        tracing::info!(
            root = %self.root.display(),
            loaded = report.loaded,
            corrupt = report.corrupt.len(),
            "embedding store loaded"
        );
        self.records = gallery;
        Ok(report)
    }

    fn read_unit(path: &Path) -> Result<IdentityRecord, String> {
        let raw = fs::read_to_string(path).map_err(|e| format!("read failed: {e}"))?;
        let record: IdentityRecord =
            serde_json::from_str(&raw).map_err(|e| format!("malformed unit: {e}"))?;

        let expected = unit_name(&record.label).map_err(|e| e.to_string())?;
        let stem = path.file_stem().and_then(|s| s.to_str()).unwrap_or_default();
        if stem != expected {
            return Err(format!(
                "label `{}` belongs in unit `{expected}`, found in `{stem}`",
                record.label
            ));
        }
        Ok(record)
    }

    fn admit(
        record: IdentityRecord,
        expected_dim: Option<usize>,
        gallery: &mut Gallery,
    ) -> Result<(), String> {
        let actual = record.embedding.dimension();
        match expected_dim {
            Some(expected) if actual != 0 && actual != expected => {
                return Err(StoreError::DimensionMismatch { expected, actual }.to_string());
            }
            _ => {}
        }
        gallery
            .upsert(&record.label, record.embedding, &record.roll_number)
            .map(|_| ())
            .map_err(|e| e.to_string())
    }

    /// Persist every in-memory record, one unit per label.
    ///
    /// Units on disk whose label is not in memory are left alone.
    pub fn save(&self) -> Result<(), StoreError> {
        fs::create_dir_all(&self.root).map_err(|e| StoreError::io(&self.root, e))?;
        for record in self.records.iter() {
            self.write_unit(record)?;
        }
        tracing::info!(
            root = %self.root.display(),
            count = self.records.len(),
            "embedding store saved"
        );
        Ok(())
    }

    fn write_unit(&self, record: &IdentityRecord) -> Result<(), StoreError> {
        let unit = unit_name(&record.label)?;
        let path = self.unit_path(&unit);
        let tmp = self.root.join(format!(".{unit}.{UNIT_EXTENSION}.tmp"));

        // The unit may belong to a label this handle never loaded.
        if let Some(owner) = Self::unit_owner(&path) {
            if owner != record.label {
                return Err(StoreError::LabelConflict {
                    label: record.label.clone(),
                    reason: format!("unit `{unit}` already holds `{owner}`"),
                });
            }
        }

        let body =
            serde_json::to_vec(record).map_err(|e| StoreError::InvalidEmbedding(e.to_string()))?;
        let written = File::create(&tmp).and_then(|mut file| {
            file.write_all(&body)?;
            file.sync_all()
        });
        if let Err(e) = written {
            let _ = fs::remove_file(&tmp);
            return Err(StoreError::io(&tmp, e));
        }
        fs::rename(&tmp, &path).map_err(|e| {
            let _ = fs::remove_file(&tmp);
            StoreError::io(&path, e)
        })?;

        tracing::debug!(label = %record.label, unit = %path.display(), "face unit written");
        Ok(())
    }

    /// Label stored in an existing unit, if the unit exists and parses.
    fn unit_owner(path: &Path) -> Option<String> {
        #[derive(serde::Deserialize)]
        struct UnitLabel {
            label: String,
        }
        let raw = fs::read_to_string(path).ok()?;
        serde_json::from_str::<UnitLabel>(&raw).ok().map(|u| u.label)
    }

    /// Register or re-register `label`, persisting its unit immediately.
    ///
    /// Returns the record that was replaced. If the unit cannot be written
    /// the in-memory records are left as they were.
    pub fn upsert(
        &mut self,
        label: &str,
        embedding: Embedding,
        roll_number: &str,
    ) -> Result<Option<IdentityRecord>, StoreError> {
        let mut next = self.records.clone();
        let replaced = next.upsert(label, embedding, roll_number)?;
        if let Some(record) = next.get(label) {
            self.write_unit(record)?;
        }
        self.records = next;

        tracing::info!(label, replaced = replaced.is_some(), "face registered");
        Ok(replaced)
    }

    /// Delete `label` and its unit. Fails with `NotFound` if it is not registered.
    pub fn remove(&mut self, label: &str) -> Result<IdentityRecord, StoreError> {
        if !self.records.contains(label) {
            return Err(StoreError::NotFound(label.to_string()));
        }
        let path = self.unit_path(&unit_name(label)?);
        match fs::remove_file(&path) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                tracing::warn!(label, unit = %path.display(), "face unit already missing on disk");
            }
            Err(e) => return Err(StoreError::io(&path, e)),
        }
        let removed = self.records.remove(label)?;
        tracing::info!(label, "face deleted");
        Ok(removed)
    }
}
