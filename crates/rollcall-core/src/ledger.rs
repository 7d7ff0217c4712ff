//! Append-only attendance ledger stored as CSV.
//!
//! Layout: header `Timestamp,Name,Roll Number`, then one row per recorded
//! attendance with the timestamp formatted as `YYYY-MM-DD HH:MM:SS`.

use chrono::{Local, NaiveDateTime, SubsecRound};
use std::fmt;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const LEDGER_HEADER: [&str; 3] = ["Timestamp", "Name", "Roll Number"];
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("ledger I/O on {}: {source}", .path.display())]
    StorageIo {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("ledger csv: {0}")]
    Csv(#[from] csv::Error),
    #[error("malformed ledger row at line {line}: {reason}")]
    Malformed { line: u64, reason: String },
}

impl LedgerError {
    fn io(path: &Path, source: io::Error) -> Self {
        LedgerError::StorageIo {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Source of attendance timestamps.
pub trait Clock {
    /// Current local time, truncated to whole seconds.
    fn now(&self) -> NaiveDateTime;
}

/// Wall-clock time in the local timezone.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> NaiveDateTime {
        Local::now().naive_local().trunc_subsecs(0)
    }
}

/// One recorded attendance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttendanceEntry {
    pub timestamp: NaiveDateTime,
    pub name: String,
    pub roll_number: String,
}

impl fmt::Display for AttendanceEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}, {}, {}",
            self.timestamp.format(TIMESTAMP_FORMAT),
            self.name,
            self.roll_number
        )
    }
}

/// Handle to the ledger file. Cheap to clone; holds no open descriptor.
#[derive(Debug, Clone)]
pub struct AttendanceLedger {
    path: PathBuf,
}

impl AttendanceLedger {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Create the ledger with its header row if it does not exist yet.
    pub fn ensure_initialized(&self) -> Result<(), LedgerError> {
        self.write_rows(&[])
    }

    /// Append one attendance row.
    ///
    /// The row (plus the header, for a new ledger) is assembled in memory and
    /// written with a single call, so an interrupted caller never leaves half
    /// a row behind. Failures are returned, not retried.
    pub fn append(
        &self,
        name: &str,
        roll_number: &str,
        timestamp: NaiveDateTime,
    ) -> Result<AttendanceEntry, LedgerError> {
        let entry = AttendanceEntry {
            timestamp: timestamp.trunc_subsecs(0),
            name: name.to_string(),
            roll_number: roll_number.to_string(),
        };
        self.write_rows(std::slice::from_ref(&entry))?;
        tracing::info!(
            name,
            roll_number,
            timestamp = %entry.timestamp.format(TIMESTAMP_FORMAT),
            "attendance recorded"
        );
        Ok(entry)
    }

    fn write_rows(&self, entries: &[AttendanceEntry]) -> Result<(), LedgerError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| LedgerError::io(parent, e))?;
        }

        let mut file = OpenOptions::new()
            .append(true)
            .create(true)
            .open(&self.path)
            .map_err(|e| LedgerError::io(&self.path, e))?;
        let is_new = file
            .metadata()
            .map_err(|e| LedgerError::io(&self.path, e))?
            .len()
            == 0;

        let mut writer = csv::WriterBuilder::new()
            .terminator(csv::Terminator::Any(b'\n'))
            .from_writer(Vec::new());
        if is_new {
            writer.write_record(LEDGER_HEADER)?;
        }
        for entry in entries {
            let timestamp = entry.timestamp.format(TIMESTAMP_FORMAT).to_string();
            writer.write_record([
                timestamp.as_str(),
                entry.name.as_str(),
                entry.roll_number.as_str(),
            ])?;
        }
        let buf = writer
            .into_inner()
            .map_err(|e| LedgerError::io(&self.path, e.into_error()))?;

        if buf.is_empty() {
            return Ok(());
        }
        file.write_all(&buf)
            .and_then(|()| file.sync_data())
            .map_err(|e| LedgerError::io(&self.path, e))
    }

    /// Every entry in append order. A missing ledger reads as empty.
    pub fn read_all(&self) -> Result<Vec<AttendanceEntry>, LedgerError> {
        let file = match File::open(&self.path) {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(LedgerError::io(&self.path, e)),
        };

        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .trim(csv::Trim::All)
            .from_reader(file);

        let headers = reader.headers()?.clone();
        if headers.is_empty() {
            return Ok(Vec::new());
        }
        if headers.iter().ne(LEDGER_HEADER.iter().copied()) {
            return Err(LedgerError::Malformed {
                line: 1,
                reason: format!("unexpected header {:?}", headers.iter().collect::<Vec<_>>()),
            });
        }

        let mut entries = Vec::new();
        for record in reader.records() {
            let record = record?;
            let line = record.position().map_or(0, |p| p.line());
            if record.len() != LEDGER_HEADER.len() {
                return Err(LedgerError::Malformed {
                    line,
                    reason: format!(
                        "expected {} fields, got {}",
                        LEDGER_HEADER.len(),
                        record.len()
                    ),
                });
            }
            let timestamp = NaiveDateTime::parse_from_str(&record[0], TIMESTAMP_FORMAT)
                .map_err(|e| LedgerError::Malformed {
                    line,
                    reason: format!("bad timestamp `{}`: {e}", &record[0]),
                })?;
            entries.push(AttendanceEntry {
                timestamp,
                name: record[1].to_string(),
                roll_number: record[2].to_string(),
            });
        }
        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use tempfile::TempDir;

    fn at(h: u32, m: u32, s: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 3, 1)
            .unwrap()
            .and_hms_opt(h, m, s)
            .unwrap()
    }

    #[test]
    fn test_missing_ledger_reads_empty() {
        let dir = TempDir::new().unwrap();
        let ledger = AttendanceLedger::new(dir.path().join("attendance.csv"));
        assert!(ledger.read_all().unwrap().is_empty());
        assert!(!ledger.path().exists());
    }

    #[test]
    fn test_first_append_writes_header() {
        let dir = TempDir::new().unwrap();
        let ledger = AttendanceLedger::new(dir.path().join("attendance.csv"));
        ledger.append("Alice", "R1", at(9, 0, 5)).unwrap();
        let raw = fs::read_to_string(ledger.path()).unwrap();
        assert_eq!(raw, "Timestamp,Name,Roll Number\n2024-03-01 09:00:05,Alice,R1\n");
    }

    #[test]
    fn test_ensure_initialized_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let ledger = AttendanceLedger::new(dir.path().join("nested").join("attendance.csv"));
        ledger.ensure_initialized().unwrap();
        ledger.ensure_initialized().unwrap();
        let raw = fs::read_to_string(ledger.path()).unwrap();
        assert_eq!(raw, "Timestamp,Name,Roll Number\n");
        assert!(ledger.read_all().unwrap().is_empty());
    }

    #[test]
    fn test_read_all_preserves_append_order() {
        let dir = TempDir::new().unwrap();
        let ledger = AttendanceLedger::new(dir.path().join("attendance.csv"));
        ledger.append("Bob", "R2", at(9, 0, 0)).unwrap();
        ledger.append("Alice", "R1", at(8, 0, 0)).unwrap();
        ledger.append("Carol, Jr.", "R3", at(10, 0, 0)).unwrap();

        let entries = ledger.read_all().unwrap();
        let names: Vec<_> = entries.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["Bob", "Alice", "Carol, Jr."]);
        assert_eq!(entries[1].timestamp, at(8, 0, 0));
        assert_eq!(entries[2].roll_number, "R3");
    }

    #[test]
    fn test_append_truncates_subseconds() {
        let dir = TempDir::new().unwrap();
        let ledger = AttendanceLedger::new(dir.path().join("attendance.csv"));
        let precise = at(9, 0, 5) + chrono::Duration::milliseconds(750);
        let entry = ledger.append("Alice", "R1", precise).unwrap();
        assert_eq!(entry.timestamp, at(9, 0, 5));
        assert_eq!(ledger.read_all().unwrap(), vec![entry]);
    }

    #[test]
    fn test_reads_header_with_spaces() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("attendance.csv");
        fs::write(&path, "Timestamp, Name, Roll Number\n2024-03-01 09:00:05, Alice, R1\n").unwrap();
        let entries = AttendanceLedger::new(&path).read_all().unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].name, "Alice");
    }

    #[test]
    fn test_malformed_timestamp_reports_line() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("attendance.csv");
        fs::write(
            &path,
            "Timestamp,Name,Roll Number\n2024-03-01 09:00:05,Alice,R1\nyesterday,Bob,R2\n",
        )
        .unwrap();
        let err = AttendanceLedger::new(&path).read_all().unwrap_err();
        assert!(matches!(err, LedgerError::Malformed { line: 3, .. }), "got {err:?}");
    }

    #[test]
    fn test_append_io_failure_surfaces() {
        let dir = TempDir::new().unwrap();
        let blocker = dir.path().join("blocker");
        fs::write(&blocker, b"a file, not a directory").unwrap();
        let ledger = AttendanceLedger::new(blocker.join("attendance.csv"));
        let err = ledger.append("Alice", "R1", at(9, 0, 0)).unwrap_err();
        assert!(matches!(err, LedgerError::StorageIo { .. }), "got {err:?}");
    }

    #[test]
    fn test_entry_display() {
        let entry = AttendanceEntry {
            timestamp: at(9, 5, 0),
            name: "Alice".into(),
            roll_number: "R1".into(),
        };
        assert_eq!(entry.to_string(), "2024-03-01 09:05:00, Alice, R1");
    }
}
