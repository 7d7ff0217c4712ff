use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use rollcall_core::{
    AttendanceLedger, DetectedFace, EmbeddingStore, EuclideanMatcher, FrameWarning,
    SessionRecognizer,
};
use std::io::{self, BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

mod config;

use config::Config;

#[derive(Parser)]
#[command(name = "rollcall", about = "Face recognition attendance CLI")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Register a face from one extractor capture
    Register {
        /// Name to register the face under
        #[arg(short, long)]
        name: String,
        /// Roll number recorded alongside the name
        #[arg(short, long)]
        roll: String,
        /// JSON file holding the capture's detected faces
        #[arg(short, long)]
        capture: PathBuf,
    },
    /// List registered faces
    List,
    /// Delete a registered face
    Remove {
        /// Label of the face to delete
        label: String,
    },
    /// Run a recognition session over a stream of frames
    Recognize {
        /// JSON-lines file, one frame of detected faces per line ("-" for stdin)
        #[arg(default_value = "-")]
        frames: PathBuf,
        /// Show only the name in annotations
        #[arg(long)]
        hide_roll_number: bool,
        /// Override the match threshold
        #[arg(long, value_parser = config::parse_threshold)]
        threshold: Option<f32>,
    },
    /// Show recorded attendance
    Attendance,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();
    let config = Config::from_env()?;
    tracing::debug!(?config, "configuration resolved");

    match cli.command {
        Commands::Register {
            name,
            roll,
            capture,
        } => cmd_register(&config, &name, &roll, &capture),
        Commands::List => cmd_list(&config),
        Commands::Remove { label } => cmd_remove(&config, &label),
        Commands::Recognize {
            frames,
            hide_roll_number,
            threshold,
        } => cmd_recognize(&config, &frames, hide_roll_number, threshold),
        Commands::Attendance => cmd_attendance(&config),
    }
}

fn open_store(config: &Config) -> Result<EmbeddingStore> {
    let mut store = EmbeddingStore::open(&config.registry_dir, config.store_options())
        .with_context(|| format!("opening registry {}", config.registry_dir.display()))?;
    let report = store.load().context("loading registered faces")?;
    for unit in &report.corrupt {
        eprintln!(
            "warning: skipped corrupt face unit {}: {}",
            unit.path.display(),
            unit.reason
        );
    }
    Ok(store)
}

fn cmd_register(config: &Config, name: &str, roll: &str, capture: &Path) -> Result<()> {
    let raw = std::fs::read_to_string(capture)
        .with_context(|| format!("reading capture {}", capture.display()))?;
    let faces: Vec<DetectedFace> = serde_json::from_str(&raw)
        .with_context(|| format!("parsing capture {}", capture.display()))?;

    let mut store = open_store(config)?;
    rollcall_core::register(&mut store, name, roll, &faces)?;
    println!("Face registered for {} (Roll No: {})", name.trim(), roll.trim());
    Ok(())
}

fn cmd_list(config: &Config) -> Result<()> {
    let store = open_store(config)?;
    if store.records().is_empty() {
        println!("No faces registered.");
        return Ok(());
    }
    for record in store.records().iter() {
        println!("{}\t{}", record.label, record.roll_number);
    }
    Ok(())
}

fn cmd_remove(config: &Config, label: &str) -> Result<()> {
    let mut store = open_store(config)?;
    store.remove(label)?;
    println!("Face '{label}' deleted successfully.");
    Ok(())
}

fn cmd_recognize(
    config: &Config,
    frames: &Path,
    hide_roll_number: bool,
    threshold: Option<f32>,
) -> Result<()> {
    let store = open_store(config)?;
    let ledger = AttendanceLedger::new(&config.ledger_path);
    ledger
        .ensure_initialized()
        .with_context(|| format!("initializing ledger {}", config.ledger_path.display()))?;

    let matcher = EuclideanMatcher::new(threshold.unwrap_or(config.match_threshold));
    let mut recognizer = SessionRecognizer::new(matcher, ledger)
        .show_roll_number(config.show_roll_number && !hide_roll_number);

    let input: Box<dyn BufRead> = if frames == Path::new("-") {
        Box::new(BufReader::new(io::stdin()))
    } else {
        let file = std::fs::File::open(frames)
            .with_context(|| format!("opening frames {}", frames.display()))?;
        Box::new(BufReader::new(file))
    };

    recognizer.start_session(&store)?;
    let stdout = io::stdout();
    let mut out = stdout.lock();

    for (line_no, line) in input.lines().enumerate() {
        let line = line.context("reading frame stream")?;
        if line.trim().is_empty() {
            continue;
        }
        let faces: Vec<DetectedFace> = match serde_json::from_str(&line) {
            Ok(faces) => faces,
            Err(e) => {
                tracing::warn!(line = line_no + 1, error = %e, "skipping unreadable frame");
                continue;
            }
        };

        let report = recognizer.process_frame(&faces)?;
        for warning in &report.warnings {
            match warning {
                FrameWarning::MalformedProbe { index, error } => {
                    eprintln!("warning: frame {}: face {index} rejected: {error}", line_no + 1)
                }
                FrameWarning::LedgerWrite { label, error } => {
                    eprintln!("warning: attendance for {label} not recorded: {error}")
                }
            }
        }
        serde_json::to_writer(&mut out, &report.annotations)?;
        writeln!(out)?;
    }

    if let Some(summary) = recognizer.stop_session() {
        eprintln!(
            "Attendance recorded for {} of {} registered ({} frames){}",
            summary.recorded.len(),
            store.records().len(),
            summary.frames,
            if summary.recorded.is_empty() {
                String::new()
            } else {
                format!(": {}", summary.recorded.join(", "))
            }
        );
    }
    Ok(())
}

fn cmd_attendance(config: &Config) -> Result<()> {
    let ledger = AttendanceLedger::new(&config.ledger_path);
    let entries = ledger
        .read_all()
        .with_context(|| format!("reading ledger {}", config.ledger_path.display()))?;
    print!("{}", render_attendance(&entries));
    Ok(())
}

/// Text view of the ledger, one `"<timestamp>, <name>, <roll>"` row per entry.
fn render_attendance(entries: &[rollcall_core::AttendanceEntry]) -> String {
    if entries.is_empty() {
        return "No attendance records found.\n".to_string();
    }
    let mut text = rollcall_core::ledger::LEDGER_HEADER.join(", ");
    text.push('\n');
    for entry in entries {
        text.push_str(&entry.to_string());
        text.push('\n');
    }
    text
}

#[cfg(test)]
mod tests {
    use super::*;
    use rollcall_core::Clock;
    use tempfile::TempDir;

    #[test]
    fn test_render_empty_ledger() {
        assert_eq!(render_attendance(&[]), "No attendance records found.\n");
    }

    #[test]
    fn test_render_rows() {
        let dir = TempDir::new().unwrap();
        let ledger = AttendanceLedger::new(dir.path().join("attendance.csv"));
        let when = rollcall_core::SystemClock.now();
        ledger.append("Alice", "R1", when).unwrap();
        ledger.append("Bob", "R2", when).unwrap();

        let text = render_attendance(&ledger.read_all().unwrap());
        let lines: Vec<_> = text.lines().collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0], "Timestamp, Name, Roll Number");
        assert!(lines[1].ends_with(", Alice, R1"), "{}", lines[1]);
        assert!(lines[2].ends_with(", Bob, R2"), "{}", lines[2]);
    }

    #[test]
    fn test_cli_parses_recognize_defaults() {
        let cli = Cli::try_parse_from(["rollcall", "recognize"]).unwrap();
        match cli.command {
            Commands::Recognize { frames, hide_roll_number, threshold } => {
                assert_eq!(frames, PathBuf::from("-"));
                assert!(!hide_roll_number);
                assert!(threshold.is_none());
            }
            _ => panic!("expected recognize"),
        }
    }

    #[test]
    fn test_cli_parses_register() {
        let args = ["rollcall", "register", "-n", "Alice", "-r", "R1", "-c", "cap.json"];
        let cli = Cli::try_parse_from(args).unwrap();
        assert!(matches!(cli.command, Commands::Register { ref name, .. } if name == "Alice"));
    }

    #[test]
    fn test_cli_rejects_invalid_threshold() {
        for raw in ["NaN", "-0.2", "inf"] {
            let args = ["rollcall", "recognize", "--threshold", raw];
            assert!(Cli::try_parse_from(args).is_err(), "{raw} accepted");
        }
        let cli = Cli::try_parse_from(["rollcall", "recognize", "--threshold", "0.4"]).unwrap();
        assert!(matches!(cli.command, Commands::Recognize { threshold: Some(t), .. } if t == 0.4));
    }
}
