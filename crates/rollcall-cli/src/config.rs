use anyhow::{anyhow, Context, Result};
use rollcall_core::{LoadPolicy, StoreOptions, DEFAULT_MATCH_THRESHOLD};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::str::FromStr;

const DEFAULT_EMBEDDING_DIM: usize = 128;
const CONFIG_FILE_NAME: &str = "rollcall.toml";

/// Optional settings file (`rollcall.toml`). Every key may be omitted.
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct FileConfig {
    data_dir: Option<PathBuf>,
    registry_dir: Option<PathBuf>,
    ledger_path: Option<PathBuf>,
    match_threshold: Option<f32>,
    embedding_dim: Option<usize>,
    show_roll_number: Option<bool>,
    strict_load: Option<bool>,
}

/// Resolved configuration: file values, overridden by `ROLLCALL_*` variables.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// Directory holding one unit per registered face.
    pub registry_dir: PathBuf,
    /// Attendance CSV file.
    pub ledger_path: PathBuf,
    /// Maximum Euclidean distance for a positive match.
    pub match_threshold: f32,
    /// Required embedding dimension (`None` = accept the first one seen).
    pub embedding_dim: Option<usize>,
    /// Whether annotations show `"<name> - <roll>"` or just the name.
    pub show_roll_number: bool,
    /// Fail on the first corrupt unit instead of skipping it.
    pub strict_load: bool,
}

impl Config {
    /// Load configuration from the process environment and optional TOML file.
    pub fn from_env() -> Result<Self> {
        let env = |key: &str| std::env::var(key).ok();
        let data_dir = default_data_dir(&env);
        let path = env("ROLLCALL_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|| data_dir.join(CONFIG_FILE_NAME));

        let file = if path.is_file() {
            let raw = std::fs::read_to_string(&path)
                .with_context(|| format!("reading config {}", path.display()))?;
            let parsed =
                parse_file(&raw).with_context(|| format!("parsing config {}", path.display()))?;
            tracing::debug!(path = %path.display(), "config file loaded");
            parsed
        } else {
            FileConfig::default()
        };

        Self::resolve(file, &env, data_dir)
    }

    fn resolve(
        file: FileConfig,
        env: &impl Fn(&str) -> Option<String>,
        default_data_dir: PathBuf,
    ) -> Result<Self> {
        let data_dir = env("ROLLCALL_DATA_DIR")
            .map(PathBuf::from)
            .or(file.data_dir)
            .unwrap_or(default_data_dir);

        let registry_dir = env("ROLLCALL_REGISTRY_DIR")
            .map(PathBuf::from)
            .or(file.registry_dir)
            .unwrap_or_else(|| data_dir.join("registered_faces"));

        let ledger_path = env("ROLLCALL_LEDGER_PATH")
            .map(PathBuf::from)
            .or(file.ledger_path)
            .unwrap_or_else(|| data_dir.join("attendance.csv"));

        let embedding_dim = env_parse::<usize>(env, "ROLLCALL_EMBEDDING_DIM")
            .or(file.embedding_dim)
            .unwrap_or(DEFAULT_EMBEDDING_DIM);

        let match_threshold = match env("ROLLCALL_MATCH_THRESHOLD") {
            Some(raw) => parse_threshold(&raw)
                .map_err(|e| anyhow!("ROLLCALL_MATCH_THRESHOLD: {e}"))?,
            None => match file.match_threshold {
                Some(t) => check_threshold(t).map_err(|e| anyhow!("match_threshold: {e}"))?,
                None => DEFAULT_MATCH_THRESHOLD,
            },
        };

        Ok(Self {
            registry_dir,
            ledger_path,
            match_threshold,
            embedding_dim: (embedding_dim > 0).then_some(embedding_dim),
            show_roll_number: env_flag(env, "ROLLCALL_SHOW_ROLL_NUMBER")
                .or(file.show_roll_number)
                .unwrap_or(true),
            strict_load: env_flag(env, "ROLLCALL_STRICT_LOAD")
                .or(file.strict_load)
                .unwrap_or(false),
        })
    }

    pub fn store_options(&self) -> StoreOptions {
        StoreOptions {
            embedding_dim: self.embedding_dim,
            load_policy: if self.strict_load {
                LoadPolicy::Strict
            } else {
                LoadPolicy::SkipCorrupt
            },
        }
    }
}

/// Parse a match threshold: a finite, non-negative distance.
pub fn parse_threshold(raw: &str) -> Result<f32, String> {
    let value: f32 = raw
        .trim()
        .parse()
        .map_err(|_| format!("`{}` is not a number", raw.trim()))?;
    check_threshold(value)
}

fn check_threshold(value: f32) -> Result<f32, String> {
    if value.is_finite() && value >= 0.0 {
        Ok(value)
    } else {
        Err(format!("threshold must be a finite distance >= 0, got {value}"))
    }
}

fn parse_file(raw: &str) -> Result<FileConfig> {
    Ok(toml::from_str(raw)?)
}

fn default_data_dir(env: &impl Fn(&str) -> Option<String>) -> PathBuf {
    env("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|| {
            let home = env("HOME").unwrap_or_else(|| "/tmp".to_string());
            Path::new(&home).join(".local/share")
        })
        .join("rollcall")
}

fn env_parse<T: FromStr>(env: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    env(key).and_then(|v| v.trim().parse().ok())
}

fn env_flag(env: &impl Fn(&str) -> Option<String>, key: &str) -> Option<bool> {
    env(key).map(|v| {
        let v = v.trim();
        v != "0" && !v.eq_ignore_ascii_case("false")
    })
}
