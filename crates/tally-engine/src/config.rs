//! Engine configuration.
//!
//! Values come from an optional TOML file (`TALLY_CONFIG`) with `TALLY_*`
//! environment variables taking precedence, and XDG-style defaults under
//! `~/.local/share/tally`. The resulting `Config` is built once in `main`
//! and passed into each component explicitly; nothing reads ambient state
//! after startup.

use serde::Deserialize;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("cannot read config file {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },
    #[error("cannot parse config file {path}: {source}")]
    Parse {
        path: String,
        source: toml::de::Error,
    },
}

pub struct Config {
    /// SQLite database holding identities, gallery and ledger.
    pub db_path: PathBuf,
    /// Directory for recognition capture images.
    pub captures_dir: PathBuf,
    /// Directory for registration (enrollment) photos.
    pub enroll_dir: PathBuf,
    /// Directory for synthesized audio artifacts.
    pub audio_dir: PathBuf,
    /// Maximum cosine distance for a match to count as recognized (inclusive).
    pub distance_threshold: f32,
    /// Locale handed to the speech synthesizer.
    pub locale: String,
    /// Extractor command line: image bytes on stdin, JSON vectors on stdout.
    pub extractor_cmd: Vec<String>,
    /// Synthesizer command line: gets text and locale appended, audio on stdout.
    pub synthesizer_cmd: Vec<String>,
    /// Timeout for one extractor invocation.
    pub extract_timeout_secs: u64,
    /// Timeout for one synthesizer invocation.
    pub synth_timeout_secs: u64,
}

/// TOML file shape; every field optional, env still wins.
#[derive(Deserialize, Default)]
struct FileConfig {
    data_dir: Option<PathBuf>,
    db_path: Option<PathBuf>,
    captures_dir: Option<PathBuf>,
    enroll_dir: Option<PathBuf>,
    audio_dir: Option<PathBuf>,
    distance_threshold: Option<f32>,
    locale: Option<String>,
    extractor_cmd: Option<String>,
    synthesizer_cmd: Option<String>,
    extract_timeout_secs: Option<u64>,
    synth_timeout_secs: Option<u64>,
}

impl Config {
    /// Load configuration: TOML file (if `TALLY_CONFIG` is set) overridden
    /// by `TALLY_*` environment variables, with defaults for the rest.
    pub fn load() -> Result<Self, ConfigError> {
        let file = match std::env::var("TALLY_CONFIG") {
            Ok(path) => {
                let raw = std::fs::read_to_string(&path).map_err(|source| ConfigError::Read {
                    path: path.clone(),
                    source,
                })?;
                toml::from_str(&raw).map_err(|source| ConfigError::Parse { path, source })?
            }
            Err(_) => FileConfig::default(),
        };

        let data_dir = env_path("TALLY_DATA_DIR")
            .or(file.data_dir)
            .unwrap_or_else(default_data_dir);

        Ok(Self {
            db_path: env_path("TALLY_DB_PATH")
                .or(file.db_path)
                .unwrap_or_else(|| data_dir.join("tally.db")),
            captures_dir: env_path("TALLY_CAPTURES_DIR")
                .or(file.captures_dir)
                .unwrap_or_else(|| data_dir.join("captures")),
            enroll_dir: env_path("TALLY_ENROLL_DIR")
                .or(file.enroll_dir)
                .unwrap_or_else(|| data_dir.join("enrollments")),
            audio_dir: env_path("TALLY_AUDIO_DIR")
                .or(file.audio_dir)
                .unwrap_or_else(|| data_dir.join("audio")),
            distance_threshold: env_f32("TALLY_DISTANCE_THRESHOLD")
                .or(file.distance_threshold)
                .unwrap_or(0.40),
            locale: std::env::var("TALLY_LOCALE")
                .ok()
                .or(file.locale)
                .unwrap_or_else(|| "en".to_string()),
            extractor_cmd: split_cmd(
                &std::env::var("TALLY_EXTRACTOR_CMD")
                    .ok()
                    .or(file.extractor_cmd)
                    .unwrap_or_else(|| "tally-embed".to_string()),
            ),
            synthesizer_cmd: split_cmd(
                &std::env::var("TALLY_TTS_CMD")
                    .ok()
                    .or(file.synthesizer_cmd)
                    .unwrap_or_else(|| "tally-tts".to_string()),
            ),
            extract_timeout_secs: env_u64("TALLY_EXTRACT_TIMEOUT_SECS")
                .or(file.extract_timeout_secs)
                .unwrap_or(20),
            synth_timeout_secs: env_u64("TALLY_TTS_TIMEOUT_SECS")
                .or(file.synth_timeout_secs)
                .unwrap_or(15),
        })
    }
}

fn default_data_dir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".local/share")
        })
        .join("tally")
}

/// Whitespace-split command line. Arguments with spaces are not supported;
/// wrap complex invocations in a script.
fn split_cmd(raw: &str) -> Vec<String> {
    raw.split_whitespace().map(str::to_string).collect()
}

fn env_path(key: &str) -> Option<PathBuf> {
    std::env::var(key).ok().map(PathBuf::from)
}

fn env_f32(key: &str) -> Option<f32> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}

fn env_u64(key: &str) -> Option<u64> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}
