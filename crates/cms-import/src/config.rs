//! TOML configuration for the `cms-import` binary.
//!
//! ```toml
//! [db]
//! path = "./data/cms.sqlite"
//!
//! [import]
//! chunk_size = 1000
//! inference_sample_size = 100
//!
//! [assets]
//! dir = "./data/assets"
//!
//! [logging]
//! level = "info"
//! format = "text"
//! ```
//!
//! Only `[db]` is required. See [`load_config`] for validation rules.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::fmt;
use std::path::{Path, PathBuf};

use cms_import_core::import::DEFAULT_INFERENCE_SAMPLE_SIZE;
use cms_import_core::stream::DEFAULT_CHUNK_SIZE;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub import: ImportConfig,
    #[serde(default)]
    pub assets: AssetsConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ImportConfig {
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default = "default_inference_sample_size")]
    pub inference_sample_size: usize,
}

impl Default for ImportConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            inference_sample_size: DEFAULT_INFERENCE_SAMPLE_SIZE,
        }
    }
}

fn default_chunk_size() -> usize {
    DEFAULT_CHUNK_SIZE
}
fn default_inference_sample_size() -> usize {
    DEFAULT_INFERENCE_SAMPLE_SIZE
}

/// Where import jobs find uploaded assets: `<dir>/<asset id>[.json|.geojson]`.
#[derive(Debug, Deserialize, Clone)]
pub struct AssetsConfig {
    #[serde(default = "default_assets_dir")]
    pub dir: PathBuf,
}

impl Default for AssetsConfig {
    fn default() -> Self {
        Self {
            dir: default_assets_dir(),
        }
    }
}

fn default_assets_dir() -> PathBuf {
    PathBuf::from("./data/assets")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Error => "error",
            Self::Warn => "warn",
            Self::Info => "info",
            Self::Debug => "debug",
            Self::Trace => "trace",
        }
    }

    /// One step more verbose per `-v`, saturating at `trace`.
    pub fn raised_by(self, steps: u8) -> LogLevel {
        let all = [
            LogLevel::Error,
            LogLevel::Warn,
            LogLevel::Info,
            LogLevel::Debug,
            LogLevel::Trace,
        ];
        let at = all.iter().position(|l| *l == self).unwrap_or(2);
        all[(at + steps as usize).min(all.len() - 1)]
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: LogLevel,
    #[serde(default = "default_log_format")]
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

fn default_log_level() -> LogLevel {
    LogLevel::Warn
}
fn default_log_format() -> LogFormat {
    LogFormat::Text
}

/// Read, parse, and validate a config file.
///
/// # Errors
///
/// Fails if the file cannot be read or parsed, or if `import.chunk_size`
/// or `import.inference_sample_size` is zero.
pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    if config.import.chunk_size == 0 {
        anyhow::bail!("import.chunk_size must be > 0");
    }
    if config.import.inference_sample_size == 0 {
        anyhow::bail!("import.inference_sample_size must be > 0");
    }

    Ok(config)
}
