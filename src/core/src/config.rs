use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{OptimizeError, Result};

/// Default gzip level for eStargz members (matches the reference encoder).
pub const DEFAULT_COMPRESSION_LEVEL: u32 = 9;

/// Default eStargz chunk size: 4 MiB.
pub const DEFAULT_CHUNK_SIZE: usize = 4 * 1024 * 1024;

/// Optimizer configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OptimizeConfig {
    /// Only optimize the image for this platform (`os/arch[/variant]`)
    pub platform: Option<String>,

    /// Files that must be prefetchable from the optimized image
    pub prioritize: Vec<String>,

    /// Registries reached over plain HTTP
    pub insecure_registries: Vec<String>,

    /// Gzip compression level (0-9)
    pub compression_level: u32,

    /// Chunk size for large regular files, in bytes
    pub chunk_size: usize,

    /// Log level
    pub log_level: LogLevel,
}

impl Default for OptimizeConfig {
    fn default() -> Self {
        Self {
            platform: None,
            prioritize: Vec::new(),
            insecure_registries: Vec::new(),
            compression_level: DEFAULT_COMPRESSION_LEVEL,
            chunk_size: DEFAULT_CHUNK_SIZE,
            log_level: LogLevel::Info,
        }
    }
}

impl OptimizeConfig {
    /// Default config file location (`~/.a3s/stargz.yaml`).
    pub fn default_path() -> Option<PathBuf> {
        dirs::home_dir().map(|h| h.join(".a3s").join("stargz.yaml"))
    }

    /// Load configuration from a YAML file. Values are checked by
    /// [`validate`](Self::validate) once overrides are applied.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            OptimizeError::ConfigError(format!(
                "Failed to read config file {}: {}",
                path.display(),
                e
            ))
        })?;
        let config: Self = serde_yaml::from_str(&content).map_err(|e| {
            OptimizeError::ConfigError(format!(
                "Failed to parse config file {}: {}",
                path.display(),
                e
            ))
        })?;
        Ok(config)
    }

    /// Load from `path` if given, else from the default location if it exists,
    /// else return defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        if let Some(path) = path {
            return Self::from_file(path);
        }
        match Self::default_path() {
            Some(default) if default.exists() => Self::from_file(&default),
            _ => Ok(Self::default()),
        }
    }

    /// Check value ranges.
    pub fn validate(&self) -> Result<()> {
        if self.compression_level > 9 {
            return Err(OptimizeError::ConfigError(format!(
                "compression_level must be between 0 and 9, got {}",
                self.compression_level
            )));
        }
        if self.chunk_size == 0 {
            return Err(OptimizeError::ConfigError(
                "chunk_size must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// Log level
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl From<LogLevel> for tracing::Level {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Debug => tracing::Level::DEBUG,
            LogLevel::Info => tracing::Level::INFO,
            LogLevel::Warn => tracing::Level::WARN,
            LogLevel::Error => tracing::Level::ERROR,
        }
    }
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Debug => write!(f, "debug"),
            Self::Info => write!(f, "info"),
            Self::Warn => write!(f, "warn"),
            Self::Error => write!(f, "error"),
        }
    }
}

impl std::str::FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "debug" => Ok(Self::Debug),
            "info" => Ok(Self::Info),
            "warn" | "warning" => Ok(Self::Warn),
            "error" => Ok(Self::Error),
            _ => Err(format!(
                "unknown log level: '{}' (supported: debug, info, warn, error)",
                s
            )),
        }
    }
}
