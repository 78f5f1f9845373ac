//! Core configuration structures and loading logic

use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

/// Error type for configuration operations
#[derive(Debug)]
pub enum ConfigError {
    /// IO error reading or writing the settings file
    Io(std::io::Error),
    /// TOML parsing error
    Parse(toml::de::Error),
    /// TOML serialization error
    Serialize(toml::ser::Error),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(e) => write!(f, "Failed to access settings file: {}", e),
            ConfigError::Parse(e) => write!(f, "Failed to parse settings: {}", e),
            ConfigError::Serialize(e) => write!(f, "Failed to serialize settings: {}", e),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<std::io::Error> for ConfigError {
    fn from(e: std::io::Error) -> Self {
        ConfigError::Io(e)
    }
}

impl From<toml::de::Error> for ConfigError {
    fn from(e: toml::de::Error) -> Self {
        ConfigError::Parse(e)
    }
}

impl From<toml::ser::Error> for ConfigError {
    fn from(e: toml::ser::Error) -> Self {
        ConfigError::Serialize(e)
    }
}

/// Host platform key used to store per-machine values in one settings file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HostPlatform {
    #[serde(rename = "win")]
    Windows,
    #[serde(rename = "nix")]
    Unix,
    #[serde(rename = "mac")]
    Mac,
}

impl HostPlatform {
    /// Platform of the running process
    pub fn current() -> Self {
        if cfg!(windows) {
            HostPlatform::Windows
        } else if cfg!(target_os = "macos") {
            HostPlatform::Mac
        } else {
            HostPlatform::Unix
        }
    }

    /// Key used for this platform in the settings file
    pub fn key(&self) -> &'static str {
        match self {
            HostPlatform::Windows => "win",
            HostPlatform::Unix => "nix",
            HostPlatform::Mac => "mac",
        }
    }
}

/// One value per host platform
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PlatformValues<T> {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub win: Option<T>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nix: Option<T>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mac: Option<T>,
}

impl<T> Default for PlatformValues<T> {
    fn default() -> Self {
        Self {
            win: None,
            nix: None,
            mac: None,
        }
    }
}

impl<T> PlatformValues<T> {
    pub fn get(&self, platform: HostPlatform) -> Option<&T> {
        match platform {
            HostPlatform::Windows => self.win.as_ref(),
            HostPlatform::Unix => self.nix.as_ref(),
            HostPlatform::Mac => self.mac.as_ref(),
        }
    }

    pub fn set(&mut self, platform: HostPlatform, value: Option<T>) {
        match platform {
            HostPlatform::Windows => self.win = value,
            HostPlatform::Unix => self.nix = value,
            HostPlatform::Mac => self.mac = value,
        }
    }
}

/// Directory settings, each keyed by platform
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct DirectoriesConfig {
    #[serde(default)]
    pub source: PlatformValues<String>,
    #[serde(default)]
    pub archive: PlatformValues<String>,
    #[serde(default)]
    pub destination: PlatformValues<String>,
}

/// Worker pool configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct PoolConfig {
    /// Number of concurrent transcoder workers (0 = platform default)
    #[serde(default)]
    pub workers: u32,
}

/// Transcoder output preset
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Preset {
    /// Matroska output
    #[default]
    Standard,
    /// MP4 output
    Alternate,
}

impl std::str::FromStr for Preset {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "standard" => Ok(Preset::Standard),
            "alternate" => Ok(Preset::Alternate),
            other => Err(format!("unknown preset '{}'", other)),
        }
    }
}

/// Transcoder configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct TranscoderConfig {
    /// Transcoder binary (platform default when unset)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub binary: Option<String>,
    /// Output preset
    #[serde(default)]
    pub preset: Preset,
}

/// Main configuration structure, persisted as the settings file
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct Config {
    #[serde(default)]
    pub pool: PoolConfig,
    #[serde(default)]
    pub transcoder: TranscoderConfig,
    #[serde(default)]
    pub directories: DirectoriesConfig,
    /// Persisted throughput estimate in GB/hour
    #[serde(default)]
    pub speed: PlatformValues<f64>,
}

/// Settings resolved for one platform
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Settings {
    pub source_dir: Option<PathBuf>,
    pub archive_dir: Option<PathBuf>,
    pub destination_dir: Option<PathBuf>,
    /// Throughput estimate in GB/hour
    pub speed_estimate: Option<f64>,
}

fn non_empty(value: Option<&String>) -> Option<PathBuf> {
    value
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .map(PathBuf::from)
}

fn path_string(value: &Option<PathBuf>) -> Option<String> {
    value.as_ref().map(|p| p.to_string_lossy().into_owned())
}

/// Round a GB/hour estimate to one decimal place for storage
pub fn round_speed(speed: f64) -> f64 {
    (speed * 10.0).round() / 10.0
}

impl Config {
    /// Load configuration from a TOML file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)?;
        Self::parse_toml(&content)
    }

    /// Parse configuration from a TOML string
    pub fn parse_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(content)?;
        Ok(config)
    }

    /// Load configuration from file and apply environment overrides
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let mut config = Self::load_from_file(path)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Load the settings file, writing an empty one first if it does not exist
    pub fn load_or_create<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if !path.exists() {
            Config::default().save(path)?;
        }
        Self::load(path)
    }

    /// Write the configuration to a TOML file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let content = toml::to_string_pretty(self)?;
        fs::write(path, content)?;
        Ok(())
    }

    /// Settings for the given platform; empty strings and zero speed read as unset
    pub fn settings(&self, platform: HostPlatform) -> Settings {
        Settings {
            source_dir: non_empty(self.directories.source.get(platform)),
            archive_dir: non_empty(self.directories.archive.get(platform)),
            destination_dir: non_empty(self.directories.destination.get(platform)),
            speed_estimate: self
                .speed
                .get(platform)
                .copied()
                .filter(|s| *s > 0.0)
                .map(round_speed),
        }
    }

    /// Store settings for the given platform, leaving other platforms untouched
    pub fn record_settings(&mut self, platform: HostPlatform, settings: &Settings) {
        self.directories
            .source
            .set(platform, path_string(&settings.source_dir));
        self.directories
            .archive
            .set(platform, path_string(&settings.archive_dir));
        self.directories
            .destination
            .set(platform, path_string(&settings.destination_dir));
        self.speed
            .set(platform, settings.speed_estimate.map(round_speed));
    }

    /// Apply environment variable overrides to the configuration
    ///
    /// Overrides the following values if environment variables are set:
    /// - MANAGEHD_SOURCE_DIR -> directories.source (current platform)
    /// - MANAGEHD_ARCHIVE_DIR -> directories.archive (current platform)
    /// - MANAGEHD_DESTINATION_DIR -> directories.destination (current platform)
    /// - MANAGEHD_WORKERS -> pool.workers
    /// - MANAGEHD_PRESET -> transcoder.preset
    /// - MANAGEHD_TRANSCODER -> transcoder.binary
    pub fn apply_env_overrides(&mut self) {
        let platform = HostPlatform::current();

        if let Ok(val) = env::var("MANAGEHD_SOURCE_DIR") {
            self.directories.source.set(platform, Some(val));
        }

        if let Ok(val) = env::var("MANAGEHD_ARCHIVE_DIR") {
            self.directories.archive.set(platform, Some(val));
        }

        if let Ok(val) = env::var("MANAGEHD_DESTINATION_DIR") {
            self.directories.destination.set(platform, Some(val));
        }

        if let Ok(val) = env::var("MANAGEHD_WORKERS") {
            if let Ok(workers) = val.parse::<u32>() {
                self.pool.workers = workers;
            }
        }

        if let Ok(val) = env::var("MANAGEHD_PRESET") {
            // Invalid value, keep existing
            if let Ok(preset) = val.parse::<Preset>() {
                self.transcoder.preset = preset;
            }
        }

        if let Ok(val) = env::var("MANAGEHD_TRANSCODER") {
            if !val.trim().is_empty() {
                self.transcoder.binary = Some(val);
            }
        }
    }
}
