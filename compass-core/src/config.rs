//! Configuration file management for poi-compass.
//!
//! Reads/writes `~/.poi-compass/config.yaml` with search, cache, navigation,
//! position-source and server settings. Every field has a default, so a
//! partial file only overrides what it names.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::overpass::{DEFAULT_POI_NAME, DEFAULT_RADIUS_M};
use crate::types::CompassError;

/// Full configuration structure.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub search: SearchConfig,
    pub cache: CacheConfig,
    pub navigation: NavigationConfig,
    pub position: PositionConfig,
    pub server: ServerConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    pub endpoint: String,
    pub name: String,
    pub radius_m: u32,
    pub timeout_sec: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub path: String,
    pub ttl_ms: u64,
}

/// Re-locate policy and heading thresholds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NavigationConfig {
    /// Re-locate when the last successful fetch is older than this.
    pub refresh_interval_ms: u64,
    /// Re-locate when the target is farther than this from the observer.
    pub refresh_distance_m: f64,
    /// Course-over-ground is only recomputed above this displacement.
    pub min_course_displacement_m: f64,
}

/// Settings handed to the position source client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PositionConfig {
    pub high_accuracy: bool,
    pub max_age_ms: u64,
    pub timeout_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for SearchConfig {
    fn default() -> Self {
        SearchConfig {
            endpoint: "https://overpass-api.de/api/interpreter".into(),
            name: DEFAULT_POI_NAME.into(),
            radius_m: DEFAULT_RADIUS_M,
            timeout_sec: 15,
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        CacheConfig {
            path: "data/compass.db".into(),
            ttl_ms: 300_000,
        }
    }
}

impl Default for NavigationConfig {
    fn default() -> Self {
        NavigationConfig {
            refresh_interval_ms: 180_000,
            refresh_distance_m: 500.0,
            min_course_displacement_m: crate::heading::MIN_COURSE_DISPLACEMENT_M,
        }
    }
}

impl Default for PositionConfig {
    fn default() -> Self {
        PositionConfig {
            high_accuracy: true,
            max_age_ms: 1_000,
            timeout_ms: 10_000,
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            host: "127.0.0.1".into(),
            port: 8080,
        }
    }
}

/// Get the config directory path (`~/.poi-compass/`).
pub fn config_dir() -> PathBuf {
    dirs_home().join(".poi-compass")
}

/// Get the config file path.
pub fn config_file() -> PathBuf {
    config_dir().join("config.yaml")
}

fn dirs_home() -> PathBuf {
    std::env::var("HOME")
        .or_else(|_| std::env::var("USERPROFILE"))
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("."))
}

/// Load config from `~/.poi-compass/config.yaml`.
///
/// Returns default config if the file doesn't exist or can't be parsed.
pub fn load_config() -> Config {
    let path = config_file();
    if !path.exists() {
        return Config::default();
    }

    let text = match std::fs::read_to_string(&path) {
        Ok(t) => t,
        Err(_) => return Config::default(),
    };

    parse_config(&text).unwrap_or_default()
}

/// Save config to `~/.poi-compass/config.yaml`.
pub fn save_config(config: &Config) -> Result<PathBuf, CompassError> {
    let dir = config_dir();
    std::fs::create_dir_all(&dir)?;

    let path = config_file();
    let text = serialize_config(config)?;
    std::fs::write(&path, text)?;

    Ok(path)
}

/// Parse YAML config text. Missing sections and keys take defaults.
pub fn parse_config(text: &str) -> Result<Config, CompassError> {
    if text.trim().is_empty() {
        return Ok(Config::default());
    }
    serde_yaml::from_str(text).map_err(|e| CompassError::Config(e.to_string()))
}

/// Serialize config to YAML text with a header comment.
pub fn serialize_config(config: &Config) -> Result<String, CompassError> {
    let body = serde_yaml::to_string(config).map_err(|e| CompassError::Config(e.to_string()))?;
    Ok(format!("# poi-compass configuration\n\n{body}"))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
