//! Configuration management for the study service.
//!
//! Loads configuration from a TOML file and falls back to runtime defaults
//! for anything missing.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{info, warn};

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub general: GeneralConfig,

    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub cache: CacheConfig,

    #[serde(default)]
    pub notifications: NotificationConfig,

    #[serde(default)]
    pub speech: SpeechConfig,

    #[serde(default)]
    pub ocr: OcrConfig,

    #[serde(default)]
    pub video: VideoConfig,

    #[serde(default)]
    pub reminders: ReminderConfig,

    #[serde(default)]
    pub search: SearchConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralConfig {
    /// Log level (trace, debug, info, warn, error), overridden by RUST_LOG
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Unix socket the native host connects to
    #[serde(default = "default_socket_path")]
    pub socket_path: PathBuf,

    /// SQLite database backing the key-value store
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            socket_path: default_socket_path(),
            db_path: default_db_path(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Maximum number of cached generation results
    #[serde(default = "default_cache_capacity")]
    pub capacity: usize,

    /// Seconds before a cached result is treated as a miss
    #[serde(default = "default_cache_ttl")]
    pub ttl_seconds: u64,
}

impl CacheConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_seconds)
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            capacity: default_cache_capacity(),
            ttl_seconds: default_cache_ttl(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationConfig {
    /// Delay before non-progress notifications are cleared
    #[serde(default = "default_dismiss_after")]
    pub dismiss_after_ms: u64,
}

impl NotificationConfig {
    pub fn dismiss_after(&self) -> Duration {
        Duration::from_millis(self.dismiss_after_ms)
    }
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            dismiss_after_ms: default_dismiss_after(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SpeechConfig {
    /// Text-to-speech command (e.g. "espeak" or "say"); TTS is disabled when unset
    #[serde(default)]
    pub command: Option<String>,

    /// Extra arguments placed before the spoken text
    #[serde(default)]
    pub args: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OcrConfig {
    /// Path to the OCR extractor binary
    #[serde(default)]
    pub binary_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VideoConfig {
    /// Transcript proxy endpoint, queried with `?videoId=<id>`
    #[serde(default = "default_transcript_endpoint")]
    pub transcript_endpoint: String,
}

impl Default for VideoConfig {
    fn default() -> Self {
        Self {
            transcript_endpoint: default_transcript_endpoint(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReminderConfig {
    /// Emit the daily study reminder
    #[serde(default = "default_true")]
    pub daily_enabled: bool,

    /// Minutes between attempts to flush the offline sync queue
    #[serde(default = "default_sync_interval")]
    pub sync_interval_minutes: u64,
}

impl Default for ReminderConfig {
    fn default() -> Self {
        Self {
            daily_enabled: true,
            sync_interval_minutes: default_sync_interval(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchConfig {
    /// Results returned by semantic search when the request has no topK
    #[serde(default = "default_top_k")]
    pub default_top_k: usize,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            default_top_k: default_top_k(),
        }
    }
}

// Default value functions for serde
fn default_true() -> bool {
    true
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_socket_path() -> PathBuf {
    PathBuf::from("/tmp/study-service.sock")
}

fn default_db_path() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("study-service")
        .join("study.db")
}

fn default_cache_capacity() -> usize {
    10
}

fn default_cache_ttl() -> u64 {
    60 * 60
}

fn default_dismiss_after() -> u64 {
    3000
}

fn default_transcript_endpoint() -> String {
    "https://youtube-transcript-api.vercel.app/".to_string()
}

fn default_sync_interval() -> u64 {
    30
}

fn default_top_k() -> usize {
    5
}

impl Config {
    /// Load configuration from the default path
    pub fn load() -> Self {
        Self::load_from_path(Self::default_config_path())
    }

    /// Load configuration from a specific path
    pub fn load_from_path(path: PathBuf) -> Self {
        match std::fs::read_to_string(&path) {
            Ok(contents) => match toml::from_str(&contents) {
                Ok(config) => {
                    info!("Loaded configuration from {:?}", path);
                    config
                }
                Err(e) => {
                    warn!("Failed to parse config file: {}, using defaults", e);
                    Self::default()
                }
            },
            Err(_) => {
                info!("No config file found at {:?}, using defaults", path);
                Self::default()
            }
        }
    }

    /// Get the default configuration file path
    pub fn default_config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("study-service")
            .join("config.toml")
    }

    /// Save configuration to a specific path
    pub fn save_to_path(&self, path: PathBuf) -> std::io::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let contents = toml::to_string_pretty(self).map_err(|e| {
            std::io::Error::new(std::io::ErrorKind::InvalidData, e.to_string())
        })?;

        std::fs::write(&path, contents)?;
        info!("Saved configuration to {:?}", path);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.cache.capacity, 10);
        assert_eq!(config.cache.ttl(), Duration::from_secs(3600));
        assert_eq!(config.notifications.dismiss_after(), Duration::from_secs(3));
        assert!(config.speech.command.is_none());
    }

    #[test]
    fn test_parse_toml() {
        let toml_str = r#"
[general]
log_level = "debug"

[cache]
capacity = 4

[speech]
command = "espeak"
args = ["-s", "150"]
"#;

        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.general.log_level, "debug");
        assert_eq!(config.cache.capacity, 4);
        assert_eq!(config.cache.ttl_seconds, 3600);
        assert_eq!(config.speech.command.as_deref(), Some("espeak"));
        assert_eq!(config.speech.args, vec!["-s", "150"]);
        assert_eq!(config.reminders.sync_interval_minutes, 30);
    }

    #[test]
    fn test_save_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let mut config = Config::default();
        config.search.default_top_k = 7;
        config.save_to_path(path.clone()).unwrap();

        let loaded = Config::load_from_path(path);
        assert_eq!(loaded.search.default_top_k, 7);
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load_from_path(dir.path().join("absent.toml"));
        assert_eq!(config.cache.capacity, 10);
    }
}
