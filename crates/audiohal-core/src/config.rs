//! Layer configuration
//!
//! Loaded from a YAML file (default: `<config_dir>/audiohal/config.yaml`).
//! Every field has a default, so a partial or missing file is fine.
//!
//! ```yaml
//! log_level: debug
//! hosts: [ALSA, JACK]
//! default_buffer_count: 3
//! buffer_duration_ms: 20
//! stall_timeout_ms: 2000
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Default number of buffers queued ahead in a session
pub const DEFAULT_BUFFER_COUNT: u32 = 3;

/// Default duration of one exchanged buffer
pub const DEFAULT_BUFFER_DURATION_MS: u32 = 20;

/// Default time a backend may go without moving data
pub const DEFAULT_STALL_TIMEOUT_MS: u64 = 2000;

/// Verbosity of the layer's internal diagnostics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Off,
    Error,
    Warn,
    #[default]
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    /// Map onto the `log` crate's filter
    pub fn to_level_filter(self) -> log::LevelFilter {
        match self {
            LogLevel::Off => log::LevelFilter::Off,
            LogLevel::Error => log::LevelFilter::Error,
            LogLevel::Warn => log::LevelFilter::Warn,
            LogLevel::Info => log::LevelFilter::Info,
            LogLevel::Debug => log::LevelFilter::Debug,
            LogLevel::Trace => log::LevelFilter::Trace,
        }
    }
}

impl std::str::FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "off" => Ok(LogLevel::Off),
            "error" => Ok(LogLevel::Error),
            "warn" | "warning" => Ok(LogLevel::Warn),
            "info" => Ok(LogLevel::Info),
            "debug" => Ok(LogLevel::Debug),
            "trace" => Ok(LogLevel::Trace),
            other => Err(format!("unknown log level '{}'", other)),
        }
    }
}

/// Complete layer configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HalConfig {
    /// Verbosity applied when the context initializes
    pub log_level: LogLevel,
    /// Restrict enumeration to these host names (e.g. "ALSA", "JACK").
    /// `None` queries every available host.
    pub hosts: Option<Vec<String>>,
    /// Buffer depth used when a request asks for 0 buffers
    pub default_buffer_count: u32,
    /// Duration of one exchanged buffer in milliseconds
    pub buffer_duration_ms: u32,
    /// How long a native stream may go without moving data before the
    /// session fails
    pub stall_timeout_ms: u64,
}

impl Default for HalConfig {
    fn default() -> Self {
        Self {
            log_level: LogLevel::default(),
            hosts: None,
            default_buffer_count: DEFAULT_BUFFER_COUNT,
            buffer_duration_ms: DEFAULT_BUFFER_DURATION_MS,
            stall_timeout_ms: DEFAULT_STALL_TIMEOUT_MS,
        }
    }
}

impl HalConfig {
    /// Set the log level
    pub fn with_log_level(mut self, level: LogLevel) -> Self {
        self.log_level = level;
        self
    }

    /// Restrict enumeration to the named hosts
    pub fn with_hosts(mut self, hosts: Vec<String>) -> Self {
        self.hosts = Some(hosts);
        self
    }

    /// Set the buffer duration
    pub fn with_buffer_duration_ms(mut self, ms: u32) -> Self {
        self.buffer_duration_ms = ms;
        self
    }

    /// Set the default buffer depth
    pub fn with_default_buffer_count(mut self, count: u32) -> Self {
        self.default_buffer_count = count;
        self
    }

    pub fn buffer_duration(&self) -> Duration {
        Duration::from_millis(u64::from(self.buffer_duration_ms.max(1)))
    }

    pub fn stall_timeout(&self) -> Duration {
        Duration::from_millis(self.stall_timeout_ms.max(1))
    }

    /// Whether a host with this display name should be queried
    pub fn host_enabled(&self, host: &str) -> bool {
        match &self.hosts {
            Some(hosts) => hosts.iter().any(|h| h.eq_ignore_ascii_case(host)),
            None => true,
        }
    }
}

/// Default config file location
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("audiohal")
        .join("config.yaml")
}

/// Load configuration from a YAML file
///
/// If the file doesn't exist, returns the default config.
/// If the file exists but is invalid, logs a warning and returns the default config.
pub fn load_config(path: &Path) -> HalConfig {
    log::info!("load_config: Loading from {:?}", path);

    if !path.exists() {
        log::info!("load_config: Config file doesn't exist, using defaults");
        return HalConfig::default();
    }

    match std::fs::read_to_string(path) {
        Ok(contents) => match serde_yaml::from_str::<HalConfig>(&contents) {
            Ok(config) => {
                log::info!(
                    "load_config: log_level={:?}, hosts={:?}, {} buffers of {}ms",
                    config.log_level,
                    config.hosts,
                    config.default_buffer_count,
                    config.buffer_duration_ms
                );
                config
            }
            Err(e) => {
                log::warn!("load_config: Failed to parse config: {}", e);
                HalConfig::default()
            }
        },
        Err(e) => {
            log::warn!("load_config: Failed to read config file: {}", e);
            HalConfig::default()
        }
    }
}

/// Save configuration to a YAML file, creating parent directories
pub fn save_config(config: &HalConfig, path: &Path) -> anyhow::Result<()> {
    use anyhow::Context;

    log::info!("save_config: Saving to {:?}", path);

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create config directory: {:?}", parent))?;
    }

    let yaml = serde_yaml::to_string(config).context("Failed to serialize config to YAML")?;

    std::fs::write(path, yaml)
        .with_context(|| format!("Failed to write config file: {:?}", path))?;

    log::info!("save_config: Config saved successfully");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = load_config(&dir.path().join("nope.yaml"));
        assert_eq!(config, HalConfig::default());
        assert_eq!(config.default_buffer_count, DEFAULT_BUFFER_COUNT);
    }

    #[test]
    fn test_save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.yaml");
        let config = HalConfig::default()
            .with_log_level(LogLevel::Trace)
            .with_hosts(vec!["ALSA".to_string()])
            .with_buffer_duration_ms(10);

        save_config(&config, &path).unwrap();
        assert_eq!(load_config(&path), config);
    }

    #[test]
    fn test_partial_yaml_fills_defaults() {
        let config: HalConfig = serde_yaml::from_str("log_level: debug\n").unwrap();
        assert_eq!(config.log_level, LogLevel::Debug);
        assert_eq!(config.buffer_duration_ms, DEFAULT_BUFFER_DURATION_MS);
        assert!(config.hosts.is_none());
    }

    #[test]
    fn test_invalid_yaml_falls_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        std::fs::write(&path, "log_level: [not, a, level]").unwrap();
        assert_eq!(load_config(&path), HalConfig::default());
    }

    #[test]
    fn test_host_filter() {
        let config = HalConfig::default().with_hosts(vec!["jack".to_string()]);
        assert!(config.host_enabled("JACK"));
        assert!(!config.host_enabled("ALSA"));
        assert!(HalConfig::default().host_enabled("ALSA"));
    }

    #[test]
    fn test_log_level_parse() {
        assert_eq!("WARNING".parse::<LogLevel>(), Ok(LogLevel::Warn));
        assert!("loud".parse::<LogLevel>().is_err());
        assert_eq!(LogLevel::Off.to_level_filter(), log::LevelFilter::Off);
    }
}
