//! Configuration file support for rkflash.
//!
//! Configuration is loaded from multiple sources with the following priority (highest first):
//! 1. Command-line arguments
//! 2. Environment variables (RKFLASH_*)
//! 3. Local config file (./rkflash.toml)
//! 4. Global config file (~/.config/rkflash/config.toml)
//!
//! `--config PATH` replaces both files.

use directories::ProjectDirs;
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Local configuration file name.
pub const LOCAL_CONFIG_FILE: &str = "rkflash.toml";

/// Device selection and transfer settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct DeviceConfig {
    /// Preferred USB bus number.
    pub bus: Option<u8>,
    /// Preferred USB device address.
    pub address: Option<u8>,
    /// USB transfer timeout in milliseconds.
    pub timeout_ms: Option<u64>,
    /// Keep polling until a device shows up.
    #[serde(default)]
    pub wait: bool,
}

/// Main configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Config {
    /// Device configuration.
    #[serde(default)]
    pub device: DeviceConfig,
}

impl Config {
    /// Load configuration from all available sources.
    pub fn load() -> Self {
        let mut config = Self::default();

        // Load global config
        if let Some(global_path) = Self::global_config_path() {
            if let Some(global_config) = Self::load_from_file(&global_path) {
                debug!("Loaded global config from {}", global_path.display());
                config.merge(global_config);
            }
        }

        // Load local config (overrides global)
        if let Some(local_config) = Self::load_from_file(Path::new(LOCAL_CONFIG_FILE)) {
            debug!("Loaded local config from {LOCAL_CONFIG_FILE}");
            config.merge(local_config);
        }

        config
    }

    /// Load configuration from a specific file path (--config flag).
    pub fn load_from_path(path: &Path) -> Self {
        if let Some(config) = Self::load_from_file(path) {
            debug!("Loaded config from {}", path.display());
            config
        } else {
            warn!(
                "Could not load config from {}, using defaults",
                path.display()
            );
            Self::default()
        }
    }

    /// Load configuration from a specific file.
    fn load_from_file(path: &Path) -> Option<Self> {
        if !path.exists() {
            return None;
        }

        match fs::read_to_string(path) {
            Ok(content) => match toml::from_str(&content) {
                Ok(config) => Some(config),
                Err(e) => {
                    warn!("Failed to parse config file {}: {}", path.display(), e);
                    None
                },
            },
            Err(e) => {
                warn!("Failed to read config file {}: {}", path.display(), e);
                None
            },
        }
    }

    /// Get the global configuration directory.
    pub fn global_config_dir() -> Option<PathBuf> {
        ProjectDirs::from("", "", "rkflash").map(|dirs| dirs.config_dir().to_path_buf())
    }

    /// Get the global configuration file path.
    pub fn global_config_path() -> Option<PathBuf> {
        Self::global_config_dir().map(|dir| dir.join("config.toml"))
    }

    /// Transfer timeout, if configured.
    pub fn timeout(&self) -> Option<Duration> {
        self.device.timeout_ms.map(Duration::from_millis)
    }

    /// Merge another config into this one.
    fn merge(&mut self, other: Self) {
        if other.device.bus.is_some() {
            self.device.bus = other.device.bus;
        }
        if other.device.address.is_some() {
            self.device.address = other.device.address;
        }
        if other.device.timeout_ms.is_some() {
            self.device.timeout_ms = other.device.timeout_ms;
        }
        if other.device.wait {
            self.device.wait = true;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert!(config.device.bus.is_none());
        assert!(config.device.address.is_none());
        assert!(config.device.timeout_ms.is_none());
        assert!(!config.device.wait);
        assert!(config.timeout().is_none());
    }

    #[test]
    fn test_config_merge_overrides() {
        let mut base = Config::default();
        base.device.bus = Some(1);
        base.device.timeout_ms = Some(1000);

        let mut other = Config::default();
        other.device.bus = Some(3);
        other.device.address = Some(7);

        base.merge(other);
        assert_eq!(base.device.bus, Some(3));
        assert_eq!(base.device.address, Some(7));
        assert_eq!(base.device.timeout_ms, Some(1000));
    }

    #[test]
    fn test_config_merge_does_not_overwrite_with_none() {
        let mut base = Config::default();
        base.device.bus = Some(2);
        base.device.address = Some(9);
        base.device.wait = true;

        base.merge(Config::default());

        assert_eq!(base.device.bus, Some(2));
        assert_eq!(base.device.address, Some(9));
        assert!(base.device.wait);
    }

    #[test]
    fn test_config_from_toml() {
        let toml_str = r#"
[device]
bus = 1
address = 12
timeout_ms = 10000
wait = true
"#;
        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.device.bus, Some(1));
        assert_eq!(config.device.address, Some(12));
        assert_eq!(config.timeout(), Some(Duration::from_secs(10)));
        assert!(config.device.wait);
    }

    #[test]
    fn test_config_from_empty_toml() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_config_rejects_out_of_range_bus() {
        assert!(toml::from_str::<Config>("[device]\nbus = 300\n").is_err());
    }

    #[test]
    fn test_config_roundtrip_toml() {
        let mut config = Config::default();
        config.device.bus = Some(4);
        config.device.timeout_ms = Some(2500);

        let serialized = toml::to_string_pretty(&config).unwrap();
        let deserialized: Config = toml::from_str(&serialized).unwrap();
        assert_eq!(deserialized, config);
    }

    #[test]
    fn test_load_from_path_valid() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "[device]\nbus = 2\naddress = 5\n").unwrap();

        let config = Config::load_from_path(&path);
        assert_eq!(config.device.bus, Some(2));
        assert_eq!(config.device.address, Some(5));
    }

    #[test]
    fn test_load_from_path_invalid_falls_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "[device\nbus = ").unwrap();
        assert_eq!(Config::load_from_path(&path), Config::default());
    }

    #[test]
    fn test_load_from_path_nonexistent() {
        let config = Config::load_from_path(Path::new("/nonexistent/path/config.toml"));
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_global_config_path() {
        if let Some(p) = Config::global_config_path() {
            let s = p.to_string_lossy();
            assert!(s.contains("rkflash"));
            assert!(s.ends_with("config.toml"));
        }
    }
}
