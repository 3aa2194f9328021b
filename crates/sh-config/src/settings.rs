//! Runtime settings from `smarthome.yaml`
//!
//! The file is optional and every field has a default. Environment
//! variables override file values, and relative directories are resolved
//! against the config directory.

use serde::{Deserialize, Serialize};
use serde_yaml::Value;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::error::{ConfigError, ConfigResult};
use crate::loader::YamlLoader;

/// Name of the settings file inside the config directory
pub const SETTINGS_FILE: &str = "smarthome.yaml";

/// Top-level settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SmartHomeConfig {
    /// Location and directories
    pub smarthome: CoreSettings,
    /// Worker pool and loop timing
    pub scheduler: SchedulerSettings,
    pub logging: LoggingConfig,
}

/// The `smarthome:` section
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CoreSettings {
    pub name: String,
    /// Latitude in degrees, north positive
    pub latitude: Option<f64>,
    /// Longitude in degrees, east positive
    pub longitude: Option<f64>,
    /// Observer elevation in metres
    pub elevation: f64,
    /// Directory holding one cache file per cached item
    pub cache_dir: PathBuf,
    /// Directory logic filenames are resolved against
    pub logics_dir: PathBuf,
}

impl Default for CoreSettings {
    fn default() -> Self {
        Self {
            name: "SmartHome".to_string(),
            latitude: None,
            longitude: None,
            elevation: 0.0,
            cache_dir: PathBuf::from("var/cache"),
            logics_dir: PathBuf::from("logics"),
        }
    }
}

impl CoreSettings {
    /// Configured observer location, if both coordinates are set
    pub fn location(&self) -> Option<(f64, f64)> {
        Some((self.latitude?, self.longitude?))
    }
}

/// The `scheduler:` section
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerSettings {
    /// Worker threads started with the scheduler
    pub workers: usize,
    /// Hard cap for worker growth
    pub max_workers: usize,
    /// Minimum seconds between two worker additions
    pub worker_growth_interval: u64,
    /// Scheduler loop tick in milliseconds
    pub tick_ms: u64,
    /// Seconds to wait for threads on shutdown
    pub stop_timeout: u64,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            workers: 5,
            max_workers: 20,
            worker_growth_interval: 60,
            tick_ms: 500,
            stop_timeout: 5,
        }
    }
}

/// The `logging:` section
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Filter directive in `RUST_LOG` syntax
    pub filter: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "info".to_string(),
        }
    }
}

impl SmartHomeConfig {
    /// Load settings from a config directory, then apply env overrides
    pub fn load(config_dir: impl AsRef<Path>) -> ConfigResult<Self> {
        let config_dir = config_dir.as_ref();
        let mut loader = YamlLoader::new(config_dir)?;
        let mut config = match loader.load_optional(SETTINGS_FILE)? {
            Some(yaml) => Self::from_yaml(yaml)?,
            None => {
                debug!(dir = %config_dir.display(), "No {} found, using defaults", SETTINGS_FILE);
                Self::default()
            }
        };
        config.apply_env_overrides();
        config.resolve_dirs(config_dir);
        config.validate()?;
        Ok(config)
    }

    /// Parse settings from an already loaded YAML document
    pub fn from_yaml(yaml: Value) -> ConfigResult<Self> {
        if yaml.is_null() {
            return Ok(Self::default());
        }
        serde_yaml::from_value(yaml).map_err(|e| ConfigError::InvalidValue {
            key: SETTINGS_FILE.to_string(),
            reason: e.to_string(),
        })
    }

    fn apply_env_overrides(&mut self) {
        if let Some(lat) = env_parse("SMARTHOME_LATITUDE") {
            self.smarthome.latitude = Some(lat);
        }
        if let Some(lon) = env_parse("SMARTHOME_LONGITUDE") {
            self.smarthome.longitude = Some(lon);
        }
        if let Ok(dir) = std::env::var("SMARTHOME_CACHE_DIR") {
            self.smarthome.cache_dir = PathBuf::from(dir);
        }
        if let Some(workers) = env_parse("SMARTHOME_WORKERS") {
            self.scheduler.workers = workers;
        }
        if let Ok(filter) = std::env::var("RUST_LOG") {
            self.logging.filter = filter;
        }
    }

    fn resolve_dirs(&mut self, config_dir: &Path) {
        for dir in [
            &mut self.smarthome.cache_dir,
            &mut self.smarthome.logics_dir,
        ] {
            if dir.is_relative() {
                *dir = config_dir.join(&*dir);
            }
        }
    }

    fn validate(&self) -> ConfigResult<()> {
        let sched = &self.scheduler;
        if sched.workers == 0 {
            return Err(ConfigError::InvalidValue {
                key: "scheduler.workers".to_string(),
                reason: "at least one worker is required".to_string(),
            });
        }
        if sched.max_workers < sched.workers {
            return Err(ConfigError::InvalidValue {
                key: "scheduler.max_workers".to_string(),
                reason: format!("must be >= workers ({})", sched.workers),
            });
        }
        if sched.tick_ms == 0 {
            return Err(ConfigError::InvalidValue {
                key: "scheduler.tick_ms".to_string(),
                reason: "tick must be positive".to_string(),
            });
        }
        if let Some(lat) = self.smarthome.latitude {
            if !(-90.0..=90.0).contains(&lat) {
                return Err(ConfigError::InvalidValue {
                    key: "smarthome.latitude".to_string(),
                    reason: format!("{lat} is outside -90..90"),
                });
            }
        }
        Ok(())
    }
}

fn env_parse<T: std::str::FromStr>(var: &str) -> Option<T> {
    std::env::var(var).ok()?.trim().parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let config = SmartHomeConfig::default();
        assert_eq!(config.scheduler.workers, 5);
        assert_eq!(config.scheduler.max_workers, 20);
        assert_eq!(config.scheduler.worker_growth_interval, 60);
        assert_eq!(config.scheduler.tick_ms, 500);
        assert_eq!(config.smarthome.location(), None);
    }

    #[test]
    fn test_parse_sections() {
        let yaml: Value = serde_yaml::from_str(
            r#"
smarthome:
  name: Test Home
  latitude: 52.52
  longitude: 13.40
  elevation: 34
scheduler:
  workers: 3
  tick_ms: 250
logging:
  filter: debug
"#,
        )
        .unwrap();

        let config = SmartHomeConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.smarthome.name, "Test Home");
        assert_eq!(config.smarthome.location(), Some((52.52, 13.40)));
        assert_eq!(config.smarthome.elevation, 34.0);
        assert_eq!(config.scheduler.workers, 3);
        assert_eq!(config.scheduler.max_workers, 20);
        assert_eq!(config.scheduler.tick_ms, 250);
        assert_eq!(config.logging.filter, "debug");
    }

    #[test]
    fn test_load_resolves_dirs() {
        let dir = TempDir::new().unwrap();
        std::fs::write(
            dir.path().join(SETTINGS_FILE),
            "smarthome:\n  cache_dir: cache\n",
        )
        .unwrap();

        let config = SmartHomeConfig::load(dir.path()).unwrap();
        assert_eq!(config.smarthome.cache_dir, dir.path().join("cache"));
        assert_eq!(config.smarthome.logics_dir, dir.path().join("logics"));
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let dir = TempDir::new().unwrap();
        let config = SmartHomeConfig::load(dir.path()).unwrap();
        assert_eq!(config.smarthome.name, "SmartHome");
    }

    #[test]
    fn test_validation_rejects_cap_below_workers() {
        let dir = TempDir::new().unwrap();
        std::fs::write(
            dir.path().join(SETTINGS_FILE),
            "scheduler:\n  workers: 8\n  max_workers: 4\n",
        )
        .unwrap();
        let result = SmartHomeConfig::load(dir.path());
        assert!(matches!(result, Err(ConfigError::InvalidValue { .. })));
    }
}
