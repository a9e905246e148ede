use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::warn;

use crate::app_dirs::AppDirs;
use crate::error::ConfigError;

/// Engine-wide typing defaults that session overrides are merged onto
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TypingConfig {
    pub base_wpm: f64,
    pub wpm_variance: f64,
    pub typo_probability: f64,
    pub typo_correction_probability: f64,
    pub thinking_pause_probability: f64,
    /// seconds
    pub thinking_pause_min: f64,
    /// seconds
    pub thinking_pause_max: f64,
    pub fatigue_factor: f64,
    pub bigram_acceleration: bool,
    pub bigram_factor: f64,
    pub thinking_pauses_enabled: bool,
}

impl Default for TypingConfig {
    fn default() -> Self {
        Self {
            base_wpm: 85.0,
            wpm_variance: 0.2,
            typo_probability: 0.02,
            typo_correction_probability: 0.95,
            thinking_pause_probability: 0.10,
            thinking_pause_min: 3.0,
            thinking_pause_max: 8.0,
            fatigue_factor: 0.0005,
            bigram_acceleration: true,
            bigram_factor: 0.6,
            thinking_pauses_enabled: true,
        }
    }
}

/// Ceilings for the numeric knobs without a natural upper limit. Every
/// delay derived from values below them fits in a `Duration`.
pub const MAX_BASE_WPM: f64 = 2_000.0;
pub const MAX_WPM_VARIANCE: f64 = 10.0;
pub const MAX_FATIGUE_FACTOR: f64 = 1.0;
pub const MAX_BIGRAM_FACTOR: f64 = 10.0;
pub const MAX_THINKING_PAUSE_SECS: f64 = 3_600.0;

/// Accepted values of one numeric knob
#[derive(Debug, Clone, Copy, PartialEq)]
enum Bound {
    Probability,
    Positive { max: f64 },
    NonNegative { max: f64 },
}

impl Bound {
    fn of(field: &str) -> Self {
        match field {
            "base_wpm" => Bound::Positive { max: MAX_BASE_WPM },
            "bigram_factor" => Bound::Positive {
                max: MAX_BIGRAM_FACTOR,
            },
            "wpm_variance" => Bound::NonNegative {
                max: MAX_WPM_VARIANCE,
            },
            "fatigue_factor" => Bound::NonNegative {
                max: MAX_FATIGUE_FACTOR,
            },
            "thinking_pause_min" | "thinking_pause_max" => Bound::NonNegative {
                max: MAX_THINKING_PAUSE_SECS,
            },
            _ => Bound::Probability,
        }
    }
}

/// Check a single numeric knob by name
pub(crate) fn check_knob(field: &'static str, value: f64) -> Result<(), ConfigError> {
    if value.is_nan() {
        return Err(ConfigError::NotFinite { field, value });
    }
    match Bound::of(field) {
        Bound::Probability if !(0.0..=1.0).contains(&value) => {
            Err(ConfigError::Probability { field, value })
        }
        Bound::Positive { .. } if value <= 0.0 => Err(ConfigError::NotPositive { field, value }),
        Bound::NonNegative { .. } if value < 0.0 => Err(ConfigError::Negative { field, value }),
        _ if value.is_infinite() => Err(ConfigError::NotFinite { field, value }),
        Bound::Positive { max } | Bound::NonNegative { max } if value > max => {
            Err(ConfigError::TooLarge { field, value, max })
        }
        _ => Ok(()),
    }
}

impl TypingConfig {
    /// Numeric knobs by name, in reporting order
    fn knobs(&self) -> [(&'static str, f64); 9] {
        [
            ("base_wpm", self.base_wpm),
            ("wpm_variance", self.wpm_variance),
            ("typo_probability", self.typo_probability),
            ("typo_correction_probability", self.typo_correction_probability),
            ("thinking_pause_probability", self.thinking_pause_probability),
            ("thinking_pause_min", self.thinking_pause_min),
            ("thinking_pause_max", self.thinking_pause_max),
            ("fatigue_factor", self.fatigue_factor),
            ("bigram_factor", self.bigram_factor),
        ]
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        for (field, value) in self.knobs() {
            check_knob(field, value)?;
        }

        if self.thinking_pause_max < self.thinking_pause_min {
            return Err(ConfigError::PauseRange {
                min: self.thinking_pause_min,
                max: self.thinking_pause_max,
            });
        }

        Ok(())
    }
}

/// Editor-facing knobs of the replay engine
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EngineSettings {
    /// extra attempts after the first failed open
    pub file_open_retries: u32,
    pub file_open_backoff_ms: u64,
    /// wait after moving the caret before typing an insert
    pub insert_settle_ms: u64,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            file_open_retries: 1,
            file_open_backoff_ms: 500,
            insert_settle_ms: 100,
        }
    }
}

impl EngineSettings {
    pub fn file_open_backoff(&self) -> Duration {
        Duration::from_millis(self.file_open_backoff_ms)
    }

    pub fn insert_settle(&self) -> Duration {
        Duration::from_millis(self.insert_settle_ms)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    pub typing: TypingConfig,
    pub engine: EngineSettings,
}

pub trait ConfigStore {
    fn load(&self) -> Config;
    fn save(&self, cfg: &Config) -> std::io::Result<()>;
}

#[derive(Debug, Clone)]
pub struct FileConfigStore {
    path: PathBuf,
}

impl FileConfigStore {
    #[allow(clippy::new_without_default)]
    pub fn new() -> Self {
        let path = AppDirs::config_path().unwrap_or_else(|| PathBuf::from("retype_config.json"));
        Self { path }
    }

    pub fn with_path<P: AsRef<Path>>(p: P) -> Self {
        Self {
            path: p.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Default for FileConfigStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigStore for FileConfigStore {
    /// Missing, unreadable or invalid files fall back to defaults
    fn load(&self) -> Config {
        let Ok(bytes) = fs::read(&self.path) else {
            return Config::default();
        };

        match serde_json::from_slice::<Config>(&bytes) {
            Ok(cfg) => match cfg.typing.validate() {
                Ok(()) => cfg,
                Err(err) => {
                    warn!(path = %self.path.display(), %err, "ignoring invalid typing config");
                    Config::default()
                }
            },
            Err(err) => {
                warn!(path = %self.path.display(), %err, "ignoring unparsable config");
                Config::default()
            }
        }
    }

    fn save(&self, cfg: &Config) -> std::io::Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let data = serde_json::to_vec_pretty(cfg).unwrap_or_default();
        fs::write(&self.path, data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use tempfile::tempdir;

    #[test]
    fn roundtrip_default_config() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.json");
        let store = FileConfigStore::with_path(&path);
        let cfg = Config::default();
        store.save(&cfg).unwrap();
        let loaded = store.load();
        assert_eq!(cfg, loaded);
    }

    #[test]
    fn save_and_load_custom_config() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("config.json");
        let store = FileConfigStore::with_path(&path);
        let cfg = Config {
            typing: TypingConfig {
                base_wpm: 110.0,
                typo_probability: 0.0,
                thinking_pauses_enabled: false,
                ..TypingConfig::default()
            },
            engine: EngineSettings {
                file_open_retries: 3,
                ..EngineSettings::default()
            },
        };
        store.save(&cfg).unwrap();
        assert_eq!(store.load(), cfg);
    }

    #[test]
    fn partial_file_fills_in_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, r#"{"typing": {"base_wpm": 40}}"#).unwrap();
        let loaded = FileConfigStore::with_path(&path).load();
        assert_eq!(loaded.typing.base_wpm, 40.0);
        assert_eq!(loaded.typing.typo_probability, 0.02);
        assert_eq!(loaded.engine, EngineSettings::default());
    }

    #[test]
    fn invalid_file_falls_back_to_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, r#"{"typing": {"typo_probability": 3.0}}"#).unwrap();
        assert_eq!(FileConfigStore::with_path(&path).load(), Config::default());

        fs::write(&path, "not json").unwrap();
        assert_eq!(FileConfigStore::with_path(&path).load(), Config::default());
    }

    #[test]
    fn validate_rejects_out_of_range_values() {
        let cfg = TypingConfig {
            base_wpm: 0.0,
            ..TypingConfig::default()
        };
        assert_matches!(
            cfg.validate(),
            Err(ConfigError::NotPositive { field: "base_wpm", .. })
        );

        let cfg = TypingConfig {
            typo_correction_probability: -0.1,
            ..TypingConfig::default()
        };
        assert_matches!(
            cfg.validate(),
            Err(ConfigError::Probability {
                field: "typo_correction_probability",
                ..
            })
        );

        let cfg = TypingConfig {
            thinking_pause_min: 5.0,
            thinking_pause_max: 2.0,
            ..TypingConfig::default()
        };
        assert_matches!(cfg.validate(), Err(ConfigError::PauseRange { .. }));

        assert!(TypingConfig::default().validate().is_ok());
    }

    #[test]
    fn validate_rejects_values_that_overflow_delays() {
        let cfg = TypingConfig {
            thinking_pause_probability: 1.0,
            thinking_pause_min: 1e20,
            thinking_pause_max: 1e20,
            ..TypingConfig::default()
        };
        assert_matches!(
            cfg.validate(),
            Err(ConfigError::TooLarge {
                field: "thinking_pause_min",
                ..
            })
        );

        let cfg = TypingConfig {
            thinking_pause_max: f64::INFINITY,
            ..TypingConfig::default()
        };
        assert_matches!(
            cfg.validate(),
            Err(ConfigError::NotFinite {
                field: "thinking_pause_max",
                ..
            })
        );

        let cfg = TypingConfig {
            wpm_variance: f64::NAN,
            ..TypingConfig::default()
        };
        assert_matches!(
            cfg.validate(),
            Err(ConfigError::NotFinite {
                field: "wpm_variance",
                ..
            })
        );

        let cfg = TypingConfig {
            base_wpm: MAX_BASE_WPM * 2.0,
            ..TypingConfig::default()
        };
        assert_matches!(
            cfg.validate(),
            Err(ConfigError::TooLarge { field: "base_wpm", .. })
        );

        let cfg = TypingConfig {
            thinking_pause_min: MAX_THINKING_PAUSE_SECS,
            thinking_pause_max: MAX_THINKING_PAUSE_SECS,
            fatigue_factor: MAX_FATIGUE_FACTOR,
            ..TypingConfig::default()
        };
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn knob_reasons_omit_the_field() {
        let err = check_knob("bigram_factor", -1.0).unwrap_err();
        assert_eq!(err.to_string(), "bigram_factor must be positive, got -1");
        assert_eq!(err.reason(), "must be positive, got -1");
    }
}
