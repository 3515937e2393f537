//! TOML-based settings for a catcher.
//!
//! Everything here is optional; an empty file yields the defaults. Settings
//! only carry plain data. Loopers and callbacks are attached in code through
//! [`crate::catcher::Catcher`].

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::errors::ConfigError;
use crate::signals::Signal;

/// Root of a settings file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SettingsFile {
    #[serde(default)]
    pub catcher: CatcherSettings,
}

/// Catcher settings, the `[catcher]` table of a settings file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatcherSettings {
    /// Signals to listen for, e.g. `["SIGINT", "term"]`. Empty means the
    /// default set.
    #[serde(default)]
    pub signals: Vec<Signal>,

    /// Prompt printed once the catcher is armed.
    #[serde(default)]
    pub prompt: Option<String>,

    /// Bound for duration-limited waits, in seconds.
    #[serde(default)]
    pub wait_seconds: Option<u64>,

    /// Minimum tracing level: trace, debug, info, warn, error.
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_log_level() -> String {
    "info".into()
}

impl Default for CatcherSettings {
    fn default() -> Self {
        Self {
            signals: Vec::new(),
            prompt: None,
            wait_seconds: None,
            log_level: default_log_level(),
        }
    }
}

impl CatcherSettings {
    /// Load settings from the `[catcher]` table of a TOML file.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        info!(path = %path.display(), "loading catcher settings");

        if !path.exists() {
            return Err(ConfigError::FileNotFound(path.display().to_string()));
        }

        let contents = std::fs::read_to_string(path)?;
        let file: SettingsFile =
            toml::from_str(&contents).map_err(|e| ConfigError::ParseError(e.to_string()))?;

        debug!("catcher settings parsed successfully");
        Ok(file.catcher)
    }

    /// Validate settings values.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.log_level.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "catcher.log_level".into(),
                detail: "log level must not be empty".into(),
            });
        }
        if self.wait_seconds == Some(0) {
            return Err(ConfigError::InvalidValue {
                field: "catcher.wait_seconds".into(),
                detail: "wait duration must be > 0".into(),
            });
        }
        Ok(())
    }

    /// Load, then validate.
    pub fn load_and_validate<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let settings = Self::load_from_file(path)?;
        settings.validate()?;
        Ok(settings)
    }

    /// The configured signals, or the default set when none are configured.
    pub fn effective_signals(&self) -> Vec<Signal> {
        if self.signals.is_empty() {
            Signal::DEFAULT_SET.to_vec()
        } else {
            self.signals.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn sample_toml() -> &'static str {
        r#"
[catcher]
signals = ["SIGINT", "term", "usr1"]
prompt = "Press CTRL-C to quit..."
wait_seconds = 6
log_level = "debug"
"#
    }

    #[test]
    fn test_parse_full_settings() {
        let file: SettingsFile = toml::from_str(sample_toml()).expect("failed to parse toml");
        let s = file.catcher;
        assert_eq!(
            s.signals,
            vec![Signal::Interrupt, Signal::Terminate, Signal::User1]
        );
        assert_eq!(s.prompt.as_deref(), Some("Press CTRL-C to quit..."));
        assert_eq!(s.wait_seconds, Some(6));
        assert_eq!(s.log_level, "debug");
        assert!(s.validate().is_ok());
    }

    #[test]
    fn test_empty_file_uses_defaults() {
        let file: SettingsFile = toml::from_str("").unwrap();
        let s = file.catcher;
        assert!(s.signals.is_empty());
        assert_eq!(s.log_level, "info");
        assert_eq!(s.effective_signals(), Signal::DEFAULT_SET.to_vec());
    }

    #[test]
    fn test_unknown_signal_is_parse_error() {
        let result: Result<SettingsFile, _> = toml::from_str("[catcher]\nsignals = [\"SIGKILL\"]\n");
        let err = result.unwrap_err().to_string();
        assert!(err.contains("SIGKILL"), "unexpected error: {err}");
    }

    #[test]
    fn test_validate_rejects_zero_wait() {
        let s = CatcherSettings {
            wait_seconds: Some(0),
            ..CatcherSettings::default()
        };
        let err = s.validate().unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { ref field, .. } if field == "catcher.wait_seconds"));
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sigcatch.toml");
        let mut f = std::fs::File::create(&path).unwrap();
        f.write_all(sample_toml().as_bytes()).unwrap();

        let s = CatcherSettings::load_and_validate(&path).unwrap();
        assert_eq!(s.wait_seconds, Some(6));
    }

    #[test]
    fn test_load_missing_file() {
        let err = CatcherSettings::load_from_file("/definitely/not/here.toml").unwrap_err();
        assert!(matches!(err, ConfigError::FileNotFound(_)));
    }
}
