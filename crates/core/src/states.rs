//! Process state flags read from the environment.
//!
//! Callbacks and front ends consult these to decide how chatty to be. The
//! flags are read once; nothing here watches the environment afterwards.

use tracing::debug;

/// Debug/verbose/trace/quiet/no-color switches.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EnvState {
    pub debug: bool,
    pub verbose: bool,
    pub trace: bool,
    pub quiet: bool,
    pub no_color: bool,
}

impl EnvState {
    /// Read `DEBUG`, `VERBOSE`, `TRACE`, `QUIET` and `NO_COLOR`.
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Same as [`EnvState::from_env`] with a custom variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let flag = |name: &str| lookup(name).as_deref().map(is_truthy).unwrap_or(false);
        let state = Self {
            debug: flag("DEBUG"),
            verbose: flag("VERBOSE"),
            trace: flag("TRACE"),
            quiet: flag("QUIET"),
            // NO_COLOR is honoured when set to anything non-empty.
            no_color: lookup("NO_COLOR").is_some_and(|v| !v.is_empty()),
        };
        debug!(?state, "environment state resolved");
        state
    }

    /// Log filter implied by the flags, if any.
    pub fn log_level(&self) -> Option<&'static str> {
        if self.trace {
            Some("trace")
        } else if self.debug {
            Some("debug")
        } else if self.quiet {
            Some("warn")
        } else {
            None
        }
    }
}

fn is_truthy(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn state(vars: &[(&str, &str)]) -> EnvState {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        EnvState::from_lookup(|name| map.get(name).cloned())
    }

    #[test]
    fn test_truthy_values() {
        let s = state(&[("DEBUG", "TRUE"), ("VERBOSE", "yes"), ("TRACE", "0")]);
        assert!(s.debug);
        assert!(s.verbose);
        assert!(!s.trace);
        assert!(!s.quiet);
    }

    #[test]
    fn test_no_color_any_value() {
        assert!(state(&[("NO_COLOR", "whatever")]).no_color);
        assert!(!state(&[("NO_COLOR", "")]).no_color);
        assert!(!state(&[]).no_color);
    }

    #[test]
    fn test_log_level_precedence() {
        assert_eq!(state(&[("TRACE", "1"), ("DEBUG", "1")]).log_level(), Some("trace"));
        assert_eq!(state(&[("DEBUG", "on")]).log_level(), Some("debug"));
        assert_eq!(state(&[("QUIET", "1")]).log_level(), Some("warn"));
        assert_eq!(state(&[]).log_level(), None);
    }
}
