//! Error types for the sigcatch core library.
//!
//! Each subsystem has its own error type derived with `thiserror`, and a
//! top-level [`CatchError`] enum unifies them for callers of
//! [`crate::catcher::Catcher::wait_for`].

use thiserror::Error;

/// Boxed error returned by user-supplied peripherals.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

// ---------------------------------------------------------------------------
// Top-level error
// ---------------------------------------------------------------------------

/// Unified error type returned by a catcher wait.
#[derive(Debug, Error)]
pub enum CatchError {
    #[error(transparent)]
    Signal(#[from] SignalError),

    #[error(transparent)]
    Peripheral(#[from] PeripheralError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

// ---------------------------------------------------------------------------
// Signal errors
// ---------------------------------------------------------------------------

/// Errors from subscribing to or raising OS signals.
#[derive(Debug, Error)]
pub enum SignalError {
    /// The OS refused to install a handler for the signal.
    #[error("failed to install handler for {signal}: {source}")]
    InstallFailed {
        signal: String,
        #[source]
        source: std::io::Error,
    },

    /// `kill(2)` failed while raising a signal.
    #[error("failed to raise {signal} at pid {pid}: {source}")]
    RaiseFailed {
        signal: String,
        pid: u32,
        #[source]
        source: std::io::Error,
    },

    /// The signal cannot be caught or raised on this platform.
    #[error("signal {0} is not supported on this platform")]
    Unsupported(String),

    /// The pid is 0 or does not fit a positive `pid_t`. `kill(2)` would
    /// treat such a value as a process group or as every process.
    #[error("refusing to signal pid {0}: not a single positive process id")]
    InvalidPid(u32),

    /// A signal name did not match any known kind.
    #[error("unknown signal name '{0}'")]
    UnknownName(String),
}

// ---------------------------------------------------------------------------
// Peripheral errors
// ---------------------------------------------------------------------------

/// Errors from opening registered peripherals before the loopers start.
#[derive(Debug, Error)]
pub enum PeripheralError {
    /// `Openable::open` returned an error; the wait was aborted.
    #[error("peripheral #{index} failed to open: {source}")]
    OpenFailed {
        /// Position among every peripheral handed to the catcher, plain and
        /// openable alike, in the order they were added.
        index: usize,
        #[source]
        source: BoxError,
    },
}

// ---------------------------------------------------------------------------
// Configuration errors
// ---------------------------------------------------------------------------

/// Errors from settings loading and validation.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Settings file not found.
    #[error("configuration file not found: {0}")]
    FileNotFound(String),

    /// TOML parse error.
    #[error("configuration parse error: {0}")]
    ParseError(String),

    /// A setting value is invalid.
    #[error("invalid configuration value for '{field}': {detail}")]
    InvalidValue { field: String, detail: String },

    /// Generic I/O error reading the settings file.
    #[error("configuration I/O error: {0}")]
    IoError(#[from] std::io::Error),
}
