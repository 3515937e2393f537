//! sigcatch core library.
//!
//! This crate runs a set of long-running tasks ("loopers"), waits until the
//! process receives a termination signal or any looper asks to stop, drains
//! every looper, and finally runs registered teardown units exactly once.

pub mod barrier;
pub mod catcher;
pub mod closers;
pub mod config;
pub mod errors;
pub mod peripheral;
pub mod signals;
pub mod states;
pub mod waiting;

// Re-exports for convenience.
pub use barrier::Countdown;
pub use catcher::{Catcher, Closer, OnSignalCaught, WaitReport, DEFAULT_PROMPT};
pub use closers::{CloseFailure, CloseReport, CloserRegistry};
pub use config::CatcherSettings;
pub use errors::{BoxError, CatchError, ConfigError, PeripheralError, SignalError};
pub use peripheral::{AutoStart, Basic, FallibleClose, OpenFuture, Openable, Peripheral};
pub use signals::{raise, raise_to, Signal, WakeEvent};
pub use states::EnvState;
pub use waiting::wait_for_seconds;
