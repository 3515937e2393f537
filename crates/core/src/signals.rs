//! OS signal model, wake events and the signal-raising facility.
//!
//! The listener of a catcher consumes a single stream of [`WakeEvent`]s. Real
//! OS signals arrive as [`WakeEvent::Os`]; a looper finishing its work
//! arrives as [`WakeEvent::SoftWake`]. Both drive the same shutdown path.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::errors::SignalError;

/// The OS signals a catcher can listen for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Signal {
    /// SIGINT, Ctrl+C in a terminal.
    Interrupt,
    /// SIGTERM, the polite kill.
    Terminate,
    /// SIGHUP, the controlling terminal went away.
    Hangup,
    Quit,
    User1,
    User2,
}

impl Signal {
    /// Listened for when no signal set is configured.
    pub const DEFAULT_SET: [Signal; 3] = [Signal::Interrupt, Signal::Terminate, Signal::Hangup];

    pub const ALL: [Signal; 6] = [
        Signal::Interrupt,
        Signal::Terminate,
        Signal::Hangup,
        Signal::Quit,
        Signal::User1,
        Signal::User2,
    ];

    /// Conventional POSIX name, e.g. `SIGTERM`.
    pub fn name(self) -> &'static str {
        match self {
            Signal::Interrupt => "SIGINT",
            Signal::Terminate => "SIGTERM",
            Signal::Hangup => "SIGHUP",
            Signal::Quit => "SIGQUIT",
            Signal::User1 => "SIGUSR1",
            Signal::User2 => "SIGUSR2",
        }
    }

    #[cfg(unix)]
    fn kind(self) -> tokio::signal::unix::SignalKind {
        use tokio::signal::unix::SignalKind;
        match self {
            Signal::Interrupt => SignalKind::interrupt(),
            Signal::Terminate => SignalKind::terminate(),
            Signal::Hangup => SignalKind::hangup(),
            Signal::Quit => SignalKind::quit(),
            Signal::User1 => SignalKind::user_defined1(),
            Signal::User2 => SignalKind::user_defined2(),
        }
    }

    #[cfg(unix)]
    fn raw(self) -> libc::c_int {
        match self {
            Signal::Interrupt => libc::SIGINT,
            Signal::Terminate => libc::SIGTERM,
            Signal::Hangup => libc::SIGHUP,
            Signal::Quit => libc::SIGQUIT,
            Signal::User1 => libc::SIGUSR1,
            Signal::User2 => libc::SIGUSR2,
        }
    }
}

impl fmt::Display for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Signal {
    type Err = SignalError;

    /// Accepts `SIGTERM`, `TERM`, `terminate` and friends, in any case.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let upper = s.trim().to_ascii_uppercase();
        let short = upper.strip_prefix("SIG").unwrap_or(&upper);
        match short {
            "INT" | "INTERRUPT" => Ok(Signal::Interrupt),
            "TERM" | "TERMINATE" => Ok(Signal::Terminate),
            "HUP" | "HANGUP" => Ok(Signal::Hangup),
            "QUIT" => Ok(Signal::Quit),
            "USR1" | "USER1" => Ok(Signal::User1),
            "USR2" | "USER2" => Ok(Signal::User2),
            _ => Err(SignalError::UnknownName(s.to_string())),
        }
    }
}

impl TryFrom<String> for Signal {
    type Error = SignalError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Signal> for String {
    fn from(sig: Signal) -> Self {
        sig.name().to_string()
    }
}

// ---------------------------------------------------------------------------
// Wake events
// ---------------------------------------------------------------------------

/// What woke the catcher's listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WakeEvent {
    /// A real OS signal was delivered to the process.
    Os(Signal),
    /// A looper called its closer. Not a signal; no user-facing notice is due.
    SoftWake { looper: usize },
}

impl WakeEvent {
    pub fn is_soft(&self) -> bool {
        matches!(self, WakeEvent::SoftWake { .. })
    }

    /// The OS signal, if this event is one.
    pub fn signal(&self) -> Option<Signal> {
        match self {
            WakeEvent::Os(sig) => Some(*sig),
            WakeEvent::SoftWake { .. } => None,
        }
    }
}

impl fmt::Display for WakeEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WakeEvent::Os(sig) => write!(f, "{sig}"),
            WakeEvent::SoftWake { looper } => write!(f, "soft-wake(looper #{looper})"),
        }
    }
}

// ---------------------------------------------------------------------------
// Subscription
// ---------------------------------------------------------------------------

/// Live OS signal subscription forwarding into a wake channel.
///
/// Dropping it stops the forwarding tasks. Note that tokio keeps the
/// process-level handler installed for the lifetime of the process.
pub(crate) struct Subscription {
    forwarders: Vec<JoinHandle<()>>,
}

impl Subscription {
    /// Install handlers for `signals` and forward each delivery into `tx`.
    ///
    /// Must run inside a tokio runtime. Duplicates are subscribed once.
    pub(crate) fn install(
        signals: &[Signal],
        tx: mpsc::UnboundedSender<WakeEvent>,
    ) -> Result<Self, SignalError> {
        let mut unique: Vec<Signal> = Vec::with_capacity(signals.len());
        for sig in signals {
            if !unique.contains(sig) {
                unique.push(*sig);
            }
        }

        let mut forwarders = Vec::with_capacity(unique.len());
        for sig in unique {
            match forward(sig, tx.clone()) {
                Ok(Some(handle)) => forwarders.push(handle),
                Ok(None) => {}
                Err(e) => {
                    for handle in &forwarders {
                        handle.abort();
                    }
                    return Err(e);
                }
            }
        }
        debug!(count = forwarders.len(), "signal handlers installed");
        Ok(Self { forwarders })
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        for handle in &self.forwarders {
            handle.abort();
        }
    }
}

#[cfg(unix)]
fn forward(
    sig: Signal,
    tx: mpsc::UnboundedSender<WakeEvent>,
) -> Result<Option<JoinHandle<()>>, SignalError> {
    let mut stream =
        tokio::signal::unix::signal(sig.kind()).map_err(|source| SignalError::InstallFailed {
            signal: sig.name().to_string(),
            source,
        })?;

    Ok(Some(tokio::spawn(async move {
        while stream.recv().await.is_some() {
            info!(signal = %sig, "received OS signal");
            if tx.send(WakeEvent::Os(sig)).is_err() {
                break;
            }
        }
    })))
}

#[cfg(not(unix))]
fn forward(
    sig: Signal,
    tx: mpsc::UnboundedSender<WakeEvent>,
) -> Result<Option<JoinHandle<()>>, SignalError> {
    if sig != Signal::Interrupt {
        tracing::warn!(signal = %sig, "signal not available on this platform, skipping");
        return Ok(None);
    }

    Ok(Some(tokio::spawn(async move {
        while tokio::signal::ctrl_c().await.is_ok() {
            info!("received Ctrl+C");
            if tx.send(WakeEvent::Os(Signal::Interrupt)).is_err() {
                break;
            }
        }
    })))
}

// ---------------------------------------------------------------------------
// Raising
// ---------------------------------------------------------------------------

/// Send `signal` to the current process.
pub fn raise(signal: Signal) -> Result<(), SignalError> {
    raise_to(std::process::id(), signal)
}

/// Send `signal` to the process `pid`.
#[cfg(unix)]
pub fn raise_to(pid: u32, signal: Signal) -> Result<(), SignalError> {
    let target = match libc::pid_t::try_from(pid) {
        Ok(target) if target > 0 => target,
        _ => return Err(SignalError::InvalidPid(pid)),
    };
    debug!(pid, signal = %signal, "raising signal");
    let rc = unsafe { libc::kill(target, signal.raw()) };
    if rc == 0 {
        Ok(())
    } else {
        Err(SignalError::RaiseFailed {
            signal: signal.name().to_string(),
            pid,
            source: std::io::Error::last_os_error(),
        })
    }
}

#[cfg(not(unix))]
pub fn raise_to(_pid: u32, signal: Signal) -> Result<(), SignalError> {
    Err(SignalError::Unsupported(signal.name().to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_parse_signal_names() {
        assert_eq!("SIGTERM".parse::<Signal>().unwrap(), Signal::Terminate);
        assert_eq!("term".parse::<Signal>().unwrap(), Signal::Terminate);
        assert_eq!("Interrupt".parse::<Signal>().unwrap(), Signal::Interrupt);
        assert_eq!(" hup ".parse::<Signal>().unwrap(), Signal::Hangup);
        assert_eq!("sigusr2".parse::<Signal>().unwrap(), Signal::User2);

        let err = "SIGKILL".parse::<Signal>().unwrap_err();
        assert!(matches!(err, SignalError::UnknownName(name) if name == "SIGKILL"));
    }

    #[test]
    fn test_names_round_trip_through_display() {
        for sig in Signal::ALL {
            assert_eq!(sig.to_string().parse::<Signal>().unwrap(), sig);
        }
    }

    #[test]
    fn test_wake_event_accessors() {
        let os = WakeEvent::Os(Signal::Hangup);
        assert!(!os.is_soft());
        assert_eq!(os.signal(), Some(Signal::Hangup));
        assert_eq!(os.to_string(), "SIGHUP");

        let soft = WakeEvent::SoftWake { looper: 3 };
        assert!(soft.is_soft());
        assert_eq!(soft.signal(), None);
        assert_eq!(soft.to_string(), "soft-wake(looper #3)");
    }

    #[cfg(unix)]
    #[test]
    fn test_raise_to_rejects_group_and_broadcast_pids() {
        for pid in [0, u32::MAX, i32::MAX as u32 + 1] {
            let err = raise_to(pid, Signal::Terminate).unwrap_err();
            assert!(
                matches!(err, SignalError::InvalidPid(p) if p == pid),
                "pid {pid} gave {err:?}"
            );
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_subscription_forwards_raised_signal() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let _sub = Subscription::install(&[Signal::User1, Signal::User1], tx).unwrap();

        raise(Signal::User1).unwrap();

        let event = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("signal was not forwarded in time");
        assert_eq!(event, Some(WakeEvent::Os(Signal::User1)));
    }
}
