//! Count-down latches and the single-fire completion flag used by a wait.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::watch;

/// A counter that releases every waiter once it reaches zero.
///
/// Cloning yields another handle to the same counter.
#[derive(Clone, Debug)]
pub struct Countdown {
    tx: Arc<watch::Sender<usize>>,
}

impl Countdown {
    pub fn new(count: usize) -> Self {
        let (tx, _rx) = watch::channel(count);
        Self { tx: Arc::new(tx) }
    }

    /// Decrement the counter and return what is left. Saturates at zero.
    pub fn arrive(&self) -> usize {
        let mut left = 0;
        self.tx.send_modify(|n| {
            *n = n.saturating_sub(1);
            left = *n;
        });
        left
    }

    pub fn remaining(&self) -> usize {
        *self.tx.borrow()
    }

    /// Resolve once the counter is zero; immediately if it already is.
    pub async fn wait(&self) {
        let mut rx = self.tx.subscribe();
        // The sender lives in `self`, so the channel cannot close under us.
        let _ = rx.wait_for(|n| *n == 0).await;
    }
}

/// Fires exactly once; later attempts are no-ops.
#[derive(Debug)]
pub(crate) struct Completion {
    fired: AtomicBool,
    tx: watch::Sender<bool>,
}

impl Completion {
    pub(crate) fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self {
            fired: AtomicBool::new(false),
            tx,
        }
    }

    /// Returns `true` for the call that actually fired.
    pub(crate) fn fire(&self) -> bool {
        if self
            .fired
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return false;
        }
        self.tx.send_replace(true);
        true
    }

    #[cfg(test)]
    pub(crate) fn is_fired(&self) -> bool {
        self.fired.load(Ordering::SeqCst)
    }

    pub(crate) async fn wait(&self) {
        let mut rx = self.tx.subscribe();
        let _ = rx.wait_for(|done| *done).await;
    }
}
