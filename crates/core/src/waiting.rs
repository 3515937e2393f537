//! Waits bounded by a duration or by the caller's cancellation token.
//!
//! These compose a [`Catcher`] with one main looper that sleeps; they add no
//! coordination logic of their own.

use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::catcher::{Catcher, Closer, WaitReport};
use crate::errors::CatchError;

impl Catcher {
    /// Wait until `duration` elapses, `ctx` is cancelled, or a signal
    /// arrives, whichever comes first. `None` waits for `ctx` or a signal.
    ///
    /// Loopers run under a child of `ctx`. The child is cancelled on a real
    /// OS signal and when the main looper finishes, so loopers added with
    /// [`Catcher::with_looper`] should watch the token they are handed.
    /// `ctx` itself is never cancelled here.
    pub async fn wait_for_duration(
        self,
        ctx: CancellationToken,
        duration: Option<Duration>,
    ) -> Result<WaitReport, CatchError> {
        let scope = ctx.child_token();
        let cancel = scope.clone();
        self.with_on_signal_caught(move |_, event, _| {
            if let Some(sig) = event.signal() {
                info!(signal = %sig, "cancelling wait");
                cancel.cancel();
            }
        })
        .wait_for(scope, move |ctx: CancellationToken, closer: Closer| async move {
            match duration {
                Some(d) => {
                    tokio::select! {
                        _ = tokio::time::sleep(d) => info!(secs = d.as_secs_f64(), "wait duration elapsed"),
                        _ = ctx.cancelled() => {}
                    }
                }
                None => ctx.cancelled().await,
            }
            ctx.cancel();
            closer.close();
        })
        .await
    }
}

/// Print `prompt` (or the default one) and wait for `duration`, a signal, or
/// cancellation of `ctx`. Tears down into the process-wide registry.
pub async fn wait_for_seconds(
    ctx: CancellationToken,
    duration: Duration,
    prompt: Option<&str>,
) -> Result<WaitReport, CatchError> {
    Catcher::new()
        .with_prompt(prompt)
        .wait_for_duration(ctx, Some(duration))
        .await
}
