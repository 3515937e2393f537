//! A real OS signal raised at the process drives the whole shutdown path.
//!
//! Kept in its own test binary: SIGUSR2 is process-wide and only the
//! catchers here listen for it. Both tests tolerate seeing each other's
//! signal.

#![cfg(unix)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

use sigcatch_core::{
    raise, Catcher, CatcherSettings, Closer, CloserRegistry, Signal, WakeEvent,
};

#[tokio::test]
async fn test_raised_signal_cancels_context_and_drains_loopers() {
    let registry = Arc::new(CloserRegistry::new());
    let ctx = CancellationToken::new();
    let cancel = ctx.clone();
    let caught = Arc::new(Mutex::new(Vec::new()));
    let seen = caught.clone();
    let (ready_tx, ready_rx) = oneshot::channel::<()>();

    // Raise from outside the catcher once the main looper is parked.
    let raiser = tokio::spawn(async move {
        ready_rx.await.expect("main looper never became ready");
        raise(Signal::User2).expect("failed to raise SIGUSR2");
    });

    let wait = Catcher::with_registry(registry.clone())
        .with_signals([Signal::User2])
        .with_on_signal_caught(move |_, event, _| {
            seen.lock().unwrap().push(event);
            if !event.is_soft() {
                cancel.cancel();
            }
        })
        .with_looper(|ctx: CancellationToken, closer: Closer| async move {
            ctx.cancelled().await;
            closer.close();
        })
        .wait_for(ctx.clone(), move |ctx: CancellationToken, closer: Closer| async move {
            let _ = ready_tx.send(());
            ctx.cancelled().await;
            closer.close();
        });

    let report = tokio::time::timeout(Duration::from_secs(2), wait)
        .await
        .expect("signal did not drive shutdown in time")
        .unwrap();
    raiser.await.unwrap();

    assert_eq!(report.trigger, Some(WakeEvent::Os(Signal::User2)));
    assert!(ctx.is_cancelled());
    assert_eq!(report.acknowledged, 2);
    assert_eq!(*caught.lock().unwrap(), vec![WakeEvent::Os(Signal::User2)]);
    assert!(registry.is_closed());
}

#[tokio::test]
async fn test_signal_after_soft_wake_still_ends_unbounded_wait() {
    let registry = Arc::new(CloserRegistry::new());
    let ctx = CancellationToken::new();
    let caught = Arc::new(Mutex::new(Vec::new()));
    let seen = caught.clone();
    let settings = CatcherSettings {
        signals: vec![Signal::User2],
        ..CatcherSettings::default()
    };

    let raiser = tokio::spawn(async {
        tokio::time::sleep(Duration::from_millis(100)).await;
        raise(Signal::User2).expect("failed to raise SIGUSR2");
    });

    // The extra looper finishes first, so the wait is woken softly before
    // any signal arrives.
    let wait = Catcher::with_registry(registry.clone())
        .with_settings(&settings)
        .with_on_signal_caught(move |_, event, _| seen.lock().unwrap().push(event))
        .with_looper(|_ctx: CancellationToken, closer: Closer| async move {
            closer.close();
        })
        .wait_for_duration(ctx.clone(), None);

    let report = tokio::time::timeout(Duration::from_secs(2), wait)
        .await
        .expect("SIGUSR2 did not end an unbounded wait after a looper closed first")
        .unwrap();
    raiser.await.unwrap();

    assert_eq!(report.loopers, 2);
    assert_eq!(report.acknowledged, 2);
    assert!(!ctx.is_cancelled());
    assert!(registry.is_closed());

    let caught = caught.lock().unwrap();
    let signals: Vec<_> = caught.iter().filter(|e| !e.is_soft()).collect();
    assert_eq!(signals, vec![&WakeEvent::Os(Signal::User2)]);
}
