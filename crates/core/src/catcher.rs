//! The catcher: runs loopers, waits for a signal or a looper to finish, then
//! drains every looper and tears down registered closers exactly once.
//!
//! ```text
//! Initializing -> Running -> SignalPending -> Draining -> Done
//! ```
//!
//! A wait proceeds as follows:
//!
//! 1. register pending peripherals and open the openable ones, in order;
//! 2. subscribe to the configured OS signals (or the default set);
//! 3. spawn one task per looper, each handed a [`Closer`];
//! 4. once every looper task has started, spawn the listener and print the
//!    prompt;
//! 5. the listener takes the first [`WakeEvent`], runs the on-signal-caught
//!    callbacks, then waits until every looper has closed. If the first
//!    event was a soft wake, the callbacks run once more for the first OS
//!    signal seen while draining;
//! 6. the caller is released, local close handlers run, then the shared
//!    [`CloserRegistry`].

use std::fmt;
use std::future::Future;
use std::io::Write;
use std::panic::{self, AssertUnwindSafe};
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, OnceLock};

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::barrier::{Completion, Countdown};
use crate::closers::{panic_message, CloseReport, CloserRegistry};
use crate::config::CatcherSettings;
use crate::errors::{CatchError, PeripheralError};
use crate::peripheral::{Openable, Peripheral};
use crate::signals::{Signal, Subscription, WakeEvent};

/// Prompt printed by `with_prompt` when every message given is empty.
pub const DEFAULT_PROMPT: &str = "Press CTRL-C to quit...";

type LooperFuture = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

/// Callback run by the listener on the first wake event.
///
/// It receives the shared cancellation token, the event, and the shutdown
/// latch counting loopers that have not closed yet.
pub type OnSignalCaught = Box<dyn Fn(&CancellationToken, WakeEvent, &Countdown) + Send + 'static>;

type VerboseFn = Arc<dyn Fn(&str) + Send + Sync + 'static>;

// ---------------------------------------------------------------------------
// Loopers and closers
// ---------------------------------------------------------------------------

/// Type-erased looper; any `FnOnce(CancellationToken, Closer) -> impl Future`
/// qualifies.
trait Looper: Send + 'static {
    fn run(self: Box<Self>, ctx: CancellationToken, closer: Closer) -> LooperFuture;
}

impl<F, Fut> Looper for F
where
    F: FnOnce(CancellationToken, Closer) -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    fn run(self: Box<Self>, ctx: CancellationToken, closer: Closer) -> LooperFuture {
        Box::pin((*self)(ctx, closer))
    }
}

/// Handed to each looper; closing it acknowledges shutdown for that looper.
///
/// Clones share one state. Only the first `close` counts, and dropping the
/// last clone without closing counts as a close.
#[derive(Clone)]
pub struct Closer {
    inner: Arc<CloserState>,
}

struct CloserState {
    looper: usize,
    fired: AtomicBool,
    wake: mpsc::UnboundedSender<WakeEvent>,
    shutdown: Countdown,
    acknowledged: Arc<AtomicUsize>,
}

impl CloserState {
    fn fire(&self) -> bool {
        if self
            .fired
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return false;
        }
        // The listener may already be gone if a real signal won the race.
        let _ = self.wake.send(WakeEvent::SoftWake {
            looper: self.looper,
        });
        self.acknowledged.fetch_add(1, Ordering::SeqCst);
        let left = self.shutdown.arrive();
        debug!(looper = self.looper, remaining = left, "looper closed");
        true
    }
}

impl Drop for CloserState {
    fn drop(&mut self) {
        if self.fire() {
            warn!(
                looper = self.looper,
                "closer dropped without close(), counting looper as closed"
            );
        }
    }
}

impl Closer {
    fn new(
        looper: usize,
        wake: mpsc::UnboundedSender<WakeEvent>,
        shutdown: Countdown,
        acknowledged: Arc<AtomicUsize>,
    ) -> Self {
        Self {
            inner: Arc::new(CloserState {
                looper,
                fired: AtomicBool::new(false),
                wake,
                shutdown,
                acknowledged,
            }),
        }
    }

    /// Declare this looper done. Safe to call any number of times.
    pub fn close(&self) {
        self.inner.fire();
    }

    pub fn is_closed(&self) -> bool {
        self.inner.fired.load(Ordering::SeqCst)
    }

    /// Position of the looper; the main looper comes last.
    pub fn looper(&self) -> usize {
        self.inner.looper
    }
}

impl fmt::Debug for Closer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Closer")
            .field("looper", &self.inner.looper)
            .field("closed", &self.is_closed())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Report
// ---------------------------------------------------------------------------

/// What happened during one [`Catcher::wait_for`].
#[derive(Debug, Clone)]
pub struct WaitReport {
    /// The event that started the shutdown. A signal dispatched later,
    /// while draining, does not replace it.
    pub trigger: Option<WakeEvent>,
    /// Number of loopers run, main looper included.
    pub loopers: usize,
    /// Number of loopers that closed. Always equal to `loopers` on return.
    pub acknowledged: usize,
    /// Loopers that panicked and were closed on their behalf.
    pub panicked: Vec<usize>,
    pub local_close: CloseReport,
    pub global_close: CloseReport,
}

// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

enum PendingPeripheral {
    Plain(Arc<dyn Peripheral>),
    Openable(Arc<dyn Openable>),
}

/// Builder and runner for one signal-catching wait.
///
/// Every `with_*` method consumes and returns the catcher, so calls chain.
/// [`Catcher::wait_for`] consumes it as well: one catcher, one wait.
///
/// ```no_run
/// use sigcatch_core::{Catcher, Closer};
/// use tokio_util::sync::CancellationToken;
///
/// # async fn run() -> Result<(), sigcatch_core::CatchError> {
/// let ctx = CancellationToken::new();
/// let cancel = ctx.clone();
/// Catcher::new()
///     .with_prompt(["Press CTRL-C to quit..."])
///     .with_on_signal_caught(move |_, event, _| {
///         if !event.is_soft() {
///             cancel.cancel();
///         }
///     })
///     .wait_for(ctx, |ctx: CancellationToken, closer: Closer| async move {
///         ctx.cancelled().await;
///         closer.close();
///     })
///     .await?;
/// # Ok(())
/// # }
/// ```
pub struct Catcher {
    signals: Vec<Signal>,
    loopers: Vec<Box<dyn Looper>>,
    on_caught: Vec<OnSignalCaught>,
    close_handlers: Arc<CloserRegistry>,
    registry: Arc<CloserRegistry>,
    peripherals: Vec<PendingPeripheral>,
    prompt: Option<String>,
    prompt_writer: Option<Box<dyn Write + Send>>,
    verbose: Option<VerboseFn>,
}

impl Default for Catcher {
    fn default() -> Self {
        Self::new()
    }
}

impl Catcher {
    /// A catcher tearing down into the process-wide registry.
    pub fn new() -> Self {
        Self::with_registry(CloserRegistry::global())
    }

    /// A catcher tearing down into `registry` instead of the global one.
    pub fn with_registry(registry: Arc<CloserRegistry>) -> Self {
        Self {
            signals: Vec::new(),
            loopers: Vec::new(),
            on_caught: Vec::new(),
            close_handlers: Arc::new(CloserRegistry::new()),
            registry,
            peripherals: Vec::new(),
            prompt: None,
            prompt_writer: None,
            verbose: None,
        }
    }

    /// Add signals to listen for. With none at all, the default set applies.
    pub fn with_signals<I>(mut self, signals: I) -> Self
    where
        I: IntoIterator<Item = Signal>,
    {
        self.signals.extend(signals);
        self
    }

    /// Peripherals closed by this catcher only, before the shared registry.
    pub fn with_close_handlers<I>(self, handlers: I) -> Self
    where
        I: IntoIterator<Item = Arc<dyn Peripheral>>,
    {
        for handler in handlers {
            self.close_handlers.register_peripheral(handler);
        }
        self
    }

    /// A callback closed by this catcher only, before the shared registry.
    pub fn with_close_fn<F>(self, f: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        self.close_handlers.register_callback(f);
        self
    }

    /// Print a prompt once the catcher is armed.
    ///
    /// The last non-empty message wins; if all are empty, [`DEFAULT_PROMPT`]
    /// is used.
    pub fn with_prompt<I, S>(mut self, messages: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let text = messages
            .into_iter()
            .map(Into::into)
            .filter(|m| !m.is_empty())
            .last()
            .unwrap_or_else(|| DEFAULT_PROMPT.to_string());
        self.prompt = Some(text);
        self
    }

    /// Where the prompt goes. Defaults to stdout.
    pub fn with_prompt_writer<W>(mut self, writer: W) -> Self
    where
        W: Write + Send + 'static,
    {
        self.prompt_writer = Some(Box::new(writer));
        self
    }

    /// Append a callback for the first wake event. Callbacks run in order.
    pub fn with_on_signal_caught<F>(mut self, cb: F) -> Self
    where
        F: Fn(&CancellationToken, WakeEvent, &Countdown) + Send + 'static,
    {
        self.on_caught.push(Box::new(cb));
        self
    }

    /// Add a looper that runs alongside the main looper.
    ///
    /// A looper is handed the shared cancellation token and its own
    /// [`Closer`]; it must eventually close (or drop) the closer.
    pub fn with_looper<F, Fut>(mut self, looper: F) -> Self
    where
        F: FnOnce(CancellationToken, Closer) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.loopers.push(Box::new(looper));
        self
    }

    /// Register peripherals with the shared registry when the wait starts.
    pub fn with_peripherals<I>(mut self, peripherals: I) -> Self
    where
        I: IntoIterator<Item = Arc<dyn Peripheral>>,
    {
        self.peripherals
            .extend(peripherals.into_iter().map(PendingPeripheral::Plain));
        self
    }

    /// Like [`Catcher::with_peripherals`], and also open each one before any
    /// looper starts.
    pub fn with_openable<I>(mut self, peripherals: I) -> Self
    where
        I: IntoIterator<Item = Arc<dyn Openable>>,
    {
        self.peripherals
            .extend(peripherals.into_iter().map(PendingPeripheral::Openable));
        self
    }

    /// Mirror the catcher's internal progress messages into `f`.
    pub fn with_verbose_fn<F>(mut self, f: F) -> Self
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.verbose = Some(Arc::new(f));
        self
    }

    /// Apply the signal set and prompt from loaded settings.
    pub fn with_settings(self, settings: &CatcherSettings) -> Self {
        let this = self.with_signals(settings.signals.iter().copied());
        match &settings.prompt {
            Some(prompt) => this.with_prompt([prompt.as_str()]),
            None => this,
        }
    }

    /// Run every looper plus `main_looper` until shutdown, then tear down.
    ///
    /// Returns once every looper has closed. A failing [`Openable::open`]
    /// aborts before any looper starts; teardown still runs.
    pub async fn wait_for<F, Fut>(
        self,
        ctx: CancellationToken,
        main_looper: F,
    ) -> Result<WaitReport, CatchError>
    where
        F: FnOnce(CancellationToken, Closer) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let Catcher {
            signals,
            mut loopers,
            on_caught,
            close_handlers,
            registry,
            peripherals,
            prompt,
            prompt_writer,
            verbose,
        } = self;
        let verbose = Verbose(verbose);
        let teardown = Teardown {
            local: close_handlers,
            global: registry.clone(),
            finished: false,
        };

        // Initializing
        let mut openables = Vec::new();
        for (index, peripheral) in peripherals.into_iter().enumerate() {
            match peripheral {
                PendingPeripheral::Plain(p) => registry.register_peripheral(p),
                PendingPeripheral::Openable(p) => {
                    registry.register_openable(p.clone());
                    openables.push((index, p));
                }
            }
        }
        for (index, p) in openables {
            if let Err(source) = p.open(ctx.clone()).await {
                error!(index, error = %source, "peripheral failed to open, aborting wait");
                return Err(PeripheralError::OpenFailed { index, source }.into());
            }
        }

        loopers.push(Box::new(main_looper));
        let count = loopers.len();
        let started = Countdown::new(count);
        let shutdown = Countdown::new(count);
        verbose.say(format_args!("{count} looper(s) registered"));

        let signals = if signals.is_empty() {
            Signal::DEFAULT_SET.to_vec()
        } else {
            signals
        };
        let (wake_tx, wake_rx) = mpsc::unbounded_channel();
        let _subscription = Subscription::install(&signals, wake_tx.clone())?;

        // Running
        let acknowledged = Arc::new(AtomicUsize::new(0));
        let panicked = Arc::new(Mutex::new(Vec::new()));
        for (idx, looper) in loopers.into_iter().enumerate() {
            let closer = Closer::new(idx, wake_tx.clone(), shutdown.clone(), acknowledged.clone());
            let started = started.clone();
            let panicked = panicked.clone();
            let ctx = ctx.clone();
            tokio::spawn(async move {
                started.arrive();
                let task = tokio::spawn(looper.run(ctx, closer.clone()));
                if let Err(e) = task.await {
                    if e.is_panic() {
                        let reason = panic_message(e.into_panic().as_ref());
                        error!(looper = idx, reason = %reason, "looper panicked, closing it");
                        lock(&panicked).push(idx);
                    } else {
                        warn!(looper = idx, "looper task was cancelled, closing it");
                    }
                    closer.close();
                }
            });
        }

        started.wait().await;
        verbose.say(format_args!("all {count} looper(s) started"));

        // SignalPending
        let done = Arc::new(Completion::new());
        let trigger = Arc::new(OnceLock::new());
        tokio::spawn(listen(Listener {
            wake_rx,
            _wake_tx: wake_tx,
            on_caught,
            ctx,
            shutdown,
            done: done.clone(),
            trigger: trigger.clone(),
            verbose: verbose.clone(),
        }));

        if let Some(prompt) = prompt {
            print_prompt(&prompt, prompt_writer);
        }

        verbose.say(format_args!("waiting for completion"));
        done.wait().await;
        verbose.say(format_args!("ended"));

        // Done
        let (local_close, global_close) = teardown.finish();
        let panicked = std::mem::take(&mut *lock(&panicked));
        Ok(WaitReport {
            trigger: trigger.get().copied(),
            loopers: count,
            acknowledged: acknowledged.load(Ordering::SeqCst),
            panicked,
            local_close,
            global_close,
        })
    }
}

// ---------------------------------------------------------------------------
// Listener
// ---------------------------------------------------------------------------

struct Listener {
    wake_rx: mpsc::UnboundedReceiver<WakeEvent>,
    // Held so the channel never reports closed while we listen.
    _wake_tx: mpsc::UnboundedSender<WakeEvent>,
    on_caught: Vec<OnSignalCaught>,
    ctx: CancellationToken,
    shutdown: Countdown,
    done: Arc<Completion>,
    trigger: Arc<OnceLock<WakeEvent>>,
    verbose: Verbose,
}

async fn listen(mut l: Listener) {
    l.verbose.say(format_args!("waiting for os signals..."));

    // A soft wake only starts the shutdown. The callbacks still get the
    // first real signal, even when it arrives while draining.
    let mut signal_dispatched = false;
    match l.wake_rx.recv().await {
        Some(event) => {
            let _ = l.trigger.set(event);
            match event {
                WakeEvent::Os(sig) => {
                    info!(signal = %sig, "signal caught, shutting down");
                    signal_dispatched = true;
                }
                WakeEvent::SoftWake { looper } => {
                    l.verbose.say(format_args!("woken by looper #{looper}"))
                }
            }
            dispatch(&l.on_caught, &l.ctx, &l.shutdown, event);
        }
        None => warn!("wake channel closed before any event"),
    }

    // Draining
    l.verbose.say(format_args!(
        "waiting for {} looper(s) to close",
        l.shutdown.remaining()
    ));
    let drained = l.shutdown.wait();
    tokio::pin!(drained);
    loop {
        tokio::select! {
            _ = &mut drained => break,
            Some(later) = l.wake_rx.recv() => {
                if let WakeEvent::Os(sig) = later {
                    if signal_dispatched {
                        info!(signal = %sig, "signal received while draining, still waiting for loopers");
                    } else {
                        info!(signal = %sig, "signal caught while draining");
                        signal_dispatched = true;
                        dispatch(&l.on_caught, &l.ctx, &l.shutdown, later);
                    }
                }
            }
        }
    }
    l.verbose.say(format_args!("all loopers closed"));

    if l.done.fire() {
        l.verbose.say(format_args!("completion signaled"));
    }
}

/// Run every on-signal-caught callback for `event`, in order.
fn dispatch(
    on_caught: &[OnSignalCaught],
    ctx: &CancellationToken,
    shutdown: &Countdown,
    event: WakeEvent,
) {
    for (i, cb) in on_caught.iter().enumerate() {
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| cb(ctx, event, shutdown)));
        if let Err(payload) = outcome {
            let reason = panic_message(payload.as_ref());
            error!(callback = i, reason = %reason, "on-signal-caught callback panicked");
        }
    }
    if on_caught.is_empty() {
        debug!(event = %event, "signal caught, no handlers registered");
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

#[derive(Clone)]
struct Verbose(Option<VerboseFn>);

impl Verbose {
    fn say(&self, args: fmt::Arguments<'_>) {
        debug!("{}", args);
        if let Some(f) = &self.0 {
            f(&args.to_string());
        }
    }
}

/// Runs local close handlers, then the shared registry. On drop as well, so
/// an aborted or dropped wait still tears down.
struct Teardown {
    local: Arc<CloserRegistry>,
    global: Arc<CloserRegistry>,
    finished: bool,
}

impl Teardown {
    fn finish(mut self) -> (CloseReport, CloseReport) {
        self.finished = true;
        self.run()
    }

    fn run(&self) -> (CloseReport, CloseReport) {
        let local = self.local.close();
        let global = self.global.close();
        (local, global)
    }
}

impl Drop for Teardown {
    fn drop(&mut self) {
        if !self.finished {
            self.run();
        }
    }
}

fn print_prompt(prompt: &str, writer: Option<Box<dyn Write + Send>>) {
    let result = match writer {
        Some(mut w) => writeln!(w, "{prompt}").and_then(|_| w.flush()),
        None => {
            let mut out = std::io::stdout().lock();
            writeln!(out, "{prompt}").and_then(|_| out.flush())
        }
    };
    if let Err(e) = result {
        warn!(error = %e, "failed to print prompt");
    }
}

fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
