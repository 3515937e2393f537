//! Ordered, run-once registry of teardown units.
//!
//! Units run in registration order on the first [`CloserRegistry::close`]
//! call. A failing or panicking unit is recorded and logged; the remaining
//! units still run. Every later `close` is a silent no-op.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock};

use tracing::{debug, error, info, warn};

use crate::peripheral::{FallibleClose, Openable, Peripheral};

type Callback = Box<dyn FnOnce() + Send + 'static>;

/// One registered teardown unit.
enum CloseUnit {
    Callback(Callback),
    Batch(Vec<Callback>),
    Fallible(Box<dyn FallibleClose>),
    Peripheral(Arc<dyn Peripheral>),
    Openable(Arc<dyn Openable>),
}

impl CloseUnit {
    fn kind(&self) -> &'static str {
        match self {
            CloseUnit::Callback(_) => "callback",
            CloseUnit::Batch(_) => "batch",
            CloseUnit::Fallible(_) => "fallible",
            CloseUnit::Peripheral(_) => "peripheral",
            CloseUnit::Openable(_) => "openable",
        }
    }

    fn run(self) -> Result<(), String> {
        match self {
            CloseUnit::Callback(f) => guarded(f),
            CloseUnit::Batch(fns) => {
                // Every callback of a batch runs even if an earlier one panics.
                let errors: Vec<String> = fns
                    .into_iter()
                    .filter_map(|f| guarded(f).err())
                    .collect();
                if errors.is_empty() {
                    Ok(())
                } else {
                    Err(errors.join("; "))
                }
            }
            CloseUnit::Fallible(c) => match guarded(move || c.close()) {
                Ok(Ok(())) => Ok(()),
                Ok(Err(e)) => Err(e.to_string()),
                Err(panicked) => Err(panicked),
            },
            CloseUnit::Peripheral(p) => guarded(move || p.close()),
            CloseUnit::Openable(p) => guarded(move || p.close()),
        }
    }
}

fn guarded<T>(f: impl FnOnce() -> T) -> Result<T, String> {
    panic::catch_unwind(AssertUnwindSafe(f)).map_err(|payload| panic_message(payload.as_ref()))
}

/// Render a panic payload as text.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        format!("panicked: {s}")
    } else if let Some(s) = payload.downcast_ref::<String>() {
        format!("panicked: {s}")
    } else {
        "panicked with a non-string payload".to_string()
    }
}

// ---------------------------------------------------------------------------
// Reports
// ---------------------------------------------------------------------------

/// A unit that failed or panicked during [`CloserRegistry::close`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseFailure {
    /// Position of the unit in registration order.
    pub index: usize,
    pub kind: &'static str,
    pub reason: String,
}

/// Outcome of one [`CloserRegistry::close`] call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CloseReport {
    /// Number of units executed by this call.
    pub ran: usize,
    pub failures: Vec<CloseFailure>,
    /// `true` when another call had already closed the registry.
    pub already_closed: bool,
}

impl CloseReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// Ordered set of teardown units, executed at most once.
///
/// Usually one instance is shared per process through
/// [`CloserRegistry::global`], but any number of independent registries can
/// be created and injected, which is what the tests do.
#[derive(Default)]
pub struct CloserRegistry {
    units: Mutex<Vec<CloseUnit>>,
    closed: AtomicBool,
}

static GLOBAL: OnceLock<Arc<CloserRegistry>> = OnceLock::new();

impl CloserRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The process-wide registry, created on first use.
    pub fn global() -> Arc<CloserRegistry> {
        GLOBAL.get_or_init(|| Arc::new(CloserRegistry::new())).clone()
    }

    /// Register a single no-arg callback.
    pub fn register_callback<F>(&self, f: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.push(CloseUnit::Callback(Box::new(f)));
    }

    /// Register a batch of callbacks as one unit; they run back to back.
    pub fn register_callbacks<I>(&self, fns: I)
    where
        I: IntoIterator<Item = Box<dyn FnOnce() + Send + 'static>>,
    {
        self.push(CloseUnit::Batch(fns.into_iter().collect()));
    }

    /// Register an object whose close can fail. The error is reported, not
    /// propagated.
    pub fn register_fallible<C>(&self, closer: C)
    where
        C: FallibleClose + 'static,
    {
        self.push(CloseUnit::Fallible(Box::new(closer)));
    }

    pub fn register_peripheral(&self, peripheral: Arc<dyn Peripheral>) {
        self.push(CloseUnit::Peripheral(peripheral));
    }

    pub fn register_openable(&self, peripheral: Arc<dyn Openable>) {
        self.push(CloseUnit::Openable(peripheral));
    }

    /// Number of units waiting to run.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Run every registered unit once, in registration order.
    pub fn close(&self) -> CloseReport {
        if self
            .closed
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            debug!("closer registry already closed, skipping");
            return CloseReport {
                already_closed: true,
                ..CloseReport::default()
            };
        }

        let units = std::mem::take(&mut *self.lock());
        debug!(count = units.len(), "closing registered units");

        let mut report = CloseReport::default();
        for (index, unit) in units.into_iter().enumerate() {
            let kind = unit.kind();
            report.ran += 1;
            if let Err(reason) = unit.run() {
                error!(index, kind, reason = %reason, "closer unit failed");
                report.failures.push(CloseFailure {
                    index,
                    kind,
                    reason,
                });
            }
        }

        info!(
            ran = report.ran,
            failed = report.failures.len(),
            "closer registry closed"
        );
        report
    }

    fn push(&self, unit: CloseUnit) {
        let mut units = self.lock();
        // Checked under the lock so nothing slips in after close() took the list.
        if self.is_closed() {
            warn!(kind = unit.kind(), "registry already closed, dropping late registration");
            return;
        }
        units.push(unit);
    }

    fn lock(&self) -> MutexGuard<'_, Vec<CloseUnit>> {
        self.units
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Peripheral for CloserRegistry {
    fn close(&self) {
        CloserRegistry::close(self);
    }
}
