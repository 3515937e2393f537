//! Capability traits for external resources that take part in teardown.
//!
//! A peripheral is anything holding an external resource (a connection pool,
//! a log file, a socket) that must be released when the process shuts down.
//! Peripherals are registered with a [`crate::closers::CloserRegistry`] and
//! closed in registration order.

use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};

use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::errors::BoxError;

/// Future returned by [`Openable::open`].
pub type OpenFuture<'a> = Pin<Box<dyn Future<Output = Result<(), BoxError>> + Send + 'a>>;

/// A resource that can be released but never reports failure.
pub trait Peripheral: Send + Sync {
    /// Release the resource.
    fn close(&self);
}

/// A resource whose release can fail, the `io::Closer` shape.
pub trait FallibleClose: Send + Sync {
    fn close(&self) -> Result<(), BoxError>;
}

/// A peripheral that must be initialized before any looper starts.
///
/// Open calls run sequentially, in registration order, at the start of
/// [`crate::catcher::Catcher::wait_for`]. The first failure aborts the wait.
pub trait Openable: Peripheral {
    fn open(&self, ctx: CancellationToken) -> OpenFuture<'_>;
}

/// A peripheral that starts itself as soon as it is added to a [`Basic`].
pub trait AutoStart {
    fn auto_start(&self);
}

impl FallibleClose for std::fs::File {
    fn close(&self) -> Result<(), BoxError> {
        self.sync_all()?;
        Ok(())
    }
}

/// A simple host for a group of peripherals.
///
/// Embed it in a service type to get ordered teardown of everything the
/// service owns; `Basic` is itself a [`Peripheral`], so the whole group can
/// be registered with a closer registry as one unit.
#[derive(Default)]
pub struct Basic {
    peripherals: Mutex<Vec<Arc<dyn Peripheral>>>,
}

impl Basic {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a peripheral to this host.
    pub fn add_peripheral(&self, peripheral: Arc<dyn Peripheral>) {
        self.lock().push(peripheral);
    }

    /// Add a peripheral and start it immediately.
    pub fn add_auto_start<P>(&self, peripheral: Arc<P>)
    where
        P: Peripheral + AutoStart + 'static,
    {
        peripheral.auto_start();
        self.lock().push(peripheral);
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<Arc<dyn Peripheral>>> {
        self.peripherals
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Peripheral for Basic {
    fn close(&self) {
        let peripherals = std::mem::take(&mut *self.lock());
        debug!(count = peripherals.len(), "closing hosted peripherals");
        for p in peripherals {
            p.close();
        }
    }
}
