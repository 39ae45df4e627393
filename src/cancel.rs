//! Cooperative cancellation.

use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

use crate::error::{Error, Result};

/// Polled at every recursive entry point of a search.
pub trait Cancellable {
    fn is_cancelled(&self) -> bool;

    /// Returns `Err(Error::Cancelled)` once cancellation was requested.
    fn bail_if_cancelled(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(Error::Cancelled)
        } else {
            Ok(())
        }
    }
}

impl<F: Fn() -> bool> Cancellable for F {
    fn is_cancelled(&self) -> bool {
        self()
    }
}

/// A flag shared between the searching thread and whoever may cancel it.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn reset(&self) {
        self.0.store(false, Ordering::Relaxed);
    }
}

impl Cancellable for CancelFlag {
    fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Never cancels.
#[derive(Debug, Clone, Copy, Default)]
pub struct Never;

impl Cancellable for Never {
    fn is_cancelled(&self) -> bool {
        false
    }
}
