//! The four cooperating worker loops (spec.md §4.5–§4.8). Each is a plain
//! function meant to be run on its own OS thread; none of them know about
//! threads themselves; the supervisor in [`crate::lib`] owns the
//! `thread::spawn` calls and the [`Cancellation`] flags.

pub mod addremove;
pub mod download;
pub mod install;
pub mod media;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Cooperative shutdown signal, polled by every worker at least every 5
/// seconds (spec.md §5). Cloning shares the same underlying flag.
#[derive(Debug, Clone, Default)]
pub struct Cancellation(Arc<AtomicBool>);

impl Cancellation {
    /// A fresh, unset flag.
    pub fn new() -> Self {
        Self(Arc::new(AtomicBool::new(false)))
    }

    /// Raise the flag. Idempotent.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Whether the flag has been raised.
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}
