use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use sift_error::{Result, SiftError};

/// Cooperative cancellation for a query run.
///
/// Cloning shares the underlying flag.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    /// Return a cancellation error if cancelled.
    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            return Err(SiftError::cancelled());
        }
        Ok(())
    }
}
