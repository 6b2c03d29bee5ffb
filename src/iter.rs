//! Iteration primitives shared by the lazy sequences the engine hands
//! out.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// A cooperative cancellation token.
///
/// Lazy sequences check the token between elements; nothing is interrupted
/// mid-mutation. Clones share the same flag, so a caller can keep one
/// clone and hand the other to an iterator.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
    deadline: Option<Instant>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// A token that trips itself once `timeout` has elapsed. This is the
    /// timed wrapper around a scan: the iterator stops at the first
    /// element boundary past the deadline.
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            flag: Arc::new(AtomicBool::new(false)),
            deadline: Some(Instant::now() + timeout),
        }
    }

    /// Trips the token. Every clone observes the cancellation.
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        if self.flag.load(Ordering::Relaxed) {
            return true;
        }
        match self.deadline {
            Some(deadline) => Instant::now() >= deadline,
            None => false,
        }
    }
}
