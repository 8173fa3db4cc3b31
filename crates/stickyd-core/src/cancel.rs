//! Cancellation token for cooperative cancellation
//!
//! Each connection owns a token. Closing the connection cancels it, and any
//! worker task still holding a clone sees the flag before it calls the
//! service.

use core::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Token for checking and triggering cancellation
#[derive(Clone)]
pub struct CancellationToken {
    inner: Arc<Inner>,
}

struct Inner {
    cancelled: AtomicBool,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                cancelled: AtomicBool::new(false),
            }),
        }
    }

    #[inline]
    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::Acquire)
    }

    /// Request cancellation
    ///
    /// Returns true if this call flipped the flag.
    pub fn cancel(&self) -> bool {
        !self.inner.cancelled.swap(true, Ordering::AcqRel)
    }
}

impl Default for CancellationToken {
    fn default() -> Self {
        Self::new()
    }
}

impl core::fmt::Debug for CancellationToken {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("CancellationToken")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancel_once() {
        let token = CancellationToken::new();
        let clone = token.clone();
        assert!(!clone.is_cancelled());

        assert!(token.cancel());
        assert!(!token.cancel());
        assert!(clone.is_cancelled());
    }
}
