//! Engine write latch.
//!
//! While the engine writes to the canvas it holds a [`WriteScope`]. Mutations
//! committed while any scope is held are stamped [`Origin::Engine`], so the
//! activity debouncer and the solver's cancel-on-edit logic can ignore them.
//!
//! [`Origin::Engine`]: crate::Origin::Engine

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;

/// Default delay between dropping the last scope and releasing the latch.
pub const DEFAULT_SETTLE_DELAY: Duration = Duration::from_millis(150);

/// Shared, depth-counted latch. Clones share state.
#[derive(Debug, Clone)]
pub struct WriteLatch {
    depth: Arc<watch::Sender<usize>>,
    settle: Duration,
}

impl Default for WriteLatch {
    fn default() -> Self {
        Self::new(DEFAULT_SETTLE_DELAY)
    }
}

impl WriteLatch {
    /// Create a latch with the given settle delay.
    #[must_use]
    pub fn new(settle: Duration) -> Self {
        let (tx, _rx) = watch::channel(0);
        Self {
            depth: Arc::new(tx),
            settle,
        }
    }

    /// Mark the latch held until the returned scope is dropped (plus the
    /// settle delay). Scopes nest.
    #[must_use = "the latch is released when the scope is dropped"]
    pub fn acquire(&self) -> WriteScope {
        self.depth.send_modify(|d| *d += 1);
        WriteScope {
            latch: self.clone(),
        }
    }

    /// Whether any scope is held (or still settling).
    #[must_use]
    pub fn is_held(&self) -> bool {
        *self.depth.borrow() > 0
    }

    /// Resolve once the latch is released. Returns immediately if it is free.
    pub async fn wait_released(&self) {
        let mut rx = self.depth.subscribe();
        // The sender lives in `self`, so the channel cannot close here.
        let _ = rx.wait_for(|depth| *depth == 0).await;
    }

    fn release(&self) {
        self.depth.send_modify(|d| *d = d.saturating_sub(1));
    }
}

/// Guard returned by [`WriteLatch::acquire`].
#[derive(Debug)]
pub struct WriteScope {
    latch: WriteLatch,
}

impl Drop for WriteScope {
    fn drop(&mut self) {
        let latch = self.latch.clone();
        if latch.settle.is_zero() {
            latch.release();
            return;
        }
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    tokio::time::sleep(latch.settle).await;
                    latch.release();
                });
            }
            Err(_) => latch.release(),
        }
    }
}
