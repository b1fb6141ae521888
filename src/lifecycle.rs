use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::error::{Result, StoreError};

const SHUTDOWN_DRAIN_TIMEOUT: Duration = Duration::from_secs(15);

/// A one-shot shutdown signal plus a counter of in-flight guarded
/// operations.
///
/// `protect()` is the entry point every public store operation passes
/// through; `close()` stops new entries and waits (up to 15s) for the ones
/// already in flight to finish before the caller proceeds to tear down
/// shard files and the meta-store.
pub struct ShutdownGuard {
    closed: Mutex<bool>,
    drained: Condvar,
    in_flight: AtomicUsize,
}

/// RAII token returned by [`ShutdownGuard::protect`]. Decrements the
/// in-flight counter on drop, so a panic mid-operation cannot leak the
/// count and wedge `close()`.
pub struct GuardToken<'a> {
    guard: &'a ShutdownGuard,
}

impl Drop for GuardToken<'_> {
    fn drop(&mut self) {
        if self.guard.in_flight.fetch_sub(1, Ordering::AcqRel) == 1 {
            // Last one out wakes anyone waiting in `close()`.
            let _lock = self.guard.closed.lock();
            self.guard.drained.notify_all();
        }
    }
}

impl ShutdownGuard {
    pub fn new() -> Self {
        Self {
            closed: Mutex::new(false),
            drained: Condvar::new(),
            in_flight: AtomicUsize::new(0),
        }
    }

    /// Enters a guarded region. Fails with [`StoreError::Closed`] once
    /// `close()` has been called, even if the drain is still in progress.
    pub fn protect(&self) -> Result<GuardToken<'_>> {
        let closed = self.closed.lock();
        if *closed {
            return Err(StoreError::Closed);
        }
        self.in_flight.fetch_add(1, Ordering::AcqRel);
        Ok(GuardToken { guard: self })
    }

    /// Closes the signal (idempotent) and waits up to 15s for in-flight
    /// operations to finish. Returns once the counter reaches zero or the
    /// deadline passes, whichever comes first.
    pub fn close(&self) {
        let mut closed = self.closed.lock();
        if *closed {
            return;
        }
        *closed = true;

        let deadline = Instant::now() + SHUTDOWN_DRAIN_TIMEOUT;
        while self.in_flight.load(Ordering::Acquire) > 0 {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            let remaining = deadline - now;
            let result = self.drained.wait_for(&mut closed, remaining);
            if result.timed_out() {
                break;
            }
        }
    }

    pub fn is_closed(&self) -> bool {
        *self.closed.lock()
    }
}

impl Default for ShutdownGuard {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_protect_after_close_fails() {
        let guard = ShutdownGuard::new();
        guard.close();
        assert!(matches!(guard.protect(), Err(StoreError::Closed)));
    }

    #[test]
    fn test_close_is_idempotent() {
        let guard = ShutdownGuard::new();
        guard.close();
        guard.close();
        assert!(guard.is_closed());
    }

    #[test]
    fn test_close_waits_for_in_flight_operation() {
        let guard = Arc::new(ShutdownGuard::new());
        let token = guard.protect().expect("enter");

        let closer = Arc::clone(&guard);
        let handle = thread::spawn(move || {
            closer.close();
        });

        thread::sleep(Duration::from_millis(50));
        drop(token);
        handle.join().expect("join");
        assert!(guard.is_closed());
    }
}
