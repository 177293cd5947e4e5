//! Acquire fences that tests control by hand.

use emucam_core::{AcquireFence, FenceError};
use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, PartialEq, Eq)]
enum FenceState {
    Pending,
    Signaled,
    Errored(String),
}

#[derive(Debug)]
struct FenceInner {
    state: Mutex<FenceState>,
    changed: Condvar,
}

/// A fence that stays pending until [`MockFence::signal`] or [`MockFence::fail`]
/// is called. Clones share state, so a test can keep one clone and let the
/// importer hand another to the processor.
#[derive(Debug, Clone)]
pub struct MockFence {
    inner: Arc<FenceInner>,
}

impl MockFence {
    /// A pending fence.
    pub fn pending() -> Self {
        Self::with_state(FenceState::Pending)
    }

    /// A fence that has already signaled.
    pub fn signaled() -> Self {
        Self::with_state(FenceState::Signaled)
    }

    fn with_state(state: FenceState) -> Self {
        Self {
            inner: Arc::new(FenceInner {
                state: Mutex::new(state),
                changed: Condvar::new(),
            }),
        }
    }

    /// Signal the fence, waking every waiter.
    pub fn signal(&self) {
        *self.inner.state.lock() = FenceState::Signaled;
        self.inner.changed.notify_all();
    }

    /// Put the fence into an error state.
    pub fn fail(&self, reason: impl Into<String>) {
        *self.inner.state.lock() = FenceState::Errored(reason.into());
        self.inner.changed.notify_all();
    }

    /// True once signaled.
    pub fn is_signaled(&self) -> bool {
        *self.inner.state.lock() == FenceState::Signaled
    }
}

impl AcquireFence for MockFence {
    fn wait(&self, timeout: Duration) -> Result<(), FenceError> {
        let deadline = Instant::now() + timeout;
        let mut state = self.inner.state.lock();
        loop {
            match &*state {
                FenceState::Signaled => return Ok(()),
                FenceState::Errored(reason) => return Err(FenceError::Signaled(reason.clone())),
                FenceState::Pending => {
                    if self.inner.changed.wait_until(&mut state, deadline).timed_out() {
                        return match &*state {
                            FenceState::Signaled => Ok(()),
                            _ => Err(FenceError::Timeout(timeout)),
                        };
                    }
                }
            }
        }
    }
}
