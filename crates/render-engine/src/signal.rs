//! Single-slot "frame available" signal.
//!
//! Raised from the GPU poll thread when queued work completes; awaited by
//! the pipeline thread with a bounded wait. The flag is cleared every time
//! a wait returns, whether it was signalled or timed out.

use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

#[derive(Debug, Default)]
pub struct FrameSignal {
    available: Mutex<bool>,
    cond: Condvar,
}

impl FrameSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark the slot as available and wake the waiter.
    pub fn notify(&self) {
        let mut available = self.available.lock();
        *available = true;
        self.cond.notify_one();
    }

    /// Block until the signal is raised or `timeout` elapses. Returns
    /// whether the signal arrived.
    pub fn wait(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut available = self.available.lock();
        while !*available {
            if self.cond.wait_until(&mut available, deadline).timed_out() {
                break;
            }
        }
        let arrived = *available;
        *available = false;
        arrived
    }
}
