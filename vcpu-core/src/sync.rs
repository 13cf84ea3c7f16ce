//! Blocking synchronization primitives for the vCPU worker protocol.

use std::sync::{Condvar, Mutex};

/// Counting semaphore.
///
/// The worker protocol needs "wait until N things have happened" semantics
/// that `Condvar` alone does not give: a permit posted before the waiter
/// arrives must not be lost.
pub struct Semaphore {
    count: Mutex<u32>,
    cond: Condvar,
}

impl Semaphore {
    pub const fn new() -> Self {
        Self {
            count: Mutex::new(0),
            cond: Condvar::new(),
        }
    }

    /// Posts one permit, waking a waiter if any.
    pub fn up(&self) {
        let mut count = self.count.lock().unwrap();
        *count += 1;
        self.cond.notify_one();
    }

    /// Blocks until a permit is available and consumes it.
    pub fn down(&self) {
        let mut count = self.count.lock().unwrap();
        while *count == 0 {
            count = self.cond.wait(count).unwrap();
        }
        *count -= 1;
    }
}
