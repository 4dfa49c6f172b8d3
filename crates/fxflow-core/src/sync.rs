//! Counting semaphore for submission throttling.
//!
//! Used in two places: `Context::wait`/`Context::resume` (a caller-driven
//! throttle against GPU completion) and the frame pump's in-flight frame
//! bound. Both default to three buffered frames.

use parking_lot::{Condvar, Mutex};
use std::time::Duration;

/// A counting semaphore.
///
/// `acquire` blocks while no permits are available; `release` returns a
/// permit and wakes one waiter. Permits may be released from a different
/// thread than the one that acquired them (completion callbacks do this).
#[derive(Debug)]
pub struct Semaphore {
    permits: Mutex<usize>,
    cond: Condvar,
}

impl Semaphore {
    /// Creates a semaphore with `permits` initial permits.
    pub fn new(permits: usize) -> Self {
        Self {
            permits: Mutex::new(permits),
            cond: Condvar::new(),
        }
    }

    /// Blocks until a permit is available, then takes it.
    pub fn acquire(&self) {
        let mut permits = self.permits.lock();
        while *permits == 0 {
            self.cond.wait(&mut permits);
        }
        *permits -= 1;
    }

    /// Takes a permit if one is available without blocking.
    pub fn try_acquire(&self) -> bool {
        let mut permits = self.permits.lock();
        if *permits == 0 {
            return false;
        }
        *permits -= 1;
        true
    }

    /// Like [`acquire`](Self::acquire) with a timeout. Returns `false` if
    /// the timeout elapsed without a permit becoming available.
    pub fn acquire_timeout(&self, timeout: Duration) -> bool {
        let mut permits = self.permits.lock();
        while *permits == 0 {
            if self.cond.wait_for(&mut permits, timeout).timed_out() {
                return false;
            }
        }
        *permits -= 1;
        true
    }

    /// Returns a permit and wakes one waiter.
    pub fn release(&self) {
        let mut permits = self.permits.lock();
        *permits += 1;
        self.cond.notify_one();
    }

    /// Current number of available permits.
    pub fn available(&self) -> usize {
        *self.permits.lock()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_try_acquire_exhaustion() {
        let sem = Semaphore::new(2);
        assert!(sem.try_acquire());
        assert!(sem.try_acquire());
        assert!(!sem.try_acquire());
        sem.release();
        assert!(sem.try_acquire());
    }

    #[test]
    fn test_release_wakes_waiter() {
        let sem = Arc::new(Semaphore::new(0));
        let sem2 = sem.clone();
        let handle = thread::spawn(move || {
            sem2.acquire();
        });
        thread::sleep(Duration::from_millis(20));
        sem.release();
        handle.join().unwrap();
        assert_eq!(sem.available(), 0);
    }

    #[test]
    fn test_acquire_timeout() {
        let sem = Semaphore::new(0);
        assert!(!sem.acquire_timeout(Duration::from_millis(10)));
        sem.release();
        assert!(sem.acquire_timeout(Duration::from_millis(10)));
    }

    #[test]
    fn test_available() {
        let sem = Semaphore::new(3);
        assert_eq!(sem.available(), 3);
        sem.acquire();
        assert_eq!(sem.available(), 2);
        sem.release();
        assert_eq!(sem.available(), 3);
    }
}
