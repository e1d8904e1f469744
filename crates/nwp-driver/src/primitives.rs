//! Blocking synchronization primitives.
//!
//! The driver needs one thing beyond plain locks: a counting semaphore that a
//! caller can block on with a deadline while the scheduler (another thread,
//! or the caller itself in cooperative mode) signals it.

use core::fmt;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

/// Error types for synchronization primitives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncError {
    /// Operation timed out.
    Timeout,
    /// Semaphore count would overflow.
    Overflow,
}

impl fmt::Display for SyncError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Timeout => write!(f, "operation timed out"),
            Self::Overflow => write!(f, "semaphore count overflow"),
        }
    }
}

impl std::error::Error for SyncError {}

pub type SyncResult<T> = Result<T, SyncError>;

/// Counting semaphore with timed waits.
///
/// # Example
///
/// ```
/// use nwp_driver::primitives::Semaphore;
/// use std::time::Duration;
///
/// let sem = Semaphore::binary();
/// sem.signal().unwrap();
/// assert!(sem.wait_timeout(Duration::from_millis(1)).is_ok());
/// assert!(sem.wait_timeout(Duration::from_millis(1)).is_err());
/// ```
pub struct Semaphore {
    count: Mutex<usize>,
    max_count: usize,
    available: Condvar,
}

impl Semaphore {
    /// Creates a new semaphore with the given initial count.
    ///
    /// # Parameters
    /// - `initial_count`: Starting value for the semaphore
    pub fn new(initial_count: usize) -> Self {
        Self::with_max(initial_count, usize::MAX)
    }

    /// Creates a new semaphore with initial and maximum counts.
    ///
    /// # Parameters
    /// - `initial_count`: Starting value for the semaphore
    /// - `max_count`: Maximum allowed value (for overflow protection)
    pub fn with_max(initial_count: usize, max_count: usize) -> Self {
        Self {
            count: Mutex::new(initial_count.min(max_count)),
            max_count,
            available: Condvar::new(),
        }
    }

    /// Creates a binary semaphore (max count = 1), initially taken.
    pub fn binary() -> Self {
        Self::with_max(0, 1)
    }

    /// Takes the semaphore if it is available, without blocking.
    pub fn try_wait(&self) -> bool {
        let mut count = self.count.lock();
        if *count > 0 {
            *count -= 1;
            true
        } else {
            false
        }
    }

    /// Blocks until the semaphore can be taken.
    pub fn wait(&self) {
        let mut count = self.count.lock();
        while *count == 0 {
            self.available.wait(&mut count);
        }
        *count -= 1;
    }

    /// Blocks until the semaphore can be taken or `timeout` elapses.
    pub fn wait_timeout(&self, timeout: Duration) -> SyncResult<()> {
        let Some(deadline) = Instant::now().checked_add(timeout) else {
            self.wait();
            return Ok(());
        };

        let mut count = self.count.lock();
        while *count == 0 {
            if self.available.wait_until(&mut count, deadline).timed_out() && *count == 0 {
                return Err(SyncError::Timeout);
            }
        }
        *count -= 1;
        Ok(())
    }

    /// Increments the count and wakes one waiter.
    pub fn signal(&self) -> SyncResult<()> {
        let mut count = self.count.lock();
        if *count >= self.max_count {
            return Err(SyncError::Overflow);
        }
        *count += 1;
        self.available.notify_one();
        Ok(())
    }

    /// Drops any pending signals.
    pub fn reset(&self) {
        *self.count.lock() = 0;
    }

    /// Returns the current count.
    pub fn count(&self) -> usize {
        *self.count.lock()
    }
}

impl fmt::Debug for Semaphore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Semaphore")
            .field("count", &self.count())
            .field("max_count", &self.max_count)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn binary_semaphore_rejects_second_signal() {
        let sem = Semaphore::binary();
        assert!(sem.signal().is_ok());
        assert_eq!(sem.signal(), Err(SyncError::Overflow));
        assert_eq!(sem.count(), 1);
    }

    #[test]
    fn wait_timeout_expires_without_signal() {
        let sem = Semaphore::new(0);
        let started = Instant::now();
        assert_eq!(
            sem.wait_timeout(Duration::from_millis(20)),
            Err(SyncError::Timeout)
        );
        assert!(started.elapsed() >= Duration::from_millis(20));
    }

    #[test]
    fn signal_from_other_thread_wakes_waiter() {
        let sem = Arc::new(Semaphore::binary());
        let signaller = Arc::clone(&sem);
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(10));
            signaller.signal().unwrap();
        });
        assert!(sem.wait_timeout(Duration::from_secs(5)).is_ok());
        handle.join().unwrap();
    }

    #[test]
    fn reset_discards_pending_signals() {
        let sem = Semaphore::new(3);
        sem.reset();
        assert!(!sem.try_wait());
    }
}
