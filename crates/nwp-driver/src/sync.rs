//! Lock abstraction for driver state.
//!
//! Provides a `Mutex` that is backed by `parking_lot::Mutex` by default and
//! by `spin::Mutex` when the `lock-free` feature is enabled. Neither backend
//! poisons, so `lock` never fails.

pub use std::sync::Arc;

#[cfg(not(feature = "lock-free"))]
pub type MutexGuard<'a, T> = parking_lot::MutexGuard<'a, T>;
#[cfg(feature = "lock-free")]
pub type MutexGuard<'a, T> = spin::MutexGuard<'a, T>;

/// Backend-agnostic mutex wrapper.
pub struct Mutex<T> {
    #[cfg(not(feature = "lock-free"))]
    inner: parking_lot::Mutex<T>,
    #[cfg(feature = "lock-free")]
    inner: spin::Mutex<T>,
}

impl<T> Mutex<T> {
    /// Creates a new mutex protecting the given value.
    pub fn new(value: T) -> Self {
        Self {
            #[cfg(not(feature = "lock-free"))]
            inner: parking_lot::Mutex::new(value),
            #[cfg(feature = "lock-free")]
            inner: spin::Mutex::new(value),
        }
    }

    /// Acquires the mutex, blocking until it becomes available.
    pub fn lock(&self) -> MutexGuard<'_, T> {
        self.inner.lock()
    }

    /// Acquires the mutex only if nobody holds it.
    pub fn try_lock(&self) -> Option<MutexGuard<'_, T>> {
        self.inner.try_lock()
    }
}

impl<T: core::fmt::Debug> core::fmt::Debug for Mutex<T> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Debug::fmt(&self.inner, f)
    }
}

impl<T: Default> Default for Mutex<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}
