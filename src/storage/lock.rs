//! A non-recursive reader-writer lock.
//!
//! `std::sync::RwLock` already refuses recursive write acquisition by
//! deadlocking, which is the opposite of the behavior wanted here:
//! recursion must be *reported*, not silently block forever. `StoreLock<T>`
//! wraps the data it guards directly (the engine), plus a thread-local
//! write-holder flag so a second write acquisition from the same OS thread
//! fails fast with `LockError::Recursion`.

use std::cell::Cell;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::{Duration, Instant};

use crate::error::LockError;

thread_local! {
    static HOLDS_WRITE: Cell<bool> = const { Cell::new(false) };
}

pub struct StoreLock<T> {
    inner: RwLock<T>,
}

pub struct ReadLease<'a, T> {
    guard: RwLockReadGuard<'a, T>,
}

pub struct WriteLease<'a, T> {
    guard: RwLockWriteGuard<'a, T>,
}

impl<T> std::ops::Deref for ReadLease<'_, T> {
    type Target = T;
    fn deref(&self) -> &T {
        &self.guard
    }
}

impl<T> std::ops::Deref for WriteLease<'_, T> {
    type Target = T;
    fn deref(&self) -> &T {
        &self.guard
    }
}

impl<T> std::ops::DerefMut for WriteLease<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.guard
    }
}

impl<T> StoreLock<T> {
    pub fn new(value: T) -> Self {
        Self {
            inner: RwLock::new(value),
        }
    }

    /// Multiple readers allowed concurrently.
    pub fn acquire_read(&self) -> Result<ReadLease<'_, T>, LockError> {
        let guard = self.inner.read().map_err(|_| LockError::NotHeld)?;
        Ok(ReadLease { guard })
    }

    /// Acquires the write lock exclusively, failing immediately (not
    /// blocking) if this OS thread already holds it: re-entrant
    /// acquisition from the same flow fails with a "lock recursion"
    /// error rather than deadlocking.
    pub fn acquire_write(&self) -> Result<WriteLease<'_, T>, LockError> {
        if HOLDS_WRITE.with(|h| h.get()) {
            return Err(LockError::Recursion);
        }
        let guard = self.inner.write().map_err(|_| LockError::NotHeld)?;
        HOLDS_WRITE.with(|h| h.set(true));
        Ok(WriteLease { guard })
    }

    /// As `acquire_write`, but gives up after `timeout` rather than
    /// blocking indefinitely.
    pub fn acquire_write_timeout(&self, timeout: Duration) -> Result<WriteLease<'_, T>, LockError> {
        if HOLDS_WRITE.with(|h| h.get()) {
            return Err(LockError::Recursion);
        }
        let deadline = Instant::now() + timeout;
        loop {
            if let Ok(guard) = self.inner.try_write() {
                HOLDS_WRITE.with(|h| h.set(true));
                return Ok(WriteLease { guard });
            }
            if Instant::now() >= deadline {
                return Err(LockError::TimedOut);
            }
            std::thread::yield_now();
        }
    }
}

impl<T> Drop for WriteLease<'_, T> {
    fn drop(&mut self) {
        HOLDS_WRITE.with(|h| h.set(false));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn concurrent_reads_are_allowed() {
        let lock = StoreLock::new(0u32);
        let a = lock.acquire_read().unwrap();
        let b = lock.acquire_read().unwrap();
        drop(a);
        drop(b);
    }

    #[test]
    fn write_recursion_is_reported_not_deadlocked() {
        let lock = StoreLock::new(0u32);
        let _write = lock.acquire_write().unwrap();
        let err = lock.acquire_write().unwrap_err();
        assert!(matches!(err, LockError::Recursion));
    }

    #[test]
    fn write_lock_releases_recursion_guard_on_drop() {
        let lock = StoreLock::new(0u32);
        {
            let mut w = lock.acquire_write().unwrap();
            *w += 1;
        }
        let w2 = lock.acquire_write().unwrap();
        assert_eq!(*w2, 1);
    }
}
