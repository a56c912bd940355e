//! The process-wide Radio Lock (§5).
//!
//! Exactly one caller may hold the lease at a time. Acquisition is
//! non-blocking: a busy lock surfaces as [`crate::Error::RadioBusy`]
//! rather than queuing. The guard's `Drop` impl is the only release
//! path, so the lease is freed on every exit including panic/unwind.

use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

#[derive(Debug, Clone, Default)]
pub struct RadioLock {
    inner: Arc<Mutex<()>>,
}

/// Holds the radio lease until dropped.
#[derive(Debug)]
pub struct RadioLockGuard {
    _guard: OwnedMutexGuard<()>,
}

impl RadioLock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attempts to acquire the lease without waiting. Fails fast with
    /// [`crate::Error::RadioBusy`] if another attempt already holds it.
    pub fn try_acquire(&self) -> crate::Result<RadioLockGuard> {
        match self.inner.clone().try_lock_owned() {
            Ok(guard) => Ok(RadioLockGuard { _guard: guard }),
            Err(_) => Err(crate::Error::RadioBusy),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_acquire_fails_fast_while_first_is_held() {
        let lock = RadioLock::new();
        let first = lock.try_acquire().unwrap();
        let second = lock.try_acquire();
        assert!(matches!(second, Err(crate::Error::RadioBusy)));
        drop(first);
        assert!(lock.try_acquire().is_ok());
    }
}
