//! Row-level key locks
//!
//! Claims use [`KeyLocks::try_acquire`], which never waits: a row another
//! claim is already holding is skipped, the same way `FOR UPDATE SKIP LOCKED`
//! skips contended rows. Writers that must not skip (completing or failing a
//! task they hold) use [`KeyLocks::acquire`], which waits only for the short
//! read-modify-write of the current holder.

use std::collections::HashSet;
use std::sync::{Condvar, Mutex};

use super::store::{StoreError, StoreResult};

/// Set of currently locked keys
#[derive(Debug, Default)]
pub struct KeyLocks {
    held: Mutex<HashSet<String>>,
    released: Condvar,
}

impl KeyLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Lock `key` if nobody holds it; `None` if contended
    pub fn try_acquire(&self, key: &str) -> StoreResult<Option<KeyGuard<'_>>> {
        let mut held = self.held.lock().map_err(|_| StoreError::LockPoisoned)?;
        if !held.insert(key.to_string()) {
            return Ok(None);
        }
        Ok(Some(KeyGuard {
            locks: self,
            key: key.to_string(),
        }))
    }

    /// Lock `key`, waiting for the current holder to release it
    pub fn acquire(&self, key: &str) -> StoreResult<KeyGuard<'_>> {
        let mut held = self.held.lock().map_err(|_| StoreError::LockPoisoned)?;
        while held.contains(key) {
            held = self
                .released
                .wait(held)
                .map_err(|_| StoreError::LockPoisoned)?;
        }
        held.insert(key.to_string());
        Ok(KeyGuard {
            locks: self,
            key: key.to_string(),
        })
    }

    fn release(&self, key: &str) {
        // A poisoned set still has to let waiters through
        let mut held = match self.held.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        held.remove(key);
        drop(held);
        self.released.notify_all();
    }
}

/// Releases its key on drop
#[derive(Debug)]
pub struct KeyGuard<'a> {
    locks: &'a KeyLocks,
    key: String,
}

impl Drop for KeyGuard<'_> {
    fn drop(&mut self) {
        self.locks.release(&self.key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn test_try_acquire_skips_held_key() {
        let locks = KeyLocks::new();
        let guard = locks.try_acquire("task:1").unwrap();
        assert!(guard.is_some());
        assert!(locks.try_acquire("task:1").unwrap().is_none());
        assert!(locks.try_acquire("task:2").unwrap().is_some());

        drop(guard);
        assert!(locks.try_acquire("task:1").unwrap().is_some());
    }

    #[test]
    fn test_acquire_waits_for_release() {
        let locks = Arc::new(KeyLocks::new());
        let guard = locks.try_acquire("row").unwrap().unwrap();

        let waiter = {
            let locks = Arc::clone(&locks);
            std::thread::spawn(move || {
                let _guard = locks.acquire("row").unwrap();
                true
            })
        };

        std::thread::sleep(Duration::from_millis(20));
        assert!(!waiter.is_finished());
        drop(guard);
        assert!(waiter.join().unwrap());
    }
}
