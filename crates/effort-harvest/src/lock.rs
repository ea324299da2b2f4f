//! Per-term harvest locks.
//!
//! These only exclude harvests running in the same process. Callers that run
//! several processes against one store need their own per-term lease.

use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// Lock table keyed by term code. Entries live only while someone holds or
/// waits for them.
#[derive(Default)]
pub struct TermLocks {
    locks: DashMap<i32, Arc<Mutex<()>>>,
}

/// Held term lock. Dropping it releases the term and forgets its entry when
/// nobody else is waiting.
pub struct TermLockGuard<'a> {
    locks: &'a TermLocks,
    term_code: i32,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for TermLockGuard<'_> {
    fn drop(&mut self) {
        drop(self.guard.take());
        // the shard lock keeps a concurrent `lock_for` from cloning mid-check
        self.locks
            .locks
            .remove_if(&self.term_code, |_, lock| Arc::strong_count(lock) == 1);
    }
}

impl TermLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Gets or creates the lock for the given term.
    fn lock_for(&self, term_code: i32) -> Arc<Mutex<()>> {
        self.locks
            .entry(term_code)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    fn guard(&self, term_code: i32, guard: OwnedMutexGuard<()>) -> TermLockGuard<'_> {
        TermLockGuard {
            locks: self,
            term_code,
            guard: Some(guard),
        }
    }

    /// Takes the term lock if nobody holds it.
    pub fn try_acquire(&self, term_code: i32) -> Option<TermLockGuard<'_>> {
        match self.lock_for(term_code).try_lock_owned() {
            Ok(guard) => Some(self.guard(term_code, guard)),
            Err(_) => {
                self.locks
                    .remove_if(&term_code, |_, lock| Arc::strong_count(lock) == 1);
                None
            }
        }
    }

    /// Waits for the term lock.
    pub async fn acquire(&self, term_code: i32) -> TermLockGuard<'_> {
        let guard = self.lock_for(term_code).lock_owned().await;
        self.guard(term_code, guard)
    }

    /// True while some harvest holds the term lock.
    pub fn is_locked(&self, term_code: i32) -> bool {
        self.locks
            .get(&term_code)
            .map(|lock| lock.try_lock().is_err())
            .unwrap_or(false)
    }

    /// Number of terms currently held or awaited.
    pub fn tracked_terms(&self) -> usize {
        self.locks.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_second_acquire_fails_while_held() {
        let locks = TermLocks::new();
        let guard = locks.try_acquire(202409).unwrap();

        assert!(locks.is_locked(202409));
        assert!(locks.try_acquire(202409).is_none());
        assert!(locks.try_acquire(202410).is_some());

        drop(guard);
        assert!(!locks.is_locked(202409));
        let _again = locks.acquire(202409).await;
    }

    #[tokio::test]
    async fn test_released_terms_are_forgotten() {
        let locks = TermLocks::new();
        let guard = locks.try_acquire(202409).unwrap();
        assert_eq!(locks.tracked_terms(), 1);

        // a rejected attempt leaves the holder's entry alone
        assert!(locks.try_acquire(202409).is_none());
        assert_eq!(locks.tracked_terms(), 1);

        drop(guard);
        assert_eq!(locks.tracked_terms(), 0);

        drop(locks.acquire(999999).await);
        assert_eq!(locks.tracked_terms(), 0);
    }
}
