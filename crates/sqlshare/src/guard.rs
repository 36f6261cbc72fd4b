//! Thread-affinity enforcement for connections and cursors.
//!
//! Every handle carries a [`ThreadGuard`] that is consulted before any work.
//! In [`ThreadMode::Strict`] the guard remembers the thread that created the
//! handle and rejects every other caller until the handle is explicitly
//! released. In [`ThreadMode::Relaxed`] any thread is admitted and mutual
//! exclusion is left to the handle's execution context lock.
//!
//! The check reads a small lock private to the guard and never touches the
//! execution context or the dataset, so a rejected call has no side effects.

use sqlshare_core::{CrossThreadError, Error, HandleKind, Result};
use std::sync::{PoisonError, RwLock};
use std::thread::{self, ThreadId};

/// Thread-affinity policy, fixed when the handle is created.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadMode {
    /// Only the bound thread may use the handle.
    Strict,
    /// Any thread may use the handle; calls are serialized per handle.
    Relaxed,
}

impl ThreadMode {
    pub fn from_allow_cross_thread(allow: bool) -> Self {
        if allow {
            ThreadMode::Relaxed
        } else {
            ThreadMode::Strict
        }
    }
}

/// Which threads a handle currently accepts in strict mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Affinity {
    /// Only this thread.
    Bound(ThreadId),
    /// Any thread, after an explicit release.
    Released,
}

/// Per-handle thread-affinity policy.
#[derive(Debug)]
pub struct ThreadGuard {
    handle: HandleKind,
    mode: ThreadMode,
    affinity: RwLock<Affinity>,
}

impl ThreadGuard {
    /// Create a guard bound to the calling thread.
    pub fn new(handle: HandleKind, mode: ThreadMode) -> Self {
        Self {
            handle,
            mode,
            affinity: RwLock::new(Affinity::Bound(thread::current().id())),
        }
    }

    pub fn mode(&self) -> ThreadMode {
        self.mode
    }

    pub fn affinity(&self) -> Affinity {
        *self.affinity.read().unwrap_or_else(PoisonError::into_inner)
    }

    /// Admit or reject the calling thread.
    pub fn check(&self) -> Result<()> {
        if self.mode == ThreadMode::Relaxed {
            return Ok(());
        }
        self.admit(self.affinity())
    }

    fn admit(&self, affinity: Affinity) -> Result<()> {
        match affinity {
            Affinity::Released => Ok(()),
            Affinity::Bound(bound) => {
                let caller = thread::current().id();
                if bound == caller {
                    Ok(())
                } else {
                    tracing::warn!(
                        handle = %self.handle,
                        ?bound,
                        ?caller,
                        "Rejected cross-thread call"
                    );
                    Err(Error::CrossThread(CrossThreadError {
                        handle: self.handle,
                        bound,
                        caller,
                    }))
                }
            }
        }
    }

    /// Check the caller and replace the affinity under one write lock.
    fn transition(&self, to: impl FnOnce(ThreadId) -> Affinity) -> Result<()> {
        let mut affinity = self.affinity.write().unwrap_or_else(PoisonError::into_inner);
        if self.mode == ThreadMode::Strict {
            self.admit(*affinity)?;
        }
        let next = to(thread::current().id());
        if *affinity != next {
            tracing::debug!(handle = %self.handle, from = ?*affinity, to = ?next, "Changed thread affinity");
            *affinity = next;
        }
        Ok(())
    }

    /// Allow any thread to use the handle.
    ///
    /// Only the bound thread (or any thread, once released) may release.
    pub fn release(&self) -> Result<()> {
        self.transition(|_| Affinity::Released)
    }

    /// Bind the handle to the calling thread.
    ///
    /// Permitted from the bound thread, or from any thread once released.
    /// When several released-mode callers race, exactly one wins.
    pub fn bind_to_current(&self) -> Result<()> {
        self.transition(Affinity::Bound)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Barrier};

    fn on_other_thread<T: Send + 'static>(f: impl FnOnce() -> T + Send + 'static) -> T {
        thread::spawn(f).join().unwrap()
    }

    #[test]
    fn test_strict_admits_owner_only() {
        let guard = Arc::new(ThreadGuard::new(HandleKind::Connection, ThreadMode::Strict));
        assert!(guard.check().is_ok());

        let remote = Arc::clone(&guard);
        match on_other_thread(move || remote.check()) {
            Err(Error::CrossThread(e)) => {
                assert_eq!(e.handle, HandleKind::Connection);
                assert_eq!(e.bound, thread::current().id());
                assert_ne!(e.caller, e.bound);
            }
            other => panic!("expected cross-thread error, got {other:?}"),
        }
    }

    #[test]
    fn test_relaxed_admits_everyone() {
        let guard = Arc::new(ThreadGuard::new(HandleKind::Cursor, ThreadMode::Relaxed));
        let remote = Arc::clone(&guard);
        assert!(on_other_thread(move || remote.check()).is_ok());
    }

    #[test]
    fn test_release_then_rebind() {
        let guard = Arc::new(ThreadGuard::new(HandleKind::Cursor, ThreadMode::Strict));
        guard.release().unwrap();
        assert_eq!(guard.affinity(), Affinity::Released);

        let remote = Arc::clone(&guard);
        let worker = on_other_thread(move || {
            remote.check().unwrap();
            remote.bind_to_current().unwrap();
            thread::current().id()
        });
        assert_eq!(guard.affinity(), Affinity::Bound(worker));
        assert!(matches!(guard.check(), Err(Error::CrossThread(_))));
    }

    #[test]
    fn test_racing_binds_have_one_winner() {
        for _ in 0..100 {
            let guard = Arc::new(ThreadGuard::new(HandleKind::Cursor, ThreadMode::Strict));
            guard.release().unwrap();
            let barrier = Arc::new(Barrier::new(2));

            let contenders: Vec<_> = (0..2)
                .map(|_| {
                    let guard = Arc::clone(&guard);
                    let barrier = Arc::clone(&barrier);
                    thread::spawn(move || {
                        barrier.wait();
                        (guard.bind_to_current().is_ok(), thread::current().id())
                    })
                })
                .collect();
            let outcomes: Vec<_> = contenders.into_iter().map(|h| h.join().unwrap()).collect();

            let winners: Vec<_> = outcomes.iter().filter(|(won, _)| *won).collect();
            assert_eq!(winners.len(), 1);
            assert_eq!(guard.affinity(), Affinity::Bound(winners[0].1));
        }
    }

    #[test]
    fn test_foreign_thread_cannot_release() {
        let guard = Arc::new(ThreadGuard::new(HandleKind::Connection, ThreadMode::Strict));
        let remote = Arc::clone(&guard);
        assert!(on_other_thread(move || remote.release()).is_err());
        assert_eq!(guard.affinity(), Affinity::Bound(thread::current().id()));
    }

    #[test]
    fn test_mode_from_flag() {
        assert_eq!(ThreadMode::from_allow_cross_thread(true), ThreadMode::Relaxed);
        assert_eq!(ThreadMode::from_allow_cross_thread(false), ThreadMode::Strict);
    }
}
