//! Reader/writer guard over the session's engine slot.
//!
//! Three ways in:
//!
//! | Mode              | Blocks? | Used by                                  |
//! |-------------------|---------|------------------------------------------|
//! | [`Guard::read`]     | yes     | `connect`, reader loop, sender worker    |
//! | [`Guard::try_read`] | never   | UI/renderer entry points, `interrupt`    |
//! | [`Guard::write`]    | yes     | state transitions and teardown only      |
//!
//! `try_read` returns `None` whenever the lock is not immediately
//! available. Callers treat that as "session is being torn down" and
//! skip their work; a spurious miss under scheduler jitter is accepted.

use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard, TryLockError};

/// A reader/writer lock with a non-blocking read mode.
///
/// Poisoning is ignored: the protected value is only ever mutated by
/// short, non-panicking critical sections.
#[derive(Debug, Default)]
pub struct Guard<T> {
    lock: RwLock<T>,
}

impl<T> Guard<T> {
    pub fn new(value: T) -> Self {
        Self {
            lock: RwLock::new(value),
        }
    }

    /// Blocking read-acquire. Waits for an active writer to finish.
    pub fn read(&self) -> RwLockReadGuard<'_, T> {
        self.lock.read().unwrap_or_else(PoisonError::into_inner)
    }

    /// Non-blocking read-acquire.
    ///
    /// Returns `None` immediately if a writer holds (or is queued for)
    /// the lock.
    pub fn try_read(&self) -> Option<RwLockReadGuard<'_, T>> {
        match self.lock.try_read() {
            Ok(guard) => Some(guard),
            Err(TryLockError::Poisoned(poisoned)) => Some(poisoned.into_inner()),
            Err(TryLockError::WouldBlock) => None,
        }
    }

    /// Exclusive write-acquire. Waits for outstanding readers to drain.
    pub fn write(&self) -> RwLockWriteGuard<'_, T> {
        self.lock.write().unwrap_or_else(PoisonError::into_inner)
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Barrier};
    use std::thread;
    use std::time::Duration;

    #[test]
    fn readers_share() {
        let guard = Guard::new(7u32);
        let a = guard.read();
        let b = guard.try_read().expect("second reader");
        assert_eq!(*a + *b, 14);
    }

    #[test]
    fn try_read_skips_while_writer_active() {
        let guard = Arc::new(Guard::new(false));
        let held = Arc::new(Barrier::new(2));
        let release = Arc::new(Barrier::new(2));

        let writer = {
            let guard = Arc::clone(&guard);
            let held = Arc::clone(&held);
            let release = Arc::clone(&release);
            thread::spawn(move || {
                let mut w = guard.write();
                *w = true;
                held.wait();
                release.wait();
            })
        };

        held.wait();
        assert!(guard.try_read().is_none());
        release.wait();
        writer.join().unwrap();

        assert!(*guard.try_read().expect("writer released"));
    }

    #[test]
    fn write_waits_for_reader() {
        let guard = Arc::new(Guard::new(0u32));
        let reading = Arc::new(Barrier::new(2));

        let reader = {
            let guard = Arc::clone(&guard);
            let reading = Arc::clone(&reading);
            thread::spawn(move || {
                let r = guard.read();
                reading.wait();
                thread::sleep(Duration::from_millis(50));
                *r
            })
        };

        reading.wait();
        *guard.write() = 5;
        assert_eq!(reader.join().unwrap(), 0);
        assert_eq!(*guard.read(), 5);
    }

    #[test]
    fn poisoned_lock_still_readable() {
        let guard = Arc::new(Guard::new(1u8));
        let g = Arc::clone(&guard);
        let _ = thread::spawn(move || {
            let _w = g.write();
            panic!("poison");
        })
        .join();

        assert_eq!(*guard.read(), 1);
        assert_eq!(*guard.try_read().unwrap(), 1);
    }
}
