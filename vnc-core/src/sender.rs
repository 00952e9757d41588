//! Ordered, single-worker command queue for outbound traffic.
//!
//! Submitting is O(1) and never blocks, so the UI thread can push key
//! and pointer events without ever waiting on a socket. One worker
//! thread executes commands strictly in submission order.
//!
//! Shutdown closes the queue to new submissions and discards whatever
//! is still pending; a command already running is allowed to finish.

use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self as std_mpsc, RecvTimeoutError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{debug, warn};

/// A unit of outbound work.
pub type Command = Box<dyn FnOnce() + Send + 'static>;

pub struct SenderQueue {
    tx: mpsc::UnboundedSender<Command>,
    closed: Arc<AtomicBool>,
    worker: std::sync::Mutex<Option<Worker>>,
}

impl SenderQueue {
    /// Spawn the worker thread.
    pub fn start(name: &str) -> io::Result<Self> {
        let (tx, mut rx) = mpsc::unbounded_channel::<Command>();
        let closed = Arc::new(AtomicBool::new(false));

        let worker_closed = Arc::clone(&closed);
        let worker = Worker::spawn(name, move || {
            while let Some(command) = rx.blocking_recv() {
                if worker_closed.load(Ordering::Acquire) {
                    break;
                }
                command();
            }
            debug!("sender worker exiting");
        })?;

        Ok(Self {
            tx,
            closed,
            worker: std::sync::Mutex::new(Some(worker)),
        })
    }

    /// Queue `command` for execution.
    ///
    /// Returns `false` if the queue has been shut down, in which case
    /// the command is dropped without running.
    pub fn submit<F>(&self, command: F) -> bool
    where
        F: FnOnce() + Send + 'static,
    {
        if self.is_closed() {
            return false;
        }
        self.tx.send(Box::new(command)).is_ok()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Close the queue and discard pending commands without waiting.
    ///
    /// Returns `false` if it was already closed.
    pub fn close(&self) -> bool {
        if self.closed.swap(true, Ordering::AcqRel) {
            return false;
        }
        // Wake the worker so it observes the flag even when idle.
        let _ = self.tx.send(Box::new(|| {}));
        true
    }

    /// Close the queue and wait up to `timeout` for the worker to exit.
    ///
    /// Returns `true` if the worker is gone. A worker still stuck in a
    /// command after `timeout` is abandoned.
    pub fn shutdown(&self, timeout: Duration) -> bool {
        self.close();
        let worker = self
            .worker
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .take();
        match worker {
            Some(worker) => worker.join(timeout),
            None => true,
        }
    }
}

impl Drop for SenderQueue {
    fn drop(&mut self) {
        self.close();
    }
}

/// A named thread whose exit can be awaited with a deadline.
pub(crate) struct Worker {
    handle: JoinHandle<()>,
    exited: std_mpsc::Receiver<()>,
}

impl Worker {
    pub(crate) fn spawn<F>(name: &str, f: F) -> io::Result<Self>
    where
        F: FnOnce() + Send + 'static,
    {
        let (exit_tx, exited) = std_mpsc::channel::<()>();
        let handle = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                // Dropped on return or unwind, which disconnects `exited`.
                let _exit = exit_tx;
                f();
            })?;
        Ok(Self { handle, exited })
    }

    /// Join the thread, giving up after `timeout`.
    ///
    /// Joining from the worker itself is skipped (it would never finish).
    pub(crate) fn join(self, timeout: Duration) -> bool {
        if self.handle.thread().id() == thread::current().id() {
            return true;
        }
        if let Err(RecvTimeoutError::Timeout) = self.exited.recv_timeout(timeout) {
            warn!(
                thread = self.handle.thread().name().unwrap_or("<unnamed>"),
                "thread did not exit within {timeout:?}; abandoning it"
            );
            return false;
        }
        if self.handle.join().is_err() {
            warn!("worker thread panicked");
        }
        true
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::time::Instant;

    #[test]
    fn executes_in_submission_order() {
        let queue = SenderQueue::start("test-sender").unwrap();
        let seen = Arc::new(Mutex::new(Vec::new()));

        for i in 0..100 {
            let seen = Arc::clone(&seen);
            assert!(queue.submit(move || seen.lock().unwrap().push(i)));
        }

        let (done_tx, done_rx) = std_mpsc::channel();
        queue.submit(move || done_tx.send(()).unwrap());
        done_rx.recv_timeout(Duration::from_secs(5)).unwrap();

        assert_eq!(*seen.lock().unwrap(), (0..100).collect::<Vec<_>>());
        assert!(queue.shutdown(Duration::from_secs(5)));
    }

    #[test]
    fn submit_after_close_is_rejected() {
        let queue = SenderQueue::start("test-sender").unwrap();
        assert!(queue.close());
        assert!(!queue.close());

        let ran = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&ran);
        assert!(!queue.submit(move || flag.store(true, Ordering::SeqCst)));
        assert!(queue.shutdown(Duration::from_secs(5)));
        assert!(!ran.load(Ordering::SeqCst));
    }

    #[test]
    fn pending_commands_are_discarded_on_shutdown() {
        let queue = SenderQueue::start("test-sender").unwrap();
        let (started_tx, started_rx) = std_mpsc::channel();
        let (release_tx, release_rx) = std_mpsc::channel::<()>();

        queue.submit(move || {
            started_tx.send(()).unwrap();
            let _ = release_rx.recv_timeout(Duration::from_secs(5));
        });
        started_rx.recv_timeout(Duration::from_secs(5)).unwrap();

        let ran = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&ran);
        assert!(queue.submit(move || flag.store(true, Ordering::SeqCst)));

        queue.close();
        release_tx.send(()).unwrap();
        assert!(queue.shutdown(Duration::from_secs(5)));
        assert!(!ran.load(Ordering::SeqCst));
    }

    #[test]
    fn shutdown_abandons_stuck_worker() {
        let queue = SenderQueue::start("test-sender").unwrap();
        let (started_tx, started_rx) = std_mpsc::channel();
        queue.submit(move || {
            started_tx.send(()).unwrap();
            thread::sleep(Duration::from_millis(500));
        });
        started_rx.recv_timeout(Duration::from_secs(5)).unwrap();

        assert!(!queue.shutdown(Duration::from_millis(20)));
        // Second shutdown has no worker left to wait for.
        assert!(queue.shutdown(Duration::from_millis(20)));
    }

    #[test]
    fn worker_join_returns_once_thread_exits() {
        let worker = Worker::spawn("test-worker", || thread::sleep(Duration::from_millis(30))).unwrap();
        let start = Instant::now();
        assert!(worker.join(Duration::from_secs(5)));
        assert!(start.elapsed() < Duration::from_secs(2));
    }

    #[test]
    fn worker_join_gives_up_on_deadline() {
        let worker = Worker::spawn("test-worker", || thread::sleep(Duration::from_millis(500))).unwrap();
        let start = Instant::now();
        assert!(!worker.join(Duration::from_millis(20)));
        assert!(start.elapsed() < Duration::from_millis(400));
    }

    #[test]
    fn panicking_worker_still_joins() {
        let worker = Worker::spawn("test-worker", || panic!("boom")).unwrap();
        assert!(worker.join(Duration::from_secs(5)));
    }
}
