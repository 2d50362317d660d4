//! The owning-context event loop.
//!
//! An [`EventLoop`] is created on the thread that owns the application's
//! callbacks (the UI thread in a GUI application). Background workers hold a
//! cheap, cloneable [`ContextHandle`] and post [`QueuedInvocation`]s to it;
//! the owning thread executes them in FIFO order whenever it drains the loop.
//!
//! # Example
//!
//! ```
//! use courier_core::EventLoop;
//! use std::time::Duration;
//!
//! let event_loop = EventLoop::new();
//! let handle = event_loop.handle();
//!
//! std::thread::spawn(move || {
//!     handle.post(|| println!("runs on the owning thread")).unwrap();
//! });
//!
//! assert!(event_loop.process_one_timeout(Duration::from_secs(5)));
//! ```

use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, unbounded};

use crate::error::{ContextError, Result};
use crate::invocation::QueuedInvocation;
use crate::logging::targets;
use crate::thread_check::ThreadAffinity;

/// A handle for posting work to an owning context from any thread.
#[derive(Clone)]
pub struct ContextHandle {
    affinity: ThreadAffinity,
    sender: Sender<QueuedInvocation>,
}

impl ContextHandle {
    /// Post a closure to run on the owning context.
    ///
    /// Returns [`ContextError::Closed`] if the event loop has been dropped;
    /// the closure is discarded in that case.
    pub fn post<F>(&self, f: F) -> Result<()>
    where
        F: FnOnce() + Send + 'static,
    {
        let invocation = QueuedInvocation::new(f);
        let id = invocation.id();
        self.sender.send(invocation).map_err(|_| {
            tracing::error!(
                target: targets::EVENT_LOOP,
                invocation = id.as_u64(),
                "owning context closed; dropping queued invocation"
            );
            ContextError::Closed
        })?;
        tracing::trace!(target: targets::EVENT_LOOP, invocation = id.as_u64(), "posted");
        Ok(())
    }

    /// Check whether the caller is running on the owning context.
    #[inline]
    pub fn is_current(&self) -> bool {
        self.affinity.is_same_thread()
    }

    /// The owning context's thread affinity.
    #[inline]
    pub fn affinity(&self) -> ThreadAffinity {
        self.affinity
    }
}

impl std::fmt::Debug for ContextHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContextHandle")
            .field("affinity", &self.affinity)
            .finish()
    }
}

/// A single-threaded, cooperative queue of deferred invocations.
///
/// The loop never runs on its own; the owning thread drains it with
/// [`process_pending`](Self::process_pending) from its own main loop, or
/// blocks on it with [`process_one_timeout`](Self::process_one_timeout) and
/// [`run_until`](Self::run_until).
pub struct EventLoop {
    affinity: ThreadAffinity,
    sender: Sender<QueuedInvocation>,
    receiver: Receiver<QueuedInvocation>,
}

impl Default for EventLoop {
    fn default() -> Self {
        Self::new()
    }
}

impl EventLoop {
    /// Create an event loop owned by the current thread.
    pub fn new() -> Self {
        let (sender, receiver) = unbounded();
        let affinity = ThreadAffinity::current();
        tracing::debug!(
            target: targets::EVENT_LOOP,
            thread = ?affinity.thread_id(),
            "event loop created"
        );
        Self {
            affinity,
            sender,
            receiver,
        }
    }

    /// Get a handle that can post work to this loop from any thread.
    pub fn handle(&self) -> ContextHandle {
        ContextHandle {
            affinity: self.affinity,
            sender: self.sender.clone(),
        }
    }

    /// The thread affinity of this loop.
    pub fn affinity(&self) -> ThreadAffinity {
        self.affinity
    }

    /// Number of invocations waiting to be executed.
    pub fn pending_count(&self) -> usize {
        self.receiver.len()
    }

    /// Execute every invocation that is currently queued.
    ///
    /// Invocations posted while draining are executed too. Returns the number
    /// of invocations executed.
    ///
    /// # Panics
    ///
    /// Panics if called from a thread other than the owning thread.
    pub fn process_pending(&self) -> usize {
        self.affinity
            .assert_same_thread_with_msg("EventLoop::process_pending must run on the owning thread");
        let mut count = 0;
        while let Ok(invocation) = self.receiver.try_recv() {
            invocation.execute();
            count += 1;
        }
        count
    }

    /// Block for at most `timeout` waiting for one invocation and execute it.
    ///
    /// Returns `false` if nothing arrived in time.
    ///
    /// # Panics
    ///
    /// Panics if called from a thread other than the owning thread.
    pub fn process_one_timeout(&self, timeout: Duration) -> bool {
        self.affinity.assert_same_thread_with_msg(
            "EventLoop::process_one_timeout must run on the owning thread",
        );
        match self.receiver.recv_timeout(timeout) {
            Ok(invocation) => {
                invocation.execute();
                true
            }
            Err(RecvTimeoutError::Timeout) => false,
            // The loop holds a sender itself, so disconnection cannot happen.
            Err(RecvTimeoutError::Disconnected) => false,
        }
    }

    /// Keep executing invocations until `done` returns `true` or `timeout`
    /// elapses.
    ///
    /// `done` is checked before blocking and after each invocation. Returns
    /// the final value of `done`.
    pub fn run_until<F>(&self, mut done: F, timeout: Duration) -> bool
    where
        F: FnMut() -> bool,
    {
        let deadline = Instant::now() + timeout;
        loop {
            if done() {
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            self.process_one_timeout(deadline - now);
        }
    }
}

impl std::fmt::Debug for EventLoop {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventLoop")
            .field("affinity", &self.affinity)
            .field("pending", &self.pending_count())
            .finish()
    }
}

static_assertions::assert_impl_all!(ContextHandle: Send, Sync, Clone);

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_process_pending_runs_in_fifo_order() {
        let event_loop = EventLoop::new();
        let handle = event_loop.handle();
        let order = Arc::new(Mutex::new(Vec::new()));

        for i in 0..3 {
            let order = order.clone();
            handle.post(move || order.lock().push(i)).unwrap();
        }

        assert_eq!(event_loop.pending_count(), 3);
        assert_eq!(event_loop.process_pending(), 3);
        assert_eq!(*order.lock(), vec![0, 1, 2]);
        assert_eq!(event_loop.pending_count(), 0);
    }

    #[test]
    fn test_invocations_run_on_owning_thread() {
        let event_loop = EventLoop::new();
        let handle = event_loop.handle();
        let owner = std::thread::current().id();
        let ran_on = Arc::new(Mutex::new(None));

        let ran_on_clone = ran_on.clone();
        std::thread::spawn(move || {
            assert!(!handle.is_current());
            handle
                .post(move || *ran_on_clone.lock() = Some(std::thread::current().id()))
                .unwrap();
        })
        .join()
        .unwrap();

        assert!(event_loop.process_one_timeout(Duration::from_secs(5)));
        assert_eq!(*ran_on.lock(), Some(owner));
    }

    #[test]
    fn test_process_one_timeout_expires() {
        let event_loop = EventLoop::new();
        assert!(!event_loop.process_one_timeout(Duration::from_millis(10)));
    }

    #[test]
    fn test_run_until_stops_when_done() {
        let event_loop = EventLoop::new();
        let handle = event_loop.handle();
        let counter = Arc::new(AtomicUsize::new(0));

        let counter_clone = counter.clone();
        std::thread::spawn(move || {
            for _ in 0..5 {
                let counter = counter_clone.clone();
                handle
                    .post(move || {
                        counter.fetch_add(1, Ordering::SeqCst);
                    })
                    .unwrap();
            }
        });

        let done = event_loop.run_until(|| counter.load(Ordering::SeqCst) == 5, Duration::from_secs(5));
        assert!(done);
    }

    #[test]
    fn test_post_after_drop_reports_closed() {
        let event_loop = EventLoop::new();
        let handle = event_loop.handle();
        drop(event_loop);
        assert_eq!(handle.post(|| {}), Err(ContextError::Closed));
    }

    #[test]
    fn test_process_pending_off_thread_panics() {
        let event_loop = Arc::new(EventLoop::new());
        let event_loop_clone = event_loop.clone();
        let result = std::thread::spawn(move || event_loop_clone.process_pending()).join();
        assert!(result.is_err());
    }
}
