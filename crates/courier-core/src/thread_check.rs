//! Thread affinity verification for the owning context.
//!
//! Every [`EventLoop`](crate::EventLoop) is bound to the thread that created
//! it. Operations that must originate from that thread (launching a request,
//! for example) check a [`ThreadAffinity`], and operations that must *never*
//! run there (blocking waits) check the inverse.
//!
//! ```
//! use courier_core::thread_check::ThreadAffinity;
//!
//! let affinity = ThreadAffinity::current();
//! affinity.assert_same_thread();
//!
//! let other = std::thread::spawn(move || affinity.is_same_thread())
//!     .join()
//!     .unwrap();
//! assert!(!other);
//! ```

use std::thread::ThreadId;

/// Thread affinity tracker.
///
/// Records the thread on which it was created and verifies that subsequent
/// operations occur on (or off) that thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThreadAffinity {
    thread_id: ThreadId,
}

impl Default for ThreadAffinity {
    fn default() -> Self {
        Self::current()
    }
}

impl ThreadAffinity {
    /// Create an affinity bound to the current thread.
    #[inline]
    pub fn current() -> Self {
        Self {
            thread_id: std::thread::current().id(),
        }
    }

    /// Get the thread ID this affinity is bound to.
    #[inline]
    pub fn thread_id(&self) -> ThreadId {
        self.thread_id
    }

    /// Check if the current thread matches this affinity.
    #[inline]
    pub fn is_same_thread(&self) -> bool {
        std::thread::current().id() == self.thread_id
    }

    /// Assert that we are on the bound thread.
    ///
    /// # Panics
    ///
    /// Panics with a descriptive message if called from a different thread.
    #[inline]
    pub fn assert_same_thread(&self) {
        self.assert_same_thread_with_msg("operation must be performed on the owning context")
    }

    /// Assert that we are on the bound thread, with a custom message.
    ///
    /// # Panics
    ///
    /// Panics if called from a different thread.
    pub fn assert_same_thread_with_msg(&self, msg: &str) {
        if !self.is_same_thread() {
            panic_thread_violation(msg, "expected", self.thread_id);
        }
    }

    /// Assert that we are *not* on the bound thread.
    ///
    /// Used by blocking primitives that would deadlock if they parked the
    /// thread responsible for waking them.
    ///
    /// # Panics
    ///
    /// Panics if called from the bound thread.
    pub fn assert_other_thread_with_msg(&self, msg: &str) {
        if self.is_same_thread() {
            panic_thread_violation(msg, "forbidden", self.thread_id);
        }
    }
}

#[cold]
#[inline(never)]
fn panic_thread_violation(msg: &str, relation: &str, bound: ThreadId) -> ! {
    let current = std::thread::current();
    let current_name = current.name().unwrap_or("<unnamed>");
    let current_id = current.id();

    panic!(
        "\n\
        ══════════════════════════════════════════════════════════════════════\n\
        THREAD AFFINITY VIOLATION\n\
        ══════════════════════════════════════════════════════════════════════\n\
        \n\
        {msg}\n\
        \n\
        Current thread: \"{current_name}\" (ID: {current_id:?})\n\
        {relation} thread ID: {bound:?}\n\
        \n\
        Asynchronous launches are issued from the owning context;\n\
        blocking waits belong on secondary worker threads.\n\
        ══════════════════════════════════════════════════════════════════════"
    )
}

static_assertions::assert_impl_all!(ThreadAffinity: Send, Sync);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_current_thread_affinity() {
        let affinity = ThreadAffinity::current();
        assert!(affinity.is_same_thread());
        assert_eq!(affinity.thread_id(), std::thread::current().id());
    }

    #[test]
    fn test_affinity_from_other_thread() {
        let affinity = ThreadAffinity::current();
        let same = std::thread::spawn(move || affinity.is_same_thread())
            .join()
            .unwrap();
        assert!(!same);
    }

    #[test]
    fn test_assert_same_thread_passes() {
        ThreadAffinity::current().assert_same_thread();
    }

    #[test]
    fn test_assert_same_thread_panics_elsewhere() {
        let affinity = ThreadAffinity::current();
        let result = std::thread::spawn(move || affinity.assert_same_thread()).join();
        assert!(result.is_err());
    }

    #[test]
    #[should_panic(expected = "THREAD AFFINITY VIOLATION")]
    fn test_assert_other_thread_panics_on_bound_thread() {
        ThreadAffinity::current().assert_other_thread_with_msg("must not block here");
    }

    #[test]
    fn test_assert_other_thread_passes_elsewhere() {
        let affinity = ThreadAffinity::current();
        std::thread::spawn(move || affinity.assert_other_thread_with_msg("ok"))
            .join()
            .unwrap();
    }
}
