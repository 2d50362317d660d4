//! Queued invocations for cross-thread callback delivery.
//!
//! A background worker that needs to run a callback on the owning context
//! wraps it in a [`QueuedInvocation`] and posts it through a
//! [`ContextHandle`](crate::ContextHandle). The owning context executes it
//! when its [`EventLoop`](crate::EventLoop) is drained.

use std::sync::atomic::{AtomicU64, Ordering};

/// Global invocation counter for unique IDs.
static NEXT_INVOCATION_ID: AtomicU64 = AtomicU64::new(1);

/// Unique identifier of a queued invocation, used in trace output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct InvocationId(u64);

impl InvocationId {
    fn next() -> Self {
        Self(NEXT_INVOCATION_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw u64 value of this invocation ID.
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

/// A type-erased deferred call.
///
/// Wraps a closure that captures a callback and its arguments, allowing
/// deferred execution on the target thread.
pub struct QueuedInvocation {
    id: InvocationId,
    invoke: Box<dyn FnOnce() + Send>,
}

impl QueuedInvocation {
    /// Create a new queued invocation.
    pub fn new<F>(invoke: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        Self {
            id: InvocationId::next(),
            invoke: Box::new(invoke),
        }
    }

    /// The invocation's ID.
    pub fn id(&self) -> InvocationId {
        self.id
    }

    /// Execute the invocation, consuming it.
    pub fn execute(self) {
        (self.invoke)();
    }
}

impl std::fmt::Debug for QueuedInvocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueuedInvocation")
            .field("id", &self.id)
            .finish_non_exhaustive()
    }
}
