//! The set of requests currently in flight.

use std::collections::HashSet;

use parking_lot::Mutex;

use super::request::RequestId;

/// Mutex-guarded table of in-flight request identities.
///
/// Each [`HttpLauncher`](super::HttpLauncher) owns one, so cancellation is
/// only ever honoured for requests that launcher believes are running.
#[derive(Debug, Default)]
pub struct RequestRegistry {
    in_flight: Mutex<HashSet<RequestId>>,
}

impl RequestRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark a request as in flight. Returns `false` if it already was.
    pub fn add(&self, id: RequestId) -> bool {
        self.in_flight.lock().insert(id)
    }

    /// Remove a request. Returns `false` if it was not registered.
    pub fn remove(&self, id: RequestId) -> bool {
        self.in_flight.lock().remove(&id)
    }

    /// Check whether a request is in flight.
    pub fn contains(&self, id: RequestId) -> bool {
        self.in_flight.lock().contains(&id)
    }

    /// Number of requests in flight.
    pub fn len(&self) -> usize {
        self.in_flight.lock().len()
    }

    /// Check whether nothing is in flight.
    pub fn is_empty(&self) -> bool {
        self.in_flight.lock().is_empty()
    }
}
