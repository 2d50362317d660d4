//! Error types for Courier core.

use thiserror::Error;

/// Errors raised by the owning-context primitives.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ContextError {
    /// The event loop behind a context handle has been dropped.
    #[error("owning context is closed")]
    Closed,
}

/// A specialized Result type for owning-context operations.
pub type Result<T> = std::result::Result<T, ContextError>;
