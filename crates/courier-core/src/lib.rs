//! Core systems for Courier.
//!
//! This crate provides the owning-context primitives the request engine
//! builds on:
//!
//! - **Event Loop**: a cooperative queue drained by the owning thread
//! - **Context Handle**: a cloneable sender for posting callbacks to it
//! - **Thread Affinity**: runtime checks that context-affine calls
//!   originate from (or stay away from) the owning thread
//!
//! # Example
//!
//! ```
//! use courier_core::EventLoop;
//! use std::sync::Arc;
//! use std::sync::atomic::{AtomicBool, Ordering};
//! use std::time::Duration;
//!
//! let event_loop = EventLoop::new();
//! let handle = event_loop.handle();
//! let delivered = Arc::new(AtomicBool::new(false));
//!
//! let flag = delivered.clone();
//! std::thread::spawn(move || {
//!     // Background work finishes, then hands the result back.
//!     handle.post(move || flag.store(true, Ordering::SeqCst)).unwrap();
//! });
//!
//! event_loop.run_until(|| delivered.load(Ordering::SeqCst), Duration::from_secs(5));
//! assert!(delivered.load(Ordering::SeqCst));
//! ```

mod error;
mod event_loop;
pub mod invocation;
pub mod logging;
pub mod thread_check;

pub use error::{ContextError, Result};
pub use event_loop::{ContextHandle, EventLoop};
pub use invocation::{InvocationId, QueuedInvocation};
pub use thread_check::ThreadAffinity;
