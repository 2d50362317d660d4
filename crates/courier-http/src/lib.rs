//! Cancellable HTTP requests for Courier.
//!
//! This crate launches HTTP requests on a background runtime and hands every
//! callback back to an owning context:
//!
//! - **Requests**: mutable, reusable descriptors with form parameters,
//!   headers, and per-request timeouts
//! - **Launching**: synchronous ([`HttpLauncher::launch_blocking`]) or
//!   asynchronous ([`HttpLauncher::launch`]) with chunked progress
//! - **Cancellation**: cooperative, checked after each body chunk, with a
//!   notification delivered on the owning context
//!
//! # Owning Context
//!
//! The owning context is a [`courier_core::EventLoop`]. Its thread issues
//! asynchronous launches and drains the loop; outcomes, progress, and cancel
//! notifications arrive there in order.
//!
//! ```no_run
//! use courier_core::EventLoop;
//! use courier_http::{HttpLauncher, HttpRequest, LaunchOutcome};
//! use std::time::Duration;
//!
//! let event_loop = EventLoop::new();
//! let launcher = HttpLauncher::new(event_loop.handle())?;
//!
//! let request = HttpRequest::get("https://example.com/data");
//! let (handle, mut outcome) = launcher.launch_with_channel(&request)?;
//!
//! event_loop.run_until(|| handle.is_finished(), Duration::from_secs(30));
//! event_loop.process_pending();
//!
//! if let Ok(LaunchOutcome::Completed(response)) = outcome.try_recv() {
//!     println!("{} bytes", response.body().len());
//! }
//! # Ok::<(), courier_http::HttpError>(())
//! ```
//!
//! # Cancellation
//!
//! A cancel is only accepted while the request is in flight on the launcher
//! that receives it. An accepted cancel stops the transfer at the next chunk
//! boundary; the cancel notification then runs on the owning context,
//! followed by [`LaunchOutcome::Cancelled`].

mod error;
pub mod http;
pub mod logging;

pub use error::{HttpError, Result};

pub use http::{
    FormEncoding, HttpLauncher, HttpRequest, HttpResponse, LaunchHandle, LaunchOutcome,
    LauncherBuilder, LauncherConfig, Progress, RequestId, RequestRegistry, ResponseHeaders,
};
