//! HTTP request engine.
//!
//! Build an [`HttpRequest`], launch it through an [`HttpLauncher`], and
//! receive the outcome on the owning context's event loop.
//!
//! # Example
//!
//! ```no_run
//! use courier_core::EventLoop;
//! use courier_http::http::{HttpLauncher, HttpRequest};
//!
//! let event_loop = EventLoop::new();
//! let launcher = HttpLauncher::new(event_loop.handle())?;
//!
//! let mut request = HttpRequest::post("https://example.com/login");
//! request
//!     .add_parameter("user", "alice")
//!     .add_parameter("token", "s3cret")
//!     .set_connect_timeout(2_000)
//!     .set_read_timeout(10_000);
//!
//! // Synchronous launch on a background context.
//! if let Some(response) = launcher.launch_blocking(&request)? {
//!     println!("{} {}", response.status_code(), response.status_message());
//! }
//! # Ok::<(), courier_http::HttpError>(())
//! ```

mod launcher;
mod registry;
mod request;
mod response;
mod transport;

pub use launcher::{HttpLauncher, LaunchHandle, LaunchOutcome, LauncherBuilder, LauncherConfig};
pub use registry::RequestRegistry;
pub use request::{FormEncoding, HttpRequest, RequestId};
pub use response::{HttpResponse, Progress, ResponseHeaders};
