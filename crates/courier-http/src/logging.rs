//! Tracing targets for the request engine.
//!
//! The engine logs through `tracing` and leaves subscriber setup to the
//! application:
//!
//! ```ignore
//! tracing_subscriber::fmt()
//!     .with_env_filter("courier_http::transport=trace,courier_http=debug")
//!     .init();
//! ```

/// Target names for log filtering.
pub mod targets {
    /// Request descriptor target (form encoding warnings).
    pub const REQUEST: &str = "courier_http::request";
    /// Connection and body streaming target.
    pub const TRANSPORT: &str = "courier_http::transport";
    /// Launch dispatch and cancellation target.
    pub const LAUNCHER: &str = "courier_http::launcher";
}
