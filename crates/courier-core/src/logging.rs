//! Tracing targets used throughout Courier.
//!
//! Courier uses the `tracing` crate for instrumentation and never installs a
//! subscriber itself. To see logs, install one in your application:
//!
//! ```ignore
//! tracing_subscriber::fmt()
//!     .with_env_filter("courier_http=debug,courier_core=trace")
//!     .init();
//! ```

/// Target names for log filtering.
///
/// Use these with `tracing` directives to filter logs by subsystem.
pub mod targets {
    /// Owning-context event loop target.
    pub const EVENT_LOOP: &str = "courier_core::event_loop";
}
