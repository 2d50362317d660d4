//! Launching requests, synchronously or on a background runtime.
//!
//! [`HttpLauncher`] is the composition root of the engine: it owns the
//! in-flight [`RequestRegistry`], the background tokio runtime, and the
//! [`ContextHandle`] of the owning context that receives every callback.
//!
//! # Example
//!
//! ```no_run
//! use courier_core::EventLoop;
//! use courier_http::{HttpLauncher, HttpRequest, LaunchOutcome};
//! use std::time::Duration;
//!
//! let event_loop = EventLoop::new();
//! let launcher = HttpLauncher::new(event_loop.handle())?;
//!
//! let mut request = HttpRequest::get("https://example.com/");
//! request.set_read_timeout(5_000);
//!
//! let handle = launcher.launch(&request, |outcome| match outcome {
//!     LaunchOutcome::Completed(response) => println!("{}", response.text()),
//!     LaunchOutcome::Failed(err) => eprintln!("failed: {err}"),
//!     LaunchOutcome::Cancelled => println!("cancelled"),
//! })?;
//!
//! // Later, from the owning context:
//! handle.cancel(|| println!("transfer interrupted"));
//!
//! // The owning thread drains its loop as part of its main loop.
//! event_loop.run_until(|| handle.is_finished(), Duration::from_secs(30));
//! event_loop.process_pending();
//! # Ok::<(), courier_http::HttpError>(())
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use courier_core::ContextHandle;
use parking_lot::Mutex;
use tokio::runtime::{Handle, Runtime};
use tokio::sync::oneshot;

use super::registry::RequestRegistry;
use super::request::{CancelListener, HttpRequest, RequestId, RequestState};
use super::response::{HttpResponse, Progress};
use super::transport::{LaunchGuard, ProgressFn, Transport};
use crate::error::{HttpError, Result};
use crate::logging::targets;

/// Configuration for a launcher.
#[derive(Clone, Debug)]
pub struct LauncherConfig {
    /// Number of worker threads in the launcher-owned runtime.
    pub worker_threads: usize,
    /// Name of the launcher-owned runtime's worker threads.
    pub thread_name: String,
    /// User-Agent sent with every request, if any.
    pub user_agent: Option<String>,
    /// Largest number of body bytes read between two cancellation
    /// checkpoints.
    pub chunk_size: usize,
    /// Initial capacity of the response body buffer.
    pub initial_buffer_capacity: usize,
}

impl Default for LauncherConfig {
    fn default() -> Self {
        Self {
            worker_threads: 2,
            thread_name: "courier-worker".to_string(),
            user_agent: Some(format!("Courier/{} (Rust)", env!("CARGO_PKG_VERSION"))),
            chunk_size: 1024,
            initial_buffer_capacity: 10 * 1024,
        }
    }
}

/// Builder for creating a launcher with custom configuration.
#[derive(Debug, Default)]
pub struct LauncherBuilder {
    config: LauncherConfig,
    runtime: Option<Handle>,
}

impl LauncherBuilder {
    /// Create a new builder with default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the number of worker threads of the launcher-owned runtime.
    pub fn worker_threads(mut self, threads: usize) -> Self {
        self.config.worker_threads = threads.max(1);
        self
    }

    /// Set the worker thread name.
    pub fn thread_name(mut self, name: impl Into<String>) -> Self {
        self.config.thread_name = name.into();
        self
    }

    /// Set the user agent string.
    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.config.user_agent = Some(user_agent.into());
        self
    }

    /// Send no User-Agent header unless a request sets one.
    pub fn no_user_agent(mut self) -> Self {
        self.config.user_agent = None;
        self
    }

    /// Set the largest read between cancellation checkpoints.
    pub fn chunk_size(mut self, bytes: usize) -> Self {
        self.config.chunk_size = bytes.max(1);
        self
    }

    /// Set the initial capacity of the response body buffer.
    pub fn initial_buffer_capacity(mut self, bytes: usize) -> Self {
        self.config.initial_buffer_capacity = bytes;
        self
    }

    /// Run launches on an existing multi-threaded runtime instead of
    /// creating one.
    pub fn runtime_handle(mut self, handle: Handle) -> Self {
        self.runtime = Some(handle);
        self
    }

    /// Build a launcher that delivers callbacks to `context`.
    pub fn build(self, context: ContextHandle) -> Result<HttpLauncher> {
        let runtime = match self.runtime {
            Some(handle) => LauncherRuntime::Shared(handle),
            None => LauncherRuntime::Owned(Some(
                tokio::runtime::Builder::new_multi_thread()
                    .worker_threads(self.config.worker_threads)
                    .thread_name(self.config.thread_name.clone())
                    .enable_all()
                    .build()
                    .map_err(|e| HttpError::Runtime(e.to_string()))?,
            )),
        };

        let transport = Transport::new(
            self.config.chunk_size,
            self.config.initial_buffer_capacity,
            self.config.user_agent.clone(),
            context.clone(),
        );

        tracing::debug!(target: targets::LAUNCHER, config = ?self.config, "launcher created");

        Ok(HttpLauncher {
            inner: Arc::new(LauncherInner {
                config: self.config,
                context,
                registry: Arc::new(RequestRegistry::new()),
                transport,
                runtime,
            }),
        })
    }
}

enum LauncherRuntime {
    Owned(Option<Runtime>),
    Shared(Handle),
}

impl LauncherRuntime {
    fn handle(&self) -> Handle {
        match self {
            Self::Owned(Some(runtime)) => runtime.handle().clone(),
            Self::Shared(handle) => handle.clone(),
            Self::Owned(None) => unreachable!("runtime is only taken on drop"),
        }
    }
}

impl Drop for LauncherRuntime {
    fn drop(&mut self) {
        if let Self::Owned(runtime) = self {
            if let Some(runtime) = runtime.take() {
                // Safe to call from inside another runtime, unlike a plain drop.
                runtime.shutdown_background();
            }
        }
    }
}

struct LauncherInner {
    config: LauncherConfig,
    context: ContextHandle,
    registry: Arc<RequestRegistry>,
    transport: Transport,
    runtime: LauncherRuntime,
}

impl Drop for LauncherInner {
    fn drop(&mut self) {
        let in_flight = self.registry.len();
        if in_flight > 0 && matches!(self.runtime, LauncherRuntime::Owned(_)) {
            tracing::warn!(
                target: targets::LAUNCHER,
                in_flight,
                "launcher dropped with launches in flight; their outcomes are discarded"
            );
        }
    }
}

/// The terminal result of one asynchronous launch.
///
/// Exactly one outcome is delivered per successful [`HttpLauncher::launch`].
#[derive(Debug)]
pub enum LaunchOutcome {
    /// The body was fully received.
    Completed(HttpResponse),
    /// The launch failed; the request is launchable again.
    Failed(HttpError),
    /// A cancel interrupted the transfer. The cancel listener, if any, has
    /// already run on the owning context.
    Cancelled,
}

impl LaunchOutcome {
    /// The response, if the launch completed.
    pub fn response(&self) -> Option<&HttpResponse> {
        match self {
            Self::Completed(response) => Some(response),
            _ => None,
        }
    }

    /// The error, if the launch failed.
    pub fn error(&self) -> Option<&HttpError> {
        match self {
            Self::Failed(err) => Some(err),
            _ => None,
        }
    }

    /// Check if the launch was cancelled.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// Split into the `(response, error)` pair. Both are `None` for a
    /// cancelled launch.
    pub fn into_parts(self) -> (Option<HttpResponse>, Option<HttpError>) {
        match self {
            Self::Completed(response) => (Some(response), None),
            Self::Failed(err) => (None, Some(err)),
            Self::Cancelled => (None, None),
        }
    }
}

impl From<Result<Option<HttpResponse>>> for LaunchOutcome {
    fn from(result: Result<Option<HttpResponse>>) -> Self {
        match result {
            Ok(Some(response)) => Self::Completed(response),
            Ok(None) => Self::Cancelled,
            Err(err) => Self::Failed(err),
        }
    }
}

/// A handle to one asynchronous launch.
#[derive(Clone)]
pub struct LaunchHandle {
    id: RequestId,
    state: Arc<RequestState>,
    registry: Arc<RequestRegistry>,
    finished: Arc<AtomicBool>,
}

impl LaunchHandle {
    /// The launched request's identity.
    pub fn id(&self) -> RequestId {
        self.id
    }

    /// Request cancellation of this launch.
    ///
    /// Returns `true` if the request was accepted; the transfer stops at the
    /// next chunk boundary and `on_cancel` then runs on the owning context.
    /// Returns `false` (and never calls `on_cancel`) if this launch has
    /// already ended.
    pub fn cancel<F>(&self, on_cancel: F) -> bool
    where
        F: FnOnce() + Send + 'static,
    {
        self.cancel_with(Some(Box::new(on_cancel)))
    }

    /// Request cancellation without a notification.
    pub fn cancel_quietly(&self) -> bool {
        self.cancel_with(None)
    }

    /// Whether the launch has reached a terminal state.
    ///
    /// Once this returns `true` the outcome is queued on the owning context;
    /// it may not have been delivered yet.
    pub fn is_finished(&self) -> bool {
        self.finished.load(Ordering::Acquire)
    }

    fn cancel_with(&self, listener: Option<CancelListener>) -> bool {
        !self.is_finished() && request_cancel(&self.registry, self.id, &self.state, listener)
    }
}

impl std::fmt::Debug for LaunchHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LaunchHandle")
            .field("id", &self.id)
            .field("finished", &self.is_finished())
            .finish()
    }
}

fn request_cancel(
    registry: &RequestRegistry,
    id: RequestId,
    state: &RequestState,
    listener: Option<CancelListener>,
) -> bool {
    let accepted = registry.contains(id) && state.request_cancel(listener);
    tracing::debug!(target: targets::LAUNCHER, request = %id, accepted, "cancel requested");
    accepted
}

/// Launches requests and delivers their callbacks to an owning context.
///
/// The launcher is cheaply cloneable; clones share the registry and runtime.
///
/// Dropping the last clone shuts down a launcher-owned runtime without
/// waiting. Launches still in flight are abandoned: their requests become
/// launchable again, but no outcome, progress, or cancel notification is
/// delivered for them. Keep the launcher alive until every
/// [`LaunchHandle::is_finished`] returns `true`, or build it on a runtime
/// you own with [`LauncherBuilder::runtime_handle`].
#[derive(Clone)]
pub struct HttpLauncher {
    inner: Arc<LauncherInner>,
}

impl HttpLauncher {
    /// Create a launcher with default configuration and its own runtime.
    pub fn new(context: ContextHandle) -> Result<Self> {
        LauncherBuilder::new().build(context)
    }

    /// Create a builder for configuring a new launcher.
    pub fn builder() -> LauncherBuilder {
        LauncherBuilder::new()
    }

    /// The launcher's configuration.
    pub fn config(&self) -> &LauncherConfig {
        &self.inner.config
    }

    /// The owning context that receives callbacks.
    pub fn context(&self) -> &ContextHandle {
        &self.inner.context
    }

    /// Whether `request` is currently in flight on this launcher.
    pub fn is_in_flight(&self, request: &HttpRequest) -> bool {
        self.inner.registry.contains(request.id())
    }

    /// Number of requests in flight on this launcher.
    pub fn in_flight_count(&self) -> usize {
        self.inner.registry.len()
    }

    /// Launch `request` on the background runtime.
    ///
    /// `listener` receives exactly one [`LaunchOutcome`] on the owning
    /// context. Fails with [`HttpError::NotLaunchable`], without starting
    /// any work, if the request is already in flight.
    ///
    /// # Panics
    ///
    /// Panics if called from a thread other than the owning context.
    pub fn launch<F>(&self, request: &HttpRequest, listener: F) -> Result<LaunchHandle>
    where
        F: FnOnce(LaunchOutcome) + Send + 'static,
    {
        self.spawn_launch(request, None, listener)
    }

    /// Like [`launch`](Self::launch), also delivering a [`Progress`] to
    /// `progress` on the owning context after each chunk. Progress
    /// notifications always precede the outcome.
    ///
    /// # Panics
    ///
    /// Panics if called from a thread other than the owning context.
    pub fn launch_with_progress<P, F>(
        &self,
        request: &HttpRequest,
        progress: P,
        listener: F,
    ) -> Result<LaunchHandle>
    where
        P: FnMut(Progress) + Send + 'static,
        F: FnOnce(LaunchOutcome) + Send + 'static,
    {
        let progress = Arc::new(Mutex::new(progress));
        let context = self.inner.context.clone();
        let forward: ProgressFn = Box::new(move |event: Progress| {
            let progress = progress.clone();
            let _ = context.post(move || {
                let mut progress = progress.lock();
                (*progress)(event);
            });
        });
        self.spawn_launch(request, Some(forward), listener)
    }

    /// Launch `request` and receive its outcome through a single-fire
    /// channel.
    ///
    /// The outcome is sent when the owning context drains its event loop,
    /// so the receiver becomes ready on the owning context only.
    ///
    /// # Panics
    ///
    /// Panics if called from a thread other than the owning context.
    pub fn launch_with_channel(
        &self,
        request: &HttpRequest,
    ) -> Result<(LaunchHandle, oneshot::Receiver<LaunchOutcome>)> {
        let (tx, rx) = oneshot::channel();
        let handle = self.launch(request, move |outcome| {
            let _ = tx.send(outcome);
        })?;
        Ok((handle, rx))
    }

    fn spawn_launch<F>(
        &self,
        request: &HttpRequest,
        progress: Option<ProgressFn>,
        listener: F,
    ) -> Result<LaunchHandle>
    where
        F: FnOnce(LaunchOutcome) + Send + 'static,
    {
        let owner = self.inner.context.affinity();
        owner.assert_same_thread_with_msg("HttpLauncher::launch must be called on the owning context");

        let guard = LaunchGuard::begin(request, &self.inner.registry, Some(owner)).ok_or_else(|| {
            tracing::debug!(target: targets::LAUNCHER, request = %request.id(), "already in flight");
            HttpError::NotLaunchable
        })?;

        let id = request.id();
        let config = request.snapshot();
        let finished = Arc::new(AtomicBool::new(false));
        let handle = LaunchHandle {
            id,
            state: request.state().clone(),
            registry: self.inner.registry.clone(),
            finished: finished.clone(),
        };

        let runtime = self.inner.runtime.handle();
        let transport = self.inner.transport.clone();
        let task = runtime.spawn(async move { transport.execute(guard, config, progress).await });

        let context = self.inner.context.clone();
        runtime.spawn(async move {
            let result = match task.await {
                Ok(result) => result,
                Err(err) => Err(HttpError::Transport(format!("launch task failed: {err}"))),
            };
            let outcome = LaunchOutcome::from(result);
            tracing::debug!(target: targets::LAUNCHER, request = %id, outcome = ?outcome, "launch finished");
            if context.post(move || listener(outcome)).is_err() {
                tracing::warn!(
                    target: targets::LAUNCHER,
                    request = %id,
                    "owning context closed; outcome dropped"
                );
            }
            // A finished launch always has its outcome queued.
            finished.store(true, Ordering::Release);
        });

        Ok(handle)
    }

    /// Run `request` to completion on the calling thread.
    ///
    /// Returns `Ok(Some(response))` on success, `Ok(None)` if the launch was
    /// cancelled, and `Err(HttpError::NotLaunchable)` if it was already in
    /// flight. I/O failures are returned as errors.
    ///
    /// # Panics
    ///
    /// Panics if called from within an async runtime.
    pub fn launch_blocking(&self, request: &HttpRequest) -> Result<Option<HttpResponse>> {
        self.run_blocking(request, None)
    }

    /// Like [`launch_blocking`](Self::launch_blocking), invoking `progress`
    /// inline on the calling thread after each chunk.
    ///
    /// # Panics
    ///
    /// Panics if called from within an async runtime.
    pub fn launch_blocking_with_progress<P>(
        &self,
        request: &HttpRequest,
        progress: P,
    ) -> Result<Option<HttpResponse>>
    where
        P: FnMut(Progress) + Send + 'static,
    {
        self.run_blocking(request, Some(Box::new(progress)))
    }

    fn run_blocking(
        &self,
        request: &HttpRequest,
        progress: Option<ProgressFn>,
    ) -> Result<Option<HttpResponse>> {
        let guard = LaunchGuard::begin(
            request,
            &self.inner.registry,
            Some(self.inner.context.affinity()),
        )
        .ok_or(HttpError::NotLaunchable)?;
        let config = request.snapshot();
        self.inner
            .runtime
            .handle()
            .block_on(self.inner.transport.execute(guard, config, progress))
    }

    /// Request cancellation of an in-flight `request`.
    ///
    /// Returns `false` (and never calls `on_cancel`) if the request is not in
    /// flight on this launcher. Otherwise returns `true`: the transfer stops
    /// at the next chunk boundary, after which `on_cancel` runs once on the
    /// owning context. A later accepted cancel replaces the listener of an
    /// earlier one.
    pub fn cancel<F>(&self, request: &HttpRequest, on_cancel: F) -> bool
    where
        F: FnOnce() + Send + 'static,
    {
        request_cancel(
            &self.inner.registry,
            request.id(),
            request.state(),
            Some(Box::new(on_cancel)),
        )
    }

    /// Request cancellation without a notification.
    pub fn cancel_quietly(&self, request: &HttpRequest) -> bool {
        request_cancel(&self.inner.registry, request.id(), request.state(), None)
    }
}

impl std::fmt::Debug for HttpLauncher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpLauncher")
            .field("config", &self.inner.config)
            .field("in_flight", &self.inner.registry.len())
            .finish()
    }
}
