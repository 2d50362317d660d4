//! Request descriptors and their per-request launch state.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread::ThreadId;
use std::time::{Duration, Instant};

use courier_core::ThreadAffinity;
use parking_lot::{Condvar, Mutex};

use crate::logging::targets;

/// Unique identity of a request descriptor.
///
/// Identity is per object: two descriptors with identical configuration are
/// distinct requests.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RequestId(u64);

impl RequestId {
    fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw u64 value of this request ID.
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// How `POST` parameters are written into the request body.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum FormEncoding {
    /// `key=value` pairs written verbatim.
    ///
    /// Keys or values containing `&` or `=` produce an ambiguous body; a
    /// warning is logged when that happens.
    #[default]
    Raw,
    /// `application/x-www-form-urlencoded` escaping of keys and values.
    UrlEncoded,
}

/// Snapshot of a descriptor's configuration, taken when a launch starts.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct RequestConfig {
    pub(crate) url: String,
    pub(crate) method: String,
    pub(crate) headers: BTreeMap<String, String>,
    pub(crate) parameters: BTreeMap<String, String>,
    pub(crate) connect_timeout_ms: u64,
    pub(crate) read_timeout_ms: u64,
    pub(crate) form_encoding: FormEncoding,
}

impl Default for RequestConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            method: "GET".to_string(),
            headers: BTreeMap::new(),
            parameters: BTreeMap::new(),
            connect_timeout_ms: 0,
            read_timeout_ms: 0,
            form_encoding: FormEncoding::Raw,
        }
    }
}

impl RequestConfig {
    pub(crate) fn is_post(&self) -> bool {
        self.method == "POST"
    }

    pub(crate) fn connect_timeout(&self) -> Option<Duration> {
        (self.connect_timeout_ms > 0).then(|| Duration::from_millis(self.connect_timeout_ms))
    }

    pub(crate) fn read_timeout(&self) -> Option<Duration> {
        (self.read_timeout_ms > 0).then(|| Duration::from_millis(self.read_timeout_ms))
    }

    pub(crate) fn encoded_parameters(&self) -> String {
        encode_form(&self.parameters, self.form_encoding)
    }
}

/// Encode form parameters in ascending key order.
fn encode_form(parameters: &BTreeMap<String, String>, encoding: FormEncoding) -> String {
    match encoding {
        FormEncoding::Raw => {
            let ambiguous = parameters
                .iter()
                .any(|(k, v)| k.contains(['&', '=']) || v.contains(['&', '=']));
            if ambiguous {
                tracing::warn!(
                    target: targets::REQUEST,
                    "raw form parameters contain '&' or '='; the encoded body is ambiguous"
                );
            }
            parameters
                .iter()
                .map(|(key, value)| format!("{key}={value}"))
                .collect::<Vec<_>>()
                .join("&")
        }
        FormEncoding::UrlEncoded => url::form_urlencoded::Serializer::new(String::new())
            .extend_pairs(parameters.iter())
            .finish(),
    }
}

/// Callback recorded by an accepted cancel, delivered on the owning context.
pub(crate) type CancelListener = Box<dyn FnOnce() + Send + 'static>;

struct StateInner {
    launching: bool,
    canceled: bool,
    waiting: usize,
    cancel_listener: Option<CancelListener>,
    owner: Option<ThreadAffinity>,
    driver: Option<ThreadId>,
}

/// Launch state shared between a descriptor and the engine.
///
/// All fields live behind one mutex; the condvar wakes callers blocked in
/// [`HttpRequest::wait_until_launchable`].
pub(crate) struct RequestState {
    inner: Mutex<StateInner>,
    launchable: Condvar,
}

impl RequestState {
    fn new() -> Self {
        Self {
            inner: Mutex::new(StateInner {
                launching: false,
                canceled: false,
                waiting: 0,
                cancel_listener: None,
                owner: None,
                driver: None,
            }),
            launchable: Condvar::new(),
        }
    }

    /// Atomically move from idle to launching. Returns `false` if a launch is
    /// already in flight.
    pub(crate) fn try_begin(&self, owner: Option<ThreadAffinity>) -> bool {
        let mut inner = self.inner.lock();
        if inner.launching {
            return false;
        }
        inner.launching = true;
        inner.canceled = false;
        inner.owner = owner;
        true
    }

    /// Record the thread that drives the transport for this launch.
    pub(crate) fn set_driver(&self, driver: ThreadId) {
        self.inner.lock().driver = Some(driver);
    }

    pub(crate) fn is_launching(&self) -> bool {
        self.inner.lock().launching
    }

    /// Record a cancellation request. Fails if nothing is in flight.
    pub(crate) fn request_cancel(&self, listener: Option<CancelListener>) -> bool {
        let mut inner = self.inner.lock();
        if !inner.launching {
            return false;
        }
        inner.cancel_listener = listener;
        inner.canceled = true;
        true
    }

    /// Observe a pending cancellation at a chunk boundary.
    ///
    /// Returns `Some(listener)` and clears the flag if a cancel was
    /// requested.
    pub(crate) fn take_cancellation(&self) -> Option<Option<CancelListener>> {
        let mut inner = self.inner.lock();
        if !inner.canceled {
            return None;
        }
        inner.canceled = false;
        Some(inner.cancel_listener.take())
    }

    /// Return to idle and wake every waiter.
    ///
    /// Returns the cancellation accepted but not yet observed by the
    /// transport, if any. Once this returns, no further cancel is accepted.
    pub(crate) fn finish(&self) -> Option<Option<CancelListener>> {
        let mut inner = self.inner.lock();
        let pending = if inner.canceled {
            Some(inner.cancel_listener.take())
        } else {
            None
        };
        inner.launching = false;
        inner.canceled = false;
        inner.cancel_listener = None;
        inner.owner = None;
        inner.driver = None;
        if inner.waiting > 0 {
            self.launchable.notify_all();
        }
        pending
    }

    fn check_wait_allowed(inner: &StateInner) {
        if let Some(owner) = inner.owner {
            owner.assert_other_thread_with_msg(
                "wait_until_launchable must not be called on the owning context",
            );
        }
        if inner.driver == Some(std::thread::current().id()) {
            panic!(
                "wait_until_launchable called on the thread driving the launch; \
                 this would never return"
            );
        }
    }

    fn wait_until_launchable(&self) {
        let mut inner = self.inner.lock();
        if !inner.launching {
            return;
        }
        Self::check_wait_allowed(&inner);
        inner.waiting += 1;
        while inner.launching {
            self.launchable.wait(&mut inner);
        }
        inner.waiting -= 1;
    }

    fn wait_until_launchable_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut inner = self.inner.lock();
        if !inner.launching {
            return true;
        }
        Self::check_wait_allowed(&inner);
        inner.waiting += 1;
        while inner.launching {
            if self.launchable.wait_until(&mut inner, deadline).timed_out() {
                break;
            }
        }
        inner.waiting -= 1;
        !inner.launching
    }

    #[cfg(test)]
    pub(crate) fn waiting(&self) -> usize {
        self.inner.lock().waiting
    }
}

/// A configured-but-not-yet-sent HTTP call.
///
/// Setters return `&mut Self` so configuration can be chained. Nothing is
/// validated until the request is launched. The same descriptor can be
/// launched again once the previous launch has ended; changes made while a
/// launch is in flight apply to the next launch only.
///
/// # Example
///
/// ```
/// use courier_http::HttpRequest;
///
/// let mut request = HttpRequest::new();
/// request
///     .set_url("https://example.com/login")
///     .set_method("post")
///     .set_read_timeout(5_000)
///     .add_parameter("user", "ada")
///     .add_header("Accept", "text/html");
///
/// assert_eq!(request.method(), "POST");
/// assert_eq!(request.encoded_parameters(), "user=ada");
/// assert!(request.can_be_launched());
/// ```
pub struct HttpRequest {
    id: RequestId,
    config: RequestConfig,
    state: Arc<RequestState>,
}

impl Default for HttpRequest {
    fn default() -> Self {
        Self::new()
    }
}

impl HttpRequest {
    /// Create an empty `GET` request with no URL.
    pub fn new() -> Self {
        Self {
            id: RequestId::new(),
            config: RequestConfig::default(),
            state: Arc::new(RequestState::new()),
        }
    }

    /// Create a `GET` request for `url`.
    pub fn get(url: impl Into<String>) -> Self {
        let mut request = Self::new();
        request.set_url(url);
        request
    }

    /// Create a `POST` request for `url`.
    pub fn post(url: impl Into<String>) -> Self {
        let mut request = Self::get(url);
        request.set_method("POST");
        request
    }

    /// This request's identity.
    pub fn id(&self) -> RequestId {
        self.id
    }

    /// The URL to request.
    pub fn url(&self) -> &str {
        &self.config.url
    }

    /// Set the URL to request.
    pub fn set_url(&mut self, url: impl Into<String>) -> &mut Self {
        self.config.url = url.into();
        self
    }

    /// The HTTP method, always upper case.
    pub fn method(&self) -> &str {
        &self.config.method
    }

    /// Set the HTTP method. Case-insensitive: `"post"` becomes `"POST"`.
    pub fn set_method(&mut self, method: impl AsRef<str>) -> &mut Self {
        self.config.method = method.as_ref().to_ascii_uppercase();
        self
    }

    /// Connect timeout in milliseconds (0 = none).
    pub fn connect_timeout(&self) -> u64 {
        self.config.connect_timeout_ms
    }

    /// Set the connect timeout in milliseconds (0 = none).
    pub fn set_connect_timeout(&mut self, timeout_ms: u64) -> &mut Self {
        self.config.connect_timeout_ms = timeout_ms;
        self
    }

    /// Read timeout in milliseconds (0 = none).
    pub fn read_timeout(&self) -> u64 {
        self.config.read_timeout_ms
    }

    /// Set the read timeout in milliseconds (0 = none).
    ///
    /// Bounds the wait for the response head and for every body chunk.
    pub fn set_read_timeout(&mut self, timeout_ms: u64) -> &mut Self {
        self.config.read_timeout_ms = timeout_ms;
        self
    }

    /// Add a `POST` parameter, replacing any previous value for `key`.
    ///
    /// Ignored for other methods.
    pub fn add_parameter(&mut self, key: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.config.parameters.insert(key.into(), value.into());
        self
    }

    /// The `POST` parameters, in key order.
    pub fn parameters(&self) -> &BTreeMap<String, String> {
        &self.config.parameters
    }

    /// Remove every `POST` parameter.
    pub fn clear_parameters(&mut self) -> &mut Self {
        self.config.parameters.clear();
        self
    }

    /// Add a request header, replacing any previous value for `name`.
    ///
    /// Names are case-sensitive here; the wire format is decided by the
    /// transport.
    pub fn add_header(&mut self, name: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.config.headers.insert(name.into(), value.into());
        self
    }

    /// The request headers, in name order.
    pub fn headers(&self) -> &BTreeMap<String, String> {
        &self.config.headers
    }

    /// Remove every request header.
    pub fn clear_headers(&mut self) -> &mut Self {
        self.config.headers.clear();
        self
    }

    /// How `POST` parameters are encoded.
    pub fn form_encoding(&self) -> FormEncoding {
        self.config.form_encoding
    }

    /// Choose how `POST` parameters are encoded.
    pub fn set_form_encoding(&mut self, encoding: FormEncoding) -> &mut Self {
        self.config.form_encoding = encoding;
        self
    }

    /// The body a `POST` launch would send: `key=value` pairs sorted by key
    /// and joined with `&`.
    pub fn encoded_parameters(&self) -> String {
        self.config.encoded_parameters()
    }

    /// Whether no launch of this request is currently in flight.
    pub fn can_be_launched(&self) -> bool {
        !self.state.is_launching()
    }

    /// Block until no launch of this request is in flight.
    ///
    /// Returns immediately if the request is idle.
    ///
    /// # Panics
    ///
    /// Panics when called on the owning context of the in-flight launch, or
    /// on the thread driving it (for example from a progress callback of a
    /// blocking launch). Either would deadlock.
    ///
    /// The driving thread is recorded when the transfer starts. That is exact
    /// for blocking launches. An asynchronous launch may migrate between
    /// runtime workers, so for those only the owning-context check is
    /// reliable; never block a runtime worker on this call.
    pub fn wait_until_launchable(&self) {
        self.state.wait_until_launchable();
    }

    /// Like [`wait_until_launchable`](Self::wait_until_launchable) but gives
    /// up after `timeout`. Returns whether the request is launchable.
    ///
    /// # Panics
    ///
    /// Same preconditions as `wait_until_launchable`.
    pub fn wait_until_launchable_timeout(&self, timeout: Duration) -> bool {
        self.state.wait_until_launchable_timeout(timeout)
    }

    pub(crate) fn snapshot(&self) -> RequestConfig {
        self.config.clone()
    }

    pub(crate) fn state(&self) -> &Arc<RequestState> {
        &self.state
    }
}

impl std::fmt::Debug for HttpRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpRequest")
            .field("id", &self.id)
            .field("method", &self.config.method)
            .field("url", &self.config.url)
            .field("launching", &self.state.is_launching())
            .finish()
    }
}
