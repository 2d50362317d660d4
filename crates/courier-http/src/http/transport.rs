//! The request/response state machine.
//!
//! ```text
//! Idle ─► Launching ─► Streaming ⇄ CancelCheck ─┬─► Completed
//!                                              ├─► Canceled
//!                                              └─► Failed
//! ```
//!
//! A [`LaunchGuard`] is taken before any I/O and released on every exit
//! path, so `launching` and registry membership never outlive a launch.

use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use courier_core::{ContextHandle, ThreadAffinity};
use http::header::{CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue};

use super::registry::RequestRegistry;
use super::request::{CancelListener, HttpRequest, RequestConfig, RequestId, RequestState};
use super::response::{HttpResponse, Progress, ReceivedChunks, ResponseHead, percent_of};
use crate::error::{HttpError, Result};
use crate::logging::targets;

const FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded";

/// Progress callback invoked by the transport after each chunk.
pub(crate) type ProgressFn = Box<dyn FnMut(Progress) + Send + 'static>;

/// Scoped ownership of one launch of one request.
///
/// Releasing or dropping the guard deregisters the request, returns it to
/// idle, and wakes every caller blocked in `wait_until_launchable`.
pub(crate) struct LaunchGuard {
    id: RequestId,
    state: Arc<RequestState>,
    registry: Arc<RequestRegistry>,
    released: bool,
}

impl LaunchGuard {
    /// Move `request` to launching and register it, or return `None` if a
    /// launch is already in flight.
    pub(crate) fn begin(
        request: &HttpRequest,
        registry: &Arc<RequestRegistry>,
        owner: Option<ThreadAffinity>,
    ) -> Option<Self> {
        if !request.state().try_begin(owner) {
            return None;
        }
        registry.add(request.id());
        tracing::debug!(target: targets::TRANSPORT, request = %request.id(), "launching");
        Some(Self {
            id: request.id(),
            state: request.state().clone(),
            registry: registry.clone(),
            released: false,
        })
    }

    pub(crate) fn id(&self) -> RequestId {
        self.id
    }

    /// End the launch, returning a cancellation that was accepted but not
    /// yet observed.
    pub(crate) fn release(mut self) -> Option<Option<CancelListener>> {
        self.end()
    }

    fn end(&mut self) -> Option<Option<CancelListener>> {
        if std::mem::replace(&mut self.released, true) {
            return None;
        }
        // Deregister before going idle so a relaunch's entry is never removed.
        self.registry.remove(self.id);
        let pending = self.state.finish();
        tracing::debug!(target: targets::TRANSPORT, request = %self.id, "launch ended");
        pending
    }
}

impl Drop for LaunchGuard {
    fn drop(&mut self) {
        let _ = self.end();
    }
}

/// How a body transfer stopped.
enum Streamed {
    Complete(HttpResponse),
    Cancelled(Option<CancelListener>),
}

/// Executes launches: connection, request body, streamed response body.
#[derive(Clone)]
pub(crate) struct Transport {
    chunk_size: usize,
    initial_buffer_capacity: usize,
    user_agent: Option<String>,
    context: ContextHandle,
}

impl Transport {
    pub(crate) fn new(
        chunk_size: usize,
        initial_buffer_capacity: usize,
        user_agent: Option<String>,
        context: ContextHandle,
    ) -> Self {
        Self {
            chunk_size: chunk_size.max(1),
            initial_buffer_capacity,
            user_agent,
            context,
        }
    }

    /// Run one launch to a terminal state.
    ///
    /// Returns `Ok(None)` when the launch was cancelled; the cancel listener
    /// (if any) has then been posted to the owning context. A cancel accepted
    /// at any point of the launch ends it this way, even if the transfer
    /// completed or failed in the meantime.
    pub(crate) async fn execute(
        &self,
        guard: LaunchGuard,
        config: RequestConfig,
        progress: Option<ProgressFn>,
    ) -> Result<Option<HttpResponse>> {
        guard.state.set_driver(std::thread::current().id());
        let id = guard.id();

        let streamed = self.stream(&guard, &config, progress).await;
        let listener = match (guard.release(), streamed) {
            // The latest accepted cancel replaces an earlier observed one.
            (Some(listener), _) => listener,
            (None, Ok(Streamed::Cancelled(listener))) => listener,
            (None, Ok(Streamed::Complete(response))) => return Ok(Some(response)),
            (None, Err(err)) => {
                tracing::debug!(target: targets::TRANSPORT, request = %id, error = %err, "launch failed");
                return Err(err);
            }
        };

        if let Some(listener) = listener {
            // A closed context has nobody left to notify.
            let _ = self.context.post(listener);
        }
        tracing::debug!(target: targets::TRANSPORT, request = %id, "cancelled");
        Ok(None)
    }

    async fn stream(
        &self,
        guard: &LaunchGuard,
        config: &RequestConfig,
        mut progress: Option<ProgressFn>,
    ) -> Result<Streamed> {
        let mut response = self.build_request(config)?.send().await?;

        let head = ResponseHead::from_reqwest(&response);
        let total = head.content_length();
        tracing::debug!(
            target: targets::TRANSPORT,
            request = %guard.id(),
            status = head.status_code,
            content_length = ?total,
            "response head received"
        );

        if let Some(listener) = guard.state.take_cancellation() {
            return Ok(Streamed::Cancelled(listener));
        }

        let received = progress.as_ref().map(|_| Arc::new(ReceivedChunks::default()));
        let mut body = BytesMut::with_capacity(self.initial_buffer_capacity);
        while let Some(mut frame) = response.chunk().await? {
            while !frame.is_empty() {
                let chunk = frame.split_to(frame.len().min(self.chunk_size));
                body.extend_from_slice(&chunk);
                tracing::trace!(
                    target: targets::TRANSPORT,
                    request = %guard.id(),
                    chunk = chunk.len(),
                    received = body.len(),
                    "chunk read"
                );

                if let (Some(progress), Some(received)) = (progress.as_mut(), received.as_ref()) {
                    let chunks = received.push(chunk.clone());
                    progress(Progress {
                        response: head.with_partial_body(received, chunks, body.len()),
                        percent: percent_of(body.len() as u64, total),
                        chunk,
                    });
                }

                if let Some(listener) = guard.state.take_cancellation() {
                    tracing::debug!(
                        target: targets::TRANSPORT,
                        request = %guard.id(),
                        received = body.len(),
                        "cancel observed mid-transfer"
                    );
                    return Ok(Streamed::Cancelled(listener));
                }
            }
        }

        Ok(Streamed::Complete(head.with_body(body.freeze())))
    }

    fn build_request(&self, config: &RequestConfig) -> Result<reqwest::RequestBuilder> {
        if config.url.is_empty() {
            return Err(HttpError::InvalidUrl("URL is empty".to_string()));
        }
        let url = url::Url::parse(&config.url)?;
        let method = reqwest::Method::from_bytes(config.method.as_bytes())?;

        let mut headers = HeaderMap::new();
        for (name, value) in &config.headers {
            headers.append(
                HeaderName::from_bytes(name.as_bytes())?,
                HeaderValue::from_str(value)?,
            );
        }

        // Each phase has its own bound: a stalled connect surfaces as a
        // connect timeout, a stalled head or body read as a read timeout.
        let mut client = reqwest::Client::builder().pool_max_idle_per_host(0);
        if let Some(connect) = config.connect_timeout() {
            client = client.connect_timeout(connect);
        }
        if let Some(read) = config.read_timeout() {
            client = client.read_timeout(read);
        }
        if let Some(ref user_agent) = self.user_agent {
            client = client.user_agent(user_agent);
        }
        let client = client
            .build()
            .map_err(|e| HttpError::Transport(e.to_string()))?;

        let mut request = client.request(method, url);
        if config.is_post() {
            if !headers.contains_key(CONTENT_TYPE) {
                headers.insert(CONTENT_TYPE, HeaderValue::from_static(FORM_CONTENT_TYPE));
            }
            request = request.body(config.encoded_parameters());
        }
        Ok(request.headers(headers))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use courier_core::EventLoop;

    fn transport(event_loop: &EventLoop) -> Transport {
        Transport::new(1024, 10 * 1024, None, event_loop.handle())
    }

    #[test]
    fn test_guard_registers_and_cleans_up() {
        let registry = Arc::new(RequestRegistry::new());
        let request = HttpRequest::get("http://localhost/");

        let guard = LaunchGuard::begin(&request, &registry, None).expect("idle request");
        assert!(registry.contains(request.id()));
        assert!(!request.can_be_launched());
        assert!(LaunchGuard::begin(&request, &registry, None).is_none());

        drop(guard);
        assert!(registry.is_empty());
        assert!(request.can_be_launched());
    }

    #[test]
    fn test_release_hands_back_unobserved_cancel() {
        let registry = Arc::new(RequestRegistry::new());
        let request = HttpRequest::get("http://localhost/");

        let guard = LaunchGuard::begin(&request, &registry, None).expect("idle request");
        assert!(request.state().request_cancel(Some(Box::new(|| {}))));

        assert!(matches!(guard.release(), Some(Some(_))));
        assert!(registry.is_empty());
        assert!(request.can_be_launched());
        assert!(!request.state().request_cancel(None));
    }

    #[test]
    fn test_released_guard_does_not_touch_next_launch() {
        let registry = Arc::new(RequestRegistry::new());
        let request = HttpRequest::get("http://localhost/");

        let first = LaunchGuard::begin(&request, &registry, None).expect("idle request");
        assert!(first.release().is_none());

        let second = LaunchGuard::begin(&request, &registry, None).expect("idle again");
        assert!(registry.contains(request.id()));
        drop(second);
        assert!(registry.is_empty());
    }

    #[test]
    fn test_build_rejects_empty_url() {
        let event_loop = EventLoop::new();
        let err = transport(&event_loop)
            .build_request(&HttpRequest::new().snapshot())
            .unwrap_err();
        assert!(matches!(err, HttpError::InvalidUrl(_)));
    }

    #[test]
    fn test_build_rejects_unparseable_url() {
        let event_loop = EventLoop::new();
        let err = transport(&event_loop)
            .build_request(&HttpRequest::get("not a url").snapshot())
            .unwrap_err();
        assert!(matches!(err, HttpError::InvalidUrl(_)));
    }

    #[test]
    fn test_build_rejects_bad_method() {
        let event_loop = EventLoop::new();
        let mut request = HttpRequest::get("http://localhost/");
        request.set_method("GE T");
        let err = transport(&event_loop)
            .build_request(&request.snapshot())
            .unwrap_err();
        assert!(matches!(err, HttpError::InvalidMethod(_)));
    }

    #[test]
    fn test_build_rejects_bad_header() {
        let event_loop = EventLoop::new();
        let mut request = HttpRequest::get("http://localhost/");
        request.add_header("Bad Header", "x");
        let err = transport(&event_loop)
            .build_request(&request.snapshot())
            .unwrap_err();
        assert!(matches!(err, HttpError::InvalidHeader(_)));
    }

    #[test]
    fn test_post_body_and_default_content_type() {
        let event_loop = EventLoop::new();
        let mut request = HttpRequest::post("http://localhost/form");
        request.add_parameter("b", "2").add_parameter("a", "1");

        let built = transport(&event_loop)
            .build_request(&request.snapshot())
            .unwrap()
            .build()
            .unwrap();
        assert_eq!(built.method(), reqwest::Method::POST);
        assert_eq!(
            built.headers().get(CONTENT_TYPE).unwrap(),
            FORM_CONTENT_TYPE
        );
        let body = built.body().and_then(|b| b.as_bytes()).unwrap();
        assert_eq!(body, b"a=1&b=2");
    }

    #[test]
    fn test_caller_content_type_wins() {
        let event_loop = EventLoop::new();
        let mut request = HttpRequest::post("http://localhost/form");
        request.add_header("Content-Type", "text/plain");

        let built = transport(&event_loop)
            .build_request(&request.snapshot())
            .unwrap()
            .build()
            .unwrap();
        assert_eq!(built.headers().get(CONTENT_TYPE).unwrap(), "text/plain");
    }

    #[test]
    fn test_get_ignores_parameters() {
        let event_loop = EventLoop::new();
        let mut request = HttpRequest::get("http://localhost/");
        request.add_parameter("a", "1");

        let built = transport(&event_loop)
            .build_request(&request.snapshot())
            .unwrap()
            .build()
            .unwrap();
        assert!(built.body().is_none());
        assert!(built.headers().get(CONTENT_TYPE).is_none());
    }
}
