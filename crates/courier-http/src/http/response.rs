//! HTTP response types.

use std::collections::BTreeMap;
use std::sync::{Arc, OnceLock};

use bytes::{Bytes, BytesMut};
use parking_lot::Mutex;
use serde::de::DeserializeOwned;

use crate::error::Result;

/// Multi-valued response headers, value order preserved per name.
pub type ResponseHeaders = BTreeMap<String, Vec<String>>;

/// Status line and headers, known before the body is streamed.
#[derive(Clone, Debug)]
pub(crate) struct ResponseHead {
    pub(crate) status_code: u16,
    pub(crate) status_message: String,
    pub(crate) version: String,
    pub(crate) headers: Arc<ResponseHeaders>,
}

impl ResponseHead {
    pub(crate) fn from_reqwest(response: &reqwest::Response) -> Self {
        let status = response.status();
        let mut headers = ResponseHeaders::new();
        for (name, value) in response.headers() {
            headers
                .entry(name.as_str().to_string())
                .or_default()
                .push(String::from_utf8_lossy(value.as_bytes()).into_owned());
        }
        Self {
            status_code: status.as_u16(),
            status_message: reason_phrase(status, response.extensions()),
            version: format!("{:?}", response.version()),
            headers: Arc::new(headers),
        }
    }

    pub(crate) fn content_length(&self) -> Option<u64> {
        first_value(&self.headers, "content-length").and_then(|v| v.trim().parse().ok())
    }

    pub(crate) fn with_body(&self, body: Bytes) -> HttpResponse {
        HttpResponse {
            head: self.clone(),
            body: Body::Complete(body),
        }
    }

    /// A response whose body is the first `chunks` entries of `received`.
    pub(crate) fn with_partial_body(
        &self,
        received: &Arc<ReceivedChunks>,
        chunks: usize,
        len: usize,
    ) -> HttpResponse {
        HttpResponse {
            head: self.clone(),
            body: Body::Partial {
                received: received.clone(),
                chunks,
                len,
                joined: OnceLock::new(),
            },
        }
    }
}

/// The reason phrase the server sent, or the canonical one for `status`.
fn reason_phrase(status: http::StatusCode, extensions: &http::Extensions) -> String {
    // hyper only records the phrase when it differs from the canonical one.
    match extensions.get::<hyper::ext::ReasonPhrase>() {
        Some(reason) => String::from_utf8_lossy(reason.as_bytes()).into_owned(),
        None => status.canonical_reason().unwrap_or_default().to_string(),
    }
}

/// Append-only log of the body chunks received so far.
///
/// Progress snapshots share it and only join their prefix when the partial
/// body is actually read.
#[derive(Debug, Default)]
pub(crate) struct ReceivedChunks {
    chunks: Mutex<Vec<Bytes>>,
}

impl ReceivedChunks {
    /// Append a chunk, returning the number of chunks logged.
    pub(crate) fn push(&self, chunk: Bytes) -> usize {
        let mut chunks = self.chunks.lock();
        chunks.push(chunk);
        chunks.len()
    }

    fn join(&self, count: usize, len: usize) -> Bytes {
        let chunks = self.chunks.lock();
        let mut body = BytesMut::with_capacity(len);
        for chunk in chunks.iter().take(count) {
            body.extend_from_slice(chunk);
        }
        body.freeze()
    }
}

#[derive(Clone)]
enum Body {
    Complete(Bytes),
    Partial {
        received: Arc<ReceivedChunks>,
        chunks: usize,
        len: usize,
        joined: OnceLock<Bytes>,
    },
}

impl Body {
    fn len(&self) -> usize {
        match self {
            Self::Complete(bytes) => bytes.len(),
            Self::Partial { len, .. } => *len,
        }
    }
}

fn first_value<'a>(headers: &'a ResponseHeaders, name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(key, _)| key.eq_ignore_ascii_case(name))
        .and_then(|(_, values)| values.first())
        .map(String::as_str)
}

/// The outcome of a completed, uncancelled request.
///
/// Only the transport constructs responses. A cancelled or failed launch
/// never produces one.
#[derive(Clone)]
pub struct HttpResponse {
    head: ResponseHead,
    body: Body,
}

impl HttpResponse {
    /// The HTTP status code.
    pub fn status_code(&self) -> u16 {
        self.head.status_code
    }

    /// The reason phrase for the status code (e.g. `"OK"`), empty if the
    /// code has no standard reason.
    pub fn status_message(&self) -> &str {
        &self.head.status_message
    }

    /// The protocol version of the response (e.g. `"HTTP/1.1"`).
    pub fn version(&self) -> &str {
        &self.head.version
    }

    /// Check if the response indicates success (2xx status).
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.head.status_code)
    }

    /// All response headers.
    pub fn headers(&self) -> &ResponseHeaders {
        &self.head.headers
    }

    /// The first value of a header, looked up case-insensitively.
    pub fn header(&self, name: impl AsRef<str>) -> Option<&str> {
        first_value(&self.head.headers, name.as_ref())
    }

    /// Every value of a header, looked up case-insensitively.
    pub fn header_values(&self, name: impl AsRef<str>) -> &[String] {
        let name = name.as_ref();
        self.head
            .headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, values)| values.as_slice())
            .unwrap_or(&[])
    }

    /// The Content-Length header value, if present and numeric.
    pub fn content_length(&self) -> Option<u64> {
        self.head.content_length()
    }

    /// The response body. For progress snapshots this is the body so far,
    /// joined on first access.
    pub fn body(&self) -> &Bytes {
        match &self.body {
            Body::Complete(bytes) => bytes,
            Body::Partial {
                received,
                chunks,
                len,
                joined,
            } => joined.get_or_init(|| received.join(*chunks, *len)),
        }
    }

    /// Length of the body, without joining a partial one.
    pub fn body_len(&self) -> usize {
        self.body.len()
    }

    /// Consume the response, returning its body.
    pub fn into_body(self) -> Bytes {
        match self.body {
            Body::Complete(bytes) => bytes,
            Body::Partial {
                received,
                chunks,
                len,
                joined,
            } => joined
                .into_inner()
                .unwrap_or_else(|| received.join(chunks, len)),
        }
    }

    /// The body decoded as UTF-8, with invalid sequences replaced.
    pub fn text(&self) -> String {
        String::from_utf8_lossy(self.body()).into_owned()
    }

    /// Parse the body as JSON.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_slice(self.body())?)
    }

    #[cfg(test)]
    fn is_joined(&self) -> bool {
        match &self.body {
            Body::Complete(_) => true,
            Body::Partial { joined, .. } => joined.get().is_some(),
        }
    }
}

impl std::fmt::Debug for HttpResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpResponse")
            .field("status_code", &self.head.status_code)
            .field("status_message", &self.head.status_message)
            .field("version", &self.head.version)
            .field("body_len", &self.body_len())
            .finish()
    }
}

/// One progress notification, emitted after each body chunk.
#[derive(Clone, Debug)]
pub struct Progress {
    /// The response so far: final status and headers, partial body.
    pub response: HttpResponse,
    /// The chunk that was just read.
    pub chunk: Bytes,
    /// Completion in `[0, 100]`; 0 when the length is unknown.
    pub percent: u8,
}

impl Progress {
    /// Length of the chunk that was just read.
    pub fn chunk_len(&self) -> usize {
        self.chunk.len()
    }

    /// Total body bytes received so far.
    pub fn bytes_received(&self) -> u64 {
        self.response.body_len() as u64
    }
}

/// Percentage of `received` against `total`, clamped to 100.
pub(crate) fn percent_of(received: u64, total: Option<u64>) -> u8 {
    match total {
        Some(0) | None => 0,
        Some(total) => (received.saturating_mul(100) / total).min(100) as u8,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn head(headers: &[(&str, &str)]) -> ResponseHead {
        let mut map = ResponseHeaders::new();
        for (name, value) in headers {
            map.entry(name.to_string())
                .or_default()
                .push(value.to_string());
        }
        ResponseHead {
            status_code: 200,
            status_message: "OK".to_string(),
            version: "HTTP/1.1".to_string(),
            headers: Arc::new(map),
        }
    }

    #[test]
    fn test_accessors() {
        let response = head(&[("content-type", "text/plain")]).with_body(Bytes::from_static(b"ok"));
        assert_eq!(response.status_code(), 200);
        assert_eq!(response.status_message(), "OK");
        assert_eq!(response.version(), "HTTP/1.1");
        assert!(response.is_success());
        assert_eq!(response.text(), "ok");
        assert_eq!(response.header("Content-Type"), Some("text/plain"));
        assert_eq!(response.header("missing"), None);
    }

    #[test]
    fn test_multi_valued_headers_keep_order() {
        let response = head(&[("set-cookie", "a=1"), ("set-cookie", "b=2")]).with_body(Bytes::new());
        assert_eq!(response.header_values("Set-Cookie"), ["a=1", "b=2"]);
        assert_eq!(response.header("set-cookie"), Some("a=1"));
        assert!(response.header_values("x-none").is_empty());
    }

    #[test]
    fn test_content_length() {
        assert_eq!(head(&[("content-length", "42")]).content_length(), Some(42));
        assert_eq!(head(&[("content-length", "nope")]).content_length(), None);
        assert_eq!(head(&[]).content_length(), None);
    }

    #[test]
    fn test_json_body() {
        let response = head(&[]).with_body(Bytes::from_static(br#"{"id":7}"#));
        let value: serde_json::Value = response.json().unwrap();
        assert_eq!(value["id"], 7);

        let bad = head(&[]).with_body(Bytes::from_static(b"not json"));
        assert!(bad.json::<serde_json::Value>().is_err());
    }

    #[test]
    fn test_percent_of() {
        assert_eq!(percent_of(0, None), 0);
        assert_eq!(percent_of(512, None), 0);
        assert_eq!(percent_of(0, Some(2048)), 0);
        assert_eq!(percent_of(1024, Some(2048)), 50);
        assert_eq!(percent_of(2048, Some(2048)), 100);
        assert_eq!(percent_of(4096, Some(2048)), 100);
        assert_eq!(percent_of(10, Some(0)), 0);
    }

    #[test]
    fn test_reason_phrase_prefers_server_text() {
        let mut extensions = http::Extensions::new();
        assert_eq!(reason_phrase(http::StatusCode::OK, &extensions), "OK");

        extensions.insert(hyper::ext::ReasonPhrase::from_static(b"Everything Fine"));
        assert_eq!(
            reason_phrase(http::StatusCode::OK, &extensions),
            "Everything Fine"
        );
    }

    #[test]
    fn test_reason_phrase_unknown_code() {
        let status = http::StatusCode::from_u16(599).unwrap();
        assert_eq!(reason_phrase(status, &http::Extensions::new()), "");
    }

    #[test]
    fn test_partial_snapshots_share_chunks() {
        let received = Arc::new(ReceivedChunks::default());
        let head = head(&[]);

        let count = received.push(Bytes::from_static(b"abc"));
        let first = head.with_partial_body(&received, count, 3);
        let count = received.push(Bytes::from_static(b"def"));
        let second = head.with_partial_body(&received, count, 6);

        assert_eq!(first.body_len(), 3);
        assert_eq!(second.body_len(), 6);
        assert!(!first.is_joined());
        assert!(!second.is_joined());

        // Later chunks never leak into an earlier snapshot.
        assert_eq!(second.body().as_ref(), b"abcdef");
        assert_eq!(first.body().as_ref(), b"abc");
        assert!(first.is_joined());
        assert_eq!(first.clone().into_body(), Bytes::from_static(b"abc"));
        assert_eq!(second.text(), "abcdef");
    }

    #[test]
    fn test_progress_counts() {
        let progress = Progress {
            response: head(&[]).with_body(Bytes::from_static(b"abcdef")),
            chunk: Bytes::from_static(b"def"),
            percent: 50,
        };
        assert_eq!(progress.chunk_len(), 3);
        assert_eq!(progress.bytes_received(), 6);
    }
}
