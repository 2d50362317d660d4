//! Shared fixtures for launcher integration tests.

#![allow(dead_code)]

use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use wiremock::MockServer;

/// Install a test-friendly subscriber once per test binary.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
}

/// Start a wiremock server, returning the runtime that keeps it alive.
pub fn mock_server() -> (tokio::runtime::Runtime, MockServer) {
    let runtime = tokio::runtime::Runtime::new().expect("test runtime");
    let server = runtime.block_on(MockServer::start());
    (runtime, server)
}

/// A one-shot HTTP server that sends the head and part of the body, then
/// stalls until released.
pub struct StallingServer {
    url: String,
    release: Option<mpsc::Sender<()>>,
}

impl StallingServer {
    /// Serve `head_len` body bytes immediately and `tail_len` more after
    /// [`release`](Self::release).
    pub fn start(head_len: usize, tail_len: usize) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
        let url = format!("http://{}/slow", listener.local_addr().expect("addr"));
        let (release, released) = mpsc::channel::<()>();

        thread::spawn(move || {
            let Ok((mut stream, _)) = listener.accept() else {
                return;
            };

            if !read_request_head(&mut stream) {
                return;
            }

            let head = format!(
                "HTTP/1.1 200 OK\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                head_len + tail_len
            );
            let _ = stream.write_all(head.as_bytes());
            let _ = stream.write_all(&vec![b'x'; head_len]);
            let _ = stream.flush();

            // A dropped sender releases too.
            let _ = released.recv();
            let _ = stream.write_all(&vec![b'y'; tail_len]);
            let _ = stream.flush();
        });

        Self {
            url,
            release: Some(release),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Let the server send the rest of the body.
    pub fn release(&mut self) {
        if let Some(release) = self.release.take() {
            let _ = release.send(());
        }
    }
}

impl Drop for StallingServer {
    fn drop(&mut self) {
        self.release();
    }
}

/// A URL on which nothing is listening.
pub fn refused_url() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
    let addr = listener.local_addr().expect("addr");
    drop(listener);
    format!("http://{addr}/")
}

fn read_request_head(stream: &mut TcpStream) -> bool {
    let mut request = Vec::new();
    let mut buf = [0u8; 1024];
    while !request.windows(4).any(|w| w == b"\r\n\r\n") {
        match stream.read(&mut buf) {
            Ok(0) | Err(_) => return false,
            Ok(n) => request.extend_from_slice(&buf[..n]),
        }
    }
    true
}

/// Answer a single request with `response` verbatim, returning the URL.
pub fn serve_raw(response: &'static [u8]) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
    let url = format!("http://{}/raw", listener.local_addr().expect("addr"));

    thread::spawn(move || {
        let Ok((mut stream, _)) = listener.accept() else {
            return;
        };
        if read_request_head(&mut stream) {
            let _ = stream.write_all(response);
            let _ = stream.flush();
        }
    });

    url
}

/// A listener whose accept queue is full, so new connects stall in the
/// handshake.
pub struct SaturatedListener {
    url: String,
    _queued: Vec<TcpStream>,
    _listener: tokio::net::TcpListener,
    _runtime: tokio::runtime::Runtime,
}

impl SaturatedListener {
    pub fn start() -> Self {
        let runtime = tokio::runtime::Runtime::new().expect("test runtime");
        let listener = {
            let _guard = runtime.enter();
            let socket = tokio::net::TcpSocket::new_v4().expect("socket");
            socket
                .bind("127.0.0.1:0".parse().expect("addr"))
                .expect("bind");
            socket.listen(1).expect("listen")
        };
        let addr = listener.local_addr().expect("addr");

        // Nobody accepts, so the queue fills after a few handshakes.
        let mut queued = Vec::new();
        let mut stalled = false;
        for _ in 0..64 {
            match TcpStream::connect_timeout(&addr, Duration::from_millis(200)) {
                Ok(stream) => queued.push(stream),
                Err(err) if err.kind() == std::io::ErrorKind::TimedOut => {
                    stalled = true;
                    break;
                }
                Err(err) => panic!("unexpected connect error: {err}"),
            }
        }
        assert!(stalled, "accept queue never filled");

        Self {
            url: format!("http://{addr}/"),
            _queued: queued,
            _listener: listener,
            _runtime: runtime,
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}
