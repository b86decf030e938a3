//! Shared utilities for integration tests.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use axum::{
    body::Body,
    http::{header, HeaderMap, HeaderValue, Method, Request, StatusCode},
    Router,
};
use bytes::Bytes;
use tokio::task::JoinHandle;
use tower::ServiceExt;

use response_pipeline::http::{Handler, HandlerError, Server, ServerError};
use response_pipeline::lifecycle::Shutdown;
use response_pipeline::net::Listener;
use response_pipeline::sink::ResponseSink;

/// Handler that counts its invocations and writes a fixed body in chunks.
#[derive(Clone)]
pub struct Counting {
    pub calls: Arc<AtomicUsize>,
    pub status: StatusCode,
    pub content_type: &'static str,
    pub chunks: Vec<&'static str>,
    /// Calls left that fail right after the first chunk went out.
    pub failures: Arc<AtomicUsize>,
}

impl Counting {
    pub fn new(content_type: &'static str, chunks: &[&'static str]) -> Self {
        Self {
            calls: Arc::new(AtomicUsize::new(0)),
            status: StatusCode::OK,
            content_type,
            chunks: chunks.to_vec(),
            failures: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Make the next `times` calls fail after writing the first chunk.
    pub fn failing_after_first_chunk(self, times: usize) -> Self {
        self.failures.store(times, Ordering::SeqCst);
        self
    }

    pub fn with_status(mut self, status: StatusCode) -> Self {
        self.status = status;
        self
    }

    fn take_failure(&self) -> bool {
        self.failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Handler for Counting {
    async fn handle(
        &self,
        _request: Request<Body>,
        sink: &mut dyn ResponseSink,
    ) -> Result<(), HandlerError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        sink.headers_mut()
            .insert(header::CONTENT_TYPE, HeaderValue::from_static(self.content_type));
        sink.write_header(self.status);
        for (i, chunk) in self.chunks.iter().enumerate() {
            sink.write_str(chunk).await?;
            if i == 0 && self.take_failure() {
                return Err(HandlerError::internal("backend went away"));
            }
        }
        Ok(())
    }
}

pub struct Reply {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: String,
}

/// Send one request through the router without a socket.
pub async fn send(router: &Router, method: Method, uri: &str) -> Reply {
    let request = Request::builder()
        .method(method)
        .uri(uri)
        .body(Body::empty())
        .unwrap();
    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let headers = response.headers().clone();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    Reply {
        status,
        headers,
        body: String::from_utf8(body.to_vec()).unwrap(),
    }
}

/// Send a GET and keep the body collection result, for responses that may
/// end abnormally.
pub async fn fetch(router: &Router, uri: &str) -> (StatusCode, Result<Bytes, axum::Error>) {
    let request = Request::builder().uri(uri).body(Body::empty()).unwrap();
    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    (status, axum::body::to_bytes(response.into_body(), usize::MAX).await)
}

pub async fn get(router: &Router, uri: &str) -> Reply {
    send(router, Method::GET, uri).await
}

/// Serve `server` on an ephemeral port.
pub async fn spawn_server(
    server: Server,
) -> (SocketAddr, Shutdown, JoinHandle<Result<(), ServerError>>) {
    let listener = Listener::bind("127.0.0.1:0", 64).await.unwrap();
    let addr = listener.local_addr().unwrap();
    let shutdown = Shutdown::new();
    let task = {
        let shutdown = shutdown.clone();
        tokio::spawn(async move { server.serve(listener, &shutdown).await })
    };
    (addr, shutdown, task)
}
