//! Body capture.
//!
//! [`CaptureSink`] mirrors every chunk into a bounded buffer and forwards it
//! unchanged. On close it hands the buffer to a [`CaptureObserver`] and
//! releases it. An aborted response is reported as incomplete.

use async_trait::async_trait;
use axum::http::{request::Parts, HeaderMap, Method, StatusCode};
use bytes::{Bytes, BytesMut};

use crate::config::PipelineConfig;
use crate::decorator::{Decorated, Decorator, Layer};
use crate::sink::{ResponseSink, SinkError};

/// What a capture saw by the time the response closed.
#[derive(Debug, Clone)]
pub struct CapturedResponse {
    pub status: StatusCode,
    pub content_type: Option<String>,
    pub body: Bytes,
    /// False when the body exceeded the limit, a write failed or the response was aborted.
    pub complete: bool,
}

/// Consumer of a finished capture.
#[async_trait]
pub trait CaptureObserver: Send + Sync {
    async fn on_complete(&self, captured: CapturedResponse);
}

pub struct CaptureSink {
    inner: Box<dyn ResponseSink>,
    buffer: BytesMut,
    limit: usize,
    overflowed: bool,
    failed: bool,
    closed: bool,
    observer: Option<Box<dyn CaptureObserver>>,
}

impl CaptureSink {
    pub fn new(
        inner: Box<dyn ResponseSink>,
        limit: usize,
        observer: Box<dyn CaptureObserver>,
    ) -> Self {
        Self {
            inner,
            buffer: BytesMut::new(),
            limit,
            overflowed: false,
            failed: false,
            closed: false,
            observer: Some(observer),
        }
    }

    /// Bytes captured so far. Empty once the limit was exceeded.
    pub fn captured(&self) -> &[u8] {
        &self.buffer
    }

    pub fn overflowed(&self) -> bool {
        self.overflowed
    }
}

#[async_trait]
impl ResponseSink for CaptureSink {
    fn headers(&self) -> &HeaderMap {
        self.inner.headers()
    }

    fn headers_mut(&mut self) -> &mut HeaderMap {
        self.inner.headers_mut()
    }

    fn write_header(&mut self, status: StatusCode) {
        self.inner.write_header(status);
    }

    fn status(&self) -> StatusCode {
        self.inner.status()
    }

    fn size(&self) -> Option<usize> {
        self.inner.size()
    }

    async fn write(&mut self, chunk: Bytes) -> Result<usize, SinkError> {
        if !self.overflowed {
            if self.buffer.len() + chunk.len() > self.limit {
                self.overflowed = true;
                self.buffer = BytesMut::new();
                tracing::debug!(limit = self.limit, "Capture limit exceeded, buffer released");
            } else {
                self.buffer.extend_from_slice(&chunk);
            }
        }
        let written = self.inner.write(chunk).await;
        if written.is_err() {
            self.failed = true;
        }
        written
    }

    async fn flush(&mut self) -> Result<(), SinkError> {
        self.inner.flush().await
    }

    async fn close(&mut self) -> Result<(), SinkError> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        // The observer runs before the transport finishes, so its side
        // effects are visible once the client has read the last byte.
        let flushed = self.inner.flush().await;

        if let Some(observer) = self.observer.take() {
            let captured = CapturedResponse {
                status: self.inner.status(),
                content_type: self.inner.content_type().map(str::to_owned),
                body: std::mem::take(&mut self.buffer).freeze(),
                complete: !self.overflowed && !self.failed && flushed.is_ok(),
            };
            observer.on_complete(captured).await;
        }
        let closed = self.inner.close().await;
        flushed.and(closed)
    }

    async fn abort(&mut self) {
        self.failed = true;
        self.inner.abort().await;
    }

    fn inner(&self) -> Option<&dyn ResponseSink> {
        Some(self.inner.as_ref())
    }

    fn inner_mut(&mut self) -> Option<&mut dyn ResponseSink> {
        Some(self.inner.as_mut())
    }
}

/// Logs response bodies when `capture.enabled` is set.
#[derive(Debug, Clone, Copy, Default)]
pub struct BodyLogDecorator;

#[async_trait]
impl Decorator for BodyLogDecorator {
    fn name(&self) -> &'static str {
        "body_log"
    }

    fn layer(&self) -> Layer {
        Layer::Capture
    }

    async fn decorate(
        &self,
        request: &Parts,
        sink: Box<dyn ResponseSink>,
        config: &PipelineConfig,
    ) -> Decorated {
        if !config.capture.enabled {
            return Decorated::Continue(sink);
        }
        let logger = BodyLogger {
            method: request.method.clone(),
            path: request.uri.path().to_string(),
        };
        Decorated::Continue(Box::new(CaptureSink::new(
            sink,
            config.capture.max_bytes,
            Box::new(logger),
        )))
    }
}

struct BodyLogger {
    method: Method,
    path: String,
}

#[async_trait]
impl CaptureObserver for BodyLogger {
    async fn on_complete(&self, captured: CapturedResponse) {
        let status = captured.status.as_u16();
        if status >= 400 {
            tracing::error!(method = %self.method, path = %self.path, status, "Response status code");
            return;
        }
        tracing::info!(
            method = %self.method,
            path = %self.path,
            status,
            truncated = !captured.complete,
            body = %String::from_utf8_lossy(&captured.body),
            "Response body"
        );
    }
}
