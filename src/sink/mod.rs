//! Response sink contract.
//!
//! # Data Flow
//! ```text
//! handler
//!     → outermost decorator (transform)
//!     → inner decorators (cache, capture)
//!     → stream.rs (StreamSink, the transport sink)
//!     → hyper response body
//! ```
//!
//! # Design Decisions
//! - The response head is committed exactly once, before the first body byte
//!   leaves the base sink
//! - Capabilities (hijack, push, close notify) are provided methods that
//!   forward through `inner`/`inner_mut`; a decorator only has to expose the
//!   sink it wraps to keep them working
//! - `size()` is `None` until the head is committed

pub mod capability;
pub mod state;
pub mod stream;

use async_trait::async_trait;
use axum::http::{header, HeaderMap, StatusCode};
use bytes::Bytes;
use thiserror::Error;

pub use capability::{CloseNotify, HijackedConnection, Pusher};
pub use state::ResponseState;
pub use stream::{PendingResponse, ResponseHead, StreamSink};

/// Errors returned by sink operations.
#[derive(Debug, Error)]
pub enum SinkError {
    /// The transport does not offer the requested capability.
    #[error("capability not supported by transport: {0}")]
    Unsupported(&'static str),

    /// The connection was taken over for a protocol upgrade.
    #[error("connection was hijacked")]
    Hijacked,

    /// The client went away while the response was being written.
    #[error("client disconnected")]
    Disconnected,

    /// The sink was written to after `close`.
    #[error("sink already closed")]
    Closed,
}

/// Destination for a response: status, headers and a streamed body.
///
/// Implemented by the transport sink and by every decorator wrapping it.
#[async_trait]
pub trait ResponseSink: Send {
    /// Response headers. Changes after the head is committed are not sent.
    fn headers(&self) -> &HeaderMap;

    fn headers_mut(&mut self) -> &mut HeaderMap;

    /// Record the status code. Takes effect at commit time.
    fn write_header(&mut self, status: StatusCode);

    fn status(&self) -> StatusCode;

    /// Bytes written so far, `None` while the head is not yet committed.
    fn size(&self) -> Option<usize>;

    fn written(&self) -> bool {
        self.size().is_some()
    }

    /// Write a body chunk, committing the head first if needed.
    async fn write(&mut self, chunk: Bytes) -> Result<usize, SinkError>;

    async fn write_str(&mut self, text: &str) -> Result<usize, SinkError> {
        self.write(Bytes::copy_from_slice(text.as_bytes())).await
    }

    /// Commit the head if needed and push buffered output to the transport.
    async fn flush(&mut self) -> Result<(), SinkError>;

    /// Finish the response. Calling it twice is a no-op.
    async fn close(&mut self) -> Result<(), SinkError>;

    /// Mark the response as failed after the head went out.
    ///
    /// The transport ends the body abnormally and decorators discard what
    /// they captured. A later `close` only releases resources.
    async fn abort(&mut self) {
        if let Some(inner) = self.inner_mut() {
            inner.abort().await;
        }
    }

    /// The sink this one wraps, if any.
    fn inner(&self) -> Option<&dyn ResponseSink> {
        None
    }

    fn inner_mut(&mut self) -> Option<&mut dyn ResponseSink> {
        None
    }

    /// Take over the underlying connection for a protocol upgrade.
    fn hijack(&mut self) -> Result<HijackedConnection, SinkError> {
        match self.inner_mut() {
            Some(inner) => inner.hijack(),
            None => Err(SinkError::Unsupported("hijack")),
        }
    }

    /// Server push, when the transport supports it.
    fn pusher(&mut self) -> Option<&mut dyn Pusher> {
        self.inner_mut().and_then(|inner| inner.pusher())
    }

    /// A handle resolved when the transport releases the response body.
    fn close_notify(&self) -> Option<CloseNotify> {
        self.inner().and_then(|inner| inner.close_notify())
    }

    fn content_type(&self) -> Option<&str> {
        self.headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
    }
}
