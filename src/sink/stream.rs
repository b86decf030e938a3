//! Transport sink backed by a streaming axum body.
//!
//! # Responsibilities
//! - Hold the per-request [`ResponseState`]
//! - Send the response head through a oneshot, exactly once
//! - Stream body chunks through a bounded channel (backpressure from the client)
//! - Expose hijack and close notification for the connection
//!
//! # Design Decisions
//! - No `Content-Length` is computed here; hyper uses chunked encoding unless
//!   the handler set the header itself
//! - Dropping the body stream (client gone or response finished) fires the
//!   close notification
//! - An aborted response ends its body with an error so hyper resets the
//!   stream instead of finishing it cleanly

use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use async_trait::async_trait;
use axum::{
    body::Body,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use bytes::Bytes;
use futures_util::Stream;
use hyper::upgrade::OnUpgrade;
use tokio::sync::{mpsc, oneshot, watch};

use crate::net::connection::ConnectionId;
use crate::sink::capability::{CloseNotify, DisconnectGuard, HijackedConnection};
use crate::sink::{ResponseSink, ResponseState, SinkError};

/// Body chunks buffered between the sink and hyper.
pub const BODY_CHANNEL_CAPACITY: usize = 4;

/// Status and headers as committed.
#[derive(Debug)]
pub struct ResponseHead {
    pub status: StatusCode,
    pub headers: HeaderMap,
}

/// The base sink every decoration chain wraps.
pub struct StreamSink {
    state: ResponseState,
    head_tx: Option<oneshot::Sender<ResponseHead>>,
    body_tx: Option<mpsc::Sender<io::Result<Bytes>>>,
    connection: Option<ConnectionId>,
    upgrade: Option<OnUpgrade>,
    disconnect: watch::Receiver<bool>,
    hijacked: bool,
}

impl StreamSink {
    /// Create a sink and the response it feeds.
    ///
    /// Hijack is only available when both the connection id and hyper's
    /// upgrade handle are present.
    pub fn new(
        connection: Option<ConnectionId>,
        upgrade: Option<OnUpgrade>,
    ) -> (Self, PendingResponse) {
        let (head_tx, head_rx) = oneshot::channel();
        let (body_tx, body_rx) = mpsc::channel(BODY_CHANNEL_CAPACITY);
        let (disconnect_tx, disconnect_rx) = watch::channel(false);

        let sink = Self {
            state: ResponseState::default(),
            head_tx: Some(head_tx),
            body_tx: Some(body_tx),
            connection,
            upgrade,
            disconnect: disconnect_rx,
            hijacked: false,
        };
        let pending = PendingResponse {
            head: head_rx,
            body: BodyStream {
                rx: body_rx,
                _guard: DisconnectGuard(disconnect_tx),
            },
        };
        (sink, pending)
    }

    /// Read-only view of the response state.
    pub fn state(&self) -> &ResponseState {
        &self.state
    }

    fn commit(&mut self) {
        if !self.state.commit() {
            return;
        }
        if let Some(tx) = self.head_tx.take() {
            let head = ResponseHead {
                status: self.state.status,
                headers: self.state.headers.clone(),
            };
            if tx.send(head).is_err() {
                tracing::debug!("Response head receiver dropped before commit");
            }
        }
    }
}

#[async_trait]
impl ResponseSink for StreamSink {
    fn headers(&self) -> &HeaderMap {
        &self.state.headers
    }

    fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.state.headers
    }

    fn write_header(&mut self, status: StatusCode) {
        self.state.set_status(status);
    }

    fn status(&self) -> StatusCode {
        self.state.status
    }

    fn size(&self) -> Option<usize> {
        self.state.size()
    }

    async fn write(&mut self, chunk: Bytes) -> Result<usize, SinkError> {
        if self.hijacked {
            return Err(SinkError::Hijacked);
        }
        self.commit();
        let tx = self.body_tx.as_ref().ok_or(SinkError::Closed)?;
        let len = chunk.len();
        if len == 0 {
            return Ok(0);
        }
        tx.send(Ok(chunk)).await.map_err(|_| SinkError::Disconnected)?;
        self.state.record_write(len);
        Ok(len)
    }

    async fn flush(&mut self) -> Result<(), SinkError> {
        self.commit();
        Ok(())
    }

    async fn close(&mut self) -> Result<(), SinkError> {
        self.commit();
        self.body_tx = None;
        Ok(())
    }

    async fn abort(&mut self) {
        self.commit();
        if let Some(tx) = self.body_tx.take() {
            let aborted = io::Error::other("response aborted");
            if tx.send(Err(aborted)).await.is_err() {
                tracing::debug!("Response body dropped before abort");
            }
        }
    }

    fn hijack(&mut self) -> Result<HijackedConnection, SinkError> {
        if self.hijacked {
            return Err(SinkError::Hijacked);
        }
        match (self.connection, self.upgrade.take()) {
            (Some(id), Some(upgrade)) => {
                self.hijacked = true;
                tracing::debug!(connection_id = %id, "Connection hijacked");
                Ok(HijackedConnection::new(id, upgrade))
            }
            (_, upgrade) => {
                self.upgrade = upgrade;
                Err(SinkError::Unsupported("hijack"))
            }
        }
    }

    fn close_notify(&self) -> Option<CloseNotify> {
        Some(CloseNotify::new(self.disconnect.clone()))
    }
}

/// The response side of a [`StreamSink`], resolved once the head is committed.
pub struct PendingResponse {
    head: oneshot::Receiver<ResponseHead>,
    body: BodyStream,
}

impl PendingResponse {
    /// Wait for the head and build a streaming response.
    ///
    /// A sink dropped without committing yields `500 Internal Server Error`.
    pub async fn into_response(self) -> Response {
        match self.head.await {
            Ok(head) => {
                let mut response = Response::new(Body::from_stream(self.body));
                *response.status_mut() = head.status;
                *response.headers_mut() = head.headers;
                response
            }
            Err(_) => {
                tracing::error!("Response sink dropped before the head was committed");
                StatusCode::INTERNAL_SERVER_ERROR.into_response()
            }
        }
    }
}

struct BodyStream {
    rx: mpsc::Receiver<io::Result<Bytes>>,
    _guard: DisconnectGuard,
}

impl Stream for BodyStream {
    type Item = io::Result<Bytes>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::{header, Request};

    #[tokio::test]
    async fn head_and_body_reach_the_response() {
        let (mut sink, pending) = StreamSink::new(None, None);

        let writer = tokio::spawn(async move {
            sink.headers_mut()
                .insert(header::CONTENT_TYPE, "text/plain".parse().unwrap());
            sink.write_header(StatusCode::ACCEPTED);
            assert_eq!(sink.size(), None);
            sink.write_str("hello ").await.unwrap();
            sink.write_str("world").await.unwrap();
            assert_eq!(sink.size(), Some(11));
            sink.close().await.unwrap();
        });

        let response = pending.into_response().await;
        assert_eq!(response.status(), StatusCode::ACCEPTED);
        assert_eq!(response.headers()[header::CONTENT_TYPE], "text/plain");
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        assert_eq!(&body[..], b"hello world");
        writer.await.unwrap();
    }

    #[tokio::test]
    async fn close_without_writes_commits_an_empty_response() {
        let (mut sink, pending) = StreamSink::new(None, None);
        sink.write_header(StatusCode::NO_CONTENT);
        sink.close().await.unwrap();
        sink.close().await.unwrap();

        let response = pending.into_response().await;
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
    }

    #[tokio::test]
    async fn dropped_sink_yields_internal_error() {
        let (sink, pending) = StreamSink::new(None, None);
        drop(sink);
        let response = pending.into_response().await;
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn dropping_the_body_notifies_and_fails_writes() {
        let (mut sink, pending) = StreamSink::new(None, None);
        let mut notify = sink.close_notify().unwrap();
        sink.flush().await.unwrap();

        let response = pending.into_response().await;
        drop(response);

        notify.closed().await;
        assert!(matches!(
            sink.write_str("late").await,
            Err(SinkError::Disconnected)
        ));
    }

    #[tokio::test]
    async fn aborted_body_ends_with_an_error() {
        let (mut sink, pending) = StreamSink::new(None, None);

        let writer = tokio::spawn(async move {
            sink.write_str("<html><body>partial").await.unwrap();
            sink.abort().await;
            assert!(matches!(sink.write_str("more").await, Err(SinkError::Closed)));
            sink.close().await.unwrap();
        });

        let response = pending.into_response().await;
        assert_eq!(response.status(), StatusCode::OK);
        assert!(axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .is_err());
        writer.await.unwrap();
    }

    #[tokio::test]
    async fn finished_response_also_notifies_close() {
        let (mut sink, pending) = StreamSink::new(None, None);
        let notify = sink.close_notify().unwrap();
        sink.write_str("done").await.unwrap();
        sink.close().await.unwrap();
        assert!(!notify.is_closed());

        let response = pending.into_response().await;
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        assert_eq!(&body[..], b"done");
        assert!(notify.is_closed());
    }

    #[tokio::test]
    async fn hijack_requires_transport_support() {
        let (mut sink, _pending) = StreamSink::new(None, None);
        assert!(matches!(sink.hijack(), Err(SinkError::Unsupported("hijack"))));

        let id = ConnectionId::new();
        let upgrade = hyper::upgrade::on(&mut Request::new(()));
        let (mut sink, _pending) = StreamSink::new(Some(id), Some(upgrade));
        let hijacked = sink.hijack().unwrap();
        assert_eq!(hijacked.connection_id(), id);
        assert!(matches!(sink.write_str("x").await, Err(SinkError::Hijacked)));
        assert!(matches!(sink.hijack(), Err(SinkError::Hijacked)));
    }

    #[test]
    fn base_sink_has_no_pusher() {
        let (mut sink, _pending) = StreamSink::new(None, None);
        assert!(sink.pusher().is_none());
    }
}
