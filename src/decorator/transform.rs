//! Transform decorator.
//!
//! The transform is chosen from the response `Content-Type` at the first
//! write or flush and stays fixed for the rest of the response. Once a
//! transform is active `Content-Length` is dropped, since the body length
//! changes.

use std::sync::Arc;

use async_trait::async_trait;
use axum::http::{header, request::Parts, HeaderMap, HeaderValue, StatusCode};
use bytes::Bytes;

use crate::config::PipelineConfig;
use crate::decorator::{Decorated, Decorator, Layer};
use crate::sink::{ResponseSink, SinkError};
use crate::transform::{PipeState, TransformError, TransformPipe, TransformRegistry};

pub struct TransformDecorator {
    registry: Arc<TransformRegistry>,
}

impl TransformDecorator {
    pub fn new(registry: TransformRegistry) -> Self {
        Self {
            registry: Arc::new(registry),
        }
    }
}

#[async_trait]
impl Decorator for TransformDecorator {
    fn name(&self) -> &'static str {
        "transform"
    }

    fn layer(&self) -> Layer {
        Layer::Transform
    }

    async fn decorate(
        &self,
        _request: &Parts,
        sink: Box<dyn ResponseSink>,
        config: &PipelineConfig,
    ) -> Decorated {
        if !config.transform.enabled || self.registry.is_empty() {
            return Decorated::Continue(sink);
        }
        Decorated::Continue(Box::new(TransformSink::new(
            sink,
            self.registry.clone(),
            config.transform.default_media_type.clone(),
        )))
    }
}

enum Selection {
    Undecided,
    Bypass,
    Active(TransformPipe),
}

pub struct TransformSink {
    inner: Box<dyn ResponseSink>,
    registry: Arc<TransformRegistry>,
    default_media_type: Option<String>,
    selection: Selection,
    closed: bool,
}

impl TransformSink {
    pub fn new(
        inner: Box<dyn ResponseSink>,
        registry: Arc<TransformRegistry>,
        default_media_type: Option<String>,
    ) -> Self {
        Self {
            inner,
            registry,
            default_media_type,
            selection: Selection::Undecided,
            closed: false,
        }
    }

    /// State of the active pipe, `None` while undecided or bypassed.
    pub fn pipe_state(&self) -> Option<PipeState> {
        match &self.selection {
            Selection::Active(pipe) => Some(pipe.state()),
            _ => None,
        }
    }

    pub fn transform_failure(&self) -> Option<&TransformError> {
        match &self.selection {
            Selection::Active(pipe) => pipe.failure(),
            _ => None,
        }
    }

    fn select(&mut self) {
        if !matches!(self.selection, Selection::Undecided) {
            return;
        }
        let status = self.inner.status();
        if status.is_informational()
            || status == StatusCode::NO_CONTENT
            || status == StatusCode::NOT_MODIFIED
        {
            self.selection = Selection::Bypass;
            return;
        }
        if self.inner.content_type().is_none() {
            if let Some(value) = self
                .default_media_type
                .as_deref()
                .and_then(|mt| HeaderValue::from_str(mt).ok())
            {
                self.inner.headers_mut().insert(header::CONTENT_TYPE, value);
            }
        }

        let found = self
            .inner
            .content_type()
            .and_then(|ct| self.registry.lookup(ct));
        self.selection = match found {
            Some((media_type, transform)) => {
                self.inner.headers_mut().remove(header::CONTENT_LENGTH);
                tracing::debug!(media_type = %media_type, "Body transform selected");
                Selection::Active(TransformPipe::new(
                    media_type,
                    transform,
                    self.inner.close_notify(),
                ))
            }
            None => Selection::Bypass,
        };
    }
}

#[async_trait]
impl ResponseSink for TransformSink {
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
        if self.closed {
            return Err(SinkError::Closed);
        }
        self.select();
        match &mut self.selection {
            Selection::Active(pipe) => pipe.write(chunk, self.inner.as_mut()).await,
            _ => self.inner.write(chunk).await,
        }
    }

    async fn flush(&mut self) -> Result<(), SinkError> {
        self.select();
        match &mut self.selection {
            Selection::Active(pipe) => pipe.flush(self.inner.as_mut()).await,
            _ => self.inner.flush().await,
        }
    }

    async fn close(&mut self) -> Result<(), SinkError> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        let drained = match &mut self.selection {
            Selection::Active(pipe) => pipe.close(self.inner.as_mut()).await,
            _ => Ok(()),
        };
        let closed = self.inner.close().await;
        drained.and(closed)
    }

    async fn abort(&mut self) {
        if let Selection::Active(pipe) = &mut self.selection {
            pipe.abort();
        }
        self.inner.abort().await;
    }

    fn inner(&self) -> Option<&dyn ResponseSink> {
        Some(self.inner.as_ref())
    }

    fn inner_mut(&mut self) -> Option<&mut dyn ResponseSink> {
        Some(self.inner.as_mut())
    }
}
