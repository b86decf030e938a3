//! Per-request sink decoration.
//!
//! # Data Flow
//! ```text
//! handler writes
//!     → TransformSink   (Layer::Transform, closest to the handler)
//!     → CaptureSink     (Layer::Cache, cache population)
//!     → CaptureSink     (Layer::Capture, body log)
//!     → StreamSink      (transport)
//! ```
//!
//! # Design Decisions
//! - The chain is built once per server; `apply` instantiates a fresh
//!   decoration per request from the current config snapshot
//! - Decorators are kept sorted by [`Layer`], stable within a layer, so
//!   cached and captured bytes are always the transformed bytes
//! - Every decorator closes itself before closing the sink it wraps: the
//!   outermost sees raw bytes first and its `close` returns last
//! - A decorator can answer the request itself (cache hit); the remaining
//!   decorators and the handler are then skipped

pub mod cache;
pub mod capture;
pub mod transform;

use std::sync::Arc;

use async_trait::async_trait;
use axum::http::request::Parts;

use crate::config::PipelineConfig;
use crate::sink::ResponseSink;

pub use cache::CacheDecorator;
pub use capture::{BodyLogDecorator, CaptureObserver, CaptureSink, CapturedResponse};
pub use transform::{TransformDecorator, TransformSink};

/// Position of a decorator relative to the transport, innermost first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Layer {
    Capture,
    Cache,
    Transform,
}

/// Outcome of decorating a sink.
pub enum Decorated {
    /// Keep going: wrap further and run the handler.
    Continue(Box<dyn ResponseSink>),
    /// The response was already written (and closed).
    Served(Box<dyn ResponseSink>),
}

impl Decorated {
    pub fn is_served(&self) -> bool {
        matches!(self, Decorated::Served(_))
    }

    pub fn into_sink(self) -> Box<dyn ResponseSink> {
        match self {
            Decorated::Continue(sink) | Decorated::Served(sink) => sink,
        }
    }
}

/// Factory for one per-request sink wrapper.
#[async_trait]
pub trait Decorator: Send + Sync + 'static {
    fn name(&self) -> &'static str;

    fn layer(&self) -> Layer;

    /// Wrap `sink` for the request described by `request`.
    ///
    /// Returning the sink unchanged in `Continue` disables the decorator for
    /// this request.
    async fn decorate(
        &self,
        request: &Parts,
        sink: Box<dyn ResponseSink>,
        config: &PipelineConfig,
    ) -> Decorated;
}

/// Ordered decorators applied around the transport sink.
#[derive(Clone, Default)]
pub struct DecoratorChain {
    decorators: Vec<Arc<dyn Decorator>>,
}

impl std::fmt::Debug for DecoratorChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.names()).finish()
    }
}

impl DecoratorChain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert after every decorator of the same or an inner layer.
    pub fn push(&mut self, decorator: Arc<dyn Decorator>) {
        let layer = decorator.layer();
        let at = self
            .decorators
            .iter()
            .position(|d| d.layer() > layer)
            .unwrap_or(self.decorators.len());
        self.decorators.insert(at, decorator);
    }

    pub fn len(&self) -> usize {
        self.decorators.len()
    }

    pub fn is_empty(&self) -> bool {
        self.decorators.is_empty()
    }

    /// Decorator names, innermost first.
    pub fn names(&self) -> Vec<&'static str> {
        self.decorators.iter().map(|d| d.name()).collect()
    }

    /// Wrap `base` innermost-first.
    pub async fn apply(
        &self,
        request: &Parts,
        base: Box<dyn ResponseSink>,
        config: &PipelineConfig,
    ) -> Decorated {
        let mut sink = base;
        for decorator in &self.decorators {
            sink = match decorator.decorate(request, sink, config).await {
                Decorated::Continue(sink) => sink,
                Decorated::Served(sink) => {
                    tracing::debug!(decorator = decorator.name(), "Response served by decorator");
                    return Decorated::Served(sink);
                }
            };
        }
        Decorated::Continue(sink)
    }
}
