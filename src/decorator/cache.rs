//! Response cache decorator.
//!
//! # Data Flow
//! ```text
//! request → KeySelector → store lookup
//!     hit:  cached body written to the sink, chain short-circuited
//!     miss: CaptureSink(CachePopulator) wraps the sink
//!           → on close, a complete 2xx body is upserted with the TTL
//! ```

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::http::{header, request::Parts, HeaderValue, StatusCode};

use crate::cache::{CacheEntry, CacheKey, CacheStore, KeySelector};
use crate::config::PipelineConfig;
use crate::decorator::capture::{CaptureObserver, CaptureSink, CapturedResponse};
use crate::decorator::{Decorated, Decorator, Layer};
use crate::observability::metrics;
use crate::sink::{ResponseSink, SinkError};

pub struct CacheDecorator {
    store: Arc<dyn CacheStore>,
}

impl CacheDecorator {
    pub fn new(store: Arc<dyn CacheStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Decorator for CacheDecorator {
    fn name(&self) -> &'static str {
        "cache"
    }

    fn layer(&self) -> Layer {
        Layer::Cache
    }

    async fn decorate(
        &self,
        request: &Parts,
        mut sink: Box<dyn ResponseSink>,
        config: &PipelineConfig,
    ) -> Decorated {
        if !config.cache.enabled || !KeySelector::is_cacheable(&request.method) {
            return Decorated::Continue(sink);
        }
        let selector = KeySelector::new(config.cache.bypass_param.as_str());
        let key = selector.select(&request.method, &request.uri);

        if selector.is_bypass(&request.uri) {
            tracing::debug!(cache_key = %key, "Cache bypass requested");
            metrics::record_cache_lookup("bypass");
        } else {
            match self.store.get(&key).await {
                Ok(Some(entry)) => {
                    tracing::debug!(cache_key = %key, bytes = entry.body.len(), "Cache hit");
                    metrics::record_cache_lookup("hit");
                    if let Err(e) = serve_entry(sink.as_mut(), entry).await {
                        tracing::debug!(cache_key = %key, error = %e, "Cached response not delivered");
                    }
                    return Decorated::Served(sink);
                }
                Ok(None) => {
                    tracing::debug!(cache_key = %key, "Cache miss");
                    metrics::record_cache_lookup("miss");
                }
                Err(e) => {
                    tracing::warn!(cache_key = %key, error = %e, "Cache lookup failed, serving uncached");
                    metrics::record_cache_lookup("error");
                }
            }
        }

        let populator = CachePopulator {
            store: self.store.clone(),
            key,
            ttl: config.cache.ttl(),
        };
        Decorated::Continue(Box::new(CaptureSink::new(
            sink,
            config.capture.max_bytes,
            Box::new(populator),
        )))
    }
}

async fn serve_entry(sink: &mut dyn ResponseSink, entry: CacheEntry) -> Result<(), SinkError> {
    let headers = sink.headers_mut();
    if let Some(value) = entry
        .content_type
        .as_deref()
        .and_then(|ct| HeaderValue::from_str(ct).ok())
    {
        headers.insert(header::CONTENT_TYPE, value);
    }
    headers.insert(header::CONTENT_LENGTH, HeaderValue::from(entry.body.len()));
    sink.write_header(StatusCode::OK);
    if !entry.body.is_empty() {
        sink.write(entry.body).await?;
    }
    sink.close().await
}

/// Stores a finished capture under its key.
struct CachePopulator {
    store: Arc<dyn CacheStore>,
    key: CacheKey,
    ttl: Duration,
}

#[async_trait]
impl CaptureObserver for CachePopulator {
    async fn on_complete(&self, captured: CapturedResponse) {
        if !captured.status.is_success() || !captured.complete {
            tracing::debug!(
                cache_key = %self.key,
                status = captured.status.as_u16(),
                complete = captured.complete,
                "Response not cached"
            );
            metrics::record_cache_store("skipped");
            return;
        }
        let bytes = captured.body.len();
        let entry = CacheEntry::new(self.key.clone(), captured.body, captured.content_type, self.ttl);
        match self.store.set(entry).await {
            Ok(()) => {
                tracing::debug!(cache_key = %self.key, bytes, ttl_secs = self.ttl.as_secs(), "Response cached");
                metrics::record_cache_store("stored");
            }
            Err(e) => {
                tracing::warn!(cache_key = %self.key, error = %e, "Failed to store response");
                metrics::record_cache_store("failed");
            }
        }
    }
}
