//! HTTP server setup and request dispatch.
//!
//! # Responsibilities
//! - Hold routes, the decorator chain and the template engine
//! - Build the Axum router with middleware (timeout, request id, tracing)
//! - Serve HTTP/1.1 and HTTP/2 connections with upgrade support
//! - Run each handler against a freshly decorated sink
//! - Drain connections on shutdown
//!
//! # Design Decisions
//! - Dispatch goes through a single fallback handler; routing is an exact
//!   path lookup followed by a method lookup (HEAD falls back to GET)
//! - The handler runs on its own task and streams into the sink while the
//!   Axum handler only waits for the response head
//! - Config is read as a snapshot per request so reloads apply to the next
//!   request without locking

use std::collections::HashMap;
use std::sync::Arc;

use axum::{
    body::Body,
    extract::State,
    http::{header, HeaderValue, Method, Request, StatusCode},
    response::{IntoResponse, Response},
    Router,
};
use hyper::body::Incoming;
use hyper::upgrade::OnUpgrade;
use hyper_util::{
    rt::{TokioExecutor, TokioIo, TokioTimer},
    server::conn::auto,
    service::TowerToHyperService,
};
use thiserror::Error;
use tower::ServiceExt;
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};
use tracing::Instrument;

use crate::config::{ConfigHandle, PipelineConfig};
use crate::decorator::{Decorated, Decorator, DecoratorChain};
use crate::http::configurators::ServerConfigurator;
use crate::http::handler::Handler;
use crate::http::request::{propagate_request_id_layer, request_id, set_request_id_layer};
use crate::lifecycle::Shutdown;
use crate::net::{ConnectionId, ConnectionTracker, Listener, ListenerError};
use crate::observability::metrics;
use crate::render::TemplateEngine;
use crate::sink::{ResponseSink, StreamSink};

type Routes = HashMap<String, HashMap<Method, Arc<dyn Handler>>>;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("must set host address")]
    MissingAddr,

    #[error(transparent)]
    Listener(#[from] ListenerError),

    #[error("server io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Shared by every request of one router.
struct AppState {
    routes: Routes,
    chain: DecoratorChain,
    config: ConfigHandle,
}

impl AppState {
    fn route(&self, method: &Method, path: &str) -> Result<Arc<dyn Handler>, StatusCode> {
        let methods = self.routes.get(path).ok_or(StatusCode::NOT_FOUND)?;
        methods
            .get(method)
            .or_else(|| {
                if *method == Method::HEAD {
                    methods.get(&Method::GET)
                } else {
                    None
                }
            })
            .cloned()
            .ok_or(StatusCode::METHOD_NOT_ALLOWED)
    }
}

/// HTTP server whose responses pass through a decorator chain.
pub struct Server {
    addr: Option<String>,
    routes: Routes,
    chain: DecoratorChain,
    templates: Option<Arc<dyn TemplateEngine>>,
    config: ConfigHandle,
}

impl std::fmt::Debug for Server {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Server")
            .field("addr", &self.addr)
            .field("routes", &self.routes.keys().collect::<Vec<_>>())
            .field("chain", &self.chain)
            .field("templates", &self.templates.is_some())
            .finish()
    }
}

impl Server {
    pub fn new(config: ConfigHandle) -> Self {
        Self {
            addr: None,
            routes: HashMap::new(),
            chain: DecoratorChain::new(),
            templates: None,
            config,
        }
    }

    /// Create a server and apply `configurators` in order.
    pub fn with_configurators(config: ConfigHandle, configurators: &[&dyn ServerConfigurator]) -> Self {
        let mut server = Self::new(config);
        server.configure(configurators);
        server
    }

    /// Apply configurators in order; later ones see what earlier ones set.
    pub fn configure(&mut self, configurators: &[&dyn ServerConfigurator]) -> &mut Self {
        for configurator in configurators {
            configurator.configure(self);
        }
        self
    }

    pub fn set_addr(&mut self, addr: impl Into<String>) -> &mut Self {
        self.addr = Some(addr.into());
        self
    }

    pub fn addr(&self) -> Option<&str> {
        self.addr.as_deref()
    }

    /// Register `handler` for `method` on an exact `path`.
    pub fn handle<H: Handler>(&mut self, method: Method, path: &str, handler: H) -> &mut Self {
        self.routes
            .entry(path.to_string())
            .or_default()
            .insert(method, Arc::new(handler));
        self
    }

    pub fn get<H: Handler>(&mut self, path: &str, handler: H) -> &mut Self {
        self.handle(Method::GET, path, handler)
    }

    pub fn post<H: Handler>(&mut self, path: &str, handler: H) -> &mut Self {
        self.handle(Method::POST, path, handler)
    }

    pub fn add_decorator<D: Decorator>(&mut self, decorator: D) -> &mut Self {
        tracing::debug!(decorator = decorator.name(), "Decorator installed");
        self.chain.push(Arc::new(decorator));
        self
    }

    pub fn decorators(&self) -> &DecoratorChain {
        &self.chain
    }

    pub fn set_templates(&mut self, engine: Arc<dyn TemplateEngine>) -> &mut Self {
        self.templates = Some(engine);
        self
    }

    pub fn templates(&self) -> Option<Arc<dyn TemplateEngine>> {
        self.templates.clone()
    }

    pub fn config(&self) -> &ConfigHandle {
        &self.config
    }

    /// Build the Axum router with all middleware layers.
    #[allow(deprecated)]
    pub fn router(&self) -> Router {
        let config = self.config.snapshot();
        let state = Arc::new(AppState {
            routes: self.routes.clone(),
            chain: self.chain.clone(),
            config: self.config.clone(),
        });

        Router::new()
            .fallback(dispatch)
            .with_state(state)
            .layer(TimeoutLayer::new(config.server.write_timeout()))
            .layer(propagate_request_id_layer())
            .layer(TraceLayer::new_for_http())
            .layer(set_request_id_layer())
    }

    /// Bind the configured address and serve until `shutdown` fires.
    pub async fn run(self, shutdown: &Shutdown) -> Result<(), ServerError> {
        let addr = self
            .addr
            .clone()
            .filter(|addr| !addr.trim().is_empty())
            .ok_or(ServerError::MissingAddr)?;
        let max_connections = self.config.snapshot().server.max_connections;
        let listener = Listener::bind(&addr, max_connections).await?;
        self.serve(listener, shutdown).await
    }

    /// Serve connections from `listener` until `shutdown` fires, then drain.
    pub async fn serve(self, listener: Listener, shutdown: &Shutdown) -> Result<(), ServerError> {
        let config = self.config.snapshot();
        let router = self.router();
        let builder = connection_builder(&config);
        let tracker = ConnectionTracker::new();
        let mut stop = shutdown.subscribe();

        tracing::info!(
            address = %listener.local_addr()?,
            max_connections = listener.max_connections(),
            "HTTP server starting"
        );

        loop {
            let (stream, peer, permit) = tokio::select! {
                accepted = listener.accept() => match accepted {
                    Ok(accepted) => accepted,
                    Err(ListenerError::Closed) => break,
                    Err(e) => {
                        tracing::warn!(error = %e, "Accept failed");
                        continue;
                    }
                },
                _ = stop.recv() => break,
            };

            let guard = tracker.track();
            let connection_id = guard.id();
            let service = router
                .clone()
                .map_request(move |mut request: Request<Incoming>| {
                    request.extensions_mut().insert(connection_id);
                    request
                });
            let service = TowerToHyperService::new(service);
            let builder = builder.clone();
            let mut conn_shutdown = shutdown.subscribe();

            tokio::spawn(async move {
                let _permit = permit;
                let _guard = guard;
                let conn = builder.serve_connection_with_upgrades(TokioIo::new(stream), service);
                tokio::pin!(conn);

                let result = tokio::select! {
                    result = conn.as_mut() => result,
                    _ = conn_shutdown.recv() => {
                        conn.as_mut().graceful_shutdown();
                        conn.as_mut().await
                    }
                };
                if let Err(e) = result {
                    tracing::debug!(
                        connection_id = %connection_id,
                        peer = %peer,
                        error = %e,
                        "Connection closed with error"
                    );
                }
            });
        }

        tracing::info!(active = tracker.active_count(), "Draining connections");
        if !tracker.wait_idle(config.server.write_timeout()).await {
            tracing::warn!(
                active = tracker.active_count(),
                "Connections still open after drain deadline"
            );
        }
        tracing::info!("HTTP server stopped");
        Ok(())
    }
}

fn connection_builder(config: &PipelineConfig) -> auto::Builder<TokioExecutor> {
    let mut builder = auto::Builder::new(TokioExecutor::new());
    builder
        .http1()
        .timer(TokioTimer::new())
        .header_read_timeout(config.server.read_timeout());
    builder
        .http2()
        .timer(TokioTimer::new())
        .keep_alive_interval(config.server.idle_timeout())
        .keep_alive_timeout(config.server.idle_timeout());
    builder
}

/// Route, decorate and run the handler; resolve once the head is committed.
async fn dispatch(State(state): State<Arc<AppState>>, mut request: Request<Body>) -> Response {
    let handler = match state.route(request.method(), request.uri().path()) {
        Ok(handler) => handler,
        Err(status) => {
            tracing::debug!(
                method = %request.method(),
                path = %request.uri().path(),
                status = status.as_u16(),
                "No handler"
            );
            metrics::record_request(status.as_u16());
            return status.into_response();
        }
    };

    let connection = request.extensions().get::<ConnectionId>().copied();
    let upgrade = request.extensions_mut().remove::<OnUpgrade>();
    let (base, pending) = StreamSink::new(connection, upgrade);

    let span = tracing::info_span!(
        "request",
        request_id = %request_id(request.headers()).unwrap_or("unknown"),
        method = %request.method(),
        path = %request.uri().path(),
    );
    let config = state.config.snapshot();
    tokio::spawn(run_request(state, handler, config, request, Box::new(base)).instrument(span));

    pending.into_response().await
}

async fn run_request(
    state: Arc<AppState>,
    handler: Arc<dyn Handler>,
    config: Arc<PipelineConfig>,
    request: Request<Body>,
    base: Box<dyn ResponseSink>,
) {
    let (parts, body) = request.into_parts();
    let mut sink = match state.chain.apply(&parts, base, &config).await {
        Decorated::Served(mut sink) => {
            finish(sink.as_mut()).await;
            return;
        }
        Decorated::Continue(sink) => sink,
    };

    let request = Request::from_parts(parts, body);
    if let Err(e) = handler.handle(request, sink.as_mut()).await {
        if sink.written() {
            tracing::warn!(
                status = e.status.as_u16(),
                error = %e.message,
                "Handler failed after the response started"
            );
            sink.abort().await;
        } else {
            tracing::debug!(status = e.status.as_u16(), error = %e.message, "Handler failed");
            sink.write_header(e.status);
            sink.headers_mut().insert(
                header::CONTENT_TYPE,
                HeaderValue::from_static("text/plain; charset=utf-8"),
            );
            if let Err(e) = sink.write_str(&e.message).await {
                tracing::debug!(error = %e, "Error body not delivered");
            }
        }
    }
    finish(sink.as_mut()).await;
}

async fn finish(sink: &mut dyn ResponseSink) {
    if let Err(e) = sink.close().await {
        tracing::debug!(error = %e, "Response not completed");
    }
    metrics::record_request(sink.status().as_u16());
}
