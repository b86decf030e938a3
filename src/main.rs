//! Response pipeline demo server.
//!
//! # Architecture Overview
//!
//! ```text
//!     Client Request
//!     ──────────────▶ net listener ──▶ http server ──▶ route lookup
//!                                                          │
//!                                                          ▼
//!     Client Response                              decorator chain
//!     ◀────────────── StreamSink ◀── body_log ◀── cache ◀── transform ◀── handler
//! ```
//!
//! Decorators are installed unconditionally; the `capture`, `cache` and
//! `transform` config sections switch them on and off per request, and
//! config file edits apply without a restart.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use axum::{
    body::Body,
    http::{header, HeaderValue, Request},
};
use clap::Parser;
use serde::Serialize;

use response_pipeline::cache::MemoryStore;
use response_pipeline::config::{self, watcher::ConfigWatcher, ConfigHandle};
use response_pipeline::http::{
    BodyLog, Handler, HandlerError, Minifier, ResponseCache, Server, ServerConfigurator, WithAddr,
    WithRenderTemplates,
};
use response_pipeline::lifecycle::{signals::shutdown_signal, Shutdown};
use response_pipeline::observability::{logging, metrics};
use response_pipeline::render::{HtmlRender, TemplateSet};
use response_pipeline::sink::ResponseSink;

const REPORT_TEMPLATE: &str = "<!doctype html>
<html>
  <head>
    <title>{{ title }}</title>
  </head>
  <body>
    <h1>{{ title }}</h1>
    <p>Report {{ id }}</p>
  </body>
</html>
";

#[derive(Debug, Parser)]
#[command(name = "response-pipeline", version, about = "Response decoration pipeline demo server")]
struct Cli {
    /// Config file; defaults to local.toml or config.toml in . and /etc/response-pipeline
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Directory of `*.html` templates replacing the built-in report page
    #[arg(long)]
    templates: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let (config, config_path) = config::load(cli.config.as_deref())?;
    logging::init_logging(&config.observability)?;

    tracing::info!(
        title = %config.app.title,
        http_addr = %config.server.http_addr,
        config_path = ?config_path,
        cache = config.cache.enabled,
        transform = config.transform.enabled,
        capture = config.capture.enabled,
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let shutdown = Shutdown::new();
    let handle = ConfigHandle::new(config.clone());

    // Keep the watcher alive for the lifetime of the server.
    let _watcher = match &config_path {
        Some(path) => {
            let (watcher, updates) = ConfigWatcher::new(path);
            handle.follow(updates);
            match watcher.run() {
                Ok(watcher) => Some(watcher),
                Err(e) => {
                    tracing::warn!(error = %e, "Config hot reload disabled");
                    None
                }
            }
        }
        None => None,
    };

    let store = MemoryStore::new();
    let janitor = store.spawn_janitor(config.cache.cleanup_interval(), shutdown.subscribe());

    let render = Arc::new(HtmlRender::new());
    let mut server = Server::new(handle);
    match &cli.templates {
        Some(dir) => {
            server.configure(&[&WithRenderTemplates::new(dir)]);
        }
        None => {
            let mut templates = TemplateSet::new();
            templates.add("report.html", REPORT_TEMPLATE);
            server.set_templates(Arc::new(templates));
        }
    }
    let cache = ResponseCache::new(Arc::new(store));
    let configurators: [&dyn ServerConfigurator; 5] = [
        &WithAddr(config.server.http_addr.clone()),
        &BodyLog,
        &cache,
        &Minifier::default(),
        &*render,
    ];
    server.configure(&configurators);
    server
        .get("/report", Report { render: render.clone() })
        .get("/data", Data)
        .get("/health", Health);

    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            shutdown_signal().await;
            shutdown.trigger();
        }
    });

    server.run(&shutdown).await?;
    if let Err(e) = janitor.await {
        tracing::warn!(error = %e, "Cache janitor did not stop cleanly");
    }

    tracing::info!("Shutdown complete");
    Ok(())
}

/// `GET /report?id=N`: an HTML page from the `report.html` template.
struct Report {
    render: Arc<HtmlRender>,
}

#[derive(Serialize)]
struct ReportPage<'a> {
    title: &'a str,
    id: &'a str,
}

#[async_trait]
impl Handler for Report {
    async fn handle(
        &self,
        request: Request<Body>,
        sink: &mut dyn ResponseSink,
    ) -> Result<(), HandlerError> {
        let id = request
            .uri()
            .query()
            .and_then(|q| {
                url::form_urlencoded::parse(q.as_bytes())
                    .find(|(k, _)| k == "id")
                    .map(|(_, v)| v.into_owned())
            })
            .ok_or_else(|| HandlerError::bad_request("missing id"))?;

        let page = self.render.bytes(
            "report.html",
            &ReportPage {
                title: "Report",
                id: &id,
            },
        )?;
        sink.headers_mut().insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("text/html; charset=utf-8"),
        );
        sink.write(page.into()).await?;
        Ok(())
    }
}

/// `GET /data`: pretty-printed JSON, minified when transforms are on.
struct Data;

#[async_trait]
impl Handler for Data {
    async fn handle(
        &self,
        _request: Request<Body>,
        sink: &mut dyn ResponseSink,
    ) -> Result<(), HandlerError> {
        let body = serde_json::to_vec_pretty(&serde_json::json!({
            "service": "response-pipeline",
            "layers": ["body_log", "cache", "transform"],
        }))
        .map_err(|e| HandlerError::internal(e.to_string()))?;
        sink.headers_mut()
            .insert(header::CONTENT_TYPE, HeaderValue::from_static("application/json"));
        sink.write(body.into()).await?;
        Ok(())
    }
}

struct Health;

#[async_trait]
impl Handler for Health {
    async fn handle(
        &self,
        _request: Request<Body>,
        sink: &mut dyn ResponseSink,
    ) -> Result<(), HandlerError> {
        sink.write_str("ok").await?;
        Ok(())
    }
}
