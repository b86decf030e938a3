//! Server configurators.
//!
//! Each configurator installs one feature on a [`Server`]. They are applied
//! in the order given, so `HtmlRender` must come after
//! `WithRenderTemplates`.

use std::path::PathBuf;
use std::sync::Arc;

use crate::cache::{CacheStore, MemoryStore};
use crate::decorator::{BodyLogDecorator, CacheDecorator, TransformDecorator};
use crate::http::server::Server;
use crate::render::{HtmlRender, RenderError, TemplateSet};
use crate::transform::TransformRegistry;

pub trait ServerConfigurator {
    fn configure(&self, server: &mut Server);
}

/// Set the listen address.
#[derive(Debug, Clone)]
pub struct WithAddr(pub String);

impl ServerConfigurator for WithAddr {
    fn configure(&self, server: &mut Server) {
        server.set_addr(self.0.clone());
    }
}

/// Load the templates in a directory and make them the server's engine.
#[derive(Debug, Clone)]
pub struct WithRenderTemplates {
    dir: PathBuf,
    extension: String,
}

impl WithRenderTemplates {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            extension: "html".to_string(),
        }
    }

    pub fn extension(mut self, extension: impl Into<String>) -> Self {
        self.extension = extension.into();
        self
    }
}

impl ServerConfigurator for WithRenderTemplates {
    fn configure(&self, server: &mut Server) {
        match TemplateSet::load_dir(&self.dir, &self.extension) {
            Ok(set) => {
                server.set_templates(Arc::new(set));
            }
            Err(e) => {
                tracing::error!(dir = ?self.dir, error = %e, "Failed to load templates");
            }
        }
    }
}

/// Log every response body once it completes.
#[derive(Debug, Clone, Copy, Default)]
pub struct BodyLog;

impl ServerConfigurator for BodyLog {
    fn configure(&self, server: &mut Server) {
        server.add_decorator(BodyLogDecorator);
    }
}

/// Cache successful GET responses in `store`.
#[derive(Clone)]
pub struct ResponseCache {
    store: Arc<dyn CacheStore>,
}

impl ResponseCache {
    pub fn new(store: Arc<dyn CacheStore>) -> Self {
        Self { store }
    }

    /// Cache in a fresh in-memory store.
    pub fn memory() -> Self {
        Self::new(Arc::new(MemoryStore::new()))
    }
}

impl ServerConfigurator for ResponseCache {
    fn configure(&self, server: &mut Server) {
        server.add_decorator(CacheDecorator::new(self.store.clone()));
    }
}

/// Rewrite response bodies with the transforms in `registry`.
#[derive(Debug, Clone)]
pub struct Minifier {
    registry: TransformRegistry,
}

impl Minifier {
    pub fn new(registry: TransformRegistry) -> Self {
        Self { registry }
    }
}

impl Default for Minifier {
    fn default() -> Self {
        Self::new(TransformRegistry::standard())
    }
}

impl ServerConfigurator for Minifier {
    fn configure(&self, server: &mut Server) {
        server.add_decorator(TransformDecorator::new(self.registry.clone()));
    }
}

/// Attaches the server's template engine to this render.
impl ServerConfigurator for HtmlRender {
    fn configure(&self, server: &mut Server) {
        match server.templates() {
            Some(engine) => {
                self.attach(engine);
            }
            None => {
                tracing::error!(error = %RenderError::Undefined, "No templates to render with");
            }
        }
    }
}
