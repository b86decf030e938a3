//! HTML rendering glue.
//!
//! Handlers render named templates into bytes or strings through
//! [`HtmlRender`]; the engine behind it comes from the server
//! (`WithRenderTemplates`) and is picked up when the render is configured.
//!
//! # Design Decisions
//! - Lookup failures are typed errors; callers choose the status code
//! - `must_*` variants degrade to empty output and log instead

pub mod templates;

use std::io::Write;
use std::sync::{Arc, OnceLock};

use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

pub use templates::TemplateSet;

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("html render is undefined")]
    Undefined,

    #[error("html render's template is nil")]
    TemplateNil,

    #[error("template {0:?} is undefined")]
    UnknownTemplate(String),

    #[error("template execution failed: {0}")]
    Execute(String),

    #[error("template io error: {0}")]
    Io(#[from] std::io::Error),
}

/// A set of named templates that render JSON-like data.
pub trait TemplateEngine: Send + Sync + 'static {
    /// False when the engine holds no templates at all.
    fn has_templates(&self) -> bool;

    fn contains(&self, name: &str) -> bool;

    fn execute(&self, name: &str, data: &Value, out: &mut dyn Write) -> Result<(), RenderError>;
}

/// Renders templates by name.
#[derive(Default)]
pub struct HtmlRender {
    engine: OnceLock<Arc<dyn TemplateEngine>>,
}

impl std::fmt::Debug for HtmlRender {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HtmlRender")
            .field("configured", &self.engine.get().is_some())
            .finish()
    }
}

impl HtmlRender {
    /// An unconfigured render; every call fails with `Undefined` until an
    /// engine is attached.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_engine(engine: Arc<dyn TemplateEngine>) -> Self {
        let render = Self::new();
        render.attach(engine);
        render
    }

    /// Attach the engine. Only the first call has an effect.
    pub fn attach(&self, engine: Arc<dyn TemplateEngine>) -> bool {
        let attached = self.engine.set(engine).is_ok();
        if !attached {
            tracing::warn!("HtmlRender already has an engine, keeping the first one");
        }
        attached
    }

    pub fn output<T>(&self, out: &mut dyn Write, name: &str, data: &T) -> Result<(), RenderError>
    where
        T: Serialize + ?Sized,
    {
        let Some(engine) = self.engine.get() else {
            tracing::error!(error = %RenderError::Undefined, "HtmlRender.output");
            return Err(RenderError::Undefined);
        };
        if !engine.has_templates() {
            tracing::error!(error = %RenderError::TemplateNil, "HtmlRender.output");
            return Err(RenderError::TemplateNil);
        }
        if !engine.contains(name) {
            return Err(RenderError::UnknownTemplate(name.to_string()));
        }
        let data = serde_json::to_value(data).map_err(|e| RenderError::Execute(e.to_string()))?;
        engine.execute(name, &data, out)
    }

    pub fn bytes<T>(&self, name: &str, data: &T) -> Result<Vec<u8>, RenderError>
    where
        T: Serialize + ?Sized,
    {
        let mut buf = Vec::new();
        self.output(&mut buf, name, data)?;
        Ok(buf)
    }

    pub fn string<T>(&self, name: &str, data: &T) -> Result<String, RenderError>
    where
        T: Serialize + ?Sized,
    {
        let bytes = self.bytes(name, data)?;
        String::from_utf8(bytes).map_err(|e| RenderError::Execute(e.to_string()))
    }

    /// Like [`HtmlRender::string`], empty on failure.
    pub fn must_string<T>(&self, name: &str, data: &T) -> String
    where
        T: Serialize + ?Sized,
    {
        self.string(name, data)
            .unwrap_or_else(|e| degrade(name, e))
    }

    /// Like [`HtmlRender::bytes`], empty on failure.
    pub fn must_bytes<T>(&self, name: &str, data: &T) -> Vec<u8>
    where
        T: Serialize + ?Sized,
    {
        self.bytes(name, data).unwrap_or_else(|e| degrade(name, e))
    }
}

fn degrade<T: Default>(name: &str, error: RenderError) -> T {
    match error {
        RenderError::UnknownTemplate(_) => {
            tracing::warn!(template = name, "HtmlRender: template is undefined");
        }
        other => tracing::error!(template = name, error = %other, "HtmlRender: render failed"),
    }
    T::default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn render() -> HtmlRender {
        let mut set = TemplateSet::new();
        set.add("hello.html", "<h1>{{ title }}</h1>");
        HtmlRender::with_engine(Arc::new(set))
    }

    #[test]
    fn renders_named_template() {
        let out = render().string("hello.html", &json!({"title": "Hi"})).unwrap();
        assert_eq!(out, "<h1>Hi</h1>");
    }

    #[test]
    fn typed_errors() {
        assert!(matches!(
            HtmlRender::new().string("x", &json!({})),
            Err(RenderError::Undefined)
        ));
        assert!(matches!(
            HtmlRender::with_engine(Arc::new(TemplateSet::new())).string("x", &json!({})),
            Err(RenderError::TemplateNil)
        ));
        assert!(matches!(
            render().bytes("missing.html", &json!({})),
            Err(RenderError::UnknownTemplate(name)) if name == "missing.html"
        ));
    }

    #[test]
    fn must_variants_degrade_to_empty() {
        assert_eq!(render().must_string("missing.html", &json!({})), "");
        assert!(render().must_bytes("missing.html", &json!({})).is_empty());
        assert!(HtmlRender::new().must_bytes("x", &json!({})).is_empty());
        assert_eq!(
            render().must_bytes("hello.html", &json!({"title": "ok"})),
            b"<h1>ok</h1>"
        );
    }

    #[test]
    fn first_engine_wins() {
        let render = render();
        assert!(!render.attach(Arc::new(TemplateSet::new())));
        assert!(render.string("hello.html", &json!({"title": 1})).is_ok());
    }
}
