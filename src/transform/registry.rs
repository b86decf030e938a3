//! Media type → transform lookup.
//!
//! # Design Decisions
//! - Exact matches win over patterns
//! - Patterns are tried in registration order, first match wins
//! - Media types are compared without parameters and case-insensitively

use std::collections::HashMap;
use std::sync::Arc;

use regex::Regex;

use crate::transform::builtin::{collapse_whitespace, strip_json_whitespace};
use crate::transform::Transform;

/// Registry of transforms keyed by media type.
#[derive(Clone, Default)]
pub struct TransformRegistry {
    exact: HashMap<String, Arc<dyn Transform>>,
    patterns: Vec<(Regex, Arc<dyn Transform>)>,
}

impl std::fmt::Debug for TransformRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransformRegistry")
            .field("exact", &self.exact.keys().collect::<Vec<_>>())
            .field(
                "patterns",
                &self.patterns.iter().map(|(re, _)| re.as_str()).collect::<Vec<_>>(),
            )
            .finish()
    }
}

impl TransformRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the built-in HTML and JSON transforms.
    pub fn standard() -> Self {
        let mut registry = Self::new();
        registry.add("text/html", collapse_whitespace);
        registry.add_pattern(json_pattern(), strip_json_whitespace);
        registry
    }

    /// Register a transform for one exact media type.
    pub fn add<T: Transform>(&mut self, media_type: &str, transform: T) -> &mut Self {
        self.exact
            .insert(normalize_media_type(media_type), Arc::new(transform));
        self
    }

    /// Register a transform for every media type matching `pattern`.
    pub fn add_pattern<T: Transform>(&mut self, pattern: Regex, transform: T) -> &mut Self {
        self.patterns.push((pattern, Arc::new(transform)));
        self
    }

    /// Find the transform for a `Content-Type` value.
    ///
    /// Returns the normalized media type alongside the transform.
    pub fn lookup(&self, content_type: &str) -> Option<(String, Arc<dyn Transform>)> {
        let media_type = normalize_media_type(content_type);
        if media_type.is_empty() {
            return None;
        }
        if let Some(transform) = self.exact.get(&media_type) {
            return Some((media_type, transform.clone()));
        }
        self.patterns
            .iter()
            .find(|(pattern, _)| pattern.is_match(&media_type))
            .map(|(_, transform)| (media_type, transform.clone()))
    }

    pub fn is_empty(&self) -> bool {
        self.exact.is_empty() && self.patterns.is_empty()
    }
}

/// Strip parameters (`; charset=...`), surrounding whitespace and case.
pub fn normalize_media_type(content_type: &str) -> String {
    content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase()
}

fn json_pattern() -> Regex {
    Regex::new(r"[/+]json$").expect("literal pattern compiles")
}
