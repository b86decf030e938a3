//! Directory-loaded templates with `{{ path }}` placeholders.
//!
//! A placeholder is a dotted path resolved against the render data
//! (`{{ user.name }}`, `{{ items.0 }}`). Strings are HTML-escaped, other
//! scalars are printed as-is, missing values and `null` render empty.

use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::Path;

use serde_json::Value;

use crate::render::{RenderError, TemplateEngine};

#[derive(Debug, Clone, PartialEq)]
enum Segment {
    Literal(String),
    Placeholder(Vec<String>),
}

#[derive(Debug, Clone, Default)]
pub struct TemplateSet {
    templates: HashMap<String, Vec<Segment>>,
}

impl TemplateSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load every `*.{extension}` file in `dir`, named by file name.
    pub fn load_dir(dir: &Path, extension: &str) -> Result<Self, RenderError> {
        let mut set = Self::new();
        for entry in fs::read_dir(dir)? {
            let path = entry?.path();
            if !path.is_file() || path.extension().and_then(|e| e.to_str()) != Some(extension) {
                continue;
            }
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            let source = fs::read_to_string(&path)?;
            set.add(name, &source);
        }
        tracing::info!(dir = ?dir, templates = set.len(), "Templates loaded");
        Ok(set)
    }

    pub fn add(&mut self, name: &str, source: &str) -> &mut Self {
        self.templates.insert(name.to_string(), parse(source));
        self
    }

    pub fn len(&self) -> usize {
        self.templates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.templates.keys().map(String::as_str)
    }
}

impl TemplateEngine for TemplateSet {
    fn has_templates(&self) -> bool {
        !self.is_empty()
    }

    fn contains(&self, name: &str) -> bool {
        self.templates.contains_key(name)
    }

    fn execute(&self, name: &str, data: &Value, out: &mut dyn Write) -> Result<(), RenderError> {
        let segments = self
            .templates
            .get(name)
            .ok_or_else(|| RenderError::UnknownTemplate(name.to_string()))?;
        for segment in segments {
            match segment {
                Segment::Literal(text) => out.write_all(text.as_bytes())?,
                Segment::Placeholder(path) => {
                    if let Some(value) = resolve(data, path) {
                        out.write_all(escape_html(&display(value)).as_bytes())?;
                    }
                }
            }
        }
        Ok(())
    }
}

fn parse(source: &str) -> Vec<Segment> {
    let mut segments = Vec::new();
    let mut rest = source;
    while let Some(start) = rest.find("{{") {
        let Some(len) = rest[start + 2..].find("}}") else {
            break;
        };
        if start > 0 {
            segments.push(Segment::Literal(rest[..start].to_string()));
        }
        let expr = rest[start + 2..start + 2 + len].trim();
        segments.push(Segment::Placeholder(
            expr.split('.')
                .filter(|p| !p.is_empty())
                .map(str::to_string)
                .collect(),
        ));
        rest = &rest[start + 2 + len + 2..];
    }
    if !rest.is_empty() {
        segments.push(Segment::Literal(rest.to_string()));
    }
    segments
}

fn resolve<'a>(data: &'a Value, path: &[String]) -> Option<&'a Value> {
    path.iter().try_fold(data, |value, part| match value {
        Value::Object(map) => map.get(part),
        Value::Array(items) => part.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    })
}

fn display(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&#34;"),
            '\'' => out.push_str("&#39;"),
            c => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn render(source: &str, data: Value) -> String {
        let mut set = TemplateSet::new();
        set.add("t", source);
        let mut out = Vec::new();
        set.execute("t", &data, &mut out).unwrap();
        String::from_utf8(out).unwrap()
    }

    #[test]
    fn resolves_nested_paths() {
        let data = json!({"user": {"name": "Ada"}, "items": ["x", "y"], "n": 3});
        assert_eq!(
            render("{{user.name}}/{{ items.1 }}/{{ n }}", data),
            "Ada/y/3"
        );
    }

    #[test]
    fn escapes_and_blanks() {
        let data = json!({"v": "<a href=\"x\">&</a>", "none": null});
        assert_eq!(
            render("[{{ v }}][{{ none }}][{{ missing.deep }}]", data),
            "[&lt;a href=&#34;x&#34;&gt;&amp;&lt;/a&gt;][][]"
        );
    }

    #[test]
    fn unterminated_placeholder_is_literal() {
        assert_eq!(render("a {{ b", json!({"b": 1})), "a {{ b");
    }

    #[test]
    fn loads_directory_by_extension() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("index.html"), "<p>{{ msg }}</p>").unwrap();
        fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let set = TemplateSet::load_dir(dir.path(), "html").unwrap();
        assert_eq!(set.names().collect::<Vec<_>>(), vec!["index.html"]);
        assert!(set.contains("index.html"));
        assert!(!set.contains("notes.txt"));
    }

    #[test]
    fn missing_directory_is_an_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = TemplateSet::load_dir(&dir.path().join("nope"), "html").unwrap_err();
        assert!(matches!(err, RenderError::Io(_)));
    }
}
