//! Built-in transforms.
//!
//! Both are single-pass and keep O(1) state, so they stream.

use std::io::{ErrorKind, Read, Write};

use crate::transform::TransformError;

const CHUNK: usize = 8 * 1024;

/// Elements whose text is copied verbatim.
const RAW_ELEMENTS: [&str; 4] = ["pre", "textarea", "script", "style"];

/// Longest tag name worth remembering; anything longer is never raw.
const MAX_TAG_NAME: usize = 16;

/// Collapse runs of ASCII whitespace to one character.
///
/// A run containing a newline becomes `\n`, any other run a single space.
/// The contents of `<pre>`, `<textarea>`, `<script>` and `<style>` pass
/// through untouched up to the matching close tag.
pub fn collapse_whitespace(
    _media_type: &str,
    input: &mut dyn Read,
    output: &mut dyn Write,
) -> Result<(), TransformError> {
    let mut buf = [0u8; CHUNK];
    let mut out = Vec::with_capacity(CHUNK);
    let mut collapser = HtmlCollapser::default();

    while let Some(n) = read_chunk(input, &mut buf)? {
        for &b in &buf[..n] {
            collapser.push(b, &mut out);
        }
        output.write_all(&out)?;
        out.clear();
    }
    collapser.finish(&mut out);
    output.write_all(&out)?;
    output.flush()?;
    Ok(())
}

#[derive(Default)]
enum Markup {
    #[default]
    Text,
    /// Just after `<`, collecting the lowercased element name.
    TagName(Vec<u8>),
    /// Inside a start or end tag, past the name.
    Tag {
        raw: Option<&'static str>,
        last: u8,
    },
    /// Inside a raw element, watching for `</name`.
    Raw { close: Vec<u8>, matched: usize },
}

#[derive(Default)]
struct HtmlCollapser {
    pending: Option<u8>,
    markup: Markup,
}

impl HtmlCollapser {
    fn push(&mut self, b: u8, out: &mut Vec<u8>) {
        if let Markup::Raw { close, matched } = &mut self.markup {
            out.push(b);
            if b.to_ascii_lowercase() == close[*matched] {
                *matched += 1;
                if *matched == close.len() {
                    self.markup = Markup::Text;
                }
            } else {
                *matched = usize::from(b == b'<');
            }
            return;
        }

        if b.is_ascii_whitespace() {
            self.pending = match (self.pending, b) {
                (Some(b'\n'), _) | (_, b'\n') => Some(b'\n'),
                _ => Some(b' '),
            };
        } else {
            if let Some(ws) = self.pending.take() {
                out.push(ws);
            }
            out.push(b);
        }
        self.track(b);
    }

    fn track(&mut self, b: u8) {
        self.markup = match std::mem::take(&mut self.markup) {
            Markup::Text if b == b'<' => Markup::TagName(Vec::new()),
            Markup::Text => Markup::Text,
            Markup::TagName(mut name) if b.is_ascii_alphanumeric() => {
                if name.len() <= MAX_TAG_NAME {
                    name.push(b.to_ascii_lowercase());
                }
                Markup::TagName(name)
            }
            Markup::TagName(name) => {
                let raw = RAW_ELEMENTS
                    .into_iter()
                    .find(|raw| raw.as_bytes() == name.as_slice());
                Self::in_tag(raw, b'<', b)
            }
            Markup::Tag { raw, last } => Self::in_tag(raw, last, b),
            raw @ Markup::Raw { .. } => raw,
        };
    }

    fn in_tag(raw: Option<&'static str>, last: u8, b: u8) -> Markup {
        match (b, raw) {
            // `<pre/>` has no content to protect.
            (b'>', Some(name)) if last != b'/' => Markup::Raw {
                close: format!("</{name}").into_bytes(),
                matched: 0,
            },
            (b'>', _) => Markup::Text,
            _ if b.is_ascii_whitespace() => Markup::Tag { raw, last },
            _ => Markup::Tag { raw, last: b },
        }
    }

    fn finish(&mut self, out: &mut Vec<u8>) {
        if let Some(ws) = self.pending.take() {
            out.push(ws);
        }
    }
}

/// Drop insignificant whitespace from a JSON document.
///
/// Fails on an unterminated string.
pub fn strip_json_whitespace(
    _media_type: &str,
    input: &mut dyn Read,
    output: &mut dyn Write,
) -> Result<(), TransformError> {
    let mut buf = [0u8; CHUNK];
    let mut out = Vec::with_capacity(CHUNK);
    let mut in_string = false;
    let mut escaped = false;

    while let Some(n) = read_chunk(input, &mut buf)? {
        for &b in &buf[..n] {
            if in_string {
                out.push(b);
                if escaped {
                    escaped = false;
                } else if b == b'\\' {
                    escaped = true;
                } else if b == b'"' {
                    in_string = false;
                }
            } else if b == b'"' {
                in_string = true;
                out.push(b);
            } else if !matches!(b, b' ' | b'\t' | b'\n' | b'\r') {
                out.push(b);
            }
        }
        output.write_all(&out)?;
        out.clear();
    }
    if in_string {
        return Err(TransformError::Rejected("unterminated JSON string".into()));
    }
    output.flush()?;
    Ok(())
}

fn read_chunk(input: &mut dyn Read, buf: &mut [u8]) -> Result<Option<usize>, TransformError> {
    loop {
        match input.read(buf) {
            Ok(0) => return Ok(None),
            Ok(n) => return Ok(Some(n)),
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        }
    }
}
