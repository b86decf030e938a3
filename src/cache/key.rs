//! Cache key derivation.
//!
//! Format: `METHOD:PATH` or `METHOD:PATH?QUERY`, e.g. `GET:/report?id=7`.
//! - repeated `/` are collapsed and a trailing `/` is dropped (root stays `/`)
//! - query pairs are decoded, the bypass parameter is removed, the rest are
//!   sorted by name then value and re-encoded

use std::fmt;

use axum::http::{Method, Uri};
use url::form_urlencoded;

/// Query parameter that skips the cache lookup when set to `true`.
pub const DEFAULT_BYPASS_PARAM: &str = "ignoreCache";

/// Normalized identity of a cacheable request.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Maps requests to cache keys.
#[derive(Debug, Clone)]
pub struct KeySelector {
    bypass_param: String,
}

impl Default for KeySelector {
    fn default() -> Self {
        Self::new(DEFAULT_BYPASS_PARAM)
    }
}

impl KeySelector {
    pub fn new(bypass_param: impl Into<String>) -> Self {
        Self {
            bypass_param: bypass_param.into(),
        }
    }

    /// Whether responses to `method` may be cached at all.
    pub fn is_cacheable(method: &Method) -> bool {
        method == Method::GET || method == Method::HEAD
    }

    /// True when the request asks to skip the cache lookup.
    pub fn is_bypass(&self, uri: &Uri) -> bool {
        let Some(query) = uri.query() else {
            return false;
        };
        form_urlencoded::parse(query.as_bytes())
            .any(|(name, value)| name == self.bypass_param.as_str() && value.eq_ignore_ascii_case("true"))
    }

    pub fn select(&self, method: &Method, uri: &Uri) -> CacheKey {
        let mut key = format!("{}:{}", method, normalize_path(uri.path()));

        if let Some(query) = uri.query() {
            let mut pairs: Vec<(String, String)> = form_urlencoded::parse(query.as_bytes())
                .filter(|(name, _)| name != self.bypass_param.as_str())
                .map(|(name, value)| (name.into_owned(), value.into_owned()))
                .collect();
            if !pairs.is_empty() {
                pairs.sort();
                let encoded = form_urlencoded::Serializer::new(String::new())
                    .extend_pairs(pairs)
                    .finish();
                key.push('?');
                key.push_str(&encoded);
            }
        }
        CacheKey(key)
    }
}

fn normalize_path(path: &str) -> String {
    let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
    format!("/{}", segments.join("/"))
}
