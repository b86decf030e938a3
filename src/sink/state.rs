//! Per-request response state.

use axum::http::{header, HeaderMap, StatusCode};

/// Mutable record of one response, owned by the transport sink.
#[derive(Debug, Clone)]
pub struct ResponseState {
    /// Status sent at commit time.
    pub status: StatusCode,
    /// Body bytes handed to the transport.
    pub bytes_written: usize,
    /// Set once, when the head goes out.
    pub header_committed: bool,
    /// `Content-Type` as it was at commit time.
    pub content_type: Option<String>,
    pub headers: HeaderMap,
}

impl Default for ResponseState {
    fn default() -> Self {
        Self {
            status: StatusCode::OK,
            bytes_written: 0,
            header_committed: false,
            content_type: None,
            headers: HeaderMap::new(),
        }
    }
}

impl ResponseState {
    /// Bytes written, `None` until committed.
    pub fn size(&self) -> Option<usize> {
        self.header_committed.then_some(self.bytes_written)
    }

    /// Record a status. Ignored (returns `false`) once the head is committed.
    pub fn set_status(&mut self, status: StatusCode) -> bool {
        if self.header_committed {
            tracing::warn!(
                current = %self.status,
                requested = %status,
                "superfluous write_header after commit"
            );
            return false;
        }
        self.status = status;
        true
    }

    /// Mark the head committed. Returns `true` only for the first call.
    pub fn commit(&mut self) -> bool {
        if self.header_committed {
            return false;
        }
        self.header_committed = true;
        self.content_type = self
            .headers
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        true
    }

    pub fn record_write(&mut self, len: usize) {
        self.bytes_written += len;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn size_is_none_until_commit() {
        let mut state = ResponseState::default();
        assert_eq!(state.size(), None);

        assert!(state.commit());
        assert_eq!(state.size(), Some(0));

        state.record_write(12);
        assert_eq!(state.size(), Some(12));
    }

    #[test]
    fn commit_happens_once_and_freezes_status() {
        let mut state = ResponseState::default();
        state
            .headers
            .insert(header::CONTENT_TYPE, "text/html".parse().unwrap());
        assert!(state.set_status(StatusCode::CREATED));

        assert!(state.commit());
        assert!(!state.commit());
        assert_eq!(state.content_type.as_deref(), Some("text/html"));

        assert!(!state.set_status(StatusCode::NOT_FOUND));
        assert_eq!(state.status, StatusCode::CREATED);
    }
}
