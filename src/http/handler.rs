//! Handler contract.
//!
//! Handlers write their response into the decorated sink instead of
//! returning a body, so transforms and captures see the bytes as they are
//! produced.

use async_trait::async_trait;
use axum::{
    body::Body,
    http::{Request, StatusCode},
};
use thiserror::Error;

use crate::render::RenderError;
use crate::sink::{ResponseSink, SinkError};

/// A handler failure with the status it wants the client to see.
///
/// The status is only used when nothing was written yet.
#[derive(Debug, Error)]
#[error("{status}: {message}")]
pub struct HandlerError {
    pub status: StatusCode,
    pub message: String,
}

impl HandlerError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, message)
    }
}

impl From<SinkError> for HandlerError {
    fn from(e: SinkError) -> Self {
        Self::internal(e.to_string())
    }
}

impl From<RenderError> for HandlerError {
    fn from(e: RenderError) -> Self {
        Self::internal(e.to_string())
    }
}

#[async_trait]
pub trait Handler: Send + Sync + 'static {
    /// Produce the response for `request` into `sink`.
    ///
    /// The sink is closed by the server afterwards.
    async fn handle(
        &self,
        request: Request<Body>,
        sink: &mut dyn ResponseSink,
    ) -> Result<(), HandlerError>;
}
