//! Streaming body transforms.
//!
//! # Data Flow
//! ```text
//! handler write
//!     → pipe.rs (bounded hand-off to a blocking task)
//!     → Transform::apply (external function, selected by registry.rs)
//!     → transformed chunks forwarded to the wrapped sink
//! ```
//!
//! # Design Decisions
//! - Transform functions are synchronous `Read`→`Write` functions run on the
//!   blocking pool, so minifiers written against std IO plug in directly
//! - A failing transform never breaks the response: the untransformed rest
//!   of the input is copied through
//! - Selection is keyed by media type and frozen at the first write or flush

pub mod builtin;
pub mod pipe;
pub mod registry;

use std::io::{Read, Write};

use thiserror::Error;

pub use pipe::{PipeState, TransformPipe};
pub use registry::TransformRegistry;

/// Errors reported by a transform function.
#[derive(Debug, Error)]
pub enum TransformError {
    #[error("transform io error: {0}")]
    Io(#[from] std::io::Error),

    /// The input could not be transformed (e.g. malformed markup).
    #[error("transform rejected input: {0}")]
    Rejected(String),

    /// The transform task panicked or was cancelled.
    #[error("transform task aborted: {0}")]
    Aborted(String),
}

/// A byte-stream rewrite for one family of media types.
pub trait Transform: Send + Sync + 'static {
    /// Read the whole input and write the transformed output.
    fn apply(
        &self,
        media_type: &str,
        input: &mut dyn Read,
        output: &mut dyn Write,
    ) -> Result<(), TransformError>;
}

impl<F> Transform for F
where
    F: Fn(&str, &mut dyn Read, &mut dyn Write) -> Result<(), TransformError>
        + Send
        + Sync
        + 'static,
{
    fn apply(
        &self,
        media_type: &str,
        input: &mut dyn Read,
        output: &mut dyn Write,
    ) -> Result<(), TransformError> {
        self(media_type, input, output)
    }
}
