//! HTTP serving subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (hyper auto connection, Axum router, middleware)
//!     → request.rs (request ID)
//!     → server.rs dispatch (route lookup, StreamSink, decorator chain)
//!     → handler.rs (handler writes into the decorated sink)
//! ```

pub mod configurators;
pub mod handler;
pub mod request;
pub mod server;

pub use configurators::{BodyLog, Minifier, ResponseCache, ServerConfigurator, WithAddr, WithRenderTemplates};
pub use handler::{Handler, HandlerError};
pub use request::X_REQUEST_ID;
pub use server::{Server, ServerError};
