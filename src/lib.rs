//! Response decoration and streaming transform pipeline.

pub mod cache;
pub mod config;
pub mod decorator;
pub mod http;
pub mod lifecycle;
pub mod net;
pub mod observability;
pub mod render;
pub mod sink;
pub mod transform;

pub use config::{ConfigHandle, PipelineConfig};
pub use decorator::{Decorated, Decorator, DecoratorChain, Layer};
pub use http::{Handler, HandlerError, Server, ServerError};
pub use lifecycle::Shutdown;
pub use sink::{ResponseSink, SinkError, StreamSink};
pub use transform::{Transform, TransformError, TransformPipe, TransformRegistry};
