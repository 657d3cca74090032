// crates/core/src/transport/mod.rs

//! Cross-process capability proxy.
//!
//! A worker that cannot reach the upstream API forwards capability calls to
//! its supervisor over one duplex channel (the worker's stdin/stdout):
//! - `message`: newline-delimited JSON wire format
//! - `correlation`: request multiplexing, deadlines, close handling
//! - `proxy`: worker-side `CapabilityClient`
//! - `service`: supervisor-side request handler

pub mod correlation;
pub mod message;
pub mod proxy;
pub mod service;

pub use correlation::{CorrelationTransport, RequestHandler};
pub use message::{MessageKind, TransportMessage};
pub use proxy::ProxyCapabilityClient;
pub use service::CapabilityService;
