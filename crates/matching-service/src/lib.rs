//! RPC surface over the matching engine (spec §6): an `async_trait` with one
//! method per call, an in-process dispatcher backed by an `EngineRouter`,
//! and — behind the `http` feature — a thin JSON-over-HTTP binding for
//! driving the engine from a separate test process.
//!
//! The HTTP binding is a local test harness, not a wire-protocol
//! compatibility claim: request/response shapes are this crate's own JSON,
//! not the original system's Thrift/gRPC framing.

pub mod error;
pub mod service;
pub mod types;

#[cfg(feature = "http")]
pub mod http;

pub use error::MatchingServiceError;
pub use service::{InProcessMatchingService, MatchingService};
pub use types::*;
