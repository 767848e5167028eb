//! Request-execution pipeline for HTTP RPC clients.
//!
//! This crate turns a typed operation input into bytes on the wire and typed
//! output (or a typed error) back, applying cross-cutting behavior
//! (retries, signing, checksumming, chunked transfer) uniformly across every
//! operation a client exposes.
//!
//! ## Pipeline
//!
//! Every operation runs through five fixed steps:
//!
//! ```text
//! Initialize → Serialize → Build → Finalize → Deserialize
//! ```
//!
//! Each step is an ordered, id-addressed group of middleware (see
//! [`step::Step`]); the [`stack::OperationStack`] wires the steps into one
//! composed handler whose terminal is the injected [`transport::Transport`].
//! Serialization of typed messages is likewise injected via
//! [`stack::Serializer`] and [`stack::Deserializer`]; this crate never
//! interprets message bytes.
//!
//! ## Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use opflow_client::prelude::*;
//!
//! let mut stack = OperationStack::<PutItemInput, PutItemOutput>::new();
//! stack
//!     .finalize
//!     .insert(Arc::new(RetryMiddleware::new(RetryPolicy::default())), Position::First)?;
//!
//! let ctx = OperationContext::builder("PutItem").build();
//! let output = stack
//!     .execute(ctx, input, serializer, deserializer, Arc::new(HyperTransport::new()))
//!     .await?;
//! ```
//!
//! ## Retries
//!
//! [`retry::RetryMiddleware`] wraps the Finalize → transport boundary. Each
//! attempt snapshots the request builder, so headers and signatures never
//! leak across attempts, and every retry is charged against the token budget
//! of the request's partition (host, unless overridden through the context).
//!
//! ## Chunked uploads
//!
//! [`chunked::ChunkedTransferMiddleware`] selects aws-chunked streaming for
//! a request body: 64 KiB chunks, optional chained chunk signatures, and an
//! optional trailing checksum emitted with the terminal chunk.

pub mod chunked;
pub mod clock;
pub mod context;
pub mod middleware;
pub mod request;
pub mod response;
pub mod retry;
pub mod stack;
pub mod step;
pub mod transport;
pub mod validate;

// Re-export the wire-level primitives.
pub use opflow_core::*;

/// Commonly used types, re-exported in one place.
pub mod prelude {
    pub use crate::chunked::{ChunkedEncoder, ChunkedEncodingConfig, ChunkedTransferMiddleware};
    pub use crate::clock::{Clock, TokioClock};
    pub use crate::context::{AttributeKey, ContextBuilder, OperationContext};
    pub use crate::middleware::{compose, handler_fn, Handler, Middleware, SharedHandler};
    pub use crate::request::{BodySource, BuiltRequest, RequestBuilder};
    pub use crate::response::{ResponseBody, WireResponse};
    pub use crate::retry::{PartitionPool, RetryMiddleware, RetryPolicy};
    pub use crate::stack::{Deserializer, OperationOutput, OperationStack, Serializer};
    pub use crate::step::{Position, Step};
    pub use crate::transport::{
        ByteStream, BytesSource, HyperTransport, PayloadBody, StreamSource, Transport,
    };
    pub use crate::validate::ChecksumValidatedStream;
    pub use opflow_core::{
        ChecksumAlgorithm, ChunkSigner, ErrorClass, OperationError, Sha256ChainSigner,
        SigningConfig,
    };
}
