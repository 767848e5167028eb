//! Transport layer: the "send bytes, receive status+headers+body stream"
//! capability the pipeline executes against.
//!
//! The pipeline treats the transport as opaque. [`HyperTransport`] is the
//! default implementation, built on hyper_util's legacy client with HTTP/1.1
//! and HTTP/2 support and connection pooling.

mod body;
mod hyper;

use opflow_core::{BoxFuture, OperationError};

use crate::request::BuiltRequest;
use crate::response::WireResponse;

pub use body::{ByteStream, BytesSource, PayloadBody, StreamSource};
pub use hyper::{HyperTransport, HyperTransportBuilder};

/// Executes one built request against the wire.
///
/// Implementations classify their own failures: timeouts must surface as
/// [`OperationError::Transport`] with the timeout class so the retry layer
/// can act on them.
pub trait Transport: Send + Sync {
    fn send(&self, request: BuiltRequest) -> BoxFuture<'_, Result<WireResponse, OperationError>>;
}
