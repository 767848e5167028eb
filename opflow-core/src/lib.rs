//! Wire-level primitives for the opflow request-execution pipeline.
//!
//! This crate provides the shared types used by the pipeline crate
//! (`opflow-client`):
//!
//! - [`error`]: the operation error taxonomy and retry classification
//! - [`checksum`]: checksum accumulators and trailer naming
//! - [`chunk`]: aws-chunked transfer framing (encoder primitives and decoder)
//! - [`sign`]: chunk/trailer signing contracts

mod checksum;
mod chunk;
mod error;
mod sign;

pub use checksum::*;
pub use chunk::*;
pub use error::*;
pub use sign::*;
