//! Checksum-validating stream decorator.
//!
//! Wraps a readable byte stream, accumulating a checksum as data is read.
//! Once the stream is fully consumed, the computed digest is compared
//! against the expected value exactly once, never per chunk, so partial
//! reads cannot produce false mismatches.

use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::Bytes;
use futures::Stream;

use opflow_core::{BoxedChecksum, ChecksumAlgorithm, OperationError};

/// Stream decorator that verifies a trailing checksum on final read.
pub struct ChecksumValidatedStream<S> {
    inner: S,
    checksum: BoxedChecksum,
    expected: String,
    declared_length: u64,
    consumed: u64,
    validated: bool,
}

impl<S> ChecksumValidatedStream<S> {
    /// Wrap `inner`, expecting `expected` as the base64 digest of
    /// `declared_length` bytes under `algorithm`.
    pub fn new(
        inner: S,
        algorithm: ChecksumAlgorithm,
        expected: impl Into<String>,
        declared_length: u64,
    ) -> Self {
        Self {
            inner,
            checksum: algorithm.accumulator(),
            expected: expected.into(),
            declared_length,
            consumed: 0,
            validated: false,
        }
    }

    /// Bytes passed through so far.
    pub fn consumed(&self) -> u64 {
        self.consumed
    }
}

impl<S> Stream for ChecksumValidatedStream<S>
where
    S: Stream<Item = Result<Bytes, OperationError>> + Unpin,
{
    type Item = Result<Bytes, OperationError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();

        match Pin::new(&mut this.inner).poll_next(cx) {
            Poll::Ready(Some(Ok(chunk))) => {
                this.checksum.update(&chunk);
                this.consumed += chunk.len() as u64;
                Poll::Ready(Some(Ok(chunk)))
            }
            Poll::Ready(Some(Err(err))) => Poll::Ready(Some(Err(err))),
            Poll::Ready(None) => {
                if this.validated {
                    return Poll::Ready(None);
                }
                this.validated = true;

                if this.consumed != this.declared_length {
                    return Poll::Ready(Some(Err(OperationError::transport(format!(
                        "body ended after {} of {} declared bytes",
                        this.consumed, this.declared_length
                    )))));
                }

                let computed = this.checksum.finalize();
                if computed != this.expected {
                    return Poll::Ready(Some(Err(OperationError::ChecksumMismatch {
                        expected: this.expected.clone(),
                        computed,
                    })));
                }
                Poll::Ready(None)
            }
            Poll::Pending => Poll::Pending,
        }
    }
}
