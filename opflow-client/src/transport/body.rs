//! Request body types for the HTTP transport.
//!
//! [`PayloadBody`] is the unified body type handed to the transport: empty,
//! fully materialized, or a live byte stream (chunk-encoded uploads).

use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::Bytes;
use futures::Stream;
use http_body::{Body, Frame};
use pin_project_lite::pin_project;

use opflow_core::OperationError;

/// A pinned, type-erased byte stream with the pipeline's error channel.
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, OperationError>> + Send>>;

/// A source of request body bytes that can be opened once per attempt.
///
/// Retries re-open the source to obtain a fresh stream; a source that cannot
/// be replayed must return an error from its second `open` rather than hand
/// out a half-consumed stream.
pub trait StreamSource: Send + Sync {
    fn open(&self) -> Result<ByteStream, OperationError>;

    /// Total number of bytes the opened stream will yield.
    fn len(&self) -> u64;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// An always-replayable in-memory source.
pub struct BytesSource {
    data: Bytes,
}

impl BytesSource {
    pub fn new(data: impl Into<Bytes>) -> Self {
        Self { data: data.into() }
    }
}

impl StreamSource for BytesSource {
    fn open(&self) -> Result<ByteStream, OperationError> {
        let data = self.data.clone();
        Ok(Box::pin(futures::stream::iter(
            if data.is_empty() { None } else { Some(Ok(data)) },
        )))
    }

    fn len(&self) -> u64 {
        self.data.len() as u64
    }
}

pin_project! {
    /// A request body for pipeline operations.
    #[project = PayloadBodyProj]
    pub enum PayloadBody {
        /// Empty request body.
        Empty,
        /// Full request body with all data available.
        Full {
            data: Option<Bytes>,
        },
        /// Streaming request body from an async stream.
        Streaming {
            #[pin]
            stream: ByteStream,
        },
    }
}

impl PayloadBody {
    pub fn empty() -> Self {
        PayloadBody::Empty
    }

    pub fn full(data: Bytes) -> Self {
        PayloadBody::Full { data: Some(data) }
    }

    pub fn streaming<S>(stream: S) -> Self
    where
        S: Stream<Item = Result<Bytes, OperationError>> + Send + 'static,
    {
        PayloadBody::Streaming {
            stream: Box::pin(stream),
        }
    }

    /// Collect the whole body into memory. Test and convenience use.
    pub async fn collect_bytes(self) -> Result<Bytes, OperationError> {
        use futures::StreamExt;
        match self {
            PayloadBody::Empty => Ok(Bytes::new()),
            PayloadBody::Full { data } => Ok(data.unwrap_or_default()),
            PayloadBody::Streaming { mut stream } => {
                let mut collected = bytes::BytesMut::new();
                while let Some(chunk) = stream.next().await {
                    collected.extend_from_slice(&chunk?);
                }
                Ok(collected.freeze())
            }
        }
    }
}

impl Body for PayloadBody {
    type Data = Bytes;
    type Error = OperationError;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        match self.project() {
            PayloadBodyProj::Empty => Poll::Ready(None),
            PayloadBodyProj::Full { data } => {
                let result = data.take().map(|d| Ok(Frame::data(d)));
                Poll::Ready(result)
            }
            PayloadBodyProj::Streaming { stream } => match stream.poll_next(cx) {
                Poll::Ready(Some(Ok(data))) => Poll::Ready(Some(Ok(Frame::data(data)))),
                Poll::Ready(Some(Err(e))) => Poll::Ready(Some(Err(e))),
                Poll::Ready(None) => Poll::Ready(None),
                Poll::Pending => Poll::Pending,
            },
        }
    }

    fn is_end_stream(&self) -> bool {
        match self {
            PayloadBody::Empty => true,
            PayloadBody::Full { data } => data.is_none(),
            PayloadBody::Streaming { .. } => false,
        }
    }

    fn size_hint(&self) -> http_body::SizeHint {
        match self {
            PayloadBody::Empty => http_body::SizeHint::with_exact(0),
            PayloadBody::Full { data } => http_body::SizeHint::with_exact(
                data.as_ref().map(|d| d.len() as u64).unwrap_or(0),
            ),
            PayloadBody::Streaming { .. } => http_body::SizeHint::default(),
        }
    }
}

impl Default for PayloadBody {
    fn default() -> Self {
        PayloadBody::Empty
    }
}

impl std::fmt::Debug for PayloadBody {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PayloadBody::Empty => write!(f, "PayloadBody::Empty"),
            PayloadBody::Full { data } => f
                .debug_struct("PayloadBody::Full")
                .field("data_len", &data.as_ref().map(|d| d.len()))
                .finish(),
            PayloadBody::Streaming { .. } => write!(f, "PayloadBody::Streaming"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_empty_body() {
        let body = PayloadBody::empty();
        assert!(body.is_end_stream());
        assert_eq!(body.size_hint().exact(), Some(0));
        assert!(body.collect_bytes().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_full_body() {
        let data = Bytes::from("hello world");
        let body = PayloadBody::full(data.clone());
        assert_eq!(body.size_hint().exact(), Some(11));
        assert_eq!(body.collect_bytes().await.unwrap(), data);
    }

    #[tokio::test]
    async fn test_streaming_body_preserves_chunk_order() {
        let chunks = vec![
            Ok(Bytes::from("chunk1")),
            Ok(Bytes::from("chunk2")),
            Ok(Bytes::from("chunk3")),
        ];
        let body = PayloadBody::streaming(futures::stream::iter(chunks));
        assert_eq!(
            body.collect_bytes().await.unwrap(),
            Bytes::from("chunk1chunk2chunk3")
        );
    }

    #[tokio::test]
    async fn test_bytes_source_replays() {
        use futures::StreamExt;
        let source = BytesSource::new("replay me");
        assert_eq!(source.len(), 9);

        for _ in 0..2 {
            let mut stream = source.open().unwrap();
            let mut collected = Vec::new();
            while let Some(chunk) = stream.next().await {
                collected.extend_from_slice(&chunk.unwrap());
            }
            assert_eq!(collected, b"replay me");
        }
    }
}
