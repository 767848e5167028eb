//! Chunked streaming upload encoder.
//!
//! [`ChunkedEncoder`] turns an arbitrary byte stream into aws-chunked
//! framing: signed or unsigned data chunks followed by a terminal chunk
//! carrying trailer headers (the trailing checksum, when configured).
//!
//! State machine: `Streaming` (reading the source, emitting data chunks) →
//! `FinalPending` (source exhausted, terminal chunk not yet emitted) →
//! `Done`. Chunk production is strictly sequential (chunk *n+1* is not read
//! or signed before chunk *n* has been handed to the transport) because
//! chunk signatures chain on the previous chunk's signature. The producer
//! state sits behind a single async mutex so two concurrent reads can never
//! interleave and corrupt the signature chain or the checksum accumulator.

use std::sync::{Arc, Mutex};

use bytes::{Bytes, BytesMut};
use http::{HeaderMap, HeaderName, HeaderValue};

use opflow_core::{
    encode_chunk, encode_terminal_chunk, BoxFuture, BoxedChecksum, ChecksumAlgorithm, ChunkSigner,
    OperationError, CHUNK_SIZE,
};

use crate::context::{keys, OperationContext};
use crate::middleware::{Handler, Middleware};
use crate::request::{BodyProvider, BodySource, RequestBuilder};
use crate::transport::{ByteStream, PayloadBody, StreamSource};

/// Id under which the chunked-transfer middleware registers in the Build
/// step.
pub const CHUNKED_TRANSFER_MIDDLEWARE_ID: &str = "chunked_transfer";

/// A trailing checksum computed by a previous attempt, kept in the context
/// so a retried attempt emits the same trailer it would otherwise have to
/// recompute.
#[derive(Clone, Debug)]
pub struct ChecksumCache {
    pub algorithm: ChecksumAlgorithm,
    pub decoded_length: u64,
    pub digest: String,
}

/// Shared cache slot stored under
/// [`keys::CACHED_TRAILER_CHECKSUM`](crate::context::keys::CACHED_TRAILER_CHECKSUM).
pub type ChecksumCacheSlot = Arc<Mutex<Option<ChecksumCache>>>;

/// Signing configuration for a chunked upload.
#[derive(Clone)]
pub struct ChunkSigning {
    pub signer: Arc<dyn ChunkSigner>,
    /// Chaining value for the first chunk: the signature of the signed
    /// request itself.
    pub seed_signature: String,
}

/// Configuration for chunk-encoding one request body.
#[derive(Clone)]
pub struct ChunkedEncodingConfig {
    source: Arc<dyn StreamSource>,
    signing: Option<ChunkSigning>,
    checksum: Option<ChecksumAlgorithm>,
}

impl ChunkedEncodingConfig {
    pub fn new(source: Arc<dyn StreamSource>) -> Self {
        Self {
            source,
            signing: None,
            checksum: None,
        }
    }

    /// Sign each chunk, chaining from `seed_signature`.
    pub fn with_signing(
        mut self,
        signer: Arc<dyn ChunkSigner>,
        seed_signature: impl Into<String>,
    ) -> Self {
        self.signing = Some(ChunkSigning {
            signer,
            seed_signature: seed_signature.into(),
        });
        self
    }

    /// Emit a trailing checksum over the decoded body.
    pub fn with_trailing_checksum(mut self, algorithm: ChecksumAlgorithm) -> Self {
        self.checksum = Some(algorithm);
        self
    }

    /// Length of the decoded (pre-framing) body.
    pub fn decoded_length(&self) -> u64 {
        self.source.len()
    }

    pub fn checksum_algorithm(&self) -> Option<ChecksumAlgorithm> {
        self.checksum
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum EncoderState {
    /// Reading the source, emitting data chunks.
    Streaming,
    /// Source exhausted; terminal chunk and trailers still to emit.
    FinalPending,
    /// All frames emitted.
    Done,
}

struct SigningState {
    signer: Arc<dyn ChunkSigner>,
    previous_signature: String,
}

struct EncoderCore {
    source: ByteStream,
    source_done: bool,
    buffer: BytesMut,
    signing: Option<SigningState>,
    checksum: Option<BoxedChecksum>,
    declared_length: u64,
    bytes_read: u64,
    state: EncoderState,
    empty_chunk_sent: bool,
    cache: Option<ChecksumCacheSlot>,
}

/// Streaming aws-chunked encoder for one request attempt.
pub struct ChunkedEncoder {
    core: Arc<tokio::sync::Mutex<EncoderCore>>,
}

impl ChunkedEncoder {
    /// Open the configured source and set up a fresh encoder.
    ///
    /// `cache` is the shared trailing-checksum slot; pass the same slot to
    /// every attempt of one operation so retries reuse the first attempt's
    /// digest.
    pub fn new(
        config: &ChunkedEncodingConfig,
        cache: Option<ChecksumCacheSlot>,
    ) -> Result<Self, OperationError> {
        let source = config.source.open()?;
        Ok(Self {
            core: Arc::new(tokio::sync::Mutex::new(EncoderCore {
                source,
                source_done: false,
                buffer: BytesMut::new(),
                signing: config.signing.as_ref().map(|signing| SigningState {
                    signer: signing.signer.clone(),
                    previous_signature: signing.seed_signature.clone(),
                }),
                checksum: config.checksum.map(|algorithm| algorithm.accumulator()),
                declared_length: config.source.len(),
                bytes_read: 0,
                state: EncoderState::Streaming,
                empty_chunk_sent: false,
                cache,
            })),
        })
    }

    /// Produce the next wire frame, or `None` after the terminal chunk.
    ///
    /// Safe to call again after exhaustion: the terminal chunk is emitted
    /// exactly once.
    pub async fn next_frame(&self) -> Result<Option<Bytes>, OperationError> {
        let mut core = self.core.lock().await;
        match core.produce().await {
            Ok(frame) => Ok(frame),
            Err(err) => {
                core.state = EncoderState::Done;
                Err(err)
            }
        }
    }

    /// Adapt the encoder into a byte stream for a request body.
    pub fn into_stream(self) -> ByteStream {
        Box::pin(futures::stream::unfold(self, |encoder| async move {
            match encoder.next_frame().await {
                Ok(Some(frame)) => Some((Ok(frame), encoder)),
                Ok(None) => None,
                Err(err) => Some((Err(err), encoder)),
            }
        }))
    }
}

impl EncoderCore {
    async fn produce(&mut self) -> Result<Option<Bytes>, OperationError> {
        loop {
            match self.state {
                EncoderState::Streaming => {
                    self.fill_buffer().await?;
                    if self.buffer.is_empty() && self.source_done {
                        self.state = EncoderState::FinalPending;
                        continue;
                    }

                    let take = self.buffer.len().min(CHUNK_SIZE);
                    let chunk = self.buffer.split_to(take).freeze();
                    self.bytes_read += chunk.len() as u64;
                    if let Some(checksum) = &mut self.checksum {
                        checksum.update(&chunk);
                    }

                    let signature = match &mut self.signing {
                        Some(signing) => {
                            let signature = signing
                                .signer
                                .sign_chunk(&chunk, &signing.previous_signature)
                                .await?;
                            signing.previous_signature = signature.clone();
                            Some(signature)
                        }
                        None => None,
                    };

                    #[cfg(feature = "tracing")]
                    tracing::trace!(
                        len = chunk.len(),
                        signed = signature.is_some(),
                        "emitting data chunk"
                    );

                    return Ok(Some(encode_chunk(&chunk, signature.as_deref())));
                }
                EncoderState::FinalPending => {
                    if self.empty_chunk_sent {
                        self.state = EncoderState::Done;
                        continue;
                    }

                    if self.bytes_read != self.declared_length {
                        return Err(OperationError::config(format!(
                            "stream yielded {} bytes but {} were declared",
                            self.bytes_read, self.declared_length
                        )));
                    }

                    let trailers = self.trailer_headers()?;
                    let (chunk_signature, trailer_signature) = match &mut self.signing {
                        Some(signing) => {
                            let empty_signature = signing
                                .signer
                                .sign_chunk(b"", &signing.previous_signature)
                                .await?;
                            let trailer_signature = signing
                                .signer
                                .sign_trailers(&trailers, &empty_signature)
                                .await?;
                            signing.previous_signature = trailer_signature.clone();
                            (Some(empty_signature), Some(trailer_signature))
                        }
                        None => (None, None),
                    };

                    self.empty_chunk_sent = true;
                    self.state = EncoderState::Done;
                    return Ok(Some(encode_terminal_chunk(
                        &trailers,
                        chunk_signature.as_deref(),
                        trailer_signature.as_deref(),
                    )));
                }
                EncoderState::Done => return Ok(None),
            }
        }
    }

    /// Read from the source until a full chunk is buffered or the source
    /// ends.
    async fn fill_buffer(&mut self) -> Result<(), OperationError> {
        use futures::StreamExt;
        while !self.source_done && self.buffer.len() < CHUNK_SIZE {
            match self.source.next().await {
                Some(Ok(bytes)) => self.buffer.extend_from_slice(&bytes),
                Some(Err(err)) => return Err(err),
                None => self.source_done = true,
            }
        }
        Ok(())
    }

    /// Trailer set for the terminal chunk, consulting the shared checksum
    /// cache.
    ///
    /// The digest is always recomputed from the bytes actually streamed this
    /// attempt; a cache entry from an earlier attempt must agree with it. A
    /// divergence means the body changed between attempts and fails loudly
    /// instead of uploading a stale trailer.
    fn trailer_headers(&mut self) -> Result<HeaderMap, OperationError> {
        let mut trailers = HeaderMap::new();
        let Some(checksum) = &self.checksum else {
            return Ok(trailers);
        };

        let algorithm = checksum.algorithm();
        let computed = checksum.finalize();

        let digest = match &self.cache {
            Some(slot) => {
                let mut entry = slot.lock().unwrap();
                match entry.as_ref() {
                    Some(cached) => {
                        if cached.algorithm != algorithm
                            || cached.decoded_length != self.declared_length
                        {
                            return Err(OperationError::invariant(format!(
                                "cached trailer checksum was computed for {}/{} bytes, \
                                 this attempt is {}/{} bytes",
                                cached.algorithm.as_str(),
                                cached.decoded_length,
                                algorithm.as_str(),
                                self.declared_length
                            )));
                        }
                        if cached.digest != computed {
                            return Err(OperationError::ChecksumMismatch {
                                expected: cached.digest.clone(),
                                computed,
                            });
                        }
                        cached.digest.clone()
                    }
                    None => {
                        *entry = Some(ChecksumCache {
                            algorithm,
                            decoded_length: self.declared_length,
                            digest: computed.clone(),
                        });
                        computed
                    }
                }
            }
            None => computed,
        };

        let name: HeaderName = algorithm
            .header_name()
            .parse()
            .map_err(|_| OperationError::invariant("invalid checksum trailer name"))?;
        let value: HeaderValue = digest
            .parse()
            .map_err(|_| OperationError::invariant("invalid checksum trailer value"))?;
        trailers.insert(name, value);
        Ok(trailers)
    }
}

/// Builds a fresh [`ChunkedEncoder`] body per attempt.
struct ChunkedBodyProvider {
    config: ChunkedEncodingConfig,
}

impl BodyProvider for ChunkedBodyProvider {
    fn payload(&self, ctx: &OperationContext) -> Result<PayloadBody, OperationError> {
        let cache = self.config.checksum.map(|_| {
            ctx.get(&keys::CACHED_TRAILER_CHECKSUM).unwrap_or_else(|| {
                let slot: ChecksumCacheSlot = Arc::new(Mutex::new(None));
                ctx.set(&keys::CACHED_TRAILER_CHECKSUM, slot.clone());
                slot
            })
        });

        let encoder = ChunkedEncoder::new(&self.config, cache)?;
        Ok(PayloadBody::streaming(encoder.into_stream()))
    }
}

/// Build-step middleware that selects chunked streaming for the request.
///
/// Sets the framing headers and installs the encoder as the request body:
///
/// - `Content-Encoding: aws-chunked`
/// - `Transfer-Encoding: chunked`
/// - `X-Amz-Decoded-Content-Length: <original length>`
/// - `x-amz-trailer: x-amz-checksum-<algo>` (when checksumming)
pub struct ChunkedTransferMiddleware {
    config: ChunkedEncodingConfig,
}

impl ChunkedTransferMiddleware {
    pub fn new(config: ChunkedEncodingConfig) -> Self {
        Self { config }
    }
}

impl<Out: Send + 'static> Middleware<RequestBuilder, Out> for ChunkedTransferMiddleware {
    fn id(&self) -> &str {
        CHUNKED_TRANSFER_MIDDLEWARE_ID
    }

    fn handle<'a>(
        &'a self,
        ctx: OperationContext,
        mut builder: RequestBuilder,
        next: &'a dyn Handler<RequestBuilder, Out>,
    ) -> BoxFuture<'a, Result<Out, OperationError>> {
        Box::pin(async move {
            builder.set_header(
                http::header::CONTENT_ENCODING,
                HeaderValue::from_static("aws-chunked"),
            );
            builder.set_header(
                http::header::TRANSFER_ENCODING,
                HeaderValue::from_static("chunked"),
            );
            builder.set_header(
                HeaderName::from_static("x-amz-decoded-content-length"),
                HeaderValue::from_str(&self.config.decoded_length().to_string())
                    .map_err(|_| OperationError::invariant("invalid decoded length header"))?,
            );
            if let Some(algorithm) = self.config.checksum {
                builder.set_header(
                    HeaderName::from_static("x-amz-trailer"),
                    HeaderValue::from_str(&algorithm.header_name())
                        .map_err(|_| OperationError::invariant("invalid trailer header"))?,
                );
            }
            builder.set_body(BodySource::Provider(Arc::new(ChunkedBodyProvider {
                config: self.config.clone(),
            })));
            next.call(ctx, builder).await
        })
    }
}
