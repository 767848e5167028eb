//! Chunk and trailer signing contracts.
//!
//! Signing is an injected capability: the streaming encoder chains each
//! chunk's signature on the previous one (the first chunk chains on the seed
//! signature from the signed request) and asks a [`ChunkSigner`] for every
//! signature. Signers may be network-bound (credential resolution), so the
//! contract is async.

use std::future::Future;
use std::pin::Pin;

use http::HeaderMap;
use sha2::{Digest, Sha256};

use crate::error::OperationError;

/// Type alias for a boxed future returning a result.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Configuration handed to a signer for one request.
///
/// The fields are opaque to the pipeline; concrete signers interpret them.
#[derive(Clone, Debug)]
pub struct SigningConfig {
    /// Credential identifier.
    pub key_id: String,
    /// Signing secret.
    pub secret: Vec<u8>,
    /// Credential scope string (e.g. date/region/service).
    pub scope: String,
}

impl SigningConfig {
    pub fn new(
        key_id: impl Into<String>,
        secret: impl Into<Vec<u8>>,
        scope: impl Into<String>,
    ) -> Self {
        Self {
            key_id: key_id.into(),
            secret: secret.into(),
            scope: scope.into(),
        }
    }
}

/// Signs chunks and trailer sets for a chunked upload.
///
/// `previous_signature` is the chaining value: the signature of the previous
/// chunk, or the seed signature for the first chunk. Implementations must be
/// deterministic for a given `(chunk, previous_signature)` pair: the retry
/// layer re-signs re-read bodies and the results must agree.
pub trait ChunkSigner: Send + Sync {
    /// Sign one chunk's body bytes.
    fn sign_chunk<'a>(
        &'a self,
        chunk: &'a [u8],
        previous_signature: &'a str,
    ) -> BoxFuture<'a, Result<String, OperationError>>;

    /// Sign the trailer header set emitted after the terminal chunk.
    fn sign_trailers<'a>(
        &'a self,
        trailers: &'a HeaderMap,
        previous_signature: &'a str,
    ) -> BoxFuture<'a, Result<String, OperationError>>;
}

/// Deterministic chained signer over SHA-256.
///
/// The signature of a chunk is
/// `hex(SHA256(secret || scope || previous_signature || SHA256(chunk)))`;
/// trailer sets are signed over their canonical `name:value\n` form.
pub struct Sha256ChainSigner {
    config: SigningConfig,
}

impl Sha256ChainSigner {
    pub fn new(config: SigningConfig) -> Self {
        Self { config }
    }

    fn chain(&self, previous_signature: &str, payload_digest: &[u8]) -> String {
        let mut hasher = Sha256::new();
        hasher.update(&self.config.secret);
        hasher.update(self.config.scope.as_bytes());
        hasher.update(previous_signature.as_bytes());
        hasher.update(payload_digest);
        hex::encode(hasher.finalize())
    }
}

impl ChunkSigner for Sha256ChainSigner {
    fn sign_chunk<'a>(
        &'a self,
        chunk: &'a [u8],
        previous_signature: &'a str,
    ) -> BoxFuture<'a, Result<String, OperationError>> {
        Box::pin(async move {
            let payload_digest = Sha256::digest(chunk);
            Ok(self.chain(previous_signature, &payload_digest))
        })
    }

    fn sign_trailers<'a>(
        &'a self,
        trailers: &'a HeaderMap,
        previous_signature: &'a str,
    ) -> BoxFuture<'a, Result<String, OperationError>> {
        Box::pin(async move {
            let canonical = canonical_trailers(trailers)?;
            let payload_digest = Sha256::digest(canonical.as_bytes());
            Ok(self.chain(previous_signature, &payload_digest))
        })
    }
}

/// Canonical form of a trailer set: `name:value\n` per header, in map order.
fn canonical_trailers(trailers: &HeaderMap) -> Result<String, OperationError> {
    let mut canonical = String::new();
    for (name, value) in trailers {
        let value = value
            .to_str()
            .map_err(|_| OperationError::serialize(format!("non-ASCII trailer value: {name}")))?;
        canonical.push_str(name.as_str());
        canonical.push(':');
        canonical.push_str(value);
        canonical.push('\n');
    }
    Ok(canonical)
}
