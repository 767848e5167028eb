//! Checksum accumulators for chunked uploads and response validation.
//!
//! A [`Checksum`] is a running accumulator scoped to one request attempt.
//! Digests are rendered as standard base64 for use in
//! `x-amz-checksum-<name>` trailer values; the CRC family digests the
//! big-endian byte form of the final CRC value.

use sha2::{Digest, Sha256};

/// A running checksum accumulator.
///
/// Implementations are fed the request body chunk by chunk via
/// [`update`](Checksum::update) and produce a base64 digest via
/// [`finalize`](Checksum::finalize). [`reset`](Checksum::reset) returns the
/// accumulator to its initial state for a retried attempt that re-reads the
/// body.
pub trait Checksum: Send {
    /// Feed body bytes into the accumulator.
    fn update(&mut self, bytes: &[u8]);

    /// Produce the base64 digest of everything fed so far.
    ///
    /// Finalizing does not consume the accumulator; feeding more bytes after
    /// a finalize continues the same running state.
    fn finalize(&self) -> String;

    /// Reset to the initial state.
    fn reset(&mut self);

    /// The algorithm this accumulator computes.
    fn algorithm(&self) -> ChecksumAlgorithm;
}

/// A boxed checksum accumulator.
pub type BoxedChecksum = Box<dyn Checksum>;

/// Checksum algorithms supported for trailing checksums.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChecksumAlgorithm {
    Crc32,
    Crc32c,
    Sha256,
}

impl ChecksumAlgorithm {
    /// The lowercase algorithm name used in trailer header names.
    pub fn as_str(&self) -> &'static str {
        match self {
            ChecksumAlgorithm::Crc32 => "crc32",
            ChecksumAlgorithm::Crc32c => "crc32c",
            ChecksumAlgorithm::Sha256 => "sha256",
        }
    }

    /// The full trailer header name, e.g. `x-amz-checksum-crc32`.
    pub fn header_name(&self) -> String {
        format!("x-amz-checksum-{}", self.as_str())
    }

    /// Create a fresh accumulator for this algorithm.
    pub fn accumulator(&self) -> BoxedChecksum {
        match self {
            ChecksumAlgorithm::Crc32 => Box::new(Crc32Checksum::new()),
            ChecksumAlgorithm::Crc32c => Box::new(Crc32cChecksum::new()),
            ChecksumAlgorithm::Sha256 => Box::new(Sha256Checksum::new()),
        }
    }
}

fn base64_digest(bytes: &[u8]) -> String {
    use base64::Engine;
    base64::engine::general_purpose::STANDARD.encode(bytes)
}

/// CRC32 (IEEE) accumulator.
pub struct Crc32Checksum {
    hasher: crc32fast::Hasher,
}

impl Crc32Checksum {
    pub fn new() -> Self {
        Self {
            hasher: crc32fast::Hasher::new(),
        }
    }
}

impl Default for Crc32Checksum {
    fn default() -> Self {
        Self::new()
    }
}

impl Checksum for Crc32Checksum {
    fn update(&mut self, bytes: &[u8]) {
        self.hasher.update(bytes);
    }

    fn finalize(&self) -> String {
        let crc = self.hasher.clone().finalize();
        base64_digest(&crc.to_be_bytes())
    }

    fn reset(&mut self) {
        self.hasher = crc32fast::Hasher::new();
    }

    fn algorithm(&self) -> ChecksumAlgorithm {
        ChecksumAlgorithm::Crc32
    }
}

/// CRC32C (Castagnoli) accumulator.
pub struct Crc32cChecksum {
    state: u32,
}

impl Crc32cChecksum {
    pub fn new() -> Self {
        Self { state: 0 }
    }
}

impl Default for Crc32cChecksum {
    fn default() -> Self {
        Self::new()
    }
}

impl Checksum for Crc32cChecksum {
    fn update(&mut self, bytes: &[u8]) {
        self.state = crc32c::crc32c_append(self.state, bytes);
    }

    fn finalize(&self) -> String {
        base64_digest(&self.state.to_be_bytes())
    }

    fn reset(&mut self) {
        self.state = 0;
    }

    fn algorithm(&self) -> ChecksumAlgorithm {
        ChecksumAlgorithm::Crc32c
    }
}

/// SHA-256 accumulator.
pub struct Sha256Checksum {
    hasher: Sha256,
}

impl Sha256Checksum {
    pub fn new() -> Self {
        Self {
            hasher: Sha256::new(),
        }
    }
}

impl Default for Sha256Checksum {
    fn default() -> Self {
        Self::new()
    }
}

impl Checksum for Sha256Checksum {
    fn update(&mut self, bytes: &[u8]) {
        self.hasher.update(bytes);
    }

    fn finalize(&self) -> String {
        let digest = self.hasher.clone().finalize();
        base64_digest(&digest)
    }

    fn reset(&mut self) {
        self.hasher = Sha256::new();
    }

    fn algorithm(&self) -> ChecksumAlgorithm {
        ChecksumAlgorithm::Sha256
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_names() {
        assert_eq!(
            ChecksumAlgorithm::Crc32.header_name(),
            "x-amz-checksum-crc32"
        );
        assert_eq!(
            ChecksumAlgorithm::Crc32c.header_name(),
            "x-amz-checksum-crc32c"
        );
        assert_eq!(
            ChecksumAlgorithm::Sha256.header_name(),
            "x-amz-checksum-sha256"
        );
    }

    #[test]
    fn test_crc32_known_vector() {
        // CRC32("hello world") = 0x0d4a1185
        let mut sum = Crc32Checksum::new();
        sum.update(b"hello world");
        assert_eq!(sum.finalize(), base64_digest(&0x0d4a1185u32.to_be_bytes()));
    }

    #[test]
    fn test_crc32_incremental_matches_oneshot() {
        let mut incremental = Crc32Checksum::new();
        incremental.update(b"hello ");
        incremental.update(b"world");

        let mut oneshot = Crc32Checksum::new();
        oneshot.update(b"hello world");

        assert_eq!(incremental.finalize(), oneshot.finalize());
    }

    #[test]
    fn test_crc32c_incremental_matches_oneshot() {
        let mut incremental = Crc32cChecksum::new();
        incremental.update(b"foo");
        incremental.update(b"bar");

        let mut oneshot = Crc32cChecksum::new();
        oneshot.update(b"foobar");

        assert_eq!(incremental.finalize(), oneshot.finalize());
    }

    #[test]
    fn test_sha256_empty_digest() {
        // SHA-256 of the empty input, base64 of the well-known digest.
        let sum = Sha256Checksum::new();
        assert_eq!(
            sum.finalize(),
            "47DEQpj8HBSa+/TImW+5JCeuQeRkm5NMpJWZG3hSuFU="
        );
    }

    #[test]
    fn test_reset_restores_initial_state() {
        let mut sum = ChecksumAlgorithm::Crc32.accumulator();
        sum.update(b"some data");
        sum.reset();
        sum.update(b"hello world");

        let mut fresh = Crc32Checksum::new();
        fresh.update(b"hello world");
        assert_eq!(sum.finalize(), fresh.finalize());
    }

    #[test]
    fn test_finalize_does_not_consume() {
        let mut sum = Sha256Checksum::new();
        sum.update(b"abc");
        let first = sum.finalize();
        let second = sum.finalize();
        assert_eq!(first, second);

        sum.update(b"def");
        assert_ne!(sum.finalize(), first);
    }
}
