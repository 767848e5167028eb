//! aws-chunked transfer framing.
//!
//! Chunked transfer encoding frames a byte stream as:
//!
//! ```text
//! <hex-length>[;chunk-signature=<sig>]\r\n<body>\r\n
//! ```
//!
//! terminated by a size-zero chunk that carries trailer headers instead of a
//! body:
//!
//! ```text
//! 0[;chunk-signature=<sig>]\r\n
//! <trailer-name>:<value>\r\n
//! ...
//! \r\n
//! ```
//!
//! This module provides the frame construction primitives used by the
//! streaming encoder and [`ChunkDecoder`], an incremental parser for the same
//! format.

use bytes::{Bytes, BytesMut};
use http::HeaderMap;

use crate::error::OperationError;

/// Read size for data chunks: 64 KiB.
pub const CHUNK_SIZE: usize = 64 * 1024;

/// Chunk signature segment prefix in the size line.
pub const CHUNK_SIGNATURE_PREFIX: &str = ";chunk-signature=";

/// Trailer header carrying the signature over the trailer set.
pub const TRAILER_SIGNATURE_HEADER: &str = "x-amz-trailer-signature";

const CRLF: &[u8] = b"\r\n";

/// Frame a data chunk.
///
/// Produces `hex(len)[;chunk-signature=<sig>]\r\n<body>\r\n`. The signature
/// segment is omitted for unsigned streams. A zero-length body is legal here
/// and frames as `0...`; callers that mean "terminal chunk" must use
/// [`encode_terminal_chunk`] instead.
pub fn encode_chunk(body: &[u8], signature: Option<&str>) -> Bytes {
    let mut frame = BytesMut::with_capacity(body.len() + 64);
    frame.extend_from_slice(format!("{:x}", body.len()).as_bytes());
    if let Some(sig) = signature {
        frame.extend_from_slice(CHUNK_SIGNATURE_PREFIX.as_bytes());
        frame.extend_from_slice(sig.as_bytes());
    }
    frame.extend_from_slice(CRLF);
    frame.extend_from_slice(body);
    frame.extend_from_slice(CRLF);
    frame.freeze()
}

/// Frame the terminal chunk: size line `0`, trailer headers, blank line.
///
/// `chunk_signature` is the signature of the empty chunk (signed streams
/// only); `trailer_signature` is the signature over the trailer set and is
/// appended as the `x-amz-trailer-signature` trailer.
pub fn encode_terminal_chunk(
    trailers: &HeaderMap,
    chunk_signature: Option<&str>,
    trailer_signature: Option<&str>,
) -> Bytes {
    let mut frame = BytesMut::with_capacity(128);
    frame.extend_from_slice(b"0");
    if let Some(sig) = chunk_signature {
        frame.extend_from_slice(CHUNK_SIGNATURE_PREFIX.as_bytes());
        frame.extend_from_slice(sig.as_bytes());
    }
    frame.extend_from_slice(CRLF);
    for (name, value) in trailers {
        frame.extend_from_slice(name.as_str().as_bytes());
        frame.extend_from_slice(b":");
        frame.extend_from_slice(value.as_bytes());
        frame.extend_from_slice(CRLF);
    }
    if let Some(sig) = trailer_signature {
        frame.extend_from_slice(TRAILER_SIGNATURE_HEADER.as_bytes());
        frame.extend_from_slice(b":");
        frame.extend_from_slice(sig.as_bytes());
        frame.extend_from_slice(CRLF);
    }
    frame.extend_from_slice(CRLF);
    frame.freeze()
}

/// A decoded event from [`ChunkDecoder`].
#[derive(Debug, PartialEq, Eq)]
pub enum ChunkEvent {
    /// A data chunk with its body bytes and the chunk signature, if any.
    Chunk {
        data: Bytes,
        signature: Option<String>,
    },
    /// The terminal chunk was consumed; trailers are available on the decoder.
    Complete,
}

#[derive(Debug)]
enum DecoderState {
    /// Waiting for a complete size line.
    SizeLine,
    /// Reading a body of the given length, then its CRLF.
    Body {
        length: usize,
        signature: Option<String>,
    },
    /// Reading trailer lines after the size-zero chunk.
    Trailers,
    /// Terminal chunk fully consumed.
    Done,
}

/// Incremental aws-chunked parser.
///
/// Feed raw bytes with [`extend`](ChunkDecoder::extend) and drain events with
/// [`next_event`](ChunkDecoder::next_event), which returns `Ok(None)` when
/// more input is needed. Trailer headers are collected on the decoder and
/// available after [`ChunkEvent::Complete`].
pub struct ChunkDecoder {
    buffer: BytesMut,
    state: DecoderState,
    trailers: HeaderMap,
}

impl ChunkDecoder {
    pub fn new() -> Self {
        Self {
            buffer: BytesMut::new(),
            state: DecoderState::SizeLine,
            trailers: HeaderMap::new(),
        }
    }

    /// Append raw wire bytes to the parse buffer.
    pub fn extend(&mut self, bytes: &[u8]) {
        self.buffer.extend_from_slice(bytes);
    }

    /// Trailer headers from the terminal chunk.
    pub fn trailers(&self) -> &HeaderMap {
        &self.trailers
    }

    /// Whether the terminal chunk has been fully consumed.
    pub fn is_finished(&self) -> bool {
        matches!(self.state, DecoderState::Done)
    }

    /// Try to parse the next event from buffered input.
    ///
    /// Returns `Ok(None)` when more data is needed.
    pub fn next_event(&mut self) -> Result<Option<ChunkEvent>, OperationError> {
        loop {
            match &self.state {
                DecoderState::SizeLine => {
                    let Some(line) = self.take_line() else {
                        return Ok(None);
                    };
                    let (length, signature) = parse_size_line(&line)?;
                    if length == 0 {
                        self.state = DecoderState::Trailers;
                    } else {
                        self.state = DecoderState::Body { length, signature };
                    }
                }
                DecoderState::Body { length, signature } => {
                    let length = *length;
                    if self.buffer.len() < length + CRLF.len() {
                        return Ok(None);
                    }
                    let signature = signature.clone();
                    let data = self.buffer.split_to(length).freeze();
                    let sep = self.buffer.split_to(CRLF.len());
                    if &sep[..] != CRLF {
                        return Err(OperationError::deserialize(
                            "chunk body not terminated by CRLF",
                        ));
                    }
                    self.state = DecoderState::SizeLine;
                    return Ok(Some(ChunkEvent::Chunk { data, signature }));
                }
                DecoderState::Trailers => {
                    let Some(line) = self.take_line() else {
                        return Ok(None);
                    };
                    if line.is_empty() {
                        self.state = DecoderState::Done;
                        return Ok(Some(ChunkEvent::Complete));
                    }
                    let (name, value) = parse_trailer_line(&line)?;
                    self.trailers.append(name, value);
                }
                DecoderState::Done => {
                    if !self.buffer.is_empty() {
                        return Err(OperationError::deserialize(
                            "trailing bytes after terminal chunk",
                        ));
                    }
                    return Ok(None);
                }
            }
        }
    }

    /// Split one CRLF-terminated line off the buffer, without the CRLF.
    fn take_line(&mut self) -> Option<Vec<u8>> {
        let pos = self
            .buffer
            .windows(CRLF.len())
            .position(|window| window == CRLF)?;
        let line = self.buffer.split_to(pos).to_vec();
        let _ = self.buffer.split_to(CRLF.len());
        Some(line)
    }
}

impl Default for ChunkDecoder {
    fn default() -> Self {
        Self::new()
    }
}

fn parse_size_line(line: &[u8]) -> Result<(usize, Option<String>), OperationError> {
    let line = std::str::from_utf8(line)
        .map_err(|_| OperationError::deserialize("chunk size line is not valid UTF-8"))?;

    let (size_part, signature) = match line.split_once(';') {
        Some((size, rest)) => {
            let sig = rest.strip_prefix("chunk-signature=").ok_or_else(|| {
                OperationError::deserialize(format!("unexpected chunk extension: {rest}"))
            })?;
            (size, Some(sig.to_string()))
        }
        None => (line, None),
    };

    let length = usize::from_str_radix(size_part, 16).map_err(|_| {
        OperationError::deserialize(format!("invalid chunk size line: {size_part:?}"))
    })?;

    Ok((length, signature))
}

fn parse_trailer_line(
    line: &[u8],
) -> Result<(http::HeaderName, http::HeaderValue), OperationError> {
    let line = std::str::from_utf8(line)
        .map_err(|_| OperationError::deserialize("trailer line is not valid UTF-8"))?;
    let (name, value) = line
        .split_once(':')
        .ok_or_else(|| OperationError::deserialize(format!("trailer without colon: {line}")))?;

    let name: http::HeaderName = name
        .trim()
        .parse()
        .map_err(|_| OperationError::deserialize(format!("invalid trailer name: {name}")))?;
    let value: http::HeaderValue = value
        .trim()
        .parse()
        .map_err(|_| OperationError::deserialize(format!("invalid trailer value: {value}")))?;
    Ok((name, value))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode_all(wire: &[u8]) -> (Vec<ChunkEvent>, ChunkDecoder) {
        let mut decoder = ChunkDecoder::new();
        decoder.extend(wire);
        let mut events = Vec::new();
        while let Some(event) = decoder.next_event().unwrap() {
            let done = event == ChunkEvent::Complete;
            events.push(event);
            if done {
                break;
            }
        }
        (events, decoder)
    }

    #[test]
    fn test_encode_unsigned_chunk() {
        let frame = encode_chunk(b"hello", None);
        assert_eq!(&frame[..], b"5\r\nhello\r\n");
    }

    #[test]
    fn test_encode_signed_chunk() {
        let frame = encode_chunk(b"hello", Some("abc123"));
        assert_eq!(&frame[..], b"5;chunk-signature=abc123\r\nhello\r\n");
    }

    #[test]
    fn test_encode_chunk_hex_length_lowercase() {
        let body = vec![0u8; 255];
        let frame = encode_chunk(&body, None);
        assert!(frame.starts_with(b"ff\r\n"));
    }

    #[test]
    fn test_encode_terminal_chunk_with_trailers() {
        let mut trailers = HeaderMap::new();
        trailers.insert("x-amz-checksum-crc32", "AAAAAA==".parse().unwrap());
        let frame = encode_terminal_chunk(&trailers, None, None);
        assert_eq!(&frame[..], b"0\r\nx-amz-checksum-crc32:AAAAAA==\r\n\r\n");
    }

    #[test]
    fn test_encode_terminal_chunk_signed() {
        let mut trailers = HeaderMap::new();
        trailers.insert("x-amz-checksum-sha256", "digest".parse().unwrap());
        let frame = encode_terminal_chunk(&trailers, Some("emptysig"), Some("trailersig"));
        assert_eq!(
            &frame[..],
            b"0;chunk-signature=emptysig\r\n\
              x-amz-checksum-sha256:digest\r\n\
              x-amz-trailer-signature:trailersig\r\n\r\n"
        );
    }

    #[test]
    fn test_encode_terminal_chunk_bare() {
        let frame = encode_terminal_chunk(&HeaderMap::new(), None, None);
        assert_eq!(&frame[..], b"0\r\n\r\n");
    }

    #[test]
    fn test_decode_round_trip() {
        let mut wire = BytesMut::new();
        wire.extend_from_slice(&encode_chunk(b"first", Some("sig1")));
        wire.extend_from_slice(&encode_chunk(b"second", Some("sig2")));
        let mut trailers = HeaderMap::new();
        trailers.insert("x-amz-checksum-crc32", "Q0hLAA==".parse().unwrap());
        wire.extend_from_slice(&encode_terminal_chunk(&trailers, None, None));

        let (events, decoder) = decode_all(&wire);
        assert_eq!(
            events,
            vec![
                ChunkEvent::Chunk {
                    data: Bytes::from_static(b"first"),
                    signature: Some("sig1".into()),
                },
                ChunkEvent::Chunk {
                    data: Bytes::from_static(b"second"),
                    signature: Some("sig2".into()),
                },
                ChunkEvent::Complete,
            ]
        );
        assert!(decoder.is_finished());
        assert_eq!(
            decoder.trailers().get("x-amz-checksum-crc32").unwrap(),
            "Q0hLAA=="
        );
    }

    #[test]
    fn test_decode_incremental_feeding() {
        let wire = {
            let mut w = BytesMut::new();
            w.extend_from_slice(&encode_chunk(b"hello world", None));
            w.extend_from_slice(&encode_terminal_chunk(&HeaderMap::new(), None, None));
            w.freeze()
        };

        let mut decoder = ChunkDecoder::new();
        let mut events = Vec::new();
        // Feed one byte at a time; the decoder must never mis-parse a split
        // size line or body boundary.
        for byte in wire.iter() {
            decoder.extend(&[*byte]);
            while let Some(event) = decoder.next_event().unwrap() {
                events.push(event);
            }
        }
        assert_eq!(events.len(), 2);
        assert_eq!(
            events[0],
            ChunkEvent::Chunk {
                data: Bytes::from_static(b"hello world"),
                signature: None,
            }
        );
        assert_eq!(events[1], ChunkEvent::Complete);
    }

    #[test]
    fn test_decode_rejects_missing_body_crlf() {
        let mut decoder = ChunkDecoder::new();
        decoder.extend(b"5\r\nhelloXX");
        let err = decoder.next_event().unwrap_err();
        assert!(err.to_string().contains("CRLF"));
    }

    #[test]
    fn test_decode_rejects_bad_hex_length() {
        let mut decoder = ChunkDecoder::new();
        decoder.extend(b"zz\r\n");
        assert!(decoder.next_event().is_err());
    }

    #[test]
    fn test_decode_rejects_unknown_extension() {
        let mut decoder = ChunkDecoder::new();
        decoder.extend(b"5;other=1\r\nhello\r\n");
        assert!(decoder.next_event().is_err());
    }

    #[test]
    fn test_decode_rejects_bytes_after_terminal() {
        let mut decoder = ChunkDecoder::new();
        decoder.extend(b"0\r\n\r\nextra");
        assert_eq!(decoder.next_event().unwrap(), Some(ChunkEvent::Complete));
        assert!(decoder.next_event().is_err());
    }

    #[test]
    fn test_decode_needs_more_data() {
        let mut decoder = ChunkDecoder::new();
        decoder.extend(b"5\r\nhel");
        assert_eq!(decoder.next_event().unwrap(), None);
        decoder.extend(b"lo\r\n");
        assert!(matches!(
            decoder.next_event().unwrap(),
            Some(ChunkEvent::Chunk { .. })
        ));
    }
}
