//! Wire response representation.

use bytes::Bytes;
use http::{HeaderMap, StatusCode};

use opflow_core::OperationError;

use crate::transport::ByteStream;

/// The response body: fully materialized bytes or a live readable stream.
///
/// A streaming body is read at most once; [`WireResponse::bytes`] consumes
/// it.
pub enum ResponseBody {
    Bytes(Bytes),
    Stream(ByteStream),
}

impl std::fmt::Debug for ResponseBody {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ResponseBody::Bytes(data) => write!(f, "ResponseBody::Bytes({} bytes)", data.len()),
            ResponseBody::Stream(_) => write!(f, "ResponseBody::Stream"),
        }
    }
}

/// A complete wire response: status, headers, body.
#[derive(Debug)]
pub struct WireResponse {
    status: StatusCode,
    headers: HeaderMap,
    body: ResponseBody,
}

impl WireResponse {
    pub fn new(status: StatusCode, headers: HeaderMap, body: ResponseBody) -> Self {
        Self {
            status,
            headers,
            body,
        }
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Take the body stream, replacing it with an empty byte body.
    pub fn take_body(&mut self) -> ResponseBody {
        std::mem::replace(&mut self.body, ResponseBody::Bytes(Bytes::new()))
    }

    /// Collect the body into memory, consuming the response.
    pub async fn bytes(self) -> Result<Bytes, OperationError> {
        use futures::StreamExt;
        match self.body {
            ResponseBody::Bytes(data) => Ok(data),
            ResponseBody::Stream(mut stream) => {
                let mut collected = bytes::BytesMut::new();
                while let Some(chunk) = stream.next().await {
                    collected.extend_from_slice(&chunk?);
                }
                Ok(collected.freeze())
            }
        }
    }
}
