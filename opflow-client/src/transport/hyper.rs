//! Hyper-based HTTP transport.

use std::time::Duration;

use futures::StreamExt;
use hyper_util::client::legacy::{connect::HttpConnector, Client};
use hyper_util::rt::{TokioExecutor, TokioTimer};

use opflow_core::{BoxFuture, OperationError};

use super::body::PayloadBody;
use super::Transport;
use crate::request::BuiltRequest;
use crate::response::{ResponseBody, WireResponse};

type HyperClient = Client<HttpConnector, PayloadBody>;

/// HTTP transport using hyper_util's legacy client.
///
/// Supports HTTP/1.1 and HTTP/2 with connection pooling. TLS termination is
/// a deployment concern layered outside this core; front this transport with
/// a TLS-capable connector by providing your own [`Transport`]
/// implementation when needed.
#[derive(Clone)]
pub struct HyperTransport {
    client: HyperClient,
    request_timeout: Option<Duration>,
}

impl std::fmt::Debug for HyperTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HyperTransport")
            .field("request_timeout", &self.request_timeout)
            .finish_non_exhaustive()
    }
}

impl HyperTransport {
    pub fn builder() -> HyperTransportBuilder {
        HyperTransportBuilder::new()
    }

    pub fn new() -> Self {
        Self::builder().build()
    }

    async fn request(&self, request: BuiltRequest) -> Result<WireResponse, OperationError> {
        let request = request.into_http_request()?;

        let response_future = self.client.request(request);
        let response = match self.request_timeout {
            Some(timeout) => tokio::time::timeout(timeout, response_future)
                .await
                .map_err(|_| {
                    OperationError::timeout(format!(
                        "request did not complete within {timeout:?}"
                    ))
                })?,
            None => response_future.await,
        }
        .map_err(|e| OperationError::transport(format!("request failed: {e}")))?;

        let (parts, body) = response.into_parts();
        let stream = http_body_util::BodyDataStream::new(body)
            .map(|frame| frame.map_err(|e| OperationError::transport(format!("body error: {e}"))));

        Ok(WireResponse::new(
            parts.status,
            parts.headers,
            ResponseBody::Stream(Box::pin(stream)),
        ))
    }
}

impl Default for HyperTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl Transport for HyperTransport {
    fn send(&self, request: BuiltRequest) -> BoxFuture<'_, Result<WireResponse, OperationError>> {
        Box::pin(self.request(request))
    }
}

/// Builder for [`HyperTransport`].
pub struct HyperTransportBuilder {
    http2_only: bool,
    pool_idle_timeout: Option<Duration>,
    pool_max_idle_per_host: usize,
    request_timeout: Option<Duration>,
}

impl Default for HyperTransportBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl HyperTransportBuilder {
    pub fn new() -> Self {
        Self {
            http2_only: false,
            pool_idle_timeout: Some(Duration::from_secs(90)),
            pool_max_idle_per_host: 32,
            request_timeout: None,
        }
    }

    /// Use HTTP/2 directly without the HTTP/1.1 upgrade handshake.
    pub fn http2_only(mut self, enabled: bool) -> Self {
        self.http2_only = enabled;
        self
    }

    pub fn pool_idle_timeout(mut self, timeout: Duration) -> Self {
        self.pool_idle_timeout = Some(timeout);
        self
    }

    pub fn pool_max_idle_per_host(mut self, max: usize) -> Self {
        self.pool_max_idle_per_host = max;
        self
    }

    /// Overall per-request deadline. Exceeding it fails the attempt with a
    /// timeout-classified transport error.
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    pub fn build(self) -> HyperTransport {
        let mut builder = Client::builder(TokioExecutor::new());
        builder
            .pool_timer(TokioTimer::new())
            .pool_max_idle_per_host(self.pool_max_idle_per_host);
        if let Some(timeout) = self.pool_idle_timeout {
            builder.pool_idle_timeout(timeout);
        }
        if self.http2_only {
            builder.http2_only(true);
        }

        let client = builder.build(HttpConnector::new());
        HyperTransport {
            client,
            request_timeout: self.request_timeout,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_defaults() {
        let transport = HyperTransport::builder().build();
        assert!(transport.request_timeout.is_none());
    }

    #[test]
    fn test_builder_request_timeout() {
        let transport = HyperTransport::builder()
            .request_timeout(Duration::from_secs(5))
            .http2_only(true)
            .build();
        assert_eq!(transport.request_timeout, Some(Duration::from_secs(5)));
    }
}
