//! Outgoing request representation.
//!
//! A [`RequestBuilder`] is the mutable, in-progress form of a request that
//! middlewares shape stage by stage. [`RequestBuilder::build`] snapshots it
//! into an immutable [`BuiltRequest`] for the transport: exactly one built
//! request per attempt. The retry layer clones the builder before each
//! attempt, so headers and signatures never leak from one attempt into the
//! next.

use std::sync::Arc;

use http::{HeaderMap, HeaderName, HeaderValue, Method, Uri};

use opflow_core::OperationError;

use crate::context::{keys, OperationContext};
use crate::transport::{ByteStream, PayloadBody};

/// Produces a fresh request body per attempt.
///
/// Streaming bodies are not replayable values; the builder stores a provider
/// and asks it for a new [`PayloadBody`] each time the builder is snapshot.
pub trait BodyProvider: Send + Sync {
    fn payload(&self, ctx: &OperationContext) -> Result<PayloadBody, OperationError>;
}

/// The request body as carried by the builder.
#[derive(Clone, Default)]
pub enum BodySource {
    #[default]
    Empty,
    /// Fully materialized, replayable across attempts.
    Bytes(bytes::Bytes),
    /// Constructed fresh per attempt by a provider.
    Provider(Arc<dyn BodyProvider>),
}

impl BodySource {
    fn payload(&self, ctx: &OperationContext) -> Result<PayloadBody, OperationError> {
        match self {
            BodySource::Empty => Ok(PayloadBody::empty()),
            BodySource::Bytes(data) => Ok(PayloadBody::full(data.clone())),
            BodySource::Provider(provider) => provider.payload(ctx),
        }
    }
}

impl std::fmt::Debug for BodySource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BodySource::Empty => write!(f, "BodySource::Empty"),
            BodySource::Bytes(data) => write!(f, "BodySource::Bytes({} bytes)", data.len()),
            BodySource::Provider(_) => write!(f, "BodySource::Provider"),
        }
    }
}

/// Mutable, in-progress representation of an outgoing request.
#[derive(Clone, Debug)]
pub struct RequestBuilder {
    method: Method,
    scheme: String,
    host: Option<String>,
    path: String,
    query: Vec<(String, String)>,
    headers: HeaderMap,
    body: BodySource,
}

impl RequestBuilder {
    pub fn new() -> Self {
        Self {
            method: Method::GET,
            scheme: "https".to_string(),
            host: None,
            path: "/".to_string(),
            query: Vec::new(),
            headers: HeaderMap::new(),
            body: BodySource::Empty,
        }
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn set_method(&mut self, method: Method) -> &mut Self {
        self.method = method;
        self
    }

    pub fn scheme(&self) -> &str {
        &self.scheme
    }

    pub fn set_scheme(&mut self, scheme: impl Into<String>) -> &mut Self {
        self.scheme = scheme.into();
        self
    }

    pub fn host(&self) -> Option<&str> {
        self.host.as_deref()
    }

    pub fn set_host(&mut self, host: impl Into<String>) -> &mut Self {
        self.host = Some(host.into());
        self
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn set_path(&mut self, path: impl Into<String>) -> &mut Self {
        self.path = path.into();
        self
    }

    pub fn query(&self) -> &[(String, String)] {
        &self.query
    }

    pub fn push_query(&mut self, name: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.query.push((name.into(), value.into()));
        self
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    /// Insert a header, replacing any previous value.
    pub fn set_header(&mut self, name: HeaderName, value: HeaderValue) -> &mut Self {
        self.headers.insert(name, value);
        self
    }

    pub fn body(&self) -> &BodySource {
        &self.body
    }

    pub fn set_body(&mut self, body: BodySource) -> &mut Self {
        self.body = body;
        self
    }

    /// Snapshot this builder into an immutable request for one attempt.
    ///
    /// The host-override context attribute takes precedence over the
    /// builder's host; a request with neither is a configuration error.
    /// Provider-backed bodies are opened fresh here, once per attempt.
    pub fn build(&self, ctx: &OperationContext) -> Result<BuiltRequest, OperationError> {
        let host = ctx
            .get(&keys::HOST_OVERRIDE)
            .or_else(|| self.host.clone())
            .ok_or_else(|| OperationError::config("request has no host"))?;

        let mut target = format!("{}://{}{}", self.scheme, host, self.path);
        if !self.query.is_empty() {
            let query = self
                .query
                .iter()
                .map(|(name, value)| format!("{name}={value}"))
                .collect::<Vec<_>>()
                .join("&");
            target.push('?');
            target.push_str(&query);
        }
        let uri: Uri = target
            .parse()
            .map_err(|e| OperationError::config(format!("invalid request uri {target:?}: {e}")))?;

        Ok(BuiltRequest {
            method: self.method.clone(),
            uri,
            headers: self.headers.clone(),
            body: self.body.payload(ctx)?,
        })
    }
}

impl Default for RequestBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Immutable, fully built request handed to the transport.
///
/// Deliberately not `Clone`: a built request is consumed by exactly one
/// attempt. Retries snapshot the builder again instead.
#[derive(Debug)]
pub struct BuiltRequest {
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: PayloadBody,
}

impl BuiltRequest {
    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn uri(&self) -> &Uri {
        &self.uri
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Take the body, leaving an empty one behind.
    pub fn take_body(&mut self) -> PayloadBody {
        std::mem::take(&mut self.body)
    }

    /// Stream the body contents. Test and transport use.
    pub async fn body_bytes(self) -> Result<bytes::Bytes, OperationError> {
        self.body.collect_bytes().await
    }

    /// Convert into an `http::Request` for the hyper transport.
    pub fn into_http_request(self) -> Result<http::Request<PayloadBody>, OperationError> {
        let mut request = http::Request::builder()
            .method(self.method)
            .uri(self.uri)
            .body(self.body)
            .map_err(|e| OperationError::config(format!("invalid request: {e}")))?;
        *request.headers_mut() = self.headers;
        Ok(request)
    }
}

/// A provider wrapping a [`crate::transport::StreamSource`] verbatim, without
/// re-framing. Used for plain (non-chunked) streaming uploads.
pub struct SourceBodyProvider {
    source: Arc<dyn crate::transport::StreamSource>,
}

impl SourceBodyProvider {
    pub fn new(source: Arc<dyn crate::transport::StreamSource>) -> Self {
        Self { source }
    }
}

impl BodyProvider for SourceBodyProvider {
    fn payload(&self, _ctx: &OperationContext) -> Result<PayloadBody, OperationError> {
        let stream: ByteStream = self.source.open()?;
        Ok(PayloadBody::streaming(stream))
    }
}
