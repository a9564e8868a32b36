use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures_core::Stream;
use serde::Serialize;
use thiserror::Error;

use crate::body::{BodySource, BoxError};
use crate::codec::BodyCodec;
use crate::engine::{Outbound, RequestEngine};
use crate::error::{EncodeError, Result};
use crate::header::HeaderMap;
use crate::pending::PendingSend;
use crate::response::HttpResponse;
use crate::transport::{Framing, RequestHead};

/// HTTP request method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    Get,
    Head,
    Delete,
    Post,
    Put,
    Patch,
    Options,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Head => "HEAD",
            Method::Delete => "DELETE",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Patch => "PATCH",
            Method::Options => "OPTIONS",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
#[error("unsupported http method {0:?}")]
pub struct UnknownMethod(pub String);

impl FromStr for Method {
    type Err = UnknownMethod;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "GET" => Ok(Method::Get),
            "HEAD" => Ok(Method::Head),
            "DELETE" => Ok(Method::Delete),
            "POST" => Ok(Method::Post),
            "PUT" => Ok(Method::Put),
            "PATCH" => Ok(Method::Patch),
            "OPTIONS" => Ok(Method::Options),
            _ => Err(UnknownMethod(s.to_string())),
        }
    }
}

/// Where a request goes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    pub host: String,
    pub port: u16,
    /// Path plus optional query, e.g. `/search?q=rust`.
    pub path: String,
    pub tls: bool,
}

impl Target {
    pub fn new(host: impl Into<String>, port: u16, path: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port,
            path: path.into(),
            tls: false,
        }
    }

    pub fn scheme(&self) -> &'static str {
        if self.tls { "https" } else { "http" }
    }

    /// `host[:port]` as sent in the `Host` header. The port is left out
    /// when it is the scheme's default.
    pub fn authority(&self) -> String {
        let host = if self.host.contains(':') && !self.host.starts_with('[') {
            format!("[{}]", self.host)
        } else {
            self.host.clone()
        };
        let default_port = if self.tls { 443 } else { 80 };
        if self.port == default_port {
            host
        } else {
            format!("{host}:{}", self.port)
        }
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}{}", self.scheme(), self.authority(), self.path)
    }
}

/// A request under construction.
///
/// Setters consume and return the builder. The terminal `send*`
/// operations borrow it, so one builder can be sent any number of
/// times; each send is independent.
///
/// `T` is the decoded body type, chosen with [`codec()`](Self::codec).
pub struct HttpRequest<T = Bytes> {
    engine: Arc<RequestEngine>,
    method: Method,
    target: Target,
    headers: HeaderMap,
    timeout: Option<Duration>,
    codec: BodyCodec<T>,
}

impl<T> Clone for HttpRequest<T> {
    fn clone(&self) -> Self {
        Self {
            engine: self.engine.clone(),
            method: self.method,
            target: self.target.clone(),
            headers: self.headers.clone(),
            timeout: self.timeout,
            codec: self.codec.clone(),
        }
    }
}

impl<T> fmt::Debug for HttpRequest<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpRequest")
            .field("method", &self.method)
            .field("target", &self.target)
            .field("headers", &self.headers)
            .field("timeout", &self.timeout)
            .field("codec", &self.codec)
            .finish()
    }
}

impl HttpRequest<Bytes> {
    pub(crate) fn new(
        engine: Arc<RequestEngine>,
        method: Method,
        target: Target,
        headers: HeaderMap,
        timeout: Option<Duration>,
    ) -> Self {
        Self {
            engine,
            method,
            target,
            headers,
            timeout,
            codec: BodyCodec::raw(),
        }
    }
}

impl<T> HttpRequest<T> {
    /// Set a header, replacing any previous value with the same name.
    pub fn put_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.set(name, value);
        self
    }

    /// Append a header, keeping previous values with the same name.
    pub fn add_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Fail the send if it has not resolved within `timeout`.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Send without a deadline.
    pub fn no_timeout(mut self) -> Self {
        self.timeout = None;
        self
    }

    /// Use TLS for this request.
    pub fn ssl(mut self, tls: bool) -> Self {
        self.target.tls = tls;
        self
    }

    /// Decode the response body with `codec` instead.
    pub fn codec<U>(self, codec: BodyCodec<U>) -> HttpRequest<U> {
        HttpRequest {
            engine: self.engine,
            method: self.method,
            target: self.target,
            headers: self.headers,
            timeout: self.timeout,
            codec,
        }
    }

    pub fn method(&self) -> Method {
        self.method
    }

    pub fn target(&self) -> &Target {
        &self.target
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn timeout_duration(&self) -> Option<Duration> {
        self.timeout
    }

    /// Validate the builder and fix the body framing.
    ///
    /// Buffers and serialized bodies get a `Content-Length` (and a
    /// `Content-Type` for serialized ones) unless the caller set one.
    /// Streams are chunked unless the caller declared `Content-Length`,
    /// in which case that length is trusted.
    pub(crate) fn prepare(&self, body: BodySource) -> std::result::Result<Outbound, EncodeError> {
        validate_path(&self.target.path)?;

        let mut headers = self.headers.clone();
        if let Some(content_type) = body.content_type() {
            headers.insert_if_absent("Content-Type", content_type);
        }

        let framing = match body.known_length() {
            _ if matches!(body, BodySource::Empty) => Framing::Empty,
            Some(len) => {
                headers.insert_if_absent("Content-Length", len.to_string());
                Framing::Length(declared_length(&headers)?.unwrap_or(len))
            }
            None => match declared_length(&headers)? {
                Some(len) => Framing::Length(len),
                None => Framing::Chunked,
            },
        };

        validate_headers(&headers)?;
        Ok(Outbound {
            head: RequestHead {
                method: self.method,
                target: self.target.clone(),
                headers,
                framing,
            },
            body,
            timeout: self.timeout,
        })
    }
}

impl<T: Send + 'static> HttpRequest<T> {
    /// Start sending `body` and return a handle to the in-flight send.
    ///
    /// Encoding problems are reported here, before any connection is
    /// attempted. Must be called inside a Tokio runtime.
    pub fn dispatch(&self, body: BodySource) -> Result<PendingSend<HttpResponse<T>>> {
        let outbound = self.prepare(body)?;
        Ok(self.engine.dispatch(outbound, self.codec.clone()))
    }

    /// Send `body` and wait for the outcome.
    pub async fn send_body(&self, body: BodySource) -> Result<HttpResponse<T>> {
        self.dispatch(body)?.wait().await
    }

    /// Send without a body.
    pub async fn send(&self) -> Result<HttpResponse<T>> {
        self.send_body(BodySource::Empty).await
    }

    /// Send an in-memory body with `Content-Length`.
    pub async fn send_buffer(&self, body: impl Into<Bytes>) -> Result<HttpResponse<T>> {
        self.send_body(BodySource::Buffer(body.into())).await
    }

    /// Send `value` as JSON with `Content-Type: application/json`.
    ///
    /// A value that fails to serialize is an encode error; no connection
    /// is made.
    pub async fn send_json<B>(&self, value: &B) -> Result<HttpResponse<T>>
    where
        B: Serialize + ?Sized,
    {
        let body = BodySource::json(value)?;
        self.send_body(body).await
    }

    /// Send the chunks produced by `stream`.
    ///
    /// The stream is pulled only as fast as the connection drains. A
    /// stream error aborts the request and surfaces as
    /// [`StreamFailure::Source`](crate::StreamFailure::Source).
    pub async fn send_stream<S, E>(&self, stream: S) -> Result<HttpResponse<T>>
    where
        S: Stream<Item = std::result::Result<Bytes, E>> + Send + 'static,
        E: Into<BoxError>,
    {
        self.send_body(BodySource::from_stream(stream)).await
    }
}

fn validate_path(path: &str) -> std::result::Result<(), EncodeError> {
    let well_formed = (path.starts_with('/') || path == "*")
        && http::uri::PathAndQuery::from_str(path).is_ok();
    if well_formed {
        Ok(())
    } else {
        Err(EncodeError::InvalidPath(path.to_string()))
    }
}

fn validate_headers(headers: &HeaderMap) -> std::result::Result<(), EncodeError> {
    for header in headers.iter() {
        let valid = http::HeaderName::from_bytes(header.name.as_bytes()).is_ok()
            && http::HeaderValue::from_str(&header.value).is_ok();
        if !valid {
            return Err(EncodeError::InvalidHeader {
                name: header.name.clone(),
            });
        }
    }
    Ok(())
}

fn declared_length(headers: &HeaderMap) -> std::result::Result<Option<u64>, EncodeError> {
    match headers.get("content-length") {
        None => Ok(None),
        Some(value) => value
            .trim()
            .parse::<u64>()
            .map(Some)
            .map_err(|_| EncodeError::InvalidHeader {
                name: "Content-Length".to_string(),
            }),
    }
}
