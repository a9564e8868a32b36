//! Transport seam between the request engine and the wire.
//!
//! The engine only talks to these traits. A [`Transport`] opens one
//! [`Connection`] per send; the connection starts one exchange, handing
//! back a [`BodySink`] for the request body and a [`ResponseSource`] for
//! the reply. [`TcpTransport`] is the default HTTP/1.1 implementation.

use std::future::Future;
use std::pin::Pin;

use bytes::Bytes;

use crate::error::TransportError;
use crate::header::HeaderMap;
use crate::request::{Method, Target};

mod tcp;

#[cfg(test)]
pub(crate) mod mock;

pub use tcp::TcpTransport;

/// Boxed, sendable future returned by transport operations.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// How the request body is delimited on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Framing {
    /// No body.
    Empty,
    /// Exactly this many bytes follow, announced by `Content-Length`.
    Length(u64),
    /// `Transfer-Encoding: chunked`.
    Chunked,
}

/// Everything the transport needs to start a request.
#[derive(Debug, Clone)]
pub struct RequestHead {
    pub method: Method,
    pub target: Target,
    pub headers: HeaderMap,
    pub framing: Framing,
}

/// Status line and headers of a response.
#[derive(Debug, Clone)]
pub struct ResponseHead {
    pub status: u16,
    pub status_message: String,
    pub headers: HeaderMap,
}

/// Opens connections.
pub trait Transport: Send + Sync {
    fn connect<'a>(
        &'a self,
        target: &'a Target,
    ) -> BoxFuture<'a, Result<Box<dyn Connection>, TransportError>>;
}

/// One open connection.
pub trait Connection: Send {
    /// Start an exchange. The request head is dispatched immediately;
    /// the body follows through the returned sink.
    fn exchange(
        &mut self,
        head: RequestHead,
    ) -> Result<(Box<dyn BodySink>, Box<dyn ResponseSource>), TransportError>;

    /// Tear the connection down. Pending sink writes and response reads fail.
    fn close(&mut self);
}

/// Write side of an exchange.
pub trait BodySink: Send {
    /// Queue one chunk. Resolves once the transport has room for more,
    /// which is the drain signal the body pump waits for.
    fn write(&mut self, chunk: Bytes) -> BoxFuture<'_, Result<(), TransportError>>;

    /// Mark the body complete.
    fn finish(&mut self) -> BoxFuture<'_, Result<(), TransportError>>;
}

/// Read side of an exchange.
pub trait ResponseSource: Send {
    /// Wait for the status line and headers. Cancel safe.
    fn head(&mut self) -> BoxFuture<'_, Result<ResponseHead, TransportError>>;

    /// Next body chunk, or `None` at the end of the body.
    fn chunk(&mut self) -> BoxFuture<'_, Result<Option<Bytes>, TransportError>>;
}
