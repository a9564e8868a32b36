//! Request body sources.
//!
//! A [`BodySource`] is one of four closed forms: empty, an in-memory
//! buffer, a serialized object, or an external stream of byte chunks.
//! The first three have a known length and are written in a single
//! write; the stream form is pulled chunk by chunk by the body pump.
//!
//! Stream helpers here avoid pulling in `futures-util` as a runtime
//! dependency.

use std::fmt;
use std::io;
use std::path::Path;
use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::Bytes;
use futures_core::Stream;
use serde::Serialize;
use tokio::io::{AsyncRead, ReadBuf};

use crate::error::EncodeError;

/// Default chunk size for streamed files and buffers (64 KB).
pub const DEFAULT_CHUNK_SIZE: usize = 64 * 1024;

/// Content type attached to JSON-serialized bodies.
pub const JSON_CONTENT_TYPE: &str = "application/json";

/// A boxed, thread-safe error, used for body source failures.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// A type-erased, fallible async stream of byte chunks.
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, BoxError>> + Send>>;

/// The body attached to an outgoing request.
#[derive(Default)]
pub enum BodySource {
    /// No body.
    #[default]
    Empty,
    /// A fixed in-memory buffer, sent with `Content-Length`.
    Buffer(Bytes),
    /// An object already encoded to the wire format.
    Serialized {
        payload: Bytes,
        content_type: &'static str,
    },
    /// An external producer. Sent chunked unless the caller declared a length.
    Stream(ByteStream),
}

impl BodySource {
    /// Wrap any fallible byte stream as a streaming source.
    pub fn from_stream<S, E>(stream: S) -> Self
    where
        S: Stream<Item = Result<Bytes, E>> + Send + 'static,
        E: Into<BoxError>,
    {
        BodySource::Stream(Box::pin(BoxedErrors {
            inner: Box::pin(stream),
        }))
    }

    /// Encode `value` as JSON.
    ///
    /// Encoding happens here, eagerly, so a failing serializer is reported
    /// before any connection exists.
    pub fn json<T: Serialize + ?Sized>(value: &T) -> Result<Self, EncodeError> {
        let payload = serde_json::to_vec(value)?;
        Ok(BodySource::Serialized {
            payload: Bytes::from(payload),
            content_type: JSON_CONTENT_TYPE,
        })
    }

    /// Open `path` and stream it in [`DEFAULT_CHUNK_SIZE`] chunks.
    pub async fn file(path: impl AsRef<Path>) -> io::Result<Self> {
        let file = tokio::fs::File::open(path).await?;
        Ok(BodySource::from_stream(file_stream(file, DEFAULT_CHUNK_SIZE)))
    }

    /// Byte length when known up front.
    pub fn known_length(&self) -> Option<u64> {
        match self {
            BodySource::Empty => Some(0),
            BodySource::Buffer(bytes) => Some(bytes.len() as u64),
            BodySource::Serialized { payload, .. } => Some(payload.len() as u64),
            BodySource::Stream(_) => None,
        }
    }

    /// Content type implied by the source, if any.
    pub fn content_type(&self) -> Option<&'static str> {
        match self {
            BodySource::Serialized { content_type, .. } => Some(content_type),
            _ => None,
        }
    }

    pub fn is_stream(&self) -> bool {
        matches!(self, BodySource::Stream(_))
    }
}

impl fmt::Debug for BodySource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BodySource::Empty => f.write_str("Empty"),
            BodySource::Buffer(bytes) => f.debug_tuple("Buffer").field(&bytes.len()).finish(),
            BodySource::Serialized {
                payload,
                content_type,
            } => f
                .debug_struct("Serialized")
                .field("len", &payload.len())
                .field("content_type", content_type)
                .finish(),
            BodySource::Stream(_) => f.write_str("Stream"),
        }
    }
}

/// Pull the next item from a byte stream.
pub(crate) async fn next_chunk(stream: &mut ByteStream) -> Option<Result<Bytes, BoxError>> {
    std::future::poll_fn(|cx| stream.as_mut().poll_next(cx)).await
}

/// Stream an in-memory buffer in fixed-size chunks without copying.
///
/// A `chunk_size` of 0 is treated as 1.
pub fn chunked(buf: impl Into<Bytes>, chunk_size: usize) -> ByteStream {
    Box::pin(ChunkedBytesStream::new(buf.into(), chunk_size))
}

/// Stream a file in chunks of at most `chunk_size` bytes.
///
/// A `chunk_size` of 0 is treated as 1.
pub fn file_stream(file: tokio::fs::File, chunk_size: usize) -> FileStream {
    FileStream {
        file,
        buf: vec![0u8; chunk_size.max(1)],
        done: false,
    }
}

/// Adapts a stream's error type to [`BoxError`].
struct BoxedErrors<S> {
    inner: Pin<Box<S>>,
}

impl<S, E> Stream for BoxedErrors<S>
where
    S: Stream<Item = Result<Bytes, E>>,
    E: Into<BoxError>,
{
    type Item = Result<Bytes, BoxError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        match this.inner.as_mut().poll_next(cx) {
            Poll::Ready(Some(Ok(chunk))) => Poll::Ready(Some(Ok(chunk))),
            Poll::Ready(Some(Err(e))) => Poll::Ready(Some(Err(e.into()))),
            Poll::Ready(None) => Poll::Ready(None),
            Poll::Pending => Poll::Pending,
        }
    }
}

/// Yields a `Bytes` buffer in fixed-size chunks via `Bytes::slice()`.
///
/// Each chunk shares the original allocation, so no per-chunk copy is made.
pub(crate) struct ChunkedBytesStream {
    buf: Bytes,
    chunk_size: usize,
    offset: usize,
}

impl ChunkedBytesStream {
    pub fn new(buf: Bytes, chunk_size: usize) -> Self {
        Self {
            buf,
            chunk_size: chunk_size.max(1),
            offset: 0,
        }
    }
}

impl Stream for ChunkedBytesStream {
    type Item = Result<Bytes, BoxError>;

    fn poll_next(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.offset >= this.buf.len() {
            return Poll::Ready(None);
        }
        let end = std::cmp::min(this.offset + this.chunk_size, this.buf.len());
        let chunk = this.buf.slice(this.offset..end);
        this.offset = end;
        Poll::Ready(Some(Ok(chunk)))
    }
}

/// A file read as a stream of byte chunks.
///
/// Reads are issued only when the stream is polled, so a paused pump
/// leaves the file untouched.
pub struct FileStream {
    file: tokio::fs::File,
    buf: Vec<u8>,
    done: bool,
}

impl Stream for FileStream {
    type Item = Result<Bytes, io::Error>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.done {
            return Poll::Ready(None);
        }
        let mut read_buf = ReadBuf::new(&mut this.buf);
        match Pin::new(&mut this.file).poll_read(cx, &mut read_buf) {
            Poll::Pending => Poll::Pending,
            Poll::Ready(Err(e)) => {
                this.done = true;
                Poll::Ready(Some(Err(e)))
            }
            Poll::Ready(Ok(())) => {
                let n = read_buf.filled().len();
                if n == 0 {
                    this.done = true;
                    Poll::Ready(None)
                } else {
                    Poll::Ready(Some(Ok(Bytes::copy_from_slice(&this.buf[..n]))))
                }
            }
        }
    }
}
