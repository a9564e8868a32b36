//! WarpGrid web client: fluent HTTP requests with streaming bodies and
//! typed response decoding.
//!
//! A [`WebClient`] hands out [`HttpRequest`] builders. A builder collects
//! the method, target, headers and timeout, and is sent with one of four
//! terminal operations:
//!
//! - [`send()`](HttpRequest::send): no body
//! - [`send_buffer()`](HttpRequest::send_buffer): in-memory body, `Content-Length` set
//! - [`send_json()`](HttpRequest::send_json): serialized object, `Content-Type: application/json`
//! - [`send_stream()`](HttpRequest::send_stream): streaming body, chunked unless
//!   the caller set `Content-Length`
//!
//! # Architecture
//!
//! ```text
//! HttpRequest::send_*()
//!   → RequestEngine spawns one exchange task per send (PendingSend)
//!     ├── Connecting        Transport::connect() (stream source primed concurrently)
//!     ├── Sending           BodyPump: source → BodySink, one chunk in flight per drain
//!     ├── AwaitingResponse  ResponseSource::head()
//!     ├── Receiving         ResponseCollector: chunks → BodyCodec
//!     └── Done              Resolver: first writer wins
//!   TimeoutGovernor (optional) races the exchange and closes the connection
//! ```
//!
//! Every send resolves exactly once, either with an [`HttpResponse`] or a
//! [`ClientError`] classified as connect, encode, stream, interrupted,
//! decode or timeout failure.
//!
//! # Streaming Model
//!
//! Body sources are pull-based `futures_core::Stream`s. The pump only
//! pulls the next chunk once the transport accepted the previous one, so
//! an upload never buffers more than the transport's bounded write queue
//! plus one chunk.

pub mod body;
pub mod client;
mod codec;
mod collector;
pub mod config;
mod engine;
mod error;
mod header;
mod pending;
mod pump;
mod request;
mod response;
pub mod transport;

pub use body::{BodySource, BoxError, ByteStream, DEFAULT_CHUNK_SIZE};
pub use client::WebClient;
pub use codec::{AutoBody, BodyCodec, CodecKind};
pub use config::ClientOptions;
pub use error::{ClientError, DecodeError, EncodeError, ErrorKind, Result, StreamFailure, TransportError};
pub use header::{Header, HeaderMap};
pub use pending::{PendingSend, Phase};
pub use request::{HttpRequest, Method, Target, UnknownMethod};
pub use response::HttpResponse;
