//! Error taxonomy for the web client.
//!
//! Every send resolves with at most one [`ClientError`], classified into
//! exactly one [`ErrorKind`]. Lower-level failures ([`TransportError`],
//! [`EncodeError`], [`DecodeError`], [`StreamFailure`]) are carried as
//! sources so callers can inspect the originating cause.

use std::io;
use std::time::Duration;

use thiserror::Error;

use crate::body::BoxError;
use crate::pending::Phase;

/// Result type alias for web client operations.
pub type Result<T> = std::result::Result<T, ClientError>;

/// Coarse classification of a [`ClientError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Connect,
    Encode,
    Stream,
    Interrupted,
    Decode,
    Timeout,
}

/// The terminal failure of a send.
#[derive(Debug, Error)]
pub enum ClientError {
    /// The transport could not establish a connection.
    #[error("failed to connect to {target}: {source}")]
    Connect {
        target: String,
        #[source]
        source: TransportError,
    },

    /// The request could not be encoded. No bytes were sent.
    #[error("failed to encode request: {0}")]
    Encode(#[from] EncodeError),

    /// The body source or the transport aborted during upload.
    #[error("request body stream failed: {0}")]
    Stream(#[from] StreamFailure),

    /// The response was not fully received.
    #[error("response interrupted: {0}")]
    Interrupted(#[source] TransportError),

    /// The response was received but the codec rejected it.
    #[error("failed to decode response body: {0}")]
    Decode(#[from] DecodeError),

    /// The deadline elapsed before the send resolved.
    #[error("request timed out after {after:?} while {phase}")]
    Timeout { after: Duration, phase: Phase },
}

impl ClientError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ClientError::Connect { .. } => ErrorKind::Connect,
            ClientError::Encode(_) => ErrorKind::Encode,
            ClientError::Stream(_) => ErrorKind::Stream,
            ClientError::Interrupted(_) => ErrorKind::Interrupted,
            ClientError::Decode(_) => ErrorKind::Decode,
            ClientError::Timeout { .. } => ErrorKind::Timeout,
        }
    }
}

/// Why an upload was aborted.
#[derive(Debug, Error)]
pub enum StreamFailure {
    /// The body source itself failed; carries the source's own error.
    #[error("body source failed: {0}")]
    Source(#[source] BoxError),

    /// The transport stopped accepting the body.
    #[error("connection was closed: {0}")]
    Transport(#[source] TransportError),
}

impl StreamFailure {
    /// The error reported by the body source, if the source failed.
    pub fn source_cause(&self) -> Option<&(dyn std::error::Error + Send + Sync + 'static)> {
        match self {
            StreamFailure::Source(cause) => Some(cause.as_ref()),
            StreamFailure::Transport(_) => None,
        }
    }
}

/// Failures raised by a [`Transport`](crate::transport::Transport) implementation.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("connect failed: {0}")]
    Connect(#[source] io::Error),

    #[error("tls error: {0}")]
    Tls(String),

    #[error("connection was closed")]
    Closed,

    #[error("i/o error: {0}")]
    Io(#[from] io::Error),

    #[error("protocol error: {0}")]
    Protocol(#[source] BoxError),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("exchange task failed: {0}")]
    TaskFailed(String),
}

/// Request encoding failures, detected before any connection attempt.
#[derive(Debug, Error)]
pub enum EncodeError {
    #[error("json serialization failed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid header {name:?}")]
    InvalidHeader { name: String },

    #[error("invalid request path {0:?}")]
    InvalidPath(String),
}

/// Response decoding failures.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("body is not valid utf-8: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),

    #[error("body is not valid json: {0}")]
    Json(#[from] serde_json::Error),

    #[error("expected a json object, found {0}")]
    NotAnObject(&'static str),

    #[error("{0}")]
    Custom(#[source] BoxError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Error)]
    #[error("disk on fire")]
    struct Fire;

    #[test]
    fn kind_matches_variant() {
        let err = ClientError::Timeout {
            after: Duration::from_millis(50),
            phase: Phase::AwaitingResponse,
        };
        assert_eq!(err.kind(), ErrorKind::Timeout);

        let err = ClientError::Interrupted(TransportError::Closed);
        assert_eq!(err.kind(), ErrorKind::Interrupted);

        let err = ClientError::Connect {
            target: "localhost:1".to_string(),
            source: TransportError::Connect(io::ErrorKind::ConnectionRefused.into()),
        };
        assert_eq!(err.kind(), ErrorKind::Connect);
    }

    #[test]
    fn transport_stream_failure_mentions_closed_connection() {
        let err = ClientError::from(StreamFailure::Transport(TransportError::Closed));
        assert_eq!(err.kind(), ErrorKind::Stream);
        assert!(err.to_string().contains("connection was closed"));
    }

    #[test]
    fn source_cause_is_preserved() {
        let failure = StreamFailure::Source(Box::new(Fire));
        let cause = failure.source_cause().expect("source failure has a cause");
        assert!(cause.downcast_ref::<Fire>().is_some());
        assert!(StreamFailure::Transport(TransportError::Closed).source_cause().is_none());
    }

    #[test]
    fn timeout_display_names_phase() {
        let err = ClientError::Timeout {
            after: Duration::from_millis(50),
            phase: Phase::AwaitingResponse,
        };
        assert_eq!(
            err.to_string(),
            "request timed out after 50ms while awaiting response"
        );
    }

    #[test]
    fn decode_error_wraps_parser_error() {
        let parse = serde_json::from_slice::<serde_json::Value>(b"not-json").unwrap_err();
        let err = ClientError::from(DecodeError::from(parse));
        assert_eq!(err.kind(), ErrorKind::Decode);
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn error_is_send_and_sync() {
        fn assert_send_sync<T: Send + Sync + 'static>() {}
        assert_send_sync::<ClientError>();
    }
}
