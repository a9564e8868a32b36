//! Response body codecs.
//!
//! A [`BodyCodec<T>`] turns the fully buffered response body into a `T`.
//! The same decode routines back the lazy accessors on
//! [`HttpResponse<Bytes>`](crate::HttpResponse), so eager and lazy
//! decoding agree on every body.

use std::fmt;
use std::sync::Arc;

use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

use crate::body::BoxError;
use crate::error::DecodeError;

/// Which decoding a codec performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodecKind {
    Raw,
    Text,
    AutoJson,
    TypedJson,
    JsonObject,
    Custom,
    Discard,
}

/// Result of [`BodyCodec::auto_json`].
#[derive(Debug, Clone, PartialEq)]
pub enum AutoBody {
    /// The response declared a JSON content type and parsed.
    Json(Value),
    /// Any other content type; bytes are passed through.
    Raw(Bytes),
}

type DecodeFn<T> = dyn Fn(Option<&str>, Bytes) -> Result<T, DecodeError> + Send + Sync;

/// Decodes a buffered response body into `T`.
///
/// The codec receives the response `Content-Type` alongside the bytes.
pub struct BodyCodec<T> {
    kind: CodecKind,
    decode: Arc<DecodeFn<T>>,
}

impl<T> Clone for BodyCodec<T> {
    fn clone(&self) -> Self {
        Self {
            kind: self.kind,
            decode: self.decode.clone(),
        }
    }
}

impl<T> fmt::Debug for BodyCodec<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BodyCodec").field("kind", &self.kind).finish()
    }
}

impl BodyCodec<Bytes> {
    /// The body bytes, untouched.
    pub fn raw() -> Self {
        Self::with_kind(CodecKind::Raw, |_, bytes| Ok(bytes))
    }
}

impl Default for BodyCodec<Bytes> {
    fn default() -> Self {
        Self::raw()
    }
}

impl BodyCodec<String> {
    /// The body as strict UTF-8 text.
    pub fn text() -> Self {
        Self::with_kind(CodecKind::Text, |_, bytes| decode_text(bytes))
    }
}

impl BodyCodec<AutoBody> {
    /// JSON when the response says so, raw bytes otherwise.
    pub fn auto_json() -> Self {
        Self::with_kind(CodecKind::AutoJson, decode_auto)
    }
}

impl BodyCodec<Value> {
    /// Any JSON document.
    pub fn json_value() -> Self {
        Self::with_kind(CodecKind::TypedJson, |_, bytes| decode_json(&bytes))
    }
}

impl BodyCodec<Map<String, Value>> {
    /// A JSON document that must be an object.
    pub fn json_object() -> Self {
        Self::with_kind(CodecKind::JsonObject, |_, bytes| decode_json_object(&bytes))
    }
}

impl BodyCodec<()> {
    /// Drain the body and keep nothing.
    pub fn discard() -> Self {
        Self::with_kind(CodecKind::Discard, |_, _| Ok(()))
    }
}

impl<T: DeserializeOwned> BodyCodec<T> {
    /// Deserialize the body as JSON into `T`, whatever the content type.
    pub fn json() -> Self {
        Self::with_kind(CodecKind::TypedJson, |_, bytes| decode_json(&bytes))
    }
}

impl<T> BodyCodec<T> {
    /// A caller-supplied decoder. Its error becomes [`DecodeError::Custom`].
    pub fn custom<F, E>(decode: F) -> Self
    where
        F: Fn(Bytes) -> Result<T, E> + Send + Sync + 'static,
        E: Into<BoxError>,
    {
        Self::with_kind(CodecKind::Custom, move |_, bytes| {
            decode(bytes).map_err(|e| DecodeError::Custom(e.into()))
        })
    }

    fn with_kind<F>(kind: CodecKind, decode: F) -> Self
    where
        F: Fn(Option<&str>, Bytes) -> Result<T, DecodeError> + Send + Sync + 'static,
    {
        Self {
            kind,
            decode: Arc::new(decode),
        }
    }

    pub fn kind(&self) -> CodecKind {
        self.kind
    }

    pub(crate) fn decode(&self, content_type: Option<&str>, body: Bytes) -> Result<T, DecodeError> {
        (self.decode)(content_type, body)
    }
}

/// `application/json` or any `+json` media type, parameters ignored.
pub(crate) fn is_json_content_type(content_type: &str) -> bool {
    let essence = content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();
    essence == "application/json" || (essence.starts_with("application/") && essence.ends_with("+json"))
}

pub(crate) fn decode_text(body: Bytes) -> Result<String, DecodeError> {
    Ok(String::from_utf8(body.to_vec())?)
}

pub(crate) fn decode_json<T: DeserializeOwned>(body: &[u8]) -> Result<T, DecodeError> {
    Ok(serde_json::from_slice(body)?)
}

pub(crate) fn decode_json_object(body: &[u8]) -> Result<Map<String, Value>, DecodeError> {
    match decode_json::<Value>(body)? {
        Value::Object(map) => Ok(map),
        other => Err(DecodeError::NotAnObject(json_type_name(&other))),
    }
}

pub(crate) fn decode_auto(content_type: Option<&str>, body: Bytes) -> Result<AutoBody, DecodeError> {
    match content_type {
        Some(ct) if is_json_content_type(ct) => Ok(AutoBody::Json(decode_json(&body)?)),
        _ => Ok(AutoBody::Raw(body)),
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
