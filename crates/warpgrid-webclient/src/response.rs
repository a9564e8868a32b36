use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

use crate::codec::{self, AutoBody};
use crate::error::DecodeError;
use crate::header::HeaderMap;

/// A received HTTP response with a fully buffered, decoded body.
///
/// `T` is whatever the request's [`BodyCodec`](crate::BodyCodec)
/// produced. With the default raw codec (`T = Bytes`) the body can be
/// reinterpreted afterwards through the `body_as_*` accessors. Each
/// accessor decodes independently and may fail on its own without
/// affecting the others.
#[derive(Debug, Clone)]
pub struct HttpResponse<T = Bytes> {
    status: u16,
    status_message: String,
    headers: HeaderMap,
    body: T,
}

impl<T> HttpResponse<T> {
    pub(crate) fn new(status: u16, status_message: String, headers: HeaderMap, body: T) -> Self {
        Self {
            status,
            status_message,
            headers,
            body,
        }
    }

    pub fn status(&self) -> u16 {
        self.status
    }

    /// Reason phrase from the status line, e.g. `"Not Found"`.
    pub fn status_message(&self) -> &str {
        &self.status_message
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// First value of header `name`, ignoring case.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name)
    }

    pub fn content_type(&self) -> Option<&str> {
        self.headers.get("content-type")
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn body(&self) -> &T {
        &self.body
    }

    pub fn into_body(self) -> T {
        self.body
    }

    /// Transform the body, keeping status and headers.
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> HttpResponse<U> {
        HttpResponse {
            status: self.status,
            status_message: self.status_message,
            headers: self.headers,
            body: f(self.body),
        }
    }
}

impl HttpResponse<Bytes> {
    /// The body as strict UTF-8 text.
    pub fn body_as_string(&self) -> Result<String, DecodeError> {
        codec::decode_text(self.body.clone())
    }

    /// The body as any JSON document.
    pub fn body_as_json(&self) -> Result<Value, DecodeError> {
        codec::decode_json(&self.body)
    }

    /// The body as a JSON object.
    pub fn body_as_json_object(&self) -> Result<Map<String, Value>, DecodeError> {
        codec::decode_json_object(&self.body)
    }

    /// The body deserialized into `U`.
    pub fn body_as<U: DeserializeOwned>(&self) -> Result<U, DecodeError> {
        codec::decode_json(&self.body)
    }

    /// JSON if the response declares a JSON content type, raw bytes otherwise.
    pub fn body_as_auto(&self) -> Result<AutoBody, DecodeError> {
        codec::decode_auto(self.content_type(), self.body.clone())
    }
}
