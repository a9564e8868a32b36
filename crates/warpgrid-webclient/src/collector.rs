//! Buffers a response body and hands it to the codec.

use bytes::{Bytes, BytesMut};
use tracing::debug;

use crate::codec::BodyCodec;
use crate::error::ClientError;
use crate::response::HttpResponse;
use crate::transport::{ResponseHead, ResponseSource};

pub(crate) struct ResponseCollector<'a> {
    source: &'a mut dyn ResponseSource,
    head: ResponseHead,
}

impl<'a> ResponseCollector<'a> {
    pub fn new(source: &'a mut dyn ResponseSource, head: ResponseHead) -> Self {
        Self { source, head }
    }

    /// Read the body to its end, then decode it.
    ///
    /// A transport failure before the end is [`ClientError::Interrupted`];
    /// a codec rejection is [`ClientError::Decode`].
    pub async fn collect<T>(mut self, codec: &BodyCodec<T>) -> Result<HttpResponse<T>, ClientError> {
        let mut buf = BytesMut::new();
        let mut single: Option<Bytes> = None;
        let mut chunks = 0usize;

        while let Some(chunk) = self.source.chunk().await.map_err(ClientError::Interrupted)? {
            chunks += 1;
            // One-chunk bodies skip the copy into `buf`.
            match single.take() {
                None if buf.is_empty() => single = Some(chunk),
                None => buf.extend_from_slice(&chunk),
                Some(first) => {
                    buf.extend_from_slice(&first);
                    buf.extend_from_slice(&chunk);
                }
            }
        }
        let body = single.unwrap_or_else(|| buf.freeze());

        debug!(
            status = self.head.status,
            bytes = body.len(),
            chunks,
            codec = ?codec.kind(),
            "response body received"
        );

        let ResponseHead {
            status,
            status_message,
            headers,
        } = self.head;
        let decoded = codec.decode(headers.get("content-type"), body)?;
        Ok(HttpResponse::new(status, status_message, headers, decoded))
    }
}
