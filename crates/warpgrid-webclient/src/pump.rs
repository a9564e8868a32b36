//! Moves a request body from its source into a transport sink.
//!
//! The pump holds at most one chunk at a time: it pulls a chunk, writes
//! it, and only pulls the next one after the sink reports room. A sink
//! that stops draining therefore stops the source from being polled.

use bytes::Bytes;
use tracing::trace;

use crate::body::{BodySource, next_chunk};
use crate::error::StreamFailure;
use crate::transport::BodySink;

/// Totals for one completed upload.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub(crate) struct PumpStats {
    pub chunks: usize,
    pub bytes: u64,
}

pub(crate) struct BodyPump {
    source: BodySource,
    primed: bool,
    held: Option<Bytes>,
    exhausted: bool,
}

impl BodyPump {
    pub fn new(source: BodySource) -> Self {
        Self {
            source,
            primed: false,
            held: None,
            exhausted: false,
        }
    }

    /// Whether the first chunk of a stream has yet to be pulled.
    pub fn needs_priming(&self) -> bool {
        self.source.is_stream() && !self.primed
    }

    /// Pull the first chunk of a stream before a sink exists.
    ///
    /// A source that fails here fails the send without ever writing.
    /// A successful chunk is held and written first by [`run`](Self::run).
    pub async fn prime(&mut self) -> Result<(), StreamFailure> {
        let BodySource::Stream(stream) = &mut self.source else {
            return Ok(());
        };
        let first = next_chunk(stream).await;
        self.primed = true;
        match first {
            Some(Ok(chunk)) => {
                self.held = Some(chunk);
                Ok(())
            }
            Some(Err(cause)) => Err(StreamFailure::Source(cause)),
            None => {
                self.exhausted = true;
                Ok(())
            }
        }
    }

    /// Write the whole body, then finish the sink.
    pub async fn run(self, sink: &mut dyn BodySink) -> Result<PumpStats, StreamFailure> {
        let mut stats = PumpStats::default();
        match self.source {
            BodySource::Empty => {}
            BodySource::Buffer(bytes) | BodySource::Serialized { payload: bytes, .. } => {
                write(sink, bytes, &mut stats).await?;
            }
            BodySource::Stream(mut stream) => {
                if let Some(chunk) = self.held {
                    write(sink, chunk, &mut stats).await?;
                }
                if !self.exhausted {
                    while let Some(item) = next_chunk(&mut stream).await {
                        let chunk = item.map_err(StreamFailure::Source)?;
                        write(sink, chunk, &mut stats).await?;
                    }
                }
            }
        }
        sink.finish().await.map_err(StreamFailure::Transport)?;
        Ok(stats)
    }
}

async fn write(
    sink: &mut dyn BodySink,
    chunk: Bytes,
    stats: &mut PumpStats,
) -> Result<(), StreamFailure> {
    if chunk.is_empty() {
        return Ok(());
    }
    let len = chunk.len() as u64;
    sink.write(chunk).await.map_err(StreamFailure::Transport)?;
    stats.chunks += 1;
    stats.bytes += len;
    trace!(len, total = stats.bytes, "body chunk drained");
    Ok(())
}
