//! Drives one send through connect, upload, response and decode.
//!
//! Every send runs on its own task. The task reports through a shared
//! [`Resolver`], as does the optional [`TimeoutGovernor`]; whichever gets
//! there first decides the outcome. The connection is closed after every
//! terminal outcome.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use crate::body::BodySource;
use crate::codec::BodyCodec;
use crate::collector::ResponseCollector;
use crate::error::{ClientError, Result, StreamFailure};
use crate::pending::{CancelToken, PendingSend, Phase, Resolver, TimeoutGovernor, cancel_pair};
use crate::pump::BodyPump;
use crate::response::HttpResponse;
use crate::transport::{Connection, RequestHead, Transport};

/// A fully prepared request: validated head, body and deadline.
#[derive(Debug)]
pub(crate) struct Outbound {
    pub head: RequestHead,
    pub body: BodySource,
    pub timeout: Option<Duration>,
}

pub(crate) struct RequestEngine {
    transport: Arc<dyn Transport>,
}

impl RequestEngine {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self { transport }
    }

    /// Start a send. Must be called inside a Tokio runtime.
    pub fn dispatch<T: Send + 'static>(
        &self,
        outbound: Outbound,
        codec: BodyCodec<T>,
    ) -> PendingSend<HttpResponse<T>> {
        let Outbound {
            head,
            body,
            timeout,
        } = outbound;

        let (resolver, outcome) = Resolver::new();
        let (cancel, token) = cancel_pair();
        let governor = timeout.map(|after| TimeoutGovernor::arm(after, resolver.clone(), cancel));

        let exchange = tokio::spawn(run_exchange(
            self.transport.clone(),
            head,
            body,
            codec,
            resolver.clone(),
            token,
        ));
        PendingSend::new(outcome, resolver, exchange, governor)
    }
}

async fn run_exchange<T: Send + 'static>(
    transport: Arc<dyn Transport>,
    head: RequestHead,
    body: BodySource,
    codec: BodyCodec<T>,
    resolver: Arc<Resolver<HttpResponse<T>>>,
    mut cancel: CancelToken,
) {
    let target = head.target.to_string();
    debug!(method = %head.method, %target, "connecting");

    let mut pump = BodyPump::new(body);
    let connected = tokio::select! {
        biased;
        _ = cancel.cancelled() => return,
        connected = connect(transport.as_ref(), &head, &mut pump) => connected,
    };
    let mut conn = match connected {
        Ok(conn) => conn,
        Err(e) => {
            warn!(%target, error = %e, "request failed before connecting");
            resolver.resolve(Err(e));
            return;
        }
    };

    let outcome = tokio::select! {
        biased;
        _ = cancel.cancelled() => None,
        outcome = exchange(conn.as_mut(), head, pump, &codec, &resolver) => Some(outcome),
    };
    conn.close();

    match outcome {
        Some(Ok(response)) => {
            debug!(%target, status = response.status(), "request succeeded");
            resolver.resolve(Ok(response));
        }
        Some(Err(e)) => {
            warn!(%target, error = %e, kind = ?e.kind(), "request failed");
            resolver.resolve(Err(e));
        }
        None => debug!(%target, "exchange cancelled, connection closed"),
    }
}

/// Connect, priming a stream source on the side.
///
/// The connect future is polled first on every wake-up. While it is
/// pending the first chunk of a stream body is pulled, so a source that
/// fails straight away fails the send without waiting for the peer.
async fn connect(
    transport: &dyn Transport,
    head: &RequestHead,
    pump: &mut BodyPump,
) -> Result<Box<dyn Connection>> {
    let mut connecting = transport.connect(&head.target);
    loop {
        tokio::select! {
            biased;
            connected = &mut connecting => {
                return connected.map_err(|source| ClientError::Connect {
                    target: head.target.authority(),
                    source,
                });
            }
            primed = pump.prime(), if pump.needs_priming() => primed?,
        }
    }
}

async fn exchange<T>(
    conn: &mut dyn Connection,
    head: RequestHead,
    pump: BodyPump,
    codec: &BodyCodec<T>,
    resolver: &Resolver<HttpResponse<T>>,
) -> Result<HttpResponse<T>> {
    resolver.set_phase(Phase::Sending);
    let (mut sink, mut source) = conn
        .exchange(head)
        .map_err(|e| ClientError::Stream(StreamFailure::Transport(e)))?;

    let response_head = {
        let upload = pump.run(sink.as_mut());
        tokio::pin!(upload);
        let mut arrival = source.head();

        tokio::select! {
            uploaded = &mut upload => {
                let stats = uploaded?;
                debug!(chunks = stats.chunks, bytes = stats.bytes, "request body sent");
                resolver.set_phase(Phase::AwaitingResponse);
                match arrival.await {
                    Ok(head) => head,
                    // No head yet: the peer gave up on the body it was reading.
                    Err(e) if stats.bytes > 0 => return Err(StreamFailure::Transport(e).into()),
                    Err(e) => return Err(ClientError::Interrupted(e)),
                }
            }
            arrived = &mut arrival => match arrived {
                Ok(head) => {
                    debug!(status = head.status, "response arrived before the upload finished");
                    head
                }
                Err(e) => return Err(StreamFailure::Transport(e).into()),
            },
        }
    };

    // `sink` stays alive until the body is read: dropping it unfinished
    // would abort the request while the peer is still answering.
    resolver.set_phase(Phase::Receiving);
    let response = ResponseCollector::new(source.as_mut(), response_head)
        .collect(codec)
        .await?;
    drop(sink);
    Ok(response)
}

#[cfg(test)]
mod tests {
    use std::pin::Pin;
    use std::result::Result;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::task::{Context, Poll};

    use bytes::Bytes;
    use futures_core::Stream;
    use tokio::sync::oneshot;

    use super::*;
    use crate::body::BoxError;
    use crate::error::{ErrorKind, TransportError};
    use crate::header::HeaderMap;
    use crate::request::{Method, Target};
    use crate::transport::Framing;
    use crate::transport::mock::{ConnectBehavior, MockTransport, ResponseBehavior};

    fn engine(mock: &MockTransport) -> RequestEngine {
        RequestEngine::new(Arc::new(mock.clone()))
    }

    fn outbound(body: BodySource, framing: Framing, timeout: Option<Duration>) -> Outbound {
        Outbound {
            head: RequestHead {
                method: Method::Post,
                target: Target::new("localhost", 8080, "/somepath"),
                headers: HeaderMap::new(),
                framing,
            },
            body,
            timeout,
        }
    }

    /// Yields `total` chunks, counting pulls.
    struct CountingSource {
        pulls: Arc<AtomicUsize>,
        total: usize,
    }

    impl Stream for CountingSource {
        type Item = Result<Bytes, BoxError>;

        fn poll_next(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
            let n = self.pulls.fetch_add(1, Ordering::SeqCst);
            if n >= self.total {
                return Poll::Ready(None);
            }
            Poll::Ready(Some(Ok(Bytes::from(vec![b'a' + n as u8; 4]))))
        }
    }

    #[tokio::test]
    async fn buffer_round_trip() {
        let mock = MockTransport::new(ConnectBehavior::Accept, ResponseBehavior::ok("stored"));
        let response = engine(&mock)
            .dispatch(
                outbound(
                    BodySource::Buffer(Bytes::from_static(b"payload")),
                    Framing::Length(7),
                    None,
                ),
                BodyCodec::text(),
            )
            .wait()
            .await
            .unwrap();

        assert_eq!(response.body(), "stored");
        assert_eq!(mock.written(), vec![Bytes::from_static(b"payload")]);
        assert_eq!(mock.heads()[0].framing, Framing::Length(7));
        assert!(mock.upload_finished());
    }

    #[tokio::test]
    async fn connection_is_closed_after_success() {
        let mock = MockTransport::new(ConnectBehavior::Accept, ResponseBehavior::ok(""));
        engine(&mock)
            .dispatch(outbound(BodySource::Empty, Framing::Empty, None), BodyCodec::discard())
            .wait()
            .await
            .unwrap();

        tokio::task::yield_now().await;
        assert!(mock.closed());
    }

    #[tokio::test]
    async fn refused_connection_is_a_connect_error() {
        let mock = MockTransport::new(ConnectBehavior::Refuse, ResponseBehavior::ok(""));
        let err = engine(&mock)
            .dispatch(outbound(BodySource::Empty, Framing::Empty, None), BodyCodec::raw())
            .wait()
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Connect);
        assert_eq!(mock.connects(), 0);
    }

    #[tokio::test]
    async fn pump_waits_for_drain_before_pulling_again() {
        let mock = MockTransport::gated(ResponseBehavior::ok("done"));
        let pulls = Arc::new(AtomicUsize::new(0));
        let source = BodySource::from_stream(CountingSource {
            pulls: pulls.clone(),
            total: 3,
        });

        let pending = engine(&mock).dispatch(
            outbound(source, Framing::Chunked, None),
            BodyCodec::text(),
        );

        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        assert_eq!(pulls.load(Ordering::SeqCst), 1, "one chunk in flight while the sink is full");
        assert!(mock.written().is_empty());
        assert_eq!(pending.phase(), Phase::Sending);

        mock.release(1);
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        assert_eq!(pulls.load(Ordering::SeqCst), 2);
        assert_eq!(mock.written().len(), 1);

        mock.release(10);
        let response = pending.wait().await.unwrap();
        assert_eq!(response.body(), "done");

        let written: Vec<u8> = mock.written().iter().flat_map(|c| c.to_vec()).collect();
        assert_eq!(written, b"aaaabbbbcccc");
        assert_eq!(pulls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn source_failure_while_connecting_skips_the_connection() {
        let mock = MockTransport::new(ConnectBehavior::Hang, ResponseBehavior::ok(""));
        let items: Vec<Result<Bytes, BoxError>> = vec![Err("source exploded".into())];
        let source = BodySource::from_stream(futures_util::stream::iter(items));

        let err = engine(&mock)
            .dispatch(outbound(source, Framing::Chunked, None), BodyCodec::raw())
            .wait()
            .await
            .unwrap_err();

        match err {
            ClientError::Stream(StreamFailure::Source(cause)) => {
                assert_eq!(cause.to_string(), "source exploded")
            }
            other => panic!("expected source failure, got {other:?}"),
        }
        assert_eq!(mock.connects(), 0);
        assert!(mock.heads().is_empty());
    }

    #[tokio::test]
    async fn peer_close_mid_upload_wins_over_late_source_failure() {
        let mock = MockTransport::new(
            ConnectBehavior::Accept,
            ResponseBehavior::CloseAfterChunks(1),
        );
        let (fail_tx, fail_rx) = oneshot::channel::<()>();
        let first = futures_util::stream::iter(vec![Ok::<_, BoxError>(Bytes::from_static(b"first"))]);
        let late_failure = futures_util::stream::once(async move {
            let _ = fail_rx.await;
            Err::<Bytes, BoxError>("late failure".into())
        });
        let source = BodySource::from_stream(futures_util::StreamExt::chain(first, late_failure));

        let err = engine(&mock)
            .dispatch(outbound(source, Framing::Chunked, None), BodyCodec::raw())
            .wait()
            .await
            .unwrap_err();

        assert!(
            err.to_string().contains("connection was closed"),
            "unexpected message: {err}"
        );
        assert!(matches!(
            err,
            ClientError::Stream(StreamFailure::Transport(TransportError::Closed))
        ));

        // The source was dropped with the exchange, so the late failure has nobody to reach.
        tokio::task::yield_now().await;
        assert!(fail_tx.send(()).is_err());
        assert!(mock.closed());
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_while_awaiting_response_closes_connection() {
        let mock = MockTransport::new(ConnectBehavior::Accept, ResponseBehavior::Hang);
        let err = engine(&mock)
            .dispatch(
                outbound(BodySource::Empty, Framing::Empty, Some(Duration::from_millis(50))),
                BodyCodec::raw(),
            )
            .wait()
            .await
            .unwrap_err();

        match err {
            ClientError::Timeout { after, phase } => {
                assert_eq!(after, Duration::from_millis(50));
                assert_eq!(phase, Phase::AwaitingResponse);
            }
            other => panic!("expected timeout, got {other:?}"),
        }

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(mock.closed());
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_while_connecting() {
        let mock = MockTransport::new(ConnectBehavior::Hang, ResponseBehavior::ok(""));
        let err = engine(&mock)
            .dispatch(
                outbound(BodySource::Empty, Framing::Empty, Some(Duration::from_millis(20))),
                BodyCodec::raw(),
            )
            .wait()
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            ClientError::Timeout {
                phase: Phase::Connecting,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn hang_up_after_finite_upload_is_a_stream_failure() {
        let mock = MockTransport::new(ConnectBehavior::Accept, ResponseBehavior::CloseAfterUpload);
        let chunks = (0..4).map(|i| Ok::<_, BoxError>(Bytes::from(format!("chunk-{i};"))));
        let body = BodySource::from_stream(futures_util::stream::iter(chunks));

        let err = engine(&mock)
            .dispatch(outbound(body, Framing::Chunked, None), BodyCodec::raw())
            .wait()
            .await
            .unwrap_err();

        assert!(mock.upload_finished());
        assert!(matches!(err, ClientError::Stream(StreamFailure::Transport(TransportError::Closed))));
        assert!(mock.closed());
    }

    #[tokio::test]
    async fn hang_up_without_body_is_interrupted() {
        let mock = MockTransport::new(ConnectBehavior::Accept, ResponseBehavior::CloseAfterUpload);
        let err = engine(&mock)
            .dispatch(outbound(BodySource::Empty, Framing::Empty, None), BodyCodec::raw())
            .wait()
            .await
            .unwrap_err();

        assert!(matches!(err, ClientError::Interrupted(TransportError::Closed)));
    }

    #[tokio::test]
    async fn panicking_codec_still_resolves_the_send() {
        let mock = MockTransport::new(ConnectBehavior::Accept, ResponseBehavior::ok("hi"));
        let codec = BodyCodec::<u32>::custom(|_: Bytes| -> Result<u32, BoxError> {
            panic!("codec bug")
        });

        let err = tokio::time::timeout(
            Duration::from_secs(5),
            engine(&mock)
                .dispatch(outbound(BodySource::Empty, Framing::Empty, None), codec)
                .wait(),
        )
        .await
        .expect("send must resolve")
        .unwrap_err();

        assert!(matches!(err, ClientError::Interrupted(TransportError::TaskFailed(_))));
        assert!(mock.closed());
    }

    #[tokio::test]
    async fn failed_body_read_is_interrupted() {
        let mock = MockTransport::new(ConnectBehavior::Accept, ResponseBehavior::FailBody);
        let err = engine(&mock)
            .dispatch(outbound(BodySource::Empty, Framing::Empty, None), BodyCodec::raw())
            .wait()
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Interrupted);
    }

    #[tokio::test]
    async fn decode_failure_after_full_receipt() {
        let mock = MockTransport::new(
            ConnectBehavior::Accept,
            ResponseBehavior::json("not-json-object"),
        );
        let err = engine(&mock)
            .dispatch(outbound(BodySource::Empty, Framing::Empty, None), BodyCodec::json_object())
            .wait()
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Decode);
    }

    #[tokio::test]
    async fn early_response_ends_the_upload() {
        let mock = MockTransport::gated(ResponseBehavior::Respond {
            status: 413,
            headers: vec![("content-type", "text/plain")],
            body: vec![Bytes::from_static(b"too large")],
            early: true,
        });
        let source = BodySource::from_stream(CountingSource {
            pulls: Arc::new(AtomicUsize::new(0)),
            total: 100,
        });

        let response = engine(&mock)
            .dispatch(outbound(source, Framing::Chunked, None), BodyCodec::text())
            .wait()
            .await
            .unwrap();

        assert_eq!(response.status(), 413);
        assert_eq!(response.body(), "too large");
        assert!(!mock.upload_finished());
    }

    #[tokio::test]
    async fn late_success_after_timeout_is_discarded() {
        let mock = MockTransport::new(ConnectBehavior::Accept, ResponseBehavior::ok("late"));
        let (resolver, outcome) = Resolver::<HttpResponse<Bytes>>::new();
        resolver.resolve(Err(ClientError::Timeout {
            after: Duration::from_millis(1),
            phase: Phase::AwaitingResponse,
        }));

        let (_cancel, token) = cancel_pair();
        run_exchange(
            Arc::new(mock.clone()),
            outbound(BodySource::Empty, Framing::Empty, None).head,
            BodySource::Empty,
            BodyCodec::raw(),
            resolver.clone(),
            token,
        )
        .await;

        let err = outcome.await.unwrap().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Timeout);
        assert!(mock.closed());
    }
}
