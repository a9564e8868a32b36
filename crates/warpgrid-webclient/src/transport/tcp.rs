//! HTTP/1.1 over TCP (optionally TLS), driven by hyper.
//!
//! Each connection is a fresh `TcpStream` handed to
//! `hyper::client::conn::http1::handshake`; the connection driver runs on
//! its own task and is aborted when the connection is closed or dropped.
//! The request body is fed through a bounded channel so a slow peer
//! pushes back on the body pump.

use std::io;
use std::pin::Pin;
use std::sync::{Arc, OnceLock};
use std::task::{Context, Poll, ready};

use bytes::Bytes;
use http_body_util::BodyExt;
use hyper::body::{Body, Frame, Incoming, SizeHint};
use hyper::client::conn::http1::{self, SendRequest};
use hyper_util::rt::TokioIo;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::debug;

use super::{BodySink, BoxFuture, Connection, Framing, RequestHead, ResponseHead, ResponseSource, Transport};
use crate::config::DEFAULT_WRITE_QUEUE_DEPTH;
use crate::error::TransportError;
use crate::header::{Header, HeaderMap};
use crate::request::Target;

/// The default [`Transport`]: one HTTP/1.1 connection per send.
#[derive(Debug)]
pub struct TcpTransport {
    write_queue_depth: usize,
    tls: OnceLock<Arc<rustls::ClientConfig>>,
}

impl TcpTransport {
    /// `write_queue_depth` bounds how many body chunks may be queued
    /// ahead of the socket before writes stop resolving.
    pub fn new(write_queue_depth: usize) -> Self {
        Self {
            write_queue_depth: write_queue_depth.max(1),
            tls: OnceLock::new(),
        }
    }

    /// Use a custom rustls configuration for `https` targets instead of
    /// the bundled Mozilla roots.
    pub fn with_tls_config(mut self, config: Arc<rustls::ClientConfig>) -> Self {
        self.tls = OnceLock::from(config);
        self
    }

    fn tls_config(&self) -> Result<Arc<rustls::ClientConfig>, TransportError> {
        if let Some(config) = self.tls.get() {
            return Ok(config.clone());
        }
        let config = webpki_client_config()?;
        Ok(self.tls.get_or_init(|| config).clone())
    }
}

impl Default for TcpTransport {
    fn default() -> Self {
        Self::new(DEFAULT_WRITE_QUEUE_DEPTH)
    }
}

impl Transport for TcpTransport {
    fn connect<'a>(
        &'a self,
        target: &'a Target,
    ) -> BoxFuture<'a, Result<Box<dyn Connection>, TransportError>> {
        Box::pin(async move {
            let stream = TcpStream::connect((target.host.as_str(), target.port))
                .await
                .map_err(TransportError::Connect)?;
            let _ = stream.set_nodelay(true);

            let (sender, driver) = if target.tls {
                let server_name = rustls::pki_types::ServerName::try_from(target.host.clone())
                    .map_err(|e| TransportError::Tls(format!("invalid server name: {e}")))?;
                let connector = tokio_rustls::TlsConnector::from(self.tls_config()?);
                let stream = connector
                    .connect(server_name, stream)
                    .await
                    .map_err(|e| TransportError::Tls(e.to_string()))?;
                handshake(stream, target).await?
            } else {
                handshake(stream, target).await?
            };

            debug!(
                host = %target.host,
                port = target.port,
                tls = target.tls,
                "connection established"
            );
            Ok(Box::new(TcpConnection {
                sender,
                driver,
                queue_depth: self.write_queue_depth,
            }) as Box<dyn Connection>)
        })
    }
}

async fn handshake<I>(
    io: I,
    target: &Target,
) -> Result<(SendRequest<OutboundBody>, JoinHandle<()>), TransportError>
where
    I: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (mut sender, conn) = http1::handshake(TokioIo::new(io))
        .await
        .map_err(map_hyper_error)?;

    let peer = target.authority();
    let driver = tokio::spawn(async move {
        if let Err(e) = conn.await {
            debug!(error = %e, %peer, "connection driver stopped");
        }
    });

    if let Err(e) = sender.ready().await {
        driver.abort();
        return Err(map_hyper_error(e));
    }
    Ok((sender, driver))
}

/// Mozilla root store with the ring provider.
fn webpki_client_config() -> Result<Arc<rustls::ClientConfig>, TransportError> {
    let mut root_store = rustls::RootCertStore::empty();
    root_store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());

    let config =
        rustls::ClientConfig::builder_with_provider(rustls::crypto::ring::default_provider().into())
            .with_safe_default_protocol_versions()
            .map_err(|e| TransportError::Tls(format!("tls protocol version error: {e}")))?
            .with_root_certificates(root_store)
            .with_no_client_auth();
    Ok(Arc::new(config))
}

struct TcpConnection {
    sender: SendRequest<OutboundBody>,
    driver: JoinHandle<()>,
    queue_depth: usize,
}

impl Connection for TcpConnection {
    fn exchange(
        &mut self,
        head: RequestHead,
    ) -> Result<(Box<dyn BodySink>, Box<dyn ResponseSource>), TransportError> {
        let (sink, body) = body_channel(head.framing, self.queue_depth);
        let request = build_request(head, body)?;
        let response = self.sender.send_request(request);
        Ok((
            Box::new(sink),
            Box::new(HyperResponse {
                pending: Some(Box::pin(response)),
                body: None,
            }),
        ))
    }

    fn close(&mut self) {
        self.driver.abort();
    }
}

impl Drop for TcpConnection {
    fn drop(&mut self) {
        self.driver.abort();
    }
}

fn build_request(
    head: RequestHead,
    body: OutboundBody,
) -> Result<http::Request<OutboundBody>, TransportError> {
    let mut builder = http::Request::builder()
        .method(head.method.as_str())
        .uri(head.target.path.as_str());

    if !head.headers.contains("host") {
        builder = builder.header(http::header::HOST, head.target.authority());
    }
    for header in head.headers.iter() {
        builder = builder.header(header.name.as_str(), header.value.as_str());
    }
    if head.framing == Framing::Chunked && !head.headers.contains("transfer-encoding") {
        builder = builder.header(http::header::TRANSFER_ENCODING, "chunked");
    }

    builder
        .body(body)
        .map_err(|e| TransportError::InvalidRequest(e.to_string()))
}

fn map_hyper_error(err: hyper::Error) -> TransportError {
    let io_closed = std::error::Error::source(&err)
        .and_then(|source| source.downcast_ref::<io::Error>())
        .is_some_and(|e| {
            matches!(
                e.kind(),
                io::ErrorKind::ConnectionReset
                    | io::ErrorKind::ConnectionAborted
                    | io::ErrorKind::BrokenPipe
                    | io::ErrorKind::UnexpectedEof
            )
        });

    if io_closed
        || err.is_closed()
        || err.is_incomplete_message()
        || err.is_canceled()
        || err.is_body_write_aborted()
    {
        debug!(error = %err, "connection closed by peer");
        TransportError::Closed
    } else {
        TransportError::Protocol(Box::new(err))
    }
}

// ── Request body ──────────────────────────────────────────────────────

enum BodyFrame {
    Data(Bytes),
    /// Acknowledged once hyper has been told the body is complete.
    End(oneshot::Sender<()>),
}

fn body_channel(framing: Framing, depth: usize) -> (ChannelSink, OutboundBody) {
    match framing {
        Framing::Empty => (
            ChannelSink {
                tx: None,
                remaining: Some(0),
            },
            OutboundBody {
                rx: None,
                length: Some(0),
            },
        ),
        Framing::Length(n) => {
            let (tx, rx) = mpsc::channel(depth.max(1));
            (
                ChannelSink {
                    tx: Some(tx),
                    remaining: Some(n),
                },
                OutboundBody {
                    rx: Some(rx),
                    length: Some(n),
                },
            )
        }
        Framing::Chunked => {
            let (tx, rx) = mpsc::channel(depth.max(1));
            (
                ChannelSink {
                    tx: Some(tx),
                    remaining: None,
                },
                OutboundBody {
                    rx: Some(rx),
                    length: None,
                },
            )
        }
    }
}

/// Request body handed to hyper.
///
/// Ends cleanly only on an explicit end marker. If the sink is dropped
/// first, the body yields an error so hyper aborts the request rather
/// than completing a truncated upload.
pub(crate) struct OutboundBody {
    rx: Option<mpsc::Receiver<BodyFrame>>,
    length: Option<u64>,
}

impl Body for OutboundBody {
    type Data = Bytes;
    type Error = TransportError;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Bytes>, TransportError>>> {
        let this = self.get_mut();
        let Some(rx) = this.rx.as_mut() else {
            return Poll::Ready(None);
        };
        match ready!(rx.poll_recv(cx)) {
            Some(BodyFrame::Data(chunk)) => Poll::Ready(Some(Ok(Frame::data(chunk)))),
            Some(BodyFrame::End(ack)) => {
                let _ = ack.send(());
                this.rx = None;
                Poll::Ready(None)
            }
            None => {
                this.rx = None;
                Poll::Ready(Some(Err(TransportError::Closed)))
            }
        }
    }

    fn is_end_stream(&self) -> bool {
        self.rx.is_none()
    }

    fn size_hint(&self) -> SizeHint {
        match self.length {
            Some(n) => SizeHint::with_exact(n),
            None => SizeHint::default(),
        }
    }
}

struct ChannelSink {
    tx: Option<mpsc::Sender<BodyFrame>>,
    /// Bytes still owed under a declared length.
    remaining: Option<u64>,
}

impl BodySink for ChannelSink {
    fn write(&mut self, chunk: Bytes) -> BoxFuture<'_, Result<(), TransportError>> {
        Box::pin(async move {
            let tx = self.tx.as_ref().ok_or(TransportError::Closed)?;
            let len = chunk.len() as u64;
            tx.send(BodyFrame::Data(chunk))
                .await
                .map_err(|_| TransportError::Closed)?;
            if let Some(remaining) = self.remaining.as_mut() {
                *remaining = remaining.saturating_sub(len);
            }
            Ok(())
        })
    }

    fn finish(&mut self) -> BoxFuture<'_, Result<(), TransportError>> {
        Box::pin(async move {
            let Some(tx) = self.tx.take() else {
                return Ok(());
            };
            let (ack, acked) = oneshot::channel();
            if tx.send(BodyFrame::End(ack)).await.is_ok() && acked.await.is_ok() {
                return Ok(());
            }
            // hyper lets go of a fixed-length body as soon as the last
            // declared byte is written, so the end marker may find no reader.
            if self.remaining == Some(0) {
                Ok(())
            } else {
                Err(TransportError::Closed)
            }
        })
    }
}

// ── Response ──────────────────────────────────────────────────────────

type ResponseFuture =
    Pin<Box<dyn Future<Output = hyper::Result<http::Response<Incoming>>> + Send>>;

struct HyperResponse {
    pending: Option<ResponseFuture>,
    body: Option<Incoming>,
}

impl ResponseSource for HyperResponse {
    fn head(&mut self) -> BoxFuture<'_, Result<ResponseHead, TransportError>> {
        Box::pin(async move {
            let pending = self.pending.as_mut().ok_or_else(|| {
                TransportError::InvalidRequest("response head already consumed".to_string())
            })?;
            let response = pending.await;
            self.pending = None;

            let (parts, body) = response.map_err(map_hyper_error)?.into_parts();
            self.body = Some(body);
            Ok(ResponseHead {
                status: parts.status.as_u16(),
                status_message: status_message(&parts),
                headers: response_headers(&parts.headers),
            })
        })
    }

    fn chunk(&mut self) -> BoxFuture<'_, Result<Option<Bytes>, TransportError>> {
        Box::pin(async move {
            let Some(body) = self.body.as_mut() else {
                return Ok(None);
            };
            loop {
                match body.frame().await {
                    None => return Ok(None),
                    Some(Err(e)) => return Err(map_hyper_error(e)),
                    Some(Ok(frame)) => {
                        // Trailers carry no body bytes.
                        if let Ok(data) = frame.into_data() {
                            return Ok(Some(data));
                        }
                    }
                }
            }
        })
    }
}

fn status_message(parts: &http::response::Parts) -> String {
    parts
        .extensions
        .get::<hyper::ext::ReasonPhrase>()
        .and_then(|reason| std::str::from_utf8(reason.as_bytes()).ok())
        .or_else(|| parts.status.canonical_reason())
        .unwrap_or_default()
        .to_string()
}

fn response_headers(headers: &http::HeaderMap) -> HeaderMap {
    headers
        .iter()
        .map(|(name, value)| {
            Header::new(name.as_str(), String::from_utf8_lossy(value.as_bytes()))
        })
        .collect()
}
