//! Scriptable in-memory transport for engine tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use tokio::sync::{Semaphore, watch};

use super::{BodySink, BoxFuture, Connection, RequestHead, ResponseHead, ResponseSource, Transport};
use crate::error::TransportError;
use crate::header::HeaderMap;
use crate::request::Target;

pub(crate) enum ConnectBehavior {
    Accept,
    Refuse,
    Hang,
}

pub(crate) enum ResponseBehavior {
    /// Reply once the body is finished (or immediately with `early`).
    Respond {
        status: u16,
        headers: Vec<(&'static str, &'static str)>,
        body: Vec<Bytes>,
        early: bool,
    },
    /// Never reply.
    Hang,
    /// The peer goes away once this many chunks were written.
    CloseAfterChunks(usize),
    /// Head arrives, then the body read fails.
    FailBody,
    /// The peer goes away once the upload is finished, without a head.
    CloseAfterUpload,
}

impl ResponseBehavior {
    pub fn ok(body: &'static str) -> Self {
        ResponseBehavior::Respond {
            status: 200,
            headers: Vec::new(),
            body: vec![Bytes::from_static(body.as_bytes())],
            early: false,
        }
    }

    pub fn json(body: &'static str) -> Self {
        ResponseBehavior::Respond {
            status: 200,
            headers: vec![("content-type", "application/json")],
            body: vec![Bytes::from_static(body.as_bytes())],
            early: false,
        }
    }
}

struct MockState {
    connect: ConnectBehavior,
    response: ResponseBehavior,
    connects: AtomicUsize,
    closed: AtomicBool,
    heads: Mutex<Vec<RequestHead>>,
    written: Mutex<Vec<Bytes>>,
    drain: Semaphore,
    upload_done: watch::Sender<bool>,
    peer_closed: watch::Sender<bool>,
}

#[derive(Clone)]
pub(crate) struct MockTransport {
    state: Arc<MockState>,
}

impl MockTransport {
    /// Every write is accepted immediately.
    pub fn new(connect: ConnectBehavior, response: ResponseBehavior) -> Self {
        Self::with_permits(connect, response, Semaphore::MAX_PERMITS)
    }

    /// Writes stay pending until [`release`](Self::release) grants room.
    pub fn gated(response: ResponseBehavior) -> Self {
        Self::with_permits(ConnectBehavior::Accept, response, 0)
    }

    fn with_permits(connect: ConnectBehavior, response: ResponseBehavior, permits: usize) -> Self {
        Self {
            state: Arc::new(MockState {
                connect,
                response,
                connects: AtomicUsize::new(0),
                closed: AtomicBool::new(false),
                heads: Mutex::new(Vec::new()),
                written: Mutex::new(Vec::new()),
                drain: Semaphore::new(permits),
                upload_done: watch::channel(false).0,
                peer_closed: watch::channel(false).0,
            }),
        }
    }

    pub fn release(&self, writes: usize) {
        self.state.drain.add_permits(writes);
    }

    pub fn connects(&self) -> usize {
        self.state.connects.load(Ordering::SeqCst)
    }

    pub fn closed(&self) -> bool {
        self.state.closed.load(Ordering::SeqCst)
    }

    pub fn heads(&self) -> Vec<RequestHead> {
        self.state.heads.lock().unwrap().clone()
    }

    pub fn written(&self) -> Vec<Bytes> {
        self.state.written.lock().unwrap().clone()
    }

    pub fn upload_finished(&self) -> bool {
        *self.state.upload_done.borrow()
    }
}

impl Transport for MockTransport {
    fn connect<'a>(
        &'a self,
        _target: &'a Target,
    ) -> BoxFuture<'a, Result<Box<dyn Connection>, TransportError>> {
        Box::pin(async move {
            match self.state.connect {
                ConnectBehavior::Accept => {}
                ConnectBehavior::Refuse => {
                    return Err(TransportError::Connect(
                        std::io::ErrorKind::ConnectionRefused.into(),
                    ));
                }
                ConnectBehavior::Hang => std::future::pending::<()>().await,
            }
            self.state.connects.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(MockConnection {
                state: self.state.clone(),
            }) as Box<dyn Connection>)
        })
    }
}

struct MockConnection {
    state: Arc<MockState>,
}

impl Connection for MockConnection {
    fn exchange(
        &mut self,
        head: RequestHead,
    ) -> Result<(Box<dyn BodySink>, Box<dyn ResponseSource>), TransportError> {
        self.state.heads.lock().unwrap().push(head);
        self.state.upload_done.send_replace(false);
        let body = match &self.state.response {
            ResponseBehavior::Respond { body, .. } => body.iter().cloned().collect(),
            _ => VecDeque::new(),
        };
        Ok((
            Box::new(MockSink {
                state: self.state.clone(),
            }),
            Box::new(MockSource {
                state: self.state.clone(),
                body,
            }),
        ))
    }

    fn close(&mut self) {
        self.state.closed.store(true, Ordering::SeqCst);
    }
}

impl Drop for MockConnection {
    fn drop(&mut self) {
        self.state.closed.store(true, Ordering::SeqCst);
    }
}

struct MockSink {
    state: Arc<MockState>,
}

impl BodySink for MockSink {
    fn write(&mut self, chunk: Bytes) -> BoxFuture<'_, Result<(), TransportError>> {
        Box::pin(async move {
            if *self.state.peer_closed.borrow() {
                return Err(TransportError::Closed);
            }
            let permit = self
                .state
                .drain
                .acquire()
                .await
                .map_err(|_| TransportError::Closed)?;
            permit.forget();

            let count = {
                let mut written = self.state.written.lock().unwrap();
                written.push(chunk);
                written.len()
            };
            if let ResponseBehavior::CloseAfterChunks(limit) = self.state.response {
                if count >= limit {
                    self.state.peer_closed.send_replace(true);
                }
            }
            Ok(())
        })
    }

    fn finish(&mut self) -> BoxFuture<'_, Result<(), TransportError>> {
        Box::pin(async move {
            if *self.state.peer_closed.borrow() {
                return Err(TransportError::Closed);
            }
            self.state.upload_done.send_replace(true);
            Ok(())
        })
    }
}

struct MockSource {
    state: Arc<MockState>,
    body: VecDeque<Bytes>,
}

impl MockSource {
    async fn upload_done(&self) {
        let mut rx = self.state.upload_done.subscribe();
        let _ = rx.wait_for(|done| *done).await.map(|_| ());
    }
}

impl ResponseSource for MockSource {
    fn head(&mut self) -> BoxFuture<'_, Result<ResponseHead, TransportError>> {
        Box::pin(async move {
            match &self.state.response {
                ResponseBehavior::Respond {
                    status,
                    headers,
                    early,
                    ..
                } => {
                    if !early {
                        self.upload_done().await;
                    }
                    let headers: HeaderMap = headers
                        .iter()
                        .map(|(n, v)| (n.to_string(), v.to_string()))
                        .collect();
                    Ok(ResponseHead {
                        status: *status,
                        status_message: "OK".to_string(),
                        headers,
                    })
                }
                ResponseBehavior::Hang => std::future::pending().await,
                ResponseBehavior::CloseAfterChunks(_) => {
                    let mut rx = self.state.peer_closed.subscribe();
                    let _ = rx.wait_for(|closed| *closed).await.map(|_| ());
                    Err(TransportError::Closed)
                }
                ResponseBehavior::CloseAfterUpload => {
                    self.upload_done().await;
                    Err(TransportError::Closed)
                }
                ResponseBehavior::FailBody => {
                    self.upload_done().await;
                    Ok(ResponseHead {
                        status: 200,
                        status_message: "OK".to_string(),
                        headers: HeaderMap::new(),
                    })
                }
            }
        })
    }

    fn chunk(&mut self) -> BoxFuture<'_, Result<Option<Bytes>, TransportError>> {
        Box::pin(async move {
            match self.state.response {
                ResponseBehavior::FailBody => Err(TransportError::Closed),
                _ => Ok(self.body.pop_front()),
            }
        })
    }
}
