//! Live state of one in-flight send.
//!
//! A [`PendingSend`] owns the exchange task, the optional
//! [`TimeoutGovernor`] and the receiving end of a single-resolution slot.
//! Every party that can finish the send (the exchange, the governor)
//! goes through [`Resolver::resolve`]; the first call wins and every
//! later outcome is dropped.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::error::{ClientError, Result, TransportError};

/// Lifecycle phase of a send.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Phase {
    Connecting = 0,
    Sending = 1,
    AwaitingResponse = 2,
    Receiving = 3,
    Done = 4,
}

impl Phase {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => Phase::Connecting,
            1 => Phase::Sending,
            2 => Phase::AwaitingResponse,
            3 => Phase::Receiving,
            _ => Phase::Done,
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Phase::Connecting => "connecting",
            Phase::Sending => "sending",
            Phase::AwaitingResponse => "awaiting response",
            Phase::Receiving => "receiving",
            Phase::Done => "done",
        };
        f.write_str(s)
    }
}

/// First-writer-wins resolution slot.
///
/// The `resolved` flag is claimed with a compare-and-set before the
/// sender is taken, so racing outcomes never double-resolve.
pub(crate) struct Resolver<T> {
    resolved: AtomicBool,
    phase: AtomicU8,
    tx: Mutex<Option<oneshot::Sender<Result<T>>>>,
}

impl<T> Resolver<T> {
    pub fn new() -> (Arc<Self>, oneshot::Receiver<Result<T>>) {
        let (tx, rx) = oneshot::channel();
        let resolver = Arc::new(Self {
            resolved: AtomicBool::new(false),
            phase: AtomicU8::new(Phase::Connecting as u8),
            tx: Mutex::new(Some(tx)),
        });
        (resolver, rx)
    }

    /// Deliver `outcome` if nothing was delivered yet.
    ///
    /// Returns `true` if this call resolved the send.
    pub fn resolve(&self, outcome: Result<T>) -> bool {
        if self
            .resolved
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            match &outcome {
                Err(e) => debug!(error = %e, "discarding failure for already-resolved send"),
                Ok(_) => debug!("discarding success for already-resolved send"),
            }
            return false;
        }

        self.phase.store(Phase::Done as u8, Ordering::Release);
        let tx = self
            .tx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(tx) = tx {
            // The caller may have dropped its pending future; nothing to deliver to.
            let _ = tx.send(outcome);
        }
        true
    }

    pub fn is_resolved(&self) -> bool {
        self.resolved.load(Ordering::Acquire)
    }

    pub fn phase(&self) -> Phase {
        Phase::from_u8(self.phase.load(Ordering::Acquire))
    }

    /// Record a phase transition. Ignored once the send is resolved.
    pub fn set_phase(&self, phase: Phase) {
        if !self.is_resolved() {
            self.phase.store(phase as u8, Ordering::Release);
        }
    }
}

/// Signals cancellation to an exchange.
pub(crate) struct CancelHandle {
    tx: watch::Sender<bool>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }
}

/// Observes cancellation from a [`CancelHandle`].
pub(crate) struct CancelToken {
    rx: watch::Receiver<bool>,
}

impl CancelToken {
    /// Resolves once cancellation is requested.
    ///
    /// A dropped handle means cancellation can no longer happen, so the
    /// future then stays pending forever.
    pub async fn cancelled(&mut self) {
        loop {
            if *self.rx.borrow_and_update() {
                return;
            }
            if self.rx.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }
}

pub(crate) fn cancel_pair() -> (CancelHandle, CancelToken) {
    let (tx, rx) = watch::channel(false);
    (CancelHandle { tx }, CancelToken { rx })
}

/// Per-send deadline.
///
/// When the deadline passes first it resolves the send with
/// [`ClientError::Timeout`] and cancels the exchange, which closes the
/// connection. Dropping or disarming the governor stops the timer.
pub(crate) struct TimeoutGovernor {
    timer: JoinHandle<()>,
}

impl TimeoutGovernor {
    pub fn arm<T: Send + 'static>(
        after: Duration,
        resolver: Arc<Resolver<T>>,
        cancel: CancelHandle,
    ) -> Self {
        let timer = tokio::spawn(async move {
            tokio::time::sleep(after).await;
            let phase = resolver.phase();
            if resolver.resolve(Err(ClientError::Timeout { after, phase })) {
                warn!(
                    timeout_ms = after.as_millis() as u64,
                    %phase,
                    "request timed out"
                );
                cancel.cancel();
            }
        });
        Self { timer }
    }

    pub fn disarm(&self) {
        self.timer.abort();
    }
}

impl Drop for TimeoutGovernor {
    fn drop(&mut self) {
        self.timer.abort();
    }
}

/// Handle to one in-flight send.
///
/// Obtained from [`HttpRequest::dispatch`](crate::HttpRequest::dispatch).
/// Await the outcome with [`wait()`](PendingSend::wait). Dropping the
/// handle abandons the send: the exchange task is aborted, which closes
/// the connection and drops the body source.
pub struct PendingSend<T> {
    outcome: oneshot::Receiver<Result<T>>,
    resolver: Arc<Resolver<T>>,
    exchange: JoinHandle<()>,
    governor: Option<TimeoutGovernor>,
}

impl<T> PendingSend<T> {
    pub(crate) fn new(
        outcome: oneshot::Receiver<Result<T>>,
        resolver: Arc<Resolver<T>>,
        exchange: JoinHandle<()>,
        governor: Option<TimeoutGovernor>,
    ) -> Self {
        Self {
            outcome,
            resolver,
            exchange,
            governor,
        }
    }

    /// Current phase of the exchange.
    pub fn phase(&self) -> Phase {
        self.resolver.phase()
    }

    /// Wait for the single terminal outcome of the send.
    ///
    /// If the exchange task dies without resolving (a panicking custom
    /// codec, for instance) the send fails with
    /// [`TransportError::TaskFailed`] instead of waiting forever.
    pub async fn wait(mut self) -> Result<T> {
        let outcome = tokio::select! {
            biased;
            outcome = &mut self.outcome => outcome,
            joined = &mut self.exchange => {
                if !self.resolver.is_resolved() {
                    let reason = match joined {
                        Err(e) if e.is_panic() => "panicked",
                        Err(_) => "was cancelled",
                        Ok(()) => "ended without an outcome",
                    };
                    warn!(phase = %self.resolver.phase(), "exchange task {reason}");
                    self.resolver.resolve(Err(ClientError::Interrupted(
                        TransportError::TaskFailed(format!("exchange task {reason}")),
                    )));
                }
                (&mut self.outcome).await
            }
        };
        if let Some(governor) = &self.governor {
            governor.disarm();
        }
        outcome.unwrap_or(Err(ClientError::Interrupted(TransportError::Closed)))
    }
}

impl<T> Drop for PendingSend<T> {
    fn drop(&mut self) {
        self.exchange.abort();
    }
}
