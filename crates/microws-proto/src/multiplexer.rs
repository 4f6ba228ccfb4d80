//! Request/response/abort multiplexing
//!
//! A [`Multiplexer`] turns "post one frame / receive one frame" into a call
//! interface. It never touches a socket: outbound frames are handed to the
//! receiver returned by [`Multiplexer::new`], and the transport feeds inbound
//! frames to [`Multiplexer::receive`]. Each instance owns its own id space.

use crate::{Exception, Frame, Mode, ProtocolError, ResponseEnvelope};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

/// Default time a caller waits before sending an abort
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(30_000);

/// Ids wrap to zero before reaching this value
pub const MAX_SAFE_ID: u64 = (1 << 53) - 1;

/// Callee side of the multiplexer: runs the data of an inbound REQUEST
#[async_trait]
pub trait Executor: Send + Sync + 'static {
    /// Execute a request payload and produce the response data
    async fn exec(&self, data: Value) -> Result<Value, Exception>;
}

type Settle = oneshot::Sender<Result<Value, Exception>>;

/// Id counter and in-flight table, guarded together
struct Correlation {
    next_id: u64,
    inflight: HashMap<u64, Settle>,
}

impl Correlation {
    fn new() -> Self {
        Self {
            next_id: 0,
            inflight: HashMap::new(),
        }
    }

    /// Next id not currently outstanding
    fn allocate(&mut self) -> u64 {
        loop {
            let id = self.next_id;
            self.next_id += 1;
            if self.next_id >= MAX_SAFE_ID {
                self.next_id = 0;
            }
            if !self.inflight.contains_key(&id) {
                return id;
            }
        }
    }
}

struct Shared {
    /// Never held across an await, so [`AbortHandle::abort`] can stay sync
    correlation: std::sync::Mutex<Correlation>,
    /// Abort triggers of executions still running, by request id
    executions: Mutex<HashMap<u64, CancellationToken>>,
    outlet: mpsc::UnboundedSender<Frame>,
    executor: Arc<dyn Executor>,
    /// Parent of every execution trigger; cancelled on shutdown
    closing: CancellationToken,
}

/// Correlation-based request multiplexer
#[derive(Clone)]
pub struct Multiplexer {
    shared: Arc<Shared>,
}

impl std::fmt::Debug for Multiplexer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Multiplexer")
            .field("closed", &self.shared.closing.is_cancelled())
            .finish()
    }
}

impl Multiplexer {
    /// Create a multiplexer and the stream of frames it wants posted
    pub fn new(executor: Arc<dyn Executor>) -> (Self, mpsc::UnboundedReceiver<Frame>) {
        let (outlet, frames) = mpsc::unbounded_channel();
        let mux = Self {
            shared: Arc::new(Shared {
                correlation: std::sync::Mutex::new(Correlation::new()),
                executions: Mutex::new(HashMap::new()),
                outlet,
                executor,
                closing: CancellationToken::new(),
            }),
        };
        (mux, frames)
    }

    /// Post a REQUEST and return the pending call
    ///
    /// The frame is posted immediately; the outcome is collected with
    /// [`Call::response`].
    pub async fn send(&self, data: Value, timeout: Duration) -> Result<Call, ProtocolError> {
        let (settle, settled) = oneshot::channel();
        let id = {
            let mut correlation = self.correlation();
            if self.shared.closing.is_cancelled() {
                return Err(ProtocolError::ChannelClosed);
            }
            // Calls dropped without awaiting leave closed senders behind
            correlation.inflight.retain(|_, settle| !settle.is_closed());
            let id = correlation.allocate();
            correlation.inflight.insert(id, settle);
            id
        };

        if let Err(e) = self.post(Frame::request(id, data)) {
            self.forget(id);
            return Err(e);
        }
        trace!("Posted request {}", id);

        Ok(Call {
            id,
            timeout,
            settled,
            abort: AbortHandle::new(self.clone(), id),
        })
    }

    /// Dispatch an inbound frame by mode
    pub async fn receive(&self, frame: Frame) {
        match frame.mode {
            Mode::Request => self.on_request(frame).await,
            Mode::Response => self.on_response(frame).await,
            Mode::Abort => self.on_abort(frame).await,
        }
    }

    /// Reject every in-flight call and abort every running execution
    pub async fn shutdown(&self) {
        self.shared.closing.cancel();
        let drained: Vec<(u64, Settle)> = self.correlation().inflight.drain().collect();
        if !drained.is_empty() {
            debug!("Rejecting {} in-flight requests on shutdown", drained.len());
        }
        for (_, settle) in drained {
            let _ = settle.send(Err(Exception::abort_with("Channel closed")));
        }
    }

    /// Whether [`Multiplexer::shutdown`] has run
    pub fn is_closed(&self) -> bool {
        self.shared.closing.is_cancelled()
    }

    /// Number of requests awaiting a response
    pub async fn inflight_count(&self) -> usize {
        self.correlation().inflight.len()
    }

    /// Number of inbound requests still executing
    pub async fn execution_count(&self) -> usize {
        self.shared.executions.lock().await.len()
    }

    fn post(&self, frame: Frame) -> Result<(), ProtocolError> {
        self.shared.outlet.send(frame)
            .map_err(|_| ProtocolError::ChannelClosed)
    }

    fn correlation(&self) -> MutexGuard<'_, Correlation> {
        self.shared
            .correlation
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn post_abort(&self, target: u64) {
        let id = self.correlation().allocate();
        if let Err(e) = self.post(Frame::abort(id, target)) {
            debug!("Could not post abort for request {}: {}", target, e);
        }
    }

    fn forget(&self, id: u64) {
        self.correlation().inflight.remove(&id);
    }

    /// Settle `target` with an abort and tell the peer, if it is still pending
    fn abandon(&self, target: u64) {
        let Some(settle) = self.correlation().inflight.remove(&target) else {
            return;
        };
        let _ = settle.send(Err(Exception::abort()));
        debug!("Request {} aborted", target);
        self.post_abort(target);
    }

    async fn on_request(&self, frame: Frame) {
        let Frame { id, twoway, data, .. } = frame;
        let trigger = self.shared.closing.child_token();
        self.shared.executions.lock().await.insert(id, trigger.clone());

        let shared = Arc::clone(&self.shared);
        tokio::spawn(async move {
            let outcome = tokio::select! {
                result = shared.executor.exec(data) => Some(result),
                _ = trigger.cancelled() => None,
            };
            shared.executions.lock().await.remove(&id);

            let envelope = match outcome {
                None => {
                    debug!("Execution of request {} aborted", id);
                    return;
                }
                Some(Err(e)) if e.is_abort() => {
                    debug!("Execution of request {} ended with abort", id);
                    return;
                }
                Some(_) if !twoway => return,
                Some(Ok(value)) => ResponseEnvelope::ok(value),
                Some(Err(e)) => {
                    debug!("Execution of request {} failed: {}", id, e);
                    ResponseEnvelope::error(&e)
                }
            };

            let data = match serde_json::to_value(&envelope) {
                Ok(data) => data,
                Err(e) => {
                    warn!("Failed to encode response for request {}: {}", id, e);
                    return;
                }
            };
            if shared.outlet.send(Frame::response(id, data)).is_err() {
                debug!("Channel closed before response {} was posted", id);
            }
        });
    }

    async fn on_response(&self, frame: Frame) {
        let envelope = match serde_json::from_value::<ResponseEnvelope>(frame.data) {
            Ok(envelope) => envelope,
            Err(e) => {
                trace!("Dropping malformed response {}: {}", frame.id, e);
                return;
            }
        };

        let settle = self.correlation().inflight.remove(&frame.id);
        match settle {
            Some(settle) => {
                let _ = settle.send(envelope.into_result());
            }
            None => trace!("Dropping response for unknown request {}", frame.id),
        }
    }

    async fn on_abort(&self, frame: Frame) {
        let Some(target) = frame.abort_target() else {
            trace!("Dropping abort frame {} without a target", frame.id);
            return;
        };
        if let Some(trigger) = self.shared.executions.lock().await.get(&target) {
            debug!("Aborting execution of request {}", target);
            trigger.cancel();
        }
    }
}

/// Clonable trigger that aborts a pending [`Call`]
#[derive(Debug, Clone)]
pub struct AbortHandle {
    id: u64,
    token: CancellationToken,
    mux: Multiplexer,
}

impl AbortHandle {
    fn new(mux: Multiplexer, id: u64) -> Self {
        Self {
            id,
            token: CancellationToken::new(),
            mux,
        }
    }

    /// Abort the call; the response settles with an abort exception
    ///
    /// The in-flight entry is dropped and an ABORT frame posted at once, so a
    /// RESPONSE arriving afterwards is discarded as unknown.
    pub fn abort(&self) {
        self.token.cancel();
        self.mux.abandon(self.id);
    }

    /// Whether abort was requested
    pub fn is_aborted(&self) -> bool {
        self.token.is_cancelled()
    }
}

/// A request that has been posted and awaits its outcome
#[derive(Debug)]
pub struct Call {
    id: u64,
    timeout: Duration,
    settled: oneshot::Receiver<Result<Value, Exception>>,
    abort: AbortHandle,
}

impl Call {
    /// Correlation id of the request
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Handle that can abort this call from elsewhere
    pub fn abort_handle(&self) -> AbortHandle {
        self.abort.clone()
    }

    /// Abort this call
    pub fn abort(&self) {
        self.abort.abort();
    }

    /// Wait for the outcome
    ///
    /// When the timeout elapses an ABORT is posted and the peer gets one more
    /// timeout period to answer; only then does the call fail with
    /// [`Exception::timeout`]. An explicit abort fails with
    /// [`Exception::abort`] right away.
    pub async fn response(mut self) -> Result<Value, Exception> {
        let timer = tokio::time::sleep(self.timeout);
        tokio::pin!(timer);
        tokio::select! {
            biased;
            _ = self.abort.token.cancelled() => return Err(Exception::abort()),
            settled = &mut self.settled => return Self::settle(settled),
            _ = &mut timer => {}
        }

        debug!("Request {} timed out, posting abort", self.id);
        self.abort.mux.post_abort(self.id);

        let grace = tokio::time::sleep(self.timeout);
        tokio::pin!(grace);
        tokio::select! {
            biased;
            _ = self.abort.token.cancelled() => Err(Exception::abort()),
            settled = &mut self.settled => Self::settle(settled),
            _ = &mut grace => {
                self.abort.mux.forget(self.id);
                Err(Exception::timeout())
            }
        }
    }

    fn settle(
        settled: Result<Result<Value, Exception>, oneshot::error::RecvError>,
    ) -> Result<Value, Exception> {
        settled.unwrap_or_else(|_| Err(Exception::abort_with("Channel closed")))
    }
}
