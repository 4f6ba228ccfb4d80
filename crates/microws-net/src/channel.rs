//! One duplex connection to a peer
//!
//! A channel owns a WebSocket and a [`Multiplexer`]. Outbound frames from the
//! multiplexer and inbound messages from the socket are pumped by a single
//! task, so every frame for a connection is handled in arrival order.

use crate::{RouteTable, TransportError};
use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use microws_proto::{status, Call, CallPayload, Exception, Executor, Frame, FrameCodec, Multiplexer, ProtocolError};
use serde_json::Value;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};
use uuid::Uuid;

/// Which side opened the connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Accepted by our listener
    Inbound,
    /// Dialed by us
    Outbound,
}

/// A live connection to one peer
pub struct Channel {
    id: String,
    host: String,
    direction: Direction,
    mux: Multiplexer,
    closing: CancellationToken,
    closed: AtomicBool,
    adopted: AtomicBool,
    released: AtomicBool,
}

impl fmt::Debug for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Channel")
            .field("id", &self.id)
            .field("host", &self.host)
            .field("direction", &self.direction)
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Executor that routes inbound calls into the procedure table
struct Dispatch {
    channel: Weak<Channel>,
    routes: Arc<RouteTable>,
}

#[async_trait]
impl Executor for Dispatch {
    async fn exec(&self, data: Value) -> Result<Value, Exception> {
        let call: CallPayload = serde_json::from_value(data).map_err(|e| {
            Exception::new(status::BAD_REQUEST, format!("Invalid call payload: {}", e))
        })?;

        let procedure = self.routes.lookup(&call.protocol, &call.cmd).await.ok_or_else(|| {
            Exception::new(
                status::UNBOUND,
                format!("Cannot find the url '{}:/{}'", call.protocol, call.cmd),
            )
        })?;

        let channel = self
            .channel
            .upgrade()
            .ok_or_else(|| Exception::abort_with("Channel closed"))?;

        trace!("[{}] Executing {}:{}", channel.id, call.protocol, call.cmd);
        procedure.call(channel, call.props).await
    }
}

impl Channel {
    /// Wrap an established WebSocket and start pumping it
    ///
    /// `on_close` runs once, after the socket is gone and every pending call
    /// has been rejected.
    pub fn open<S, F>(
        host: impl Into<String>,
        direction: Direction,
        ws: WebSocketStream<S>,
        routes: Arc<RouteTable>,
        codec: FrameCodec,
        on_close: F,
    ) -> Arc<Self>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
        F: FnOnce(Arc<Channel>) + Send + 'static,
    {
        let mut outbound = None;
        let channel = Arc::new_cyclic(|weak| {
            let executor = Arc::new(Dispatch {
                channel: weak.clone(),
                routes,
            });
            let (mux, frames) = Multiplexer::new(executor);
            outbound = Some(frames);
            Channel {
                id: format!("ws-{}", Uuid::new_v4()),
                host: host.into(),
                direction,
                mux,
                closing: CancellationToken::new(),
                closed: AtomicBool::new(false),
                adopted: AtomicBool::new(false),
                released: AtomicBool::new(false),
            }
        });
        let frames = outbound.expect("new_cyclic runs its initializer");

        debug!("[{}] Opened {:?} channel to {}", channel.id, direction, channel.host);
        tokio::spawn(Arc::clone(&channel).pump(ws, frames, codec, on_close));
        channel
    }

    /// Unique channel identifier
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Peer identity this channel is keyed under
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Which side opened the connection
    pub fn direction(&self) -> Direction {
        self.direction
    }

    /// Whether the channel is closed or closing
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst) || self.closing.is_cancelled()
    }

    /// Issue a call to `protocol:cmd` on the peer
    pub async fn fetch(
        &self,
        protocol: &str,
        cmd: &str,
        props: Vec<Value>,
        timeout: Duration,
    ) -> Result<Call, TransportError> {
        if self.is_closed() {
            return Err(ProtocolError::ChannelClosed.into());
        }
        let payload = serde_json::to_value(CallPayload::new(protocol, cmd, props))?;
        Ok(self.mux.send(payload, timeout).await?)
    }

    /// Close the connection; calling it again does nothing
    pub fn disconnect(&self) {
        if !self.closing.is_cancelled() {
            debug!("[{}] Disconnecting from {}", self.id, self.host);
            self.closing.cancel();
        }
    }

    /// Calls waiting for a response on this channel
    pub async fn inflight_count(&self) -> usize {
        self.mux.inflight_count().await
    }

    /// The owning fabric has recorded this channel and announced it
    pub(crate) fn mark_adopted(&self) {
        self.adopted.store(true, Ordering::SeqCst);
    }

    pub(crate) fn is_adopted(&self) -> bool {
        self.adopted.load(Ordering::SeqCst)
    }

    /// True for the first caller only
    pub(crate) fn begin_release(&self) -> bool {
        !self.released.swap(true, Ordering::SeqCst)
    }

    async fn pump<S, F>(
        self: Arc<Self>,
        ws: WebSocketStream<S>,
        mut frames: mpsc::UnboundedReceiver<Frame>,
        codec: FrameCodec,
        on_close: F,
    ) where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
        F: FnOnce(Arc<Channel>) + Send + 'static,
    {
        let (mut sink, mut stream) = ws.split();

        loop {
            tokio::select! {
                _ = self.closing.cancelled() => break,
                frame = frames.recv() => {
                    let Some(frame) = frame else { break };
                    let text = match codec.encode_frame(&frame) {
                        Ok(text) => text,
                        Err(e) => {
                            warn!("[{}] Dropping frame {}: {}", self.id, frame.id, e);
                            continue;
                        }
                    };
                    if let Err(e) = sink.send(Message::Text(text)).await {
                        debug!("[{}] Write failed: {}", self.id, e);
                        break;
                    }
                }
                message = stream.next() => match message {
                    Some(Ok(Message::Text(text))) => self.deliver(codec.decode_text(&text)).await,
                    Some(Ok(Message::Binary(bytes))) => self.deliver(codec.decode_bytes(&bytes)).await,
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        debug!("[{}] Read failed: {}", self.id, e);
                        break;
                    }
                },
            }
        }

        let _ = sink.close().await;
        self.closed.store(true, Ordering::SeqCst);
        self.closing.cancel();
        self.mux.shutdown().await;
        debug!("[{}] Channel to {} closed", self.id, self.host);
        on_close(self);
    }

    async fn deliver(&self, frame: Result<Frame, ProtocolError>) {
        match frame {
            Ok(frame) => self.mux.receive(frame).await,
            Err(e) => trace!("[{}] Dropping malformed message: {}", self.id, e),
        }
    }
}

#[cfg(test)]
mod tests;
