//! Listener, channel table and outbound dialing
//!
//! A [`Fabric`] keeps at most one indexed channel per peer identity. Inbound
//! connections announce their identity in the upgrade path
//! (`/<host>/<port>`), so a peer that dials us can later be reached through
//! the same socket. Outbound dials are single-flight: concurrent
//! [`Fabric::acquire`] calls for one host share a single handshake.

use crate::{Channel, Direction, Procedure, RouteTable, TransportError};
use microws_proto::codec::MAX_FRAME_SIZE;
use microws_proto::FrameCodec;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{oneshot, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::WebSocketStream;
use tracing::{debug, info, warn};

/// Fabric configuration
#[derive(Debug, Clone)]
pub struct FabricConfig {
    /// Interface the listener binds to
    pub listen_host: String,
    /// Host this node announces to peers it dials
    pub announce_host: String,
    /// Upper bound on one outbound dial including the handshake
    pub connect_timeout: Duration,
    /// Largest text or binary message accepted
    pub max_frame_size: usize,
}

impl Default for FabricConfig {
    fn default() -> Self {
        Self {
            listen_host: "0.0.0.0".to_string(),
            announce_host: "127.0.0.1".to_string(),
            connect_timeout: Duration::from_secs(10),
            max_frame_size: MAX_FRAME_SIZE,
        }
    }
}

/// Handle returned by [`Fabric::subscribe`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObserverId(u64);

/// Receives channel lifecycle events
///
/// Every channel the fabric adopts, indexed or not, produces exactly one
/// connect and one disconnect. Callbacks run on the fabric's tasks and must
/// not block.
pub trait FabricObserver: Send + Sync + 'static {
    /// A channel was adopted
    fn on_connect(&self, _channel: &Arc<Channel>) {}

    /// An adopted channel closed
    fn on_disconnect(&self, _channel: &Arc<Channel>) {}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ConnectStatus {
    Idle,
    Connecting,
}

type DialOutcome = Result<Arc<Channel>, String>;

/// Dial in progress for one host
struct Connecting {
    status: ConnectStatus,
    waiters: Vec<oneshot::Sender<DialOutcome>>,
}

impl Connecting {
    fn new() -> Self {
        Self {
            status: ConnectStatus::Idle,
            waiters: Vec::new(),
        }
    }
}

/// Connection fabric of one node
pub struct Fabric {
    config: FabricConfig,
    codec: FrameCodec,
    routes: Arc<RouteTable>,
    announced: RwLock<Option<(String, u16)>>,
    local_addr: RwLock<Option<SocketAddr>>,
    channels: RwLock<HashMap<String, Arc<Channel>>>,
    strays: RwLock<HashMap<String, Arc<Channel>>>,
    connecting: Mutex<HashMap<String, Connecting>>,
    observers: RwLock<Vec<(ObserverId, Arc<dyn FabricObserver>)>>,
    next_observer: AtomicU64,
    accept_task: Mutex<Option<JoinHandle<()>>>,
    closed: AtomicBool,
}

impl std::fmt::Debug for Fabric {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Fabric")
            .field("config", &self.config)
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl Fabric {
    /// Create a fabric that is not listening yet
    pub fn new(config: FabricConfig) -> Arc<Self> {
        let codec = FrameCodec::with_max_frame_size(config.max_frame_size);
        Arc::new(Self {
            config,
            codec,
            routes: Arc::new(RouteTable::new()),
            announced: RwLock::new(None),
            local_addr: RwLock::new(None),
            channels: RwLock::new(HashMap::new()),
            strays: RwLock::new(HashMap::new()),
            connecting: Mutex::new(HashMap::new()),
            observers: RwLock::new(Vec::new()),
            next_observer: AtomicU64::new(1),
            accept_task: Mutex::new(None),
            closed: AtomicBool::new(false),
        })
    }

    /// Fabric configuration
    pub fn config(&self) -> &FabricConfig {
        &self.config
    }

    /// Procedures served to every channel of this fabric
    pub fn routes(&self) -> &Arc<RouteTable> {
        &self.routes
    }

    /// Register a procedure under `protocol:cmd`
    pub async fn bind(
        &self,
        protocol: &str,
        cmd: &str,
        procedure: Arc<dyn Procedure>,
    ) -> Result<(), TransportError> {
        self.routes.bind(protocol, cmd, procedure).await
    }

    /// Start accepting connections on `port` (0 picks a free one)
    pub async fn listen(self: &Arc<Self>, port: u16) -> Result<SocketAddr, TransportError> {
        if self.is_closed() {
            return Err(TransportError::Closed);
        }

        let listener = TcpListener::bind((self.config.listen_host.as_str(), port)).await?;
        let local_addr = listener.local_addr()?;

        *self.announced.write().await = Some((self.config.announce_host.clone(), local_addr.port()));
        *self.local_addr.write().await = Some(local_addr);

        let handle = tokio::spawn(Self::accept_loop(listener, Arc::downgrade(self)));
        if let Some(previous) = self.accept_task.lock().await.replace(handle) {
            previous.abort();
        }

        info!("Fabric listening on ws://{}", local_addr);
        Ok(local_addr)
    }

    /// Address the listener is bound to
    pub async fn local_addr(&self) -> Option<SocketAddr> {
        *self.local_addr.read().await
    }

    /// `host:port` this node announces, once listening
    pub async fn identity(&self) -> Option<String> {
        self.announced
            .read()
            .await
            .as_ref()
            .map(|(host, port)| format!("{}:{}", host, port))
    }

    /// Live channel for `host`, if one is indexed
    pub async fn channel(&self, host: &str) -> Option<Arc<Channel>> {
        self.channels
            .read()
            .await
            .get(host)
            .filter(|channel| !channel.is_closed())
            .cloned()
    }

    /// Snapshot of every indexed channel
    pub async fn channels(&self) -> Vec<Arc<Channel>> {
        self.channels.read().await.values().cloned().collect()
    }

    /// Return the live channel for `host`, dialing it if needed
    ///
    /// Concurrent callers for the same host wait on one dial and all observe
    /// its outcome.
    pub async fn acquire(self: &Arc<Self>, host: &str) -> Result<Arc<Channel>, TransportError> {
        if self.is_closed() {
            return Err(TransportError::Closed);
        }
        if let Some(channel) = self.channel(host).await {
            return Ok(channel);
        }

        let outcome = {
            let mut connecting = self.connecting.lock().await;
            // A dial may have finished between the lookup and the lock
            if let Some(channel) = self.channel(host).await {
                return Ok(channel);
            }

            let state = connecting.entry(host.to_string()).or_insert_with(Connecting::new);
            let (tx, rx) = oneshot::channel();
            state.waiters.push(tx);

            if state.status == ConnectStatus::Idle {
                state.status = ConnectStatus::Connecting;
                tokio::spawn(Arc::clone(self).settle_dial(host.to_string()));
            } else {
                debug!("Joining dial in progress to {}", host);
            }
            rx
        };

        match outcome.await {
            Ok(Ok(channel)) => Ok(channel),
            Ok(Err(message)) => Err(TransportError::Connection(message)),
            Err(_) => Err(TransportError::Connection(format!("Dial to {} was abandoned", host))),
        }
    }

    /// Register an observer for connect and disconnect events
    pub async fn subscribe(&self, observer: Arc<dyn FabricObserver>) -> ObserverId {
        let id = ObserverId(self.next_observer.fetch_add(1, Ordering::SeqCst));
        self.observers.write().await.push((id, observer));
        id
    }

    /// Remove an observer; returns whether it was registered
    pub async fn unsubscribe(&self, id: ObserverId) -> bool {
        let mut observers = self.observers.write().await;
        let before = observers.len();
        observers.retain(|(observer_id, _)| *observer_id != id);
        observers.len() != before
    }

    /// Whether [`Fabric::close`] has run
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Stop listening and disconnect every channel
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }

        if let Some(handle) = self.accept_task.lock().await.take() {
            handle.abort();
        }

        let mut channels: Vec<Arc<Channel>> = self.channels.read().await.values().cloned().collect();
        channels.extend(self.strays.read().await.values().cloned());
        for channel in channels {
            channel.disconnect();
        }

        info!("Fabric closed");
    }

    async fn accept_loop(listener: TcpListener, fabric: Weak<Fabric>) {
        loop {
            let (stream, remote_addr) = match listener.accept().await {
                Ok(accepted) => accepted,
                Err(e) => {
                    warn!("Accept failed: {}", e);
                    tokio::time::sleep(Duration::from_millis(100)).await;
                    continue;
                }
            };

            let Some(fabric) = fabric.upgrade() else {
                break;
            };
            tokio::spawn(async move {
                if let Err(e) = fabric.accept(stream, remote_addr).await {
                    debug!("Rejected connection from {}: {}", remote_addr, e);
                }
            });
        }
    }

    async fn accept(self: Arc<Self>, stream: TcpStream, remote_addr: SocketAddr) -> Result<(), TransportError> {
        let mut path = String::new();
        let capture_path = |request: &Request, response: Response| -> Result<Response, ErrorResponse> {
            path = request.uri().path().to_string();
            Ok(response)
        };
        let ws = tokio::time::timeout(
            self.config.connect_timeout,
            tokio_tungstenite::accept_hdr_async(stream, capture_path),
        )
        .await
        .map_err(|_| TransportError::Timeout(remote_addr.to_string()))??;

        let host = parse_identity(&path).unwrap_or_else(|| remote_addr.to_string());
        debug!("Accepted connection from {} as {}", remote_addr, host);
        self.adopt(host, Direction::Inbound, ws).await;
        Ok(())
    }

    async fn settle_dial(self: Arc<Self>, host: String) {
        let outcome = match tokio::time::timeout(self.config.connect_timeout, self.dial(&host)).await {
            Ok(Ok(channel)) => Ok(channel),
            Ok(Err(e)) => Err(e.to_string()),
            Err(_) => Err(TransportError::Timeout(host.clone()).to_string()),
        };
        if let Err(e) = &outcome {
            warn!("Failed to connect to {}: {}", host, e);
        }

        let state = self.connecting.lock().await.remove(&host);
        for waiter in state.into_iter().flat_map(|state| state.waiters) {
            let _ = waiter.send(outcome.clone());
        }
    }

    async fn dial(self: &Arc<Self>, host: &str) -> Result<Arc<Channel>, TransportError> {
        let path = match self.announced.read().await.as_ref() {
            Some((announce_host, port)) => format!("{}/{}", announce_host, port),
            None => String::new(),
        };
        let url = format!("ws://{}/{}", host, path);
        debug!("Dialing {}", url);

        let (ws, _) = tokio_tungstenite::connect_async(url.as_str()).await?;
        Ok(self.adopt(host.to_string(), Direction::Outbound, ws).await)
    }

    /// Wrap a socket in a channel and index it unless a live one exists
    ///
    /// Returns the channel indexed for `host` afterwards. A duplicate is still
    /// served and reported to observers, but stays out of the index until the
    /// indexed channel goes away.
    async fn adopt<S>(self: &Arc<Self>, host: String, direction: Direction, ws: WebSocketStream<S>) -> Arc<Channel>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let fabric = Arc::downgrade(self);
        let channel = Channel::open(
            host.clone(),
            direction,
            ws,
            Arc::clone(&self.routes),
            self.codec.clone(),
            move |channel| {
                if let Some(fabric) = fabric.upgrade() {
                    tokio::spawn(async move { fabric.release(channel).await });
                }
            },
        );

        let indexed = {
            let mut channels = self.channels.write().await;
            match channels.get(&host) {
                Some(existing) if !existing.is_closed() => false,
                _ => {
                    channels.insert(host.clone(), Arc::clone(&channel));
                    true
                }
            }
        };

        if indexed {
            info!("+ {} ({:?})", host, direction);
        } else {
            debug!("Serving duplicate {:?} connection from {} unindexed", direction, host);
            self.strays
                .write()
                .await
                .insert(channel.id().to_string(), Arc::clone(&channel));
        }

        channel.mark_adopted();
        for observer in self.observer_snapshot().await {
            observer.on_connect(&channel);
        }

        if self.is_closed() {
            channel.disconnect();
        }
        // The socket may have died before it was recorded; its own release
        // returned early in that case
        if channel.is_closed() {
            self.release(Arc::clone(&channel)).await;
        }

        self.channel(&host).await.unwrap_or(channel)
    }

    async fn release(&self, channel: Arc<Channel>) {
        if !channel.is_adopted() || !channel.begin_release() {
            return;
        }

        let promoted = {
            let mut channels = self.channels.write().await;
            let mut strays = self.strays.write().await;
            strays.remove(channel.id());

            let was_indexed = channels
                .get(channel.host())
                .is_some_and(|current| Arc::ptr_eq(current, &channel));
            if was_indexed {
                channels.remove(channel.host());
                let successor = strays
                    .iter()
                    .find(|(_, stray)| stray.host() == channel.host() && !stray.is_closed())
                    .map(|(id, _)| id.clone());
                successor
                    .and_then(|id| strays.remove(&id))
                    .map(|stray| {
                        channels.insert(channel.host().to_string(), Arc::clone(&stray));
                        stray
                    })
            } else {
                None
            }
        };

        info!("- {}", channel.host());
        if let Some(successor) = promoted {
            debug!("[{}] Now serving {} as its indexed channel", successor.id(), channel.host());
        }
        for observer in self.observer_snapshot().await {
            observer.on_disconnect(&channel);
        }
    }

    async fn observer_snapshot(&self) -> Vec<Arc<dyn FabricObserver>> {
        self.observers
            .read()
            .await
            .iter()
            .map(|(_, observer)| Arc::clone(observer))
            .collect()
    }
}

/// Parse an announced `/<host>/<port>` upgrade path into `host:port`
fn parse_identity(path: &str) -> Option<String> {
    let mut segments = path.trim_matches('/').split('/');
    let host = segments.next().filter(|segment| !segment.is_empty())?;
    let port: u16 = segments.next()?.parse().ok()?;
    if segments.next().is_some() {
        return None;
    }
    Some(format!("{}:{}", host, port))
}
