//! The agent: registry announcement, namespace resolution, outbound calls
//! and inbound service binding
//!
//! An [`Agent`] is cheap to clone; every clone drives the same fabric.

use crate::{AgentConfig, AgentError, Container, Context, Result, Service};
use microws_net::address::{normalize_cmd, SCHEME};
use microws_net::{detect_port, Address, Channel, Fabric, FabricConfig, FabricObserver, ObserverId};
use microws_proto::directory as commands;
use microws_proto::{status, Exception};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

struct AgentInner {
    config: AgentConfig,
    fabric: Arc<Fabric>,
    container: Arc<Container>,
    /// namespace -> channel serving it
    cache: Mutex<HashMap<String, Arc<Channel>>>,
    observer: Mutex<Option<ObserverId>>,
    shutdown: CancellationToken,
    reconnecting: AtomicBool,
}

/// Client-side facade over a fabric and the registry
#[derive(Clone)]
pub struct Agent {
    inner: Arc<AgentInner>,
}

impl std::fmt::Debug for Agent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Agent")
            .field("namespace", &self.inner.config.namespace)
            .field("registry", &self.inner.config.registry)
            .finish()
    }
}

/// Reacts to channel loss on behalf of an agent
struct Watch {
    agent: Weak<AgentInner>,
}

impl FabricObserver for Watch {
    fn on_disconnect(&self, channel: &Arc<Channel>) {
        let Some(inner) = self.agent.upgrade() else {
            return;
        };
        let channel = Arc::clone(channel);
        tokio::spawn(async move { Agent { inner }.on_channel_lost(channel).await });
    }
}

impl Agent {
    /// Create an agent with an empty container
    pub fn new(config: AgentConfig) -> Self {
        Self::with_container(config, Container::new())
    }

    /// Create an agent whose services are built from `container`
    pub fn with_container(config: AgentConfig, container: Container) -> Self {
        let fabric = Fabric::new(FabricConfig {
            listen_host: config.listen_host.clone(),
            announce_host: config.host.clone(),
            connect_timeout: config.connect_timeout,
            ..FabricConfig::default()
        });

        Self {
            inner: Arc::new(AgentInner {
                config,
                fabric,
                container: Arc::new(container),
                cache: Mutex::new(HashMap::new()),
                observer: Mutex::new(None),
                shutdown: CancellationToken::new(),
                reconnecting: AtomicBool::new(false),
            }),
        }
    }

    /// Agent configuration
    pub fn config(&self) -> &AgentConfig {
        &self.inner.config
    }

    /// Underlying connection fabric
    pub fn fabric(&self) -> &Arc<Fabric> {
        &self.inner.fabric
    }

    /// Container services are created from
    pub fn container(&self) -> &Arc<Container> {
        &self.inner.container
    }

    /// `host:port` this agent announces, once initialized
    pub async fn local_host(&self) -> Option<String> {
        self.inner.fabric.identity().await
    }

    /// Start listening, then announce the namespace to the registry
    pub async fn initialize(&self) -> Result<()> {
        let config = &self.inner.config;
        config.validate()?;

        let port = detect_port(&config.listen_host, config.port).await?;
        if config.port != 0 && port != config.port {
            warn!("Port {} is taken, listening on {} instead", config.port, port);
        }
        self.inner.fabric.listen(port).await?;

        let observer = self
            .inner
            .fabric
            .subscribe(Arc::new(Watch {
                agent: Arc::downgrade(&self.inner),
            }))
            .await;
        if let Some(previous) = self.inner.observer.lock().await.replace(observer) {
            self.inner.fabric.unsubscribe(previous).await;
        }

        self.announce().await?;

        let host = self.local_host().await.unwrap_or_default();
        info!(
            "Agent '{}' ready on ws://{} (registry {})",
            config.namespace, host, config.registry
        );
        Ok(())
    }

    /// Channel serving `namespace`, resolved through the registry on a miss
    pub async fn where_namespace(&self, namespace: &str) -> Result<Arc<Channel>> {
        if let Some(channel) = self.cached(namespace).await {
            return Ok(channel);
        }

        let registry = self
            .inner
            .fabric
            .channel(&self.inner.config.registry)
            .await
            .ok_or_else(|| AgentError::DirectoryUnavailable {
                registry: self.inner.config.registry.clone(),
            })?;

        let reply = registry
            .fetch(
                commands::PROTOCOL,
                commands::WHERE,
                vec![Value::from(namespace)],
                self.inner.config.request_timeout,
            )
            .await?
            .response()
            .await?;

        let Value::String(host) = reply else {
            return Err(AgentError::NotFound {
                namespace: namespace.to_string(),
            });
        };

        let channel = self.inner.fabric.acquire(&host).await?;
        debug!("Resolved namespace {} -> {}", namespace, host);
        self.inner
            .cache
            .lock()
            .await
            .insert(namespace.to_string(), Arc::clone(&channel));
        Ok(channel)
    }

    /// Memoized live channel for `namespace`
    pub async fn cached(&self, namespace: &str) -> Option<Arc<Channel>> {
        self.inner
            .cache
            .lock()
            .await
            .get(namespace)
            .filter(|channel| !channel.is_closed())
            .cloned()
    }

    /// Call `ws://<namespace>/<cmd>` with `args` as props
    ///
    /// `timeout` defaults to the configured request timeout.
    pub async fn fetch(&self, address: &str, args: Vec<Value>, timeout: Option<Duration>) -> Result<Value> {
        let address = Address::parse(address)?;
        let channel = self.where_namespace(&address.namespace).await?;
        let timeout = timeout.unwrap_or(self.inner.config.request_timeout);

        let call = channel.fetch(SCHEME, &address.cmd, args, timeout).await?;
        debug!("Call {} -> {} (id {})", address, channel.host(), call.id());
        Ok(call.response().await?)
    }

    /// Serve `S` under `cmd` (`"sum"` and `"/sum"` are the same command)
    pub async fn bind<S: Service>(&self, cmd: &str) -> Result<()> {
        let cmd = normalize_cmd(cmd);
        let agent = Arc::downgrade(&self.inner);

        let procedure = move |channel: Arc<Channel>, props: Vec<Value>| {
            let agent = agent.clone();
            async move {
                let inner = agent
                    .upgrade()
                    .ok_or_else(|| Exception::abort_with("Agent terminated"))?;
                Agent { inner }.invoke::<S>(channel, props).await
            }
        };
        self.inner.fabric.bind(SCHEME, &cmd, Arc::new(procedure)).await?;

        debug!("Bound {}://{}{}", SCHEME, self.inner.config.namespace, cmd);
        Ok(())
    }

    /// Stop reconnecting, close every channel and release the container
    pub async fn terminate(&self) {
        if self.inner.shutdown.is_cancelled() {
            return;
        }
        self.inner.shutdown.cancel();

        if let Some(observer) = self.inner.observer.lock().await.take() {
            self.inner.fabric.unsubscribe(observer).await;
        }
        self.inner.cache.lock().await.clear();
        self.inner.fabric.close().await;
        self.inner.container.clear();

        info!("Agent '{}' terminated", self.inner.config.namespace);
    }

    async fn invoke<S: Service>(self, channel: Arc<Channel>, props: Vec<Value>) -> std::result::Result<Value, Exception> {
        let service = S::create(&self.inner.container)?;
        let args: S::Args = serde_json::from_value(Value::Array(props))
            .map_err(|e| Exception::new(status::BAD_REQUEST, format!("Invalid arguments: {}", e)))?;

        let context = Context::new(channel, self);
        let output = service.exec(&context, args).await?;
        serde_json::to_value(output)
            .map_err(|e| Exception::internal(format!("Unserializable result: {}", e)))
    }

    /// Dial the registry and announce our namespace
    async fn announce(&self) -> Result<()> {
        let config = &self.inner.config;
        let registry = self.inner.fabric.acquire(&config.registry).await?;
        registry
            .fetch(
                commands::PROTOCOL,
                commands::ONLINE,
                vec![Value::from(config.namespace.as_str())],
                config.request_timeout,
            )
            .await?
            .response()
            .await?;

        info!("Announced '{}' to registry {}", config.namespace, config.registry);
        Ok(())
    }

    async fn on_channel_lost(self, channel: Arc<Channel>) {
        if self.inner.shutdown.is_cancelled() {
            return;
        }

        if channel.host() == self.inner.config.registry {
            warn!("Lost registry {}", channel.host());
            // Entries resolved before the loss may be stale
            self.inner.cache.lock().await.clear();
            self.spawn_reconnect();
            return;
        }

        let mut cache = self.inner.cache.lock().await;
        cache.retain(|namespace, cached| {
            let stale = Arc::ptr_eq(cached, &channel) || cached.host() == channel.host();
            if stale {
                debug!("Evicting namespace {} ({})", namespace, channel.host());
            }
            !stale
        });
    }

    fn spawn_reconnect(&self) {
        if self.inner.reconnecting.swap(true, Ordering::SeqCst) {
            debug!("Registry reconnect already running");
            return;
        }

        let agent = self.clone();
        tokio::spawn(async move {
            let recovered = agent.reconnect().await;
            agent.inner.reconnecting.store(false, Ordering::SeqCst);

            // The fresh link may have dropped before the flag was cleared
            if recovered
                && !agent.inner.shutdown.is_cancelled()
                && agent.inner.fabric.channel(&agent.inner.config.registry).await.is_none()
            {
                agent.spawn_reconnect();
            }
        });
    }

    async fn reconnect(&self) -> bool {
        let config = &self.inner.config;
        let policy = &config.reconnect;

        for attempt in 0..policy.max_attempts {
            let delay = policy.delay_for(attempt);
            debug!(
                "Reconnecting to registry {} in {:?} (attempt {}/{})",
                config.registry,
                delay,
                attempt + 1,
                policy.max_attempts
            );

            tokio::select! {
                _ = self.inner.shutdown.cancelled() => return false,
                _ = tokio::time::sleep(delay) => {}
            }

            match self.announce().await {
                Ok(()) => {
                    info!("Reconnected to registry {}", config.registry);
                    return true;
                }
                Err(e) => warn!("Registry reconnect attempt {} failed: {}", attempt + 1, e),
            }
        }

        error!(
            "Giving up on registry {} after {} attempts; serving without a directory",
            config.registry, policy.max_attempts
        );
        false
    }
}

#[cfg(test)]
mod tests;
