//! Directory state and the registry node

use crate::RegistryConfig;
use microws_net::address::SCHEME;
use microws_net::{Address, Channel, Fabric, FabricConfig, FabricObserver, ObserverId, TransportError};
use microws_proto::directory as commands;
use microws_proto::{status, Exception, DEFAULT_TIMEOUT};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, info};

/// Announcement made through one channel
#[derive(Debug, Clone)]
struct Entry {
    host: String,
    channel: String,
}

/// Namespace -> host table
#[derive(Debug, Default)]
struct Directory {
    entries: RwLock<HashMap<String, Entry>>,
}

impl Directory {
    /// Upsert; the last announcement wins
    async fn online(&self, namespace: &str, channel: &Channel) {
        let entry = Entry {
            host: channel.host().to_string(),
            channel: channel.id().to_string(),
        };
        let previous = self.entries.write().await.insert(namespace.to_string(), entry);
        match previous {
            Some(previous) if previous.host != channel.host() => {
                info!("+ {} -> {} (replacing {})", namespace, channel.host(), previous.host)
            }
            _ => info!("+ {} -> {}", namespace, channel.host()),
        }
    }

    async fn resolve(&self, namespace: &str) -> Option<String> {
        self.entries.read().await.get(namespace).map(|entry| entry.host.clone())
    }

    /// Drop every namespace announced through `channel_id`
    async fn prune(&self, channel_id: &str) {
        let mut entries = self.entries.write().await;
        entries.retain(|namespace, entry| {
            let keep = entry.channel != channel_id;
            if !keep {
                info!("- {} ({})", namespace, entry.host);
            }
            keep
        });
    }

    async fn snapshot(&self) -> HashMap<String, String> {
        self.entries
            .read()
            .await
            .iter()
            .map(|(namespace, entry)| (namespace.clone(), entry.host.clone()))
            .collect()
    }
}

/// Prunes announcements when their channel goes away
struct Pruner {
    directory: Arc<Directory>,
}

impl FabricObserver for Pruner {
    fn on_disconnect(&self, channel: &Arc<Channel>) {
        let directory = Arc::clone(&self.directory);
        let channel_id = channel.id().to_string();
        tokio::spawn(async move { directory.prune(&channel_id).await });
    }
}

fn namespace_arg(cmd: &str, props: &[Value]) -> Result<String, Exception> {
    props
        .first()
        .and_then(Value::as_str)
        .filter(|namespace| !namespace.is_empty())
        .map(str::to_string)
        .ok_or_else(|| Exception::new(status::BAD_REQUEST, format!("'{}' expects a namespace", cmd)))
}

/// A running registry node
pub struct Registry {
    fabric: Arc<Fabric>,
    directory: Arc<Directory>,
    observer: ObserverId,
    port: u16,
}

impl Registry {
    /// Bind the directory commands and start listening
    pub async fn start(config: RegistryConfig) -> Result<Self, TransportError> {
        let fabric = Fabric::new(FabricConfig {
            listen_host: config.host.clone(),
            announce_host: config.announce_host.clone(),
            ..FabricConfig::default()
        });
        let directory = Arc::new(Directory::default());

        let book = Arc::clone(&directory);
        fabric
            .bind(
                commands::PROTOCOL,
                commands::ONLINE,
                Arc::new(move |channel: Arc<Channel>, props: Vec<Value>| {
                    let book = Arc::clone(&book);
                    async move {
                        let namespace = namespace_arg(commands::ONLINE, &props)?;
                        book.online(&namespace, &channel).await;
                        Ok::<Value, Exception>(Value::Null)
                    }
                }),
            )
            .await?;

        let book = Arc::clone(&directory);
        fabric
            .bind(
                commands::PROTOCOL,
                commands::WHERE,
                Arc::new(move |_channel: Arc<Channel>, props: Vec<Value>| {
                    let book = Arc::clone(&book);
                    async move {
                        let namespace = namespace_arg(commands::WHERE, &props)?;
                        let host = book.resolve(&namespace).await;
                        debug!("where {} -> {:?}", namespace, host);
                        Ok::<Value, Exception>(host.map(Value::String).unwrap_or(Value::Null))
                    }
                }),
            )
            .await?;

        let observer = fabric
            .subscribe(Arc::new(Pruner {
                directory: Arc::clone(&directory),
            }))
            .await;
        let local_addr = fabric.listen(config.port).await?;

        info!("Registry started on port {}", local_addr.port());
        Ok(Self {
            fabric,
            directory,
            observer,
            port: local_addr.port(),
        })
    }

    /// Port the registry is listening on
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Host currently announced for `namespace`
    pub async fn lookup(&self, namespace: &str) -> Option<String> {
        self.directory.resolve(namespace).await
    }

    /// Every announced namespace and its host
    pub async fn namespaces(&self) -> HashMap<String, String> {
        self.directory.snapshot().await
    }

    /// The registry's own fabric
    pub fn fabric(&self) -> &Arc<Fabric> {
        &self.fabric
    }

    /// Call `ws://<namespace>/<cmd>` on a registered agent
    pub async fn fetch(
        &self,
        address: &str,
        args: Vec<Value>,
        timeout: Option<Duration>,
    ) -> Result<Value, Exception> {
        let address = Address::parse(address)?;
        let host = self.lookup(&address.namespace).await.ok_or_else(|| {
            Exception::not_found(format!("Cannot find the namespace '{}'", address.namespace))
        })?;

        let channel = self.fabric.acquire(&host).await?;
        let call = channel
            .fetch(SCHEME, &address.cmd, args, timeout.unwrap_or(DEFAULT_TIMEOUT))
            .await?;
        call.response().await
    }

    /// Stop listening and drop every connection
    pub async fn terminate(&self) {
        self.fabric.unsubscribe(self.observer).await;
        self.fabric.close().await;
        info!("Registry on port {} terminated", self.port);
    }
}
