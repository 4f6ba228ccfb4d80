//! Procedure registration table

use crate::{Channel, TransportError};
use async_trait::async_trait;
use microws_proto::Exception;
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

/// A callable procedure bound under a protocol/command pair
#[async_trait]
pub trait Procedure: Send + Sync + 'static {
    /// Run the procedure for a call that arrived on `channel`
    async fn call(&self, channel: Arc<Channel>, props: Vec<Value>) -> Result<Value, Exception>;
}

#[async_trait]
impl<F, Fut> Procedure for F
where
    F: Fn(Arc<Channel>, Vec<Value>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value, Exception>> + Send + 'static,
{
    async fn call(&self, channel: Arc<Channel>, props: Vec<Value>) -> Result<Value, Exception> {
        (self)(channel, props).await
    }
}

type Commands = HashMap<String, Arc<dyn Procedure>>;

/// Two-level protocol -> command -> procedure table
#[derive(Default)]
pub struct RouteTable {
    routes: RwLock<HashMap<String, Commands>>,
}

impl RouteTable {
    /// Create an empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a procedure; a second registration of the same pair fails
    pub async fn bind(
        &self,
        protocol: &str,
        cmd: &str,
        procedure: Arc<dyn Procedure>,
    ) -> Result<(), TransportError> {
        let mut routes = self.routes.write().await;
        let commands = routes.entry(protocol.to_string()).or_default();
        if commands.contains_key(cmd) {
            return Err(TransportError::DuplicateBinding {
                protocol: protocol.to_string(),
                cmd: cmd.to_string(),
            });
        }
        commands.insert(cmd.to_string(), procedure);
        debug!("Bound procedure {}:{}", protocol, cmd);
        Ok(())
    }

    /// Find the procedure for a protocol/command pair
    pub async fn lookup(&self, protocol: &str, cmd: &str) -> Option<Arc<dyn Procedure>> {
        let routes = self.routes.read().await;
        routes.get(protocol).and_then(|commands| commands.get(cmd)).cloned()
    }

    /// Number of bound procedures
    pub async fn len(&self) -> usize {
        self.routes.read().await.values().map(HashMap::len).sum()
    }

    /// Whether nothing is bound
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}
