//! Services bound to inbound addresses and the context they run in

use crate::{Agent, Container, Result};
use async_trait::async_trait;
use microws_net::Channel;
use microws_proto::Exception;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

/// A procedure implementation, constructed fresh for every call
///
/// Arguments are decoded from the call's props array, so a service taking
/// two numbers uses `type Args = (i64, i64)`.
#[async_trait]
pub trait Service: Send + Sync + Sized + 'static {
    /// Decoded props
    type Args: DeserializeOwned + Send;

    /// Value sent back to the caller
    type Output: Serialize + Send;

    /// Build an instance from the agent's container
    fn create(container: &Container) -> Result<Self>;

    /// Handle one call
    async fn exec(&self, ctx: &Context, args: Self::Args) -> std::result::Result<Self::Output, Exception>;
}

/// What a running service can see: the calling channel and the agent
pub struct Context {
    channel: Arc<Channel>,
    agent: Agent,
}

impl Context {
    pub(crate) fn new(channel: Arc<Channel>, agent: Agent) -> Self {
        Self { channel, agent }
    }

    /// Channel the call arrived on
    pub fn channel(&self) -> &Arc<Channel> {
        &self.channel
    }

    /// Agent serving the call
    pub fn agent(&self) -> &Agent {
        &self.agent
    }

    /// Call another namespace; see [`Agent::fetch`]
    pub async fn fetch(&self, address: &str, args: Vec<Value>, timeout: Option<Duration>) -> Result<Value> {
        self.agent.fetch(address, args, timeout).await
    }

    /// Channel to a physical `host:port`, dialing if needed
    pub async fn connect(&self, host: &str) -> Result<Arc<Channel>> {
        Ok(self.agent.fabric().acquire(host).await?)
    }

    /// Channel serving `namespace`; see [`Agent::where_namespace`]
    pub async fn use_namespace(&self, namespace: &str) -> Result<Arc<Channel>> {
        self.agent.where_namespace(namespace).await
    }
}
