//! Shared setup for agent integration tests
//!
//! Every test runs its own registry on a free loopback port, so tests can run
//! in parallel.

#![allow(dead_code)]

use anyhow::Result;
use async_trait::async_trait;
use microws::{Agent, AgentConfig, Container, Context, Exception, ReconnectPolicy, Service};
use microws_registry::{Registry, RegistryConfig};
use serde_json::json;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

/// Upper bound for anything a test waits on
pub const WAIT: Duration = Duration::from_secs(10);

/// Start a registry on a free loopback port
pub async fn start_registry() -> Result<Registry> {
    start_registry_on(0).await
}

/// Route test logs through the test harness, filtered by `RUST_LOG`
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Start a registry on `port`
pub async fn start_registry_on(port: u16) -> Result<Registry> {
    init_tracing();
    let config = RegistryConfig::default().with_host("127.0.0.1").with_port(port);
    Ok(Registry::start(config).await?)
}

/// Loopback agent configuration with a fast reconnect policy
pub fn agent_config(registry_port: u16, namespace: &str) -> AgentConfig {
    AgentConfig::new(format!("127.0.0.1:{}", registry_port), namespace)
        .with_listen_host("127.0.0.1")
        .with_connect_timeout(Duration::from_secs(2))
        .with_reconnect(ReconnectPolicy {
            max_attempts: 50,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(500),
            multiplier: 1.5,
            jitter: 0.0,
        })
}

/// An initialized agent serving `Sum` under `/sum`
pub async fn sum_agent(registry_port: u16, namespace: &str) -> Result<Agent> {
    let agent = Agent::new(agent_config(registry_port, namespace));
    agent.bind::<Sum>("sum").await?;
    agent.initialize().await?;
    Ok(agent)
}

/// An initialized agent that serves nothing
pub async fn plain_agent(registry_port: u16, namespace: &str) -> Result<Agent> {
    let agent = Agent::new(agent_config(registry_port, namespace));
    agent.initialize().await?;
    Ok(agent)
}

/// Poll `check` until it holds or [`WAIT`] elapses
pub async fn eventually<F, Fut>(what: &str, check: F) -> Result<()>
where
    F: Fn() -> Fut,
    Fut: Future<Output = bool>,
{
    tokio::time::timeout(WAIT, async {
        while !check().await {
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
    })
    .await
    .map_err(|_| anyhow::anyhow!("Timed out waiting for {}", what))
}

/// Adds two numbers
pub struct Sum;

#[async_trait]
impl Service for Sum {
    type Args = (i64, i64);
    type Output = i64;

    fn create(_container: &Container) -> microws::Result<Self> {
        Ok(Sum)
    }

    async fn exec(&self, _ctx: &Context, args: Self::Args) -> Result<i64, Exception> {
        Ok(args.0 + args.1)
    }
}

/// Sleeps for the given number of milliseconds, then answers
pub struct Sleepy;

#[async_trait]
impl Service for Sleepy {
    type Args = (u64,);
    type Output = &'static str;

    fn create(_container: &Container) -> microws::Result<Self> {
        Ok(Sleepy)
    }

    async fn exec(&self, _ctx: &Context, args: Self::Args) -> Result<&'static str, Exception> {
        tokio::time::sleep(Duration::from_millis(args.0)).await;
        Ok("awake")
    }
}

/// Forwards a sum to another namespace through the call context
pub struct Relay;

#[async_trait]
impl Service for Relay {
    type Args = (String, i64, i64);
    type Output = serde_json::Value;

    fn create(_container: &Container) -> microws::Result<Self> {
        Ok(Relay)
    }

    async fn exec(&self, ctx: &Context, args: Self::Args) -> Result<serde_json::Value, Exception> {
        let (namespace, a, b) = args;
        let address = format!("ws://{}/sum", namespace);
        Ok(ctx.fetch(&address, vec![json!(a), json!(b)], None).await?)
    }
}

/// Prefix shared through the container
pub struct Prefix(pub String);

/// Greets with the container's prefix
pub struct Greeter {
    prefix: Arc<Prefix>,
}

#[async_trait]
impl Service for Greeter {
    type Args = (String,);
    type Output = String;

    fn create(container: &Container) -> microws::Result<Self> {
        Ok(Greeter {
            prefix: container.require::<Prefix>()?,
        })
    }

    async fn exec(&self, _ctx: &Context, args: Self::Args) -> Result<String, Exception> {
        Ok(format!("{}, {}", self.prefix.0, args.0))
    }
}

/// Reports which host the calling channel is keyed under
pub struct WhoAmI;

#[async_trait]
impl Service for WhoAmI {
    type Args = Vec<serde_json::Value>;
    type Output = String;

    fn create(_container: &Container) -> microws::Result<Self> {
        Ok(WhoAmI)
    }

    async fn exec(&self, ctx: &Context, _args: Self::Args) -> Result<String, Exception> {
        Ok(ctx.channel().host().to_string())
    }
}
