//! Unit tests for the agent that need no registry

use super::*;
use async_trait::async_trait;
use microws_net::TransportError;
use microws_proto::Status;
use tokio_test::assert_ok;

struct Echo;

#[async_trait]
impl Service for Echo {
    type Args = (String,);
    type Output = String;

    fn create(_container: &Container) -> Result<Self> {
        Ok(Echo)
    }

    async fn exec(&self, _ctx: &Context, args: Self::Args) -> std::result::Result<String, Exception> {
        Ok(args.0)
    }
}

fn agent() -> Agent {
    Agent::new(AgentConfig::new("127.0.0.1:1", "unit").with_listen_host("127.0.0.1"))
}

#[tokio::test]
async fn test_where_without_registry_is_414() {
    let agent = agent();

    let err = agent.where_namespace("anyone").await.unwrap_err();
    assert!(matches!(err, AgentError::DirectoryUnavailable { .. }));
    assert_eq!(err.status(), Status::from(status::DIRECTORY_UNAVAILABLE));
}

#[tokio::test]
async fn test_fetch_rejects_other_schemes() {
    let agent = agent();

    let err = agent.fetch("http://a/sum", vec![], None).await.unwrap_err();
    assert_eq!(err.status(), Status::from(status::PROTOCOL_UNACCEPTED));
}

#[tokio::test]
async fn test_bind_normalizes_and_rejects_duplicates() {
    let agent = agent();
    assert_ok!(agent.bind::<Echo>("echo").await);

    assert!(agent.fabric().routes().lookup(SCHEME, "/echo").await.is_some());
    assert!(matches!(
        agent.bind::<Echo>("/echo").await,
        Err(AgentError::Transport(TransportError::DuplicateBinding { .. }))
    ));
}

#[tokio::test]
async fn test_initialize_fails_without_registry() {
    let agent = Agent::new(
        AgentConfig::new("127.0.0.1:1", "lonely")
            .with_listen_host("127.0.0.1")
            .with_connect_timeout(Duration::from_millis(500)),
    );

    assert!(agent.initialize().await.is_err());
    assert!(agent.local_host().await.is_some());
    agent.terminate().await;
}

#[tokio::test]
async fn test_initialize_rejects_empty_namespace() {
    let agent = Agent::new(AgentConfig::new("127.0.0.1:1", ""));

    assert!(matches!(agent.initialize().await, Err(AgentError::Config(_))));
}

#[tokio::test]
async fn test_terminate_releases_container() {
    let container = Container::new();
    container.provide(7u32);
    let agent = Agent::with_container(AgentConfig::new("127.0.0.1:1", "unit"), container);

    agent.terminate().await;
    agent.terminate().await;

    assert!(agent.container().is_empty());
    assert!(agent.fabric().is_closed());
}
