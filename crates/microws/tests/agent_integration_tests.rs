//! End-to-end calls between agents resolved through a live registry

mod integration;

use anyhow::Result;
use integration::*;
use microws::proto::status;
use microws::{Agent, AgentError, Container, Status};
use serde_json::json;
use std::time::{Duration, Instant};

#[tokio::test]
async fn test_sum_across_agents() -> Result<()> {
    let registry = start_registry().await?;
    let a = sum_agent(registry.port(), "a").await?;
    let b = plain_agent(registry.port(), "b").await?;

    let total = b.fetch("ws://a/sum", vec![json!(2), json!(3)], None).await?;
    assert_eq!(total, json!(5));

    assert_eq!(registry.lookup("a").await, a.local_host().await);
    assert!(b.cached("a").await.is_some());

    b.terminate().await;
    a.terminate().await;
    registry.terminate().await;
    Ok(())
}

#[tokio::test]
async fn test_concurrent_calls_share_one_channel() -> Result<()> {
    let registry = start_registry().await?;
    let a = sum_agent(registry.port(), "a").await?;
    let b = plain_agent(registry.port(), "b").await?;

    let calls = (0..20i64).map(|i| b.fetch("ws://a/sum", vec![json!(i), json!(i)], None));
    let results = futures::future::join_all(calls).await;
    for (i, result) in results.into_iter().enumerate() {
        assert_eq!(result?, json!(2 * i as i64));
    }

    // One channel from b to a, reached both through the cache and the fabric
    let cached = b.cached("a").await.expect("namespace cached");
    let host = a.local_host().await.expect("a is listening");
    let indexed = b.fabric().channel(&host).await.expect("channel indexed");
    assert!(std::sync::Arc::ptr_eq(&cached, &indexed));

    b.terminate().await;
    a.terminate().await;
    registry.terminate().await;
    Ok(())
}

#[tokio::test]
async fn test_callee_sees_caller_identity() -> Result<()> {
    let registry = start_registry().await?;
    let a = Agent::new(agent_config(registry.port(), "a"));
    a.bind::<WhoAmI>("/whoami").await?;
    a.initialize().await?;
    let b = plain_agent(registry.port(), "b").await?;

    let seen = b.fetch("ws://a/whoami", vec![], None).await?;
    assert_eq!(seen, json!(b.local_host().await.expect("b is listening")));

    b.terminate().await;
    a.terminate().await;
    registry.terminate().await;
    Ok(())
}

#[tokio::test]
async fn test_unknown_namespace_is_404() -> Result<()> {
    let registry = start_registry().await?;
    let b = plain_agent(registry.port(), "b").await?;

    let err = b.fetch("ws://ghost/sum", vec![], None).await.unwrap_err();
    assert!(matches!(err, AgentError::NotFound { ref namespace } if namespace == "ghost"));
    assert_eq!(err.status(), Status::from(status::NOT_FOUND));

    b.terminate().await;
    registry.terminate().await;
    Ok(())
}

#[tokio::test]
async fn test_unbound_command_is_104() -> Result<()> {
    let registry = start_registry().await?;
    let _a = sum_agent(registry.port(), "a").await?;
    let b = plain_agent(registry.port(), "b").await?;

    let err = b.fetch("ws://a/product", vec![json!(2), json!(3)], None).await.unwrap_err();
    assert_eq!(err.status(), Status::from(status::UNBOUND));

    registry.terminate().await;
    Ok(())
}

#[tokio::test]
async fn test_bad_arguments_are_400() -> Result<()> {
    let registry = start_registry().await?;
    let _a = sum_agent(registry.port(), "a").await?;
    let b = plain_agent(registry.port(), "b").await?;

    let err = b.fetch("ws://a/sum", vec![json!("two"), json!(3)], None).await.unwrap_err();
    assert_eq!(err.status(), Status::from(status::BAD_REQUEST));

    registry.terminate().await;
    Ok(())
}

#[tokio::test]
async fn test_slow_callee_times_out_after_grace() -> Result<()> {
    let registry = start_registry().await?;
    let a = Agent::new(agent_config(registry.port(), "a"));
    a.bind::<Sleepy>("sleep").await?;
    a.initialize().await?;
    let b = plain_agent(registry.port(), "b").await?;

    // Resolve first so the measurement only covers the call
    b.where_namespace("a").await?;

    let timeout = Duration::from_millis(200);
    let started = Instant::now();
    let err = b
        .fetch("ws://a/sleep", vec![json!(5_000)], Some(timeout))
        .await
        .unwrap_err();

    assert_eq!(err.status(), Status::from(status::TIMEOUT));
    assert!(started.elapsed() >= timeout * 2);
    assert!(started.elapsed() < Duration::from_secs(5));

    // The channel survives and keeps serving
    let quick = b.fetch("ws://a/sleep", vec![json!(1)], None).await?;
    assert_eq!(quick, json!("awake"));

    registry.terminate().await;
    Ok(())
}

#[tokio::test]
async fn test_service_calls_through_context() -> Result<()> {
    let registry = start_registry().await?;
    let _a = sum_agent(registry.port(), "a").await?;
    let relay = Agent::new(agent_config(registry.port(), "relay"));
    relay.bind::<Relay>("relay").await?;
    relay.initialize().await?;
    let b = plain_agent(registry.port(), "b").await?;

    let total = b
        .fetch("ws://relay/relay", vec![json!("a"), json!(40), json!(2)], None)
        .await?;
    assert_eq!(total, json!(42));

    // Errors from the nested call travel back with their status
    let err = b
        .fetch("ws://relay/relay", vec![json!("ghost"), json!(1), json!(1)], None)
        .await
        .unwrap_err();
    assert_eq!(err.status(), Status::from(status::NOT_FOUND));

    registry.terminate().await;
    Ok(())
}

#[tokio::test]
async fn test_services_are_built_from_the_container() -> Result<()> {
    let registry = start_registry().await?;
    let container = Container::new();
    container.provide(Prefix("Hello".to_string()));
    let greeter = Agent::with_container(agent_config(registry.port(), "greeter"), container);
    greeter.bind::<Greeter>("greet").await?;
    greeter.initialize().await?;

    let bare = Agent::new(agent_config(registry.port(), "bare"));
    bare.bind::<Greeter>("greet").await?;
    bare.initialize().await?;

    let b = plain_agent(registry.port(), "b").await?;

    let greeting = b.fetch("ws://greeter/greet", vec![json!("world")], None).await?;
    assert_eq!(greeting, json!("Hello, world"));

    let err = b.fetch("ws://bare/greet", vec![json!("world")], None).await.unwrap_err();
    assert_eq!(err.status(), Status::from(status::INTERNAL));
    assert!(err.to_string().contains("Missing dependency"));

    registry.terminate().await;
    Ok(())
}

#[tokio::test]
async fn test_departed_agent_is_unresolvable() -> Result<()> {
    let registry = start_registry().await?;
    let a = sum_agent(registry.port(), "a").await?;
    let b = plain_agent(registry.port(), "b").await?;

    assert_eq!(b.fetch("ws://a/sum", vec![json!(1), json!(1)], None).await?, json!(2));

    a.terminate().await;

    let (registry_ref, b_ref) = (&registry, &b);
    eventually("registry to prune a", move || async move {
        registry_ref.lookup("a").await.is_none()
    })
    .await?;
    eventually("b to evict a", move || async move { b_ref.cached("a").await.is_none() }).await?;

    let err = b.fetch("ws://a/sum", vec![json!(1), json!(1)], None).await.unwrap_err();
    assert!(matches!(err, AgentError::NotFound { .. }));

    registry.terminate().await;
    Ok(())
}

#[tokio::test]
async fn test_registry_reaches_agents() -> Result<()> {
    let registry = start_registry().await?;
    let _a = sum_agent(registry.port(), "a").await?;

    let total = registry.fetch("ws://a/sum", vec![json!(20), json!(22)], None).await?;
    assert_eq!(total, json!(42));

    registry.terminate().await;
    Ok(())
}
