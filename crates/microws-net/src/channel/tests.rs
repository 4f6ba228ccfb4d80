//! Unit tests for channels over in-memory sockets

use super::*;
use microws_proto::{Mode, ResponseEnvelope, Status};
use serde_json::json;
use std::sync::atomic::AtomicUsize;
use tokio::io::DuplexStream;
use tokio_tungstenite::tungstenite::protocol::Role;

const T: Duration = Duration::from_secs(5);

async fn sum(_channel: Arc<Channel>, props: Vec<Value>) -> Result<Value, Exception> {
    let total: i64 = props.iter().filter_map(Value::as_i64).sum();
    Ok(json!(total))
}

async fn stall(_channel: Arc<Channel>, _props: Vec<Value>) -> Result<Value, Exception> {
    std::future::pending::<()>().await;
    Ok(Value::Null)
}

async fn sockets() -> (WebSocketStream<DuplexStream>, WebSocketStream<DuplexStream>) {
    let (a, b) = tokio::io::duplex(64 * 1024);
    let server = WebSocketStream::from_raw_socket(a, Role::Server, None).await;
    let client = WebSocketStream::from_raw_socket(b, Role::Client, None).await;
    (server, client)
}

async fn routes_with_sum() -> Arc<RouteTable> {
    let routes = Arc::new(RouteTable::new());
    routes.bind("ws", "/sum", Arc::new(sum)).await.unwrap();
    routes.bind("ws", "/stall", Arc::new(stall)).await.unwrap();
    routes
}

/// Returns (caller, callee); the callee serves `routes`
async fn pair(routes: Arc<RouteTable>) -> (Arc<Channel>, Arc<Channel>) {
    let (server, client) = sockets().await;
    let callee = Channel::open("client", Direction::Inbound, server, routes, FrameCodec::new(), |_| {});
    let caller = Channel::open(
        "server",
        Direction::Outbound,
        client,
        Arc::new(RouteTable::new()),
        FrameCodec::new(),
        |_| {},
    );
    (caller, callee)
}

async fn wait_until(check: impl Fn() -> bool) {
    tokio::time::timeout(T, async {
        while !check() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

async fn next_response(raw: &mut WebSocketStream<DuplexStream>) -> Frame {
    loop {
        match raw.next().await {
            Some(Ok(Message::Text(text))) => {
                let frame = FrameCodec::new().decode_text(&text).unwrap();
                if frame.mode == Mode::Response {
                    return frame;
                }
            }
            Some(Ok(_)) => continue,
            other => panic!("Socket ended: {:?}", other),
        }
    }
}

#[tokio::test]
async fn test_fetch_resolves() {
    let (caller, _callee) = pair(routes_with_sum().await).await;

    let call = caller.fetch("ws", "/sum", vec![json!(2), json!(3)], T).await.unwrap();
    assert_eq!(call.response().await.unwrap(), json!(5));
    assert_eq!(caller.inflight_count().await, 0);
}

#[tokio::test]
async fn test_unbound_route_is_104() {
    let (caller, _callee) = pair(routes_with_sum().await).await;

    let call = caller.fetch("ws", "/missing", vec![], T).await.unwrap();
    let err = call.response().await.unwrap_err();
    assert_eq!(err.status, Status::from(status::UNBOUND));
    assert!(err.message.contains("ws://missing"));
}

#[tokio::test]
async fn test_procedure_sees_calling_channel() {
    let routes = Arc::new(RouteTable::new());
    routes
        .bind(
            "ws",
            "/whoami",
            Arc::new(|channel: Arc<Channel>, _props: Vec<Value>| async move {
                Ok::<Value, Exception>(json!(channel.host()))
            }),
        )
        .await
        .unwrap();
    let (caller, _callee) = pair(routes).await;

    let call = caller.fetch("ws", "/whoami", vec![], T).await.unwrap();
    assert_eq!(call.response().await.unwrap(), json!("client"));
}

#[tokio::test]
async fn test_both_directions_share_the_socket() {
    let (server, client) = sockets().await;
    let left = Channel::open("right", Direction::Inbound, server, routes_with_sum().await, FrameCodec::new(), |_| {});
    let right = Channel::open("left", Direction::Outbound, client, routes_with_sum().await, FrameCodec::new(), |_| {});

    let (a, b) = tokio::join!(
        async { left.fetch("ws", "/sum", vec![json!(1), json!(1)], T).await.unwrap().response().await },
        async { right.fetch("ws", "/sum", vec![json!(4), json!(4)], T).await.unwrap().response().await },
    );
    assert_eq!(a.unwrap(), json!(2));
    assert_eq!(b.unwrap(), json!(8));
}

#[tokio::test]
async fn test_malformed_messages_are_dropped() {
    let (server, mut raw) = sockets().await;
    let _callee = Channel::open("raw", Direction::Inbound, server, routes_with_sum().await, FrameCodec::new(), |_| {});

    raw.send(Message::Text("not a frame".to_string())).await.unwrap();
    raw.send(Message::Text(r#"{"id":1,"mode":9,"twoway":true}"#.to_string())).await.unwrap();

    let request = Frame::request(7, json!({"protocol": "ws", "cmd": "/sum", "props": [1, 2]}));
    let text = FrameCodec::new().encode_frame(&request).unwrap();
    raw.send(Message::Text(text)).await.unwrap();

    let response = next_response(&mut raw).await;
    assert_eq!(response.id, 7);
    let envelope: ResponseEnvelope = serde_json::from_value(response.data).unwrap();
    assert_eq!(envelope.into_result().unwrap(), json!(3));
}

#[tokio::test]
async fn test_malformed_payload_is_400() {
    let (server, mut raw) = sockets().await;
    let _callee = Channel::open("raw", Direction::Inbound, server, routes_with_sum().await, FrameCodec::new(), |_| {});

    let request = Frame::request(1, json!("just a string"));
    let bytes = FrameCodec::new().encode_frame(&request).unwrap().into_bytes();
    raw.send(Message::Binary(bytes)).await.unwrap();

    let response = next_response(&mut raw).await;
    let envelope: ResponseEnvelope = serde_json::from_value(response.data).unwrap();
    assert_eq!(envelope.status, Status::from(status::BAD_REQUEST));
}

#[tokio::test]
async fn test_disconnect_rejects_pending_and_runs_on_close_once() {
    let closes = Arc::new(AtomicUsize::new(0));
    let (server, client) = sockets().await;
    let callee = Channel::open("client", Direction::Inbound, server, routes_with_sum().await, FrameCodec::new(), |_| {});
    let counter = Arc::clone(&closes);
    let caller = Channel::open(
        "server",
        Direction::Outbound,
        client,
        Arc::new(RouteTable::new()),
        FrameCodec::new(),
        move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        },
    );

    let call = caller.fetch("ws", "/stall", vec![], T).await.unwrap();
    callee.disconnect();
    callee.disconnect();

    let err = call.response().await.unwrap_err();
    assert!(err.is_abort());

    wait_until(|| closes.load(Ordering::SeqCst) == 1).await;
    assert!(caller.is_closed());
    assert!(callee.is_closed());
    assert!(caller.fetch("ws", "/sum", vec![], T).await.is_err());

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(closes.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_channel_identity() {
    let (caller, callee) = pair(Arc::new(RouteTable::new())).await;

    assert!(caller.id().starts_with("ws-"));
    assert_ne!(caller.id(), callee.id());
    assert_eq!(caller.host(), "server");
    assert_eq!(caller.direction(), Direction::Outbound);
    assert_eq!(callee.direction(), Direction::Inbound);
    assert!(!caller.is_adopted());
}
