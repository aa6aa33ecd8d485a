//! Cross-node delivery of room messages through a shared broker.

mod common;

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use gatehouse_server::fanout::{Broker, MemoryBroker};
use gatehouse_server::jobs::{JobQueue, MemoryJobQueue};
use serde_json::json;
use tower::ServiceExt;

use gatehouse_core::AppConfig;

use common::{config, next_frame, raw_config, send, Running};

const WAIT: Duration = Duration::from_secs(5);

fn shared() -> (Arc<dyn Broker>, Arc<dyn JobQueue>) {
    (Arc::new(MemoryBroker::new()), Arc::new(MemoryJobQueue::new()))
}

#[tokio::test]
async fn message_published_on_one_gateway_reaches_the_other() {
    let dir = tempfile::tempdir().unwrap();
    let (broker, queue) = shared();
    let (a, _) = Running::launch(
        config("gateway", "gateway-a", dir.path()),
        Arc::clone(&broker),
        Arc::clone(&queue),
    )
    .await;
    let (b, _) = Running::launch(
        config("gateway", "gateway-b", dir.path()),
        Arc::clone(&broker),
        Arc::clone(&queue),
    )
    .await;

    let mut listener = b.connect().await;
    send(&mut listener, json!({"type": "join", "room": "lobby"})).await;
    assert_eq!(
        next_frame(&mut listener, WAIT).await,
        json!({"type": "joined", "room": "lobby"})
    );

    let mut publisher = a.connect().await;
    send(
        &mut publisher,
        json!({"type": "publish", "room": "lobby", "event": "greet", "data": {"hello": "world"}}),
    )
    .await;

    assert_eq!(
        next_frame(&mut listener, WAIT).await,
        json!({"type": "message", "room": "lobby", "event": "greet", "data": {"hello": "world"}})
    );

    a.stop().await;
    b.stop().await;
}

#[tokio::test]
async fn gateways_without_a_node_id_still_reach_each_other() {
    let dir = tempfile::tempdir().unwrap();
    let (broker, queue) = shared();
    let unnamed = || {
        let mut raw = raw_config("gateway", "", dir.path());
        raw.node_id = None;
        Arc::new(AppConfig::resolve(raw).unwrap())
    };
    let (config_a, config_b) = (unnamed(), unnamed());
    assert_ne!(config_a.node_id, config_b.node_id);

    let (a, _) = Running::launch(config_a, Arc::clone(&broker), Arc::clone(&queue)).await;
    let (b, _) = Running::launch(config_b, Arc::clone(&broker), Arc::clone(&queue)).await;

    let mut listener = b.connect().await;
    send(&mut listener, json!({"type": "join", "room": "R"})).await;
    next_frame(&mut listener, WAIT).await;

    let mut publisher = a.connect().await;
    send(
        &mut publisher,
        json!({"type": "publish", "room": "R", "event": "ping", "data": 1}),
    )
    .await;
    assert_eq!(
        next_frame(&mut listener, WAIT).await,
        json!({"type": "message", "room": "R", "event": "ping", "data": 1})
    );

    a.stop().await;
    b.stop().await;
}

#[tokio::test]
async fn http_publish_counts_local_members_and_fans_out() {
    let dir = tempfile::tempdir().unwrap();
    let (broker, queue) = shared();
    let (a, router_a) = Running::launch(
        config("gateway", "gateway-a", dir.path()),
        Arc::clone(&broker),
        Arc::clone(&queue),
    )
    .await;
    let (b, _) = Running::launch(
        config("gateway", "gateway-b", dir.path()),
        Arc::clone(&broker),
        Arc::clone(&queue),
    )
    .await;

    let mut local = a.connect().await;
    send(&mut local, json!({"type": "join", "room": "ops"})).await;
    next_frame(&mut local, WAIT).await;
    let mut remote = b.connect().await;
    send(&mut remote, json!({"type": "join", "room": "ops"})).await;
    next_frame(&mut remote, WAIT).await;

    let response = router_a
        .oneshot(
            Request::post("/api/v1/rooms/ops/messages")
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(r#"{"event":"deploy","data":{"version":"1.2.3"}}"#))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let receipt: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(receipt["delivered"], 1);

    let expected =
        json!({"type": "message", "room": "ops", "event": "deploy", "data": {"version": "1.2.3"}});
    assert_eq!(next_frame(&mut local, WAIT).await, expected);
    assert_eq!(next_frame(&mut remote, WAIT).await, expected);

    a.stop().await;
    b.stop().await;
}

#[tokio::test]
async fn created_resource_is_announced_by_the_worker() {
    let dir = tempfile::tempdir().unwrap();
    let (broker, queue) = shared();
    let (gateway, router) = Running::launch(
        config("gateway", "gateway-a", dir.path()),
        Arc::clone(&broker),
        Arc::clone(&queue),
    )
    .await;
    let (worker, _) = Running::launch(
        config("worker", "worker-a", dir.path()),
        Arc::clone(&broker),
        Arc::clone(&queue),
    )
    .await;

    let mut client = gateway.connect().await;
    send(&mut client, json!({"type": "join", "room": "resources"})).await;
    next_frame(&mut client, WAIT).await;

    let response = router
        .oneshot(
            Request::post("/api/v1/resource")
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(
                    r#"{"name":"widget","quantity":3,"ownerSecret":"do-not-leak"}"#,
                ))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);

    let frame = next_frame(&mut client, WAIT).await;
    assert_eq!(frame["type"], "message");
    assert_eq!(frame["event"], "resource.created");
    assert_eq!(frame["data"]["name"], "widget");
    assert!(frame["data"].get("ownerSecret").is_none());

    worker.stop().await;
    gateway.stop().await;
}
