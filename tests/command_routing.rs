//! Command Routing Integration Tests
//!
//! Tests operator commands flowing through the API to live device sockets.


use futures::SinkExt;
use integration_harness::{next_server_message, start_default};
use iotlink_daemon::router::RouterEvent;
use iotlink_protocol::{DeviceMessage, ServerMessage};
use serde_json::{Value, json};
use std::time::Duration;
use tokio_tungstenite::tungstenite::Message;

/// Test: connect, route, disconnect, route again
#[tokio::test]
async fn test_connect_route_disconnect_route() {
    let daemon = start_default().await;
    let (mut ws, _) = daemon.connect_device("dev-1").await;

    let command = json!({"targetDeviceIdentity": "dev-1", "payload": {"cmd": "LED", "value": 1}});
    let resp = daemon
        .http
        .post(daemon.api("/api/commands"))
        .json(&command)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 202);

    assert_eq!(
        next_server_message(&mut ws).await,
        Some(ServerMessage::Command {
            payload: json!({"cmd": "LED", "value": 1})
        })
    );

    ws.close(None).await.unwrap();
    assert!(daemon.wait_until_disconnected("dev-1").await);

    // Dropped silently; the API still accepts it
    let resp = daemon
        .http
        .post(daemon.api("/api/commands"))
        .json(&command)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 202);
    assert_eq!(daemon.router.registry().count(), 0);
}

/// Test: commands for devices that never connected are accepted and dropped
#[tokio::test]
async fn test_unknown_device_accepted() {
    let daemon = start_default().await;

    let resp = daemon
        .http
        .post(daemon.api("/api/commands"))
        .json(&json!({"targetDeviceIdentity": "ghost", "payload": null}))
        .send()
        .await
        .unwrap();

    assert_eq!(resp.status(), 202);
}

/// Test: malformed target identity is a client error
#[tokio::test]
async fn test_invalid_target_rejected() {
    let daemon = start_default().await;

    let resp = daemon
        .http
        .post(daemon.api("/api/commands"))
        .json(&json!({"targetDeviceIdentity": "has space", "payload": 1}))
        .send()
        .await
        .unwrap();

    assert_eq!(resp.status(), 400);
}

/// Test: the device listing reflects live sessions
#[tokio::test]
async fn test_devices_listing() {
    let daemon = start_default().await;
    let (_a, session_a) = daemon.connect_device("dev-a").await;
    let (_b, _) = daemon.connect_device("dev-b").await;

    let devices: Vec<Value> = daemon
        .http
        .get(daemon.api("/api/devices"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    assert_eq!(devices.len(), 2);
    assert_eq!(devices[0]["device_identity"], "dev-a");
    assert_eq!(devices[0]["session_id"], session_a);
    assert_eq!(devices[0]["status"], "authenticated");

    let stats: Value = daemon
        .http
        .get(daemon.api("/api/stats"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(stats["active_connections"], 2);
}

/// Test: device events reach router listeners
#[tokio::test]
async fn test_device_event_relayed() {
    let daemon = start_default().await;
    let (mut ws, _) = daemon.connect_device("dev-1").await;
    let mut events = daemon.router.subscribe();

    let ping = serde_json::to_string(&DeviceMessage::Ping).unwrap();
    ws.send(Message::Text(ping.into())).await.unwrap();
    ws.send(Message::Text("not json".into())).await.unwrap();
    let event = serde_json::to_string(&DeviceMessage::Event {
        payload: json!({"temp": 21.5}),
    })
    .unwrap();
    ws.send(Message::Text(event.into())).await.unwrap();

    let received = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if let RouterEvent::DeviceMessage {
                device_identity,
                payload,
            } = events.recv().await.unwrap()
            {
                return (device_identity, payload);
            }
        }
    })
    .await
    .unwrap();

    assert_eq!(received, ("dev-1".to_string(), json!({"temp": 21.5})));
}
