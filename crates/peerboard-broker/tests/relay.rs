use futures_util::{SinkExt, StreamExt};
use serde_json::{Value, json};
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async, tungstenite::Message};

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

async fn spawn_broker() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, peerboard_broker::router()).await.unwrap();
    });
    format!("ws://{}/ws", addr)
}

async fn next_json(client: &mut Client) -> Value {
    loop {
        let msg = tokio::time::timeout(Duration::from_secs(5), client.next())
            .await
            .expect("timed out waiting for broker")
            .expect("socket closed")
            .unwrap();
        if let Message::Text(text) = msg {
            return serde_json::from_str(&text).unwrap();
        }
    }
}

/// Connect and read the welcome message.
async fn join(url: &str) -> (Client, String) {
    let (mut client, _) = connect_async(url).await.unwrap();
    let welcome = next_json(&mut client).await;
    assert_eq!(welcome["type"], "welcome");
    let id = welcome["peer_id"].as_str().unwrap().to_string();
    (client, id)
}

async fn send(client: &mut Client, value: Value) {
    client.send(Message::Text(value.to_string().into())).await.unwrap();
}

#[tokio::test]
async fn test_relay_between_peers() {
    let url = spawn_broker().await;
    let (mut host, host_id) = join(&url).await;
    let (mut guest, guest_id) = join(&url).await;
    assert_ne!(host_id, guest_id);

    let frame = json!({"kind": "connect", "connection": "00000000-0000-0000-0000-000000000000"});
    send(&mut guest, json!({"type": "relay", "to": host_id, "frame": frame})).await;

    let relayed = next_json(&mut host).await;
    assert_eq!(relayed, json!({"type": "relay", "from": guest_id, "frame": frame}));
}

#[tokio::test]
async fn test_unknown_peer() {
    let url = spawn_broker().await;
    let (mut client, _) = join(&url).await;
    send(&mut client, json!({"type": "relay", "to": "nobody", "frame": {}})).await;
    assert_eq!(
        next_json(&mut client).await,
        json!({"type": "peer_not_found", "peer_id": "nobody"})
    );
}

#[tokio::test]
async fn test_peer_left_reaches_contacts() {
    let url = spawn_broker().await;
    let (mut host, host_id) = join(&url).await;
    let (mut guest, guest_id) = join(&url).await;

    send(&mut guest, json!({"type": "relay", "to": host_id, "frame": {"kind": "close"}})).await;
    next_json(&mut host).await;

    guest.close(None).await.unwrap();
    assert_eq!(
        next_json(&mut host).await,
        json!({"type": "peer_left", "peer_id": guest_id})
    );
}

#[tokio::test]
async fn test_invalid_message() {
    let url = spawn_broker().await;
    let (mut client, _) = join(&url).await;
    send(&mut client, json!({"type": "join", "room": "x"})).await;
    let reply = next_json(&mut client).await;
    assert_eq!(reply["type"], "error");
}
