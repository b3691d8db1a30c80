//! End-to-end tests over real sockets.

use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use pointcast_core::InMemoryPointRepository;
use pointcast_server::{Manager, PointcastServer, ServerConfig};
use serde_json::{Value, json};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

async fn start() -> (PointcastServer, String) {
    let config = ServerConfig {
        host: "127.0.0.1".into(),
        port: 0,
        ..ServerConfig::default()
    };
    let manager = Manager::new(config.manager.clone());
    let server = PointcastServer::new(config, Arc::new(InMemoryPointRepository::default()), manager).unwrap();
    let addr = server.listen().await.unwrap();
    (server, format!("ws://{addr}/ws"))
}

async fn connect(url: &str) -> Client {
    let (client, _) = tokio_tungstenite::connect_async(url).await.unwrap();
    client
}

async fn send(client: &mut Client, value: Value) {
    client.send(Message::Text(value.to_string().into())).await.unwrap();
}

/// Next JSON text frame, skipping control frames.
async fn recv(client: &mut Client) -> Option<Value> {
    tokio::time::timeout(Duration::from_secs(5), async {
        while let Some(frame) = client.next().await {
            match frame {
                Ok(Message::Text(text)) => return serde_json::from_str(text.as_str()).ok(),
                Ok(Message::Close(_)) | Err(_) => return None,
                Ok(_) => {}
            }
        }
        None
    })
    .await
    .unwrap_or(None)
}

async fn wait_for(mut cond: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !cond() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition not reached");
}

#[tokio::test]
async fn moves_clamp_to_the_plane() {
    let (server, url) = start().await;
    let mut client = connect(&url).await;

    send(&mut client, json!({"action": "move", "data": {"dx": 500, "dy": 0}})).await;
    send(&mut client, json!({"action": "move", "data": {"dx": 50, "dy": 0}})).await;

    let mut last = recv(&mut client).await.unwrap();
    while last["x"] != 799 {
        last = recv(&mut client).await.unwrap();
    }
    assert_eq!(last, json!({"x": 799, "y": 300}));
    server.shutdown().await;
}

#[tokio::test]
async fn broadcasts_stay_inside_the_room() {
    let (server, url) = start().await;
    let mut a = connect(&url).await;
    let mut b = connect(&url).await;
    let mut other = connect(&format!("{url}?point=2")).await;

    send(&mut a, json!({"action": "subscribe", "data": {"id": 1}})).await;
    assert_eq!(recv(&mut a).await, Some(json!({"x": 400, "y": 300})));
    send(&mut b, json!({"action": "subscribe", "data": {"id": 1}})).await;
    assert_eq!(recv(&mut b).await, Some(json!({"x": 400, "y": 300})));
    send(&mut other, json!({"action": "move", "data": {"dx": 1, "dy": 1}})).await;
    assert_eq!(recv(&mut other).await, Some(json!({"x": 401, "y": 301})));

    let delivered = server
        .manager()
        .broadcast_to_room("point_1", &json!({"x": 10, "y": 20}))
        .unwrap();
    assert_eq!(delivered, 2);
    assert_eq!(recv(&mut a).await, Some(json!({"x": 10, "y": 20})));
    assert_eq!(recv(&mut b).await, Some(json!({"x": 10, "y": 20})));

    send(&mut other, json!({"action": "move", "data": {"dx": 1, "dy": 0}})).await;
    assert_eq!(recv(&mut other).await, Some(json!({"x": 402, "y": 301})));
    server.shutdown().await;
}

#[tokio::test]
async fn bad_frames_do_not_close_the_connection() {
    let (server, url) = start().await;
    let mut client = connect(&url).await;

    client.send(Message::Text("{not json".into())).await.unwrap();
    send(&mut client, json!({"action": "teleport"})).await;
    let reply = recv(&mut client).await.unwrap();
    assert_eq!(reply["code"], "UNKNOWN_ACTION");

    send(&mut client, json!({"action": "subscribe", "data": {"id": 1}})).await;
    assert_eq!(recv(&mut client).await, Some(json!({"x": 400, "y": 300})));
    server.shutdown().await;
}

#[tokio::test]
async fn client_disconnect_cleans_up() {
    let (server, url) = start().await;
    let mut client = connect(&url).await;
    send(&mut client, json!({"action": "subscribe", "data": {"id": 1}})).await;
    let _ = recv(&mut client).await;
    assert_eq!(server.manager().connection_count(), 1);
    assert_eq!(server.manager().room_count(), 1);

    client.close(None).await.unwrap();
    let manager = Arc::clone(server.manager());
    wait_for(|| manager.connection_count() == 0 && manager.room_count() == 0).await;
    wait_for(|| server.points().session_count() == 0).await;
    server.shutdown().await;
}

#[tokio::test]
async fn shutdown_closes_clients() {
    let (server, url) = start().await;
    let mut a = connect(&url).await;
    let _b = connect(&url).await;
    let manager = Arc::clone(server.manager());
    wait_for(|| manager.connection_count() == 2).await;

    server.shutdown().await;
    assert_eq!(server.manager().connection_count(), 0);
    assert_eq!(recv(&mut a).await, None);
    assert!(tokio_tungstenite::connect_async(&url).await.is_err());
}
