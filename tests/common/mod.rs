//! Shared utilities for integration testing.

use std::net::SocketAddr;
use std::time::Duration;

use futures_util::StreamExt;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use termws::ServerConfig;

pub type WsClient = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Config suitable for tests: loopback, ephemeral port, short timeouts.
pub fn test_config() -> ServerConfig {
    let mut config = ServerConfig::default();
    config.listener.host = "127.0.0.1".to_string();
    config.listener.port = 0;
    config.timeouts.handshake_secs = 2;
    config.timeouts.drain_secs = 5;
    config
}

/// Open a websocket client connection to the server.
pub async fn connect(addr: SocketAddr) -> WsClient {
    let (ws, _response) = connect_async(format!("ws://{}", addr))
        .await
        .expect("websocket connect failed");
    ws
}

/// Poll `predicate` until it holds or `deadline` elapses.
pub async fn wait_until<F: Fn() -> bool>(deadline: Duration, predicate: F) -> bool {
    let start = tokio::time::Instant::now();
    while start.elapsed() < deadline {
        if predicate() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    predicate()
}

/// Drain a client until its connection ends. Returns whether a Close frame
/// was observed on the way out.
#[allow(dead_code)]
pub async fn drain_to_end(ws: &mut WsClient) -> bool {
    let mut saw_close = false;
    loop {
        match tokio::time::timeout(Duration::from_secs(5), ws.next()).await {
            Ok(Some(Ok(Message::Close(_)))) => saw_close = true,
            Ok(Some(Ok(_))) => {}
            Ok(Some(Err(_))) | Ok(None) => break,
            Err(_) => panic!("connection did not terminate"),
        }
    }
    saw_close
}
