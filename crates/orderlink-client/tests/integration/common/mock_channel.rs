//! Mock order channel server for integration tests.
//!
//! Speaks the `{"event", "data"}` frame protocol and can:
//! - Accept connections and record every received frame
//! - Answer `ping` with `pong`
//! - Optionally acknowledge `cancel-order` with `order-cancelled`
//! - Push frames to all live clients and drop them on demand

use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, Mutex};
use tokio_tungstenite::{accept_async, tungstenite::Message};

enum ServerCommand {
    Frame(String),
    Drop,
}

#[derive(Default)]
struct Shared {
    frames: Mutex<Vec<Value>>,
    clients: Mutex<Vec<mpsc::UnboundedSender<ServerCommand>>>,
    connections: AtomicU32,
    no_pong: AtomicBool,
    auto_ack: AtomicBool,
}

/// A mock order channel server.
pub struct MockChannelServer {
    addr: SocketAddr,
    shutdown_tx: mpsc::Sender<()>,
    shared: Arc<Shared>,
}

impl MockChannelServer {
    /// Start a new server on an available port.
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let shared = Arc::new(Shared::default());
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);

        let accept_shared = shared.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    Ok((stream, _)) = listener.accept() => {
                        tokio::spawn(handle_connection(stream, accept_shared.clone()));
                    }
                    _ = shutdown_rx.recv() => {
                        break;
                    }
                }
            }
        });

        Self {
            addr,
            shutdown_tx,
            shared,
        }
    }

    pub fn url(&self) -> String {
        format!("ws://{}", self.addr)
    }

    /// Number of accepted connections so far.
    pub fn connection_count(&self) -> u32 {
        self.shared.connections.load(Ordering::SeqCst)
    }

    /// Stop answering pings.
    pub fn set_pong(&self, enabled: bool) {
        self.shared.no_pong.store(!enabled, Ordering::SeqCst);
    }

    /// Acknowledge every `cancel-order` with a bare `order-cancelled`.
    pub fn set_auto_ack(&self, enabled: bool) {
        self.shared.auto_ack.store(enabled, Ordering::SeqCst);
    }

    /// Payloads of received frames with the given event name.
    pub async fn received(&self, event: &str) -> Vec<Value> {
        self.shared
            .frames
            .lock()
            .await
            .iter()
            .filter(|f| f["event"] == event)
            .map(|f| f["data"].clone())
            .collect()
    }

    /// Wait until at least `count` frames named `event` arrived.
    pub async fn wait_for(&self, event: &str, count: usize) -> Vec<Value> {
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                let frames = self.received(event).await;
                if frames.len() >= count {
                    return frames;
                }
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
        })
        .await
        .unwrap_or_else(|_| panic!("timed out waiting for {count} `{event}` frame(s)"))
    }

    /// Send `{"event": event, "data": data}` to every live client.
    pub async fn push(&self, event: &str, data: Value) {
        let frame = json!({ "event": event, "data": data }).to_string();
        self.broadcast(|| ServerCommand::Frame(frame.clone())).await;
    }

    /// Drop every live connection without a close handshake.
    pub async fn drop_connections(&self) {
        self.broadcast(|| ServerCommand::Drop).await;
    }

    pub async fn shutdown(self) {
        self.drop_connections().await;
        let _ = self.shutdown_tx.send(()).await;
    }

    async fn broadcast(&self, command: impl Fn() -> ServerCommand) {
        let mut clients = self.shared.clients.lock().await;
        clients.retain(|tx| tx.send(command()).is_ok());
    }
}

async fn handle_connection(stream: TcpStream, shared: Arc<Shared>) {
    let ws_stream = match accept_async(stream).await {
        Ok(ws) => ws,
        Err(e) => {
            eprintln!("WebSocket handshake failed: {}", e);
            return;
        }
    };
    shared.connections.fetch_add(1, Ordering::SeqCst);

    let (cmd_tx, mut cmd_rx) = mpsc::unbounded_channel();
    shared.clients.lock().await.push(cmd_tx);

    let (mut write, mut read) = ws_stream.split();

    loop {
        tokio::select! {
            msg = read.next() => {
                let text = match msg {
                    Some(Ok(Message::Text(text))) => text,
                    Some(Ok(Message::Ping(data))) => {
                        let _ = write.send(Message::Pong(data)).await;
                        continue;
                    }
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                    Some(Ok(_)) => continue,
                };

                let Ok(frame) = serde_json::from_str::<Value>(&text) else {
                    continue;
                };
                shared.frames.lock().await.push(frame.clone());

                let reply = match frame["event"].as_str() {
                    Some("ping") if !shared.no_pong.load(Ordering::SeqCst) => {
                        Some(json!({ "event": "pong", "data": {} }))
                    }
                    Some("cancel-order") if shared.auto_ack.load(Ordering::SeqCst) => Some(json!({
                        "event": "order-cancelled",
                        "data": {
                            "orderId": frame["data"]["orderId"],
                            "orderNumber": format!("ORD-{}", frame["data"]["orderId"].as_str().unwrap_or("")),
                        }
                    })),
                    _ => None,
                };
                if let Some(reply) = reply {
                    let _ = write.send(Message::Text(reply.to_string())).await;
                }
            }

            cmd = cmd_rx.recv() => {
                match cmd {
                    Some(ServerCommand::Frame(text)) => {
                        if write.send(Message::Text(text)).await.is_err() {
                            break;
                        }
                    }
                    Some(ServerCommand::Drop) | None => break,
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_server_starts() {
        let server = MockChannelServer::start().await;
        assert!(server.url().starts_with("ws://127.0.0.1:"));
        assert_eq!(server.connection_count(), 0);
        server.shutdown().await;
    }
}
