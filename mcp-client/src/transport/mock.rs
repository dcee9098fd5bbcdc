// mcp-client/src/transport/mock.rs
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use tokio::sync::{mpsc, Mutex};

use mcp_bridge_protocol::{constants::methods, JsonRpcMessage, PROTOCOL_VERSION};

use crate::error::Result;

type Responder = Box<dyn Fn(&JsonRpcMessage) -> Vec<JsonRpcMessage> + Send + Sync>;

/// In-process transport for session and facade tests. Outbound messages are
/// recorded and optionally answered by the responder; the handle can inject
/// arbitrary inbound messages.
pub(crate) struct MockTransport {
    tx: Arc<Mutex<Option<mpsc::Sender<JsonRpcMessage>>>>,
    sent: Arc<Mutex<Vec<JsonRpcMessage>>>,
    responder: Responder,
}

pub(crate) struct MockHandle {
    tx: Arc<Mutex<Option<mpsc::Sender<JsonRpcMessage>>>>,
    sent: Arc<Mutex<Vec<JsonRpcMessage>>>,
}

impl MockTransport {
    pub(crate) fn new(
        responder: Responder,
    ) -> (Self, MockHandle, mpsc::Receiver<JsonRpcMessage>) {
        let (tx, rx) = mpsc::channel(super::CHANNEL_CAPACITY);
        let tx = Arc::new(Mutex::new(Some(tx)));
        let sent = Arc::new(Mutex::new(Vec::new()));

        let handle = MockHandle {
            tx: Arc::clone(&tx),
            sent: Arc::clone(&sent),
        };

        (Self { tx, sent, responder }, handle, rx)
    }
}

impl MockHandle {
    /// Deliver a message to the session as if it arrived on the wire
    pub(crate) async fn inject(&self, message: JsonRpcMessage) {
        let guard = self.tx.lock().await;
        if let Some(tx) = guard.as_ref() {
            let _ = tx.send(message).await;
        }
    }

    pub(crate) async fn sent(&self) -> Vec<JsonRpcMessage> {
        self.sent.lock().await.clone()
    }

    /// Wait until at least `count` outbound messages have been observed
    pub(crate) async fn wait_for_sent(&self, count: usize) -> Vec<JsonRpcMessage> {
        for _ in 0..200 {
            let sent = self.sent.lock().await.clone();
            if sent.len() >= count {
                return sent;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("transport never saw {} outbound messages", count);
    }
}

#[async_trait]
impl super::Transport for MockTransport {
    async fn start(&self) -> Result<()> {
        Ok(())
    }

    async fn send(&self, message: JsonRpcMessage) -> Result<()> {
        self.sent.lock().await.push(message.clone());

        let replies = (self.responder)(&message);
        if !replies.is_empty() {
            let guard = self.tx.lock().await;
            if let Some(tx) = guard.as_ref() {
                for reply in replies {
                    let _ = tx.send(reply).await;
                }
            }
        }

        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.tx.lock().await.take();
        Ok(())
    }
}

/// Responder that completes the initialization handshake and nothing else
pub(crate) fn handshake_responder(message: &JsonRpcMessage) -> Vec<JsonRpcMessage> {
    match message {
        JsonRpcMessage::Request { id, method, .. } if method == methods::INITIALIZE => {
            vec![JsonRpcMessage::response(
                id.clone(),
                json!({
                    "protocolVersion": PROTOCOL_VERSION,
                    "capabilities": { "tools": { "listChanged": true } },
                    "serverInfo": { "name": "mock-server", "version": "0.0.0" },
                }),
            )]
        }
        _ => Vec::new(),
    }
}
