// mcp-client/src/transport/streamable_http.rs
use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::header;
use tokio::sync::{mpsc, Mutex, RwLock};

use mcp_bridge_protocol::{codec, JsonRpcMessage};

use crate::error::{Error, Result};

use super::sse::parse_event;

/// Header carrying the server-assigned session token
const SESSION_HEADER: &str = "Mcp-Session-Id";

/// Configuration for the streamable HTTP transport
#[derive(Debug, Clone)]
pub struct StreamableHttpConfig {
    /// The single endpoint handling both directions
    pub url: String,
}

impl StreamableHttpConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }
}

/// Transport implementation over a single bidirectional HTTP endpoint.
///
/// Every outbound message is a POST; the response body carries zero or more
/// inbound messages, either as one JSON object or as an SSE stream. Session
/// continuity uses the token the server assigns on the first exchange.
pub struct StreamableHttpTransport {
    config: StreamableHttpConfig,
    http: reqwest::Client,
    session_id: Arc<RwLock<Option<String>>>,
    tx: Arc<Mutex<Option<mpsc::Sender<JsonRpcMessage>>>>,
}

impl StreamableHttpTransport {
    /// Create a new streamable HTTP transport for the given endpoint
    pub fn new(config: StreamableHttpConfig) -> (Self, mpsc::Receiver<JsonRpcMessage>) {
        let (tx, rx) = mpsc::channel(super::CHANNEL_CAPACITY);

        let transport = Self {
            config,
            http: reqwest::Client::new(),
            session_id: Arc::new(RwLock::new(None)),
            tx: Arc::new(Mutex::new(Some(tx))),
        };

        (transport, rx)
    }

    async fn capture_session_id(&self, response: &reqwest::Response) {
        let Some(session) = response
            .headers()
            .get(SESSION_HEADER)
            .and_then(|value| value.to_str().ok())
        else {
            return;
        };

        let mut guard = self.session_id.write().await;
        if guard.as_deref() != Some(session) {
            tracing::debug!(session, "server assigned session token");
            *guard = Some(session.to_string());
        }
    }
}

#[async_trait]
impl super::Transport for StreamableHttpTransport {
    async fn start(&self) -> Result<()> {
        // The channel is established lazily by the first POST; only the
        // endpoint URL is validated here.
        reqwest::Url::parse(&self.config.url)
            .map_err(|err| Error::Connect(format!("invalid endpoint URL: {}", err)))?;
        Ok(())
    }

    async fn send(&self, message: JsonRpcMessage) -> Result<()> {
        let body = codec::encode(&message)
            .map_err(|err| Error::Send(format!("failed to encode message: {}", err)))?;

        let mut request = self
            .http
            .post(&self.config.url)
            .header(header::ACCEPT, "application/json, text/event-stream")
            .header(header::CONTENT_TYPE, "application/json")
            .body(body);

        if let Some(session) = self.session_id.read().await.as_deref() {
            request = request.header(SESSION_HEADER, session);
        }

        let response = request
            .send()
            .await
            .map_err(|err| Error::Send(err.to_string()))?;

        self.capture_session_id(&response).await;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::Send(format!("endpoint returned {}", status)));
        }

        // Notification acks carry no body
        if status == reqwest::StatusCode::ACCEPTED || status == reqwest::StatusCode::NO_CONTENT {
            return Ok(());
        }

        let content_type = response
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .unwrap_or("")
            .to_string();

        if content_type.starts_with("text/event-stream") {
            let tx = self.tx.lock().await.clone();
            let Some(tx) = tx else {
                return Ok(());
            };

            // Drain the response stream without blocking the sender; inbound
            // order within one response body is preserved, matching what the
            // channel produced.
            tokio::spawn(async move {
                let mut stream = response.bytes_stream();
                let mut buffer = String::new();

                while let Some(chunk) = stream.next().await {
                    let chunk = match chunk {
                        Ok(chunk) => chunk,
                        Err(err) => {
                            tracing::error!("response stream failed: {}", err);
                            return;
                        }
                    };

                    buffer.push_str(&String::from_utf8_lossy(&chunk));

                    while let Some(pos) = buffer.find("\n\n") {
                        let raw: String = buffer.drain(..pos + 2).collect();
                        let event = parse_event(&raw);

                        if event.data.trim().is_empty() {
                            continue;
                        }
                        match codec::decode(&event.data) {
                            Ok(message) => {
                                if tx.send(message).await.is_err() {
                                    return;
                                }
                            }
                            Err(err) => {
                                tracing::warn!(
                                    "dropping malformed frame from response stream: {}",
                                    err
                                );
                            }
                        }
                    }
                }
            });

            return Ok(());
        }

        let text = response
            .text()
            .await
            .map_err(|err| Error::Receive(err.to_string()))?;
        if text.trim().is_empty() {
            return Ok(());
        }

        match codec::decode(&text) {
            Ok(inbound) => {
                let guard = self.tx.lock().await;
                if let Some(tx) = guard.as_ref() {
                    let _ = tx.send(inbound).await;
                }
            }
            Err(err) => {
                tracing::warn!("dropping malformed response body: {}", err);
            }
        }

        Ok(())
    }

    async fn close(&self) -> Result<()> {
        let Some(_tx) = self.tx.lock().await.take() else {
            return Ok(());
        };

        // Best-effort session teardown
        let session = self.session_id.read().await.clone();
        if let Some(session) = session {
            let result = self
                .http
                .delete(&self.config.url)
                .header(SESSION_HEADER, &session)
                .send()
                .await;
            if let Err(err) = result {
                tracing::debug!("session delete failed: {}", err);
            }
        }

        Ok(())
    }
}
