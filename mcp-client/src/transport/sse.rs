// mcp-client/src/transport/sse.rs
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::header;
use tokio::sync::{mpsc, oneshot, Mutex, RwLock};
use tokio::task::JoinHandle;

use mcp_bridge_protocol::{codec, JsonRpcMessage};

use crate::error::{Error, Result};

/// Configuration for the HTTP+SSE transport
#[derive(Debug, Clone)]
pub struct SseConfig {
    /// URL of the event stream; the server announces the POST endpoint for
    /// outbound messages on it.
    pub base_url: String,

    /// Bound on establishing the stream and receiving the endpoint event
    pub connect_timeout: Duration,
}

impl SseConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            connect_timeout: Duration::from_secs(30),
        }
    }
}

/// One parsed server-sent event
#[derive(Debug, Default, PartialEq)]
pub(crate) struct SseEvent {
    pub name: Option<String>,
    pub data: String,
}

/// Parse a single event block (the text between two blank lines).
pub(crate) fn parse_event(raw: &str) -> SseEvent {
    let mut name = None;
    let mut data = Vec::new();

    for line in raw.lines() {
        // Lines starting with a colon are comments / keep-alives
        if line.starts_with(':') {
            continue;
        }

        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };

        match field {
            "event" => name = Some(value.to_string()),
            "data" => data.push(value.to_string()),
            _ => {}
        }
    }

    SseEvent {
        name,
        data: data.join("\n"),
    }
}

/// Transport implementation over a persistent SSE stream (inbound) and a
/// server-announced POST endpoint (outbound)
pub struct SseTransport {
    config: SseConfig,
    http: reqwest::Client,
    endpoint: Arc<RwLock<Option<reqwest::Url>>>,
    tx: Mutex<Option<mpsc::Sender<JsonRpcMessage>>>,
    reader: Mutex<Option<JoinHandle<()>>>,
}

impl SseTransport {
    /// Create a new SSE transport for the given base URL
    pub fn new(config: SseConfig) -> (Self, mpsc::Receiver<JsonRpcMessage>) {
        let (tx, rx) = mpsc::channel(super::CHANNEL_CAPACITY);

        let transport = Self {
            config,
            http: reqwest::Client::new(),
            endpoint: Arc::new(RwLock::new(None)),
            tx: Mutex::new(Some(tx)),
            reader: Mutex::new(None),
        };

        (transport, rx)
    }
}

#[async_trait]
impl super::Transport for SseTransport {
    async fn start(&self) -> Result<()> {
        let tx = self
            .tx
            .lock()
            .await
            .take()
            .ok_or_else(|| Error::Connect("transport already started".to_string()))?;

        let base = reqwest::Url::parse(&self.config.base_url)
            .map_err(|err| Error::Connect(format!("invalid base URL: {}", err)))?;

        let response = self
            .http
            .get(base.clone())
            .header(header::ACCEPT, "text/event-stream")
            .send()
            .await
            .map_err(|err| Error::Connect(format!("event stream request failed: {}", err)))?;

        if !response.status().is_success() {
            return Err(Error::Connect(format!(
                "event stream returned {}",
                response.status()
            )));
        }

        let endpoint = Arc::clone(&self.endpoint);
        let (endpoint_tx, endpoint_rx) = oneshot::channel();

        let handle = tokio::spawn(async move {
            let mut endpoint_tx = Some(endpoint_tx);
            let mut stream = response.bytes_stream();
            let mut buffer = String::new();

            'stream: while let Some(chunk) = stream.next().await {
                let chunk = match chunk {
                    Ok(chunk) => chunk,
                    Err(err) => {
                        tracing::error!("event stream failed: {}", err);
                        break;
                    }
                };

                buffer.push_str(&String::from_utf8_lossy(&chunk));

                // Events are separated by a blank line
                while let Some(pos) = buffer.find("\n\n") {
                    let raw: String = buffer.drain(..pos + 2).collect();
                    let event = parse_event(&raw);

                    match event.name.as_deref() {
                        Some("endpoint") => {
                            match base.join(event.data.trim()) {
                                Ok(url) => {
                                    tracing::debug!(%url, "server announced message endpoint");
                                    *endpoint.write().await = Some(url);
                                    if let Some(ready) = endpoint_tx.take() {
                                        let _ = ready.send(());
                                    }
                                }
                                Err(err) => {
                                    tracing::warn!("ignoring invalid endpoint event: {}", err);
                                }
                            }
                        }
                        Some("message") | None => {
                            if event.data.trim().is_empty() {
                                continue;
                            }
                            match codec::decode(&event.data) {
                                Ok(message) => {
                                    if tx.send(message).await.is_err() {
                                        break 'stream;
                                    }
                                }
                                Err(err) => {
                                    tracing::warn!(
                                        "dropping malformed frame from event stream: {}",
                                        err
                                    );
                                }
                            }
                        }
                        Some(other) => {
                            tracing::debug!(event = other, "ignoring unknown event type");
                        }
                    }
                }
            }
            // Dropping tx here closes the inbound channel; retrying is the
            // caller's decision, not this layer's.
        });

        *self.reader.lock().await = Some(handle);

        match tokio::time::timeout(self.config.connect_timeout, endpoint_rx).await {
            Ok(Ok(())) => Ok(()),
            _ => {
                let _ = self.close().await;
                Err(Error::Connect(
                    "server did not announce a message endpoint".to_string(),
                ))
            }
        }
    }

    async fn send(&self, message: JsonRpcMessage) -> Result<()> {
        let endpoint = self
            .endpoint
            .read()
            .await
            .clone()
            .ok_or_else(|| Error::Send("transport not started".to_string()))?;

        let body = codec::encode(&message)
            .map_err(|err| Error::Send(format!("failed to encode message: {}", err)))?;

        let response = self
            .http
            .post(endpoint)
            .header(header::CONTENT_TYPE, "application/json")
            .body(body)
            .send()
            .await
            .map_err(|err| Error::Send(err.to_string()))?;

        if !response.status().is_success() {
            return Err(Error::Send(format!(
                "message endpoint returned {}",
                response.status()
            )));
        }

        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.tx.lock().await.take();
        if let Some(handle) = self.reader.lock().await.take() {
            handle.abort();
        }
        Ok(())
    }
}
