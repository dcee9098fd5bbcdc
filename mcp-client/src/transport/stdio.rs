// mcp-client/src/transport/stdio.rs
use std::collections::HashMap;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::{mpsc, Mutex};

use mcp_bridge_protocol::{codec, JsonRpcMessage};

use crate::error::{Error, Result};

/// Configuration for a child process speaking line-delimited JSON-RPC on
/// its standard streams.
#[derive(Debug, Clone, Default)]
pub struct StdioConfig {
    /// Executable path
    pub path: String,

    /// Argument list
    pub args: Vec<String>,

    /// Environment for the child. Nothing is inherited from the parent: an
    /// empty overlay spawns the child with an empty environment.
    pub env: HashMap<String, String>,
}

/// Transport implementation that uses stdio to communicate with a child process
pub struct StdioTransport {
    config: StdioConfig,
    child: Arc<Mutex<Option<Child>>>,
    stdin: Arc<Mutex<Option<ChildStdin>>>,
    tx: Mutex<Option<mpsc::Sender<JsonRpcMessage>>>,
    write_timeout: Duration,
}

impl StdioTransport {
    /// Create a new stdio transport for the given child process configuration
    pub fn new(config: StdioConfig) -> (Self, mpsc::Receiver<JsonRpcMessage>) {
        let (tx, rx) = mpsc::channel(super::CHANNEL_CAPACITY);

        let transport = Self {
            config,
            child: Arc::new(Mutex::new(None)),
            stdin: Arc::new(Mutex::new(None)),
            tx: Mutex::new(Some(tx)),
            write_timeout: Duration::from_secs(10),
        };

        (transport, rx)
    }

    /// Override the bound on a single stdin write
    pub fn with_write_timeout(mut self, timeout: Duration) -> Self {
        self.write_timeout = timeout;
        self
    }
}

#[async_trait]
impl super::Transport for StdioTransport {
    async fn start(&self) -> Result<()> {
        let tx = self
            .tx
            .lock()
            .await
            .take()
            .ok_or_else(|| Error::Connect("transport already started".to_string()))?;

        let mut child = Command::new(&self.config.path)
            .args(&self.config.args)
            .env_clear()
            .envs(&self.config.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|err| Error::Connect(format!("failed to spawn {}: {}", self.config.path, err)))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::Connect("child stdout unavailable".to_string()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| Error::Connect("child stderr unavailable".to_string()))?;
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| Error::Connect("child stdin unavailable".to_string()))?;

        *self.child.lock().await = Some(child);
        *self.stdin.lock().await = Some(stdin);

        // Sole owner of the inbound sender: the channel closes when the
        // child's stdout does.
        tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();

            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => {
                        if line.trim().is_empty() {
                            continue;
                        }
                        match codec::decode(&line) {
                            Ok(message) => {
                                if tx.send(message).await.is_err() {
                                    break;
                                }
                            }
                            Err(err) => {
                                tracing::warn!("dropping malformed frame from child: {}", err);
                            }
                        }
                    }
                    Ok(None) => break,
                    Err(err) => {
                        tracing::error!("failed to read from child stdout: {}", err);
                        break;
                    }
                }
            }
        });

        // Stderr is not part of the protocol channel; surface it for
        // diagnostics.
        tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                tracing::warn!(target: "mcp_bridge_client::child_stderr", "{}", line);
            }
        });

        Ok(())
    }

    async fn send(&self, message: JsonRpcMessage) -> Result<()> {
        let serialized = codec::encode(&message)
            .map_err(|err| Error::Send(format!("failed to encode message: {}", err)))?;

        let mut guard = self.stdin.lock().await;
        let stdin = guard
            .as_mut()
            .ok_or_else(|| Error::Send("child process not started".to_string()))?;

        let write = async {
            stdin.write_all(serialized.as_bytes()).await?;
            stdin.write_all(b"\n").await?;
            stdin.flush().await
        };

        match tokio::time::timeout(self.write_timeout, write).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(err)) => Err(Error::Send(format!("failed to write to child stdin: {}", err))),
            Err(_) => Err(Error::Send(format!(
                "write to child stdin stalled for {:?}",
                self.write_timeout
            ))),
        }
    }

    async fn close(&self) -> Result<()> {
        // Close stdin first to signal EOF
        self.stdin.lock().await.take();
        self.tx.lock().await.take();

        let mut guard = self.child.lock().await;
        if let Some(mut child) = guard.take() {
            match tokio::time::timeout(Duration::from_secs(1), child.wait()).await {
                Ok(Ok(_)) => {}
                _ => {
                    // Did not exit gracefully
                    if let Err(err) = child.start_kill() {
                        tracing::debug!("failed to kill child process: {}", err);
                    }
                    let _ = child.wait().await;
                }
            }
        }

        Ok(())
    }
}
