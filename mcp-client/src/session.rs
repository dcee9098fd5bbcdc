// mcp-client/src/session.rs
use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use tokio::sync::{mpsc, oneshot, Mutex, RwLock};
use tokio::task::JoinHandle;

use mcp_bridge_protocol::{
    constants::{error_codes, methods, PROTOCOL_VERSION},
    messages::{ClientCapabilities, InitializeParams, InitializeResult, JsonRpcMessage},
    types::ClientInfo,
    version,
};

use crate::error::{Error, Result};
use crate::transport::Transport;

/// Handler invoked for every inbound notification, in arrival order
pub type NotificationHandler = Box<dyn Fn(&str, Option<&Value>) + Send + Sync>;

/// Session lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionState {
    Uninitialized,
    Ready,
    Closed,
}

type PendingSlot = oneshot::Sender<Result<JsonRpcMessage>>;
type PendingMap = Arc<Mutex<HashMap<i64, PendingSlot>>>;

fn correlation_key(id: &Value) -> Option<i64> {
    match id {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

/// Handshake-then-serve lifecycle over one transport connection.
///
/// Many requests may be outstanding at once; a single reader task consumes
/// the transport's inbound channel and demultiplexes responses to the waiting
/// callers purely by correlation id. The pending map is locked only for
/// insert and remove, never across a caller's wait.
pub struct Session {
    client_info: ClientInfo,
    capabilities: ClientCapabilities,
    transport: Arc<dyn Transport>,
    receiver: Mutex<Option<mpsc::Receiver<JsonRpcMessage>>>,
    state: Arc<RwLock<SessionState>>,
    next_id: AtomicI64,
    pending: PendingMap,
    server: RwLock<Option<InitializeResult>>,
    notification_handler: Arc<RwLock<Option<NotificationHandler>>>,
    reader: Mutex<Option<JoinHandle<()>>>,
    handshake_timeout: Duration,
}

impl Session {
    pub fn new(
        client_info: ClientInfo,
        capabilities: ClientCapabilities,
        transport: Arc<dyn Transport>,
        receiver: mpsc::Receiver<JsonRpcMessage>,
        handshake_timeout: Duration,
    ) -> Self {
        Self {
            client_info,
            capabilities,
            transport,
            receiver: Mutex::new(Some(receiver)),
            state: Arc::new(RwLock::new(SessionState::Uninitialized)),
            next_id: AtomicI64::new(1),
            pending: Arc::new(Mutex::new(HashMap::new())),
            server: RwLock::new(None),
            notification_handler: Arc::new(RwLock::new(None)),
            reader: Mutex::new(None),
            handshake_timeout,
        }
    }

    /// Register a handler for inbound notifications. Without one they are
    /// dropped at debug level.
    pub async fn set_notification_handler(&self, handler: NotificationHandler) {
        *self.notification_handler.write().await = Some(handler);
    }

    /// The initialize result negotiated during the handshake, if any
    pub async fn server_info(&self) -> Option<InitializeResult> {
        self.server.read().await.clone()
    }

    /// Perform the initialization handshake. Must succeed before any other
    /// request is sent.
    pub async fn initialize(&self) -> Result<InitializeResult> {
        match *self.state.read().await {
            SessionState::Uninitialized => {}
            SessionState::Ready => {
                return Err(Error::Handshake("session already initialized".to_string()))
            }
            SessionState::Closed => return Err(Error::SessionClosed),
        }

        self.transport.start().await?;
        self.spawn_reader().await?;

        match self.handshake().await {
            Ok(result) => Ok(result),
            Err(err) => {
                let _ = self.close().await;
                Err(err)
            }
        }
    }

    async fn handshake(&self) -> Result<InitializeResult> {
        let params = InitializeParams {
            protocol_version: PROTOCOL_VERSION.to_string(),
            capabilities: self.capabilities.clone(),
            client_info: self.client_info.clone(),
        };

        let value = self
            .request_raw(methods::INITIALIZE, Some(json!(params)), self.handshake_timeout)
            .await
            .map_err(|err| match err {
                Error::Protocol { code, message, .. } => Error::Handshake(format!(
                    "initialize rejected: {} (code {})",
                    message, code
                )),
                Error::Timeout(timeout) => {
                    Error::Handshake(format!("initialize timed out after {:?}", timeout))
                }
                other => Error::Handshake(other.to_string()),
            })?;

        let result: InitializeResult = serde_json::from_value(value)
            .map_err(|err| Error::Handshake(format!("invalid initialize result: {}", err)))?;

        if !version::is_supported_version(&result.protocol_version) {
            return Err(Error::Handshake(format!(
                "server wants unsupported protocol version {}",
                result.protocol_version
            )));
        }

        self.notify(methods::INITIALIZED, None)
            .await
            .map_err(|err| Error::Handshake(err.to_string()))?;

        *self.server.write().await = Some(result.clone());
        *self.state.write().await = SessionState::Ready;

        tracing::debug!(
            server = %result.server_info.name,
            version = %result.protocol_version,
            "session ready"
        );

        Ok(result)
    }

    /// Send a one-way notification; no response is expected
    pub async fn notify(&self, method: &str, params: Option<Value>) -> Result<()> {
        if *self.state.read().await == SessionState::Closed {
            return Err(Error::SessionClosed);
        }
        self.transport
            .send(JsonRpcMessage::notification(method, params))
            .await
    }

    /// Send a request and wait for its response, or until `timeout` elapses.
    /// Only the calling context suspends; other requests proceed
    /// independently.
    pub async fn request(
        &self,
        method: &str,
        params: Option<Value>,
        timeout: Duration,
    ) -> Result<Value> {
        match *self.state.read().await {
            SessionState::Ready => {}
            SessionState::Uninitialized => return Err(Error::NotReady),
            SessionState::Closed => return Err(Error::SessionClosed),
        }

        self.request_raw(method, params, timeout).await
    }

    async fn request_raw(
        &self,
        method: &str,
        params: Option<Value>,
        timeout: Duration,
    ) -> Result<Value> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);

        let (slot_tx, slot_rx) = oneshot::channel();
        self.pending.lock().await.insert(id, slot_tx);

        let request = JsonRpcMessage::request(json!(id), method, params);
        if let Err(err) = self.transport.send(request).await {
            self.pending.lock().await.remove(&id);
            let _ = self.close().await;
            return Err(err);
        }

        // The session may have closed between the state check and the send;
        // reclaim the slot instead of waiting out the timeout.
        if *self.state.read().await == SessionState::Closed
            && self.pending.lock().await.remove(&id).is_some()
        {
            return Err(Error::Cancelled);
        }

        match tokio::time::timeout(timeout, slot_rx).await {
            Ok(Ok(resolution)) => match resolution? {
                JsonRpcMessage::Response { result, error, .. } => {
                    if let Some(error) = error {
                        Err(Error::Protocol {
                            code: error.code,
                            message: error.message,
                            data: error.data,
                        })
                    } else {
                        Ok(result.unwrap_or(Value::Null))
                    }
                }
                other => Err(Error::Receive(format!(
                    "pending slot resolved with a non-response message: {:?}",
                    other
                ))),
            },
            Ok(Err(_)) => Err(Error::Cancelled),
            Err(_) => {
                // The entry stays in the map so a late response resolves
                // against the dropped receiver and is logged as stale.
                tracing::warn!(method, id, "request timed out");
                Err(Error::Timeout(timeout))
            }
        }
    }

    async fn spawn_reader(&self) -> Result<()> {
        let mut receiver = self
            .receiver
            .lock()
            .await
            .take()
            .ok_or_else(|| Error::Connect("session reader already running".to_string()))?;

        let pending = Arc::clone(&self.pending);
        let state = Arc::clone(&self.state);
        let handler = Arc::clone(&self.notification_handler);
        let transport = Arc::clone(&self.transport);

        let handle = tokio::spawn(async move {
            while let Some(message) = receiver.recv().await {
                match message {
                    JsonRpcMessage::Response {
                        jsonrpc,
                        id,
                        result,
                        error,
                    } => {
                        let Some(key) = correlation_key(&id) else {
                            tracing::warn!(?id, "dropping response with an unusable id");
                            continue;
                        };

                        let slot = pending.lock().await.remove(&key);
                        let response = JsonRpcMessage::Response {
                            jsonrpc,
                            id,
                            result,
                            error,
                        };

                        match slot {
                            Some(slot) => {
                                if slot.send(Ok(response)).is_err() {
                                    tracing::warn!(
                                        id = key,
                                        "dropping stale response for a timed-out request"
                                    );
                                }
                            }
                            None => {
                                tracing::warn!(id = key, "dropping response with no matching request");
                            }
                        }
                    }
                    JsonRpcMessage::Notification { method, params, .. } => {
                        let guard = handler.read().await;
                        match guard.as_ref() {
                            Some(notify) => notify(&method, params.as_ref()),
                            None => tracing::debug!(method, "dropping unhandled notification"),
                        }
                    }
                    JsonRpcMessage::Request { id, method, .. } => {
                        // This client registers no server-callable capabilities
                        tracing::warn!(method, "rejecting server-initiated request");
                        let reply = JsonRpcMessage::error(
                            id,
                            error_codes::METHOD_NOT_FOUND,
                            &format!("method not supported: {}", method),
                            None,
                        );
                        if let Err(err) = transport.send(reply).await {
                            tracing::debug!("failed to reject server request: {}", err);
                        }
                    }
                }
            }

            // Inbound channel closed: the transport is gone. Fail whatever
            // is still in flight.
            *state.write().await = SessionState::Closed;
            let mut pending = pending.lock().await;
            for (_, slot) in pending.drain() {
                let _ = slot.send(Err(Error::Cancelled));
            }
        });

        *self.reader.lock().await = Some(handle);
        Ok(())
    }

    /// Close the session: idempotent, resolves every pending request with a
    /// cancellation error.
    pub async fn close(&self) -> Result<()> {
        {
            let mut state = self.state.write().await;
            if *state == SessionState::Closed {
                return Ok(());
            }
            *state = SessionState::Closed;
        }

        let result = self.transport.close().await;

        let mut pending = self.pending.lock().await;
        for (_, slot) in pending.drain() {
            let _ = slot.send(Err(Error::Cancelled));
        }

        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::mock::{handshake_responder, MockHandle, MockTransport};
    use serde_json::json;

    fn session_with(
        responder: impl Fn(&JsonRpcMessage) -> Vec<JsonRpcMessage> + Send + Sync + 'static,
    ) -> (Arc<Session>, MockHandle) {
        let (transport, handle, receiver) = MockTransport::new(Box::new(responder));
        let session = Session::new(
            ClientInfo {
                name: "session-test".to_string(),
                version: "0.0.0".to_string(),
            },
            ClientCapabilities::default(),
            Arc::new(transport),
            receiver,
            Duration::from_secs(1),
        );
        (Arc::new(session), handle)
    }

    fn request_ids(sent: &[JsonRpcMessage]) -> Vec<(Value, String)> {
        sent.iter()
            .filter_map(|message| match message {
                JsonRpcMessage::Request { id, method, .. }
                    if method.as_str() != methods::INITIALIZE =>
                {
                    Some((id.clone(), method.clone()))
                }
                _ => None,
            })
            .collect()
    }

    #[tokio::test]
    async fn responses_resolve_out_of_order() {
        let (session, handle) = session_with(handshake_responder);
        session.initialize().await.unwrap();

        let mut tasks = Vec::new();
        for method in ["first", "second", "third"] {
            let session = Arc::clone(&session);
            tasks.push(tokio::spawn(async move {
                session.request(method, None, Duration::from_secs(2)).await
            }));
        }

        // initialize + initialized notification + three requests
        let sent = handle.wait_for_sent(5).await;
        let requests = request_ids(&sent);
        assert_eq!(requests.len(), 3);

        // Resolve in reverse arrival order; each caller must still get its
        // own result.
        for (id, method) in requests.iter().rev() {
            handle
                .inject(JsonRpcMessage::response(id.clone(), json!({ "echo": method })))
                .await;
        }

        for (task, method) in tasks.into_iter().zip(["first", "second", "third"]) {
            let value = task.await.unwrap().unwrap();
            assert_eq!(value, json!({ "echo": method }));
        }
    }

    #[tokio::test]
    async fn close_cancels_pending_requests() {
        let (session, handle) = session_with(handshake_responder);
        session.initialize().await.unwrap();

        let mut tasks = Vec::new();
        for _ in 0..3 {
            let session = Arc::clone(&session);
            tasks.push(tokio::spawn(async move {
                session
                    .request(methods::TOOLS_LIST, None, Duration::from_secs(30))
                    .await
            }));
        }
        handle.wait_for_sent(5).await;

        session.close().await.unwrap();

        for task in tasks {
            let err = task.await.unwrap().unwrap_err();
            assert!(matches!(err, Error::Cancelled), "got {:?}", err);
        }
    }

    #[tokio::test]
    async fn timed_out_request_tolerates_late_response() {
        let (session, handle) = session_with(handshake_responder);
        session.initialize().await.unwrap();

        let err = session
            .request("slow/op", None, Duration::from_millis(50))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Timeout(_)), "got {:?}", err);

        // Answer the timed-out request late; the session must shrug it off.
        let sent = handle.wait_for_sent(3).await;
        let (id, _) = request_ids(&sent)
            .into_iter()
            .find(|(_, method)| method == "slow/op")
            .unwrap();
        handle.inject(JsonRpcMessage::response(id, json!({}))).await;

        // And keep serving fresh requests.
        let follow_up = {
            let session = Arc::clone(&session);
            tokio::spawn(async move {
                session
                    .request("next/op", None, Duration::from_secs(2))
                    .await
            })
        };

        let sent = handle.wait_for_sent(4).await;
        let (id, _) = request_ids(&sent)
            .into_iter()
            .find(|(_, method)| method == "next/op")
            .unwrap();
        handle
            .inject(JsonRpcMessage::response(id, json!({ "ok": true })))
            .await;

        assert_eq!(follow_up.await.unwrap().unwrap(), json!({ "ok": true }));
    }

    #[tokio::test]
    async fn unmatched_response_is_dropped() {
        let (session, handle) = session_with(handshake_responder);
        session.initialize().await.unwrap();

        handle
            .inject(JsonRpcMessage::response(json!(999), json!({})))
            .await;

        // The bogus response must not break demultiplexing.
        let follow_up = {
            let session = Arc::clone(&session);
            tokio::spawn(async move {
                session.request("ping", None, Duration::from_secs(2)).await
            })
        };

        let sent = handle.wait_for_sent(3).await;
        let (id, _) = request_ids(&sent).into_iter().next().unwrap();
        handle.inject(JsonRpcMessage::response(id, json!({}))).await;

        follow_up.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn request_before_initialize_fails_fast() {
        let (session, _handle) = session_with(handshake_responder);
        let err = session
            .request("ping", None, Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotReady), "got {:?}", err);
    }

    #[tokio::test]
    async fn request_after_close_fails_fast() {
        let (session, _handle) = session_with(handshake_responder);
        session.initialize().await.unwrap();
        session.close().await.unwrap();

        let err = session
            .request("ping", None, Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::SessionClosed), "got {:?}", err);
    }

    #[tokio::test]
    async fn unsupported_protocol_version_fails_handshake() {
        let (session, _handle) = session_with(|message| match message {
            JsonRpcMessage::Request { id, method, .. } if method == methods::INITIALIZE => {
                vec![JsonRpcMessage::response(
                    id.clone(),
                    json!({
                        "protocolVersion": "1999-01-01",
                        "capabilities": {},
                        "serverInfo": { "name": "old", "version": "0" },
                    }),
                )]
            }
            _ => Vec::new(),
        });

        let err = session.initialize().await.unwrap_err();
        assert!(matches!(err, Error::Handshake(_)), "got {:?}", err);
    }

    #[tokio::test]
    async fn notifications_reach_registered_handler_in_order() {
        let (session, handle) = session_with(handshake_responder);

        let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        session
            .set_notification_handler(Box::new(move |method, _params| {
                sink.lock().unwrap().push(method.to_string());
            }))
            .await;

        session.initialize().await.unwrap();

        handle
            .inject(JsonRpcMessage::notification(
                methods::TOOLS_LIST_CHANGED,
                None,
            ))
            .await;
        handle
            .inject(JsonRpcMessage::notification(
                methods::RESOURCES_UPDATED,
                Some(json!({ "uri": "file:///tmp/x" })),
            ))
            .await;

        for _ in 0..200 {
            if seen.lock().unwrap().len() == 2 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        assert_eq!(
            *seen.lock().unwrap(),
            vec![
                methods::TOOLS_LIST_CHANGED.to_string(),
                methods::RESOURCES_UPDATED.to_string()
            ]
        );
    }

    #[tokio::test]
    async fn server_initiated_request_is_rejected() {
        let (session, handle) = session_with(handshake_responder);
        session.initialize().await.unwrap();

        handle
            .inject(JsonRpcMessage::request(
                json!("srv-1"),
                "sampling/createMessage",
                None,
            ))
            .await;

        for _ in 0..200 {
            let sent = handle.sent().await;
            let rejection = sent.iter().find_map(|message| match message {
                JsonRpcMessage::Response {
                    error: Some(error), ..
                } => Some(error.clone()),
                _ => None,
            });
            if let Some(error) = rejection {
                assert_eq!(error.code, error_codes::METHOD_NOT_FOUND);
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("server request was never rejected");
    }
}
