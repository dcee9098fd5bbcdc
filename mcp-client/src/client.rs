// mcp-client/src/client.rs
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use tokio::sync::mpsc;

use mcp_bridge_protocol::{
    constants::methods,
    messages::{ClientCapabilities, InitializeResult, JsonRpcMessage},
    types::{
        prompt::{Prompt, PromptGetParams, PromptGetResult, PromptsListParams, PromptsListResult},
        resource::{
            Resource, ResourceReadParams, ResourceReadResult, ResourceTemplate,
            ResourceTemplatesListParams, ResourceTemplatesListResult, ResourcesListParams,
            ResourcesListResult,
        },
        tool::{Tool, ToolCallParams, ToolCallResult, ToolsListParams, ToolsListResult},
        ClientInfo,
    },
};

use crate::error::{Error, Result};
use crate::paginate;
use crate::session::{NotificationHandler, Session};
use crate::transport::Transport;

fn parse<T: DeserializeOwned>(value: Value) -> Result<T> {
    serde_json::from_value(value).map_err(|err| Error::Decode(err.into()))
}

/// MCP client builder
pub struct ClientBuilder {
    name: String,
    version: String,
    transport: Option<(Arc<dyn Transport>, mpsc::Receiver<JsonRpcMessage>)>,
    request_timeout: Duration,
    ping_timeout: Duration,
}

impl ClientBuilder {
    /// Create a new client builder
    pub fn new(name: &str, version: &str) -> Self {
        Self {
            name: name.to_string(),
            version: version.to_string(),
            transport: None,
            request_timeout: Duration::from_secs(30),
            ping_timeout: Duration::from_secs(5),
        }
    }

    /// Set the transport to use, together with its inbound channel
    pub fn with_transport<T: Transport>(
        mut self,
        transport: T,
        receiver: mpsc::Receiver<JsonRpcMessage>,
    ) -> Self {
        let transport: Arc<dyn Transport> = Arc::new(transport);
        self.transport = Some((transport, receiver));
        self
    }

    /// Override the default per-request timeout
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Override the bound on a `ping` round-trip
    pub fn with_ping_timeout(mut self, timeout: Duration) -> Self {
        self.ping_timeout = timeout;
        self
    }

    /// Build the client
    pub fn build(self) -> Result<Client> {
        let (transport, receiver) = self
            .transport
            .ok_or_else(|| Error::Connect("transport is required".to_string()))?;

        let session = Session::new(
            ClientInfo {
                name: self.name,
                version: self.version,
            },
            ClientCapabilities::default(),
            transport,
            receiver,
            self.request_timeout,
        );

        Ok(Client {
            session: Arc::new(session),
            request_timeout: self.request_timeout,
            ping_timeout: self.ping_timeout,
        })
    }
}

/// MCP client facade: one method per caller-facing operation, each a thin
/// translation onto a session request.
pub struct Client {
    session: Arc<Session>,
    request_timeout: Duration,
    ping_timeout: Duration,
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("request_timeout", &self.request_timeout)
            .field("ping_timeout", &self.ping_timeout)
            .finish()
    }
}

impl Client {
    /// Initialize the connection to the server
    pub async fn initialize(&self) -> Result<InitializeResult> {
        self.session.initialize().await
    }

    /// Register a handler for server notifications
    pub async fn set_notification_handler(&self, handler: NotificationHandler) {
        self.session.set_notification_handler(handler).await;
    }

    /// The server's initialize result, once the handshake has completed
    pub async fn server_info(&self) -> Option<InitializeResult> {
        self.session.server_info().await
    }

    /// Lightweight liveness probe. True only if the server answers within
    /// the ping timeout.
    pub async fn ping(&self) -> bool {
        match self
            .session
            .request(methods::PING, None, self.ping_timeout)
            .await
        {
            Ok(_) => true,
            Err(err) => {
                tracing::debug!("ping failed: {}", err);
                false
            }
        }
    }

    /// List one page of tools
    pub async fn list_tools(&self, cursor: Option<String>) -> Result<ToolsListResult> {
        let params = ToolsListParams { cursor };
        let value = self
            .session
            .request(methods::TOOLS_LIST, Some(json!(params)), self.request_timeout)
            .await?;
        parse(value)
    }

    /// List every tool, following continuation cursors to exhaustion
    pub async fn list_all_tools(&self) -> Result<Vec<Tool>> {
        paginate::collect_pages(|cursor| async move {
            let page = self.list_tools(cursor).await?;
            Ok((page.tools, page.next_cursor))
        })
        .await
    }

    /// Call a tool on the server
    pub async fn call_tool(&self, name: &str, arguments: Value) -> Result<ToolCallResult> {
        let params = ToolCallParams {
            name: name.to_string(),
            arguments,
        };
        let value = self
            .session
            .request(methods::TOOLS_CALL, Some(json!(params)), self.request_timeout)
            .await?;
        parse(value)
    }

    /// List one page of resources
    pub async fn list_resources(&self, cursor: Option<String>) -> Result<ResourcesListResult> {
        let params = ResourcesListParams { cursor };
        let value = self
            .session
            .request(
                methods::RESOURCES_LIST,
                Some(json!(params)),
                self.request_timeout,
            )
            .await?;
        parse(value)
    }

    /// List every resource, following continuation cursors to exhaustion
    pub async fn list_all_resources(&self) -> Result<Vec<Resource>> {
        paginate::collect_pages(|cursor| async move {
            let page = self.list_resources(cursor).await?;
            Ok((page.resources, page.next_cursor))
        })
        .await
    }

    /// Read the contents of a resource by URI
    pub async fn read_resource(&self, uri: &str) -> Result<ResourceReadResult> {
        let params = ResourceReadParams {
            uri: uri.to_string(),
        };
        let value = self
            .session
            .request(
                methods::RESOURCES_READ,
                Some(json!(params)),
                self.request_timeout,
            )
            .await?;
        parse(value)
    }

    /// List one page of resource templates
    pub async fn list_resource_templates(
        &self,
        cursor: Option<String>,
    ) -> Result<ResourceTemplatesListResult> {
        let params = ResourceTemplatesListParams { cursor };
        let value = self
            .session
            .request(
                methods::RESOURCES_TEMPLATES_LIST,
                Some(json!(params)),
                self.request_timeout,
            )
            .await?;
        parse(value)
    }

    /// List every resource template, following continuation cursors
    pub async fn list_all_resource_templates(&self) -> Result<Vec<ResourceTemplate>> {
        paginate::collect_pages(|cursor| async move {
            let page = self.list_resource_templates(cursor).await?;
            Ok((page.resource_templates, page.next_cursor))
        })
        .await
    }

    /// List one page of prompts
    pub async fn list_prompts(&self, cursor: Option<String>) -> Result<PromptsListResult> {
        let params = PromptsListParams { cursor };
        let value = self
            .session
            .request(
                methods::PROMPTS_LIST,
                Some(json!(params)),
                self.request_timeout,
            )
            .await?;
        parse(value)
    }

    /// List every prompt, following continuation cursors to exhaustion
    pub async fn list_all_prompts(&self) -> Result<Vec<Prompt>> {
        paginate::collect_pages(|cursor| async move {
            let page = self.list_prompts(cursor).await?;
            Ok((page.prompts, page.next_cursor))
        })
        .await
    }

    /// Retrieve a prompt, optionally applying arguments
    pub async fn get_prompt(
        &self,
        name: &str,
        arguments: Option<HashMap<String, String>>,
    ) -> Result<PromptGetResult> {
        let params = PromptGetParams {
            name: name.to_string(),
            arguments,
        };
        let value = self
            .session
            .request(methods::PROMPTS_GET, Some(json!(params)), self.request_timeout)
            .await?;
        parse(value)
    }

    /// Shut down the client, cancelling anything still in flight
    pub async fn shutdown(&self) -> Result<()> {
        self.session.close().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::mock::{handshake_responder, MockTransport};
    use mcp_bridge_protocol::types::tool::ToolContent;

    fn client_with(
        responder: impl Fn(&JsonRpcMessage) -> Vec<JsonRpcMessage> + Send + Sync + 'static,
    ) -> Client {
        let (transport, _handle, receiver) = MockTransport::new(Box::new(responder));
        ClientBuilder::new("facade-test", "0.0.0")
            .with_transport(transport, receiver)
            .with_ping_timeout(Duration::from_millis(100))
            .build()
            .unwrap()
    }

    fn echo_responder(message: &JsonRpcMessage) -> Vec<JsonRpcMessage> {
        let JsonRpcMessage::Request {
            id, method, params, ..
        } = message
        else {
            return Vec::new();
        };

        match method.as_str() {
            methods::INITIALIZE => handshake_responder(message),
            methods::PING => vec![JsonRpcMessage::response(id.clone(), json!({}))],
            methods::TOOLS_CALL => {
                let text = params
                    .as_ref()
                    .and_then(|p| p.get("arguments"))
                    .and_then(|a| a.get("message"))
                    .and_then(|m| m.as_str())
                    .unwrap_or_default()
                    .to_string();
                vec![JsonRpcMessage::response(
                    id.clone(),
                    json!({ "content": [{ "type": "text", "text": text }] }),
                )]
            }
            methods::TOOLS_LIST => {
                let cursor = params
                    .as_ref()
                    .and_then(|p| p.get("cursor"))
                    .and_then(|c| c.as_str())
                    .map(str::to_string);
                let result = match cursor.as_deref() {
                    None => json!({
                        "tools": [
                            { "name": "alpha", "inputSchema": {} },
                            { "name": "beta", "inputSchema": {} },
                        ],
                        "nextCursor": "page-2",
                    }),
                    Some("page-2") => json!({
                        "tools": [{ "name": "gamma", "inputSchema": {} }],
                    }),
                    Some(_) => json!({ "tools": [] }),
                };
                vec![JsonRpcMessage::response(id.clone(), result)]
            }
            methods::PROMPTS_GET => vec![JsonRpcMessage::response(
                id.clone(),
                json!({
                    "messages": [
                        { "role": "user", "content": { "type": "text", "text": "hi" } }
                    ]
                }),
            )],
            _ => vec![JsonRpcMessage::error(
                id.clone(),
                -32601,
                &format!("no handler for {}", method),
                None,
            )],
        }
    }

    #[tokio::test]
    async fn call_tool_returns_first_text_block() {
        let client = client_with(echo_responder);
        client.initialize().await.unwrap();

        let result = client
            .call_tool("echo", json!({ "message": "Hello, world!" }))
            .await
            .unwrap();

        match &result.content[0] {
            ToolContent::Text { text } => assert_eq!(text, "Hello, world!"),
            other => panic!("expected text content, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn ping_is_true_when_server_answers() {
        let client = client_with(echo_responder);
        client.initialize().await.unwrap();
        assert!(client.ping().await);
    }

    #[tokio::test]
    async fn ping_is_false_when_server_is_silent() {
        let client = client_with(handshake_responder);
        client.initialize().await.unwrap();
        assert!(!client.ping().await);
    }

    #[tokio::test]
    async fn list_all_tools_follows_cursors() {
        let client = client_with(echo_responder);
        client.initialize().await.unwrap();

        let tools = client.list_all_tools().await.unwrap();
        let names: Vec<&str> = tools.iter().map(|tool| tool.name.as_str()).collect();
        assert_eq!(names, vec!["alpha", "beta", "gamma"]);
    }

    #[tokio::test]
    async fn server_errors_pass_through_typed() {
        let client = client_with(echo_responder);
        client.initialize().await.unwrap();

        let err = client.read_resource("file:///missing").await.unwrap_err();
        match err {
            Error::Protocol { code, .. } => assert_eq!(code, -32601),
            other => panic!("expected protocol error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn get_prompt_parses_messages() {
        let client = client_with(echo_responder);
        client.initialize().await.unwrap();

        let prompt = client.get_prompt("greeting", None).await.unwrap();
        assert_eq!(prompt.messages.len(), 1);
        assert_eq!(prompt.messages[0].role, "user");
    }

    #[tokio::test]
    async fn build_without_transport_is_an_error() {
        let err = ClientBuilder::new("facade-test", "0.0.0")
            .build()
            .unwrap_err();
        assert!(matches!(err, Error::Connect(_)), "got {:?}", err);
    }
}
