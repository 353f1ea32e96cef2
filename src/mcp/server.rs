use std::{collections::HashMap, sync::Arc};

use axum::{
    extract::{Json, State},
    response::{
        sse::{Event, Sse},
        IntoResponse,
    },
    routing::{get, post},
    Router,
};
use futures::stream::Stream;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::broadcast;
use tower_http::cors::CorsLayer;
use tracing::{error, info, warn};

use crate::bus::EventBus;
use crate::chat::Message;
use crate::manager::Manager;
use crate::view::history::HistorySection;
use crate::view::state::ChatState;

// -----------------------------------------------------------------------------
// MCP Protocol Types (Simplified for basic SSE/JSON-RPC transport)
// -----------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
#[serde(tag = "method")]
pub enum JsonRpcRequest {
    #[serde(rename = "initialize")]
    Initialize { params: InitializeParams, id: Value },
    #[serde(rename = "tools/list")]
    ListTools { params: Option<Value>, id: Value },
    #[serde(rename = "tools/call")]
    CallTool { params: CallToolParams, id: Value },
    // Catch-all for other methods we don't support yet, or notifications
    #[serde(untagged)]
    Unknown {
        method: String,
        params: Option<Value>,
        id: Option<Value>,
    },
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeParams {
    pub protocol_version: String,
    #[serde(default)]
    pub capabilities: Value,
    #[serde(default)]
    pub client_info: Value,
}

#[derive(Debug, Deserialize)]
pub struct CallToolParams {
    pub name: String,
    pub arguments: Option<HashMap<String, Value>>,
}

impl CallToolParams {
    fn str_arg(&self, key: &str) -> Result<&str, String> {
        self.arguments
            .as_ref()
            .and_then(|args| args.get(key))
            .and_then(|v| v.as_str())
            .ok_or_else(|| format!("Missing '{}' argument", key))
    }

    fn bool_arg(&self, key: &str) -> Result<bool, String> {
        match self.arguments.as_ref().and_then(|args| args.get(key)) {
            Some(Value::Bool(value)) => Ok(*value),
            Some(Value::String(raw)) => raw
                .parse()
                .map_err(|_| format!("'{}' must be true or false", key)),
            _ => Err(format!("Missing '{}' argument", key)),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: String,
    pub id: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

#[derive(Debug, Serialize)]
pub struct JsonRpcError {
    pub code: i32,
    pub message: String,
}

impl JsonRpcResponse {
    pub fn success(id: Value, result: Value) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id,
            result: Some(result),
            error: None,
        }
    }

    pub fn error(id: Value, code: i32, message: String) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id,
            result: None,
            error: Some(JsonRpcError { code, message }),
        }
    }
}

// -----------------------------------------------------------------------------
// Server State
// -----------------------------------------------------------------------------

pub struct McpState {
    pub manager: Arc<Manager>,
    pub event_bus: Arc<EventBus>,
}

// -----------------------------------------------------------------------------
// Implementation
// -----------------------------------------------------------------------------

pub struct McpServer {
    manager: Arc<Manager>,
    event_bus: Arc<EventBus>,
}

impl McpServer {
    pub fn new(manager: Arc<Manager>, event_bus: Arc<EventBus>) -> Self {
        Self { manager, event_bus }
    }

    pub fn router(&self) -> Router {
        let state = Arc::new(McpState {
            manager: self.manager.clone(),
            event_bus: self.event_bus.clone(),
        });

        Router::new()
            .route("/sse", get(sse_handler))
            .route("/messages", post(messages_handler))
            .with_state(state)
            .layer(CorsLayer::permissive())
    }
}

async fn sse_handler(
    State(state): State<Arc<McpState>>,
) -> Sse<impl Stream<Item = Result<Event, axum::BoxError>>> {
    info!("New SSE connection established");

    let mut rx = state.event_bus.subscribe();

    let stream = async_stream::stream! {
        // The client needs to know where to send POST messages
        let endpoint_event = Event::default()
            .event("endpoint")
            .data("/messages");
        yield Ok(endpoint_event);

        loop {
            match rx.recv().await {
                Ok(event) => match serde_json::to_string(&event) {
                    Ok(json) => {
                        yield Ok(Event::default().data(json));
                    }
                    Err(e) => {
                        error!("Failed to encode bus event: {}", e);
                    }
                },
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!("SSE client lagged, skipped {} events", skipped);
                }
                Err(broadcast::error::RecvError::Closed) => {
                    break;
                }
            }
        }
    };

    Sse::new(stream).keep_alive(axum::response::sse::KeepAlive::default())
}

fn tool(name: &str, description: &str, required: &[(&str, &str)]) -> Value {
    let properties: serde_json::Map<String, Value> = required
        .iter()
        .map(|(arg, about)| {
            (
                arg.to_string(),
                serde_json::json!({ "type": "string", "description": about }),
            )
        })
        .collect();
    let names: Vec<&str> = required.iter().map(|(arg, _)| *arg).collect();

    serde_json::json!({
        "name": name,
        "description": description,
        "inputSchema": {
            "type": "object",
            "properties": properties,
            "required": names
        }
    })
}

fn tool_list() -> Vec<Value> {
    vec![
        tool("list_chats", "Reload and list the employee's chats grouped by day", &[]),
        tool(
            "open_chat",
            "Open a chat and show its messages",
            &[("chat_id", "Chat to open")],
        ),
        tool(
            "open_chain",
            "Open the chain a session belongs to and show its merged timeline",
            &[("session_id", "Any session of the chain")],
        ),
        tool("scheduled_sessions", "Reload and list scheduled sessions", &[]),
        tool(
            "initiate_chat",
            "Start the chat for a scheduled session",
            &[("session_id", "Scheduled session to start")],
        ),
        tool(
            "send_message",
            "Send a message in the open chat",
            &[("text", "Message text")],
        ),
        tool("end_session", "End the open chat session", &[]),
        tool("chat_status", "Show whether messaging is currently allowed", &[]),
        tool("logout", "Log out and forget the stored session", &[]),
        tool(
            "forgot_password",
            "Email a password reset link",
            &[("email", "Account email address")],
        ),
        tool(
            "validate_reset_token",
            "Check whether a password reset token is still valid",
            &[("token", "Token from the reset link")],
        ),
        tool(
            "reset_password",
            "Set a new password using a reset token",
            &[
                ("token", "Token from the reset link"),
                ("password", "New password"),
                ("confirmation", "New password again"),
            ],
        ),
        read_only_tool(),
    ]
}

fn read_only_tool() -> Value {
    let mut tool = tool(
        "set_read_only",
        "Switch the chat view in or out of read-only mode",
        &[("read_only", "Whether sending is disabled")],
    );
    tool["inputSchema"]["properties"]["read_only"]["type"] = Value::from("boolean");
    tool
}

fn text_content(text: String) -> Value {
    serde_json::json!({
        "content": [{
            "type": "text",
            "text": text
        }]
    })
}

pub(crate) fn format_history(sections: &[HistorySection]) -> String {
    if sections.is_empty() {
        return "No chats yet.".to_string();
    }

    let mut out = String::new();
    for section in sections {
        out.push_str(&format!("{}\n", section.label));
        for entry in &section.entries {
            let id = entry
                .chat_id
                .as_deref()
                .or(entry.session_id.as_deref())
                .unwrap_or("-");
            out.push_str(&format!("  {}", id));
            if let Some(preview) = &entry.preview {
                out.push_str(&format!(": {}", preview));
            }
            if entry.unread_count > 0 {
                out.push_str(&format!(" ({} unread)", entry.unread_count));
            }
            out.push('\n');
        }
    }
    out
}

pub(crate) fn format_messages(messages: &[Message]) -> String {
    if messages.is_empty() {
        return "No messages.".to_string();
    }

    messages
        .iter()
        .map(|m| {
            if m.is_session_marker {
                format!("--- {} ---", m.text)
            } else {
                format!("[{}] {}: {}", m.timestamp.format("%H:%M"), m.sender, m.text)
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

pub(crate) fn format_status(state: &ChatState) -> String {
    format!(
        "chat: {}\nstate: {:?}\ncan send: {}\ncan end chat: {}\nended: {}",
        state.open_chat_id.as_deref().unwrap_or("none"),
        state.gate.state,
        state.can_send_messages(),
        state.gate.can_end_chat,
        state.gate.chat_ended
    )
}

async fn call_tool(manager: &Manager, params: &CallToolParams) -> Result<String, String> {
    match params.name.as_str() {
        "list_chats" => {
            manager.load_chats().await.map_err(|e| format!("{:#}", e))?;
            Ok(format_history(&manager.history(&chrono::Local)))
        }
        "open_chat" => {
            let chat_id = params.str_arg("chat_id")?;
            manager
                .open_chat(chat_id)
                .await
                .map_err(|e| format!("{:#}", e))?;
            Ok(format_messages(&manager.snapshot().messages))
        }
        "open_chain" => {
            let session_id = params.str_arg("session_id")?;
            manager
                .open_chain(session_id)
                .await
                .map_err(|e| format!("{:#}", e))?;
            Ok(format_messages(&manager.snapshot().messages))
        }
        "scheduled_sessions" => {
            manager
                .load_scheduled_sessions()
                .await
                .map_err(|e| format!("{:#}", e))?;
            let sessions = manager.snapshot().scheduled_sessions;
            if sessions.is_empty() {
                return Ok("No scheduled sessions.".to_string());
            }
            Ok(sessions
                .iter()
                .map(|s| {
                    format!(
                        "{} [{:?}] chat: {}",
                        s.session_id,
                        s.status,
                        s.chat_id.as_deref().unwrap_or("-")
                    )
                })
                .collect::<Vec<_>>()
                .join("\n"))
        }
        "initiate_chat" => {
            let session_id = params.str_arg("session_id")?;
            let chat_id = manager
                .initiate_chat(session_id)
                .await
                .map_err(|e| format!("{:#}", e))?;
            Ok(format!("Started chat {}", chat_id))
        }
        "send_message" => {
            let text = params.str_arg("text")?;
            let result = manager.send_message(text).await;
            let transcript = format_messages(&manager.snapshot().messages);
            match result {
                Ok(()) => Ok(transcript),
                Err(e) => Err(format!("{:#}\n{}", e, transcript)),
            }
        }
        "end_session" => {
            manager.end_session().await.map_err(|e| format!("{:#}", e))?;
            Ok("Session ended".to_string())
        }
        "chat_status" => Ok(format_status(&manager.snapshot())),
        "logout" => {
            manager.logout().await;
            Ok("Logged out".to_string())
        }
        "forgot_password" => {
            let email = params.str_arg("email")?;
            let message = manager
                .forgot_password(email)
                .await
                .map_err(|e| format!("{:#}", e))?;
            Ok(message.unwrap_or_else(|| "Check your email for a reset link".to_string()))
        }
        "validate_reset_token" => {
            let token = params.str_arg("token")?;
            let valid = manager
                .validate_reset_token(token)
                .await
                .map_err(|e| format!("{:#}", e))?;
            Ok(if valid {
                "Reset token is valid".to_string()
            } else {
                "Reset token is invalid or expired".to_string()
            })
        }
        "reset_password" => {
            let token = params.str_arg("token")?;
            let password = params.str_arg("password")?;
            let confirmation = params.str_arg("confirmation")?;
            let message = manager
                .reset_password(token, password, confirmation)
                .await
                .map_err(|e| format!("{:#}", e))?;
            Ok(message.unwrap_or_else(|| "Password updated".to_string()))
        }
        "set_read_only" => {
            manager.set_read_only(params.bool_arg("read_only")?);
            Ok(format_status(&manager.snapshot()))
        }
        unknown => Err(format!("Unknown tool: {}", unknown)),
    }
}

#[axum::debug_handler]
async fn messages_handler(
    State(state): State<Arc<McpState>>,
    Json(request): Json<JsonRpcRequest>,
) -> impl IntoResponse {
    info!("Received MCP message: {:?}", request);

    match request {
        JsonRpcRequest::Initialize { params, id } => {
            info!(
                "Initializing MCP session: protocol={} client={:?} capabilities={:?}",
                params.protocol_version, params.client_info, params.capabilities
            );

            let result = serde_json::json!({
                "protocolVersion": "2024-11-05",
                "capabilities": {
                    "tools": {}
                },
                "serverInfo": {
                    "name": "employee-portal",
                    "version": env!("CARGO_PKG_VERSION")
                }
            });

            Json(JsonRpcResponse::success(id, result))
        }

        JsonRpcRequest::ListTools { id, .. } => {
            let result = serde_json::json!({ "tools": tool_list() });
            Json(JsonRpcResponse::success(id, result))
        }

        JsonRpcRequest::CallTool { params, id } => {
            match call_tool(&state.manager, &params).await {
                Ok(text) => Json(JsonRpcResponse::success(id, text_content(text))),
                Err(e) => Json(JsonRpcResponse::error(id, -32000, e)),
            }
        }

        JsonRpcRequest::Unknown { method, id, .. } => {
            error!("Unknown method: {}", method);
            if let Some(req_id) = id {
                Json(JsonRpcResponse::error(
                    req_id,
                    -32601,
                    format!("Method not found: {}", method),
                ))
            } else {
                Json(JsonRpcResponse::error(
                    Value::Null,
                    -32600,
                    "Invalid Request".to_string(),
                ))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chat::{ChatItem, SessionStatus};
    use crate::entity::Sender;
    use crate::view::history::{group_by_day, HistorySource};
    use crate::view::state::ChatEvent;
    use chrono::{TimeZone, Utc};

    #[test]
    fn history_text() {
        let mut chat = ChatItem::new("c1");
        chat.last_message = Some("See you".into());
        chat.unread_count = 2;
        chat.created_at = Some(Utc.with_ymd_and_hms(2024, 1, 3, 9, 0, 0).unwrap());
        let chats = vec![chat];
        let now = Utc.with_ymd_and_hms(2024, 1, 3, 12, 0, 0).unwrap();

        let sections = group_by_day(HistorySource::Chats(&chats), now, &Utc);
        assert_eq!(format_history(&sections), "Today\n  c1: See you (2 unread)\n");
        assert_eq!(format_history(&[]), "No chats yet.");
    }

    #[test]
    fn messages_text() {
        let at = Utc.with_ymd_and_hms(2024, 1, 3, 9, 5, 0).unwrap();
        let messages = vec![
            Message::session_marker("s1", at),
            Message::new(Sender::User, "Hi").at(at),
        ];

        assert_eq!(
            format_messages(&messages),
            "--- Session started at Jan 03, 2024 09:05 ---\n[09:05] You: Hi"
        );
    }

    #[test]
    fn status_text() {
        let state = ChatState::new(false)
            .reduce(ChatEvent::SessionStatusChanged(Some(SessionStatus::Inactive)));
        let text = format_status(&state);
        assert!(text.contains("state: Inactive"));
        assert!(text.contains("can send: false"));
    }

    #[test]
    fn tools_declare_required_arguments() {
        let tools = tool_list();
        let send = tools
            .iter()
            .find(|t| t["name"] == "send_message")
            .unwrap();
        assert_eq!(send["inputSchema"]["required"], serde_json::json!(["text"]));
        assert_eq!(
            send["inputSchema"]["properties"]["text"]["type"],
            "string"
        );
    }

    #[test]
    fn read_only_tool_takes_a_boolean() {
        let tools = tool_list();
        let read_only = tools
            .iter()
            .find(|t| t["name"] == "set_read_only")
            .unwrap();
        assert_eq!(
            read_only["inputSchema"]["properties"]["read_only"]["type"],
            "boolean"
        );
        assert!(tools.iter().any(|t| t["name"] == "reset_password"));
    }

    fn manager() -> Manager {
        let client =
            crate::api::PortalClient::new("http://127.0.0.1:9", std::time::Duration::from_secs(1))
                .unwrap();
        Manager::new(Arc::new(client), Arc::new(EventBus::new()), false)
    }

    fn call(name: &str, arguments: Value) -> CallToolParams {
        serde_json::from_value(serde_json::json!({"name": name, "arguments": arguments})).unwrap()
    }

    #[tokio::test]
    async fn set_read_only_tool_toggles_gate() {
        let manager = manager();

        let text = call_tool(&manager, &call("set_read_only", serde_json::json!({"read_only": true})))
            .await
            .unwrap();
        assert!(text.contains("state: ReadOnly"));
        assert!(!manager.snapshot().can_send_messages());

        call_tool(&manager, &call("set_read_only", serde_json::json!({"read_only": "false"})))
            .await
            .unwrap();
        assert!(manager.snapshot().can_send_messages());

        assert!(call_tool(&manager, &call("set_read_only", serde_json::json!({"read_only": "maybe"})))
            .await
            .is_err());
    }

    #[tokio::test]
    async fn reset_password_tool_validates_before_sending() {
        let manager = manager();
        let err = call_tool(
            &manager,
            &call(
                "reset_password",
                serde_json::json!({"token": "t1", "password": "longenough", "confirmation": "different1"}),
            ),
        )
        .await
        .unwrap_err();
        assert!(err.contains("Passwords do not match"), "{}", err);
    }

    #[test]
    fn call_params_arguments() {
        let params: CallToolParams = serde_json::from_value(serde_json::json!({
            "name": "open_chat",
            "arguments": {"chat_id": "c1"}
        }))
        .unwrap();
        assert_eq!(params.str_arg("chat_id"), Ok("c1"));
        assert_eq!(
            params.str_arg("text"),
            Err("Missing 'text' argument".to_string())
        );
    }
}
