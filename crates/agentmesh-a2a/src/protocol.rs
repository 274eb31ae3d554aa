//! A2A wire types — JSON-RPC 2.0 envelopes carrying A2A messages
//!
//! Only text payloads cross the wire reliably; structured capability calls
//! travel as a JSON string inside a text part.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub const JSONRPC_VERSION: &str = "2.0";

pub const MESSAGE_SEND: &str = "message/send";
pub const TASKS_GET: &str = "tasks/get";
pub const TASKS_CANCEL: &str = "tasks/cancel";

// Standard JSON-RPC error codes
pub const PARSE_ERROR: i64 = -32700;
pub const INVALID_REQUEST: i64 = -32600;
pub const METHOD_NOT_FOUND: i64 = -32601;
pub const INVALID_PARAMS: i64 = -32602;
pub const INTERNAL_ERROR: i64 = -32603;
// A2A-specific
pub const TASK_NOT_FOUND: i64 = -32001;

/// JSON-RPC 2.0 request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<Value>,
    pub method: String,
    #[serde(default)]
    pub params: Value,
}

/// JSON-RPC 2.0 response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: String,
    #[serde(default)]
    pub id: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

/// JSON-RPC error
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcError {
    pub code: i64,
    pub message: String,
}

impl JsonRpcResponse {
    pub fn success(id: Value, result: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            result: Some(result),
            error: None,
        }
    }

    pub fn error(id: Value, code: i64, message: impl Into<String>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            result: None,
            error: Some(JsonRpcError {
                code,
                message: message.into(),
            }),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Agent,
}

/// One piece of a message. Senders put the payload either directly on the
/// part or inside a `root` / `content` wrapper; both shapes are accepted.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Part {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, alias = "content", skip_serializing_if = "Option::is_none")]
    pub root: Option<Box<Part>>,
}

/// What the dispatcher found in an inbound message
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Text(String),
    Data(Value),
}

impl Part {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            ..Self::default()
        }
    }

    pub fn data(data: Value) -> Self {
        Self {
            data: Some(data),
            ..Self::default()
        }
    }

    /// First non-empty text or data on this part, looking through wrappers.
    pub fn payload(&self) -> Option<Payload> {
        if let Some(text) = self.text.as_deref().filter(|t| !t.is_empty()) {
            return Some(Payload::Text(text.to_string()));
        }
        if let Some(data) = self.data.as_ref().filter(|d| !is_empty_value(d)) {
            return Some(Payload::Data(data.clone()));
        }
        self.root.as_ref().and_then(|inner| inner.payload())
    }
}

fn is_empty_value(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Object(map) => map.is_empty(),
        Value::Array(items) => items.is_empty(),
        Value::String(s) => s.is_empty(),
        _ => false,
    }
}

/// Scan parts in order and return the first usable payload.
pub fn extract_payload(parts: &[Part]) -> Option<Payload> {
    parts.iter().find_map(Part::payload)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    #[serde(default)]
    pub message_id: String,
    pub role: Role,
    #[serde(default)]
    pub parts: Vec<Part>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
}

impl Message {
    pub fn user_text(message_id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            message_id: message_id.into(),
            role: Role::User,
            parts: vec![Part::text(text)],
            kind: None,
        }
    }

    pub fn agent_text(text: impl Into<String>) -> Self {
        Self {
            message_id: uuid::Uuid::new_v4().to_string(),
            role: Role::Agent,
            parts: vec![Part {
                kind: Some("text".to_string()),
                ..Part::text(text)
            }],
            kind: Some("message".to_string()),
        }
    }

    pub fn payload(&self) -> Option<Payload> {
        extract_payload(&self.parts)
    }

    /// Text of the first part that has any
    pub fn first_text(&self) -> Option<&str> {
        self.parts.iter().find_map(|p| {
            p.text
                .as_deref()
                .or_else(|| p.root.as_ref().and_then(|r| r.text.as_deref()))
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageSendParams {
    pub message: Message,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskQueryParams {
    pub id: String,
}

/// Build the `message/send` envelope for one text payload.
pub fn message_send_request(message_id: String, request_id: String, text: &str) -> JsonRpcRequest {
    let params = MessageSendParams {
        message: Message::user_text(message_id, text),
    };
    JsonRpcRequest {
        jsonrpc: JSONRPC_VERSION.to_string(),
        id: Some(Value::String(request_id)),
        method: MESSAGE_SEND.to_string(),
        params: serde_json::to_value(params).unwrap_or(Value::Null),
    }
}

/// Structured capability invocation, `{"capability": ..., "args": {...}}`
#[derive(Debug, Serialize)]
struct CapabilityCall<'a> {
    capability: &'a str,
    args: &'a Map<String, Value>,
}

/// Serialize a capability call the way it travels: as the text of a message.
pub fn capability_call_text(capability: &str, args: &Map<String, Value>) -> String {
    serde_json::to_string(&CapabilityCall { capability, args }).unwrap_or_default()
}

/// Pull the reply text out of a `message/send` result.
pub fn response_text(result: &Value) -> Option<String> {
    let message: Message = serde_json::from_value(result.clone()).ok()?;
    message.first_text().map(str::to_string)
}
