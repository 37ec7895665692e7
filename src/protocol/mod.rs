//! JSON-RPC message types exchanged with the editor.
//!
//! Incoming messages are decoded into [`Request`]; a request without an `id`
//! is a notification. Outgoing traffic is built as [`Message`] and framed by
//! [`transport`].

pub mod transport;

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

/// JSON-RPC error codes used in replies.
pub mod error_codes {
    pub const INVALID_REQUEST: i64 = -32600;
    pub const METHOD_NOT_FOUND: i64 = -32601;
    pub const INVALID_PARAMS: i64 = -32602;
    pub const INTERNAL_ERROR: i64 = -32603;
    pub const SERVER_NOT_INITIALIZED: i64 = -32002;
}

/// Methods the core handles without going through the queue.
pub mod methods {
    pub const INITIALIZE: &str = "initialize";
    pub const INITIALIZED: &str = "initialized";
    pub const DID_OPEN: &str = "textDocument/didOpen";
    pub const DID_CHANGE: &str = "textDocument/didChange";
    pub const DID_CLOSE: &str = "textDocument/didClose";
    pub const CANCEL_REQUEST: &str = "$/cancelRequest";
    pub const SHUTDOWN: &str = "shutdown";
    pub const EXIT: &str = "exit";
    pub const TELEMETRY: &str = "telemetry/event";
    pub const LOG_MESSAGE: &str = "window/logMessage";
}

/// A request id. Clients may send numbers or strings.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestId {
    Number(i64),
    String(String),
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{}", n),
            Self::String(s) => write!(f, "{:?}", s),
        }
    }
}

impl From<i64> for RequestId {
    fn from(n: i64) -> Self {
        Self::Number(n)
    }
}

/// An incoming request or notification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<RequestId>,
    pub method: String,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub params: Value,
}

impl Request {
    #[cfg(test)]
    pub fn new(id: impl Into<RequestId>, method: impl Into<String>, params: Value) -> Self {
        Self {
            id: Some(id.into()),
            method: method.into(),
            params,
        }
    }

    #[cfg(test)]
    pub fn notification(method: impl Into<String>, params: Value) -> Self {
        Self {
            id: None,
            method: method.into(),
            params,
        }
    }

    pub fn is_notification(&self) -> bool {
        self.id.is_none()
    }

    /// The `textDocument.uri` parameter, when present.
    pub fn document_uri(&self) -> Option<&str> {
        self.params.pointer("/textDocument/uri")?.as_str()
    }

    /// The request as it arrived on the wire.
    pub fn to_json(&self) -> Value {
        let mut value = json!({ "jsonrpc": "2.0", "method": self.method });
        if let Some(id) = &self.id {
            value["id"] = json!(id);
        }
        if !self.params.is_null() {
            value["params"] = self.params.clone();
        }
        value
    }
}

/// The `error` member of an error reply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseError {
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// An outgoing message.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    Response {
        id: Option<RequestId>,
        result: Value,
    },
    Error {
        id: Option<RequestId>,
        error: ResponseError,
    },
    Notification {
        method: String,
        params: Value,
    },
}

impl Message {
    pub fn response(id: Option<RequestId>, result: Value) -> Self {
        Self::Response { id, result }
    }

    pub fn error(id: Option<RequestId>, code: i64, message: impl Into<String>) -> Self {
        Self::Error {
            id,
            error: ResponseError {
                code,
                message: message.into(),
                data: None,
            },
        }
    }

    pub fn notification(method: impl Into<String>, params: Value) -> Self {
        Self::Notification {
            method: method.into(),
            params,
        }
    }

    pub fn to_json(&self) -> Value {
        match self {
            Self::Response { id, result } => {
                json!({ "jsonrpc": "2.0", "id": id, "result": result })
            }
            Self::Error { id, error } => {
                json!({ "jsonrpc": "2.0", "id": id, "error": error })
            }
            Self::Notification { method, params } => {
                json!({ "jsonrpc": "2.0", "method": method, "params": params })
            }
        }
    }
}
