//! Error types for lantern.

use lsp_types::Url;
use thiserror::Error;

use crate::protocol::error_codes;

/// Main error type for lantern.
#[derive(Error, Debug)]
pub enum LanternError {
    /// Raised by every queue operation once the server has begun shutting down.
    #[error("Queue is closed")]
    QueueClosed,

    #[error("Document not open: {0}")]
    DocumentNotOpen(Url),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Bridge error: {0}")]
    Bridge(String),

    #[error("Worker error: {0}")]
    Worker(String),
}

/// Result type alias for lantern operations.
pub type Result<T> = std::result::Result<T, LanternError>;

/// A failure raised while executing a single request.
///
/// These never escape the executor; they are captured into the job result
/// and surfaced to the client as an error reply plus a telemetry event.
#[derive(Error, Debug)]
pub enum FeatureError {
    #[error("Unknown request method '{0}'")]
    MethodNotFound(String),

    #[error("Invalid params for '{method}': {source}")]
    InvalidParams {
        method: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Document not open: {0}")]
    DocumentNotOpen(Url),

    #[error(transparent)]
    Store(#[from] LanternError),

    /// A handler panicked. The payload message is kept, the panic does not escape.
    #[error("{0}")]
    Panic(String),
}

impl FeatureError {
    /// Stable class name reported in telemetry `errorClass`.
    pub fn class_name(&self) -> &'static str {
        match self {
            Self::MethodNotFound(_) => "MethodNotFound",
            Self::InvalidParams { .. } => "InvalidParams",
            Self::DocumentNotOpen(_) => "DocumentNotOpen",
            Self::Store(LanternError::QueueClosed) => "QueueClosed",
            Self::Store(LanternError::DocumentNotOpen(_)) => "DocumentNotOpen",
            Self::Store(LanternError::Bridge(_)) => "BridgeError",
            Self::Store(_) => "StoreError",
            Self::Panic(_) => "Panic",
        }
    }

    /// JSON-RPC error code for the reply.
    pub fn code(&self) -> i64 {
        match self {
            Self::MethodNotFound(_) => error_codes::METHOD_NOT_FOUND,
            Self::InvalidParams { .. } => error_codes::INVALID_PARAMS,
            _ => error_codes::INTERNAL_ERROR,
        }
    }
}

/// Misuse of the middleware registry. Raised immediately at registration time.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum RegistryError {
    #[error("Request {feature} does not accept {kind} hooks")]
    HookNotAccepted {
        feature: &'static str,
        kind: &'static str,
    },
}

/// A failure discovering, loading or activating an extension.
///
/// Collected during boot and reported, never raised.
#[derive(Error, Debug)]
pub enum ExtensionError {
    #[error("Failed to read {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: toml::de::Error,
    },

    #[error("Extension '{name}' failed to activate: {source}")]
    Activation {
        name: String,
        #[source]
        source: RegistryError,
    },

    #[error("Extension '{name}' panicked during activation: {message}")]
    Panicked { name: String, message: String },
}

/// Best-effort text of a panic payload.
pub fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "panic with a non-string payload".to_string()
    }
}
