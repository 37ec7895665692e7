//! Calls and replies exchanged between workers and the coordinator.
//!
//! One JSON object per line. Each call gets exactly one reply.

use lsp_types::{TextDocumentContentChangeEvent, Url};
use serde::{Deserialize, Serialize};

use crate::error::{LanternError, Result};
use crate::protocol::{Request, RequestId};
use crate::queue::{Job, JobResult};
use crate::store::{Document, StoreSettings};

/// A queue or store operation invoked by a worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "call", rename_all = "snake_case")]
pub enum BridgeCall {
    PopRequest,
    RemoveJobHandle {
        id: RequestId,
    },
    PushResponse {
        request: Request,
        result: JobResult,
    },
    Document {
        uri: Url,
    },
    OpenDocument {
        document: Document,
    },
    ChangeDocument {
        uri: Url,
        version: i32,
        changes: Vec<TextDocumentContentChangeEvent>,
    },
    CloseDocument {
        uri: Url,
    },
    Settings,
    UpdateSettings {
        settings: StoreSettings,
    },
}

/// The coordinator's answer to a [`BridgeCall`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "reply", rename_all = "snake_case")]
pub enum BridgeReply {
    Job { job: Option<Job> },
    Document { document: Option<Document> },
    Settings { settings: StoreSettings },
    Done,
    /// The queue has been shut down.
    Closed,
    NotOpen { uri: Url },
    Failed { message: String },
}

impl BridgeReply {
    /// Encode an operation failure so the proxy can rebuild it.
    pub fn from_error(err: LanternError) -> Self {
        match err {
            LanternError::QueueClosed => Self::Closed,
            LanternError::DocumentNotOpen(uri) => Self::NotOpen { uri },
            other => Self::Failed {
                message: other.to_string(),
            },
        }
    }

    /// Turn failure replies back into errors.
    pub fn into_result(self) -> Result<Self> {
        match self {
            Self::Closed => Err(LanternError::QueueClosed),
            Self::NotOpen { uri } => Err(LanternError::DocumentNotOpen(uri)),
            Self::Failed { message } => Err(LanternError::Bridge(message)),
            reply => Ok(reply),
        }
    }
}

pub fn to_line<T: Serialize>(message: &T) -> Result<String> {
    let mut json = serde_json::to_string(message)?;
    json.push('\n');
    Ok(json)
}

pub fn from_line<'a, T: Deserialize<'a>>(line: &'a str) -> Result<T> {
    Ok(serde_json::from_str(line.trim())?)
}
